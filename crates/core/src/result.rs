//! Per-tier inference results and the final outcome of dispatching a reading.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{EdgeNodeId, MachineId};

/// Method label for the edge-tier temperature threshold fallback.
pub const METHOD_EDGE_FALLBACK: &str = "edge_threshold_fallback";

/// Method label for the cloud-tier rule-score fallback.
pub const METHOD_CLOUD_FALLBACK: &str = "cloud_rule_fallback";

/// Probability above which a result is classified as a fault.
pub const FAULT_PROBABILITY_CUTOFF: f64 = 0.5;

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Where an inference was (or would have been) performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Edge,
    Cloud,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Edge => "edge",
            Tier::Cloud => "cloud",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Certainty derived from a fault probability: `|p - 0.5| * 2`, clamped to
/// `[0, 1]`.
pub fn confidence_from_probability(probability: f64) -> f64 {
    ((probability - FAULT_PROBABILITY_CUTOFF).abs() * 2.0).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// InferenceResult
// ---------------------------------------------------------------------------

/// A single tier's verdict on one reading.
///
/// Always built through [`InferenceResult::from_probability`], so
/// `is_fault == (probability > 0.5)` holds for every value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub is_fault: bool,
    pub probability: f64,
    pub confidence: f64,
    pub latency: Duration,
    pub tier: Tier,
    pub method: String,
}

impl InferenceResult {
    /// Build a result from a raw probability. Out-of-range probabilities are
    /// clamped into `[0, 1]`.
    pub fn from_probability(
        tier: Tier,
        probability: f64,
        latency: Duration,
        method: impl Into<String>,
    ) -> Self {
        let probability = if probability.is_finite() {
            probability.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            is_fault: probability > FAULT_PROBABILITY_CUTOFF,
            probability,
            confidence: confidence_from_probability(probability),
            latency,
            tier,
            method: method.into(),
        }
    }

    /// `true` when this result came from a fixed-rule heuristic rather than
    /// a model.
    pub fn is_fallback(&self) -> bool {
        self.method == METHOD_EDGE_FALLBACK || self.method == METHOD_CLOUD_FALLBACK
    }
}

// ---------------------------------------------------------------------------
// DispatchOutcome
// ---------------------------------------------------------------------------

/// The result chosen as final for one reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub machine_id: MachineId,
    /// Edge node the reading was routed through.
    pub edge_node: EdgeNodeId,
    pub result: InferenceResult,
    pub final_tier: Tier,
    /// Edge confidence that caused escalation, when the cloud tier decided.
    pub escalated_from: Option<f64>,
    /// `true` when this dispatch performed the machine's stop transition.
    pub stop_issued: bool,
}

impl DispatchOutcome {
    pub fn was_escalated(&self) -> bool {
        self.escalated_from.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
