//! Fixed-threshold classifiers used when a model tier cannot answer.
//!
//! Both work on raw (un-normalized) scalar features and produce ordinary
//! [`InferenceResult`]s tagged with a fallback method label, so they flow
//! through the same metrics and actuation path as model verdicts.

use std::time::Duration;

use crate::reading::ScalarFeatures;
use crate::result::{InferenceResult, Tier, METHOD_CLOUD_FALLBACK, METHOD_EDGE_FALLBACK};

/// Edge fallback trips above this temperature (°C).
pub const EDGE_TEMPERATURE_LIMIT: f64 = 60.0;

/// Hard limits that make the cloud fallback report a fault on their own.
pub const CLOUD_TEMPERATURE_LIMIT: f64 = 70.0;
pub const CLOUD_VOLTAGE_HIGH: f64 = 260.0;
pub const CLOUD_VOLTAGE_LOW: f64 = 180.0;

/// Rule score at or above which the cloud fallback reports a fault.
pub const CLOUD_SCORE_THRESHOLD: u32 = 3;

/// Probabilities reported by the edge fallback.
const EDGE_FAULT_PROBABILITY: f64 = 0.7;
const EDGE_NORMAL_PROBABILITY: f64 = 0.3;

/// Score a value against a (severe, elevated) limit pair: 2, 1 or 0.
fn band(value: f64, severe: f64, elevated: f64) -> u32 {
    if value > severe {
        2
    } else if value > elevated {
        1
    } else {
        0
    }
}

/// Additive decision-tree score over the raw scalar channels.
///
/// Each of temperature, voltage, peak vibration and current contributes 2
/// when severe and 1 when elevated.
pub fn cloud_rule_score(features: &ScalarFeatures) -> u32 {
    band(features.temperature, 70.0, 60.0)
        + band(features.voltage, 245.0, 235.0)
        + band(features.max_vibration(), 2.5, 1.5)
        + band(features.current, 20.0, 17.0)
}

/// Edge-tier fallback: fault iff temperature exceeds 60 °C.
pub fn edge_fallback(features: &ScalarFeatures, latency: Duration) -> InferenceResult {
    let probability = if features.temperature > EDGE_TEMPERATURE_LIMIT {
        EDGE_FAULT_PROBABILITY
    } else {
        EDGE_NORMAL_PROBABILITY
    };
    InferenceResult::from_probability(Tier::Edge, probability, latency, METHOD_EDGE_FALLBACK)
}

/// Cloud-tier fallback: fault on any hard limit or a rule score of at
/// least [`CLOUD_SCORE_THRESHOLD`].
pub fn cloud_fallback(features: &ScalarFeatures, latency: Duration) -> InferenceResult {
    let score = cloud_rule_score(features);
    let hard_limit = features.temperature > CLOUD_TEMPERATURE_LIMIT
        || features.voltage > CLOUD_VOLTAGE_HIGH
        || features.voltage < CLOUD_VOLTAGE_LOW;

    let probability = if hard_limit || score >= CLOUD_SCORE_THRESHOLD {
        (0.6 + 0.05 * f64::from(score)).min(1.0)
    } else {
        0.05 * f64::from(score)
    };
    InferenceResult::from_probability(Tier::Cloud, probability, latency, METHOD_CLOUD_FALLBACK)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
