//! Run-wide prediction counters and latency series.
//!
//! Every mutation happens under one lock, so any snapshot satisfies
//! `edge_handled + cloud_handled == total_predictions`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

use fogpdm_core::result::Tier;
use fogpdm_core::types::MachineId;

#[derive(Debug, Default)]
struct MetricsState {
    total_predictions: u64,
    edge_handled: u64,
    cloud_handled: u64,
    edge_correct: u64,
    cloud_correct: u64,
    edge_labeled: u64,
    cloud_labeled: u64,
    faults_by_machine: BTreeMap<MachineId, u64>,
    predictions_by_machine: BTreeMap<MachineId, u64>,
    method_counts: BTreeMap<String, u64>,
    edge_latencies: Vec<Duration>,
    cloud_latencies: Vec<Duration>,
    stopped_machines: BTreeSet<MachineId>,
    rejected_readings: u64,
    network_usage: f64,
}

/// Thread-safe aggregator shared by the dispatcher and both control loops.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    state: Mutex<MetricsState>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the final verdict for one reading.
    ///
    /// Correctness is only tallied when the reading carried a label.
    pub fn record_prediction(
        &self,
        tier: Tier,
        predicted_fault: bool,
        true_fault: Option<bool>,
        latency: Duration,
        method: &str,
        machine_id: MachineId,
    ) {
        let correct = true_fault.map(|t| t == predicted_fault);
        let mut s = self.lock();

        s.total_predictions += 1;
        match tier {
            Tier::Edge => {
                s.edge_handled += 1;
                s.edge_latencies.push(latency);
                if let Some(correct) = correct {
                    s.edge_labeled += 1;
                    s.edge_correct += u64::from(correct);
                }
            }
            Tier::Cloud => {
                s.cloud_handled += 1;
                s.cloud_latencies.push(latency);
                if let Some(correct) = correct {
                    s.cloud_labeled += 1;
                    s.cloud_correct += u64::from(correct);
                }
            }
        }

        *s.predictions_by_machine.entry(machine_id).or_default() += 1;
        if predicted_fault {
            *s.faults_by_machine.entry(machine_id).or_default() += 1;
        }
        *s.method_counts.entry(method.to_string()).or_default() += 1;
    }

    /// Record that a stop command was issued for `machine_id`.
    pub fn record_stop(&self, machine_id: MachineId) {
        self.lock().stopped_machines.insert(machine_id);
    }

    /// Count a reading dropped before inference.
    pub fn record_rejected(&self) {
        self.lock().rejected_readings += 1;
    }

    pub fn add_network_usage(&self, cost: f64) {
        self.lock().network_usage += cost;
    }

    pub fn total_predictions(&self) -> u64 {
        self.lock().total_predictions
    }

    pub fn edge_handled(&self) -> u64 {
        self.lock().edge_handled
    }

    pub fn cloud_handled(&self) -> u64 {
        self.lock().cloud_handled
    }

    pub fn network_usage(&self) -> f64 {
        self.lock().network_usage
    }

    /// Consistent copy of every counter plus derived figures.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let s = self.lock();
        let labeled = s.edge_labeled + s.cloud_labeled;

        MetricsSnapshot {
            total_predictions: s.total_predictions,
            edge_handled: s.edge_handled,
            cloud_handled: s.cloud_handled,
            edge_correct: s.edge_correct,
            cloud_correct: s.cloud_correct,
            edge_accuracy: ratio(s.edge_correct, s.edge_labeled),
            cloud_accuracy: ratio(s.cloud_correct, s.cloud_labeled),
            overall_accuracy: ratio(s.edge_correct + s.cloud_correct, labeled),
            edge_latency: LatencySummary::from_series(&s.edge_latencies),
            cloud_latency: LatencySummary::from_series(&s.cloud_latencies),
            faults_by_machine: s.faults_by_machine.clone(),
            predictions_by_machine: s.predictions_by_machine.clone(),
            prediction_method_counts: s.method_counts.clone(),
            stopped_machines: s.stopped_machines.iter().copied().collect(),
            rejected_readings: s.rejected_readings,
            network_usage: s.network_usage,
        }
    }
}

fn ratio(num: u64, den: u64) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    fn from_series(series: &[Duration]) -> Option<Self> {
        if series.is_empty() {
            return None;
        }
        let ms: Vec<f64> = series.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        Some(Self {
            count: ms.len(),
            avg_ms: ms.iter().sum::<f64>() / ms.len() as f64,
            min_ms: ms.iter().copied().fold(f64::INFINITY, f64::min),
            max_ms: ms.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Point-in-time report of the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_predictions: u64,
    pub edge_handled: u64,
    pub cloud_handled: u64,
    pub edge_correct: u64,
    pub cloud_correct: u64,
    pub edge_accuracy: Option<f64>,
    pub cloud_accuracy: Option<f64>,
    pub overall_accuracy: Option<f64>,
    pub edge_latency: Option<LatencySummary>,
    pub cloud_latency: Option<LatencySummary>,
    pub faults_by_machine: BTreeMap<MachineId, u64>,
    pub predictions_by_machine: BTreeMap<MachineId, u64>,
    pub prediction_method_counts: BTreeMap<String, u64>,
    pub stopped_machines: Vec<MachineId>,
    pub rejected_readings: u64,
    pub network_usage: f64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
