//! Labeled samples collected on the cloud side for retraining.

use std::sync::{Mutex, PoisonError};

use fogpdm_core::reading::ScalarFeatures;
use fogpdm_core::types::{MachineId, SimTime};

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSample {
    pub machine_id: MachineId,
    pub timestamp: SimTime,
    /// Raw, un-normalized features.
    pub features: ScalarFeatures,
    pub label: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    samples: Vec<LabeledSample>,
    new_since_take: usize,
}

/// Accumulated training set, owned by the run and injected into the
/// dispatcher (writer) and the model-sync controller (reader).
#[derive(Debug, Default)]
pub struct SampleStore {
    state: Mutex<StoreState>,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, sample: LabeledSample) {
        let mut s = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        s.samples.push(sample);
        s.new_since_take += 1;
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .samples
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples added since the last successful take.
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .new_since_take
    }

    /// Once at least `k` new samples arrived since the last take, return the
    /// whole accumulated set and restart the count.
    pub fn take_if_ready(&self, k: usize) -> Option<Vec<LabeledSample>> {
        let mut s = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if s.new_since_take == 0 || s.new_since_take < k {
            return None;
        }
        s.new_since_take = 0;
        Some(s.samples.clone())
    }
}
