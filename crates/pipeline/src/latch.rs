//! At-most-once stop guard per machine.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use fogpdm_core::types::MachineId;

/// Records which machines have been stopped.
///
/// Stopping is terminal for the run: there is no reset.
#[derive(Debug, Default)]
pub struct ActuationLatch {
    stopped: Mutex<HashSet<MachineId>>,
}

impl ActuationLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip `machine_id` from running to stopped.
    ///
    /// Returns `true` only for the call that performed the transition; every
    /// later call for the same machine returns `false`.
    pub fn try_stop(&self, machine_id: MachineId) -> bool {
        self.stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(machine_id)
    }

    pub fn is_stopped(&self, machine_id: MachineId) -> bool {
        self.stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&machine_id)
    }

    /// Stopped machines in ascending order.
    pub fn stopped_machines(&self) -> Vec<MachineId> {
        let mut ids: Vec<_> = self
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }
}
