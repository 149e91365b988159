//! Simulated time.
//!
//! Components read time through [`Clock`] so tests can substitute a
//! [`ManualClock`] or run a [`TokioClock`] under `tokio::time::pause()`.

use std::sync::Mutex;

use tokio::time::Instant;

use crate::types::SimTime;

pub trait Clock: Send + Sync {
    /// Seconds since the run started.
    fn now(&self) -> SimTime;
}

/// Wall-clock time measured on tokio's timer, so paused test time applies.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    started: Instant,
}

impl TokioClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> SimTime {
        self.started.elapsed().as_secs_f64()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<SimTime>,
}

impl ManualClock {
    pub fn new(start: SimTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, t: SimTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = t;
    }

    pub fn advance(&self, secs: f64) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) += secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SimTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
