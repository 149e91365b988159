//! Per-machine sensor producers.
//!
//! Each machine has one producer task that emits a reading every sensor
//! interval, repairs it, and delivers it to the machine's current gateway.
//! Producers stop when the run is cancelled or when the dispatcher stops
//! their machine through [`SensorRegistry`].

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use fogpdm_core::clock::Clock;
use fogpdm_core::preprocess;
use fogpdm_core::reading::{FeatureReading, ScalarFeatures};
use fogpdm_core::types::{MachineId, SimTime};
use fogpdm_pipeline::dispatcher::SensorControl;
use fogpdm_pipeline::{Endpoint, FogMessage, RoutingHandle, Transport};

/// Produces the next raw reading for a machine.
pub trait ReadingSource: Send + Sync {
    fn next_reading(&self, machine_id: MachineId, timestamp: SimTime) -> FeatureReading;
}

// ---------------------------------------------------------------------------
// SyntheticSource
// ---------------------------------------------------------------------------

/// Value ranges for one machine condition.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRanges {
    pub temperature: Range<f64>,
    pub voltage: Range<f64>,
    pub vibration: Range<f64>,
    pub current: Range<f64>,
}

impl ChannelRanges {
    pub fn normal() -> Self {
        Self {
            temperature: 45.0..60.0,
            voltage: 210.0..235.0,
            vibration: 0.5..1.5,
            current: 12.0..17.0,
        }
    }

    pub fn faulty() -> Self {
        Self {
            temperature: 65.0..85.0,
            voltage: 240.0..260.0,
            vibration: 2.0..4.0,
            current: 18.0..25.0,
        }
    }

    fn draw(&self, rng: &mut impl Rng) -> ScalarFeatures {
        ScalarFeatures {
            temperature: rng.random_range(self.temperature.clone()),
            voltage: rng.random_range(self.voltage.clone()),
            vibration_x: rng.random_range(self.vibration.clone()),
            vibration_y: rng.random_range(self.vibration.clone()),
            vibration_z: rng.random_range(self.vibration.clone()),
            current: rng.random_range(self.current.clone()),
        }
    }
}

/// Random labeled readings: faulty with probability `fault_rate`, normal
/// otherwise.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    fault_rate: f64,
    normal: ChannelRanges,
    faulty: ChannelRanges,
}

impl SyntheticSource {
    pub fn new(fault_rate: f64) -> Self {
        Self {
            fault_rate: fault_rate.clamp(0.0, 1.0),
            normal: ChannelRanges::normal(),
            faulty: ChannelRanges::faulty(),
        }
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(0.2)
    }
}

impl ReadingSource for SyntheticSource {
    fn next_reading(&self, machine_id: MachineId, timestamp: SimTime) -> FeatureReading {
        let mut rng = rand::rng();
        let fault = rng.random_bool(self.fault_rate);
        let ranges = if fault { &self.faulty } else { &self.normal };
        FeatureReading::new(machine_id, timestamp, ranges.draw(&mut rng)).with_ground_truth(fault)
    }
}

// ---------------------------------------------------------------------------
// SensorRegistry
// ---------------------------------------------------------------------------

/// Cancellation handles for every producer, keyed by machine.
pub struct SensorRegistry {
    parent: CancellationToken,
    tokens: Mutex<HashMap<MachineId, CancellationToken>>,
}

impl SensorRegistry {
    /// Producers registered here also stop when `parent` is cancelled.
    pub fn new(parent: CancellationToken) -> Self {
        Self {
            parent,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Token for `machine_id`'s producer, created on first use.
    pub fn token_for(&self, machine_id: MachineId) -> CancellationToken {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(machine_id)
            .or_insert_with(|| self.parent.child_token())
            .clone()
    }

    pub fn is_running(&self, machine_id: MachineId) -> bool {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&machine_id)
            .is_some_and(|t| !t.is_cancelled())
    }
}

impl SensorControl for SensorRegistry {
    fn stop_sensor(&self, machine_id: MachineId) {
        let was_running = self.is_running(machine_id);
        self.token_for(machine_id).cancel();
        if was_running {
            tracing::info!(machine_id, "Sensor stopped");
        }
    }
}

// ---------------------------------------------------------------------------
// SensorProducer
// ---------------------------------------------------------------------------

pub struct SensorProducer {
    machine_id: MachineId,
    source: Arc<dyn ReadingSource>,
    routing: Arc<RoutingHandle>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl SensorProducer {
    pub fn new(
        machine_id: MachineId,
        source: Arc<dyn ReadingSource>,
        routing: Arc<RoutingHandle>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            machine_id,
            source,
            routing,
            transport,
            clock,
            interval,
        }
    }

    /// Emit one reading per interval, the first one interval after start,
    /// until `cancel` fires. Returns how many readings were delivered.
    pub async fn run(self, cancel: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        let mut delivered = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.emit().await {
                        delivered += 1;
                    }
                }
            }
        }

        tracing::debug!(machine_id = self.machine_id, delivered, "Sensor producer finished");
        delivered
    }

    async fn emit(&self) -> bool {
        let raw = self.source.next_reading(self.machine_id, self.clock.now());
        let reading = preprocess::repair(raw);

        let Some(gateway) = self.routing.snapshot().gateway_of(self.machine_id) else {
            tracing::warn!(machine_id = self.machine_id, "Sensor has no gateway, reading dropped");
            return false;
        };

        match self
            .transport
            .deliver(Endpoint::Edge(gateway), FogMessage::Reading(reading))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(machine_id = self.machine_id, error = %e, "Reading not delivered");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
