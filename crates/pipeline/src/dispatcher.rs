//! Confidence-gated edge/cloud dispatch for single readings.
//!
//! For each reading the dispatcher:
//!
//! 1. drops it if it is invalid or its machine is already stopped;
//! 2. takes one routing snapshot and routes the whole reading with it;
//! 3. asks the edge tier (normalized features) and keeps the answer when its
//!    confidence reaches the threshold, otherwise asks the cloud tier (raw
//!    features);
//! 4. answers with the tier's heuristic whenever a model call fails;
//! 5. records the verdict and, on a fault, stops the machine at most once.
//!
//! Nothing that goes wrong for one reading escapes it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use fogpdm_core::clock::{Clock, TokioClock};
use fogpdm_core::heuristics;
use fogpdm_core::normalize::NormalizationParams;
use fogpdm_core::reading::FeatureReading;
use fogpdm_core::result::{DispatchOutcome, InferenceResult};
use fogpdm_core::routing::RoutingTable;
use fogpdm_core::types::{EdgeNodeId, MachineId};
use fogpdm_events::{event_types, EventBus, FogEvent};
use fogpdm_inference::messages::PredictRequest;
use fogpdm_inference::{InferenceClient, ModelSlot};

use crate::error::ActuationError;
use crate::fleet::EdgeFleet;
use crate::latch::ActuationLatch;
use crate::metrics::MetricsAggregator;
use crate::routing::RoutingHandle;
use crate::store::{LabeledSample, SampleStore};
use crate::transport::{ActuationCommand, Endpoint, FogMessage, Transport};

/// Default edge confidence at or above which the edge verdict is final.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// The sensor side of a machine. Told to stop producing once the machine's
/// latch flips.
pub trait SensorControl: Send + Sync {
    fn stop_sensor(&self, machine_id: MachineId);
}

/// Sensor control for setups where nothing produces readings on its own.
pub struct NoSensorControl;

impl SensorControl for NoSensorControl {
    fn stop_sensor(&self, _machine_id: MachineId) {}
}

pub struct Dispatcher {
    client: Arc<InferenceClient>,
    fleet: Arc<EdgeFleet>,
    routing: Arc<RoutingHandle>,
    latch: Arc<ActuationLatch>,
    metrics: Arc<MetricsAggregator>,
    transport: Arc<dyn Transport>,
    events: Arc<EventBus>,
    samples: Arc<SampleStore>,
    sensors: Arc<dyn SensorControl>,
    clock: Arc<dyn Clock>,
    normalization: NormalizationParams,
    confidence_threshold: f64,
}

impl Dispatcher {
    pub fn new(
        client: Arc<InferenceClient>,
        fleet: Arc<EdgeFleet>,
        routing: Arc<RoutingHandle>,
        latch: Arc<ActuationLatch>,
        metrics: Arc<MetricsAggregator>,
        transport: Arc<dyn Transport>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            client,
            fleet,
            routing,
            latch,
            metrics,
            transport,
            events,
            samples: Arc::new(SampleStore::new()),
            sensors: Arc::new(NoSensorControl),
            clock: Arc::new(TokioClock::start()),
            normalization: NormalizationParams::default(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Store that receives labeled readings answered by the cloud tier.
    pub fn with_sample_store(mut self, samples: Arc<SampleStore>) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_sensor_control(mut self, sensors: Arc<dyn SensorControl>) -> Self {
        self.sensors = sensors;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_normalization(mut self, normalization: NormalizationParams) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn samples(&self) -> &Arc<SampleStore> {
        &self.samples
    }

    /// Dispatch one reading through its current gateway.
    ///
    /// Returns `None` when the reading was dropped without inference.
    pub async fn dispatch(&self, reading: FeatureReading) -> Option<DispatchOutcome> {
        if !self.accept(&reading) {
            return None;
        }

        let routing = self.routing.snapshot();
        let Some(node) = routing.gateway_of(reading.machine_id) else {
            tracing::warn!(machine_id = reading.machine_id, "No gateway for sensor, reading dropped");
            self.metrics.record_rejected();
            return None;
        };
        self.route(&routing, node, reading).await
    }

    /// Dispatch one reading that edge node `node` already accepted.
    ///
    /// The node keeps the reading even if a migration has since moved the
    /// sensor away; only later readings follow the new route.
    pub async fn dispatch_via(
        &self,
        node: EdgeNodeId,
        reading: FeatureReading,
    ) -> Option<DispatchOutcome> {
        if !self.accept(&reading) {
            return None;
        }
        let routing = self.routing.snapshot();
        self.route(&routing, node, reading).await
    }

    fn accept(&self, reading: &FeatureReading) -> bool {
        if !reading.valid {
            tracing::debug!(machine_id = reading.machine_id, "Invalid reading dropped");
            self.metrics.record_rejected();
            return false;
        }
        if self.latch.is_stopped(reading.machine_id) {
            tracing::debug!(machine_id = reading.machine_id, "Reading for stopped machine dropped");
            return false;
        }
        true
    }

    async fn route(
        &self,
        routing: &RoutingTable,
        node: EdgeNodeId,
        reading: FeatureReading,
    ) -> Option<DispatchOutcome> {
        let Some(edge) = self.fleet.node(node) else {
            tracing::warn!(
                machine_id = reading.machine_id,
                edge_node = node,
                "Edge node not running, reading dropped",
            );
            self.metrics.record_rejected();
            return None;
        };
        let _in_flight = edge.begin();
        let machine_id = reading.machine_id;

        let edge_result = self.predict_edge(&edge.model, &reading).await;
        let (result, escalated_from) = if edge_result.confidence >= self.confidence_threshold {
            (edge_result, None)
        } else {
            tracing::debug!(
                machine_id,
                edge_node = node,
                confidence = edge_result.confidence,
                "Edge not confident, escalating to cloud",
            );
            let cloud_result = self.predict_cloud(&reading).await;
            self.collect_sample(&reading);
            (cloud_result, Some(edge_result.confidence))
        };

        self.metrics.record_prediction(
            result.tier,
            result.is_fault,
            reading.ground_truth_fault,
            result.latency,
            &result.method,
            machine_id,
        );

        let stop_issued = if result.is_fault {
            self.stop_machine(routing, node, machine_id, &result).await
        } else {
            false
        };

        tracing::debug!(
            machine_id,
            edge_node = node,
            tier = %result.tier,
            fault = result.is_fault,
            probability = result.probability,
            method = %result.method,
            fallback = result.is_fallback(),
            "Reading dispatched",
        );

        Some(DispatchOutcome {
            machine_id,
            edge_node: node,
            final_tier: result.tier,
            result,
            escalated_from,
            stop_issued,
        })
    }

    async fn predict_edge(
        &self,
        model: &ModelSlot,
        reading: &FeatureReading,
    ) -> InferenceResult {
        let started = Instant::now();
        let normalized = self.normalization.apply(&reading.features);
        let request = PredictRequest::new(reading, &normalized);

        match self.client.predict_edge(model, request).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    machine_id = reading.machine_id,
                    error = %e,
                    "Edge inference failed, using threshold fallback",
                );
                heuristics::edge_fallback(&reading.features, started.elapsed())
            }
        }
    }

    async fn predict_cloud(&self, reading: &FeatureReading) -> InferenceResult {
        let started = Instant::now();
        let request = PredictRequest::new(reading, &reading.features);

        match self.client.predict_cloud(request).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    machine_id = reading.machine_id,
                    error = %e,
                    "Cloud inference failed, using rule fallback",
                );
                heuristics::cloud_fallback(&reading.features, started.elapsed())
            }
        }
    }

    fn collect_sample(&self, reading: &FeatureReading) {
        if let Some(label) = reading.ground_truth_fault {
            self.samples.push(LabeledSample {
                machine_id: reading.machine_id,
                timestamp: reading.timestamp,
                features: reading.features,
                label,
            });
        }
    }

    /// Stop `machine_id` if this is the first confirmed fault for it.
    /// Returns whether this call flipped the latch.
    async fn stop_machine(
        &self,
        routing: &RoutingTable,
        node: EdgeNodeId,
        machine_id: MachineId,
        result: &InferenceResult,
    ) -> bool {
        match self.actuate(routing, machine_id).await {
            Ok(false) => false,
            Ok(true) => {
                self.on_stopped(node, machine_id, result);
                true
            }
            Err(ActuationError::ActuatorNotFound { .. }) => {
                tracing::warn!(machine_id, "No actuator registered, stop skipped");
                false
            }
            Err(e @ ActuationError::Delivery(_)) => {
                tracing::error!(machine_id, error = %e, "Stop command not delivered");
                self.on_stopped(node, machine_id, result);
                true
            }
        }
    }

    /// Resolve the actuator, flip the latch and send the stop command.
    ///
    /// `Ok(false)` means the machine was already stopped. A delivery failure
    /// happens after the latch flipped; the stop is not retried.
    async fn actuate(
        &self,
        routing: &RoutingTable,
        machine_id: MachineId,
    ) -> Result<bool, ActuationError> {
        let actuator = routing
            .actuator_for(machine_id)
            .filter(|a| routing.actuator_gateway_of(*a).is_some())
            .ok_or(ActuationError::ActuatorNotFound { machine_id })?;

        if !self.latch.try_stop(machine_id) {
            return Ok(false);
        }

        self.transport
            .deliver(
                Endpoint::Actuator(actuator),
                FogMessage::Actuate(ActuationCommand::stop(machine_id)),
            )
            .await?;
        Ok(true)
    }

    fn on_stopped(&self, node: EdgeNodeId, machine_id: MachineId, result: &InferenceResult) {
        self.metrics.record_stop(machine_id);
        self.sensors.stop_sensor(machine_id);

        tracing::info!(
            machine_id,
            edge_node = node,
            tier = %result.tier,
            probability = result.probability,
            method = %result.method,
            "Fault confirmed, machine stopped",
        );
        self.events.publish(
            FogEvent::new(event_types::MACHINE_STOPPED)
                .with_source("machine", u64::from(machine_id))
                .with_payload(serde_json::json!({
                    "edge_node": node,
                    "tier": result.tier,
                    "probability": result.probability,
                    "method": result.method,
                    "latency_ms": duration_ms(result.latency),
                }))
                .at(self.clock.now()),
        );
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
