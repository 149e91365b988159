//! Horizontal scale-out of overloaded edge nodes.
//!
//! Every `monitor_interval` the controller samples each edge node's load.
//! A node strictly above the load threshold gets a freshly provisioned
//! sibling, and the first half of its sensors (with their actuators) move
//! to it in one routing-table swap. Readings already accepted by the old
//! node finish there; only later readings follow the new route.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use fogpdm_core::clock::{Clock, TokioClock};
use fogpdm_core::routing::{ScalingEvent, ScalingTrigger};
use fogpdm_core::types::EdgeNodeId;
use fogpdm_events::{event_types, EventBus, FogEvent};
use fogpdm_pipeline::{LoadProbe, MetricsAggregator, RoutingHandle};

use crate::error::ProvisionError;

/// Network usage charged per scale-out.
pub const SCALING_NETWORK_COST: f64 = 100.0;

const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_LOAD_THRESHOLD: f64 = 0.8;

/// Brings up edge nodes with the same capability profile as the existing
/// ones.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Start a new, empty edge node and return its id. The node must be
    /// able to receive readings before this returns.
    async fn provision(&self) -> Result<EdgeNodeId, ProvisionError>;
}

pub struct ScalingController {
    routing: Arc<RoutingHandle>,
    probe: Arc<dyn LoadProbe>,
    provisioner: Arc<dyn Provisioner>,
    metrics: Arc<MetricsAggregator>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    load_threshold: f64,
    interval: Duration,
    history: Mutex<Vec<ScalingEvent>>,
}

impl ScalingController {
    pub fn new(
        routing: Arc<RoutingHandle>,
        probe: Arc<dyn LoadProbe>,
        provisioner: Arc<dyn Provisioner>,
        metrics: Arc<MetricsAggregator>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            routing,
            probe,
            provisioner,
            metrics,
            events,
            clock: Arc::new(TokioClock::start()),
            load_threshold: DEFAULT_LOAD_THRESHOLD,
            interval: DEFAULT_MONITOR_INTERVAL,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Utilization strictly above `threshold` triggers a scale-out.
    pub fn with_load_threshold(mut self, threshold: f64) -> Self {
        self.load_threshold = threshold;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Every scale-out so far, oldest first.
    pub fn history(&self) -> Vec<ScalingEvent> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sample every node once every `interval` until `cancel` fires. The
    /// first sample is taken one interval after start.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            load_threshold = self.load_threshold,
            "Scaling controller started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Scaling controller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                    if tracing::enabled!(tracing::Level::DEBUG) {
                        match serde_json::to_string(&self.metrics.snapshot()) {
                            Ok(json) => tracing::debug!(metrics = %json, "Metrics after scaling tick"),
                            Err(e) => tracing::debug!(error = %e, "Metrics snapshot not serialisable"),
                        }
                    }
                }
            }
        }
    }

    /// One monitoring pass. Returns the scale-outs it performed.
    ///
    /// Each overloaded node is handled on its own; a failure for one node
    /// is logged and does not stop the others.
    pub async fn tick(&self) -> Vec<ScalingEvent> {
        let timestamp = self.clock.now();
        let nodes = self.routing.snapshot().node_ids();

        let samples: Vec<(EdgeNodeId, f64)> = nodes
            .into_iter()
            .map(|node| (node, self.probe.sample(node)))
            .collect();

        if let Err(e) = self.routing.update(|table| {
            for (node, utilization) in &samples {
                table.set_utilization(*node, *utilization)?;
            }
            Ok(())
        }) {
            tracing::warn!(error = %e, "Could not record edge utilization");
        }

        let mut performed = Vec::new();
        for (edge_node, utilization) in samples {
            if utilization <= self.load_threshold {
                continue;
            }
            let trigger = ScalingTrigger {
                edge_node,
                utilization,
                timestamp,
            };
            match self.scale_out(trigger).await {
                Ok(event) => performed.push(event),
                Err(e) => {
                    tracing::error!(edge_node, utilization, error = %e, "Scale-out failed");
                }
            }
        }
        performed
    }

    async fn scale_out(&self, trigger: ScalingTrigger) -> Result<ScalingEvent, ProvisionError> {
        let source = trigger.edge_node;
        let dest = self.provisioner.provision().await?;

        let plan = self.routing.update(|table| {
            table.add_edge_node(dest)?;
            let plan = table.plan_migration(source, dest)?;
            table.apply_migration(&plan)?;
            Ok(plan)
        })?;

        self.metrics.add_network_usage(SCALING_NETWORK_COST);
        let event = ScalingEvent { trigger, plan };
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());

        tracing::info!(
            source_node = source,
            new_node = dest,
            utilization = event.trigger.utilization,
            moved_sensors = event.plan.moved_sensor_ids.len(),
            "Edge node overloaded, scaled out",
        );
        self.events.publish(
            FogEvent::new(event_types::EDGE_SCALED)
                .with_source("edge_node", u64::from(source))
                .with_payload(serde_json::to_value(&event).unwrap_or_default())
                .at(event.trigger.timestamp),
        );

        Ok(event)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
