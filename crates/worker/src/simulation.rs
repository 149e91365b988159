//! Wiring of a complete run from [`FogConfig`].
//!
//! A run owns every shared component (routing, fleet, metrics, sample
//! store, latch), starts the edge nodes, actuators, control loops and
//! sensor producers under one [`TaskTracker`], lets them work for the
//! configured duration, then cancels and drains everything before
//! reporting.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use fogpdm_core::clock::{Clock, TokioClock};
use fogpdm_core::config::FogConfig;
use fogpdm_core::error::CoreError;
use fogpdm_core::routing::{RoutingTable, ScalingEvent};
use fogpdm_core::types::ModelVersion;
use fogpdm_events::EventBus;
use fogpdm_inference::capability::{UnavailablePredictor, UnavailableTrainer};
use fogpdm_inference::http::{HttpPredictor, HttpTrainer};
use fogpdm_inference::{InferenceClient, ModelSlot, Predictor, Trainer};
use fogpdm_pipeline::transport::LinkDelays;
use fogpdm_pipeline::{
    ActuationLatch, ChannelTransport, Dispatcher, EdgeFleet, Endpoint, InFlightLoadProbe,
    LoadProbe, MetricsAggregator, MetricsSnapshot, RoutingHandle, SampleStore,
};

use crate::actuator;
use crate::background::model_sync::{ModelSyncController, SyncTrigger};
use crate::background::scaling::ScalingController;
use crate::edge_node::EdgeProvisioner;
use crate::error::SimulationError;
use crate::event_log::{self, EventCounts};
use crate::sensors::{ReadingSource, SensorProducer, SensorRegistry, SyntheticSource};

/// The external model capabilities a run talks to.
pub struct Capabilities {
    pub edge: Arc<dyn Predictor>,
    pub cloud: Arc<dyn Predictor>,
    pub trainer: Arc<dyn Trainer>,
}

impl Capabilities {
    /// HTTP adapters for every configured URL; unconfigured capabilities
    /// always fail, so their tier answers with its heuristic.
    pub fn from_config(config: &FogConfig) -> Self {
        let edge: Arc<dyn Predictor> = match &config.edge_predictor_url {
            Some(url) => Arc::new(HttpPredictor::new("edge", url.as_str())),
            None => {
                tracing::warn!("No edge predictor configured, edge tier uses its threshold fallback");
                Arc::new(UnavailablePredictor::new("edge"))
            }
        };
        let cloud: Arc<dyn Predictor> = match &config.cloud_predictor_url {
            Some(url) => Arc::new(HttpPredictor::new("cloud", url.as_str())),
            None => {
                tracing::warn!("No cloud predictor configured, cloud tier uses its rule fallback");
                Arc::new(UnavailablePredictor::new("cloud"))
            }
        };
        let trainer: Arc<dyn Trainer> = match &config.trainer_url {
            Some(url) => Arc::new(HttpTrainer::new(url.as_str())),
            None => {
                tracing::warn!("No trainer configured, models will not be retrained");
                Arc::new(UnavailableTrainer)
            }
        };
        Self {
            edge,
            cloud,
            trainer,
        }
    }
}

/// What a finished run reports.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub run_id: Uuid,
    pub metrics: MetricsSnapshot,
    pub scaling_events: Vec<ScalingEvent>,
    /// Published events per event type.
    pub events: EventCounts,
    pub edge_nodes: usize,
    pub model_version: ModelVersion,
}

pub struct Simulation {
    config: FogConfig,
    capabilities: Capabilities,
    source: Arc<dyn ReadingSource>,
    load_probe: Option<Arc<dyn LoadProbe>>,
    link_delays: LinkDelays,
}

impl Simulation {
    pub fn new(config: FogConfig) -> Self {
        let capabilities = Capabilities::from_config(&config);
        Self {
            config,
            capabilities,
            source: Arc::new(SyntheticSource::default()),
            load_probe: None,
            link_delays: LinkDelays::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_source(mut self, source: Arc<dyn ReadingSource>) -> Self {
        self.source = source;
        self
    }

    /// Replace the default in-flight load probe.
    pub fn with_load_probe(mut self, probe: Arc<dyn LoadProbe>) -> Self {
        self.load_probe = Some(probe);
        self
    }

    pub fn with_link_delays(mut self, delays: LinkDelays) -> Self {
        self.link_delays = delays;
        self
    }

    /// Run for the configured duration.
    pub async fn run(self) -> Result<SimulationReport, SimulationError> {
        self.run_until(CancellationToken::new()).await
    }

    /// Run for the configured duration or until `shutdown` fires.
    pub async fn run_until(
        self,
        shutdown: CancellationToken,
    ) -> Result<SimulationReport, SimulationError> {
        let Self {
            config,
            capabilities,
            source,
            load_probe,
            link_delays,
        } = self;

        let run_id = Uuid::new_v4();
        let cancel = shutdown.child_token();
        let tasks = TaskTracker::new();
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::start());

        let transport = Arc::new(ChannelTransport::new(link_delays));
        let fleet = Arc::new(EdgeFleet::new(config.edge_node_capacity));
        let routing = Arc::new(RoutingHandle::new(initial_topology(&config)?));
        let metrics = Arc::new(MetricsAggregator::new());
        let events = Arc::new(EventBus::default());
        let event_log_stop = CancellationToken::new();
        let event_log_task = tokio::spawn(event_log::run(events.subscribe(), event_log_stop.clone()));
        let samples = Arc::new(SampleStore::new());
        let sensors = Arc::new(SensorRegistry::new(cancel.clone()));
        let cloud_model = Arc::new(ModelSlot::default());

        let client = InferenceClient::new(
            capabilities.edge,
            capabilities.cloud,
            config.inference_timeout,
        )
        .with_cloud_model(Arc::clone(&cloud_model));
        let dispatcher = Dispatcher::new(
            Arc::new(client),
            Arc::clone(&fleet),
            Arc::clone(&routing),
            Arc::new(ActuationLatch::new()),
            Arc::clone(&metrics),
            transport.clone(),
            Arc::clone(&events),
        )
        .with_confidence_threshold(config.confidence_threshold)
        .with_sample_store(Arc::clone(&samples))
        .with_sensor_control(sensors.clone())
        .with_clock(Arc::clone(&clock));

        // --- Edge nodes and actuators ---
        let provisioner = Arc::new(EdgeProvisioner::new(
            Arc::clone(&transport),
            Arc::clone(&fleet),
            Arc::clone(&routing),
            Arc::new(dispatcher),
            tasks.clone(),
            cancel.clone(),
        ));
        for node in routing.snapshot().node_ids() {
            provisioner.start_node(node)?;
        }
        for machine in 1..=config.num_machines {
            let inbox = transport.register(Endpoint::Actuator(machine));
            tasks.spawn(actuator::run(machine, inbox, cancel.clone()));
        }

        // --- Control loops ---
        let probe: Arc<dyn LoadProbe> = match load_probe {
            Some(probe) => probe,
            None => Arc::new(InFlightLoadProbe::new(Arc::clone(&fleet))),
        };
        let scaling = Arc::new(
            ScalingController::new(
                Arc::clone(&routing),
                probe,
                provisioner,
                Arc::clone(&metrics),
                Arc::clone(&events),
            )
            .with_load_threshold(config.load_threshold)
            .with_interval(config.monitor_interval)
            .with_clock(Arc::clone(&clock)),
        );
        tasks.spawn({
            let scaling = Arc::clone(&scaling);
            let cancel = cancel.clone();
            async move { scaling.run(cancel).await }
        });

        let model_sync = Arc::new(
            ModelSyncController::new(
                samples,
                capabilities.trainer,
                Arc::clone(&fleet),
                cloud_model,
                transport.clone(),
                Arc::clone(&events),
            )
            .with_trigger(SyncTrigger::from_config(&config))
            .with_clock(Arc::clone(&clock)),
        );
        tasks.spawn({
            let model_sync = Arc::clone(&model_sync);
            let cancel = cancel.clone();
            async move { model_sync.run(cancel).await }
        });

        // --- Sensors ---
        for machine in 1..=config.num_machines {
            let producer = SensorProducer::new(
                machine,
                Arc::clone(&source),
                Arc::clone(&routing),
                transport.clone(),
                Arc::clone(&clock),
                config.sensor_interval,
            );
            tasks.spawn(producer.run(sensors.token_for(machine)));
        }

        tracing::info!(
            %run_id,
            machines = config.num_machines,
            edge_nodes = config.initial_edge_count,
            duration_secs = config.simulation_duration.as_secs_f64(),
            "Simulation started",
        );

        tokio::select! {
            _ = tokio::time::sleep(config.simulation_duration) => {}
            _ = shutdown.cancelled() => {
                tracing::info!(%run_id, "Shutdown requested, ending simulation early");
            }
        }

        cancel.cancel();
        tasks.close();
        tasks.wait().await;

        event_log_stop.cancel();
        let event_counts = event_log_task.await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Event log task failed");
            EventCounts::new()
        });

        let report = SimulationReport {
            run_id,
            metrics: metrics.snapshot(),
            scaling_events: scaling.history(),
            events: event_counts,
            edge_nodes: routing.snapshot().node_count(),
            model_version: model_sync.current_version(),
        };
        tracing::info!(
            %run_id,
            total_predictions = report.metrics.total_predictions,
            edge_handled = report.metrics.edge_handled,
            cloud_handled = report.metrics.cloud_handled,
            stopped_machines = report.metrics.stopped_machines.len(),
            scaling_events = report.scaling_events.len(),
            events = report.events.values().sum::<u64>(),
            edge_nodes = report.edge_nodes,
            "Simulation finished",
        );
        Ok(report)
    }
}

/// Edge nodes `1..=initial_edge_count`; machine `m` (sensor `m`, actuator
/// `m`) is assigned round-robin.
fn initial_topology(config: &FogConfig) -> Result<RoutingTable, CoreError> {
    let edges = config.initial_edge_count.max(1);
    let mut table = RoutingTable::new();
    for node in 1..=edges {
        table.add_edge_node(node)?;
    }
    for machine in 1..=config.num_machines {
        table.attach_machine((machine - 1) % edges + 1, machine, machine)?;
    }
    Ok(table)
}
