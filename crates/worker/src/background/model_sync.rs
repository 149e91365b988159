//! Retraining and model distribution.
//!
//! When enough new labeled samples have reached the cloud tier (or on every
//! interval, depending on [`SyncTrigger`]) the controller trains a fresh
//! edge and cloud model, stamps both with the next version, installs the
//! cloud model and broadcasts the edge model to every edge node over the
//! same transport readings use.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use fogpdm_core::clock::{Clock, TokioClock};
use fogpdm_core::config::{FogConfig, ModelSyncMode};
use fogpdm_core::types::ModelVersion;
use fogpdm_events::{event_types, EventBus, FogEvent};
use fogpdm_inference::messages::{TrainRequest, TrainingRow};
use fogpdm_inference::{InferenceError, ModelKind, ModelSlot, Trainer, VersionedModel};
use fogpdm_pipeline::store::LabeledSample;
use fogpdm_pipeline::{EdgeFleet, Endpoint, FogMessage, SampleStore, Transport};

/// When a retrain-and-broadcast cycle runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncTrigger {
    /// Check every `poll` and retrain once `count` new samples arrived.
    Samples { count: usize, poll: Duration },
    /// Retrain every `period` if at least one new sample arrived.
    Interval { period: Duration },
}

impl SyncTrigger {
    pub fn from_config(config: &FogConfig) -> Self {
        match config.model_sync_mode {
            ModelSyncMode::Samples => Self::Samples {
                count: config.retrain_sample_count,
                poll: config.sensor_interval,
            },
            ModelSyncMode::Interval => Self::Interval {
                period: config.model_update_interval,
            },
        }
    }

    fn period(&self) -> Duration {
        match self {
            Self::Samples { poll, .. } => *poll,
            Self::Interval { period } => *period,
        }
    }

    fn min_new_samples(&self) -> usize {
        match self {
            Self::Samples { count, .. } => *count,
            Self::Interval { .. } => 1,
        }
    }
}

pub struct ModelSyncController {
    samples: Arc<SampleStore>,
    trainer: Arc<dyn Trainer>,
    fleet: Arc<EdgeFleet>,
    cloud_model: Arc<ModelSlot>,
    transport: Arc<dyn Transport>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    trigger: SyncTrigger,
    version: AtomicU64,
}

impl ModelSyncController {
    pub fn new(
        samples: Arc<SampleStore>,
        trainer: Arc<dyn Trainer>,
        fleet: Arc<EdgeFleet>,
        cloud_model: Arc<ModelSlot>,
        transport: Arc<dyn Transport>,
        events: Arc<EventBus>,
    ) -> Self {
        let version = fleet.latest_version().max(cloud_model.version());
        Self {
            samples,
            trainer,
            fleet,
            cloud_model,
            transport,
            events,
            clock: Arc::new(TokioClock::start()),
            trigger: SyncTrigger::Samples {
                count: 50,
                poll: Duration::from_secs(1),
            },
            version: AtomicU64::new(version),
        }
    }

    pub fn with_trigger(mut self, trigger: SyncTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Last version published, 0 before the first successful cycle.
    pub fn current_version(&self) -> ModelVersion {
        self.version.load(Ordering::SeqCst)
    }

    /// Run cycles until `cancel` fires. The first check happens one period
    /// after start.
    pub async fn run(&self, cancel: CancellationToken) {
        let period = self.trigger.period();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        tracing::info!(trigger = ?self.trigger, "Model sync controller started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Model sync controller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One cycle. Returns the version published, if any.
    ///
    /// Both models must train successfully for anything to change; on a
    /// failure the previous models stay authoritative.
    pub async fn tick(&self) -> Option<ModelVersion> {
        let batch = self.samples.take_if_ready(self.trigger.min_new_samples())?;

        let (edge_blob, cloud_blob) = match self.train_both(&batch).await {
            Ok(blobs) => blobs,
            Err(e) => {
                tracing::warn!(
                    samples = batch.len(),
                    error = %e,
                    "Training failed, keeping current models",
                );
                self.events.publish(
                    FogEvent::new(event_types::MODEL_TRAINING_FAILED)
                        .with_payload(serde_json::json!({
                            "samples": batch.len(),
                            "error": e.to_string(),
                        }))
                        .at(self.clock.now()),
                );
                return None;
            }
        };

        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.clock.now();

        self.cloud_model.replace(VersionedModel {
            version,
            blob: cloud_blob,
            updated_at: now,
        });
        let edge_model = VersionedModel {
            version,
            blob: edge_blob,
            updated_at: now,
        };
        self.fleet.record_latest(&edge_model);
        let delivered = self.broadcast(&edge_model).await;

        tracing::info!(
            version,
            samples = batch.len(),
            edge_nodes = delivered,
            "Models retrained and broadcast",
        );
        self.events.publish(
            FogEvent::new(event_types::MODEL_UPDATED)
                .with_source("model", version)
                .with_payload(serde_json::json!({
                    "version": version,
                    "samples": batch.len(),
                    "edge_nodes": delivered,
                }))
                .at(now),
        );

        Some(version)
    }

    async fn train_both(
        &self,
        batch: &[LabeledSample],
    ) -> Result<(Vec<u8>, Vec<u8>), InferenceError> {
        let rows: Vec<TrainingRow> = batch
            .iter()
            .map(|s| TrainingRow::from_reading(&s.features, s.label))
            .collect();
        let edge = TrainRequest {
            kind: ModelKind::Edge,
            rows: rows.clone(),
        };
        let cloud = TrainRequest {
            kind: ModelKind::Cloud,
            rows,
        };

        let (edge, cloud) = tokio::join!(self.trainer.train(&edge), self.trainer.train(&cloud));
        Ok((edge?, cloud?))
    }

    /// Send `model` to every running edge node. Returns how many took
    /// delivery.
    async fn broadcast(&self, model: &VersionedModel) -> usize {
        let message = model.to_broadcast();
        let deliveries = self.fleet.node_ids().into_iter().map(|node| {
            let message = FogMessage::ModelUpdate(message.clone());
            async move {
                let result = self.transport.deliver(Endpoint::Edge(node), message).await;
                if let Err(e) = &result {
                    tracing::warn!(edge_node = node, error = %e, "Model broadcast not delivered");
                }
                result.is_ok()
            }
        });

        futures::future::join_all(deliveries)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use fogpdm_core::reading::ScalarFeatures;
    use fogpdm_pipeline::transport::{ChannelTransport, LinkDelays};

    use super::*;

    /// Returns `[kind byte, row count]` or fails for one kind.
    #[derive(Default)]
    struct ScriptedTrainer {
        fail_kind: Option<ModelKind>,
        seen: Mutex<Vec<(ModelKind, usize)>>,
    }

    #[async_trait]
    impl Trainer for ScriptedTrainer {
        fn name(&self) -> &str {
            "scripted-trainer"
        }

        async fn train(&self, request: &TrainRequest) -> Result<Vec<u8>, InferenceError> {
            self.seen.lock().unwrap().push((request.kind, request.rows.len()));
            if self.fail_kind == Some(request.kind) {
                return Err(InferenceError::TrainingFailed("diverged".into()));
            }
            let tag = match request.kind {
                ModelKind::Edge => b'e',
                ModelKind::Cloud => b'c',
            };
            Ok(vec![tag, request.rows.len() as u8])
        }
    }

    fn sample(label: bool) -> LabeledSample {
        LabeledSample {
            machine_id: 1,
            timestamp: 0.0,
            features: ScalarFeatures {
                temperature: 70.0,
                voltage: 240.0,
                vibration_x: 2.0,
                vibration_y: 2.0,
                vibration_z: 2.0,
                current: 19.0,
            },
            label,
        }
    }

    struct Setup {
        controller: ModelSyncController,
        samples: Arc<SampleStore>,
        fleet: Arc<EdgeFleet>,
        cloud_model: Arc<ModelSlot>,
        trainer: Arc<ScriptedTrainer>,
        inboxes: Vec<tokio::sync::mpsc::Receiver<FogMessage>>,
        events: Arc<EventBus>,
    }

    fn setup(trainer: ScriptedTrainer, trigger: SyncTrigger) -> Setup {
        let samples = Arc::new(SampleStore::new());
        let fleet = Arc::new(EdgeFleet::new(4));
        let transport = Arc::new(ChannelTransport::new(LinkDelays::none()));
        let inboxes = [1, 2]
            .into_iter()
            .map(|id| {
                fleet.add_node(id);
                transport.register(Endpoint::Edge(id))
            })
            .collect();
        let cloud_model = Arc::new(ModelSlot::default());
        let trainer = Arc::new(trainer);
        let events = Arc::new(EventBus::default());

        let controller = ModelSyncController::new(
            Arc::clone(&samples),
            trainer.clone(),
            Arc::clone(&fleet),
            Arc::clone(&cloud_model),
            transport,
            Arc::clone(&events),
        )
        .with_trigger(trigger);

        Setup {
            controller,
            samples,
            fleet,
            cloud_model,
            trainer,
            inboxes,
            events,
        }
    }

    fn by_count(count: usize) -> SyncTrigger {
        SyncTrigger::Samples {
            count,
            poll: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn waits_for_enough_new_samples() {
        let s = setup(ScriptedTrainer::default(), by_count(3));
        s.samples.push(sample(true));
        s.samples.push(sample(false));

        assert_eq!(s.controller.tick().await, None);
        assert!(s.trainer.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn publishes_cloud_model_and_broadcasts_edge_model() {
        let mut s = setup(ScriptedTrainer::default(), by_count(2));
        let mut events = s.events.subscribe();
        s.samples.push(sample(true));
        s.samples.push(sample(false));

        assert_eq!(s.controller.tick().await, Some(1));

        let cloud = s.cloud_model.load();
        assert_eq!((cloud.version, cloud.blob.clone()), (1, vec![b'c', 2]));
        assert_eq!(s.fleet.latest_version(), 1);

        for inbox in &mut s.inboxes {
            assert_matches!(
                inbox.try_recv(),
                Ok(FogMessage::ModelUpdate(msg)) if msg.version == 1
                    && VersionedModel::from_broadcast(&msg).unwrap().blob == vec![b'e', 2]
            );
        }

        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type, event_types::MODEL_UPDATED);
        assert_eq!(event.payload["edge_nodes"], 2);
    }

    #[tokio::test]
    async fn versions_increase_per_cycle() {
        let s = setup(ScriptedTrainer::default(), by_count(1));
        s.samples.push(sample(true));
        assert_eq!(s.controller.tick().await, Some(1));
        s.samples.push(sample(false));
        assert_eq!(s.controller.tick().await, Some(2));
        assert_eq!(s.controller.current_version(), 2);

        // Retrains on the whole accumulated set.
        let seen = s.trainer.seen.lock().unwrap().clone();
        assert!(seen.contains(&(ModelKind::Edge, 2)));
    }

    #[tokio::test]
    async fn failed_training_keeps_previous_models() {
        let mut s = setup(
            ScriptedTrainer {
                fail_kind: Some(ModelKind::Cloud),
                ..Default::default()
            },
            by_count(1),
        );
        let mut events = s.events.subscribe();
        s.samples.push(sample(true));

        assert_eq!(s.controller.tick().await, None);
        assert_eq!(s.cloud_model.version(), 0);
        assert_eq!(s.fleet.latest_version(), 0);
        assert_eq!(s.controller.current_version(), 0);
        assert!(s.inboxes[0].try_recv().is_err());

        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type, event_types::MODEL_TRAINING_FAILED);
    }

    #[tokio::test]
    async fn interval_mode_needs_one_new_sample() {
        let s = setup(
            ScriptedTrainer::default(),
            SyncTrigger::Interval {
                period: Duration::from_secs(30),
            },
        );
        assert_eq!(s.controller.tick().await, None);
        s.samples.push(sample(true));
        assert_eq!(s.controller.tick().await, Some(1));
    }

    #[test]
    fn trigger_follows_config_mode() {
        let mut config = FogConfig::default();
        assert_eq!(
            SyncTrigger::from_config(&config),
            SyncTrigger::Samples {
                count: 50,
                poll: Duration::from_secs(1)
            }
        );
        config.model_sync_mode = ModelSyncMode::Interval;
        assert_eq!(
            SyncTrigger::from_config(&config),
            SyncTrigger::Interval {
                period: Duration::from_secs(30)
            }
        );
    }
}
