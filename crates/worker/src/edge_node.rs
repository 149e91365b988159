//! Edge-node inbox loops and the provisioner that starts them.
//!
//! An edge node owns one transport inbox. Readings are dispatched through
//! the node that received them, each on its own task, so a slow inference
//! never holds up the inbox. Model broadcasts are installed in arrival
//! order.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use fogpdm_core::types::EdgeNodeId;
use fogpdm_inference::messages::ModelBroadcast;
use fogpdm_inference::VersionedModel;
use fogpdm_pipeline::{ChannelTransport, Dispatcher, EdgeFleet, Endpoint, FogMessage, RoutingHandle};

use crate::background::scaling::Provisioner;
use crate::error::ProvisionError;

pub struct EdgeNodeLoop {
    id: EdgeNodeId,
    inbox: mpsc::Receiver<FogMessage>,
    dispatcher: Arc<Dispatcher>,
    fleet: Arc<EdgeFleet>,
    routing: Arc<RoutingHandle>,
    tasks: TaskTracker,
}

impl EdgeNodeLoop {
    /// Drain the inbox until `cancel` fires or every sender is gone.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(edge_node = self.id, "Edge node started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = self.inbox.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
            }
        }

        tracing::info!(edge_node = self.id, "Edge node stopped");
    }

    fn handle(&self, message: FogMessage) {
        match message {
            FogMessage::Reading(reading) => {
                let dispatcher = Arc::clone(&self.dispatcher);
                let node = self.id;
                self.tasks.spawn(async move {
                    dispatcher.dispatch_via(node, reading).await;
                });
            }
            FogMessage::ModelUpdate(broadcast) => self.install(&broadcast),
            FogMessage::Actuate(command) => {
                tracing::warn!(
                    edge_node = self.id,
                    machine_id = command.machine_id,
                    "Actuation command addressed to an edge node, ignored",
                );
            }
        }
    }

    fn install(&self, broadcast: &ModelBroadcast) {
        let model = match VersionedModel::from_broadcast(broadcast) {
            Ok(model) => model,
            Err(e) => {
                tracing::warn!(
                    edge_node = self.id,
                    version = broadcast.version,
                    error = %e,
                    "Undecodable model broadcast, keeping current model",
                );
                return;
            }
        };

        let version = model.version;
        if !self.fleet.install_model(self.id, model) {
            tracing::debug!(edge_node = self.id, version, "Stale model broadcast ignored");
            return;
        }
        if let Err(e) = self
            .routing
            .update(|table| table.set_model_version(self.id, version))
        {
            tracing::debug!(edge_node = self.id, error = %e, "Model version not recorded in routing");
        }
        tracing::info!(edge_node = self.id, version, "Edge model installed");
    }
}

// ---------------------------------------------------------------------------
// EdgeProvisioner
// ---------------------------------------------------------------------------

/// Starts in-process edge nodes: fleet entry, transport inbox and inbox
/// loop, all under the run's task tracker and cancellation token.
pub struct EdgeProvisioner {
    transport: Arc<ChannelTransport>,
    fleet: Arc<EdgeFleet>,
    routing: Arc<RoutingHandle>,
    dispatcher: Arc<Dispatcher>,
    tasks: TaskTracker,
    cancel: CancellationToken,
    next_id: AtomicU32,
}

impl EdgeProvisioner {
    pub fn new(
        transport: Arc<ChannelTransport>,
        fleet: Arc<EdgeFleet>,
        routing: Arc<RoutingHandle>,
        dispatcher: Arc<Dispatcher>,
        tasks: TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            fleet,
            routing,
            dispatcher,
            tasks,
            cancel,
            next_id: AtomicU32::new(1),
        }
    }

    /// Start node `id`. Later [`Provisioner::provision`] calls pick ids
    /// above every node started so far.
    pub fn start_node(&self, id: EdgeNodeId) -> Result<(), ProvisionError> {
        if self.fleet.node(id).is_some() {
            return Err(ProvisionError::AlreadyRunning(id));
        }
        self.next_id.fetch_max(id + 1, Ordering::SeqCst);

        self.fleet.add_node(id);
        let inbox = self.transport.register(Endpoint::Edge(id));
        let node = EdgeNodeLoop {
            id,
            inbox,
            dispatcher: Arc::clone(&self.dispatcher),
            fleet: Arc::clone(&self.fleet),
            routing: Arc::clone(&self.routing),
            tasks: self.tasks.clone(),
        };
        self.tasks.spawn(node.run(self.cancel.clone()));
        Ok(())
    }
}

#[async_trait]
impl Provisioner for EdgeProvisioner {
    async fn provision(&self) -> Result<EdgeNodeId, ProvisionError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.start_node(id)?;
        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use fogpdm_core::reading::{FeatureReading, ScalarFeatures};
    use fogpdm_core::routing::RoutingTable;
    use fogpdm_events::EventBus;
    use fogpdm_inference::capability::UnavailablePredictor;
    use fogpdm_inference::InferenceClient;
    use fogpdm_pipeline::transport::LinkDelays;
    use fogpdm_pipeline::{ActuationLatch, MetricsAggregator, Transport};

    use super::*;

    struct Setup {
        provisioner: EdgeProvisioner,
        transport: Arc<ChannelTransport>,
        fleet: Arc<EdgeFleet>,
        routing: Arc<RoutingHandle>,
        metrics: Arc<MetricsAggregator>,
        tasks: TaskTracker,
        cancel: CancellationToken,
    }

    fn setup() -> Setup {
        let mut table = RoutingTable::new();
        table.add_edge_node(1).unwrap();
        table.attach_machine(1, 1, 1).unwrap();
        let routing = Arc::new(RoutingHandle::new(table));

        let transport = Arc::new(ChannelTransport::new(LinkDelays::none()));
        let fleet = Arc::new(EdgeFleet::new(4));
        let metrics = Arc::new(MetricsAggregator::new());
        let client = InferenceClient::new(
            Arc::new(UnavailablePredictor::new("edge")),
            Arc::new(UnavailablePredictor::new("cloud")),
            Duration::from_secs(1),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(client),
            Arc::clone(&fleet),
            Arc::clone(&routing),
            Arc::new(ActuationLatch::new()),
            Arc::clone(&metrics),
            transport.clone(),
            Arc::new(EventBus::default()),
        ));
        let tasks = TaskTracker::new();
        let cancel = CancellationToken::new();
        let provisioner = EdgeProvisioner::new(
            Arc::clone(&transport),
            Arc::clone(&fleet),
            Arc::clone(&routing),
            dispatcher,
            tasks.clone(),
            cancel.clone(),
        );

        Setup {
            provisioner,
            transport,
            fleet,
            routing,
            metrics,
            tasks,
            cancel,
        }
    }

    async fn shutdown(s: &Setup) {
        s.cancel.cancel();
        s.tasks.close();
        s.tasks.wait().await;
    }

    fn model(version: u64, blob: &[u8]) -> VersionedModel {
        VersionedModel {
            version,
            blob: blob.to_vec(),
            updated_at: 1.0,
        }
    }

    #[tokio::test]
    async fn provision_picks_ids_above_started_nodes() {
        let s = setup();
        s.provisioner.start_node(1).unwrap();
        s.provisioner.start_node(3).unwrap();

        assert_eq!(s.provisioner.provision().await.unwrap(), 4);
        assert_eq!(s.provisioner.provision().await.unwrap(), 5);
        assert_eq!(s.fleet.node_ids(), vec![1, 3, 4, 5]);
        assert_matches!(
            s.provisioner.start_node(3),
            Err(ProvisionError::AlreadyRunning(3))
        );
        shutdown(&s).await;
    }

    #[tokio::test]
    async fn readings_are_dispatched_through_the_receiving_node() {
        let s = setup();
        s.provisioner.start_node(1).unwrap();

        let reading = FeatureReading::new(
            1,
            0.5,
            ScalarFeatures {
                temperature: 50.0,
                voltage: 220.0,
                vibration_x: 0.8,
                vibration_y: 1.0,
                vibration_z: 1.0,
                current: 14.0,
            },
        );
        s.transport
            .deliver(Endpoint::Edge(1), FogMessage::Reading(reading))
            .await
            .unwrap();

        // Closing the inbox lets the loop finish after draining.
        s.transport.unregister(Endpoint::Edge(1));
        s.tasks.close();
        s.tasks.wait().await;

        assert_eq!(s.metrics.total_predictions(), 1);
        assert_eq!(s.fleet.node(1).unwrap().handled(), 1);
    }

    #[tokio::test]
    async fn model_broadcast_is_installed_once_and_in_order() {
        let s = setup();
        s.provisioner.start_node(1).unwrap();

        for m in [model(2, b"new"), model(1, b"old")] {
            s.transport
                .deliver(Endpoint::Edge(1), FogMessage::ModelUpdate(m.to_broadcast()))
                .await
                .unwrap();
        }
        s.transport.unregister(Endpoint::Edge(1));
        s.tasks.close();
        s.tasks.wait().await;

        let installed = s.fleet.node(1).unwrap().model.load();
        assert_eq!(installed.version, 2);
        assert_eq!(installed.blob, b"new".to_vec());
        assert_eq!(s.routing.snapshot().node(1).unwrap().model_version, 2);
    }

    #[tokio::test]
    async fn undecodable_broadcast_keeps_current_model() {
        let s = setup();
        s.provisioner.start_node(1).unwrap();

        let mut broadcast = model(3, b"x").to_broadcast();
        broadcast.model_base64 = "@@not base64@@".into();
        s.transport
            .deliver(Endpoint::Edge(1), FogMessage::ModelUpdate(broadcast))
            .await
            .unwrap();
        s.transport.unregister(Endpoint::Edge(1));
        s.tasks.close();
        s.tasks.wait().await;

        assert_eq!(s.fleet.node(1).unwrap().model.version(), 0);
    }

    #[tokio::test]
    async fn provisioned_node_starts_with_latest_model() {
        let s = setup();
        s.provisioner.start_node(1).unwrap();
        s.fleet.install_model(1, model(4, b"m4"));

        let id = s.provisioner.provision().await.unwrap();
        assert_eq!(s.fleet.node(id).unwrap().model.version(), 4);
        shutdown(&s).await;
    }
}
