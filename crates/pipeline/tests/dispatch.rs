//! End-to-end dispatch behaviour against scripted model tiers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use fogpdm_core::reading::{FeatureReading, ScalarFeatures};
use fogpdm_core::result::{Tier, METHOD_CLOUD_FALLBACK, METHOD_EDGE_FALLBACK};
use fogpdm_core::routing::RoutingTable;
use fogpdm_core::types::MachineId;
use fogpdm_events::{event_types, EventBus};
use fogpdm_inference::capability::{Predictor, UnavailablePredictor};
use fogpdm_inference::messages::{PredictRequest, PredictResponse};
use fogpdm_inference::model::VersionedModel;
use fogpdm_inference::{InferenceClient, InferenceError};
use fogpdm_pipeline::dispatcher::SensorControl;
use fogpdm_pipeline::transport::{ChannelTransport, Endpoint, FogMessage, LinkDelays};
use fogpdm_pipeline::{ActuationLatch, Dispatcher, EdgeFleet, MetricsAggregator, RoutingHandle};


// ---------------------------------------------------------------------------
// Doubles
// ---------------------------------------------------------------------------

type Script = dyn Fn(&VersionedModel, &PredictRequest) -> Result<f64, InferenceError> + Send + Sync;

/// Predictor answering from a closure and counting its calls.
struct Scripted {
    calls: AtomicUsize,
    script: Box<Script>,
}

impl Scripted {
    fn new(
        script: impl Fn(&VersionedModel, &PredictRequest) -> Result<f64, InferenceError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            script: Box::new(script),
        })
    }

    fn fixed(prob: f64) -> Arc<Self> {
        Self::new(move |_, _| Ok(prob))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Predictor for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn predict(
        &self,
        model: &VersionedModel,
        request: &PredictRequest,
    ) -> Result<PredictResponse, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prob = (self.script)(model, request)?;
        Ok(PredictResponse {
            fault: i64::from(prob > 0.5),
            prob,
            latency_ms: 3.0,
            method: "scripted_model".into(),
        })
    }
}

#[derive(Default)]
struct RecordingSensors {
    stopped: Mutex<Vec<MachineId>>,
}

impl SensorControl for RecordingSensors {
    fn stop_sensor(&self, machine_id: MachineId) {
        self.stopped.lock().unwrap().push(machine_id);
    }
}

struct Harness {
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<MetricsAggregator>,
    routing: Arc<RoutingHandle>,
    fleet: Arc<EdgeFleet>,
    sensors: Arc<RecordingSensors>,
    events: Arc<EventBus>,
    actuators: Vec<mpsc::Receiver<FogMessage>>,
}

fn harness(edge: Arc<dyn Predictor>, cloud: Arc<dyn Predictor>, machines: u32) -> Harness {
    harness_with_threshold(edge, cloud, machines, 0.7)
}

/// One edge node carrying machines `1..=machines`, actuator inboxes
/// registered for each.
fn harness_with_threshold(
    edge: Arc<dyn Predictor>,
    cloud: Arc<dyn Predictor>,
    machines: u32,
    threshold: f64,
) -> Harness {
    let mut table = RoutingTable::new();
    table.add_edge_node(1).unwrap();
    for m in 1..=machines {
        table.attach_machine(1, m, m).unwrap();
    }

    let transport = Arc::new(ChannelTransport::new(LinkDelays::none()));
    let actuators = (1..=machines)
        .map(|m| transport.register(Endpoint::Actuator(m)))
        .collect();

    let fleet = Arc::new(EdgeFleet::new(4));
    fleet.add_node(1);
    let metrics = Arc::new(MetricsAggregator::new());
    let routing = Arc::new(RoutingHandle::new(table));
    let sensors = Arc::new(RecordingSensors::default());
    let events = Arc::new(EventBus::default());
    let client = InferenceClient::new(edge, cloud, Duration::from_secs(1));

    let dispatcher = Dispatcher::new(
        Arc::new(client),
        Arc::clone(&fleet),
        Arc::clone(&routing),
        Arc::new(ActuationLatch::new()),
        Arc::clone(&metrics),
        transport,
        Arc::clone(&events),
    )
    .with_confidence_threshold(threshold)
    .with_sensor_control(sensors.clone());

    Harness {
        dispatcher: Arc::new(dispatcher),
        metrics,
        routing,
        fleet,
        sensors,
        events,
        actuators,
    }
}

fn reading(machine_id: MachineId, temperature: f64) -> FeatureReading {
    FeatureReading::new(
        machine_id,
        1.0,
        ScalarFeatures {
            temperature,
            voltage: 220.0,
            vibration_x: 0.8,
            vibration_y: 1.0,
            vibration_z: 1.0,
            current: 14.0,
        },
    )
}

fn stop_commands(inbox: &mut mpsc::Receiver<FogMessage>) -> usize {
    let mut n = 0;
    while let Ok(msg) = inbox.try_recv() {
        if matches!(msg, FogMessage::Actuate(ref cmd) if cmd.action == "STOP") {
            n += 1;
        }
    }
    n
}

// ---------------------------------------------------------------------------
// Tier gating
// ---------------------------------------------------------------------------

#[tokio::test]
async fn uncertain_edge_escalates_to_cloud() {
    let edge = Scripted::fixed(0.52);
    let cloud = Scripted::fixed(0.1);
    let h = harness(edge.clone(), cloud.clone(), 1);

    let outcome = h.dispatcher.dispatch(reading(1, 50.0)).await.unwrap();
    assert_eq!(outcome.final_tier, Tier::Cloud);
    assert!((outcome.escalated_from.unwrap() - 0.04).abs() < 1e-9);
    assert_eq!(edge.calls(), 1);
    assert_eq!(cloud.calls(), 1);
}

#[tokio::test]
async fn confident_edge_never_calls_cloud() {
    let edge = Scripted::fixed(0.95);
    let cloud = Scripted::fixed(0.1);
    let h = harness(edge.clone(), cloud.clone(), 1);

    let outcome = h.dispatcher.dispatch(reading(1, 50.0)).await.unwrap();
    assert_eq!(outcome.final_tier, Tier::Edge);
    assert!(outcome.escalated_from.is_none());
    assert!((outcome.result.confidence - 0.9).abs() < 1e-9);
    assert_eq!(cloud.calls(), 0);
}

#[tokio::test]
async fn confidence_exactly_at_threshold_stays_on_edge() {
    // |0.85 - 0.5| * 2 is exactly the threshold.
    let edge = Scripted::fixed(0.85);
    let cloud = Scripted::fixed(0.1);
    let h = harness(edge, cloud.clone(), 1);

    let outcome = h.dispatcher.dispatch(reading(1, 50.0)).await.unwrap();
    assert_eq!(outcome.final_tier, Tier::Edge);
    assert_eq!(cloud.calls(), 0);
}

#[tokio::test]
async fn edge_sees_normalized_and_cloud_sees_raw_features() {
    let edge = Scripted::new(|_, req| {
        assert_eq!(req.feature("temp"), Some(1.0));
        Ok(0.5)
    });
    let cloud = Scripted::new(|_, req| {
        assert_eq!(req.feature("temp"), Some(70.0));
        Ok(0.2)
    });
    let h = harness(edge.clone(), cloud.clone(), 1);

    h.dispatcher.dispatch(reading(1, 70.0)).await.unwrap();
    assert_eq!((edge.calls(), cloud.calls()), (1, 1));
}

#[tokio::test]
async fn label_never_changes_the_verdict() {
    let h = harness(Scripted::fixed(0.95), Scripted::fixed(0.1), 2);

    let labeled = h
        .dispatcher
        .dispatch(reading(1, 50.0).with_ground_truth(false))
        .await
        .unwrap();
    let unlabeled = h.dispatcher.dispatch(reading(2, 50.0)).await.unwrap();
    assert_eq!(labeled.result.is_fault, unlabeled.result.is_fault);
    assert_eq!(h.metrics.snapshot().edge_accuracy, Some(0.0));
}

// ---------------------------------------------------------------------------
// Fallbacks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn edge_failure_falls_back_then_escalates() {
    let cloud = Scripted::fixed(0.2);
    let h = harness(Arc::new(UnavailablePredictor::new("edge")), cloud.clone(), 1);

    let outcome = h.dispatcher.dispatch(reading(1, 65.0)).await.unwrap();
    assert_eq!(outcome.final_tier, Tier::Cloud);
    assert_eq!(outcome.result.method, "scripted_model");
    assert_eq!(cloud.calls(), 1);
}

#[tokio::test]
async fn cloud_failure_uses_rule_fallback() {
    let h = harness(
        Scripted::fixed(0.55),
        Scripted::new(|_, _| Err(InferenceError::Unavailable("down".into()))),
        1,
    );

    let mut hot = reading(1, 75.0);
    hot.features.voltage = 250.0;
    let outcome = h.dispatcher.dispatch(hot).await.unwrap();
    assert_eq!(outcome.result.method, METHOD_CLOUD_FALLBACK);
    assert_eq!(outcome.final_tier, Tier::Cloud);
    assert!(outcome.result.is_fault);
    assert_eq!(
        h.metrics.snapshot().prediction_method_counts.get(METHOD_CLOUD_FALLBACK),
        Some(&1)
    );
}

#[tokio::test]
async fn confident_edge_fallback_is_final() {
    let cloud = Scripted::fixed(0.9);
    let h = harness_with_threshold(
        Arc::new(UnavailablePredictor::new("edge")),
        cloud.clone(),
        1,
        0.3,
    );
    let outcome = h.dispatcher.dispatch(reading(1, 65.0)).await.unwrap();
    assert_eq!(outcome.final_tier, Tier::Edge);
    assert_eq!(outcome.result.method, METHOD_EDGE_FALLBACK);
    assert_eq!(cloud.calls(), 0);
}

// ---------------------------------------------------------------------------
// Actuation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fault_stops_machine_once() {
    let mut h = harness(Scripted::fixed(0.97), Scripted::fixed(0.1), 1);
    let mut events = h.events.subscribe();

    let first = h.dispatcher.dispatch(reading(1, 80.0)).await.unwrap();
    assert!(first.stop_issued);
    assert!(h.dispatcher.dispatch(reading(1, 80.0)).await.is_none());

    assert_eq!(stop_commands(&mut h.actuators[0]), 1);
    assert_eq!(*h.sensors.stopped.lock().unwrap(), vec![1]);
    assert_eq!(h.metrics.snapshot().stopped_machines, vec![1]);
    assert_eq!(h.metrics.total_predictions(), 1);

    let event = events.recv().await.unwrap();
    assert_eq!(event.event_type, event_types::MACHINE_STOPPED);
    assert_eq!(event.source_entity_id, Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_faults_send_one_stop_per_machine() {
    let mut h = harness(Scripted::fixed(0.99), Scripted::fixed(0.1), 3);

    let mut tasks = Vec::new();
    for i in 0..60u32 {
        let d = Arc::clone(&h.dispatcher);
        tasks.push(tokio::spawn(async move { d.dispatch(reading(i % 3 + 1, 85.0)).await }));
    }
    let outcomes: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let issued = outcomes
        .iter()
        .flatten()
        .filter(|o| o.stop_issued)
        .count();
    assert_eq!(issued, 3);
    for inbox in &mut h.actuators {
        assert_eq!(stop_commands(inbox), 1);
    }

    let s = h.metrics.snapshot();
    assert_eq!(s.stopped_machines, vec![1, 2, 3]);
    assert_eq!(s.edge_handled + s.cloud_handled, s.total_predictions);
}

#[tokio::test]
async fn healthy_verdict_sends_nothing() {
    let mut h = harness(Scripted::fixed(0.05), Scripted::fixed(0.1), 1);
    let outcome = h.dispatcher.dispatch(reading(1, 50.0)).await.unwrap();
    assert!(!outcome.result.is_fault);
    assert!(!outcome.stop_issued);
    assert_eq!(stop_commands(&mut h.actuators[0]), 0);
}

#[tokio::test]
async fn missing_actuator_skips_stop_without_latching() {
    let h = harness(Scripted::fixed(0.99), Scripted::fixed(0.1), 1);

    // Machine 7 reaches node 1 without being in the routing table.
    let outcome = h.dispatcher.dispatch_via(1, reading(7, 85.0)).await.unwrap();
    assert!(outcome.result.is_fault);
    assert!(!outcome.stop_issued);
    assert!(h.metrics.snapshot().stopped_machines.is_empty());

    // Still running, so the next reading is dispatched again.
    assert!(h.dispatcher.dispatch_via(1, reading(7, 85.0)).await.is_some());
}

// ---------------------------------------------------------------------------
// Routing and model updates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_route_completes_on_old_node() {
    let h = harness(Scripted::fixed(0.1), Scripted::fixed(0.1), 4);
    h.fleet.add_node(2);

    h.routing
        .update(|t| {
            t.add_edge_node(2)?;
            let plan = t.plan_migration(1, 2)?;
            t.apply_migration(&plan)
        })
        .unwrap();

    // Accepted by node 1 before the migration published.
    let in_flight = h.dispatcher.dispatch_via(1, reading(1, 50.0)).await.unwrap();
    assert_eq!(in_flight.edge_node, 1);

    let next = h.dispatcher.dispatch(reading(1, 50.0)).await.unwrap();
    assert_eq!(next.edge_node, 2);
    assert_eq!(h.fleet.node(1).unwrap().handled(), 1);
    assert_eq!(h.fleet.node(2).unwrap().handled(), 1);
}

#[tokio::test]
async fn installed_edge_model_serves_next_reading() {
    let edge = Scripted::new(|model, _| Ok(if model.version >= 2 { 0.99 } else { 0.01 }));
    let h = harness(edge, Scripted::fixed(0.1), 1);

    let before = h.dispatcher.dispatch(reading(1, 50.0)).await.unwrap();
    assert!(!before.result.is_fault);

    assert!(h.fleet.install_model(
        1,
        VersionedModel {
            version: 2,
            blob: vec![7],
            updated_at: 5.0,
        }
    ));
    let after = h.dispatcher.dispatch(reading(1, 50.0)).await.unwrap();
    assert!(after.result.is_fault);
}

#[tokio::test]
async fn escalated_labeled_readings_feed_the_sample_store() {
    let h = harness(Scripted::fixed(0.5), Scripted::fixed(0.2), 1);

    let labeled = h.dispatcher.dispatch(reading(1, 50.0).with_ground_truth(false)).await;
    let unlabeled = h.dispatcher.dispatch(reading(1, 50.0)).await;
    assert!(labeled.unwrap().was_escalated());
    assert!(unlabeled.unwrap().was_escalated());
    assert_eq!(h.dispatcher.samples().len(), 1);
}
