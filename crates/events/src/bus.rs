//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the dispatcher, the
//! scaling controller and the model-sync controller. Nothing persists
//! events; subscribers that lag simply miss the oldest ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Event names published on the bus.
pub mod event_types {
    /// A machine's actuation latch flipped and a stop command was sent.
    pub const MACHINE_STOPPED: &str = "machine.stopped";
    /// An overloaded edge node was split onto a newly provisioned node.
    pub const EDGE_SCALED: &str = "edge.scaled";
    /// A new model version was installed and broadcast.
    pub const MODEL_UPDATED: &str = "model.updated";
    /// A training attempt failed; the previous model stays authoritative.
    pub const MODEL_TRAINING_FAILED: &str = "model.training_failed";
}

// ---------------------------------------------------------------------------
// FogEvent
// ---------------------------------------------------------------------------

/// Something that happened during the run.
///
/// Constructed via [`FogEvent::new`] and enriched with
/// [`with_source`](FogEvent::with_source) and
/// [`with_payload`](FogEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FogEvent {
    /// Dot-separated event name, see [`event_types`].
    pub event_type: String,

    /// Optional source entity kind (`"machine"`, `"edge_node"`, `"model"`).
    pub source_entity_type: Option<String>,

    pub source_entity_id: Option<u64>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    /// Simulated time of the event, in seconds since the run started.
    pub sim_time: Option<f64>,

    /// Wall-clock creation time (UTC).
    pub timestamp: DateTime<Utc>,
}

impl FogEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source_entity_type: None,
            source_entity_id: None,
            payload: serde_json::Value::Object(Default::default()),
            sim_time: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_source(mut self, entity_type: impl Into<String>, entity_id: u64) -> Self {
        self.source_entity_type = Some(entity_type.into());
        self.source_entity_id = Some(entity_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn at(mut self, sim_time: f64) -> Self {
        self.sim_time = Some(sim_time);
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use fogpdm_events::bus::{event_types, EventBus, FogEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(FogEvent::new(event_types::MACHINE_STOPPED).with_source("machine", 3));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<FogEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed events are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. Dropped silently when
    /// nobody is listening.
    pub fn publish(&self, event: FogEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FogEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
