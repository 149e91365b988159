//! Message delivery between fog components.
//!
//! Readings, model broadcasts and stop commands all travel through the same
//! [`Transport`], so they share its back-pressure and per-destination
//! ordering.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use fogpdm_core::reading::FeatureReading;
use fogpdm_core::types::{ActuatorId, EdgeNodeId, MachineId};
use fogpdm_inference::messages::ModelBroadcast;

use crate::error::TransportError;

/// Action string carried by a stop command.
pub const ACTION_STOP: &str = "STOP";

/// Inbox capacity when none is given.
const DEFAULT_INBOX_CAPACITY: usize = 256;

/// Where a message is going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Edge(EdgeNodeId),
    Actuator(ActuatorId),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Edge(id) => write!(f, "edge node {id}"),
            Endpoint::Actuator(id) => write!(f, "actuator {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuationCommand {
    pub machine_id: MachineId,
    pub action: String,
}

impl ActuationCommand {
    pub fn stop(machine_id: MachineId) -> Self {
        Self {
            machine_id,
            action: ACTION_STOP.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum FogMessage {
    Reading(FeatureReading),
    ModelUpdate(ModelBroadcast),
    Actuate(ActuationCommand),
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// "Deliver `message` to `to` after the modeled link delay."
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, to: Endpoint, message: FogMessage) -> Result<(), TransportError>;
}

/// Modeled one-way delay per endpoint kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkDelays {
    pub edge: Duration,
    pub actuator: Duration,
}

impl Default for LinkDelays {
    fn default() -> Self {
        Self {
            edge: Duration::from_millis(1),
            actuator: Duration::from_millis(1),
        }
    }
}

impl LinkDelays {
    pub fn none() -> Self {
        Self {
            edge: Duration::ZERO,
            actuator: Duration::ZERO,
        }
    }

    fn for_endpoint(&self, endpoint: Endpoint) -> Duration {
        match endpoint {
            Endpoint::Edge(_) => self.edge,
            Endpoint::Actuator(_) => self.actuator,
        }
    }
}

/// In-process transport: one bounded `mpsc` inbox per endpoint.
///
/// A full inbox makes the sender wait. Messages from one sequential sender
/// to one endpoint arrive in send order.
pub struct ChannelTransport {
    inboxes: RwLock<HashMap<Endpoint, mpsc::Sender<FogMessage>>>,
    delays: LinkDelays,
    capacity: usize,
}

impl ChannelTransport {
    pub fn new(delays: LinkDelays) -> Self {
        Self::with_capacity(delays, DEFAULT_INBOX_CAPACITY)
    }

    pub fn with_capacity(delays: LinkDelays, capacity: usize) -> Self {
        Self {
            inboxes: RwLock::new(HashMap::new()),
            delays,
            capacity: capacity.max(1),
        }
    }

    /// Create (or replace) the inbox for `endpoint` and return its receiving
    /// end.
    pub fn register(&self, endpoint: Endpoint) -> mpsc::Receiver<FogMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.inboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(endpoint, tx);
        rx
    }

    pub fn unregister(&self, endpoint: Endpoint) {
        self.inboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&endpoint);
    }

    fn sender(&self, endpoint: Endpoint) -> Option<mpsc::Sender<FogMessage>> {
        self.inboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&endpoint)
            .cloned()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn deliver(&self, to: Endpoint, message: FogMessage) -> Result<(), TransportError> {
        let sender = self.sender(to).ok_or(TransportError::UnknownEndpoint(to))?;

        let delay = self.delays.for_endpoint(to);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        sender
            .send(message)
            .await
            .map_err(|_| TransportError::Closed(to))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
