use fogpdm_core::types::MachineId;

use crate::transport::Endpoint;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("No inbox registered for {0}")]
    UnknownEndpoint(Endpoint),

    #[error("Inbox for {0} is closed")]
    Closed(Endpoint),
}

#[derive(Debug, thiserror::Error)]
pub enum ActuationError {
    #[error("No actuator registered for machine {machine_id}")]
    ActuatorNotFound { machine_id: MachineId },

    #[error("Stop command delivery failed: {0}")]
    Delivery(#[from] TransportError),
}
