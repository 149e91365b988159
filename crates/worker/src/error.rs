use fogpdm_core::error::CoreError;
use fogpdm_core::types::EdgeNodeId;

/// Failure to bring up an edge node or route devices onto it.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("edge node {0} is already running")]
    AlreadyRunning(EdgeNodeId),

    #[error("routing update failed: {0}")]
    Routing(#[from] CoreError),
}

/// Failure while wiring a run together. Nothing after start-up is fatal.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("invalid initial topology: {0}")]
    Topology(#[from] CoreError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}
