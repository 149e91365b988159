//! Runtime side of the fog predictive-maintenance system.
//!
//! - [`background`]: scaling and model-sync control loops.
//! - [`edge_node`]: edge-node inbox loops and their provisioner.
//! - [`actuator`]: machine-side stop-command endpoint.
//! - [`event_log`]: logs and tallies published events.
//! - [`sensors`]: per-machine reading producers.
//! - [`simulation`]: wires a complete run from configuration.

pub mod actuator;
pub mod background;
pub mod edge_node;
pub mod error;
pub mod event_log;
pub mod sensors;
pub mod simulation;

pub use error::{ProvisionError, SimulationError};
pub use simulation::{Capabilities, Simulation, SimulationReport};
