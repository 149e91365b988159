//! Domain types and pure logic for fog-tier predictive maintenance.
//!
//! Nothing here performs I/O. The inference, pipeline and worker crates
//! build on these types:
//!
//! - [`reading`] and [`preprocess`]: telemetry as it enters the dispatcher.
//! - [`result`]: per-tier inference results and dispatch outcomes.
//! - [`heuristics`] and [`normalize`]: the fixed-rule fallbacks and the
//!   edge-model feature scaling.
//! - [`routing`]: the sensor/actuator to edge-node table and migration plans.
//! - [`config`] and [`clock`]: run configuration and simulated time.

pub mod clock;
pub mod config;
pub mod error;
pub mod heuristics;
pub mod normalize;
pub mod preprocess;
pub mod reading;
pub mod result;
pub mod routing;
pub mod types;
