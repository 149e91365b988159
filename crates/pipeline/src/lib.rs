//! Per-reading dispatch and the shared state it works against.
//!
//! - [`dispatcher`]: edge-first, confidence-gated escalation to the cloud
//!   tier, heuristic fallback and actuation.
//! - [`latch`]: at-most-once stop per machine.
//! - [`metrics`]: run-wide counters and latency series.
//! - [`routing`]: the atomically replaced routing-table snapshot.
//! - [`fleet`]: per-edge-node model slots and load gauges.
//! - [`transport`]: modeled-delay message delivery to edge nodes and
//!   actuators.
//! - [`store`]: labeled samples collected for retraining.

pub mod dispatcher;
pub mod error;
pub mod fleet;
pub mod latch;
pub mod metrics;
pub mod routing;
pub mod store;
pub mod transport;

pub use dispatcher::{Dispatcher, SensorControl};
pub use error::{ActuationError, TransportError};
pub use fleet::{EdgeFleet, InFlightLoadProbe, LoadProbe};
pub use latch::ActuationLatch;
pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use routing::RoutingHandle;
pub use store::SampleStore;
pub use transport::{ChannelTransport, Endpoint, FogMessage, Transport};
