//! Fog-tier observability events.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`FogEvent`]: the event envelope published by the dispatcher and the
//!   control loops.

pub mod bus;

pub use bus::{event_types, EventBus, FogEvent};
