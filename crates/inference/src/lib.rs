//! Model-tier capabilities and the client the dispatcher calls them through.
//!
//! The dispatcher never talks to a model directly. It goes through
//! [`InferenceClient`], which wraps a [`Predictor`] per tier, enforces the
//! call timeout and turns raw responses into typed
//! [`InferenceResult`](fogpdm_core::result::InferenceResult)s. The adapter
//! behind each capability decides the transport: [`http`] talks JSON to an
//! out-of-process model server, tests plug in scripted doubles.

pub mod capability;
pub mod client;
pub mod error;
pub mod http;
pub mod messages;
pub mod model;

pub use capability::{Predictor, Trainer};
pub use client::InferenceClient;
pub use error::InferenceError;
pub use model::{ModelKind, ModelSlot, VersionedModel};
