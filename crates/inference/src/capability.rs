//! Prediction and training capabilities.
//!
//! Both traits are object-safe so tiers can be wired at runtime as
//! `Arc<dyn Predictor>` / `Arc<dyn Trainer>`. Implementations decide their
//! own transport and must be safe to call concurrently.

use async_trait::async_trait;

use crate::error::InferenceError;
use crate::messages::{PredictRequest, PredictResponse, TrainRequest};
use crate::model::VersionedModel;

#[async_trait]
pub trait Predictor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Classify one reading with `model`.
    ///
    /// `model` is the snapshot the caller read before the call; an adapter
    /// serving its own copy of the model may ignore the blob and only check
    /// the version.
    async fn predict(
        &self,
        model: &VersionedModel,
        request: &PredictRequest,
    ) -> Result<PredictResponse, InferenceError>;
}

#[async_trait]
pub trait Trainer: Send + Sync {
    fn name(&self) -> &str;

    /// Train a fresh model on the accumulated rows and return its blob.
    async fn train(&self, request: &TrainRequest) -> Result<Vec<u8>, InferenceError>;
}

// ---------------------------------------------------------------------------
// Unconfigured capabilities
// ---------------------------------------------------------------------------

/// Stands in for a tier with no model server configured. Every call fails,
/// so the dispatcher answers with its heuristic.
#[derive(Debug, Clone)]
pub struct UnavailablePredictor {
    name: String,
}

impl UnavailablePredictor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Predictor for UnavailablePredictor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn predict(
        &self,
        _model: &VersionedModel,
        _request: &PredictRequest,
    ) -> Result<PredictResponse, InferenceError> {
        Err(InferenceError::Unavailable(format!(
            "{} has no model server configured",
            self.name
        )))
    }
}

/// Training capability used when no trainer is configured.
#[derive(Debug, Clone, Default)]
pub struct UnavailableTrainer;

#[async_trait]
impl Trainer for UnavailableTrainer {
    fn name(&self) -> &str {
        "unavailable-trainer"
    }

    async fn train(&self, request: &TrainRequest) -> Result<Vec<u8>, InferenceError> {
        Err(InferenceError::TrainingFailed(format!(
            "no trainer configured for the {} model",
            request.kind
        )))
    }
}
