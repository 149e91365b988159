use std::time::Duration;

/// Failures of a prediction or training capability.
///
/// Prediction failures are never fatal: the dispatcher answers with a
/// heuristic instead. Training failures leave the previous model in place.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// The capability could not be reached (network, process, not configured).
    #[error("Inference capability unavailable: {0}")]
    Unavailable(String),

    /// The response arrived but could not be parsed or failed validation.
    #[error("Malformed inference response: {0}")]
    MalformedResponse(String),

    #[error("Inference call timed out after {0:?}")]
    Timeout(Duration),

    /// The capability answered with an error status or an error verdict.
    #[error("Inference capability rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Training failed: {0}")]
    TrainingFailed(String),
}

impl From<reqwest::Error> for InferenceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            InferenceError::MalformedResponse(e.to_string())
        } else {
            InferenceError::Unavailable(e.to_string())
        }
    }
}
