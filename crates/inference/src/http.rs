//! JSON-over-HTTP adapters for out-of-process model servers.
//!
//! - `POST {base}/predict` with a [`PredictRequest`], answered by a
//!   [`PredictResponse`].
//! - `POST {base}/train` with a [`TrainRequest`], answered by
//!   `{"modelBase64": "..."}`.

use async_trait::async_trait;

use crate::capability::{Predictor, Trainer};
use crate::error::InferenceError;
use crate::messages::{PredictRequest, PredictResponse, TrainRequest, TrainResponse};
use crate::model::{ModelKind, VersionedModel};

/// Predictor backed by a model server.
pub struct HttpPredictor {
    client: reqwest::Client,
    base_url: String,
    name: String,
}

impl HttpPredictor {
    /// * `base_url` - e.g. `http://edge-model:5000`, without the trailing
    ///   `/predict`.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), name, base_url)
    }

    /// Reuse an existing [`reqwest::Client`] (shared connection pool).
    pub fn with_client(
        client: reqwest::Client,
        name: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn predict(
        &self,
        _model: &VersionedModel,
        request: &PredictRequest,
    ) -> Result<PredictResponse, InferenceError> {
        let response = self
            .client
            .post(format!("{}/predict", self.base_url))
            .json(request)
            .send()
            .await?;

        parse_response(response).await
    }
}

/// Trainer backed by a training server.
pub struct HttpTrainer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTrainer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Trainer for HttpTrainer {
    fn name(&self) -> &str {
        "http-trainer"
    }

    async fn train(&self, request: &TrainRequest) -> Result<Vec<u8>, InferenceError> {
        let kind: ModelKind = request.kind;
        let response = self
            .client
            .post(format!("{}/train", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| InferenceError::TrainingFailed(format!("{kind} trainer: {e}")))?;

        let body: TrainResponse = parse_response(response).await.map_err(|e| {
            InferenceError::TrainingFailed(format!("{kind} trainer: {e}"))
        })?;
        VersionedModel::decode_blob(&body.model_base64)
    }
}

// ---- private helpers ----

/// Turn a non-2xx status into [`InferenceError::Rejected`] and parse the
/// body of a successful one.
async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, InferenceError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(InferenceError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| InferenceError::MalformedResponse(e.to_string()))
}
