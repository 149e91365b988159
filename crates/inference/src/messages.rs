//! Wire types exchanged with prediction and training capabilities, and the
//! model broadcast sent to edge nodes.

use serde::{Deserialize, Serialize};

use fogpdm_core::reading::{FeatureReading, ScalarFeatures};
use fogpdm_core::types::{MachineId, ModelVersion, SimTime};

use crate::error::InferenceError;
use crate::model::ModelKind;

/// Method label a model server reports when its own prediction failed.
pub const SERVER_ERROR_METHOD: &str = "server_error";

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedFeature {
    pub name: String,
    pub value: f64,
}

/// One prediction call.
///
/// `label` is echoed back for evaluation only and must not influence the
/// verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictRequest {
    pub machine_id: MachineId,
    /// Scalar features in canonical channel order.
    pub features: Vec<NamedFeature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vibration: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<bool>,
    /// Version of the model the caller expects to answer.
    pub model_version: ModelVersion,
}

impl PredictRequest {
    /// Build a request from `features`, taking the machine, waveform and
    /// label from `reading`.
    pub fn new(reading: &FeatureReading, features: &ScalarFeatures) -> Self {
        Self {
            machine_id: reading.machine_id,
            features: features
                .ordered()
                .iter()
                .map(|(channel, value)| NamedFeature {
                    name: channel.as_str().to_string(),
                    value: *value,
                })
                .collect(),
            vibration: reading.waveform.clone(),
            label: reading.ground_truth_fault,
            model_version: 0,
        }
    }

    pub fn for_model(mut self, version: ModelVersion) -> Self {
        self.model_version = version;
        self
    }

    pub fn feature(&self, name: &str) -> Option<f64> {
        self.features.iter().find(|f| f.name == name).map(|f| f.value)
    }
}

/// A model server's verdict.
///
/// Accepts both the snake_case keys the model servers emit and the
/// camelCase aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    #[serde(alias = "isFault")]
    pub fault: i64,
    #[serde(alias = "probability")]
    pub prob: f64,
    #[serde(default, alias = "latencyMs")]
    pub latency_ms: f64,
    #[serde(default)]
    pub method: String,
}

impl PredictResponse {
    /// Reject responses that cannot be turned into a trustworthy result.
    pub fn validate(self) -> Result<Self, InferenceError> {
        if self.method == SERVER_ERROR_METHOD {
            return Err(InferenceError::Rejected {
                status: 200,
                body: "model server reported server_error".into(),
            });
        }
        if self.fault != 0 && self.fault != 1 {
            return Err(InferenceError::MalformedResponse(format!(
                "fault flag must be 0 or 1, got {}",
                self.fault
            )));
        }
        if !(0.0..=1.0).contains(&self.prob) {
            return Err(InferenceError::MalformedResponse(format!(
                "probability {} outside [0, 1]",
                self.prob
            )));
        }
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Training
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    /// Raw scalar features in canonical channel order.
    pub features: Vec<f64>,
    pub label: bool,
}

impl TrainingRow {
    pub fn from_reading(features: &ScalarFeatures, label: bool) -> Self {
        Self {
            features: features.ordered().iter().map(|(_, v)| *v).collect(),
            label,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainRequest {
    pub kind: ModelKind,
    pub rows: Vec<TrainingRow>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainResponse {
    #[serde(alias = "model_base64")]
    pub model_base64: String,
}

// ---------------------------------------------------------------------------
// Broadcast
// ---------------------------------------------------------------------------

/// New edge model pushed to every edge node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelBroadcast {
    pub model_base64: String,
    pub version: ModelVersion,
    pub update_time: SimTime,
}
