//! Versioned model blobs and the atomically swapped slot that holds one.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use fogpdm_core::types::{ModelVersion, SimTime};

use crate::error::InferenceError;
use crate::messages::ModelBroadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Edge,
    Cloud,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Edge => f.write_str("edge"),
            ModelKind::Cloud => f.write_str("cloud"),
        }
    }
}

// ---------------------------------------------------------------------------
// VersionedModel
// ---------------------------------------------------------------------------

/// An opaque trained model and the version stamp it was published under.
#[derive(Clone, PartialEq)]
pub struct VersionedModel {
    pub version: ModelVersion,
    pub blob: Vec<u8>,
    pub updated_at: SimTime,
}

impl fmt::Debug for VersionedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedModel")
            .field("version", &self.version)
            .field("blob_len", &self.blob.len())
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl VersionedModel {
    /// Version 0: whatever the capability ships with.
    pub fn initial() -> Self {
        Self {
            version: 0,
            blob: Vec::new(),
            updated_at: 0.0,
        }
    }

    pub fn to_broadcast(&self) -> ModelBroadcast {
        ModelBroadcast {
            model_base64: BASE64.encode(&self.blob),
            version: self.version,
            update_time: self.updated_at,
        }
    }

    pub fn from_broadcast(msg: &ModelBroadcast) -> Result<Self, InferenceError> {
        let blob = BASE64
            .decode(msg.model_base64.trim())
            .map_err(|e| InferenceError::MalformedResponse(format!("model blob: {e}")))?;
        Ok(Self {
            version: msg.version,
            blob,
            updated_at: msg.update_time,
        })
    }

    /// Decode a trainer's base64 payload into a blob.
    pub fn decode_blob(encoded: &str) -> Result<Vec<u8>, InferenceError> {
        BASE64
            .decode(encoded.trim())
            .map_err(|e| InferenceError::TrainingFailed(format!("undecodable model blob: {e}")))
    }
}

// ---------------------------------------------------------------------------
// ModelSlot
// ---------------------------------------------------------------------------

/// The model a node currently serves.
///
/// Readers take an `Arc` snapshot and keep using it for the whole call;
/// writers publish a complete new model in one swap, so a reader sees either
/// the old blob or the new one, never a mix.
pub struct ModelSlot {
    current: ArcSwap<VersionedModel>,
}

impl ModelSlot {
    pub fn new(model: VersionedModel) -> Self {
        Self {
            current: ArcSwap::from_pointee(model),
        }
    }

    pub fn load(&self) -> Arc<VersionedModel> {
        self.current.load_full()
    }

    pub fn version(&self) -> ModelVersion {
        self.current.load().version
    }

    /// Install `model` if it is newer than the current one. Returns whether
    /// it was installed.
    pub fn replace(&self, model: VersionedModel) -> bool {
        let model = Arc::new(model);
        let mut installed = false;
        self.current.rcu(|current| {
            installed = model.version > current.version;
            if installed {
                Arc::clone(&model)
            } else {
                Arc::clone(current)
            }
        });
        installed
    }
}

impl Default for ModelSlot {
    fn default() -> Self {
        Self::new(VersionedModel::initial())
    }
}

impl fmt::Debug for ModelSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModelSlot").field(&*self.current.load()).finish()
    }
}
