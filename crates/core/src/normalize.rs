//! Fixed per-channel standardization applied before the edge model.

use serde::{Deserialize, Serialize};

use crate::reading::{Channel, ScalarFeatures};

/// Per-channel mean and standard deviation, indexed by [`Channel::index`].
///
/// These are configuration constants, never learned at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub means: [f64; 6],
    pub stds: [f64; 6],
}

impl Default for NormalizationParams {
    fn default() -> Self {
        Self {
            means: [55.0, 225.0, 1.0, 1.0, 1.0, 15.0],
            stds: [15.0, 20.0, 1.0, 1.0, 1.0, 5.0],
        }
    }
}

impl NormalizationParams {
    /// Standardize one value. A zero (or non-finite) deviation is treated
    /// as 1.
    pub fn scale(&self, channel: Channel, value: f64) -> f64 {
        let i = channel.index();
        let std = self.stds[i];
        let std = if std.is_finite() && std != 0.0 { std } else { 1.0 };
        (value - self.means[i]) / std
    }

    /// Standardize every channel.
    pub fn apply(&self, features: &ScalarFeatures) -> ScalarFeatures {
        let mut out = *features;
        for channel in Channel::ALL {
            out.set(channel, self.scale(channel, features.get(channel)));
        }
        out
    }
}
