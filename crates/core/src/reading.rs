//! Telemetry readings as they arrive from a machine's sensor.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{MachineId, SimTime};

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// A named scalar sensor channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Temperature,
    Voltage,
    VibrationX,
    VibrationY,
    VibrationZ,
    Current,
}

impl Channel {
    /// Canonical channel order. Feature vectors sent to either model tier
    /// always follow this order.
    pub const ALL: [Channel; 6] = [
        Channel::Temperature,
        Channel::Voltage,
        Channel::VibrationX,
        Channel::VibrationY,
        Channel::VibrationZ,
        Channel::Current,
    ];

    /// Wire name used in prediction and training requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Temperature => "temp",
            Channel::Voltage => "voltage",
            Channel::VibrationX => "vibration_x",
            Channel::VibrationY => "vibration_y",
            Channel::VibrationZ => "vibration_z",
            Channel::Current => "current",
        }
    }

    /// Position of this channel in [`Channel::ALL`].
    pub fn index(&self) -> usize {
        match self {
            Channel::Temperature => 0,
            Channel::Voltage => 1,
            Channel::VibrationX => 2,
            Channel::VibrationY => 3,
            Channel::VibrationZ => 4,
            Channel::Current => 5,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ScalarFeatures
// ---------------------------------------------------------------------------

/// One sample of every scalar channel. Individual values may be NaN
/// ("missing") until the reading has been through [`crate::preprocess`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalarFeatures {
    pub temperature: f64,
    pub voltage: f64,
    pub vibration_x: f64,
    pub vibration_y: f64,
    pub vibration_z: f64,
    pub current: f64,
}

impl ScalarFeatures {
    pub fn get(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Temperature => self.temperature,
            Channel::Voltage => self.voltage,
            Channel::VibrationX => self.vibration_x,
            Channel::VibrationY => self.vibration_y,
            Channel::VibrationZ => self.vibration_z,
            Channel::Current => self.current,
        }
    }

    pub fn set(&mut self, channel: Channel, value: f64) {
        match channel {
            Channel::Temperature => self.temperature = value,
            Channel::Voltage => self.voltage = value,
            Channel::VibrationX => self.vibration_x = value,
            Channel::VibrationY => self.vibration_y = value,
            Channel::VibrationZ => self.vibration_z = value,
            Channel::Current => self.current = value,
        }
    }

    /// Named values in canonical channel order.
    pub fn ordered(&self) -> [(Channel, f64); 6] {
        Channel::ALL.map(|c| (c, self.get(c)))
    }

    /// Largest reading across the three vibration axes.
    pub fn max_vibration(&self) -> f64 {
        self.vibration_x.max(self.vibration_y).max(self.vibration_z)
    }

    /// `true` when no channel is NaN or infinite.
    pub fn is_complete(&self) -> bool {
        Channel::ALL.iter().all(|c| self.get(*c).is_finite())
    }
}

// ---------------------------------------------------------------------------
// FeatureReading
// ---------------------------------------------------------------------------

/// A single telemetry reading from one machine.
///
/// `ground_truth_fault` is carried for evaluation only. The dispatcher never
/// looks at it when deciding tier or actuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureReading {
    pub machine_id: MachineId,
    pub timestamp: SimTime,
    pub features: ScalarFeatures,
    /// Optional raw vibration waveform. Missing samples are NaN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform: Option<Vec<f64>>,
    #[serde(default)]
    pub ground_truth_fault: Option<bool>,
    pub valid: bool,
}

impl FeatureReading {
    /// Create a valid, unlabeled reading without a waveform.
    pub fn new(machine_id: MachineId, timestamp: SimTime, features: ScalarFeatures) -> Self {
        Self {
            machine_id,
            timestamp,
            features,
            waveform: None,
            ground_truth_fault: None,
            valid: true,
        }
    }

    /// Attach the evaluation label.
    pub fn with_ground_truth(mut self, fault: bool) -> Self {
        self.ground_truth_fault = Some(fault);
        self
    }

    /// Attach a raw vibration waveform.
    pub fn with_waveform(mut self, waveform: Vec<f64>) -> Self {
        self.waveform = Some(waveform);
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
