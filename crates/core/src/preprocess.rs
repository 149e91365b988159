//! Missing-value repair applied to readings before dispatch.
//!
//! Waveform gaps are mean-filled; missing scalar channels get a fixed
//! default. Readings that cannot be repaired are flagged `valid = false`
//! and the dispatcher drops them.

use crate::reading::{Channel, FeatureReading};

/// Default temperature (°C) substituted for a missing sample.
pub const DEFAULT_TEMPERATURE: f64 = 50.0;

/// Default supply voltage (V) substituted for a missing sample.
pub const DEFAULT_VOLTAGE: f64 = 220.0;

/// Default motor current (A) substituted for a missing sample.
pub const DEFAULT_CURRENT: f64 = 15.0;

/// Default vibration amplitude substituted for a missing axis sample.
pub const DEFAULT_VIBRATION: f64 = 1.0;

/// Fixed substitute for a missing value on `channel`.
pub fn default_for(channel: Channel) -> f64 {
    match channel {
        Channel::Temperature => DEFAULT_TEMPERATURE,
        Channel::Voltage => DEFAULT_VOLTAGE,
        Channel::Current => DEFAULT_CURRENT,
        Channel::VibrationX | Channel::VibrationY | Channel::VibrationZ => DEFAULT_VIBRATION,
    }
}

/// Replace NaN entries in `series` with the mean of the finite entries.
///
/// An all-missing series is filled with zeros.
pub fn mean_fill(series: &mut [f64]) {
    let (sum, count) = series
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    let mean = if count > 0 { sum / count as f64 } else { 0.0 };

    for v in series.iter_mut().filter(|v| !v.is_finite()) {
        *v = mean;
    }
}

/// Repair a reading in place and return it.
///
/// A reading with machine id 0 or a non-finite timestamp cannot be routed
/// and is marked invalid; its features are still repaired.
pub fn repair(mut reading: FeatureReading) -> FeatureReading {
    if let Some(waveform) = reading.waveform.as_mut() {
        mean_fill(waveform);
    }

    for channel in Channel::ALL {
        if !reading.features.get(channel).is_finite() {
            reading.features.set(channel, default_for(channel));
        }
    }

    if reading.machine_id == 0 || !reading.timestamp.is_finite() {
        reading.valid = false;
    }

    reading
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
