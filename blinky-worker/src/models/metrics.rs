//! Quality and loudness measurement results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Result of a best-effort measurement
///
/// Measurement failures never fail a job; they surface as `Absent` with the
/// reason so callers and tests can see what was skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum Measured<T> {
    Present(T),
    Absent { reason: String },
}

impl<T> Measured<T> {
    pub fn absent(reason: impl Into<String>) -> Self {
        Measured::Absent {
            reason: reason.into(),
        }
    }

    pub fn from_result<E: fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Measured::Present(value),
            Err(e) => Measured::absent(e.to_string()),
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Measured::Present(value) => Some(value),
            Measured::Absent { .. } => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Measured::Present(_))
    }

    pub fn absent_reason(&self) -> Option<&str> {
        match self {
            Measured::Present(_) => None,
            Measured::Absent { reason } => Some(reason),
        }
    }

    pub fn map<U, F: FnOnce(&T) -> U>(&self, f: F) -> Measured<U> {
        match self {
            Measured::Present(value) => Measured::Present(f(value)),
            Measured::Absent { reason } => Measured::absent(reason.clone()),
        }
    }

    /// Flatten to an optional value, used where "unknown" is representable
    pub fn and_then_value<U, F: FnOnce(&T) -> Option<U>>(&self, f: F) -> Option<U> {
        self.value().and_then(f)
    }
}

/// Signal quality snapshot of one file
///
/// `None` means unknown: the engine produced no usable readings for that
/// series. Unknown values are never reported as 0 dB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Peak minus RMS (dB)
    pub snr: Option<f64>,
    /// Mean RMS level (dB)
    pub rms_level: Option<f64>,
    /// Mean peak level (dB)
    pub peak_level: Option<f64>,
    /// Mean noise level (dB)
    pub noise_level: Option<f64>,
    pub analyzed_at: DateTime<Utc>,
}

/// Keys extracted from the loudness summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoudnessKey {
    InputIntegrated,
    InputTruePeak,
    InputRange,
    OutputIntegrated,
}

impl LoudnessKey {
    pub const ALL: [LoudnessKey; 4] = [
        LoudnessKey::InputIntegrated,
        LoudnessKey::InputTruePeak,
        LoudnessKey::InputRange,
        LoudnessKey::OutputIntegrated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoudnessKey::InputIntegrated => "input_integrated",
            LoudnessKey::InputTruePeak => "input_true_peak",
            LoudnessKey::InputRange => "input_range",
            LoudnessKey::OutputIntegrated => "output_integrated",
        }
    }

    /// Label that introduces this value in the engine's summary
    pub fn summary_label(&self) -> &'static str {
        match self {
            LoudnessKey::InputIntegrated => "Input Integrated:",
            LoudnessKey::InputTruePeak => "Input True Peak:",
            LoudnessKey::InputRange => "Input LRA:",
            LoudnessKey::OutputIntegrated => "Output Integrated:",
        }
    }
}

/// Loudness values from one measurement run; partial maps are valid
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoudnessMeasurement(BTreeMap<LoudnessKey, f64>);

impl LoudnessMeasurement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: LoudnessKey, value: f64) {
        self.0.insert(key, value);
    }

    pub fn get(&self, key: LoudnessKey) -> Option<f64> {
        self.0.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = LoudnessKey> + '_ {
        self.0.keys().copied()
    }

    /// Integrated loudness of the measured file
    pub fn integrated(&self) -> Option<f64> {
        self.get(LoudnessKey::InputIntegrated)
    }
}

/// Loudness snapshot persisted with the job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoudnessSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<LoudnessMeasurement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<LoudnessMeasurement>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measured_from_result() {
        let ok: Measured<f64> = Measured::from_result::<String>(Ok(1.5));
        assert_eq!(ok.value(), Some(&1.5));

        let err: Measured<f64> = Measured::from_result(Err("engine exploded"));
        assert!(!err.is_present());
        assert_eq!(err.absent_reason(), Some("engine exploded"));
        assert_eq!(err.map(|v| v * 2.0).value(), None);
    }

    #[test]
    fn test_loudness_serializes_with_snake_case_keys() {
        let mut m = LoudnessMeasurement::new();
        m.insert(LoudnessKey::OutputIntegrated, -16.0);
        m.insert(LoudnessKey::InputIntegrated, -24.8);

        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"input_integrated":-24.8,"output_integrated":-16.0}"#);
    }

    #[test]
    fn test_snapshot_skips_missing_side() {
        let snapshot = LoudnessSnapshot {
            before: None,
            after: Some(LoudnessMeasurement::new()),
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"after":{}}"#);
    }
}
