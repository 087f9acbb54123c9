//! Engine diagnostics parsing
//!
//! The engine reports everything as text on its diagnostic stream. All of the
//! text-to-number logic lives behind [`DiagnosticsParser`]; orchestration code
//! only ever sees typed results, so a different parsing strategy (or a
//! different engine version) plugs in here without touching the pipeline.

use crate::models::{LoudnessKey, LoudnessMeasurement};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Diagnostics parsing errors
#[derive(Debug, Error, PartialEq)]
pub enum DiagnosticsError {
    /// No loudness label matched
    #[error("Failed to parse loudness summary (no metrics found)")]
    NoLoudnessValues,

    /// No per-frame statistics matched any series
    #[error("No per-frame statistics found in engine output")]
    NoFrameStatistics,

    /// `mean_volume` token absent
    #[error("mean_volume not found in engine output")]
    MeanVolumeNotFound,

    /// Probe output was not a duration
    #[error("Invalid duration {0:?}")]
    InvalidDuration(String),
}

/// Raw per-frame series with placeholder zeros already removed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStatistics {
    pub rms_db: Vec<f64>,
    pub peak_db: Vec<f64>,
    pub noise_db: Vec<f64>,
}

impl FrameStatistics {
    pub fn is_empty(&self) -> bool {
        self.rms_db.is_empty() && self.peak_db.is_empty() && self.noise_db.is_empty()
    }
}

/// Parsing contract between the engine's text output and the pipeline
pub trait DiagnosticsParser: Send + Sync {
    /// Loudness summary → key/value map. Empty map is an error.
    fn loudness_summary(&self, text: &str) -> Result<LoudnessMeasurement, DiagnosticsError>;

    /// Per-frame RMS/peak/noise series. Zero readings are dropped.
    fn frame_statistics(&self, text: &str) -> FrameStatistics;

    /// Single `mean_volume` value in dB
    fn mean_volume(&self, text: &str) -> Result<f64, DiagnosticsError>;

    /// Filter names from capability introspection
    fn filter_names(&self, text: &str) -> Vec<String>;

    /// Duration in seconds from the metadata probe
    fn duration(&self, text: &str) -> Result<f64, DiagnosticsError>;
}

static DECIMAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?\d+(?:\.\d+)?").expect("valid decimal regex"));
static RMS_LEVEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)RMS[_ ]level(?:[_ ]dB)?\s*[:=]\s*([-+]?\d+(?:\.\d+)?)")
        .expect("valid RMS regex")
});
static PEAK_LEVEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bPeak[_ ]level(?:[_ ]dB)?\s*[:=]\s*([-+]?\d+(?:\.\d+)?)")
        .expect("valid peak regex")
});
static NOISE_LEVEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Noise[_ ](?:level|floor)(?:[_ ]dB)?\s*[:=]\s*([-+]?\d+(?:\.\d+)?)")
        .expect("valid noise regex")
});
static MEAN_VOLUME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"mean_volume:\s*([-+]?\d+(?:\.\d+)?)\s*dB").expect("valid mean_volume regex")
});

/// Parser for ffmpeg's textual diagnostics
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegTextParser;

impl FfmpegTextParser {
    pub fn new() -> Self {
        Self
    }

    /// First non-zero capture of `re` on `line`
    fn capture_nonzero(re: &Regex, line: &str) -> Option<f64> {
        let value: f64 = re.captures(line)?.get(1)?.as_str().parse().ok()?;
        // Engine emits 0 as a placeholder for frames it could not measure
        (value != 0.0).then_some(value)
    }
}

impl DiagnosticsParser for FfmpegTextParser {
    fn loudness_summary(&self, text: &str) -> Result<LoudnessMeasurement, DiagnosticsError> {
        let mut result = LoudnessMeasurement::new();

        for line in text.lines().map(str::trim) {
            for key in LoudnessKey::ALL {
                let Some(rest) = line.strip_prefix(key.summary_label()) else {
                    continue;
                };
                if let Some(value) = DECIMAL
                    .find(rest)
                    .and_then(|m| m.as_str().parse::<f64>().ok())
                {
                    result.insert(key, value);
                }
            }
        }

        if result.is_empty() {
            return Err(DiagnosticsError::NoLoudnessValues);
        }
        Ok(result)
    }

    fn frame_statistics(&self, text: &str) -> FrameStatistics {
        let mut stats = FrameStatistics::default();

        for line in text.lines() {
            if let Some(v) = Self::capture_nonzero(&RMS_LEVEL, line) {
                stats.rms_db.push(v);
            }
            if let Some(v) = Self::capture_nonzero(&PEAK_LEVEL, line) {
                stats.peak_db.push(v);
            }
            if let Some(v) = Self::capture_nonzero(&NOISE_LEVEL, line) {
                stats.noise_db.push(v);
            }
        }

        stats
    }

    fn mean_volume(&self, text: &str) -> Result<f64, DiagnosticsError> {
        MEAN_VOLUME
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .ok_or(DiagnosticsError::MeanVolumeNotFound)
    }

    fn filter_names(&self, text: &str) -> Vec<String> {
        // " TSC afftdn            A->A       Denoise audio samples using FFT."
        text.lines()
            .filter_map(|line| {
                let mut tokens = line.split_whitespace();
                let _flags = tokens.next()?;
                let name = tokens.next()?;
                let io = tokens.next()?;
                io.contains("->").then(|| name.to_string())
            })
            .collect()
    }

    fn duration(&self, text: &str) -> Result<f64, DiagnosticsError> {
        let raw = text.trim();
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
            _ => Err(DiagnosticsError::InvalidDuration(raw.to_string())),
        }
    }
}

/// Arithmetic mean; `None` for an empty series
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
