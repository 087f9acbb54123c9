//! Processing parameters and the per-job processing request

use serde::{Deserialize, Serialize};
use std::fmt;

/// Denoise method selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenoiseMethod {
    /// Built-in broadband FFT denoiser (always available)
    DefaultSpectralFilter,
    /// External spectral-gating process, output fed to the apply pass
    ExternalSpectralGate,
    /// In-engine recurrent-network denoiser (needs filter + model file)
    NeuralDenoise,
}

impl DenoiseMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenoiseMethod::DefaultSpectralFilter => "default-spectral-filter",
            DenoiseMethod::ExternalSpectralGate => "external-spectral-gate",
            DenoiseMethod::NeuralDenoise => "neural-denoise",
        }
    }

    /// Parse a selector, accepting legacy aliases
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default-spectral-filter" | "afftdn" | "default" => {
                Some(DenoiseMethod::DefaultSpectralFilter)
            }
            "external-spectral-gate" | "noisereduce" | "spectral-gate" => {
                Some(DenoiseMethod::ExternalSpectralGate)
            }
            "neural-denoise" | "rnnoise" | "arnndn" | "rnnd" => Some(DenoiseMethod::NeuralDenoise),
            _ => None,
        }
    }

    /// Parse a selector; empty or unknown values select the default filter
    pub fn parse_lenient(s: &str) -> Self {
        if s.trim().is_empty() {
            return DenoiseMethod::DefaultSpectralFilter;
        }
        Self::parse(s).unwrap_or_else(|| {
            tracing::warn!(
                selector = %s,
                "Unknown denoise method, using default-spectral-filter"
            );
            DenoiseMethod::DefaultSpectralFilter
        })
    }
}

impl fmt::Display for DenoiseMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compressor stage settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressorSpec {
    /// Threshold in dB (converted to linear and clamped)
    #[serde(default = "default_compressor_threshold_db")]
    pub threshold_db: f64,
    #[serde(default = "default_compressor_ratio")]
    pub ratio: f64,
    #[serde(default = "default_compressor_attack_ms")]
    pub attack_ms: f64,
    #[serde(default = "default_compressor_release_ms")]
    pub release_ms: f64,
}

impl Default for CompressorSpec {
    fn default() -> Self {
        Self {
            threshold_db: default_compressor_threshold_db(),
            ratio: default_compressor_ratio(),
            attack_ms: default_compressor_attack_ms(),
            release_ms: default_compressor_release_ms(),
        }
    }
}

/// Limiter stage settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimiterSpec {
    /// Ceiling in dB (converted to linear and clamped)
    #[serde(default = "default_limiter_threshold_db")]
    pub threshold_db: f64,
}

impl Default for LimiterSpec {
    fn default() -> Self {
        Self {
            threshold_db: default_limiter_threshold_db(),
        }
    }
}

/// Worker-wide processing defaults (`[processing]` in the TOML file)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingParameters {
    /// Target integrated loudness in LUFS (negative)
    #[serde(default = "default_target_lufs")]
    pub target_lufs: f64,

    /// True-peak ceiling used by the measurement passes (dBTP)
    #[serde(default = "default_true_peak_db")]
    pub true_peak_db: f64,

    /// Loudness range target used by the measurement passes (LU)
    #[serde(default = "default_loudness_range_lu")]
    pub loudness_range_lu: f64,

    /// Output sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Output channel count
    #[serde(default = "default_channels")]
    pub channels: u16,

    #[serde(default = "default_true")]
    pub use_compressor: bool,

    #[serde(default)]
    pub compressor: CompressorSpec,

    #[serde(default = "default_true")]
    pub use_limiter: bool,

    #[serde(default)]
    pub limiter: LimiterSpec,
}

impl Default for ProcessingParameters {
    fn default() -> Self {
        Self {
            target_lufs: default_target_lufs(),
            true_peak_db: default_true_peak_db(),
            loudness_range_lu: default_loudness_range_lu(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            use_compressor: true,
            compressor: CompressorSpec::default(),
            use_limiter: true,
            limiter: LimiterSpec::default(),
        }
    }
}

impl ProcessingParameters {
    /// Validate parameter ranges
    pub fn validate(&self) -> Result<(), String> {
        if !self.target_lufs.is_finite() || self.target_lufs >= 0.0 {
            return Err(format!(
                "target_lufs must be a negative number, got {}",
                self.target_lufs
            ));
        }
        if self.sample_rate == 0 {
            return Err("sample_rate must be > 0".to_string());
        }
        if self.channels == 0 {
            return Err("channels must be > 0".to_string());
        }
        if self.use_compressor && self.compressor.ratio < 1.0 {
            return Err(format!(
                "compressor ratio must be >= 1, got {}",
                self.compressor.ratio
            ));
        }
        Ok(())
    }
}

/// Immutable per-job processing configuration
///
/// Built once when a job is dispatched; there are no setters.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingRequest {
    denoise_method: DenoiseMethod,
    target_lufs: f64,
    true_peak_db: f64,
    loudness_range_lu: f64,
    sample_rate: u32,
    channels: u16,
    compressor: Option<CompressorSpec>,
    limiter: Option<LimiterSpec>,
}

impl ProcessingRequest {
    pub fn new(parameters: &ProcessingParameters, denoise_method: DenoiseMethod) -> Self {
        Self {
            denoise_method,
            target_lufs: parameters.target_lufs,
            true_peak_db: parameters.true_peak_db,
            loudness_range_lu: parameters.loudness_range_lu,
            sample_rate: parameters.sample_rate,
            channels: parameters.channels,
            compressor: parameters.use_compressor.then_some(parameters.compressor),
            limiter: parameters.use_limiter.then_some(parameters.limiter),
        }
    }

    pub fn denoise_method(&self) -> DenoiseMethod {
        self.denoise_method
    }

    pub fn target_lufs(&self) -> f64 {
        self.target_lufs
    }

    pub fn true_peak_db(&self) -> f64 {
        self.true_peak_db
    }

    pub fn loudness_range_lu(&self) -> f64 {
        self.loudness_range_lu
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn compressor(&self) -> Option<&CompressorSpec> {
        self.compressor.as_ref()
    }

    pub fn limiter(&self) -> Option<&LimiterSpec> {
        self.limiter.as_ref()
    }
}

fn default_target_lufs() -> f64 {
    -16.0
}

fn default_true_peak_db() -> f64 {
    -1.5
}

fn default_loudness_range_lu() -> f64 {
    7.0
}

fn default_sample_rate() -> u32 {
    48000
}

fn default_channels() -> u16 {
    1
}

fn default_true() -> bool {
    true
}

fn default_compressor_threshold_db() -> f64 {
    -20.0
}

fn default_compressor_ratio() -> f64 {
    3.1
}

fn default_compressor_attack_ms() -> f64 {
    5.0
}

fn default_compressor_release_ms() -> f64 {
    120.0
}

fn default_limiter_threshold_db() -> f64 {
    -1.0
}
