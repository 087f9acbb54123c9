//! Filter-chain builder
//!
//! Stage order is fixed:
//! `[denoise]? → loudness normalization → [compressor]? → [limiter]? → resample`
//!
//! The builder is a pure function of the processing request and the resolved
//! denoise stage, so identical inputs always yield byte-identical chains.

use crate::audio::units::{db_to_linear, format_number};
use crate::models::ProcessingRequest;
use std::fmt;
use std::path::{Path, PathBuf};

/// True-peak ceiling of the normalization stage (dBTP)
pub const TRUE_PEAK_CEILING_DB: f64 = -1.5;

/// Loudness range of the normalization stage (LU)
pub const LOUDNESS_RANGE_LU: f64 = 7.0;

/// In-engine denoise stage chosen by denoise resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenoiseStage {
    /// Broadband FFT denoiser
    Spectral,
    /// Recurrent-network denoiser with its trained model
    Neural { model_path: PathBuf },
}

impl DenoiseStage {
    pub fn filter_spec(&self) -> String {
        match self {
            DenoiseStage::Spectral => "afftdn".to_string(),
            DenoiseStage::Neural { model_path } => {
                format!("arnndn=m={}", quote_filter_value(model_path))
            }
        }
    }
}

/// Stage kinds, in chain order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StageKind {
    Denoise,
    LoudnessNormalization,
    Compressor,
    Limiter,
    Resample,
}

/// One filter in the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterStage {
    pub kind: StageKind,
    pub spec: String,
}

/// Ordered filter chain for one apply pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterChain {
    stages: Vec<FilterStage>,
}

impl FilterChain {
    /// Build the chain for a request
    pub fn build(request: &ProcessingRequest, denoise: Option<&DenoiseStage>) -> Self {
        let mut stages = Vec::with_capacity(5);

        if let Some(stage) = denoise {
            stages.push(FilterStage {
                kind: StageKind::Denoise,
                spec: stage.filter_spec(),
            });
        }

        stages.push(FilterStage {
            kind: StageKind::LoudnessNormalization,
            spec: format!(
                "loudnorm=I={}:TP={}:LRA={}",
                format_number(request.target_lufs()),
                format_number(TRUE_PEAK_CEILING_DB),
                format_number(LOUDNESS_RANGE_LU)
            ),
        });

        if let Some(compressor) = request.compressor() {
            stages.push(FilterStage {
                kind: StageKind::Compressor,
                spec: format!(
                    "acompressor=threshold={}:ratio={}:attack={}:release={}",
                    format_number(db_to_linear(compressor.threshold_db)),
                    format_number(compressor.ratio),
                    format_number(compressor.attack_ms),
                    format_number(compressor.release_ms)
                ),
            });
        }

        if let Some(limiter) = request.limiter() {
            stages.push(FilterStage {
                kind: StageKind::Limiter,
                spec: format!("alimiter=limit={}", format_number(db_to_linear(limiter.threshold_db))),
            });
        }

        stages.push(FilterStage {
            kind: StageKind::Resample,
            spec: format!("aresample={}", request.sample_rate()),
        });

        Self { stages }
    }

    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind).collect()
    }

    pub fn has_stage(&self, kind: StageKind) -> bool {
        self.stages.iter().any(|s| s.kind == kind)
    }

    /// Comma-joined filtergraph string
    pub fn to_filter_string(&self) -> String {
        self.stages
            .iter()
            .map(|s| s.spec.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_filter_string())
    }
}

/// One engine invocation that writes the processed output file
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyPass {
    pub input: PathBuf,
    pub output: PathBuf,
    pub chain: FilterChain,
    pub sample_rate: u32,
    pub channels: u16,
}

impl ApplyPass {
    pub fn new(
        request: &ProcessingRequest,
        input: &Path,
        output: &Path,
        denoise: Option<&DenoiseStage>,
    ) -> Self {
        Self {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            chain: FilterChain::build(request, denoise),
            sample_rate: request.sample_rate(),
            channels: request.channels(),
        }
    }

    /// Engine arguments: overwrite, input, filters, resample, drop video, output
    pub fn engine_args(&self) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            self.input.to_string_lossy().to_string(),
            "-af".to_string(),
            self.chain.to_filter_string(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-ac".to_string(),
            self.channels.to_string(),
            "-vn".to_string(),
            self.output.to_string_lossy().to_string(),
        ]
    }
}

/// Quote a path for use as a filter option value
fn quote_filter_value(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    format!("'{}'", raw.replace('\'', "'\\''"))
}
