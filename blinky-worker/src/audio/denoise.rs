//! Denoise method resolution
//!
//! Turns the requested [`DenoiseMethod`] into what the apply pass actually
//! uses: an in-engine denoise stage, an externally denoised input file, or
//! neither. Resolution never fails a job. Every problem degrades to a
//! simpler method and is logged.

use crate::audio::engine::{Engine, EngineError, Invocation};
use crate::audio::filter_chain::DenoiseStage;
use crate::config::{DenoiseConfig, Timeouts};
use crate::models::DenoiseMethod;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Filter the neural method depends on
pub const NEURAL_FILTER: &str = "arnndn";

/// Denoise failures (always degraded, never propagated to the job)
#[derive(Debug, Error)]
pub enum DenoiseError {
    /// External denoiser could not run or exited unsuccessfully
    #[error("External denoiser failed: {0}")]
    External(#[from] EngineError),

    /// External denoiser "succeeded" without a usable file
    #[error("External denoiser produced no usable output at {0}")]
    MissingOutput(PathBuf),

    /// Neural filter or its model is not available
    #[error("Neural denoise unavailable: {0}")]
    NeuralUnavailable(String),
}

/// What the apply pass should use
#[derive(Debug, Clone, PartialEq)]
pub struct DenoiseResolution {
    /// Input of the apply pass (original input or denoised intermediate)
    pub input_path: PathBuf,
    /// In-engine denoise stage, if any
    pub stage: Option<DenoiseStage>,
    /// Reason the requested method was not honoured as asked
    pub degraded: Option<String>,
    /// Intermediate file owned by this job
    pub intermediate: Option<PathBuf>,
}

impl DenoiseResolution {
    fn in_engine(input: &Path, stage: DenoiseStage) -> Self {
        Self {
            input_path: input.to_path_buf(),
            stage: Some(stage),
            degraded: None,
            intermediate: None,
        }
    }

    fn passthrough(input: &Path, reason: String) -> Self {
        Self {
            input_path: input.to_path_buf(),
            stage: None,
            degraded: Some(reason),
            intermediate: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    /// Remove the intermediate file, if one was produced
    pub async fn cleanup(&self) {
        if let Some(path) = &self.intermediate {
            if let Err(e) = tokio::fs::remove_file(path).await {
                debug!(path = %path.display(), error = %e, "Failed to remove denoised intermediate");
            }
        }
    }
}

/// Removes a partial denoiser output unless it is kept
///
/// Covers the failure branch and a resolve future dropped mid-run by
/// cancellation.
struct IntermediateGuard {
    path: Option<PathBuf>,
}

impl IntermediateGuard {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    fn keep(mut self) -> PathBuf {
        self.path.take().unwrap_or_default()
    }
}

impl Drop for IntermediateGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed partial denoiser output"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove partial denoiser output")
                }
            }
        }
    }
}

/// Resolves denoise methods against the engine and the external denoiser
#[derive(Clone)]
pub struct DenoiseResolver {
    engine: Engine,
    config: DenoiseConfig,
    timeouts: Timeouts,
}

impl DenoiseResolver {
    pub fn new(engine: Engine, config: DenoiseConfig, timeouts: Timeouts) -> Self {
        Self {
            engine,
            config,
            timeouts,
        }
    }

    /// Resolve `method` for one job whose input is `input`
    pub async fn resolve(&self, job_id: Uuid, method: DenoiseMethod, input: &Path) -> DenoiseResolution {
        match method {
            DenoiseMethod::DefaultSpectralFilter => {
                DenoiseResolution::in_engine(input, DenoiseStage::Spectral)
            }
            DenoiseMethod::NeuralDenoise => match self.neural_stage().await {
                Ok(stage) => DenoiseResolution::in_engine(input, stage),
                Err(e) => {
                    warn!(
                        job_id = %job_id,
                        error = %e,
                        "Neural denoise degraded to default spectral filter"
                    );
                    let mut resolution = DenoiseResolution::in_engine(input, DenoiseStage::Spectral);
                    resolution.degraded = Some(e.to_string());
                    resolution
                }
            },
            DenoiseMethod::ExternalSpectralGate => {
                let guard = IntermediateGuard::new(self.intermediate_path(job_id));
                match self.run_external(input, guard.path()).await {
                    Ok(()) => {
                        let output = guard.keep();
                        info!(
                            job_id = %job_id,
                            denoised = %output.display(),
                            "External denoiser finished"
                        );
                        DenoiseResolution {
                            input_path: output.clone(),
                            stage: None,
                            degraded: None,
                            intermediate: Some(output),
                        }
                    }
                    Err(e) => {
                        warn!(
                            job_id = %job_id,
                            error = %e,
                            "External denoiser failed, continuing with original input"
                        );
                        DenoiseResolution::passthrough(input, e.to_string())
                    }
                }
            }
        }
    }

    /// Neural stage, if both the filter and its model are available
    async fn neural_stage(&self) -> Result<DenoiseStage, DenoiseError> {
        let model = self
            .config
            .neural_model_path
            .clone()
            .ok_or_else(|| DenoiseError::NeuralUnavailable("no model path configured".to_string()))?;

        let model_present = tokio::fs::metadata(&model)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !model_present {
            return Err(DenoiseError::NeuralUnavailable(format!(
                "model file {} not found",
                model.display()
            )));
        }

        let available = self
            .engine
            .has_filter(NEURAL_FILTER, self.timeouts.measurement())
            .await
            .map_err(|e| DenoiseError::NeuralUnavailable(format!("filter check failed: {}", e)))?;
        if !available {
            return Err(DenoiseError::NeuralUnavailable(format!(
                "engine has no {} filter",
                NEURAL_FILTER
            )));
        }

        Ok(DenoiseStage::Neural { model_path: model })
    }

    /// Run the external denoiser and check its output
    pub async fn run_external(&self, input: &Path, output: &Path) -> Result<(), DenoiseError> {
        let invocation = self.external_invocation(input, output);
        let result = self
            .engine
            .runner()
            .run(&invocation, self.timeouts.denoiser())
            .await?;

        if !result.success {
            return Err(DenoiseError::External(EngineError::NonZeroExit {
                program: invocation.program,
                code: result.exit_code,
                stderr: result.stderr,
            }));
        }

        let usable = tokio::fs::metadata(output)
            .await
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);
        if !usable {
            return Err(DenoiseError::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }

    /// `<program> [script] --in <in> --out <out> --prop-decrease <p> [--noise <sample>]`
    pub fn external_invocation(&self, input: &Path, output: &Path) -> Invocation {
        let mut args = Vec::new();
        if let Some(script) = &self.config.external_script {
            args.push(script.to_string_lossy().to_string());
        }
        args.push("--in".to_string());
        args.push(input.to_string_lossy().to_string());
        args.push("--out".to_string());
        args.push(output.to_string_lossy().to_string());
        args.push("--prop-decrease".to_string());
        args.push(self.config.prop_decrease.to_string());
        if let Some(noise) = &self.config.noise_sample {
            args.push("--noise".to_string());
            args.push(noise.to_string_lossy().to_string());
        }
        Invocation::new(self.config.external_program.as_str(), args)
    }

    fn intermediate_path(&self, job_id: Uuid) -> PathBuf {
        self.config
            .scratch_dir()
            .join(format!("blinky-{}-denoised.wav", job_id))
    }
}
