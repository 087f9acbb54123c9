//! Signal-processing engine adapter
//!
//! Every external process the worker starts (ffmpeg, ffprobe, the external
//! denoiser) goes through a [`ProcessRunner`] with a timeout scoped to that
//! single call. The production runner spawns with `kill_on_drop`, so a timed
//! out or cancelled call never leaves an orphaned child behind.

use crate::audio::diagnostics::{DiagnosticsError, DiagnosticsParser, FfmpegTextParser};
use crate::audio::filter_chain::ApplyPass;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// Program not found on the execution path
    #[error("{0} not found on the execution path")]
    BinaryNotFound(String),

    /// Failed to start or wait for the process
    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Process exceeded its time budget and was killed
    #[error("{program} timed out after {}s", timeout.as_secs_f64())]
    TimedOut { program: String, timeout: Duration },

    /// Process exited unsuccessfully; `stderr` is the captured diagnostic text
    #[error("{program} exited with code {code:?}")]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Diagnostic text did not contain what was asked for
    #[error(transparent)]
    Diagnostics(#[from] DiagnosticsError),
}

impl EngineError {
    /// Diagnostic text to record for a failed job
    ///
    /// For a non-zero exit this is the engine's stderr verbatim.
    pub fn diagnostic_text(&self) -> String {
        match self {
            EngineError::NonZeroExit { stderr, .. } if !stderr.trim().is_empty() => stderr.clone(),
            other => other.to_string(),
        }
    }
}

/// Program plus arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Captured process result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs external processes under a timeout
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion. A non-zero exit is *not* an error here; callers
    /// decide whether the diagnostic text is still usable.
    async fn run(&self, invocation: &Invocation, timeout: Duration)
        -> Result<ProcessOutput, EngineError>;
}

/// [`ProcessRunner`] backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<ProcessOutput, EngineError> {
        debug!(program = %invocation.program, args = ?invocation.args, "Spawning process");

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EngineError::BinaryNotFound(invocation.program.clone())
                } else {
                    EngineError::Spawn {
                        program: invocation.program.clone(),
                        source: e,
                    }
                }
            })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| EngineError::Spawn {
                program: invocation.program.clone(),
                source: e,
            })?,
            Err(_) => {
                return Err(EngineError::TimedOut {
                    program: invocation.program.clone(),
                    timeout,
                })
            }
        };

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// The external filter engine (ffmpeg + ffprobe)
#[derive(Clone)]
pub struct Engine {
    runner: Arc<dyn ProcessRunner>,
    parser: Arc<dyn DiagnosticsParser>,
    ffmpeg: String,
    ffprobe: String,
}

impl Engine {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        ffmpeg: impl Into<String>,
        ffprobe: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            parser: Arc::new(FfmpegTextParser::new()),
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Swap the diagnostics parsing strategy
    pub fn with_parser(mut self, parser: Arc<dyn DiagnosticsParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn runner(&self) -> &Arc<dyn ProcessRunner> {
        &self.runner
    }

    pub fn parser(&self) -> &dyn DiagnosticsParser {
        self.parser.as_ref()
    }

    pub fn ffmpeg(&self) -> &str {
        &self.ffmpeg
    }

    /// Check that both binaries can be executed
    ///
    /// Called once at startup; failure is fatal for the worker process.
    pub async fn verify_available(&self, timeout: Duration) -> Result<(), EngineError> {
        for program in [&self.ffmpeg, &self.ffprobe] {
            let output = self
                .runner
                .run(&Invocation::new(program.as_str(), ["-version"]), timeout)
                .await?;
            if !output.success {
                return Err(EngineError::NonZeroExit {
                    program: program.clone(),
                    code: output.exit_code,
                    stderr: output.stderr,
                });
            }
        }
        Ok(())
    }

    /// Run the apply pass; any non-zero exit is a failure
    pub async fn apply(&self, pass: &ApplyPass, timeout: Duration) -> Result<(), EngineError> {
        let invocation = Invocation::new(self.ffmpeg.as_str(), pass.engine_args());
        let output = self.runner.run(&invocation, timeout).await?;
        if !output.success {
            return Err(EngineError::NonZeroExit {
                program: self.ffmpeg.clone(),
                code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(())
    }

    /// Run an analysis-only filter over `path` and return the diagnostic text
    ///
    /// Analysis runs write to the null muxer; the engine may still exit
    /// non-zero while printing a complete summary, so the text is returned
    /// either way.
    pub async fn run_analysis(
        &self,
        path: &Path,
        filter: &str,
        timeout: Duration,
    ) -> Result<String, EngineError> {
        let invocation = Invocation::new(
            self.ffmpeg.as_str(),
            [
                "-hide_banner".to_string(),
                "-nostats".to_string(),
                "-i".to_string(),
                path.to_string_lossy().to_string(),
                "-af".to_string(),
                filter.to_string(),
                "-f".to_string(),
                "null".to_string(),
                "-".to_string(),
            ],
        );
        let output = self.runner.run(&invocation, timeout).await?;
        if !output.success {
            debug!(
                path = %path.display(),
                code = ?output.exit_code,
                "Analysis run exited non-zero, parsing diagnostics anyway"
            );
        }
        Ok(output.stderr)
    }

    /// Filter names this engine build supports
    pub async fn list_filters(&self, timeout: Duration) -> Result<Vec<String>, EngineError> {
        let invocation = Invocation::new(self.ffmpeg.as_str(), ["-hide_banner", "-filters"]);
        let output = self.runner.run(&invocation, timeout).await?;
        let names = self.parser.filter_names(&output.stdout);
        if names.is_empty() && !output.success {
            return Err(EngineError::NonZeroExit {
                program: self.ffmpeg.clone(),
                code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(names)
    }

    pub async fn has_filter(&self, name: &str, timeout: Duration) -> Result<bool, EngineError> {
        Ok(self.list_filters(timeout).await?.iter().any(|f| f == name))
    }

    /// Duration of `path` in seconds
    pub async fn probe_duration(&self, path: &Path, timeout: Duration) -> Result<f64, EngineError> {
        let invocation = Invocation::new(
            self.ffprobe.as_str(),
            [
                "-v".to_string(),
                "error".to_string(),
                "-show_entries".to_string(),
                "format=duration".to_string(),
                "-of".to_string(),
                "default=noprint_wrappers=1:nokey=1".to_string(),
                path.to_string_lossy().to_string(),
            ],
        );
        let output = self.runner.run(&invocation, timeout).await?;
        if !output.success {
            return Err(EngineError::NonZeroExit {
                program: self.ffprobe.clone(),
                code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(self.parser.duration(&output.stdout)?)
    }
}
