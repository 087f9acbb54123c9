//! Worker configuration
//!
//! Resolution order: command line (with `BLINKY_*` env fallbacks via clap)
//! → TOML file → compiled defaults. The TOML file is optional; every section
//! and every key inside a section can be omitted.

use crate::models::ProcessingParameters;
use blinky_common::config::{CompiledDefaults, DataFolderInitializer, DataFolderResolver, LoggingConfig};
use blinky_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Module name used for the default TOML path (`~/.config/blinky/worker.toml`)
pub const MODULE_NAME: &str = "worker";

/// Complete worker configuration (`worker.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Data folder holding the database and the local artifact bucket
    #[serde(default)]
    pub data_folder: Option<PathBuf>,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub denoise: DenoiseConfig,

    #[serde(default)]
    pub processing: ProcessingParameters,

    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(default)]
    pub worker: PoolConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[engine]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

/// `[denoise]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenoiseConfig {
    /// Trained model for the neural denoiser; neural denoise degrades to the
    /// spectral filter when unset or missing
    #[serde(default)]
    pub neural_model_path: Option<PathBuf>,

    /// Program for the external spectral gate
    #[serde(default = "default_external_program")]
    pub external_program: String,

    /// Script passed as the program's first argument, if any
    #[serde(default = "default_external_script")]
    pub external_script: Option<PathBuf>,

    /// Reduction strength, 0..=1
    #[serde(default = "default_prop_decrease")]
    pub prop_decrease: f64,

    /// Optional noise-only clip used to build the noise profile
    #[serde(default)]
    pub noise_sample: Option<PathBuf>,

    /// Where intermediate denoised files are written (system temp dir if unset)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            neural_model_path: None,
            external_program: default_external_program(),
            external_script: default_external_script(),
            prop_decrease: default_prop_decrease(),
            noise_sample: None,
            scratch_dir: None,
        }
    }
}

impl DenoiseConfig {
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// `[timeouts]`, in seconds
///
/// One structure for every bounded sub-operation, passed once into the
/// worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Apply pass
    #[serde(default = "default_apply_secs")]
    pub apply_secs: u64,

    /// External denoiser run
    #[serde(default = "default_denoiser_secs")]
    pub denoiser_secs: u64,

    /// Each measurement run (quality, loudness, probe, capability listing)
    #[serde(default = "default_measurement_secs")]
    pub measurement_secs: u64,

    /// Artifact upload
    #[serde(default = "default_upload_secs")]
    pub upload_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            apply_secs: default_apply_secs(),
            denoiser_secs: default_denoiser_secs(),
            measurement_secs: default_measurement_secs(),
            upload_secs: default_upload_secs(),
        }
    }
}

impl Timeouts {
    pub fn apply(&self) -> Duration {
        Duration::from_secs(self.apply_secs)
    }

    pub fn denoiser(&self) -> Duration {
        Duration::from_secs(self.denoiser_secs)
    }

    pub fn measurement(&self) -> Duration {
        Duration::from_secs(self.measurement_secs)
    }

    pub fn upload(&self) -> Duration {
        Duration::from_secs(self.upload_secs)
    }

    /// All bounds non-zero; apply bound exceeds denoiser + measurement
    pub fn validate(&self) -> Result<()> {
        for (name, secs) in [
            ("apply_secs", self.apply_secs),
            ("denoiser_secs", self.denoiser_secs),
            ("measurement_secs", self.measurement_secs),
            ("upload_secs", self.upload_secs),
        ] {
            if secs == 0 {
                return Err(Error::Config(format!("timeouts.{} must be > 0", name)));
            }
        }

        let floor = self.denoiser_secs.saturating_add(self.measurement_secs);
        if self.apply_secs <= floor {
            return Err(Error::Config(format!(
                "timeouts.apply_secs ({}) must exceed denoiser_secs + measurement_secs ({})",
                self.apply_secs, floor
            )));
        }
        Ok(())
    }
}

/// `[worker]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker tasks
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Bounded job queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Event bus capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// `[storage]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the local bucket (`<data_folder>/artifacts` if unset)
    #[serde(default)]
    pub artifact_root: Option<PathBuf>,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Object keys are `<key_prefix>/<output file name>`
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default = "default_content_type")]
    pub content_type: String,

    #[serde(default = "default_presign_expiry_secs")]
    pub presign_expiry_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            artifact_root: None,
            bucket: default_bucket(),
            key_prefix: default_key_prefix(),
            content_type: default_content_type(),
            presign_expiry_secs: default_presign_expiry_secs(),
        }
    }
}

/// `[database]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file (`<data_folder>/blinky.db` if unset)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// How long a write keeps retrying while the database is locked
    #[serde(default = "default_max_lock_wait_ms")]
    pub max_lock_wait_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_lock_wait_ms: default_max_lock_wait_ms(),
        }
    }
}

/// Values supplied on the command line or through `BLINKY_*` variables
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_folder: Option<PathBuf>,
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,
    pub concurrency: Option<usize>,
    pub neural_model_path: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl WorkerConfig {
    /// Apply command-line overrides (highest priority)
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(path) = overrides.data_folder {
            self.data_folder = Some(path);
        }
        if let Some(path) = overrides.ffmpeg_path {
            self.engine.ffmpeg_path = path;
        }
        if let Some(path) = overrides.ffprobe_path {
            self.engine.ffprobe_path = path;
        }
        if let Some(n) = overrides.concurrency {
            self.worker.concurrency = n;
        }
        if let Some(path) = overrides.neural_model_path {
            self.denoise.neural_model_path = Some(path);
        }
        if let Some(path) = overrides.database_path {
            self.database.path = Some(path);
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }

    /// Validate everything that is fatal at startup
    pub fn validate(&self) -> Result<()> {
        self.timeouts.validate()?;
        self.processing.validate().map_err(Error::Config)?;

        if self.worker.concurrency == 0 {
            return Err(Error::Config("worker.concurrency must be > 0".to_string()));
        }
        if self.worker.queue_capacity == 0 {
            return Err(Error::Config("worker.queue_capacity must be > 0".to_string()));
        }
        if self.worker.event_capacity == 0 {
            return Err(Error::Config("worker.event_capacity must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.denoise.prop_decrease) {
            return Err(Error::Config(format!(
                "denoise.prop_decrease must be within 0..=1, got {}",
                self.denoise.prop_decrease
            )));
        }
        if self.engine.ffmpeg_path.trim().is_empty() || self.engine.ffprobe_path.trim().is_empty() {
            return Err(Error::Config("engine paths must not be empty".to_string()));
        }
        if self.storage.bucket.trim().is_empty() {
            return Err(Error::Config("storage.bucket must not be empty".to_string()));
        }
        Ok(())
    }

    /// Resolve the data folder (CLI > ENV > TOML > compiled default)
    pub fn resolve_data_folder(&self, cli_arg: Option<PathBuf>) -> DataFolderInitializer {
        let folder = DataFolderResolver::new()
            .with_cli_arg(cli_arg)
            .with_toml_value(self.data_folder.clone())
            .resolve();
        DataFolderInitializer::new(folder)
    }

    pub fn database_path(&self, data: &DataFolderInitializer) -> PathBuf {
        self.database.path.clone().unwrap_or_else(|| data.database_path())
    }

    pub fn artifact_root(&self, data: &DataFolderInitializer) -> PathBuf {
        self.storage
            .artifact_root
            .clone()
            .unwrap_or_else(|| data.artifacts_path())
    }

    /// Tracing filter directive derived from the configured level
    pub fn log_filter(&self) -> String {
        let level = if self.logging.level.trim().is_empty() {
            CompiledDefaults::for_current_platform().log_level
        } else {
            self.logging.level.trim().to_string()
        };
        format!("blinky_worker={level},blinky_common={level}")
    }
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_external_program() -> String {
    "python3".to_string()
}

fn default_external_script() -> Option<PathBuf> {
    Some(PathBuf::from("tools/noisereduce_denoise.py"))
}

fn default_prop_decrease() -> f64 {
    1.0
}

fn default_apply_secs() -> u64 {
    300
}

fn default_denoiser_secs() -> u64 {
    120
}

fn default_measurement_secs() -> u64 {
    90
}

fn default_upload_secs() -> u64 {
    120
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_queue_capacity() -> usize {
    512
}

fn default_event_capacity() -> usize {
    100
}

fn default_bucket() -> String {
    "call-audio-bucket".to_string()
}

fn default_key_prefix() -> String {
    "processed".to_string()
}

fn default_content_type() -> String {
    "audio/wav".to_string()
}

fn default_presign_expiry_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_max_lock_wait_ms() -> u64 {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeouts.apply(), Duration::from_secs(300));
        assert_eq!(config.storage.bucket, "call-audio-bucket");
    }

    #[test]
    fn test_zero_capacities_are_rejected() {
        let mut config = WorkerConfig::default();
        config.worker.event_capacity = 0;
        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("event_capacity")));

        let mut config = WorkerConfig::default();
        config.worker.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("queue_capacity")));
    }

    #[test]
    fn test_apply_timeout_must_exceed_sub_operations() {
        let timeouts = Timeouts {
            apply_secs: 210,
            denoiser_secs: 120,
            measurement_secs: 90,
            upload_secs: 60,
        };
        assert!(matches!(timeouts.validate(), Err(Error::Config(_))));

        let timeouts = Timeouts {
            apply_secs: 211,
            ..timeouts
        };
        assert!(timeouts.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let timeouts = Timeouts {
            upload_secs: 0,
            ..Default::default()
        };
        assert!(timeouts.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: WorkerConfig = toml::from_str(
            r#"
            [engine]
            ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"

            [timeouts]
            apply_secs = 600

            [processing]
            target_lufs = -19.0
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.engine.ffprobe_path, "ffprobe");
        assert_eq!(config.timeouts.apply_secs, 600);
        assert_eq!(config.timeouts.denoiser_secs, 120);
        assert_eq!(config.processing.target_lufs, -19.0);
        assert_eq!(config.worker.queue_capacity, 512);
    }

    #[test]
    fn test_overrides_win_over_toml() {
        let mut config: WorkerConfig = toml::from_str(
            r#"
            [worker]
            concurrency = 2

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        config.apply_overrides(ConfigOverrides {
            concurrency: Some(8),
            log_level: Some("debug".to_string()),
            ..Default::default()
        });

        assert_eq!(config.worker.concurrency, 8);
        assert_eq!(config.log_filter(), "blinky_worker=debug,blinky_common=debug");
    }

    #[test]
    fn test_prop_decrease_range() {
        let mut config = WorkerConfig::default();
        config.denoise.prop_decrease = 1.5;
        assert!(config.validate().is_err());
    }
}
