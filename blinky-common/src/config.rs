//! Configuration loading and data folder resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing TOML file is never fatal: the service logs a warning and starts
//! with defaults. A TOML file that exists but does not parse is a
//! configuration error.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "BLINKY_CONFIG";

/// Environment variable overriding the data folder
pub const DATA_FOLDER_ENV_VAR: &str = "BLINKY_DATA_FOLDER";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Compiled defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    /// Folder holding the job database and local artifact bucket
    pub data_folder: PathBuf,
    /// Default log level
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            data_folder: default_data_folder(),
            log_level: default_log_level(),
        }
    }
}

/// Get OS-dependent default data folder path
fn default_data_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("blinky"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/blinky"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("blinky"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/blinky"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("blinky"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\blinky"))
    } else {
        PathBuf::from("./blinky_data")
    }
}

/// Default config file location for a module: `<config dir>/blinky/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("blinky").join(format!("{}.toml", module_name)))
}

/// Resolve which config file to read
///
/// CLI argument → `BLINKY_CONFIG` → platform default. Returns `None` only when
/// no platform config directory exists.
pub fn resolve_config_path(cli_arg: Option<&Path>, module_name: &str) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    default_config_path(module_name)
}

/// Load a TOML config file, falling back to defaults when it is absent
pub fn load_toml_config<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        warn!("No config file location available, using built-in defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(
            "Config file {} not found, using built-in defaults",
            path.display()
        );
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Resolves the data folder following the standard priority order
pub struct DataFolderResolver {
    cli_arg: Option<PathBuf>,
    toml_value: Option<PathBuf>,
}

impl DataFolderResolver {
    pub fn new() -> Self {
        Self {
            cli_arg: None,
            toml_value: None,
        }
    }

    /// Command-line override
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Value read from the TOML file
    pub fn with_toml_value(mut self, path: Option<PathBuf>) -> Self {
        self.toml_value = path;
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }
        if let Ok(path) = std::env::var(DATA_FOLDER_ENV_VAR) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }
        if let Some(path) = &self.toml_value {
            return path.clone();
        }
        CompiledDefaults::for_current_platform().data_folder
    }
}

impl Default for DataFolderResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates the data folder layout on startup
pub struct DataFolderInitializer {
    data_folder: PathBuf,
}

impl DataFolderInitializer {
    pub fn new(data_folder: PathBuf) -> Self {
        Self { data_folder }
    }

    /// Create the data folder if missing (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.data_folder.exists() {
            info!("Creating data folder {}", self.data_folder.display());
        }
        std::fs::create_dir_all(&self.data_folder)?;
        Ok(())
    }

    /// Path of the SQLite job database
    pub fn database_path(&self) -> PathBuf {
        self.data_folder.join("blinky.db")
    }

    /// Root directory of the local artifact store
    pub fn artifacts_path(&self) -> PathBuf {
        self.data_folder.join("artifacts")
    }

    pub fn data_folder(&self) -> &Path {
        &self.data_folder
    }
}
