//! Configuration for scribed paths and tuning.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (SCRIBED_HOME, SCRIBED_DB, SCRIBED_ENGINE,
//!    SCRIBED_MODEL, SCRIBED_FFPROBE)
//! 2. Config file (.scribed/config.yaml)
//! 3. Defaults (~/.scribed)
//!
//! Config file discovery:
//! - Searches current directory and parents for .scribed/config.yaml
//! - Relative paths in the config file resolve against the config file's
//!   parent directory

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub transcription: Option<TranscriptionConfig>,
    #[serde(default)]
    pub watcher: Option<WatcherFileConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to config file)
    pub home: Option<String>,
    /// Database file
    pub db: Option<String>,
    /// Transcription engine binary
    pub engine: Option<String>,
    /// Speech model file
    pub model: Option<String>,
    /// ffprobe binary
    pub ffprobe: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionConfig {
    pub timeout_seconds: Option<u64>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherFileConfig {
    pub debounce_ms: Option<u64>,
    pub retry_delay_ms: Option<u64>,
    pub max_retry_attempts: Option<u32>,
}

/// Resolved configuration with absolute paths and tuning values.
#[derive(Debug, Clone)]
pub struct Config {
    /// State directory
    pub home: PathBuf,
    /// SQLite database file
    pub db_path: PathBuf,
    /// Transcription engine binary
    pub engine_path: PathBuf,
    /// Speech model file
    pub model_path: PathBuf,
    /// ffprobe binary (bare name resolves via PATH)
    pub ffprobe_path: PathBuf,
    /// Hard wall-clock bound on one transcription job
    pub transcription_timeout: Duration,
    /// Default language when a request does not name one
    pub language: String,
    /// Filesystem event coalescing window
    pub debounce: Duration,
    /// Fixed delay between ingestion retries
    pub retry_delay: Duration,
    /// Total ingestion attempts per path before giving up
    pub max_retry_attempts: u32,
    /// Event bus channel capacity
    pub bus_capacity: usize,
    /// Path to config file (if one was found)
    pub config_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from env vars, config file and defaults.
    pub fn load() -> Result<Self> {
        let default_home = dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".scribed");

        let config_file = find_config_file();
        let file = match config_file {
            Some(ref path) => Some(load_config_file(path)?),
            None => None,
        };

        Ok(Self::resolve(default_home, config_file, file))
    }

    /// Configuration rooted at an explicit state directory, ignoring env
    /// vars and config files. Used by tests and the `--home` flag.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self::defaults(home.into())
    }

    fn defaults(home: PathBuf) -> Self {
        Self {
            db_path: home.join("scribed.db"),
            engine_path: PathBuf::from("/usr/local/bin/whisper"),
            model_path: home.join("models").join("ggml-base.en.bin"),
            ffprobe_path: PathBuf::from("ffprobe"),
            transcription_timeout: Duration::from_secs(3600),
            language: "en".to_string(),
            debounce: Duration::from_millis(1000),
            retry_delay: Duration::from_millis(5000),
            max_retry_attempts: 3,
            bus_capacity: 256,
            config_file: None,
            home,
        }
    }

    fn resolve(
        default_home: PathBuf,
        config_path: Option<PathBuf>,
        file: Option<ConfigFile>,
    ) -> Self {
        // Base for relative paths in the file: the .scribed/ directory.
        let base_dir = config_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf);

        let file_paths = file.as_ref().map(|f| f.paths.clone()).unwrap_or_default();

        let home = env_path("SCRIBED_HOME")
            .or_else(|| resolve_file_path(&base_dir, file_paths.home.as_deref()))
            .unwrap_or(default_home);

        let mut config = Self::defaults(home);
        config.config_file = config_path;

        if let Some(db) =
            env_path("SCRIBED_DB").or_else(|| resolve_file_path(&base_dir, file_paths.db.as_deref()))
        {
            config.db_path = db;
        }
        if let Some(engine) = env_path("SCRIBED_ENGINE")
            .or_else(|| resolve_file_path(&base_dir, file_paths.engine.as_deref()))
        {
            config.engine_path = engine;
        }
        if let Some(model) = env_path("SCRIBED_MODEL")
            .or_else(|| resolve_file_path(&base_dir, file_paths.model.as_deref()))
        {
            config.model_path = model;
        }
        if let Some(ffprobe) = env_path("SCRIBED_FFPROBE")
            .or_else(|| resolve_file_path(&base_dir, file_paths.ffprobe.as_deref()))
        {
            config.ffprobe_path = ffprobe;
        }

        if let Some(t) = file.as_ref().and_then(|f| f.transcription.as_ref()) {
            if let Some(secs) = t.timeout_seconds {
                config.transcription_timeout = Duration::from_secs(secs);
            }
            if let Some(ref lang) = t.language {
                config.language = lang.clone();
            }
        }

        if let Some(w) = file.as_ref().and_then(|f| f.watcher.as_ref()) {
            if let Some(ms) = w.debounce_ms {
                config.debounce = Duration::from_millis(ms);
            }
            if let Some(ms) = w.retry_delay_ms {
                config.retry_delay = Duration::from_millis(ms);
            }
            if let Some(attempts) = w.max_retry_attempts {
                config.max_retry_attempts = attempts;
            }
        }

        config
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var(var).ok().map(PathBuf::from)
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".scribed").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_file_path(base: &Option<PathBuf>, path_str: Option<&str>) -> Option<PathBuf> {
    let path_str = path_str?;
    let path = PathBuf::from(path_str);

    if path.is_absolute() {
        return Some(path);
    }

    match base {
        Some(base) => Some(base.join(path)),
        None => Some(path),
    }
}
