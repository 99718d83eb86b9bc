//! Configuration for latexsnip.
//!
//! Settings are read once at startup from an optional JSON file
//! (`~/.config/latexsnip/config.json`), the environment and command-line
//! flags, then frozen into a [`Config`] that is passed by reference to the
//! pipeline components. Precedence: flag > environment > file > default.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::paths;

/// Environment variable holding the Mistral API key.
pub const API_KEY_ENV: &str = "MISTRAL_API_KEY";
/// Environment variable overriding the render output directory.
pub const OUTPUT_DIR_ENV: &str = "LATEXSNIP_OUTPUT_DIR";

pub const DEFAULT_OCR_ENDPOINT: &str = "https://api.mistral.ai/v1/ocr";
pub const DEFAULT_OCR_MODEL: &str = "mistral-ocr-latest";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_DPI: u32 = 300;
const MIN_DPI: u32 = 50;
const MAX_DPI: u32 = 2400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid JSON in config file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to load .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("MISTRAL_API_KEY is not set (export it or add \"api_key\" to the config file)")]
    MissingApiKey,
    #[error("Could not determine the render output directory: {0}")]
    NoOutputDir(String),
    #[error("Invalid value for `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ERROR" => Some(Self::Error),
            "WARN" | "WARNING" => Some(Self::Warn),
            "INFO" => Some(Self::Info),
            "DEBUG" => Some(Self::Debug),
            "TRACE" => Some(Self::Trace),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// On-disk shape of the config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub ocr_endpoint: Option<String>,
    #[serde(default)]
    pub ocr_model: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_image_bytes: Option<u64>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub dpi: Option<u32>,
    #[serde(default)]
    pub open_viewer: Option<bool>,
    #[serde(default)]
    pub notify: Option<bool>,
    #[serde(default)]
    pub capture_command: Option<Vec<String>>,
    #[serde(default)]
    pub log_level: Option<String>,
}

impl RawConfig {
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level.as_deref().and_then(LogLevel::from_str)
    }
}

/// Values supplied on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub output_dir: Option<PathBuf>,
    pub dpi: Option<u32>,
    pub open_viewer: Option<bool>,
    pub notify: Option<bool>,
    pub log_level: Option<LogLevel>,
}

/// Resolved configuration, built once per process.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub ocr_endpoint: String,
    pub ocr_model: String,
    pub request_timeout: Duration,
    pub max_image_bytes: u64,
    pub output_dir: PathBuf,
    pub dpi: u32,
    pub open_viewer: bool,
    pub notify: bool,
    pub capture_command: Option<Vec<String>>,
    pub log_level: LogLevel,
}

/// Reads the config file. A missing file yields defaults; an unreadable or
/// malformed one is an error.
pub fn load_raw_config(path: Option<&Path>) -> Result<RawConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match paths::default_config_path() {
            Some(p) => p,
            None => {
                debug!("No config_dir available, using defaults only");
                return Ok(RawConfig::default());
            }
        },
    };

    if !path.exists() {
        debug!(?path, "Config file does not exist, using defaults");
        return Ok(RawConfig::default());
    }

    let data = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let cfg = serde_json::from_str(&data).map_err(|source| ConfigError::Json {
        path: path.clone(),
        source,
    })?;
    debug!(?path, "Config loaded");
    Ok(cfg)
}

/// Loads `KEY=value` pairs from `.env` into the process environment.
/// Without a path the file is searched for from the working directory
/// upwards. Variables already set are kept. A missing file is not an error.
pub fn load_dotenv(path: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    let loaded = match path {
        Some(p) => dotenvy::from_path(p).map(|()| p.to_path_buf()),
        None => dotenvy::dotenv(),
    };
    match loaded {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Config {
    /// Merges file values, environment lookups and CLI overrides.
    pub fn resolve<F>(raw: RawConfig, env: F, overrides: &Overrides) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = non_empty(env(API_KEY_ENV))
            .or_else(|| non_empty(raw.api_key.clone()))
            .ok_or(ConfigError::MissingApiKey)?;

        let log_level = overrides
            .log_level
            .or_else(|| raw.log_level())
            .unwrap_or_default();

        let output_dir = match overrides.output_dir.clone() {
            Some(dir) => dir,
            None => match non_empty(env(OUTPUT_DIR_ENV)).or_else(|| non_empty(raw.output_dir.clone())) {
                Some(dir) => paths::expand_tilde(&dir).map_err(ConfigError::NoOutputDir)?,
                None => paths::default_renders_dir().map_err(ConfigError::NoOutputDir)?,
            },
        };

        let dpi = overrides.dpi.or(raw.dpi).unwrap_or(DEFAULT_DPI);
        if !(MIN_DPI..=MAX_DPI).contains(&dpi) {
            return Err(ConfigError::InvalidValue {
                key: "dpi",
                reason: format!("{dpi} is outside {MIN_DPI}..={MAX_DPI}"),
            });
        }

        let timeout_secs = raw.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "request_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }

        let max_image_bytes = raw.max_image_bytes.unwrap_or(DEFAULT_MAX_IMAGE_BYTES);
        if max_image_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_image_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }

        let capture_command = match raw.capture_command {
            Some(argv) if argv.is_empty() || argv[0].trim().is_empty() => {
                return Err(ConfigError::InvalidValue {
                    key: "capture_command",
                    reason: "must name a program".to_string(),
                });
            }
            other => other,
        };

        Ok(Self {
            api_key,
            ocr_endpoint: non_empty(raw.ocr_endpoint)
                .unwrap_or_else(|| DEFAULT_OCR_ENDPOINT.to_string()),
            ocr_model: non_empty(raw.ocr_model).unwrap_or_else(|| DEFAULT_OCR_MODEL.to_string()),
            request_timeout: Duration::from_secs(timeout_secs),
            max_image_bytes,
            output_dir,
            dpi,
            open_viewer: overrides.open_viewer.or(raw.open_viewer).unwrap_or(true),
            notify: overrides.notify.or(raw.notify).unwrap_or(true),
            capture_command,
            log_level,
        })
    }
}
