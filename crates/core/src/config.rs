//! TOML-based configuration for notemerge.
//!
//! Every section is optional; an empty file yields a working configuration
//! that runs the bundled merge script and serves on localhost.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Resolution engine behaviour.
    #[serde(default)]
    pub engine: EngineConfig,

    /// External merge producer invocation.
    #[serde(default)]
    pub producer: ProducerConfig,

    /// HTTP server settings.
    #[serde(default)]
    pub web: WebConfig,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// How sites with several competing alternatives are resolved.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlternativePolicy {
    /// Only alternative 0 can be taken; other indices are rejected.
    #[default]
    FirstOnly,
    /// The caller picks which alternative `incoming` / `both` use.
    PerAlternative,
}

impl std::fmt::Display for AlternativePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FirstOnly => write!(f, "first_only"),
            Self::PerAlternative => write!(f, "per_alternative"),
        }
    }
}

/// Resolution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub alternative_policy: AlternativePolicy,

    /// Capacity of the engine's event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

pub(crate) fn default_event_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            alternative_policy: AlternativePolicy::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// How to invoke the external merge producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Executable to run (default `python3`).
    #[serde(default = "default_producer_command")]
    pub command: String,

    /// Arguments passed before any per-request inputs.
    #[serde(default = "default_producer_args")]
    pub args: Vec<String>,

    /// Working directory for the process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// File holding the merge result after a successful run. An empty path
    /// reads the payload from stdout instead.
    #[serde(default = "default_output_file")]
    pub output_file: Option<PathBuf>,

    /// Seconds before the run is abandoned.
    #[serde(default = "default_producer_timeout")]
    pub timeout_secs: u64,
}

fn default_producer_command() -> String {
    "python3".into()
}
fn default_producer_args() -> Vec<String> {
    vec!["merging/test_client.py".into()]
}
fn default_output_file() -> Option<PathBuf> {
    Some(PathBuf::from("merged_results.json"))
}
fn default_producer_timeout() -> u64 {
    300
}

impl ProducerConfig {
    /// The configured output file, or `None` when the payload comes on stdout.
    pub fn payload_file(&self) -> Option<&Path> {
        self.output_file
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            command: default_producer_command(),
            args: default_producer_args(),
            working_dir: None,
            output_file: default_output_file(),
            timeout_secs: default_producer_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Web
// ---------------------------------------------------------------------------

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Listen address (default `127.0.0.1:5001`).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Maximum accepted request body in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_listen() -> String {
    "127.0.0.1:5001".into()
}
fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Tracing filter directive: trace, debug, info, warn, error, or a full
    /// `EnvFilter` expression.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.producer.command.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "producer.command".into(),
                detail: "producer command must not be empty".into(),
            });
        }
        if self.producer.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "producer.timeout_secs".into(),
                detail: "timeout must be > 0".into(),
            });
        }
        if self.web.listen.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "web.listen".into(),
                detail: format!("'{}' is not a socket address", self.web.listen),
            });
        }
        if self.web.max_body_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "web.max_body_bytes".into(),
                detail: "body limit must be > 0".into(),
            });
        }
        if self.engine.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.event_capacity".into(),
                detail: "event channel capacity must be > 0".into(),
            });
        }
        if self.logging.log_level.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "logging.log_level".into(),
                detail: "log level must not be empty".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}
