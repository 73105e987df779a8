use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::debug;
use url::Url;

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";

/// Errors raised while resolving the client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("failed to serialize configuration: {0}")]
    Serialize(String),
    #[error("Unsupported configuration format {0:?}. Use 'yaml', 'json' or 'toml'.")]
    UnsupportedFormat(String),
    #[error("Invalid {var} value {value:?}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// On-disk formats understood by [`Config::load_config`] and [`Config::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    /// Picks the format from a file extension.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnsupportedFormat`] for unknown extensions.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        Self::from_name(extension)
    }

    /// Parses a format name (`yaml`, `yml`, `json`, `toml`).
    ///
    /// # Errors
    /// Returns [`ConfigError::UnsupportedFormat`] for unknown names.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Yaml => "teletasker.yaml",
            Self::Json => "teletasker.json",
            Self::Toml => "teletasker.toml",
        }
    }
}

/// Timing of the synchronization layer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Delay between two processing-status queries of one chat.
    pub poll_interval_ms: u64,
    /// Status queries per chain before giving up.
    pub max_poll_attempts: u32,
    /// Age after which a cached task list is treated as absent.
    pub cache_ttl_secs: u64,
    /// Wait before reopening a closed update stream.
    pub reconnect_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            max_poll_attempts: 30,
            cache_ttl_secs: 300,
            reconnect_backoff_ms: 5_000,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    #[must_use]
    pub const fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// Retry policy for requests rejected because of an expired token.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub starting_delay_ms: u64,
    pub multiplier: u32,
    /// Wait after announcing an expired token before retrying.
    pub token_refresh_wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            starting_delay_ms: 1_000,
            multiplier: 2,
            token_refresh_wait_ms: 1_000,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.starting_delay_ms.saturating_mul(factor))
    }

    #[must_use]
    pub const fn token_refresh_wait(&self) -> Duration {
        Duration::from_millis(self.token_refresh_wait_ms)
    }
}

/// Values supplied on the command line; they win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_base_url: Option<Url>,
    pub log_level: Option<String>,
}

/// The main configuration structure for the Teletasker client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the task-extraction backend.
    pub api_base_url: Url,

    /// Logging level used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Directory holding the durable task cache.
    pub cache_dir: PathBuf,

    pub sync: SyncConfig,

    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Config {
    /// Generates a default configuration.
    ///
    /// # Panics
    /// Never: the default base URL is a valid constant.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            api_base_url: Url::parse(DEFAULT_API_BASE_URL).expect("default API URL is valid"),
            log_level: "info".to_string(),
            cache_dir: default_cache_dir(),
            sync: SyncConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// # Arguments
    /// * `config_path` - Optional path to the configuration file.
    /// * `overrides` - Command-line values taking precedence over everything else.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, an environment
    /// variable is malformed, or the resolved configuration is invalid.
    pub fn load_config(
        config_path: Option<PathBuf>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::with_defaults();
        let mut config = defaults.clone();

        if let Some(path) = config_path {
            debug!(path = %path.display(), "loading configuration file");
            let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            config = Self::parse(&content, ConfigFormat::from_path(&path)?).map_err(|err| {
                match err {
                    ConfigError::Parse { message, .. } => ConfigError::Parse {
                        path: path.clone(),
                        message,
                    },
                    other => other,
                }
            })?;
        }

        // Environment variables only fill values still at their defaults
        if config.api_base_url == defaults.api_base_url
            && let Ok(value) = env::var("TELETASKER_API_BASE_URL")
        {
            config.api_base_url =
                Url::parse(&value).map_err(|err| ConfigError::InvalidEnv {
                    var: "TELETASKER_API_BASE_URL",
                    value: value.clone(),
                    reason: err.to_string(),
                })?;
        }
        if config.log_level == defaults.log_level
            && let Ok(value) = env::var("TELETASKER_LOG_LEVEL")
        {
            config.log_level = value;
        }
        if config.cache_dir == defaults.cache_dir
            && let Ok(value) = env::var("TELETASKER_CACHE_DIR")
        {
            config.cache_dir = PathBuf::from(value);
        }
        if config.sync.poll_interval_ms == defaults.sync.poll_interval_ms {
            if let Some(value) = env_millis("TELETASKER_POLL_INTERVAL_MS")? {
                config.sync.poll_interval_ms = value;
            }
        }
        if config.sync.reconnect_backoff_ms == defaults.sync.reconnect_backoff_ms {
            if let Some(value) = env_millis("TELETASKER_RECONNECT_BACKOFF_MS")? {
                config.sync.reconnect_backoff_ms = value;
            }
        }

        if let Some(url) = overrides.api_base_url {
            config.api_base_url = url;
        }
        if let Some(level) = overrides.log_level {
            config.log_level = level;
        }

        config.validate().map_err(ConfigError::Invalid)?;
        debug!(
            api_base_url = %config.api_base_url,
            cache_dir = %config.cache_dir.display(),
            "configuration resolved"
        );
        Ok(config)
    }

    /// Parses a configuration document in the given format.
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] when the document is malformed.
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let parse_error = |message: String| ConfigError::Parse {
            path: PathBuf::new(),
            message,
        };
        match format {
            ConfigFormat::Yaml => serde_yml::from_str(content).map_err(|e| parse_error(e.to_string())),
            ConfigFormat::Json => {
                serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))
            }
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| parse_error(e.to_string())),
        }
    }

    /// Serializes the configuration for a starter file.
    ///
    /// # Errors
    /// Returns [`ConfigError::Serialize`] if the serializer rejects the value.
    pub fn render(&self, format: ConfigFormat) -> Result<String, ConfigError> {
        match format {
            ConfigFormat::Yaml => {
                serde_yml::to_string(self).map_err(|e| ConfigError::Serialize(e.to_string()))
            }
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| ConfigError::Serialize(e.to_string())),
            ConfigFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
            }
        }
    }

    /// Validate the complete configuration.
    ///
    /// # Errors
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !matches!(self.api_base_url.scheme(), "http" | "https") {
            errors.push(format!(
                "API base URL must use http or https, got {}",
                self.api_base_url
            ));
        }
        if self.sync.poll_interval_ms == 0 {
            errors.push("Poll interval must be greater than 0.".to_string());
        }
        if self.sync.cache_ttl_secs == 0 {
            errors.push("Cache TTL must be greater than 0.".to_string());
        }
        if self.retry.max_attempts == 0 {
            errors.push("Retry attempts must be greater than 0.".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn default_cache_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("./.teletasker-cache"),
        |dirs| dirs.cache_dir().join("teletasker"),
    )
}

fn env_millis(var: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|err| ConfigError::InvalidEnv {
                var,
                value,
                reason: err.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
