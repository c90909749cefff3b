//! Configuration management
//!
//! One explicit [`Config`] value is loaded at startup and passed down to the
//! engine. Sources, lowest precedence first: built-in defaults, a YAML file,
//! then `LOCALOUVERT_HTTP_*` environment variables (a `.env` file is honoured).
//!
//! ```yaml
//! http:
//!   max_retries: 5
//!   timeout_secs: 60
//! aggregators:
//!   subventions:
//!     data_folder: /data/subventions/{topic}
//!     combined_filename: /data/subventions/{topic}.parquet
//!     error_flush_every: 50
//! ```

use crate::error::{LocalOuvertError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ============================================================================
// HTTP Defaults
// ============================================================================

/// Retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base of the exponential backoff, in seconds.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 0.3;

/// Upper bound of a single backoff sleep, in seconds.
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 120;

/// Whole-request timeout in seconds (5 minutes, some listings are large).
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_USER_AGENT: &str = concat!("localouvert-ingest/", env!("CARGO_PKG_VERSION"));

/// Default number of processed files between two `errors.json` flushes.
pub const DEFAULT_ERROR_FLUSH_EVERY: usize = 0;

pub const ENV_MAX_RETRIES: &str = "LOCALOUVERT_HTTP_MAX_RETRIES";
pub const ENV_BACKOFF_FACTOR: &str = "LOCALOUVERT_HTTP_BACKOFF_FACTOR";
pub const ENV_TIMEOUT_SECS: &str = "LOCALOUVERT_HTTP_TIMEOUT_SECS";

/// Retry and transport policy of the content loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Retries after the first attempt (0 = single attempt)
    pub max_retries: u32,

    /// Sleep before retry `n` (0-based) is `backoff_factor * 2^n` seconds
    pub backoff_factor: f64,

    pub backoff_max_secs: u64,

    pub timeout_secs: u64,

    pub user_agent: String,

    /// Issue a HEAD request to infer an undeclared format from `Content-Type`
    pub sniff_content_type: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            sniff_content_type: true,
        }
    }
}

impl HttpConfig {
    pub fn builder() -> HttpConfigBuilder {
        HttpConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(LocalOuvertError::config("http.timeout_secs must be greater than 0"));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(LocalOuvertError::config(format!(
                "http.backoff_factor must be a non-negative number, got {}",
                self.backoff_factor
            )));
        }
        if self.user_agent.trim().is_empty() {
            return Err(LocalOuvertError::config("http.user_agent cannot be empty"));
        }
        Ok(())
    }

    /// Apply `LOCALOUVERT_HTTP_*` overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_parse::<u32>(ENV_MAX_RETRIES)? {
            self.max_retries = value;
        }
        if let Some(value) = env_parse::<f64>(ENV_BACKOFF_FACTOR)? {
            self.backoff_factor = value;
        }
        if let Some(value) = env_parse::<u64>(ENV_TIMEOUT_SECS)? {
            self.timeout_secs = value;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct HttpConfigBuilder {
    config: HttpConfig,
}

impl HttpConfigBuilder {
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.config.backoff_factor = factor;
        self
    }

    pub fn backoff_max_secs(mut self, secs: u64) -> Self {
        self.config.backoff_max_secs = secs;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    pub fn sniff_content_type(mut self, sniff: bool) -> Self {
        self.config.sniff_content_type = sniff;
        self
    }

    pub fn build(self) -> HttpConfig {
        self.config
    }
}

/// Paths and cadence of one aggregation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Root of the per-file artifacts (`<data_folder>/<url_hash>/...`)
    pub data_folder: PathBuf,

    /// Combined output; its existence marks the aggregation as complete
    pub combined_filename: PathBuf,

    /// Flush `errors.json` every N processed files, 0 disables
    #[serde(default)]
    pub error_flush_every: usize,
}

impl AggregatorConfig {
    pub fn new(data_folder: impl Into<PathBuf>, combined_filename: impl Into<PathBuf>) -> Self {
        Self {
            data_folder: data_folder.into(),
            combined_filename: combined_filename.into(),
            error_flush_every: DEFAULT_ERROR_FLUSH_EVERY,
        }
    }

    pub fn with_error_flush_every(mut self, every: usize) -> Self {
        self.error_flush_every = every;
        self
    }

    /// Substitute the topic placeholder in both paths.
    ///
    /// Accepts `{topic}` and `%(topic)s`.
    pub fn for_topic(&self, topic: &str) -> Self {
        Self {
            data_folder: substitute_topic(&self.data_folder, topic),
            combined_filename: substitute_topic(&self.combined_filename, topic),
            error_flush_every: self.error_flush_every,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_folder.as_os_str().is_empty() {
            return Err(LocalOuvertError::config("data_folder cannot be empty"));
        }
        if self.combined_filename.as_os_str().is_empty() {
            return Err(LocalOuvertError::config("combined_filename cannot be empty"));
        }
        if has_topic_placeholder(&self.data_folder) || has_topic_placeholder(&self.combined_filename)
        {
            return Err(LocalOuvertError::config(
                "unresolved topic placeholder, call for_topic first",
            ));
        }
        Ok(())
    }
}

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub aggregators: BTreeMap<String, AggregatorConfig>,
}

impl Config {
    /// Load from a YAML file, then apply environment overrides
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_yaml_str(&content)?;
        config.http.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        config.http.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.http.validate()?;
        for (name, aggregator) in &self.aggregators {
            if aggregator.data_folder.as_os_str().is_empty()
                || aggregator.combined_filename.as_os_str().is_empty()
            {
                return Err(LocalOuvertError::config(format!(
                    "aggregator '{}' has an empty path",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn aggregator(&self, name: &str) -> Result<&AggregatorConfig> {
        self.aggregators
            .get(name)
            .ok_or_else(|| LocalOuvertError::UnknownAggregator(name.to_string()))
    }
}

const TOPIC_PLACEHOLDERS: [&str; 2] = ["{topic}", "%(topic)s"];

fn substitute_topic(path: &Path, topic: &str) -> PathBuf {
    let mut raw = path.to_string_lossy().into_owned();
    for placeholder in TOPIC_PLACEHOLDERS {
        raw = raw.replace(placeholder, topic);
    }
    PathBuf::from(raw)
}

fn has_topic_placeholder(path: &Path) -> bool {
    let raw = path.to_string_lossy();
    TOPIC_PLACEHOLDERS.iter().any(|p| raw.contains(p))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| LocalOuvertError::InvalidEnv {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
