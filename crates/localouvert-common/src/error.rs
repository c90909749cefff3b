//! Error types for LocalOuvert

use thiserror::Error;

/// Result type alias for LocalOuvert shared operations
pub type Result<T> = std::result::Result<T, LocalOuvertError>;

/// Main error type for the shared crate
#[derive(Error, Debug)]
pub enum LocalOuvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown aggregator '{0}' in configuration")]
    UnknownAggregator(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}

impl LocalOuvertError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
