//! Error types for the aggregation engine
//!
//! Two levels:
//!
//! - [`FileError`] is scoped to one input file. It never leaves the batch
//!   loop: the engine records its `Display` string in the error log and moves
//!   on to the next file.
//! - [`AggregateError`] aborts a whole run. It is only produced before the
//!   loop starts (unreadable listing, uncreatable folders) or after it
//!   (combination, post-processing).

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for run-level operations
pub type Result<T> = std::result::Result<T, AggregateError>;

/// Classified failure of a single file
///
/// The message is the error log key, so variants carry no path or url.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FileError {
    #[error("URL not specified")]
    MissingSource,

    #[error("Format {0} not supported")]
    UnsupportedFormat(String),

    #[error("Format could not be determined")]
    UndeterminedFormat,

    #[error("HTTP error {0}")]
    Network(u16),

    #[error("Network failure after retries: {0}")]
    Transport(String),

    #[error("Local file not found")]
    LocalFileMissing,

    #[error("Failed to load file: {0}")]
    Load(String),

    #[error("{0}")]
    Normalization(String),

    #[error("Unexpected error: {0}")]
    Unknown(String),
}

impl FileError {
    pub fn load(message: impl Into<String>) -> Self {
        Self::Load(message.into())
    }

    pub fn normalization(message: impl Into<String>) -> Self {
        Self::Normalization(message.into())
    }

    /// Failures worth another attempt: transport errors, 429 and 5xx
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Network(status) => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<std::io::Error> for FileError {
    fn from(err: std::io::Error) -> Self {
        Self::Unknown(err.to_string())
    }
}

impl From<arrow::error::ArrowError> for FileError {
    fn from(err: arrow::error::ArrowError) -> Self {
        Self::Load(err.to_string())
    }
}

/// Failure that aborts an aggregation run
#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    Common(#[from] localouvert_common::LocalOuvertError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot read file list: {0}")]
    FileList(String),

    #[error("Combined dataset not found at {0}, run the aggregation first")]
    CombinedMissing(PathBuf),

    #[error("Post-processing failed: {0}")]
    PostProcess(String),
}

impl AggregateError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_file_error_messages_are_stable_keys() {
        assert_eq!(FileError::MissingSource.to_string(), "URL not specified");
        assert_eq!(
            FileError::UnsupportedFormat("docx".into()).to_string(),
            "Format docx not supported"
        );
        assert_eq!(FileError::Network(404).to_string(), "HTTP error 404");
        assert_eq!(FileError::LocalFileMissing.to_string(), "Local file not found");
        assert_eq!(
            FileError::normalization("Missing columns : a,b").to_string(),
            "Missing columns : a,b"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(FileError::Network(503).is_transient());
        assert!(FileError::Transport("connection reset".into()).is_transient());
        assert!(!FileError::Network(404).is_transient());
        assert!(!FileError::MissingSource.is_transient());
    }

    #[test]
    fn test_io_error_maps_to_unknown() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(FileError::from(io), FileError::Unknown(_)));
    }
}
