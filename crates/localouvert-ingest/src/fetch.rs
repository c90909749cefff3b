//! Content loader: materializes one source into a raw artifact
//!
//! Sources are either `http(s)` urls, fetched with a blocking client and a
//! bounded exponential-backoff retry, or local paths (`file://` accepted).
//! Bytes are stored verbatim; decoding happens at normalization time.

use crate::artifact::write_atomic;
use crate::error::{AggregateError, FileError};
use crate::progress::format_bytes;
use localouvert_common::config::HttpConfig;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Where a source lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Remote(Url),
    Local(PathBuf),
}

impl Source {
    pub fn parse(source: &str) -> Result<Self, FileError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(FileError::MissingSource);
        }
        match Url::parse(source) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Self::Remote(url)),
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(Self::Local)
                .map_err(|_| FileError::LocalFileMissing),
            // single letter schemes are Windows drive prefixes
            Ok(url) if url.scheme().len() > 1 => Err(FileError::Unknown(format!(
                "Unsupported url scheme {}",
                url.scheme()
            ))),
            _ => Ok(Self::Local(PathBuf::from(source))),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

/// Result of [`ContentLoader::fetch_to`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Destination already present, nothing fetched
    Cached,
    Downloaded { bytes: u64 },
}

pub struct ContentLoader {
    client: Client,
    config: HttpConfig,
}

impl ContentLoader {
    pub fn new(config: HttpConfig) -> Result<Self, AggregateError> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Store the source's bytes at `dest` unless it already exists
    pub fn fetch_to(&self, source: &str, dest: &Path) -> Result<FetchOutcome, FileError> {
        if dest.exists() {
            debug!(dest = %dest.display(), "Raw artifact already present");
            return Ok(FetchOutcome::Cached);
        }

        let data = self.fetch_bytes(source)?;
        write_atomic(dest, &data)?;
        info!(url = %source, size = %format_bytes(data.len() as u64), "Downloaded file");
        Ok(FetchOutcome::Downloaded {
            bytes: data.len() as u64,
        })
    }

    pub fn fetch_bytes(&self, source: &str) -> Result<Vec<u8>, FileError> {
        match Source::parse(source)? {
            Source::Remote(url) => self.get_with_retry(&url),
            Source::Local(path) => std::fs::read(&path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => FileError::LocalFileMissing,
                _ => FileError::from(e),
            }),
        }
    }

    /// `Content-Type` announced by a HEAD request, single attempt
    pub fn head_content_type(&self, source: &str) -> Option<String> {
        let Ok(Source::Remote(url)) = Source::parse(source) else {
            return None;
        };
        match self.client.head(url.clone()).send() {
            Ok(response) if response.status().is_success() => response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            Ok(response) => {
                debug!(url = %url, status = response.status().as_u16(), "HEAD request rejected");
                None
            }
            Err(e) => {
                debug!(url = %url, error = %e, "HEAD request failed");
                None
            }
        }
    }

    fn get_with_retry(&self, url: &Url) -> Result<Vec<u8>, FileError> {
        let attempts = self.config.max_retries.saturating_add(1);
        let mut last_error = FileError::Transport("no attempt made".to_string());

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.backoff(attempt - 2);
                if !delay.is_zero() {
                    info!(url = %url, delay_ms = delay.as_millis() as u64, "Retrying download");
                    std::thread::sleep(delay);
                }
            }

            match self.get_once(url) {
                Ok(data) => return Ok(data),
                Err(e) if e.is_transient() => {
                    warn!(url = %url, attempt, attempts, error = %e, "Download attempt failed");
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    fn get_once(&self, url: &Url) -> Result<Vec<u8>, FileError> {
        let response = self.client.get(url.clone()).send().map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FileError::Network(status.as_u16()));
        }

        let body = response.bytes().map_err(transport_error)?;
        Ok(body.to_vec())
    }

    /// Sleep before retry `n` (0-based): `backoff_factor * 2^n`, capped
    fn backoff(&self, retry: u32) -> Duration {
        let secs = self.config.backoff_factor * 2f64.powi(retry.min(32) as i32);
        Duration::from_secs_f64(secs.min(self.config.backoff_max_secs as f64))
    }
}

/// Stable classification of a client failure, without the url
fn transport_error(e: reqwest::Error) -> FileError {
    let full = e.to_string();
    let reason = if e.is_timeout() {
        "timeout".to_string()
    } else if e.is_connect() {
        "connection failed".to_string()
    } else if e.is_redirect() {
        "too many redirects".to_string()
    } else if e.is_body() || e.is_decode() {
        "incomplete response body".to_string()
    } else {
        e.without_url().to_string()
    };
    debug!(error = %full, reason = %reason, "Transport failure");
    FileError::Transport(reason)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn loader() -> ContentLoader {
        ContentLoader::new(HttpConfig::builder().backoff_factor(0.5).backoff_max_secs(3).build()).unwrap()
    }

    #[test]
    fn test_source_parse() {
        assert!(Source::parse("https://www.data.gouv.fr/x.csv").unwrap().is_remote());
        assert_eq!(
            Source::parse("./data/x.csv").unwrap(),
            Source::Local(PathBuf::from("./data/x.csv"))
        );
        assert_eq!(
            Source::parse("file:///tmp/x.csv").unwrap(),
            Source::Local(PathBuf::from("/tmp/x.csv"))
        );
        assert_eq!(Source::parse("  "), Err(FileError::MissingSource));
        assert!(matches!(Source::parse("ftp://ftp.a.fr/x.csv"), Err(FileError::Unknown(_))));
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let loader = loader();
        assert_eq!(loader.backoff(0), Duration::from_millis(500));
        assert_eq!(loader.backoff(1), Duration::from_secs(1));
        assert_eq!(loader.backoff(2), Duration::from_secs(2));
        assert_eq!(loader.backoff(10), Duration::from_secs(3));
    }

    #[test]
    fn test_local_fetch_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.csv");
        std::fs::write(&source, b"a,b\n1,2\n").unwrap();
        let dest = dir.path().join("hash/raw.csv");

        let loader = loader();
        let outcome = loader.fetch_to(source.to_str().unwrap(), &dest).unwrap();
        assert_eq!(outcome, FetchOutcome::Downloaded { bytes: 8 });
        assert_eq!(std::fs::read(&dest).unwrap(), b"a,b\n1,2\n");

        std::fs::remove_file(&source).unwrap();
        assert_eq!(loader.fetch_to(source.to_str().unwrap(), &dest).unwrap(), FetchOutcome::Cached);
    }

    #[test]
    fn test_missing_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("hash/raw.csv");
        let err = loader().fetch_to("/nonexistent/listing.csv", &dest).unwrap_err();
        assert_eq!(err, FileError::LocalFileMissing);
        assert!(!dest.exists());
    }

    /// Url of a loopback port nothing listens on
    fn refused_url(name: &str) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}/{}", port, name)
    }

    #[test]
    fn test_transport_errors_share_one_message() {
        let loader = ContentLoader::new(HttpConfig::builder().max_retries(0).build()).unwrap();
        let a = loader.fetch_bytes(&refused_url("a.csv")).unwrap_err();
        let b = loader.fetch_bytes(&refused_url("b.csv")).unwrap_err();

        assert!(a.is_transient());
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(a, FileError::Transport("connection failed".into()));
        assert!(!a.to_string().contains("127.0.0.1"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(ContentLoader::new(HttpConfig::builder().timeout_secs(0).build()).is_err());
    }
}
