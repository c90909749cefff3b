//! Shared fixtures for the aggregation integration tests
//!
//! Every test gets its own temp directory holding the source files, the data
//! folder and the combined output, so tests never see each other's state.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use localouvert_common::config::{AggregatorConfig, HttpConfig};
use localouvert_ingest::{
    Aggregator, FileDescriptor, FileError, FileList, Frame, LoaderRegistry, Normalizer, RawArtifact,
    TabularNormalizer,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Temp directory with `sources/`, `data/` and `out/combined.parquet`
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::create_dir_all(dir.path().join("sources")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn data_folder(&self) -> PathBuf {
        self.root().join("data")
    }

    pub fn combined_path(&self) -> PathBuf {
        self.root().join("out").join("combined.parquet")
    }

    pub fn errors_path(&self) -> PathBuf {
        self.data_folder().join("errors.json")
    }

    pub fn config(&self) -> AggregatorConfig {
        AggregatorConfig::new(self.data_folder(), self.combined_path())
    }

    /// Write a source file and return its path as a listing url
    pub fn source(&self, name: &str, content: &str) -> String {
        let path = self.root().join("sources").join(name);
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// Listing url of a source that was never written
    pub fn missing_source(&self, name: &str) -> String {
        self.root().join("sources").join(name).to_string_lossy().into_owned()
    }

    pub fn aggregator<N: Normalizer>(&self, files: Vec<FileDescriptor>, normalizer: N) -> Aggregator<N> {
        self.aggregator_with(files, &self.config(), &offline_http(), normalizer)
    }

    pub fn aggregator_with<N: Normalizer>(
        &self,
        files: Vec<FileDescriptor>,
        config: &AggregatorConfig,
        http: &HttpConfig,
        normalizer: N,
    ) -> Aggregator<N> {
        Aggregator::new(FileList::new(files), config, http, LoaderRegistry::with_defaults(), normalizer)
            .expect("Failed to build aggregator")
    }

    /// Number of `norm.parquet` artifacts on disk
    pub fn normalized_count(&self) -> usize {
        std::fs::read_dir(self.data_folder())
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.path().join("norm.parquet").is_file())
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn errors_json(&self) -> serde_json::Value {
        let content = std::fs::read_to_string(self.errors_path()).expect("errors.json missing");
        serde_json::from_str(&content).unwrap()
    }
}

/// No retries, no backoff, no HEAD sniffing
pub fn offline_http() -> HttpConfig {
    HttpConfig::builder()
        .max_retries(0)
        .backoff_factor(0.0)
        .sniff_content_type(false)
        .build()
}

/// Retries without sleeping, for mock servers
pub fn fast_retry_http(max_retries: u32) -> HttpConfig {
    HttpConfig::builder()
        .max_retries(max_retries)
        .backoff_factor(0.0)
        .timeout_secs(10)
        .build()
}

/// Wraps a [`TabularNormalizer`] and counts invocations
#[derive(Debug, Default)]
pub struct CountingNormalizer {
    inner: TabularNormalizer,
    calls: Arc<AtomicUsize>,
}

impl CountingNormalizer {
    pub fn new(inner: TabularNormalizer) -> Self {
        Self {
            inner,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }
}

impl Normalizer for CountingNormalizer {
    fn normalize(&self, file: &FileDescriptor, raw: &RawArtifact<'_>) -> Result<Frame, FileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.normalize(file, raw)
    }
}

/// Declines every file whose url contains `marker`
pub struct RejectingNormalizer {
    pub marker: &'static str,
    pub reason: &'static str,
}

impl Normalizer for RejectingNormalizer {
    fn normalize(&self, file: &FileDescriptor, raw: &RawArtifact<'_>) -> Result<Frame, FileError> {
        if file.url.as_deref().is_some_and(|url| url.contains(self.marker)) {
            return Err(FileError::normalization(self.reason));
        }
        TabularNormalizer::new().normalize(file, raw)
    }
}

/// Fails only in the post-processing hook
pub struct FailingPostProcess;

impl Normalizer for FailingPostProcess {
    fn normalize(&self, file: &FileDescriptor, raw: &RawArtifact<'_>) -> Result<Frame, FileError> {
        TabularNormalizer::new().normalize(file, raw)
    }

    fn post_process(&self, _data_folder: &Path) -> anyhow::Result<()> {
        anyhow::bail!("diagnostics export failed")
    }
}
