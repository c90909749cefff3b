//! Aggregation engine
//!
//! Drives every declared file through download and normalization, then
//! combines whatever succeeded. Progress lives on disk only:
//!
//! - the combined file exists: the run is a no-op
//! - `<hash>/norm.parquet` exists: the file is done
//! - `<hash>/raw.<format>` exists: the download is skipped
//!
//! An interrupted run therefore resumes where it stopped. Per-file failures
//! are recorded in the error log and never abort the batch.

use crate::artifact::{read_parquet, write_parquet, ArtifactLayout};
use crate::combine::{concatenate, CombineStats};
use crate::descriptor::{FileDescriptor, FileList};
use crate::error::{AggregateError, FileError, Result};
use crate::error_log::ErrorLog;
use crate::fetch::{ContentLoader, FetchOutcome};
use crate::frame::Frame;
use crate::loaders::LoaderRegistry;
use crate::normalize::{Normalizer, RawArtifact};
use crate::progress;
use chrono::{DateTime, Utc};
use localouvert_common::config::{AggregatorConfig, HttpConfig};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Combined file was already present, nothing was done
    AlreadyComplete,
    Completed,
}

/// Summary of one [`Aggregator::run`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,

    /// Files in the listing
    pub total_files: usize,

    /// Files without a normalized artifact at start, all attempted
    pub processed: usize,
    pub downloaded: usize,
    pub normalized: usize,
    pub failed: usize,

    /// `None` when there was nothing to combine
    pub combined: Option<CombineStats>,
    pub combined_path: PathBuf,

    pub elapsed: Duration,
}

impl RunReport {
    fn new(status: RunStatus, total_files: usize, combined_path: &Path) -> Self {
        Self {
            status,
            started_at: Utc::now(),
            total_files,
            processed: 0,
            downloaded: 0,
            normalized: 0,
            failed: 0,
            combined: None,
            combined_path: combined_path.to_path_buf(),
            elapsed: Duration::ZERO,
        }
    }
}

/// Read-only view of an aggregation's progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationStatus {
    pub total_files: usize,
    pub normalized: usize,
    pub remaining: usize,
    pub combined_exists: bool,

    /// Last persisted error log
    pub errors: ErrorLog,
}

pub struct Aggregator<N> {
    files: FileList,
    layout: ArtifactLayout,
    output: PathBuf,
    error_flush_every: usize,
    registry: LoaderRegistry,
    loader: ContentLoader,
    normalizer: N,
    show_progress: bool,
    errors: ErrorLog,
}

impl<N: Normalizer> Aggregator<N> {
    /// Validate configuration and create the data and output folders
    pub fn new(
        files: FileList,
        config: &AggregatorConfig,
        http: &HttpConfig,
        registry: LoaderRegistry,
        normalizer: N,
    ) -> Result<Self> {
        config.validate()?;

        let layout = ArtifactLayout::new(&config.data_folder);
        layout.ensure_root()?;
        if let Some(parent) = config.combined_filename.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(Self {
            files,
            layout,
            output: config.combined_filename.clone(),
            error_flush_every: config.error_flush_every,
            registry,
            loader: ContentLoader::new(http.clone())?,
            normalizer,
            show_progress: false,
            errors: ErrorLog::new(),
        })
    }

    /// Draw a progress bar over the per-file loop
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn files(&self) -> &FileList {
        &self.files
    }

    pub fn data_folder(&self) -> &Path {
        self.layout.data_folder()
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Errors collected by the last run of this instance
    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    pub fn normalizer(&self) -> &N {
        &self.normalizer
    }

    /// Declared files without a normalized artifact, in listing order
    pub fn remaining(&self) -> Result<Vec<&FileDescriptor>> {
        let done = self.layout.normalized_hashes()?;
        Ok(self
            .files
            .iter()
            .filter(|file| match file.url_hash {
                Some(ref hash) => !done.contains(hash),
                None => true,
            })
            .collect())
    }

    /// Every normalized artifact on disk, including ones not in this listing
    pub fn normalized_artifacts(&self) -> Result<Vec<PathBuf>> {
        Ok(self.layout.normalized_artifacts()?)
    }

    /// Download, normalize and combine
    ///
    /// Returns early with [`RunStatus::AlreadyComplete`] when the combined
    /// file exists. Only configuration, I/O on the data folder, combination
    /// and post-processing failures are returned as errors.
    #[instrument(skip_all, fields(data_folder = %self.layout.data_folder().display(), files = self.files.len()))]
    pub fn run(&mut self) -> Result<RunReport> {
        let started = Instant::now();

        if self.output.exists() {
            info!(output = %self.output.display(), "Combined dataset already exists, skipping");
            return Ok(RunReport::new(RunStatus::AlreadyComplete, self.files.len(), &self.output));
        }

        let mut report = RunReport::new(RunStatus::Completed, self.files.len(), &self.output);
        self.errors = ErrorLog::new();
        let errors_path = self.layout.errors_path();

        let remaining: Vec<FileDescriptor> = self.remaining()?.into_iter().cloned().collect();
        info!(total = self.files.len(), remaining = remaining.len(), "Starting aggregation");

        let pb = if self.show_progress {
            progress::create_files_progress(remaining.len() as u64, "Processing files")
        } else {
            progress::hidden()
        };

        for file in &remaining {
            match self.process_file(file, &mut report) {
                Ok(()) => report.normalized += 1,
                Err(e) => {
                    warn!(
                        url = file.url.as_deref().unwrap_or(""),
                        format = file.format.as_deref().unwrap_or(""),
                        error = %e,
                        "Failed to process file"
                    );
                    self.errors.record(e.to_string(), file.error_key());
                    report.failed += 1;
                }
            }
            report.processed += 1;
            pb.inc(1);

            if self.error_flush_every > 0 && report.processed % self.error_flush_every == 0 {
                self.errors.flush(&errors_path)?;
            }
        }
        pb.finish_and_clear();
        self.errors.flush(&errors_path)?;

        self.normalizer
            .post_process(self.layout.data_folder())
            .map_err(|e| AggregateError::PostProcess(format!("{:#}", e)))?;

        let artifacts = self.layout.normalized_artifacts()?;
        report.combined = concatenate(&artifacts, &self.output)?;
        if report.combined.is_none() {
            warn!(output = %self.output.display(), "No normalized file to combine, combined dataset not written");
        }

        self.errors.flush(&errors_path)?;

        report.elapsed = started.elapsed();
        info!(
            processed = report.processed,
            downloaded = report.downloaded,
            normalized = report.normalized,
            failed = report.failed,
            elapsed_secs = report.elapsed.as_secs_f64(),
            "Aggregation finished"
        );
        Ok(report)
    }

    /// Progress from disk state, without any network access
    pub fn status(&self) -> Result<AggregationStatus> {
        let remaining = self.remaining()?.len();
        Ok(AggregationStatus {
            total_files: self.files.len(),
            normalized: self.files.len() - remaining,
            remaining,
            combined_exists: self.output.exists(),
            errors: ErrorLog::load(&self.layout.errors_path())?,
        })
    }

    /// Read the combined dataset fully
    pub fn load_combined(&self) -> Result<Frame> {
        if !self.output.exists() {
            return Err(AggregateError::CombinedMissing(self.output.clone()));
        }
        read_parquet(&self.output)
    }

    fn process_file(&self, file: &FileDescriptor, report: &mut RunReport) -> std::result::Result<(), FileError> {
        let url = file.url.as_deref().ok_or(FileError::MissingSource)?;
        let hash = file.url_hash.as_deref().ok_or(FileError::MissingSource)?;
        let format = self.resolve_format(file, url)?;

        let raw_path = self.layout.raw_path(hash, &format);
        if let FetchOutcome::Downloaded { .. } = self.loader.fetch_to(url, &raw_path)? {
            report.downloaded += 1;
        }

        let raw = RawArtifact {
            path: &raw_path,
            format: &format,
            source: Some(url),
            registry: &self.registry,
        };
        let frame = self.normalizer.normalize(file, &raw)?;

        write_parquet(&self.layout.normalized_path(hash), &frame)
            .map_err(|e| FileError::Unknown(format!("cannot write normalized file: {}", e)))?;
        debug!(url = %url, rows = frame.num_rows(), "Normalized artifact written");
        Ok(())
    }

    /// Declared format, else url extension, else `Content-Type`
    fn resolve_format(&self, file: &FileDescriptor, url: &str) -> std::result::Result<String, FileError> {
        if let Some(ref tag) = file.format {
            self.registry.resolve(tag)?;
            return Ok(tag.clone());
        }

        if let Some((tag, _)) = self.registry.resolve_for_url(url) {
            debug!(url = %url, format = %tag, "Format inferred from extension");
            return Ok(tag);
        }

        if self.loader.config().sniff_content_type {
            if let Some(content_type) = self.loader.head_content_type(url) {
                if let Some((tag, _)) = self.registry.resolve_media_type(&content_type) {
                    debug!(url = %url, format = %tag, content_type = %content_type, "Format inferred from content type");
                    return Ok(tag);
                }
            }
        }

        Err(FileError::UndeterminedFormat)
    }
}
