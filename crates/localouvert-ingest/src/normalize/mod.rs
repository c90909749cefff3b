//! Per-file normalization
//!
//! The engine calls a [`Normalizer`] once per downloaded file and persists
//! whatever frame it returns. Implementations must only depend on the file's
//! descriptor and raw bytes so that files stay independent and a rerun
//! produces the same artifact.
//!
//! [`TabularNormalizer`] covers the common case: decode through the loader
//! registry, run a chain of [`transforms`], validate the resulting columns and
//! tag rows with source metadata.

pub mod transforms;

use crate::descriptor::FileDescriptor;
use crate::error::FileError;
use crate::frame::Frame;
use crate::loaders::{LoadOptions, LoaderRegistry};
use regex::Regex;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

pub use transforms::FrameTransform;

/// Downloaded file handed to a normalizer
#[derive(Debug, Clone, Copy)]
pub struct RawArtifact<'a> {
    pub path: &'a Path,

    /// Resolved format tag
    pub format: &'a str,

    /// Url the bytes came from
    pub source: Option<&'a str>,

    pub registry: &'a LoaderRegistry,
}

impl RawArtifact<'_> {
    pub fn read_bytes(&self) -> Result<Vec<u8>, FileError> {
        std::fs::read(self.path).map_err(FileError::from)
    }

    /// Decode with the loader registered for this artifact's format
    pub fn decode(&self, options: &LoadOptions) -> Result<Frame, FileError> {
        let data = self.read_bytes()?;
        self.registry.decode(self.format, &data, options, self.source)
    }
}

/// Extension point turning one raw file into a normalized frame
pub trait Normalizer {
    /// Produce the normalized frame, or decline the file with a reason
    fn normalize(&self, file: &FileDescriptor, raw: &RawArtifact<'_>) -> Result<Frame, FileError>;

    /// Called once after the batch loop, before combination
    ///
    /// Meant for side artifacts such as diagnostic counters.
    fn post_process(&self, _data_folder: &Path) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<N: Normalizer + ?Sized> Normalizer for &N {
    fn normalize(&self, file: &FileDescriptor, raw: &RawArtifact<'_>) -> Result<Frame, FileError> {
        (**self).normalize(file, raw)
    }

    fn post_process(&self, data_folder: &Path) -> anyhow::Result<()> {
        (**self).post_process(data_folder)
    }
}

impl<N: Normalizer + ?Sized> Normalizer for Box<N> {
    fn normalize(&self, file: &FileDescriptor, raw: &RawArtifact<'_>) -> Result<Frame, FileError> {
        (**self).normalize(file, raw)
    }

    fn post_process(&self, data_folder: &Path) -> anyhow::Result<()> {
        (**self).post_process(data_folder)
    }
}

/// Decode, transform, validate, project, tag
#[derive(Default)]
pub struct TabularNormalizer {
    options: LoadOptions,
    transforms: Vec<FrameTransform>,
    required_columns: Vec<String>,
    /// Target schema, in output order; empty keeps every column
    official_columns: Vec<String>,
    ignored_columns: Vec<String>,
    ignored_patterns: Vec<Regex>,
    metadata_columns: Vec<String>,
}

impl fmt::Debug for TabularNormalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TabularNormalizer")
            .field("options", &self.options)
            .field("transforms", &self.transforms.len())
            .field("required_columns", &self.required_columns)
            .field("official_columns", &self.official_columns)
            .field("ignored_columns", &self.ignored_columns)
            .field("ignored_patterns", &self.ignored_patterns)
            .field("metadata_columns", &self.metadata_columns)
            .finish()
    }
}

impl TabularNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    /// Append a transform; transforms run in insertion order
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Frame) -> Result<Frame, FileError> + Send + Sync + 'static,
    {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn with_required_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Columns of the target schema
    ///
    /// Once set, a file with any other column is declined unless that column
    /// is ignored, and the output keeps only the official columns it has, in
    /// this order.
    pub fn with_official_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.official_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Columns dropped silently instead of counting as extra
    pub fn with_ignored_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn with_ignored_column_patterns<I>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = Regex>,
    {
        self.ignored_patterns.extend(patterns);
        self
    }

    /// Descriptor fields copied onto every row (`url`, `url_hash`, or any listing column)
    pub fn with_metadata_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    fn check_columns(&self, frame: &Frame) -> Result<(), FileError> {
        if frame.num_columns() == 0 {
            return Err(FileError::normalization("No columns found"));
        }
        if frame.duplicate_column().is_some() {
            return Err(FileError::normalization("Data with duplicate columns"));
        }

        let mut missing: Vec<&str> = self
            .required_columns
            .iter()
            .filter(|column| !frame.has_column(column))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            missing.sort_unstable();
            missing.dedup();
            return Err(FileError::normalization(format!("Missing columns : {}", missing.join(","))));
        }
        Ok(())
    }

    fn is_ignored(&self, column: &str) -> bool {
        self.ignored_columns.iter().any(|ignored| ignored == column)
            || self.ignored_patterns.iter().any(|pattern| pattern.is_match(column))
    }

    /// Decline unknown columns, then keep the official ones in schema order
    fn project_official(&self, frame: Frame, source: Option<&str>) -> Result<Frame, FileError> {
        if self.official_columns.is_empty() {
            return Ok(frame);
        }

        let extra: Vec<String> = frame
            .column_names()
            .into_iter()
            .filter(|column| !self.official_columns.contains(column) && !self.is_ignored(column))
            .collect();
        if !extra.is_empty() {
            warn!(url = source.unwrap_or(""), extra = ?extra, "File has extra columns");
            return Err(FileError::normalization("File has extra columns"));
        }

        let kept: Vec<&str> = self
            .official_columns
            .iter()
            .map(String::as_str)
            .filter(|column| frame.has_column(column))
            .collect();
        Ok(frame.select(&kept)?)
    }
}

impl Normalizer for TabularNormalizer {
    fn normalize(&self, file: &FileDescriptor, raw: &RawArtifact<'_>) -> Result<Frame, FileError> {
        let mut frame = raw.decode(&self.options)?;
        for transform in &self.transforms {
            frame = transform(frame)?;
        }

        self.check_columns(&frame)?;
        let mut frame = self.project_official(frame, file.url.as_deref())?;

        for column in &self.metadata_columns {
            frame = frame.with_constant_utf8(column, file.get_str(column).as_deref())?;
        }

        debug!(
            url_hash = file.url_hash.as_deref().unwrap_or(""),
            rows = frame.num_rows(),
            columns = frame.num_columns(),
            "Normalized file"
        );
        Ok(frame)
    }
}
