//! On-disk layout of one aggregation
//!
//! ```text
//! <data_folder>/
//! ├── errors.json
//! └── <url_hash>/
//!     ├── raw.<format>
//!     └── norm.parquet
//! ```
//!
//! File existence is the progress ledger, so every artifact is written to a
//! temporary file in the destination directory and renamed into place.

use crate::error::{AggregateError, Result};
use crate::frame::Frame;
use arrow::compute::concat_batches;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const RAW_STEM: &str = "raw";
pub const NORMALIZED_FILENAME: &str = "norm.parquet";
pub const ERRORS_FILENAME: &str = "errors.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    data_folder: PathBuf,
}

impl ArtifactLayout {
    pub fn new(data_folder: impl Into<PathBuf>) -> Self {
        Self {
            data_folder: data_folder.into(),
        }
    }

    pub fn data_folder(&self) -> &Path {
        &self.data_folder
    }

    pub fn artifact_dir(&self, url_hash: &str) -> PathBuf {
        self.data_folder.join(url_hash)
    }

    pub fn raw_path(&self, url_hash: &str, format: &str) -> PathBuf {
        self.artifact_dir(url_hash)
            .join(format!("{}.{}", RAW_STEM, format))
    }

    pub fn normalized_path(&self, url_hash: &str) -> PathBuf {
        self.artifact_dir(url_hash).join(NORMALIZED_FILENAME)
    }

    pub fn errors_path(&self) -> PathBuf {
        self.data_folder.join(ERRORS_FILENAME)
    }

    pub fn ensure_root(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.data_folder)
    }

    /// Hashes that already have a normalized artifact
    pub fn normalized_hashes(&self) -> io::Result<HashSet<String>> {
        Ok(self
            .normalized_artifacts()?
            .iter()
            .filter_map(|path| path.parent()?.file_name()?.to_str().map(String::from))
            .collect())
    }

    /// Every `*/norm.parquet` under the data folder, sorted by path
    pub fn normalized_artifacts(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.data_folder) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut artifacts = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let candidate = entry.path().join(NORMALIZED_FILENAME);
            if candidate.is_file() {
                artifacts.push(candidate);
            }
        }
        artifacts.sort();
        Ok(artifacts)
    }
}

/// Write bytes through a sibling temp file and an atomic rename
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = parent_dir(path);
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Snappy-compressed parquet, written atomically
pub fn write_parquet(path: &Path, frame: &Frame) -> std::result::Result<(), ParquetError> {
    let parent = parent_dir(path);
    std::fs::create_dir_all(parent)?;

    let tmp = NamedTempFile::new_in(parent)?;
    let mut writer = ArrowWriter::try_new(tmp.reopen()?, frame.schema(), Some(writer_properties()))?;
    writer.write(frame.batch())?;
    writer.close()?;

    tmp.persist(path).map_err(|e| ParquetError::External(Box::new(e.error)))?;
    Ok(())
}

/// Read a whole parquet file into one frame
pub fn read_parquet(path: &Path) -> Result<Frame> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let batches = builder
        .build()?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(AggregateError::Arrow)?;
    Ok(Frame::from_batch(concat_batches(&schema, &batches)?))
}

pub(crate) fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build()
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, StringArray};
    use std::sync::Arc;

    #[test]
    fn test_layout_paths() {
        let layout = ArtifactLayout::new("/data/subventions");
        assert_eq!(layout.raw_path("ab12", "csv"), PathBuf::from("/data/subventions/ab12/raw.csv"));
        assert_eq!(
            layout.normalized_path("ab12"),
            PathBuf::from("/data/subventions/ab12/norm.parquet")
        );
        assert_eq!(layout.errors_path(), PathBuf::from("/data/subventions/errors.json"));
    }

    #[test]
    fn test_normalized_listing_ignores_partial_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        assert!(layout.normalized_artifacts().unwrap().is_empty());

        std::fs::create_dir_all(dir.path().join("only_raw")).unwrap();
        std::fs::write(dir.path().join("only_raw/raw.csv"), b"a\n1\n").unwrap();
        write_atomic(&layout.normalized_path("bbb"), b"x").unwrap();
        write_atomic(&layout.normalized_path("aaa"), b"x").unwrap();
        std::fs::write(dir.path().join(ERRORS_FILENAME), b"{}").unwrap();

        let artifacts = layout.normalized_artifacts().unwrap();
        assert_eq!(artifacts, vec![layout.normalized_path("aaa"), layout.normalized_path("bbb")]);
        assert_eq!(
            layout.normalized_hashes().unwrap(),
            HashSet::from(["aaa".to_string(), "bbb".to_string()])
        );
    }

    #[test]
    fn test_missing_data_folder_lists_nothing() {
        let layout = ArtifactLayout::new("/nonexistent/localouvert/data");
        assert!(layout.normalized_artifacts().unwrap().is_empty());
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/raw.json");
        write_atomic(&target, b"[]").unwrap();
        write_atomic(&target, b"[1]").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"[1]");
        assert_eq!(std::fs::read_dir(dir.path().join("nested")).unwrap().count(), 1);
    }

    #[test]
    fn test_parquet_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h/norm.parquet");
        let frame = Frame::from_columns(vec![(
            "nom".into(),
            Arc::new(StringArray::from(vec![Some("Brest"), None])) as ArrayRef,
        )])
        .unwrap();

        write_parquet(&path, &frame).unwrap();
        let read = read_parquet(&path).unwrap();
        assert_eq!(read.num_rows(), 2);
        assert_eq!(read.column("nom").unwrap().null_count(), 1);
    }
}
