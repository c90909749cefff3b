//! Declared input files
//!
//! A [`FileList`] is built once from the caller's listing and never changes
//! during a run. Each row becomes a [`FileDescriptor`] with three well-known
//! fields plus an open metadata bag for the normalizer.

use crate::frame::Frame;
use localouvert_common::checksum::url_hash;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

pub const URL_COLUMN: &str = "url";
pub const FORMAT_COLUMN: &str = "format";
pub const URL_HASH_COLUMN: &str = "url_hash";

/// One row of the input listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub url: Option<String>,

    /// Lowercased format tag, `None` when the listing leaves it blank
    pub format: Option<String>,

    /// Artifact key, filled from `url` when the listing does not supply it
    pub url_hash: Option<String>,

    /// Every other column of the listing
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,

    /// Row index in the input listing
    #[serde(default)]
    pub position: usize,
}

impl FileDescriptor {
    pub fn new(url: impl Into<String>, format: impl Into<String>) -> Self {
        let url = non_blank(Some(url.into()));
        Self {
            url_hash: url_hash(url.as_deref()),
            url,
            format: normalize_format(Some(format.into())),
            metadata: BTreeMap::new(),
            position: 0,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Look up a field by listing column name, well-known fields included
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            URL_COLUMN => self.url.clone().map(Value::String),
            FORMAT_COLUMN => self.format.clone().map(Value::String),
            URL_HASH_COLUMN => self.url_hash.clone().map(Value::String),
            other => self.metadata.get(other).filter(|v| !v.is_null()).cloned(),
        }
    }

    /// Text rendering of [`get`](Self::get)
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).map(|value| match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    /// Value recorded in the error log for this file
    pub fn error_key(&self) -> String {
        self.url
            .clone()
            .or_else(|| self.url_hash.clone())
            .unwrap_or_else(|| format!("row {}", self.position))
    }

    fn fill_hash(&mut self) {
        if self.url_hash.is_none() {
            self.url_hash = url_hash(self.url.as_deref());
        }
    }
}

/// Ordered, hash-unique set of descriptors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileList {
    files: Vec<FileDescriptor>,
}

impl FileList {
    /// Fill missing hashes and drop repeated `url_hash` rows, first wins
    pub fn new(files: Vec<FileDescriptor>) -> Self {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(files.len());

        for mut file in files {
            file.fill_hash();
            if let Some(ref hash) = file.url_hash {
                if !seen.insert(hash.clone()) {
                    warn!(
                        url_hash = %hash,
                        url = file.url.as_deref().unwrap_or(""),
                        position = file.position,
                        "Duplicate url_hash in file list, keeping first occurrence"
                    );
                    continue;
                }
            }
            kept.push(file);
        }

        Self { files: kept }
    }

    /// Convert a decoded listing, one descriptor per row
    pub fn from_frame(frame: &Frame) -> Result<Self, arrow::error::ArrowError> {
        let names = frame.column_names();
        let mut columns = Vec::with_capacity(names.len());
        for name in &names {
            columns.push(frame.utf8_values(name)?.unwrap_or_default());
        }

        let files = (0..frame.num_rows())
            .map(|row| {
                let mut file = FileDescriptor {
                    url: None,
                    format: None,
                    url_hash: None,
                    metadata: BTreeMap::new(),
                    position: row,
                };
                for (name, values) in names.iter().zip(&columns) {
                    let value = non_blank(values.get(row).cloned().flatten());
                    match name.as_str() {
                        URL_COLUMN => file.url = value,
                        FORMAT_COLUMN => file.format = normalize_format(value),
                        URL_HASH_COLUMN => file.url_hash = value,
                        other => {
                            file.metadata
                                .insert(other.to_string(), value.map(Value::String).unwrap_or(Value::Null));
                        }
                    }
                }
                file
            })
            .collect();

        Ok(Self::new(files))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileDescriptor> {
        self.files.iter()
    }

    pub fn as_slice(&self) -> &[FileDescriptor] {
        &self.files
    }
}

impl FromIterator<FileDescriptor> for FileList {
    fn from_iter<I: IntoIterator<Item = FileDescriptor>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a FileList {
    type Item = &'a FileDescriptor;
    type IntoIter = std::slice::Iter<'a, FileDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("nan"))
}

fn normalize_format(value: Option<String>) -> Option<String> {
    non_blank(value).map(|v| v.trim_start_matches('.').to_lowercase())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn listing() -> Frame {
        let header: Vec<String> = ["url", "format", "url_hash", "title"].iter().map(|s| s.to_string()).collect();
        let row = |url: Option<&str>, format: &str, hash: Option<&str>, title: &str| {
            vec![
                url.map(String::from),
                Some(format.to_string()),
                hash.map(String::from),
                Some(title.to_string()),
            ]
        };
        Frame::from_utf8_rows(
            &header,
            &[
                row(Some("https://a.fr/1.csv"), "CSV", None, "first"),
                row(Some("https://a.fr/2.json"), "json", Some("given"), "second"),
                row(None, "csv", None, "no url"),
                row(Some("https://a.fr/1.csv"), "csv", None, "duplicate"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_from_frame_fills_hash_and_dedupes() {
        let files = FileList::from_frame(&listing()).unwrap();
        assert_eq!(files.len(), 3);

        let first = &files.as_slice()[0];
        assert_eq!(first.format.as_deref(), Some("csv"));
        assert_eq!(first.url_hash, url_hash(Some("https://a.fr/1.csv")));
        assert_eq!(first.get_str("title").as_deref(), Some("first"));

        assert_eq!(files.as_slice()[1].url_hash.as_deref(), Some("given"));
    }

    #[test]
    fn test_missing_url_has_null_hash() {
        let files = FileList::from_frame(&listing()).unwrap();
        let no_url = &files.as_slice()[2];
        assert_eq!(no_url.url, None);
        assert_eq!(no_url.url_hash, None);
        assert_eq!(no_url.error_key(), "row 2");
    }

    #[test]
    fn test_nan_url_is_missing() {
        let file = FileDescriptor::new("NaN", "csv");
        assert_eq!(file.url, None);
        assert_eq!(file.url_hash, None);
    }

    #[test]
    fn test_get_known_fields_and_metadata() {
        let file = FileDescriptor::new("https://a.fr/x.xml", ".XML").with_metadata("annee", 2023);
        assert_eq!(file.format.as_deref(), Some("xml"));
        assert_eq!(file.get_str("url").as_deref(), Some("https://a.fr/x.xml"));
        assert_eq!(file.get_str("annee").as_deref(), Some("2023"));
        assert_eq!(file.get("missing"), None);
        assert_eq!(file.error_key(), "https://a.fr/x.xml");
    }
}
