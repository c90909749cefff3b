//! Per-run failure record
//!
//! Maps an error message to the sources that produced it, in encounter
//! order. Serialized as a plain JSON object:
//!
//! ```json
//! { "HTTP error 404": ["https://a.fr/x.csv"], "Format docx not supported": ["https://a.fr/y.docx"] }
//! ```
//!
//! Purely diagnostic: nothing reads it back to decide what to process.

use crate::artifact::write_atomic;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorLog {
    entries: BTreeMap<String, Vec<String>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, message: impl Into<String>, source: impl Into<String>) {
        self.entries.entry(message.into()).or_default().push(source.into());
    }

    pub fn get(&self, message: &str) -> Option<&[String]> {
        self.entries.get(message).map(Vec::as_slice)
    }

    /// Number of distinct messages
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_failures(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Persist as pretty JSON, replacing any previous file atomically
    pub fn flush(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)?;
        Ok(())
    }

    /// Read a persisted log; a missing file is an empty log
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(content) => Ok(serde_json::from_slice(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }
}
