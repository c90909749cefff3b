//! Format loaders and their registry
//!
//! A [`Loader`] turns raw bytes into a [`Frame`]. The [`LoaderRegistry`] maps
//! format tags (`"csv"`, `"json"`, ...) to loaders and can also pick one from
//! a url's extension or an HTTP `Content-Type`.
//!
//! Registration is explicit:
//!
//! ```
//! use localouvert_ingest::loaders::LoaderRegistry;
//!
//! let registry = LoaderRegistry::with_defaults();
//! assert!(registry.supports("CSV"));
//! assert!(!registry.supports("docx"));
//! ```

pub mod csv;
pub mod excel;
pub mod json;
pub mod parquet;
pub mod xml;
pub mod zip;

use crate::error::FileError;
use crate::frame::Frame;
use arrow::datatypes::DataType;
use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

pub use self::csv::CsvLoader;
pub use self::excel::ExcelLoader;
pub use self::json::JsonLoader;
pub use self::parquet::ParquetLoader;
pub use self::xml::XmlLoader;
pub use self::zip::ZipLoader;

/// Decoder of one family of formats
pub trait Loader: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Tags and file extensions this loader claims by default
    fn extensions(&self) -> &'static [&'static str];

    /// Case-insensitive regex matched against an HTTP `Content-Type`
    fn media_type_pattern(&self) -> Option<&'static str> {
        None
    }

    /// Decode a complete payload
    fn load(&self, data: &[u8], ctx: &LoadContext<'_>) -> Result<Frame, FileError>;
}

/// Caller-supplied decoding hints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOptions {
    /// Keep only these columns (those absent from the file are ignored)
    pub columns: Option<Vec<String>>,

    /// Target types; values that cannot be converted become null
    pub dtypes: BTreeMap<String, DataType>,

    /// Read the records under this top-level key of a JSON object
    pub json_key: Option<String>,

    /// Skip delimiter sniffing for CSV
    pub csv_delimiter: Option<u8>,
}

impl LoadOptions {
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_dtype(mut self, column: impl Into<String>, dtype: DataType) -> Self {
        self.dtypes.insert(column.into(), dtype);
        self
    }

    pub fn with_json_key(mut self, key: impl Into<String>) -> Self {
        self.json_key = Some(key.into());
        self
    }

    pub fn with_csv_delimiter(mut self, delimiter: u8) -> Self {
        self.csv_delimiter = Some(delimiter);
        self
    }

    /// Apply the column subset, then the dtype hints
    pub fn apply(&self, frame: Frame) -> Result<Frame, FileError> {
        let mut frame = match self.columns {
            Some(ref wanted) => {
                let names = frame.column_names();
                let keep: Vec<&str> = names
                    .iter()
                    .filter(|name| wanted.contains(name))
                    .map(String::as_str)
                    .collect();
                frame.select(&keep)?
            }
            None => frame,
        };

        for (column, dtype) in &self.dtypes {
            if frame.has_column(column) {
                frame = frame.cast_column(column, dtype)?;
            }
        }
        Ok(frame)
    }
}

/// Everything a loader may need besides the bytes
pub struct LoadContext<'a> {
    pub options: &'a LoadOptions,

    /// For container formats that dispatch their members
    pub registry: &'a LoaderRegistry,

    /// Url or path the bytes came from, when known
    pub source: Option<&'a str>,
}

struct MediaTypeRule {
    pattern: Regex,
    tag: String,
    loader: Arc<dyn Loader>,
}

/// Format tag to loader map
#[derive(Clone, Default)]
pub struct LoaderRegistry {
    loaders: BTreeMap<String, Arc<dyn Loader>>,
    media_types: Vec<Arc<MediaTypeRule>>,
}

impl fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

impl LoaderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// CSV, JSON, Parquet, XML and ZIP under their usual extensions
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_default(Arc::new(CsvLoader));
        registry.register_default(Arc::new(ExcelLoader));
        registry.register_default(Arc::new(JsonLoader));
        registry.register_default(Arc::new(ParquetLoader));
        registry.register_default(Arc::new(XmlLoader));
        registry.register_default(Arc::new(ZipLoader));
        registry
    }

    /// Associate tags with a loader; a later registration of a tag wins
    pub fn register<I, S>(&mut self, tags: I, loader: Arc<dyn Loader>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags: Vec<String> = tags.into_iter().map(|t| normalize_tag(t.as_ref())).collect();

        if let Some(pattern) = loader.media_type_pattern() {
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(pattern) => {
                    if let Some(tag) = tags.first() {
                        self.media_types.push(Arc::new(MediaTypeRule {
                            pattern,
                            tag: tag.clone(),
                            loader: Arc::clone(&loader),
                        }));
                    }
                }
                Err(e) => warn!(loader = loader.name(), error = %e, "Ignoring invalid media type pattern"),
            }
        }

        for tag in tags {
            debug!(tag = %tag, loader = loader.name(), "Registered loader");
            self.loaders.insert(tag, Arc::clone(&loader));
        }
    }

    /// Register a loader under its own extensions
    pub fn register_default(&mut self, loader: Arc<dyn Loader>) {
        let tags = loader.extensions();
        self.register(tags.iter().copied(), loader);
    }

    pub fn resolve(&self, tag: &str) -> Result<Arc<dyn Loader>, FileError> {
        self.loaders
            .get(&normalize_tag(tag))
            .cloned()
            .ok_or_else(|| FileError::UnsupportedFormat(tag.trim().to_string()))
    }

    pub fn supports(&self, tag: &str) -> bool {
        self.loaders.contains_key(&normalize_tag(tag))
    }

    /// Registered tags, sorted
    pub fn tags(&self) -> Vec<&str> {
        self.loaders.keys().map(String::as_str).collect()
    }

    /// Resolve from the extension of a url or path
    pub fn resolve_for_url(&self, url: &str) -> Option<(String, Arc<dyn Loader>)> {
        let extension = url_extension(url)?;
        self.loaders
            .get(&extension)
            .map(|loader| (extension, Arc::clone(loader)))
    }

    /// Resolve from an HTTP `Content-Type`; later registrations are tried first
    pub fn resolve_media_type(&self, content_type: &str) -> Option<(String, Arc<dyn Loader>)> {
        if content_type.trim().is_empty() {
            return None;
        }
        self.media_types
            .iter()
            .rev()
            .find(|rule| rule.pattern.is_match(content_type))
            .map(|rule| (rule.tag.clone(), Arc::clone(&rule.loader)))
    }

    /// Decode bytes with the loader registered for `tag`
    pub fn decode(
        &self,
        tag: &str,
        data: &[u8],
        options: &LoadOptions,
        source: Option<&str>,
    ) -> Result<Frame, FileError> {
        let loader = self.resolve(tag)?;
        let ctx = LoadContext {
            options,
            registry: self,
            source,
        };
        let frame = loader.load(data, &ctx)?;
        debug!(
            loader = loader.name(),
            rows = frame.num_rows(),
            columns = frame.num_columns(),
            "Decoded payload"
        );
        Ok(frame)
    }

    /// Read and decode a local file, format taken from `tag` or the extension
    pub fn load_path(&self, path: &Path, tag: Option<&str>, options: &LoadOptions) -> Result<Frame, FileError> {
        let path_str = path.to_string_lossy();
        let tag = match tag {
            Some(tag) => normalize_tag(tag),
            None => url_extension(&path_str).ok_or(FileError::UndeterminedFormat)?,
        };
        let data = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FileError::LocalFileMissing,
            _ => FileError::from(e),
        })?;
        self.decode(&tag, &data, options, Some(&path_str))
    }
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('.').to_lowercase()
}

/// Lowercased extension of the last path segment, query and fragment ignored
pub fn url_extension(url: &str) -> Option<String> {
    let path = match url::Url::parse(url) {
        Ok(parsed) if parsed.scheme().len() > 1 => parsed.path().to_string(),
        _ => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    let name = path.rsplit(['/', '\\']).next()?;
    let (stem, extension) = name.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_lowercase())
}

const WINDOWS_1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{81}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{8D}', '\u{017D}', '\u{8F}',
    '\u{90}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{9D}', '\u{017E}', '\u{0178}',
];

/// Decode text with the usual open-data encodings
///
/// UTF-8 (BOM stripped), then UTF-16 when a BOM says so, then Windows-1252,
/// which maps every byte.
pub fn decode_text(data: &[u8]) -> String {
    if let Some(rest) = data.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    if let Some(rest) = data.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = data.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) => {
            debug!("Payload is not UTF-8, decoding as Windows-1252");
            data.iter()
                .map(|&b| match b {
                    0x80..=0x9F => WINDOWS_1252_HIGH[(b - 0x80) as usize],
                    _ => b as char,
                })
                .collect()
        }
    }
}

fn decode_utf16(data: &[u8], read: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = data.chunks_exact(2).map(|pair| read([pair[0], pair[1]])).collect();
    String::from_utf16_lossy(&units)
}
