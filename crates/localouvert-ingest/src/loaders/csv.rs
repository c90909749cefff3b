//! Delimited text loader

use super::{decode_text, LoadContext, Loader};
use crate::error::FileError;
use crate::frame::Frame;
use tracing::debug;

const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// CSV with sniffed delimiter and tolerant row widths
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvLoader;

impl Loader for CsvLoader {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["csv", "tsv", "txt"]
    }

    fn media_type_pattern(&self) -> Option<&'static str> {
        Some(r"csv|comma-separated-values|tab-separated-values")
    }

    fn load(&self, data: &[u8], ctx: &LoadContext<'_>) -> Result<Frame, FileError> {
        let text = decode_text(data);
        if text.trim().is_empty() {
            return Err(FileError::load("empty file"));
        }

        let delimiter = ctx.options.csv_delimiter.unwrap_or_else(|| sniff_delimiter(&text));
        let mut reader = ::csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .has_headers(true)
            .from_reader(text.as_bytes());

        let header: Vec<String> = reader
            .headers()
            .map_err(|e| FileError::load(e.to_string()))?
            .iter()
            .enumerate()
            .map(|(idx, name)| match name.trim() {
                "" => format!("column_{}", idx),
                name => name.to_string(),
            })
            .collect();

        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for record in reader.records() {
            let record = record.map_err(|e| FileError::load(e.to_string()))?;
            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            // trailing empty cells do not make a row long
            let width = (0..record.len())
                .rev()
                .find(|idx| record.get(*idx).is_some_and(|field| !field.trim().is_empty()))
                .map_or(0, |idx| idx + 1);
            if width > header.len() {
                skipped += 1;
                continue;
            }
            rows.push(
                record
                    .iter()
                    .map(|field| (!field.is_empty()).then(|| field.to_string()))
                    .collect::<Vec<_>>(),
            );
        }

        if skipped > 0 {
            debug!(skipped, columns = header.len(), "Skipped rows longer than the header");
        }

        let frame = Frame::from_utf8_rows(&header, &rows)?;
        ctx.options.apply(frame)
    }
}

/// Most frequent candidate delimiter on the header line, outside quotes
fn sniff_delimiter(text: &str) -> u8 {
    let Some(first_line) = text.lines().find(|line| !line.trim().is_empty()) else {
        return b',';
    };

    let mut counts = [0usize; CANDIDATE_DELIMITERS.len()];
    let mut in_quotes = false;
    for byte in first_line.bytes() {
        if byte == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }
        if let Some(idx) = CANDIDATE_DELIMITERS.iter().position(|d| *d == byte) {
            counts[idx] += 1;
        }
    }

    counts
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .max_by_key(|(idx, count)| (**count, std::cmp::Reverse(*idx)))
        .map(|(idx, _)| CANDIDATE_DELIMITERS[idx])
        .unwrap_or(b',')
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::loaders::{LoadOptions, LoaderRegistry};

    fn load(data: &[u8]) -> Result<Frame, FileError> {
        LoaderRegistry::with_defaults().decode("csv", data, &LoadOptions::default(), None)
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("a;b;c\n1;2;3"), b';');
        assert_eq!(sniff_delimiter("a\tb\n"), b'\t');
        assert_eq!(sniff_delimiter("\"x;y\",b,c\n"), b',');
        assert_eq!(sniff_delimiter("single\n"), b',');
    }

    #[test]
    fn test_semicolon_latin1_csv() {
        let frame = load(b"commune;montant\nSaint-\xc9tienne;12,5\nLyon;\n").unwrap();
        assert_eq!(frame.column_names(), vec!["commune", "montant"]);
        assert_eq!(frame.num_rows(), 2);
        assert_eq!(
            frame.utf8_values("commune").unwrap().unwrap()[0].as_deref(),
            Some("Saint-Étienne")
        );
        assert_eq!(frame.utf8_values("montant").unwrap().unwrap()[1], None);
    }

    #[test]
    fn test_ragged_rows_and_blank_header() {
        let frame = load(b"a,,c\n1,2\n4,5,6,7\n7,8,9\n\n").unwrap();
        assert_eq!(frame.column_names(), vec!["a", "column_1", "c"]);
        assert_eq!(frame.num_rows(), 2);
        assert_eq!(frame.utf8_values("a").unwrap().unwrap(), vec![Some("1".to_string()), Some("7".to_string())]);
        assert_eq!(frame.utf8_values("c").unwrap().unwrap(), vec![None, Some("9".to_string())]);
    }

    #[test]
    fn test_long_rows_are_skipped_not_truncated() {
        let frame = load(b"siret,montant\n123,10,oops\n456,20,\n789,30\n").unwrap();
        assert_eq!(
            frame.utf8_values("siret").unwrap().unwrap(),
            vec![Some("456".to_string()), Some("789".to_string())]
        );
        assert_eq!(
            frame.utf8_values("montant").unwrap().unwrap(),
            vec![Some("20".to_string()), Some("30".to_string())]
        );
    }

    #[test]
    fn test_forced_delimiter_and_columns() {
        let options = LoadOptions::default().with_csv_delimiter(b'|').with_columns(["b"]);
        let frame = LoaderRegistry::with_defaults()
            .decode("csv", b"a|b\n1|2\n", &options, None)
            .unwrap();
        assert_eq!(frame.column_names(), vec!["b"]);
    }

    #[test]
    fn test_empty_file_fails() {
        assert!(matches!(load(b"  \n"), Err(FileError::Load(_))));
    }
}
