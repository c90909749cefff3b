//! Spreadsheet loader (xls, xlsx, ods)
//!
//! Reads the first worksheet. The first non-empty row is the header and
//! every cell is kept as text, like the CSV loader, so identifiers such as
//! SIRET keep their leading zeros.

use super::{LoadContext, Loader};
use crate::error::FileError;
use crate::frame::Frame;
use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use std::io::Cursor;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExcelLoader;

impl Loader for ExcelLoader {
    fn name(&self) -> &'static str {
        "excel"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["excel", "xls", "xlsx", "ods"]
    }

    fn media_type_pattern(&self) -> Option<&'static str> {
        Some(r"ms-excel|spreadsheetml|opendocument\.spreadsheet")
    }

    fn load(&self, data: &[u8], ctx: &LoadContext<'_>) -> Result<Frame, FileError> {
        let mut workbook =
            open_workbook_auto_from_rs(Cursor::new(data)).map_err(|e| FileError::load(e.to_string()))?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| FileError::load("workbook has no sheet"))?
            .map_err(|e| FileError::load(e.to_string()))?;

        let mut rows = range
            .rows()
            .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
            .filter(|row| row.iter().any(Option::is_some));

        let header_row = rows.next().ok_or_else(|| FileError::load("empty worksheet"))?;
        let body: Vec<Vec<Option<String>>> = rows.collect();

        let width = body.iter().map(Vec::len).fold(header_row.len(), usize::max);
        let header: Vec<String> = (0..width)
            .map(|idx| match header_row.get(idx).cloned().flatten() {
                Some(name) if !name.trim().is_empty() => name.trim().to_string(),
                _ => format!("column_{}", idx),
            })
            .collect();

        debug!(rows = body.len(), columns = header.len(), "Read worksheet");
        let frame = Frame::from_utf8_rows(&header, &body)?;
        ctx.options.apply(frame)
    }
}

/// Text rendering of a cell, `None` for empty and error cells
fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Data::Int(i) => Some(i.to_string()),
        // whole numbers come back as floats
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        Data::Float(f) => Some(f.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(_) => cell.as_datetime().map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
    }
}
