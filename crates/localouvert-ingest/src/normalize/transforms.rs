//! Pure frame transforms used by normalizers
//!
//! Each function takes a frame by value and returns the transformed frame or a
//! normalization failure. Transforms touching a single column are no-ops when
//! the column is absent.

use crate::error::FileError;
use crate::frame::Frame;
use arrow::array::{Array, ArrayRef, AsArray, Float64Array, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, TimeUnit};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, LazyLock};

pub const SIREN_LENGTH: usize = 9;
pub const SIRET_LENGTH: usize = 14;

/// Boxed transform, for normalizers that chain a configurable list
pub type FrameTransform = Box<dyn Fn(Frame) -> Result<Frame, FileError> + Send + Sync>;

// Literal patterns, checked by the tests below
#[allow(clippy::expect_used)]
static SEPARATOR_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[_\n.-]+").expect("separator regex should compile"));
#[allow(clippy::expect_used)]
static WRAPPER_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(fields|properties)_").expect("prefix regex should compile"));
#[allow(clippy::expect_used)]
static VALUE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_?@value$").expect("suffix regex should compile"));

/// Lowercase, collapse `_`, newline, `.` and `-` runs into `_`, and drop
/// `fields_`/`properties_` prefixes and `@value` suffixes
pub fn normalize_column_name(name: &str) -> String {
    let name = name.to_lowercase();
    let name = SEPARATOR_RUN.replace_all(&name, "_");
    let name = WRAPPER_PREFIX.replace(&name, "");
    let name = VALUE_SUFFIX.replace(&name, "");
    name.trim().to_string()
}

pub fn normalize_column_names(frame: Frame) -> Result<Frame, FileError> {
    Ok(frame.rename_with(normalize_column_name)?)
}

/// Rename columns present in `mapping`
///
/// Names are trimmed first and url-like names keep only their last path
/// segment. A rename is skipped when its target already exists, compared
/// case-insensitively, so it can never create a duplicate.
pub fn safe_rename(frame: Frame, mapping: &BTreeMap<String, String>) -> Result<Frame, FileError> {
    let frame = frame.rename_with(|name| {
        let name = name.trim();
        if name.starts_with("http") {
            name.rsplit('/').next().unwrap_or(name).to_string()
        } else {
            name.to_string()
        }
    })?;

    let names = frame.column_names();
    let lowered: HashSet<String> = names.iter().map(|n| n.to_lowercase()).collect();
    let applicable: BTreeMap<&str, &str> = mapping
        .iter()
        .filter(|(from, to)| {
            names.contains(from) && from != to && !lowered.contains(&to.to_lowercase())
        })
        .map(|(from, to)| (from.as_str(), to.as_str()))
        .collect();

    Ok(frame.rename_with(|name| applicable.get(name).map_or_else(|| name.to_string(), |to| to.to_string()))?)
}

/// Fold columns sharing a name into one text column at the first position
///
/// Non-null values of a row are joined with `separator`; a row with only
/// nulls stays null.
pub fn merge_duplicate_columns(frame: Frame, separator: &str) -> Result<Frame, FileError> {
    if frame.duplicate_column().is_none() {
        return Ok(frame);
    }

    let names = frame.column_names();
    let mut done = HashSet::new();
    let mut columns: Vec<(String, ArrayRef)> = Vec::with_capacity(names.len());

    for name in &names {
        if !done.insert(name.as_str()) {
            continue;
        }
        let positions: Vec<usize> = names
            .iter()
            .enumerate()
            .filter(|(_, other)| *other == name)
            .map(|(idx, _)| idx)
            .collect();

        if positions.len() == 1 {
            columns.push((name.clone(), Arc::clone(frame.batch().column(positions[0]))));
            continue;
        }

        let parts = positions
            .iter()
            .map(|idx| arrow::compute::cast(frame.batch().column(*idx), &DataType::Utf8))
            .collect::<Result<Vec<_>, _>>()?;
        let merged: StringArray = (0..frame.num_rows())
            .map(|row| {
                let values: Vec<&str> = parts
                    .iter()
                    .map(|part| part.as_string::<i32>())
                    .filter(|part| !part.is_null(row))
                    .map(|part| part.value(row))
                    .collect();
                (!values.is_empty()).then(|| values.join(separator))
            })
            .collect();
        columns.push((name.clone(), Arc::new(merged) as ArrayRef));
    }

    Ok(Frame::from_columns(columns)?)
}

/// Coerce a SIREN/SIRET column to 14-character text
///
/// The median length of the cleaned values decides the interpretation: 9 means
/// SIREN (zero-filled to 9, right-padded with zeros to 14), 14 means SIRET
/// (zero-filled to 14). Anything else fails the file.
pub fn normalize_identifier(frame: Frame, column: &str) -> Result<Frame, FileError> {
    let Some(values) = frame.utf8_values(column)? else {
        return Ok(frame);
    };

    let cleaned: Vec<Option<String>> = values
        .into_iter()
        .map(|value| {
            value.map(|v| {
                v.trim()
                    .replace(".0", "")
                    .chars()
                    .filter(|c| *c != ' ' && *c != '\u{a0}')
                    .collect::<String>()
            })
        })
        .collect();

    let identifier_error =
        || FileError::normalization(format!("{} median length is neither siren nor siret", column));
    let median = median_length(&cleaned).ok_or_else(identifier_error)?;

    let padded: StringArray = if median == SIREN_LENGTH as f64 {
        cleaned
            .iter()
            .map(|v| v.as_deref().map(|v| format!("{:0<14}", format!("{:0>9}", v))))
            .collect()
    } else if median == SIRET_LENGTH as f64 {
        cleaned
            .iter()
            .map(|v| v.as_deref().map(|v| format!("{:0>14}", v)))
            .collect()
    } else {
        return Err(identifier_error());
    };

    Ok(frame.with_column(column, Arc::new(padded))?)
}

/// Parse a French-formatted amount column into `Float64`
///
/// Numeric columns are only widened. Text loses euro signs, spaces and the
/// word `euros`; a trailing separator followed by one or two digits marks the
/// decimals, any other `.` or `,` is a thousands separator.
pub fn normalize_amount(frame: Frame, column: &str) -> Result<Frame, FileError> {
    let Some(data_type) = frame.column(column).map(|array| array.data_type().clone()) else {
        return Ok(frame);
    };
    match data_type {
        DataType::Float64 => return Ok(frame),
        ref numeric if numeric.is_numeric() => return Ok(frame.cast_column(column, &DataType::Float64)?),
        _ => {}
    }

    let values = frame.utf8_values(column)?.unwrap_or_default();
    let amounts = values
        .iter()
        .map(|value| match value {
            Some(value) => parse_amount(value)
                .ok_or_else(|| FileError::normalization(format!("{} contains invalid amounts", column))),
            None => Ok(None),
        })
        .collect::<Result<Float64Array, _>>()?;

    Ok(frame.with_column(column, Arc::new(amounts))?)
}

/// `Ok(None)` for blank text, `None` when the text is not a number
fn parse_amount(raw: &str) -> Option<Option<f64>> {
    let cleaned: String = raw
        .replace("euros", "")
        .chars()
        .filter(|c| !matches!(c, '\u{20ac}' | '\u{a0}' | ' '))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Some(None);
    }

    let decimals = match cleaned.rfind(['.', ',']) {
        Some(idx) => {
            let tail = &cleaned[idx + 1..];
            if (1..=2).contains(&tail.len()) && tail.chars().all(|c| c.is_ascii_digit()) {
                tail.len() as i32
            } else {
                0
            }
        }
        None => 0,
    };

    let digits: String = cleaned.chars().filter(|c| !matches!(c, '.' | ',')).collect();
    let value: f64 = digits.parse().ok()?;
    Some(Some(value / 10f64.powi(decimals)))
}

const DATETIME_FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y-%m-%d", "%Y/%m/%d", "%d/%m/%y"];

/// Parse a date column into UTC microsecond timestamps
///
/// Ambiguous dates are read day first. Values carrying an offset are
/// converted to UTC, naive ones are taken as UTC.
pub fn normalize_date(frame: Frame, column: &str) -> Result<Frame, FileError> {
    let utc = DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()));
    let Some(array) = frame.column(column) else {
        return Ok(frame);
    };
    if matches!(array.data_type(), DataType::Timestamp(_, _) | DataType::Date32 | DataType::Date64) {
        return Ok(frame.cast_column(column, &utc)?);
    }

    let values = frame.utf8_values(column)?.unwrap_or_default();
    let timestamps = values
        .iter()
        .map(|value| match value.as_deref().map(str::trim) {
            Some(value) if !value.is_empty() => parse_date(value)
                .map(Some)
                .ok_or_else(|| FileError::normalization(format!("{} contains invalid dates", column))),
            _ => Ok(None),
        })
        .collect::<Result<TimestampMicrosecondArray, _>>()?
        .with_timezone("UTC");

    Ok(frame.with_column(column, Arc::new(timestamps))?)
}

/// Microseconds since the epoch
fn parse_date(value: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp_micros());
    }
    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
    {
        return Some(dt.and_utc().timestamp_micros());
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_micros())
}

fn median_length(values: &[Option<String>]) -> Option<f64> {
    let mut lengths: Vec<usize> = values
        .iter()
        .flatten()
        .map(|v| v.chars().count())
        .collect();
    if lengths.is_empty() {
        return None;
    }
    lengths.sort_unstable();
    let mid = lengths.len() / 2;
    Some(match lengths.len() % 2 {
        0 => (lengths[mid - 1] + lengths[mid]) as f64 / 2.0,
        _ => lengths[mid] as f64,
    })
}
