//! Tabular frame shared by loaders, normalizers and the combined writer
//!
//! A [`Frame`] is a thin owner of one Arrow `RecordBatch`. Operations are
//! value-returning (`self -> Result<Frame>`) so transforms can be chained
//! without hidden mutation. Column names are not required to be unique;
//! normalizers check that explicitly.

use arrow::array::{new_null_array, Array, ArrayRef, AsArray, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use std::collections::HashSet;
use std::sync::Arc;

type FrameResult<T> = std::result::Result<T, ArrowError>;

#[derive(Debug, Clone)]
pub struct Frame {
    batch: RecordBatch,
}

impl Frame {
    /// Frame with no columns and no rows
    pub fn empty() -> Self {
        Self {
            batch: RecordBatch::new_empty(Arc::new(Schema::empty())),
        }
    }

    pub fn from_batch(batch: RecordBatch) -> Self {
        Self { batch }
    }

    /// Build from named arrays, all nullable
    ///
    /// Arrays must share one length. A frame without columns has zero rows.
    pub fn from_columns(columns: Vec<(String, ArrayRef)>) -> FrameResult<Self> {
        let num_rows = columns.first().map(|(_, array)| array.len()).unwrap_or(0);
        Self::from_columns_with_rows(columns, num_rows)
    }

    fn from_columns_with_rows(columns: Vec<(String, ArrayRef)>, num_rows: usize) -> FrameResult<Self> {
        let fields: Vec<Field> = columns
            .iter()
            .map(|(name, array)| Field::new(name, array.data_type().clone(), true))
            .collect();
        let arrays: Vec<ArrayRef> = columns.into_iter().map(|(_, array)| array).collect();
        let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
        let batch = RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), arrays, &options)?;
        Ok(Self { batch })
    }

    /// Build an all-`Utf8` frame from textual rows
    ///
    /// Short rows are padded with nulls. Cells past the header width are
    /// ignored, so loaders deal with long rows before calling this.
    pub fn from_utf8_rows(header: &[String], rows: &[Vec<Option<String>>]) -> FrameResult<Self> {
        let columns = header
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let values: StringArray = rows
                    .iter()
                    .map(|row| row.get(idx).cloned().flatten())
                    .collect();
                (name.clone(), Arc::new(values) as ArrayRef)
            })
            .collect();
        Self::from_columns_with_rows(columns, rows.len())
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect()
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// First column with this name
    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.position(name).map(|idx| self.batch.column(idx))
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Name of the first repeated column, if any
    pub fn duplicate_column(&self) -> Option<String> {
        let mut seen = HashSet::new();
        self.column_names().into_iter().find(|name| !seen.insert(name.clone()))
    }

    pub fn rename_with<F>(self, rename: F) -> FrameResult<Self>
    where
        F: Fn(&str) -> String,
    {
        let columns = self
            .named_columns()
            .into_iter()
            .map(|(name, array)| (rename(&name), array))
            .collect();
        Self::from_columns_with_rows(columns, self.num_rows())
    }

    /// Replace the column with this name, or append it
    pub fn with_column(self, name: &str, array: ArrayRef) -> FrameResult<Self> {
        if self.num_columns() > 0 && array.len() != self.num_rows() {
            return Err(ArrowError::InvalidArgumentError(format!(
                "column '{}' has {} rows, frame has {}",
                name,
                array.len(),
                self.num_rows()
            )));
        }
        let num_rows = array.len();
        let mut columns = self.named_columns();
        match columns.iter_mut().find(|(existing, _)| existing == name) {
            Some(slot) => slot.1 = array,
            None => columns.push((name.to_string(), array)),
        }
        Self::from_columns_with_rows(columns, num_rows)
    }

    /// Column repeating one value (or null) on every row
    pub fn with_constant_utf8(self, name: &str, value: Option<&str>) -> FrameResult<Self> {
        let array: ArrayRef = match value {
            Some(value) => Arc::new(StringArray::from(vec![value; self.num_rows()])),
            None => new_null_array(&DataType::Utf8, self.num_rows()),
        };
        self.with_column(name, array)
    }

    /// Keep only the named columns, in the given order
    pub fn select(&self, names: &[&str]) -> FrameResult<Self> {
        let columns = names
            .iter()
            .map(|name| {
                self.column(name)
                    .map(|array| (name.to_string(), Arc::clone(array)))
                    .ok_or_else(|| ArrowError::SchemaError(format!("column '{}' not found", name)))
            })
            .collect::<FrameResult<Vec<_>>>()?;
        Self::from_columns_with_rows(columns, self.num_rows())
    }

    pub fn drop_column(self, name: &str) -> FrameResult<Self> {
        let num_rows = self.num_rows();
        let columns = self
            .named_columns()
            .into_iter()
            .filter(|(existing, _)| existing != name)
            .collect();
        Self::from_columns_with_rows(columns, num_rows)
    }

    pub fn cast_column(self, name: &str, to: &DataType) -> FrameResult<Self> {
        let array = match self.column(name) {
            Some(array) => arrow::compute::cast(array, to)?,
            None => return Err(ArrowError::SchemaError(format!("column '{}' not found", name))),
        };
        self.with_column(name, array)
    }

    /// Values of a column rendered as text, nulls kept
    pub fn utf8_values(&self, name: &str) -> FrameResult<Option<Vec<Option<String>>>> {
        let Some(array) = self.column(name) else {
            return Ok(None);
        };
        let text = arrow::compute::cast(array, &DataType::Utf8)?;
        let text = text.as_string::<i32>();
        Ok(Some(
            (0..text.len())
                .map(|idx| (!text.is_null(idx)).then(|| text.value(idx).to_string()))
                .collect(),
        ))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.batch
            .schema()
            .fields()
            .iter()
            .position(|field| field.name() == name)
    }

    fn named_columns(&self) -> Vec<(String, ArrayRef)> {
        self.column_names()
            .into_iter()
            .zip(self.batch.columns().iter().cloned())
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;

    fn sample() -> Frame {
        Frame::from_columns(vec![
            ("a".into(), Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef),
            ("b".into(), Arc::new(StringArray::from(vec!["x", "y"])) as ArrayRef),
        ])
        .unwrap()
    }

    #[test]
    fn test_from_utf8_rows_pads_and_truncates() {
        let header = vec!["a".to_string(), "b".to_string()];
        let rows = vec![
            vec![Some("1".to_string())],
            vec![Some("2".to_string()), Some("x".to_string()), Some("extra".to_string())],
        ];
        let frame = Frame::from_utf8_rows(&header, &rows).unwrap();
        assert_eq!(frame.num_rows(), 2);
        assert_eq!(
            frame.utf8_values("b").unwrap().unwrap(),
            vec![None, Some("x".to_string())]
        );
    }

    #[test]
    fn test_empty_frame() {
        let frame = Frame::empty();
        assert!(frame.is_empty());
        assert_eq!(frame.num_columns(), 0);
    }

    #[test]
    fn test_with_constant_and_replace() {
        let frame = sample().with_constant_utf8("url", Some("https://a")).unwrap();
        assert_eq!(frame.column_names(), vec!["a", "b", "url"]);

        let frame = frame.with_constant_utf8("b", None).unwrap();
        assert_eq!(frame.num_columns(), 3);
        assert_eq!(frame.column("b").unwrap().null_count(), 2);
    }

    #[test]
    fn test_with_column_length_mismatch() {
        let err = sample().with_column("c", Arc::new(Int64Array::from(vec![1])));
        assert!(err.is_err());
    }

    #[test]
    fn test_duplicate_detection_after_rename() {
        let frame = sample().rename_with(|_| "same".to_string()).unwrap();
        assert_eq!(frame.duplicate_column(), Some("same".to_string()));
        assert_eq!(sample().duplicate_column(), None);
    }

    #[test]
    fn test_select_and_drop() {
        let frame = sample();
        assert_eq!(frame.select(&["b"]).unwrap().column_names(), vec!["b"]);
        assert!(frame.select(&["missing"]).is_err());
        assert_eq!(frame.drop_column("a").unwrap().column_names(), vec!["b"]);
    }

    #[test]
    fn test_cast_and_utf8_values() {
        let frame = sample().cast_column("a", &DataType::Utf8).unwrap();
        assert_eq!(frame.schema().field(0).data_type(), &DataType::Utf8);
        assert_eq!(
            frame.utf8_values("a").unwrap().unwrap(),
            vec![Some("1".to_string()), Some("2".to_string())]
        );
        assert!(frame.utf8_values("missing").unwrap().is_none());
    }
}
