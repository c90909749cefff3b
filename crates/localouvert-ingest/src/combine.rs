//! Combined-output writer
//!
//! Unions normalized parquet artifacts into one parquet file without holding
//! more than one record batch in memory:
//!
//! 1. read every footer and build the union schema (first-seen column order,
//!    all nullable, conflicting types relaxed to a common supertype)
//! 2. stream each file's batches, cast to the union types, fill absent
//!    columns with nulls, and append to a temp file renamed into place
//!
//! Row order follows the input order and is not a contract.

use crate::artifact::writer_properties;
use crate::error::Result;
use arrow::array::{new_null_array, Array, ArrayRef, StringBuilder};
use arrow::compute::{can_cast_types, cast};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// What [`concatenate`] wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CombineStats {
    pub files: usize,
    pub rows: usize,
    pub columns: usize,
}

/// Column union of `inputs` written to `output`
///
/// Returns `None` and writes nothing when `inputs` is empty.
pub fn concatenate(inputs: &[PathBuf], output: &Path) -> Result<Option<CombineStats>> {
    if inputs.is_empty() {
        return Ok(None);
    }

    let schema = union_schema(inputs)?;
    debug!(files = inputs.len(), columns = schema.fields().len(), "Computed union schema");

    let parent = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let tmp = NamedTempFile::new_in(parent)?;
    let mut writer = ArrowWriter::try_new(tmp.reopen()?, Arc::clone(&schema), Some(writer_properties()))?;
    let mut rows = 0usize;

    for input in inputs {
        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(input)?)?.build()?;
        for batch in reader {
            let aligned = align_batch(&batch?, &schema)?;
            rows += aligned.num_rows();
            writer.write(&aligned)?;
        }
    }

    writer.close()?;
    tmp.persist(output).map_err(|e| e.error)?;

    let stats = CombineStats {
        files: inputs.len(),
        rows,
        columns: schema.fields().len(),
    };
    info!(
        output = %output.display(),
        files = stats.files,
        rows = stats.rows,
        columns = stats.columns,
        "Wrote combined dataset"
    );
    Ok(Some(stats))
}

/// Union of the inputs' schemas, read from parquet footers only
pub fn union_schema(inputs: &[PathBuf]) -> Result<SchemaRef> {
    let mut fields: Vec<(String, DataType)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for input in inputs {
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(input)?)?;
        for field in builder.schema().fields() {
            match index.get(field.name()) {
                Some(&idx) => {
                    let merged = relaxed_supertype(&fields[idx].1, field.data_type());
                    fields[idx].1 = merged;
                }
                None => {
                    index.insert(field.name().clone(), fields.len());
                    fields.push((field.name().clone(), field.data_type().clone()));
                }
            }
        }
    }

    Ok(Arc::new(Schema::new(
        fields
            .into_iter()
            .map(|(name, data_type)| Field::new(name, data_type, true))
            .collect::<Vec<_>>(),
    )))
}

/// Smallest type both sides convert to without failing
pub fn relaxed_supertype(left: &DataType, right: &DataType) -> DataType {
    match (left, right) {
        (l, r) if l == r => l.clone(),
        (DataType::Null, other) | (other, DataType::Null) => other.clone(),
        (l, r) if l.is_integer() && r.is_integer() => DataType::Int64,
        (l, r) if l.is_numeric() && r.is_numeric() => DataType::Float64,
        _ => DataType::Utf8,
    }
}

/// Reshape a batch to `schema`: cast present columns, null-fill absent ones
pub fn align_batch(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    let source = batch.schema();
    let columns = schema
        .fields()
        .iter()
        .map(|field| match source.index_of(field.name()) {
            Ok(idx) => {
                let column = batch.column(idx);
                if column.data_type() == field.data_type() {
                    Ok(Arc::clone(column))
                } else if field.data_type() == &DataType::Utf8 && !can_cast_types(column.data_type(), &DataType::Utf8) {
                    display_utf8(column.as_ref())
                } else {
                    cast(column, field.data_type())
                }
            }
            Err(_) => Ok(new_null_array(field.data_type(), batch.num_rows())),
        })
        .collect::<std::result::Result<Vec<ArrayRef>, _>>()?;

    Ok(RecordBatch::try_new(Arc::clone(schema), columns)?)
}

/// Display rendering of each value, for nested types `cast` rejects
fn display_utf8(array: &dyn Array) -> std::result::Result<ArrayRef, ArrowError> {
    let formatter = ArrayFormatter::try_new(array, &FormatOptions::default())?;
    let mut builder = StringBuilder::with_capacity(array.len(), array.len() * 16);
    for idx in 0..array.len() {
        if array.is_null(idx) {
            builder.append_null();
        } else {
            builder.append_value(formatter.value(idx).to_string());
        }
    }
    Ok(Arc::new(builder.finish()))
}
