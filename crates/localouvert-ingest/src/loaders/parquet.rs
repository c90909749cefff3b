//! Parquet loader

use super::{LoadContext, Loader};
use crate::error::FileError;
use crate::frame::Frame;
use arrow::compute::concat_batches;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetLoader;

impl Loader for ParquetLoader {
    fn name(&self) -> &'static str {
        "parquet"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["parquet"]
    }

    fn media_type_pattern(&self) -> Option<&'static str> {
        Some("parquet")
    }

    fn load(&self, data: &[u8], ctx: &LoadContext<'_>) -> Result<Frame, FileError> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(data))
            .map_err(|e| FileError::load(e.to_string()))?;
        let schema = builder.schema().clone();
        let reader = builder.build().map_err(|e| FileError::load(e.to_string()))?;

        let batches = reader.collect::<Result<Vec<_>, _>>()?;
        let batch = concat_batches(&schema, &batches)?;
        ctx.options.apply(Frame::from_batch(batch))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::loaders::{LoadOptions, LoaderRegistry};
    use arrow::array::{ArrayRef, Int64Array, StringArray};
    use parquet::arrow::ArrowWriter;
    use std::sync::Arc;

    fn parquet_bytes(frame: &Frame) -> Vec<u8> {
        let mut buffer = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, frame.schema(), None).unwrap();
        writer.write(frame.batch()).unwrap();
        writer.close().unwrap();
        buffer
    }

    #[test]
    fn test_reads_parquet_payload() {
        let frame = Frame::from_columns(vec![
            ("annee".into(), Arc::new(Int64Array::from(vec![2022, 2023])) as ArrayRef),
            ("commune".into(), Arc::new(StringArray::from(vec!["Lille", "Nantes"])) as ArrayRef),
        ])
        .unwrap();

        let loaded = LoaderRegistry::with_defaults()
            .decode("parquet", &parquet_bytes(&frame), &LoadOptions::default(), None)
            .unwrap();
        assert_eq!(loaded.num_rows(), 2);
        assert_eq!(loaded.column_names(), vec!["annee", "commune"]);
    }

    #[test]
    fn test_garbage_is_load_failure() {
        let err = LoaderRegistry::with_defaults()
            .decode("parquet", b"not parquet", &LoadOptions::default(), None)
            .unwrap_err();
        assert!(matches!(err, FileError::Load(_)));
    }
}
