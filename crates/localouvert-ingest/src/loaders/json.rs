//! JSON records loader
//!
//! Accepted shapes, in order of preference:
//!
//! - an array of objects (`[{"a": 1}, ...]`)
//! - an object whose `json_key` entry is such an array
//! - an object with a field holding an array of objects (`{"data": [...]}`)
//! - a single object, read as one row

use super::{decode_text, LoadContext, Loader};
use crate::error::FileError;
use crate::frame::Frame;
use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLoader;

impl Loader for JsonLoader {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["json", "geojson"]
    }

    fn media_type_pattern(&self) -> Option<&'static str> {
        Some(r"^(application|text)/([\w.+-]+\+)?json")
    }

    fn load(&self, data: &[u8], ctx: &LoadContext<'_>) -> Result<Frame, FileError> {
        let text = decode_text(data);
        let mut value: Value =
            serde_json::from_str(&text).map_err(|e| FileError::load(format!("invalid JSON: {}", e)))?;

        if let Some(ref key) = ctx.options.json_key {
            value = match value {
                Value::Object(mut map) => map
                    .remove(key)
                    .ok_or_else(|| FileError::load(format!("key '{}' not found", key)))?,
                _ => return Err(FileError::load(format!("key '{}' requires a JSON object", key))),
            };
        }

        let records = into_records(value)?;
        let frame = records_to_frame(&records)?;
        ctx.options.apply(frame)
    }
}

fn into_records(value: Value) -> Result<Vec<Map<String, Value>>, FileError> {
    match value {
        Value::Array(items) => Ok(items.into_iter().map(into_record).collect()),
        Value::Object(mut map) => {
            let nested = map
                .iter()
                .find(|(_, v)| matches!(v, Value::Array(items) if items.iter().any(Value::is_object)))
                .map(|(k, _)| k.clone());
            match nested.and_then(|key| map.remove(&key)) {
                Some(Value::Array(items)) => Ok(items.into_iter().map(into_record).collect()),
                _ => Ok(vec![map]),
            }
        }
        _ => Err(FileError::load("JSON document is not tabular")),
    }
}

fn into_record(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inferred {
    Empty,
    Boolean,
    Int64,
    Float64,
    Utf8,
}

impl Inferred {
    fn merge(self, value: &Value) -> Self {
        let seen = match value {
            Value::Null => return self,
            Value::Bool(_) => Inferred::Boolean,
            Value::Number(n) if n.is_i64() => Inferred::Int64,
            Value::Number(_) => Inferred::Float64,
            _ => Inferred::Utf8,
        };
        match (self, seen) {
            (Inferred::Empty, seen) => seen,
            (a, b) if a == b => a,
            (Inferred::Int64, Inferred::Float64) | (Inferred::Float64, Inferred::Int64) => Inferred::Float64,
            _ => Inferred::Utf8,
        }
    }
}

fn records_to_frame(records: &[Map<String, Value>]) -> Result<Frame, FileError> {
    let mut order: Vec<String> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for record in records {
        for key in record.keys() {
            if !index.contains_key(key) {
                index.insert(key.clone(), order.len());
                order.push(key.clone());
            }
        }
    }

    let columns = order
        .into_iter()
        .map(|name| {
            let values: Vec<&Value> = records
                .iter()
                .map(|record| record.get(&name).unwrap_or(&Value::Null))
                .collect();
            let array = build_array(&values);
            (name, array)
        })
        .collect();

    let frame = Frame::from_columns(columns)?;
    if frame.num_columns() == 0 && !records.is_empty() {
        return Err(FileError::load("JSON records have no fields"));
    }
    Ok(frame)
}

fn build_array(values: &[&Value]) -> ArrayRef {
    let kind = values.iter().fold(Inferred::Empty, |kind, v| kind.merge(v));
    match kind {
        Inferred::Boolean => Arc::new(values.iter().map(|v| v.as_bool()).collect::<BooleanArray>()),
        Inferred::Int64 => Arc::new(values.iter().map(|v| v.as_i64()).collect::<Int64Array>()),
        Inferred::Float64 => Arc::new(values.iter().map(|v| v.as_f64()).collect::<Float64Array>()),
        Inferred::Empty | Inferred::Utf8 => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                })
                .collect::<StringArray>(),
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::loaders::{LoadOptions, LoaderRegistry};
    use arrow::datatypes::DataType;

    fn load(data: &str, options: &LoadOptions) -> Result<Frame, FileError> {
        LoaderRegistry::with_defaults().decode("json", data.as_bytes(), options, None)
    }

    #[test]
    fn test_array_of_objects_with_inference() {
        let frame = load(
            r#"[{"siren": "123456789", "montant": 10, "actif": true},
                {"siren": "987654321", "montant": 2.5, "extra": {"k": 1}}]"#,
            &LoadOptions::default(),
        )
        .unwrap();

        assert_eq!(frame.column_names(), vec!["siren", "montant", "actif", "extra"]);
        let schema = frame.schema();
        assert_eq!(schema.field(0).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(1).data_type(), &DataType::Float64);
        assert_eq!(schema.field(2).data_type(), &DataType::Boolean);
        assert_eq!(
            frame.utf8_values("extra").unwrap().unwrap(),
            vec![None, Some(r#"{"k":1}"#.to_string())]
        );
    }

    #[test]
    fn test_wrapping_key() {
        let options = LoadOptions::default().with_json_key("fields");
        let frame = load(r#"{"name": "schema", "fields": [{"name": "a"}, {"name": "b"}]}"#, &options).unwrap();
        assert_eq!(frame.num_rows(), 2);

        let missing = LoadOptions::default().with_json_key("absent");
        assert!(load(r#"{"fields": []}"#, &missing).is_err());
    }

    #[test]
    fn test_nested_records_and_single_object() {
        let frame = load(r#"{"total": 2, "data": [{"a": 1}, {"a": 2}]}"#, &LoadOptions::default()).unwrap();
        assert_eq!(frame.column_names(), vec!["a"]);
        assert_eq!(frame.num_rows(), 2);

        let frame = load(r#"{"a": 1, "b": "x"}"#, &LoadOptions::default()).unwrap();
        assert_eq!(frame.num_rows(), 1);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(load("{not json", &LoadOptions::default()), Err(FileError::Load(_))));
        assert!(load("42", &LoadOptions::default()).is_err());
    }
}
