use std::path::Path;

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("{path} is not valid JSON: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("{0} must hold a JSON array of records or an object with an `items` array")]
    Shape(String),
}

/// Read raw records from a dataset file.
///
/// Accepts a bare array or a snapshot-style `{"items": [...]}` object so an
/// exported snapshot can be ingested again.
pub async fn load_records(path: &Path) -> Result<Vec<Value>, DatasetError> {
    let display = path.display().to_string();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DatasetError::Io {
            path: display.clone(),
            source,
        })?;
    let parsed: Value = serde_json::from_str(&raw).map_err(|source| DatasetError::Json {
        path: display.clone(),
        source,
    })?;
    records_from_value(parsed).ok_or(DatasetError::Shape(display))
}

fn records_from_value(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(records) => Some(records),
        Value::Object(mut fields) => match fields.remove("items") {
            Some(Value::Array(records)) => Some(records),
            _ => None,
        },
        _ => None,
    }
}
