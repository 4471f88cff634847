//! Tabular values held under dataset root keys.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::DomainError;
use super::keys::RootKey;

pub type Row = Map<String, Value>;

/// A serialized list view: named columns and one JSON object per row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl Dataset {
    /// The documented empty default for `key`.
    pub fn empty(key: RootKey) -> Self {
        Self {
            columns: key.columns().iter().map(|c| (*c).to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn with_rows(key: RootKey, rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::empty(key)
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn encode(&self) -> Vec<u8> {
        // String-keyed JSON maps always serialize.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(key: RootKey, bytes: &[u8]) -> Result<Self, DomainError> {
        serde_json::from_slice(bytes)
            .map_err(|err| DomainError::invalid_value(key.as_str(), err.to_string()))
    }
}

/// Plain-text rendering of a cell, used for searching and ordering.
pub fn cell_text(row: &Row, column: &str) -> String {
    match row.get(column) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn encode_then_decode_preserves_rows() {
        let mut row = Row::new();
        row.insert("id".into(), json!("a1"));
        row.insert("filename".into(), json!("ctd.csv"));
        let dataset = Dataset::with_rows(RootKey::DiscoveredFiles, vec![row]);

        let decoded = Dataset::decode(RootKey::DiscoveredFiles, &dataset.encode())
            .expect("decode dataset");
        assert_eq!(decoded, dataset);
    }

    #[test]
    fn decode_reports_key_on_garbage() {
        let err = Dataset::decode(RootKey::ProcessedFiles, b"not json").expect_err("garbage");
        match err {
            DomainError::InvalidValue { key, .. } => assert_eq!(key, "processed_files"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cell_text_renders_non_strings() {
        let mut row = Row::new();
        row.insert("level".into(), json!(3));
        row.insert("owner".into(), Value::Null);
        assert_eq!(cell_text(&row, "level"), "3");
        assert_eq!(cell_text(&row, "owner"), "");
        assert_eq!(cell_text(&row, "missing"), "");
    }
}
