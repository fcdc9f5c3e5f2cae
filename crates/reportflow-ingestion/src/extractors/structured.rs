//! Structured-text extraction (JSON and JSON Lines).
//!
//! Vendors ship record sets in three shapes: a bare array, an envelope
//! object wrapping the array under a collection key, or one JSON object
//! per line. All three normalize to the same record stream.

use async_trait::async_trait;
use reportflow_core::{FileFormat, IngestError, Record, Result};
use tracing::debug;

use super::{ExtractOptions, Extractor};

/// Envelope keys checked, in order, for the record array.
const COLLECTION_KEYS: &[&str] = &["records", "data", "items", "rows", "results"];

pub struct StructuredTextExtractor;

impl StructuredTextExtractor {
    pub fn new() -> Self {
        Self
    }

    fn value_to_record(value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            scalar => {
                let mut record = Record::new();
                record.insert("value".to_string(), scalar);
                record
            }
        }
    }

    fn values_to_records(values: Vec<serde_json::Value>) -> Vec<Record> {
        values.into_iter().map(Self::value_to_record).collect()
    }

    /// One well-formed document: array, envelope, or single object.
    fn parse_document(value: serde_json::Value) -> Vec<Record> {
        match value {
            serde_json::Value::Array(values) => Self::values_to_records(values),
            serde_json::Value::Object(mut map) => {
                for key in COLLECTION_KEYS {
                    if let Some(serde_json::Value::Array(values)) = map.remove(*key) {
                        return Self::values_to_records(values);
                    }
                }
                vec![map.into_iter().collect()]
            }
            scalar => vec![Self::value_to_record(scalar)],
        }
    }

    /// Whether failed whole-document parsing should fall back to JSON
    /// Lines: several non-blank lines, and the first one is a complete
    /// document on its own. A truncated pretty-printed document fails
    /// this test and keeps its own parse error.
    fn looks_like_lines(text: &str) -> bool {
        let mut lines = text.lines().filter(|line| !line.trim().is_empty());
        let (Some(first), Some(_)) = (lines.next(), lines.next()) else {
            return false;
        };
        serde_json::from_str::<serde_json::Value>(first).is_ok()
    }

    /// JSON Lines: one document per non-blank line.
    fn parse_lines(text: &str) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let value: serde_json::Value = serde_json::from_str(line).map_err(|e| {
                IngestError::parse(format!("line {}: {e}", number + 1))
            })?;
            records.push(Self::value_to_record(value));
        }
        Ok(records)
    }
}

impl Default for StructuredTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for StructuredTextExtractor {
    fn name(&self) -> &'static str {
        "structured_text"
    }

    fn supported_formats(&self) -> Vec<FileFormat> {
        vec![FileFormat::StructuredText]
    }

    async fn extract_bytes(&self, content: &[u8], _opts: &ExtractOptions) -> Result<Vec<Record>> {
        let text = std::str::from_utf8(content)
            .map_err(|_| IngestError::parse("structured text is not valid UTF-8"))?;
        if text.trim().is_empty() {
            return Err(IngestError::parse("structured text attachment is empty"));
        }

        let records = match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => Self::parse_document(value),
            Err(_) if Self::looks_like_lines(text) => Self::parse_lines(text)?,
            Err(e) => return Err(IngestError::from(e)),
        };

        debug!(record_count = records.len(), "structured text extracted");
        Ok(records)
    }
}
