//! Delimiter-separated text extraction (CSV, TSV).

use async_trait::async_trait;
use csv::ReaderBuilder;
use reportflow_core::{FileFormat, IngestError, Record, Result};
use tracing::debug;

use super::{ExtractOptions, Extractor};

/// Extracts records from delimited text. The header row supplies record
/// keys; quoting and escaping follow RFC 4180 via the `csv` crate. The
/// delimiter is inferred from the header line unless fixed at construction.
pub struct DelimitedExtractor {
    delimiter: Option<u8>,
}

impl DelimitedExtractor {
    pub fn new() -> Self {
        Self { delimiter: None }
    }

    /// Fix the delimiter instead of inferring it.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    /// Pick the candidate delimiter occurring most often in the header
    /// line. Ties keep the earlier candidate, so a dead heat between a
    /// comma and anything else stays a comma; absence falls back to one.
    fn infer_delimiter(header_line: &str) -> u8 {
        let candidates = [b',', b'\t', b';', b'|'];
        let mut best = b',';
        let mut best_count = 0;
        for candidate in candidates {
            let count = header_line.bytes().filter(|&b| b == candidate).count();
            if count > best_count {
                best = candidate;
                best_count = count;
            }
        }
        best
    }

    /// Decode as UTF-8, falling back to Windows-1252 for the legacy
    /// exports some vendors still produce.
    fn decode(content: &[u8]) -> String {
        match std::str::from_utf8(content) {
            Ok(s) => s.to_string(),
            Err(_) => {
                let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(content);
                decoded.into_owned()
            }
        }
    }

    /// Coerce one field into a typed JSON value.
    fn parse_scalar(field: &str) -> serde_json::Value {
        let trimmed = field.trim();
        if trimmed.is_empty() {
            return serde_json::Value::Null;
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return serde_json::Value::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return serde_json::Value::Bool(false);
        }
        if let Ok(int) = trimmed.parse::<i64>() {
            return serde_json::json!(int);
        }
        if let Ok(float) = trimmed.parse::<f64>() {
            if float.is_finite() {
                return serde_json::json!(float);
            }
        }
        serde_json::Value::String(field.to_string())
    }
}

impl Default for DelimitedExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for DelimitedExtractor {
    fn name(&self) -> &'static str {
        "delimited"
    }

    fn supported_formats(&self) -> Vec<FileFormat> {
        vec![FileFormat::Delimited]
    }

    async fn extract_bytes(&self, content: &[u8], _opts: &ExtractOptions) -> Result<Vec<Record>> {
        let text = Self::decode(content);
        let header_line = text.lines().next().unwrap_or("");
        let delimiter = self
            .delimiter
            .unwrap_or_else(|| Self::infer_delimiter(header_line));

        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| IngestError::parse_with_source("malformed delimited header", e))?
            .clone();

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|e| IngestError::parse_with_source("malformed delimited row", e))?;
            if row.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            let mut record = Record::new();
            for (i, field) in row.iter().enumerate() {
                let key = headers
                    .get(i)
                    .filter(|h| !h.trim().is_empty())
                    .map(|h| h.trim().to_string())
                    .unwrap_or_else(|| format!("column_{}", i + 1));
                record.insert(key, Self::parse_scalar(field));
            }
            records.push(record);
        }

        debug!(
            delimiter = %char::from(delimiter),
            record_count = records.len(),
            "delimited content extracted"
        );
        Ok(records)
    }
}
