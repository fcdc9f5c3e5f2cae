use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A normalized record extracted from a report attachment: one row, page, or
/// object, keyed by attribute name.
pub type Record = HashMap<String, serde_json::Value>;

/// Attachment format, derived from the file name (and optionally content).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    /// Delimiter-separated text: CSV, TSV.
    Delimited,
    /// Legacy binary spreadsheet exports (.xls).
    SpreadsheetLegacy,
    /// OOXML spreadsheet exports (.xlsx, .xlsm).
    SpreadsheetModern,
    /// Portable documents (.pdf).
    DocumentPortable,
    /// Structured text: JSON and JSON-lines.
    StructuredText,
    /// Anything we could not classify.
    Unknown,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Delimited => "delimited",
            FileFormat::SpreadsheetLegacy => "spreadsheet_legacy",
            FileFormat::SpreadsheetModern => "spreadsheet_modern",
            FileFormat::DocumentPortable => "document_portable",
            FileFormat::StructuredText => "structured_text",
            FileFormat::Unknown => "unknown",
        }
    }

    /// All formats an extractor can be registered for.
    pub fn all() -> [FileFormat; 5] {
        [
            FileFormat::Delimited,
            FileFormat::SpreadsheetLegacy,
            FileFormat::SpreadsheetModern,
            FileFormat::DocumentPortable,
            FileFormat::StructuredText,
        ]
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SHA-256 of an attachment's complete byte content, lowercase hex.
///
/// Used as the deduplication key; never recomputed or mutated once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Wrap an already-computed lowercase hex digest.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Hex-encode raw digest output.
    pub fn from_digest_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
