//! The extractor contract and its per-format implementations.
//!
//! An [`Extractor`] turns raw attachment bytes into normalized records.
//! Format-specific parsing lives in `extract_bytes`; the provided
//! `extract_stream` buffers and delegates (formats that can parse
//! incrementally may override it); `extract_path` is the outer boundary
//! that resolves the file, wraps the attempt in metrics, and converts any
//! extraction failure into a failed [`ExtractionResult`] so a batch of
//! attachments survives one bad file.

pub mod delimited;
pub mod document;
pub mod spreadsheet;
pub mod structured;

pub use delimited::DelimitedExtractor;
pub use document::DocumentExtractor;
pub use spreadsheet::SpreadsheetExtractor;
pub use structured::StructuredTextExtractor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reportflow_core::{FileFormat, IngestError, Record, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;
use uuid::Uuid;

use crate::detector;
use crate::metrics::IngestionMetrics;

/// Caller-declared expectations for extracted records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordSchema {
    /// Fields every record must carry with a non-null value.
    pub required_fields: Vec<String>,
}

impl RecordSchema {
    pub fn new(required_fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            required_fields: required_fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Check every record; the error carries how many well-formed records
    /// were examined before the failure.
    pub fn validate(&self, records: &[Record]) -> Result<()> {
        for (index, record) in records.iter().enumerate() {
            for field in &self.required_fields {
                let missing = match record.get(field) {
                    None | Some(serde_json::Value::Null) => true,
                    _ => false,
                };
                if missing {
                    return Err(IngestError::validation(
                        format!("record is missing required field '{field}'"),
                        index,
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Per-call extraction options.
#[derive(Clone, Default)]
pub struct ExtractOptions {
    /// Overrides file-name detection when the caller already knows the
    /// format (e.g. an orchestrator honoring a request hint).
    pub declared_format: Option<FileFormat>,
    /// Optional schema applied after raw extraction.
    pub schema: Option<RecordSchema>,
    pub vendor: Option<String>,
    pub report_type: Option<String>,
    /// Metrics sink; extraction attempts are recorded when present.
    pub metrics: Option<Arc<IngestionMetrics>>,
}

impl ExtractOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_declared_format(mut self, format: FileFormat) -> Self {
        self.declared_format = Some(format);
        self
    }

    pub fn with_schema(mut self, schema: RecordSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    pub fn with_report_type(mut self, report_type: impl Into<String>) -> Self {
        self.report_type = Some(report_type.into());
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<IngestionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Metadata describing one extraction attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub format: FileFormat,
    pub file_name: String,
    pub timestamp: DateTime<Utc>,
    pub vendor: Option<String>,
    pub report_type: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl ExtractionMetadata {
    pub fn new(format: FileFormat, file_name: impl Into<String>, opts: &ExtractOptions) -> Self {
        Self {
            format,
            file_name: file_name.into(),
            timestamp: Utc::now(),
            vendor: opts.vendor.clone(),
            report_type: opts.report_type.clone(),
            error_code: None,
            error_message: None,
        }
    }
}

/// Outcome of one extraction attempt.
///
/// Constructors enforce the result invariant: success carries no error and
/// `record_count == records.len()`; failure carries no records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub id: Uuid,
    pub records: Vec<Record>,
    pub record_count: usize,
    pub success: bool,
    pub metadata: ExtractionMetadata,
    pub error: Option<String>,
}

impl ExtractionResult {
    pub fn success(records: Vec<Record>, metadata: ExtractionMetadata) -> Self {
        let record_count = records.len();
        Self {
            id: Uuid::new_v4(),
            records,
            record_count,
            success: true,
            metadata,
            error: None,
        }
    }

    pub fn failure(error: &IngestError, mut metadata: ExtractionMetadata) -> Self {
        metadata.error_code = Some(error.code().to_string());
        metadata.error_message = Some(error.to_string());
        Self {
            id: Uuid::new_v4(),
            records: Vec::new(),
            record_count: 0,
            success: false,
            metadata,
            error: Some(error.to_string()),
        }
    }
}

/// Format-specific record extraction.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn supported_formats(&self) -> Vec<FileFormat>;

    fn supports(&self, format: FileFormat) -> bool {
        self.supported_formats().contains(&format)
    }

    /// Parse fully-buffered content into records. Every concrete extractor
    /// implements this; all format edge cases live here.
    async fn extract_bytes(&self, content: &[u8], opts: &ExtractOptions) -> Result<Vec<Record>>;

    /// Consume a stream. The default buffers everything then delegates to
    /// [`Extractor::extract_bytes`]; formats able to parse incrementally
    /// may override.
    async fn extract_stream(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        opts: &ExtractOptions,
    ) -> Result<Vec<Record>> {
        let mut content = Vec::new();
        reader
            .read_to_end(&mut content)
            .await
            .map_err(|e| IngestError::parse_with_source("attachment read failed", e))?;
        self.extract_bytes(&content, opts).await
    }

    /// Extract from a file on disk.
    ///
    /// A missing file or incompatible format is raised to the caller; any
    /// failure past that point is captured as a failed [`ExtractionResult`]
    /// so batch processing continues. The whole attempt is metered
    /// regardless of outcome.
    async fn extract_path(&self, path: &Path, opts: &ExtractOptions) -> Result<ExtractionResult> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let file_meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(_) => return Err(IngestError::file_not_found(path.to_string_lossy())),
        };

        let format = opts
            .declared_format
            .unwrap_or_else(|| detector::detect(&file_name));
        if !self.supports(format) {
            return Err(IngestError::unsupported_format(format, self.supported_formats()));
        }

        let bytes = file_meta.len();
        let token = opts
            .metrics
            .as_ref()
            .map(|m| m.record_start(format, &file_name, bytes));

        let attempt: Result<Vec<Record>> = async {
            let mut file = tokio::fs::File::open(path)
                .await
                .map_err(|e| IngestError::parse_with_source("attachment open failed", e))?;
            let records = self.extract_stream(&mut file, opts).await?;
            if let Some(schema) = &opts.schema {
                schema.validate(&records)?;
            }
            Ok(records)
        }
        .await;

        let metadata = ExtractionMetadata::new(format, &file_name, opts);
        let result = match attempt {
            Ok(records) => ExtractionResult::success(records, metadata),
            Err(err) => ExtractionResult::failure(&err, metadata),
        };

        if let (Some(metrics), Some(token)) = (opts.metrics.as_ref(), token) {
            metrics
                .record_complete(
                    token,
                    format,
                    &file_name,
                    bytes,
                    result.success,
                    result.record_count,
                    result.error.as_deref(),
                )
                .await;
        }

        debug!(
            extractor = self.name(),
            file_name,
            success = result.success,
            record_count = result.record_count,
            "path extraction finished"
        );
        Ok(result)
    }

    /// Extract from already-buffered content, with the same metering and
    /// failure-capture behavior as [`Extractor::extract_path`].
    async fn extract_buffered(
        &self,
        file_name: &str,
        format: FileFormat,
        content: &[u8],
        opts: &ExtractOptions,
    ) -> ExtractionResult {
        let bytes = content.len() as u64;
        let token = opts
            .metrics
            .as_ref()
            .map(|m| m.record_start(format, file_name, bytes));

        let attempt: Result<Vec<Record>> = async {
            let records = self.extract_bytes(content, opts).await?;
            if let Some(schema) = &opts.schema {
                schema.validate(&records)?;
            }
            Ok(records)
        }
        .await;

        let metadata = ExtractionMetadata::new(format, file_name, opts);
        let result = match attempt {
            Ok(records) => ExtractionResult::success(records, metadata),
            Err(err) => ExtractionResult::failure(&err, metadata),
        };

        if let (Some(metrics), Some(token)) = (opts.metrics.as_ref(), token) {
            metrics
                .record_complete(
                    token,
                    format,
                    file_name,
                    bytes,
                    result.success,
                    result.record_count,
                    result.error.as_deref(),
                )
                .await;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticExtractor {
        records: usize,
        fail: bool,
    }

    #[async_trait]
    impl Extractor for StaticExtractor {
        fn name(&self) -> &'static str {
            "static"
        }

        fn supported_formats(&self) -> Vec<FileFormat> {
            vec![FileFormat::Delimited]
        }

        async fn extract_bytes(
            &self,
            _content: &[u8],
            _opts: &ExtractOptions,
        ) -> Result<Vec<Record>> {
            if self.fail {
                return Err(IngestError::parse("synthetic failure"));
            }
            Ok((0..self.records)
                .map(|i| {
                    let mut record = Record::new();
                    record.insert("index".to_string(), serde_json::json!(i));
                    record
                })
                .collect())
        }
    }

    #[test]
    fn test_result_invariant_success() {
        let records = vec![Record::new(), Record::new()];
        let metadata = ExtractionMetadata::new(
            FileFormat::Delimited,
            "a.csv",
            &ExtractOptions::new(),
        );
        let result = ExtractionResult::success(records, metadata);
        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.record_count, result.records.len());
    }

    #[test]
    fn test_result_invariant_failure() {
        let metadata = ExtractionMetadata::new(
            FileFormat::Delimited,
            "a.csv",
            &ExtractOptions::new(),
        );
        let err = IngestError::parse("boom");
        let result = ExtractionResult::failure(&err, metadata);
        assert!(!result.success);
        assert!(result.records.is_empty());
        assert_eq!(result.record_count, 0);
        assert!(result.error.is_some());
        assert_eq!(result.metadata.error_code.as_deref(), Some("PARSE_ERROR"));
    }

    #[tokio::test]
    async fn test_extract_path_missing_file_raises() {
        let extractor = StaticExtractor { records: 0, fail: false };
        let err = extractor
            .extract_path(Path::new("/nope/missing.csv"), &ExtractOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FILE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_extract_path_wrong_format_raises() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"%PDF-").unwrap();

        let extractor = StaticExtractor { records: 0, fail: false };
        let err = extractor
            .extract_path(&path, &ExtractOptions::new())
            .await
            .unwrap_err();
        match err {
            IngestError::UnsupportedFormat { format, registered, .. } => {
                assert_eq!(format, FileFormat::DocumentPortable);
                assert_eq!(registered, vec![FileFormat::Delimited]);
            }
            other => panic!("expected unsupported format, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_extract_path_captures_parse_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        std::fs::write(&path, b"a,b\n1,2\n").unwrap();

        let extractor = StaticExtractor { records: 0, fail: true };
        let result = extractor
            .extract_path(&path, &ExtractOptions::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("synthetic failure"));
    }

    #[tokio::test]
    async fn test_schema_validation_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        std::fs::write(&path, b"whatever").unwrap();

        let extractor = StaticExtractor { records: 2, fail: false };
        let opts = ExtractOptions::new().with_schema(RecordSchema::new(["amount"]));
        let result = extractor.extract_path(&path, &opts).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.metadata.error_code.as_deref(), Some("VALIDATION_ERROR"));
    }

    #[test]
    fn test_schema_counts_examined_records() {
        let good: Record = [("amount".to_string(), serde_json::json!(5))].into_iter().collect();
        let bad = Record::new();
        let schema = RecordSchema::new(["amount"]);
        let err = schema.validate(&[good.clone(), good, bad]).unwrap_err();
        match err {
            IngestError::Validation { records_examined, .. } => assert_eq!(records_examined, 2),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_extract_buffered_meters_attempts() {
        let metrics = Arc::new(IngestionMetrics::new());
        let opts = ExtractOptions::new().with_metrics(metrics.clone());
        let extractor = StaticExtractor { records: 3, fail: false };

        let result = extractor
            .extract_buffered("rows.csv", FileFormat::Delimited, b"x", &opts)
            .await;
        assert!(result.success);
        assert_eq!(result.record_count, 3);

        let snap = metrics.snapshot().await;
        assert_eq!(snap.total_parsed, 1);
        assert_eq!(snap.total_success, 1);
        assert_eq!(snap.recent.len(), 1);
    }
}
