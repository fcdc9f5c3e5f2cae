//! Ingestion orchestration.
//!
//! [`Ingestor`] ties the pieces together for one attachment: resolve the
//! format (request hint first, then detection), enforce the size cap, run
//! the duplicate gate with retry around the store round trip, hand off to
//! the registered extractor, and meter the attempt. Batches run
//! sequentially and continue past per-file failures.

use reportflow_core::{FileFormat, IngestError, IngestionConfig, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::dedup::{DuplicateRegistry, DuplicateStore};
use crate::detector;
use crate::extractors::{ExtractOptions, ExtractionResult, RecordSchema};
use crate::hashing;
use crate::metrics::IngestionMetrics;
use crate::registry::ExtractorRegistry;
use crate::retry::{execute_with_retry_default, RetryPolicy};

/// Where the attachment bytes come from.
pub enum IngestSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// One attachment to ingest, plus caller-supplied context.
pub struct IngestionRequest {
    pub source: IngestSource,
    pub file_name: String,
    /// Overrides format detection when set.
    pub format_hint: Option<FileFormat>,
    pub schema: Option<RecordSchema>,
    pub vendor: Option<String>,
    pub report_type: Option<String>,
    /// Stored alongside the digest when the duplicate gate records it.
    pub metadata: serde_json::Value,
    /// Per-request override of the configured duplicate-checking default.
    pub check_duplicates: Option<bool>,
}

impl IngestionRequest {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self::new(IngestSource::Path(path), file_name)
    }

    pub fn from_bytes(file_name: impl Into<String>, content: Vec<u8>) -> Self {
        Self::new(IngestSource::Bytes(content), file_name.into())
    }

    fn new(source: IngestSource, file_name: String) -> Self {
        Self {
            source,
            file_name,
            format_hint: None,
            schema: None,
            vendor: None,
            report_type: None,
            metadata: serde_json::json!({}),
            check_duplicates: None,
        }
    }

    pub fn with_format_hint(mut self, format: FileFormat) -> Self {
        self.format_hint = Some(format);
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

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_check_duplicates(mut self, check: bool) -> Self {
        self.check_duplicates = Some(check);
        self
    }
}

pub struct Ingestor {
    registry: ExtractorRegistry,
    duplicates: Option<Arc<DuplicateRegistry>>,
    metrics: Arc<IngestionMetrics>,
    retry: RetryPolicy,
    config: IngestionConfig,
}

impl Ingestor {
    /// Orchestrator with the built-in extractors and no duplicate store.
    pub fn new(config: IngestionConfig) -> Self {
        Self {
            registry: ExtractorRegistry::with_defaults(),
            duplicates: None,
            metrics: Arc::new(IngestionMetrics::new()),
            retry: RetryPolicy::default_config(),
            config,
        }
    }

    /// Enable the duplicate gate over the given store, with the retention
    /// window taken from configuration.
    pub fn with_duplicate_store(mut self, store: Arc<dyn DuplicateStore>) -> Self {
        let window = chrono::Duration::days(self.config.dedup_window_days);
        self.duplicates = Some(Arc::new(DuplicateRegistry::with_window(store, window)));
        self
    }

    pub fn with_registry(mut self, registry: ExtractorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        self.metrics.clone()
    }

    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    /// Ingest one attachment.
    ///
    /// Missing files, unsupported formats, oversized content, and
    /// duplicates are raised as errors; failures inside extraction come
    /// back as a failed [`ExtractionResult`] so batches keep moving.
    pub async fn ingest(&self, request: &IngestionRequest) -> Result<ExtractionResult> {
        let file_name = request.file_name.as_str();

        let bytes = match &request.source {
            IngestSource::Path(path) => tokio::fs::metadata(path)
                .await
                .map_err(|_| IngestError::file_not_found(path.to_string_lossy()))?
                .len(),
            IngestSource::Bytes(content) => content.len() as u64,
        };
        if bytes > self.config.max_file_size {
            return Err(IngestError::validation(
                format!(
                    "attachment is {bytes} bytes, over the {} byte limit",
                    self.config.max_file_size
                ),
                0,
            )
            .with_context("file_name", serde_json::json!(file_name)));
        }

        let format = request.format_hint.unwrap_or_else(|| match &request.source {
            IngestSource::Path(_) => detector::detect(file_name),
            IngestSource::Bytes(content) => {
                detector::detect_with_content(file_name, &content[..content.len().min(512)])
            }
        });

        self.run_duplicate_gate(request, format, bytes).await?;

        let extractor = self.registry.get(format)?;
        let mut opts = ExtractOptions::new()
            .with_declared_format(format)
            .with_metrics(self.metrics.clone());
        if let Some(schema) = &request.schema {
            opts = opts.with_schema(schema.clone());
        }
        if let Some(vendor) = &request.vendor {
            opts = opts.with_vendor(vendor.clone());
        }
        if let Some(report_type) = &request.report_type {
            opts = opts.with_report_type(report_type.clone());
        }

        let result = match &request.source {
            IngestSource::Path(path) => extractor.extract_path(path, &opts).await?,
            IngestSource::Bytes(content) => {
                extractor.extract_buffered(file_name, format, content, &opts).await
            }
        };

        info!(
            file_name,
            format = %format,
            success = result.success,
            record_count = result.record_count,
            "ingestion finished"
        );
        Ok(result)
    }

    /// Ingest a batch sequentially; one bad attachment never stops the
    /// rest. Results line up with the input order.
    pub async fn ingest_all(
        &self,
        requests: &[IngestionRequest],
    ) -> Vec<Result<ExtractionResult>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            let outcome = self.ingest(request).await;
            if let Err(err) = &outcome {
                warn!(
                    file_name = request.file_name,
                    code = err.code(),
                    error = %err,
                    "attachment rejected"
                );
            }
            results.push(outcome);
        }
        results
    }

    /// Hash the content and run it through the duplicate registry, with
    /// the retry policy wrapping the store round trip. A duplicate is
    /// counted in metrics and raised; store outages surface after retries.
    async fn run_duplicate_gate(
        &self,
        request: &IngestionRequest,
        format: FileFormat,
        bytes: u64,
    ) -> Result<()> {
        let enabled = request
            .check_duplicates
            .unwrap_or(self.config.check_duplicates);
        let Some(duplicates) = self.duplicates.as_ref().filter(|_| enabled) else {
            return Ok(());
        };

        let digest = match &request.source {
            IngestSource::Path(path) => hashing::hash_file(path).await?,
            IngestSource::Bytes(content) => hashing::hash_bytes(content),
        };

        let file_name = request.file_name.as_str();
        let outcome = execute_with_retry_default(&self.retry, || {
            duplicates.check_and_record(
                &digest,
                format,
                file_name,
                bytes,
                request.metadata.clone(),
            )
        })
        .await;

        if let Err(IngestError::Duplicate { .. }) = &outcome {
            self.metrics.record_duplicate(format, file_name, bytes, &digest);
        }
        outcome
    }
}
