//! Reportflow ingestion pipeline.
//!
//! Turns vendor report attachments into normalized records: detect the
//! format, reject content already processed inside the retention window,
//! extract with the format's registered extractor, and meter every
//! attempt. The [`orchestrator::Ingestor`] is the front door; the
//! individual pieces are public for callers that need finer control.

pub mod dedup;
pub mod detector;
pub mod extractors;
pub mod hashing;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod retry;

pub use dedup::{
    DuplicateRecord, DuplicateRegistry, DuplicateStore, MemoryDuplicateStore, PgDuplicateStore,
};
pub use extractors::{
    DelimitedExtractor, DocumentExtractor, ExtractOptions, ExtractionMetadata, ExtractionResult,
    Extractor, RecordSchema, SpreadsheetExtractor, StructuredTextExtractor,
};
pub use metrics::{IngestionMetrics, MetricsSnapshot};
pub use orchestrator::{IngestSource, IngestionRequest, Ingestor};
pub use registry::ExtractorRegistry;
pub use retry::{execute_with_retry, execute_with_retry_default, RetryConfig, RetryPolicy};
