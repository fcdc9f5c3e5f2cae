//! Core types, error taxonomy, and configuration for Reportflow.
//!
//! Everything shared between the ingestion pipeline and its collaborators
//! lives here: the attachment format enum, the content digest newtype, the
//! closed set of typed errors, and environment-driven configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::{DatabaseConfig, IngestionConfig, ReportflowConfig, RetrySettings};
pub use error::{ErrorContext, IngestError, Result};
pub use types::{ContentDigest, FileFormat, Record};
