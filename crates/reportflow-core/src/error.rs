//! Error taxonomy for the ingestion core.
//!
//! Every failure in the pipeline is one of five operational kinds, plus an
//! `Internal` catch-all for unclassified failures. Operational errors are
//! expected in normal operation (bad uploads, duplicates, unreachable
//! stores); `Internal` signals a defect and is never retried or suppressed.

use crate::types::{ContentDigest, FileFormat};
use std::collections::HashMap;

/// Free-form diagnostic context attached to an error.
pub type ErrorContext = HashMap<String, serde_json::Value>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Malformed or schema-non-conforming input. Client-class, permanent.
    #[error("validation failed after {records_examined} record(s): {message}")]
    Validation {
        message: String,
        records_examined: usize,
        context: ErrorContext,
    },

    /// The source file does not exist. Client-class, permanent.
    #[error("file not found: {path}")]
    FileNotFound { path: String, context: ErrorContext },

    /// No extractor is registered for the detected format. Permanent.
    #[error("unsupported format {format} (registered: {registered:?})")]
    UnsupportedFormat {
        format: FileFormat,
        registered: Vec<FileFormat>,
        context: ErrorContext,
    },

    /// An I/O or parsing failure mid-extraction. Possibly transient, the
    /// only kind the retry executor will act on by default.
    #[error("parse failure: {message}")]
    Parse {
        message: String,
        context: ErrorContext,
        #[source]
        source: Option<BoxError>,
    },

    /// Identical byte content was already processed inside the retention
    /// window. Permanent, but distinct so callers can treat it as success.
    #[error("duplicate content {digest} ({file_name}, {bytes} bytes)")]
    Duplicate {
        digest: ContentDigest,
        format: FileFormat,
        file_name: String,
        bytes: u64,
        context: ErrorContext,
    },

    /// A defect in the core itself, wrapping whatever was raised. Escalate;
    /// never treat as routine.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IngestError {
    pub fn validation(message: impl Into<String>, records_examined: usize) -> Self {
        Self::Validation {
            message: message.into(),
            records_examined,
            context: ErrorContext::new(),
        }
    }

    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound {
            path: path.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn unsupported_format(format: FileFormat, registered: Vec<FileFormat>) -> Self {
        Self::UnsupportedFormat {
            format,
            registered,
            context: ErrorContext::new(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            context: ErrorContext::new(),
            source: None,
        }
    }

    pub fn parse_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Parse {
            message: message.into(),
            context: ErrorContext::new(),
            source: Some(Box::new(source)),
        }
    }

    pub fn duplicate(
        digest: ContentDigest,
        format: FileFormat,
        file_name: impl Into<String>,
        bytes: u64,
    ) -> Self {
        Self::Duplicate {
            digest,
            format,
            file_name: file_name.into(),
            bytes,
            context: ErrorContext::new(),
        }
    }

    /// Wrap an unclassified failure. Marks the result non-operational.
    pub fn from_unclassified(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }

    /// Stable machine code for logs, alerts, and result metadata.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::FileNotFound { .. } => "FILE_NOT_FOUND",
            Self::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            Self::Parse { .. } => "PARSE_ERROR",
            Self::Duplicate { .. } => "DUPLICATE_FILE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Numeric severity class, HTTP-shaped for familiarity.
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::FileNotFound { .. } => 404,
            Self::UnsupportedFormat { .. } => 415,
            Self::Duplicate { .. } => 409,
            Self::Parse { .. } => 422,
            Self::Internal(_) => 500,
        }
    }

    /// Whether this condition is expected in normal operation. `Internal`
    /// is the lone non-operational kind: it means the core misbehaved.
    pub fn is_operational(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }

    /// Whether a retry could plausibly change the outcome. Validation,
    /// missing files, unsupported formats, and duplicates are permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }

    /// Attach a diagnostic key/value. No-op for `Internal`, which carries
    /// its own anyhow chain.
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.insert(key.into(), value);
        }
        self
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::Validation { context, .. }
            | Self::FileNotFound { context, .. }
            | Self::UnsupportedFormat { context, .. }
            | Self::Parse { context, .. }
            | Self::Duplicate { context, .. } => Some(context),
            Self::Internal(_) => None,
        }
    }

    fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            Self::Validation { context, .. }
            | Self::FileNotFound { context, .. }
            | Self::UnsupportedFormat { context, .. }
            | Self::Parse { context, .. }
            | Self::Duplicate { context, .. } => Some(context),
            Self::Internal(_) => None,
        }
    }
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        Self::parse_with_source(format!("i/o failure: {}", err), err)
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse_with_source(format!("invalid JSON: {}", err), err)
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
