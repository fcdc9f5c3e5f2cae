//! Extraction throughput and failure metrics.
//!
//! One [`IngestionMetrics`] instance is built at startup and injected into
//! the orchestrator; it is never ambient global state. Aggregate counters
//! are atomics, the per-format breakdown and the recent-operation ring
//! buffer sit behind async locks.

use chrono::{DateTime, Utc};
use reportflow_core::{ContentDigest, FileFormat};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How many recent operation samples are retained, oldest evicted first.
pub const RECENT_CAPACITY: usize = 100;

/// Handle returned by [`IngestionMetrics::record_start`], closed by
/// [`IngestionMetrics::record_complete`].
#[derive(Debug)]
pub struct OperationToken {
    pub id: Uuid,
    started: Instant,
}

impl OperationToken {
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// One completed extraction attempt.
#[derive(Debug, Clone, Serialize)]
pub struct OperationSample {
    pub format: FileFormat,
    pub file_name: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub bytes: u64,
    pub record_count: usize,
}

/// Per-format aggregate counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FormatStats {
    pub parsed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub bytes: u64,
}

/// Immutable copy of all counters for external reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_parsed: u64,
    pub total_success: u64,
    pub total_failure: u64,
    pub total_duplicates: u64,
    pub total_bytes: u64,
    pub total_duration_ms: u64,
    pub per_format: HashMap<FileFormat, FormatStats>,
    pub recent: Vec<OperationSample>,
}

#[derive(Default)]
pub struct IngestionMetrics {
    total_parsed: AtomicU64,
    total_success: AtomicU64,
    total_failure: AtomicU64,
    total_duplicates: AtomicU64,
    total_bytes: AtomicU64,
    total_duration_ms: AtomicU64,
    per_format: RwLock<HashMap<FileFormat, FormatStats>>,
    recent: RwLock<VecDeque<OperationSample>>,
}

impl IngestionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an operation; the returned token carries the wall-clock start.
    pub fn record_start(&self, format: FileFormat, file_name: &str, bytes: u64) -> OperationToken {
        let token = OperationToken {
            id: Uuid::new_v4(),
            started: Instant::now(),
        };
        debug!(
            operation_id = %token.id,
            format = %format,
            file_name,
            bytes,
            "extraction started"
        );
        token
    }

    /// Close an operation: bump aggregates, the per-format breakdown, and
    /// the recent ring buffer, then emit a structured event.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_complete(
        &self,
        token: OperationToken,
        format: FileFormat,
        file_name: &str,
        bytes: u64,
        success: bool,
        record_count: usize,
        error: Option<&str>,
    ) {
        let duration_ms = token.elapsed_ms();

        self.total_parsed.fetch_add(1, Ordering::Relaxed);
        if success {
            self.total_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_failure.fetch_add(1, Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.total_duration_ms.fetch_add(duration_ms, Ordering::Relaxed);

        {
            let mut per_format = self.per_format.write().await;
            let stats = per_format.entry(format).or_default();
            stats.parsed += 1;
            stats.bytes += bytes;
            if success {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
        }

        {
            let mut recent = self.recent.write().await;
            if recent.len() == RECENT_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(OperationSample {
                format,
                file_name: file_name.to_string(),
                timestamp: Utc::now(),
                duration_ms,
                success,
                bytes,
                record_count,
            });
        }

        if success {
            info!(
                operation_id = %token.id,
                format = %format,
                file_name,
                bytes,
                record_count,
                duration_ms,
                "extraction completed"
            );
        } else {
            warn!(
                operation_id = %token.id,
                format = %format,
                file_name,
                bytes,
                duration_ms,
                error = error.unwrap_or("unknown"),
                "extraction failed"
            );
        }
    }

    /// Count a duplicate rejection; duplicates never enter the parsed totals.
    pub fn record_duplicate(
        &self,
        format: FileFormat,
        file_name: &str,
        bytes: u64,
        digest: &ContentDigest,
    ) {
        self.total_duplicates.fetch_add(1, Ordering::Relaxed);
        info!(
            format = %format,
            file_name,
            bytes,
            digest = %digest,
            "duplicate attachment skipped"
        );
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_parsed: self.total_parsed.load(Ordering::Relaxed),
            total_success: self.total_success.load(Ordering::Relaxed),
            total_failure: self.total_failure.load(Ordering::Relaxed),
            total_duplicates: self.total_duplicates.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            total_duration_ms: self.total_duration_ms.load(Ordering::Relaxed),
            per_format: self.per_format.read().await.clone(),
            recent: self.recent.read().await.iter().cloned().collect(),
        }
    }

    /// Zero everything. Test and operational utility only.
    pub async fn reset(&self) {
        self.total_parsed.store(0, Ordering::Relaxed);
        self.total_success.store(0, Ordering::Relaxed);
        self.total_failure.store(0, Ordering::Relaxed);
        self.total_duplicates.store(0, Ordering::Relaxed);
        self.total_bytes.store(0, Ordering::Relaxed);
        self.total_duration_ms.store(0, Ordering::Relaxed);
        self.per_format.write().await.clear();
        self.recent.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn complete(
        metrics: &IngestionMetrics,
        format: FileFormat,
        success: bool,
        records: usize,
    ) {
        let token = metrics.record_start(format, "file", 10);
        metrics
            .record_complete(token, format, "file", 10, success, records, None)
            .await;
    }

    #[tokio::test]
    async fn test_counters_conserved() {
        let metrics = IngestionMetrics::new();
        complete(&metrics, FileFormat::Delimited, true, 3).await;
        complete(&metrics, FileFormat::Delimited, false, 0).await;
        complete(&metrics, FileFormat::StructuredText, true, 1).await;

        let snap = metrics.snapshot().await;
        assert_eq!(snap.total_parsed, 3);
        assert_eq!(snap.total_success, 2);
        assert_eq!(snap.total_failure, 1);
        assert_eq!(snap.total_bytes, 30);

        let parsed: u64 = snap.per_format.values().map(|s| s.parsed).sum();
        let succeeded: u64 = snap.per_format.values().map(|s| s.succeeded).sum();
        let failed: u64 = snap.per_format.values().map(|s| s.failed).sum();
        assert_eq!(parsed, snap.total_parsed);
        assert_eq!(succeeded, snap.total_success);
        assert_eq!(failed, snap.total_failure);
    }

    #[tokio::test]
    async fn test_ring_buffer_evicts_oldest_first() {
        let metrics = IngestionMetrics::new();
        for i in 0..(RECENT_CAPACITY + 5) {
            let token = metrics.record_start(FileFormat::Delimited, &format!("f{i}"), 1);
            metrics
                .record_complete(token, FileFormat::Delimited, &format!("f{i}"), 1, true, 0, None)
                .await;
        }
        let snap = metrics.snapshot().await;
        assert_eq!(snap.recent.len(), RECENT_CAPACITY);
        // The five oldest samples were evicted.
        assert_eq!(snap.recent[0].file_name, "f5");
        assert_eq!(
            snap.recent.last().unwrap().file_name,
            format!("f{}", RECENT_CAPACITY + 4)
        );
    }

    #[tokio::test]
    async fn test_duplicates_counted_separately() {
        let metrics = IngestionMetrics::new();
        let digest = crate::hashing::hash_bytes(b"x");
        metrics.record_duplicate(FileFormat::Delimited, "sales.csv", 9, &digest);
        metrics.record_duplicate(FileFormat::Delimited, "sales.csv", 9, &digest);

        let snap = metrics.snapshot().await;
        assert_eq!(snap.total_duplicates, 2);
        assert_eq!(snap.total_parsed, 0);
    }

    #[tokio::test]
    async fn test_reset_zeroes_everything() {
        let metrics = IngestionMetrics::new();
        complete(&metrics, FileFormat::Delimited, true, 3).await;
        metrics.reset().await;

        let snap = metrics.snapshot().await;
        assert_eq!(snap.total_parsed, 0);
        assert!(snap.per_format.is_empty());
        assert!(snap.recent.is_empty());
    }
}
