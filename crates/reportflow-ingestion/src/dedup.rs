//! Duplicate registry: digest → expiry records over a pluggable store.
//!
//! The registry answers "have we already processed these exact bytes inside
//! the retention window?". Two policy points are deliberate:
//!
//! - An insert that races with another ingestion of identical content reads
//!   as success. Uniqueness conflicts are how concurrent dedup stays
//!   correct without any application-level locking.
//! - A store lookup failure fails the whole request, as a transient
//!   [`IngestError::Parse`]. We never degrade to "not a duplicate" (risks
//!   double-processing) or "duplicate" (silently drops legitimate work).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reportflow_core::{ContentDigest, FileFormat, IngestError, Result};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// How long a seen digest keeps blocking identical content.
pub const DEFAULT_RETENTION_DAYS: i64 = 60;

/// One previously-seen content digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub digest: ContentDigest,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DuplicateRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Durable storage for duplicate records. Implementations must treat an
/// insert over a live digest as success without replacing it, and must
/// replace an expired record so the retention window re-arms.
#[async_trait]
pub trait DuplicateStore: Send + Sync {
    async fn lookup(&self, digest: &ContentDigest) -> Result<Option<DuplicateRecord>>;
    async fn insert(&self, record: DuplicateRecord) -> Result<()>;
}

/// In-memory store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryDuplicateStore {
    records: RwLock<HashMap<String, DuplicateRecord>>,
}

impl MemoryDuplicateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl DuplicateStore for MemoryDuplicateStore {
    async fn lookup(&self, digest: &ContentDigest) -> Result<Option<DuplicateRecord>> {
        Ok(self.records.read().await.get(digest.as_str()).cloned())
    }

    async fn insert(&self, record: DuplicateRecord) -> Result<()> {
        use std::collections::hash_map::Entry;

        // First writer wins while the existing record is live; an expired
        // record is replaced so the retention window re-arms.
        let now = Utc::now();
        match self
            .records
            .write()
            .await
            .entry(record.digest.as_str().to_string())
        {
            Entry::Occupied(mut occupied) if occupied.get().is_expired_at(now) => {
                occupied.insert(record);
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(vacant) => {
                vacant.insert(record);
            }
        }
        Ok(())
    }
}

/// Postgres-backed store.
pub struct PgDuplicateStore {
    pool: sqlx::PgPool,
}

impl PgDuplicateStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS duplicate_records (\
                 digest TEXT PRIMARY KEY,\
                 metadata JSONB NOT NULL DEFAULT '{}'::jsonb,\
                 created_at TIMESTAMPTZ NOT NULL,\
                 expires_at TIMESTAMPTZ NOT NULL\
             )",
        )
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }
}

#[async_trait]
impl DuplicateStore for PgDuplicateStore {
    async fn lookup(&self, digest: &ContentDigest) -> Result<Option<DuplicateRecord>> {
        let row = sqlx::query(
            "SELECT digest, metadata, created_at, expires_at \
             FROM duplicate_records WHERE digest = $1",
        )
        .bind(digest.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(|row| {
            Ok(DuplicateRecord {
                digest: ContentDigest::from_hex(row.try_get::<String, _>("digest").map_err(store_error)?),
                metadata: row.try_get("metadata").map_err(store_error)?,
                created_at: row.try_get("created_at").map_err(store_error)?,
                expires_at: row.try_get("expires_at").map_err(store_error)?,
            })
        })
        .transpose()
    }

    async fn insert(&self, record: DuplicateRecord) -> Result<()> {
        // The unique constraint is the concurrency story: a racing insert of
        // the same digest must read as success. A conflicting row that has
        // already expired is overwritten so the retention window re-arms.
        sqlx::query(
            "INSERT INTO duplicate_records (digest, metadata, created_at, expires_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (digest) DO UPDATE SET \
                 metadata = EXCLUDED.metadata, \
                 created_at = EXCLUDED.created_at, \
                 expires_at = EXCLUDED.expires_at \
             WHERE duplicate_records.expires_at <= now()",
        )
        .bind(record.digest.as_str())
        .bind(&record.metadata)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }
}

fn store_error(err: sqlx::Error) -> IngestError {
    IngestError::parse_with_source("duplicate store unavailable", err)
}

/// Retention-window policy over a [`DuplicateStore`].
pub struct DuplicateRegistry {
    store: Arc<dyn DuplicateStore>,
    window: Duration,
}

impl DuplicateRegistry {
    pub fn new(store: Arc<dyn DuplicateStore>) -> Self {
        Self::with_window(store, Duration::days(DEFAULT_RETENTION_DAYS))
    }

    pub fn with_window(store: Arc<dyn DuplicateStore>, window: Duration) -> Self {
        Self { store, window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// True iff a non-expired record exists for this digest. A store
    /// failure propagates; see the module policy note.
    pub async fn is_duplicate(&self, digest: &ContentDigest) -> Result<bool> {
        let now = Utc::now();
        match self.store.lookup(digest).await? {
            Some(record) if !record.is_expired_at(now) => Ok(true),
            Some(_) => {
                debug!(digest = %digest, "digest found but expired, treating as new");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Remember a digest with expiry = now + window.
    pub async fn record(&self, digest: &ContentDigest, metadata: serde_json::Value) -> Result<()> {
        let now = Utc::now();
        self.store
            .insert(DuplicateRecord {
                digest: digest.clone(),
                metadata,
                created_at: now,
                expires_at: now + self.window,
            })
            .await?;
        debug!(digest = %digest, "digest recorded");
        Ok(())
    }

    /// Dedup gate for one attachment: fails with [`IngestError::Duplicate`]
    /// when the digest is known, records it otherwise.
    pub async fn check_and_record(
        &self,
        digest: &ContentDigest,
        format: FileFormat,
        file_name: &str,
        bytes: u64,
        metadata: serde_json::Value,
    ) -> Result<()> {
        if self.is_duplicate(digest).await? {
            info!(digest = %digest, file_name, "duplicate content rejected");
            return Err(
                IngestError::duplicate(digest.clone(), format, file_name, bytes)
                    .with_context("metadata", metadata),
            );
        }
        // Record before returning so a concurrent identical upload is very
        // likely to observe the duplicate.
        self.record(digest, metadata).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(tag: &str) -> ContentDigest {
        crate::hashing::hash_bytes(tag.as_bytes())
    }

    #[tokio::test]
    async fn test_first_seen_is_not_duplicate() {
        let registry = DuplicateRegistry::new(Arc::new(MemoryDuplicateStore::new()));
        let d = digest("a");
        assert!(!registry.is_duplicate(&d).await.unwrap());
    }

    #[tokio::test]
    async fn test_recorded_digest_is_duplicate() {
        let registry = DuplicateRegistry::new(Arc::new(MemoryDuplicateStore::new()));
        let d = digest("a");
        registry.record(&d, serde_json::json!({})).await.unwrap();
        assert!(registry.is_duplicate(&d).await.unwrap());
        assert!(!registry.is_duplicate(&digest("b")).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_record_reads_as_new() {
        let registry = DuplicateRegistry::with_window(
            Arc::new(MemoryDuplicateStore::new()),
            Duration::zero(),
        );
        let d = digest("a");
        registry.record(&d, serde_json::json!({})).await.unwrap();
        assert!(!registry.is_duplicate(&d).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_insert_is_success() {
        let store = Arc::new(MemoryDuplicateStore::new());
        let registry = DuplicateRegistry::new(store.clone());
        let d = digest("a");
        registry.record(&d, serde_json::json!({"first": true})).await.unwrap();
        // Second insert of the same digest must not fail.
        registry.record(&d, serde_json::json!({"second": true})).await.unwrap();
        assert_eq!(store.len().await, 1);
        // First writer's metadata survives.
        let kept = store.lookup(&d).await.unwrap().unwrap();
        assert_eq!(kept.metadata["first"], true);
    }

    #[tokio::test]
    async fn test_expired_digest_rearms_on_reingest() {
        let store = Arc::new(MemoryDuplicateStore::new());
        let d = digest("a");

        // Seed a record that is expired the moment it lands.
        DuplicateRegistry::with_window(store.clone(), Duration::zero())
            .record(&d, serde_json::json!({"round": 1}))
            .await
            .unwrap();

        // Re-ingesting through a live window succeeds once and blocks again.
        let registry = DuplicateRegistry::new(store.clone());
        registry
            .check_and_record(&d, FileFormat::Delimited, "sales.csv", 42, serde_json::json!({"round": 2}))
            .await
            .unwrap();
        let err = registry
            .check_and_record(&d, FileFormat::Delimited, "sales.csv", 42, serde_json::json!({"round": 3}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_FILE");

        // The refreshed record carries the new metadata and a live expiry.
        let kept = store.lookup(&d).await.unwrap().unwrap();
        assert_eq!(kept.metadata["round"], 2);
        assert!(!kept.is_expired_at(Utc::now()));
    }

    #[tokio::test]
    async fn test_check_and_record_flow() {
        let registry = DuplicateRegistry::new(Arc::new(MemoryDuplicateStore::new()));
        let d = digest("sales");

        registry
            .check_and_record(&d, FileFormat::Delimited, "sales.csv", 42, serde_json::json!({}))
            .await
            .unwrap();

        let err = registry
            .check_and_record(&d, FileFormat::Delimited, "sales.csv", 42, serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_FILE");
        match err {
            IngestError::Duplicate { digest: seen, bytes, .. } => {
                assert_eq!(seen, d);
                assert_eq!(bytes, 42);
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    struct FailingStore;

    #[async_trait]
    impl DuplicateStore for FailingStore {
        async fn lookup(&self, _digest: &ContentDigest) -> Result<Option<DuplicateRecord>> {
            Err(IngestError::parse("store unreachable"))
        }

        async fn insert(&self, _record: DuplicateRecord) -> Result<()> {
            Err(IngestError::parse("store unreachable"))
        }
    }

    #[tokio::test]
    async fn test_lookup_failure_fails_the_request() {
        // Never silently "not duplicate" when the store is down.
        let registry = DuplicateRegistry::new(Arc::new(FailingStore));
        let err = registry.is_duplicate(&digest("a")).await.unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
        assert!(err.is_retryable());
    }
}
