//! Content hashing for deduplication.
//!
//! The digest always covers the complete byte stream, computed in fixed
//! chunks so large attachments never sit in memory just to be hashed. Read
//! failures surface as transient [`IngestError::Parse`] errors; retrying is
//! the caller's decision, never the hasher's.

use reportflow_core::{ContentDigest, IngestError, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

const HASH_CHUNK_SIZE: usize = 8192;

/// Hash a byte stream chunk-by-chunk.
pub async fn hash_reader<R>(reader: &mut R) -> Result<ContentDigest>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_CHUNK_SIZE];

    loop {
        let read = reader
            .read(&mut buffer)
            .await
            .map_err(|e| IngestError::parse_with_source("content hashing read failed", e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(ContentDigest::from_digest_bytes(hasher.finalize()))
}

/// Hash a file's full content.
pub async fn hash_file(path: impl AsRef<Path>) -> Result<ContentDigest> {
    let mut file = tokio::fs::File::open(path.as_ref())
        .await
        .map_err(|e| IngestError::parse_with_source("content hashing open failed", e))?;
    hash_reader(&mut file).await
}

/// Hash content already in memory.
pub fn hash_bytes(content: &[u8]) -> ContentDigest {
    let mut hasher = Sha256::new();
    hasher.update(content);
    ContentDigest::from_digest_bytes(hasher.finalize())
}
