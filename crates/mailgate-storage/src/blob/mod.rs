//! Blob store abstraction
//!
//! A blob store is anything implementing [`BlobStore`]: the pipeline and the
//! delivery code never know whether bytes end up on disk, in a database or
//! in memory.

mod error;
mod fs;
mod memory;
mod sqlite;

pub use error::{BlobError, BlobResult};
pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;
pub use sqlite::SqliteBlobStore;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

const MAX_KEY_LEN: usize = 255;

/// Opaque name of a stored object.
///
/// Keys are restricted to a filename-safe alphabet so every backend can use
/// them verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey(String);

impl BlobKey {
    pub fn new(key: impl Into<String>) -> BlobResult<Self> {
        let key = key.into();

        let reason = if key.is_empty() {
            Some("key is empty")
        } else if key.len() > MAX_KEY_LEN {
            Some("key is longer than 255 bytes")
        } else if key.starts_with('.') {
            Some("key must not start with '.'")
        } else if !key.chars().all(is_key_char) {
            Some("key contains characters outside [A-Za-z0-9._@+=-]")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(BlobError::InvalidKey { key, reason }),
            None => Ok(Self(key)),
        }
    }

    /// Content-addressed key: lowercase hex SHA-256 of the data
    pub fn for_content(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for BlobKey {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '+' | '=' | '-')
}

/// Behavior of `delete` on a key that is not stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingKeyPolicy {
    /// Succeed silently
    Ignore,
    /// Fail with [`BlobError::NotFound`]
    NotFound,
}

/// Behavior of `put`/`commit` on a key that is already stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    /// The new content fully replaces the old one
    Replace,
    /// Fail with [`BlobError::AlreadyExists`], keeping the old content
    Reject,
}

/// Streaming writer returned by [`BlobStore::create`].
///
/// Nothing written becomes visible until [`BlobWriter::commit`] succeeds.
/// Dropping an uncommitted writer discards its data.
#[async_trait]
pub trait BlobWriter: Send {
    /// Append a chunk
    async fn write(&mut self, chunk: &[u8]) -> BlobResult<()>;

    /// Publish the object atomically
    async fn commit(&mut self) -> BlobResult<()>;

    /// Discard everything written so far
    async fn abort(&mut self) -> BlobResult<()>;
}

/// Blob store capability set
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Deferred initialization that may block on I/O
    async fn start(&self) -> BlobResult<()> {
        Ok(())
    }

    /// Open a streaming writer for `key`
    async fn create(&self, key: &BlobKey, size_hint: Option<u64>)
        -> BlobResult<Box<dyn BlobWriter>>;

    /// Read the full content of `key`
    async fn get(&self, key: &BlobKey) -> BlobResult<Vec<u8>>;

    /// Remove `key`
    async fn delete(&self, key: &BlobKey) -> BlobResult<()>;

    /// Keys of all committed objects, sorted
    async fn list(&self) -> BlobResult<Vec<BlobKey>>;

    /// Store `data` under `key` in one step
    async fn put(&self, key: &BlobKey, data: &[u8]) -> BlobResult<()> {
        let mut writer = self.create(key, Some(data.len() as u64)).await?;
        writer.write(data).await?;
        writer.commit().await
    }

    fn missing_key_policy(&self) -> MissingKeyPolicy {
        MissingKeyPolicy::Ignore
    }

    fn overwrite_policy(&self) -> OverwritePolicy {
        OverwritePolicy::Replace
    }
}

/// Shared handles are stores too
#[async_trait]
impl<S: BlobStore + ?Sized> BlobStore for Arc<S> {
    async fn start(&self) -> BlobResult<()> {
        (**self).start().await
    }

    async fn create(
        &self,
        key: &BlobKey,
        size_hint: Option<u64>,
    ) -> BlobResult<Box<dyn BlobWriter>> {
        (**self).create(key, size_hint).await
    }

    async fn get(&self, key: &BlobKey) -> BlobResult<Vec<u8>> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &BlobKey) -> BlobResult<()> {
        (**self).delete(key).await
    }

    async fn list(&self) -> BlobResult<Vec<BlobKey>> {
        (**self).list().await
    }

    async fn put(&self, key: &BlobKey, data: &[u8]) -> BlobResult<()> {
        (**self).put(key, data).await
    }

    fn missing_key_policy(&self) -> MissingKeyPolicy {
        (**self).missing_key_policy()
    }

    fn overwrite_policy(&self) -> OverwritePolicy {
        (**self).overwrite_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        assert!(BlobKey::new("msg-0001.eml").is_ok());
        assert!(BlobKey::new("user@example.com+1=2_x").is_ok());

        for bad in ["", ".hidden", "../etc/passwd", "a/b", "a b", "ключ"] {
            assert!(
                matches!(BlobKey::new(bad), Err(BlobError::InvalidKey { .. })),
                "{bad:?} should be rejected"
            );
        }

        assert!(BlobKey::new("x".repeat(255)).is_ok());
        assert!(BlobKey::new("x".repeat(256)).is_err());
    }

    #[test]
    fn test_content_key() {
        let key = BlobKey::for_content(b"hello");
        assert_eq!(
            key.as_str(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(BlobKey::new(key.as_str()).is_ok());
        assert_ne!(key, BlobKey::for_content(b"hello!"));
    }
}
