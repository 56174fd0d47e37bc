//! In-memory blob store

use super::{BlobError, BlobKey, BlobResult, BlobStore, BlobWriter, OverwritePolicy};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

type Objects = Arc<RwLock<BTreeMap<BlobKey, Arc<[u8]>>>>;

/// Process-local store, mostly useful for tests and ephemeral setups
#[derive(Debug)]
pub struct MemoryBlobStore {
    objects: Objects,
    overwrite: OverwritePolicy,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    /// Create an empty store where re-putting a key replaces it
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            overwrite: OverwritePolicy::Replace,
        }
    }

    /// Create an empty store that refuses to overwrite existing keys
    pub fn create_only() -> Self {
        Self {
            overwrite: OverwritePolicy::Reject,
            ..Self::new()
        }
    }

    /// Number of committed objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn create(
        &self,
        key: &BlobKey,
        size_hint: Option<u64>,
    ) -> BlobResult<Box<dyn BlobWriter>> {
        let capacity = size_hint.unwrap_or(0).min(1 << 20) as usize;
        Ok(Box::new(MemoryBlobWriter {
            key: key.clone(),
            objects: self.objects.clone(),
            overwrite: self.overwrite,
            buffer: Some(Vec::with_capacity(capacity)),
        }))
    }

    async fn get(&self, key: &BlobKey) -> BlobResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|data| data.to_vec())
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &BlobKey) -> BlobResult<()> {
        if self.objects.write().await.remove(key).is_some() {
            debug!(key = %key, "Deleted blob");
        }
        Ok(())
    }

    async fn list(&self) -> BlobResult<Vec<BlobKey>> {
        Ok(self.objects.read().await.keys().cloned().collect())
    }

    fn overwrite_policy(&self) -> OverwritePolicy {
        self.overwrite
    }
}

struct MemoryBlobWriter {
    key: BlobKey,
    objects: Objects,
    overwrite: OverwritePolicy,
    buffer: Option<Vec<u8>>,
}

#[async_trait]
impl BlobWriter for MemoryBlobWriter {
    async fn write(&mut self, chunk: &[u8]) -> BlobResult<()> {
        self.buffer
            .as_mut()
            .ok_or(BlobError::WriterClosed)?
            .extend_from_slice(chunk);
        Ok(())
    }

    async fn commit(&mut self) -> BlobResult<()> {
        let data = self.buffer.take().ok_or(BlobError::WriterClosed)?;
        let size = data.len();

        let mut objects = self.objects.write().await;
        if self.overwrite == OverwritePolicy::Reject && objects.contains_key(&self.key) {
            return Err(BlobError::AlreadyExists(self.key.to_string()));
        }
        objects.insert(self.key.clone(), Arc::from(data));

        debug!(key = %self.key, size, "Stored blob");
        Ok(())
    }

    async fn abort(&mut self) -> BlobResult<()> {
        self.buffer.take().ok_or(BlobError::WriterClosed)?;
        Ok(())
    }
}
