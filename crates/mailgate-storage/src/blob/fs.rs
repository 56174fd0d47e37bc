//! Filesystem blob store

use super::{BlobError, BlobKey, BlobResult, BlobStore, BlobWriter};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Directory holding in-flight writes; hidden from `list`.
const TMP_DIR: &str = ".tmp";

/// One file per blob under a root directory.
///
/// Writes go to a temporary file first and are renamed into place on commit,
/// so readers and `list` only ever see complete objects.
#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> BlobResult<Self> {
        let root = root.as_ref().to_path_buf();
        let root_str = root.display().to_string();

        std::fs::create_dir_all(root.join(TMP_DIR))
            .map_err(|e| BlobError::from_io(&root_str, e))?;

        info!(path = %root.display(), "Initialized filesystem blob store");

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // Keys cannot contain separators or start with '.', so the result
    // always stays directly under the root.
    fn object_path(&self, key: &BlobKey) -> PathBuf {
        self.root.join(key.as_str())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn create(
        &self,
        key: &BlobKey,
        _size_hint: Option<u64>,
    ) -> BlobResult<Box<dyn BlobWriter>> {
        let tmp_path = self
            .root
            .join(TMP_DIR)
            .join(Uuid::new_v4().simple().to_string());

        let file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| BlobError::from_io(key.as_str(), e))?;

        Ok(Box::new(FsBlobWriter {
            key: key.clone(),
            tmp_path,
            final_path: self.object_path(key),
            file: Some(file),
            written: 0,
        }))
    }

    async fn get(&self, key: &BlobKey) -> BlobResult<Vec<u8>> {
        let data = fs::read(self.object_path(key))
            .await
            .map_err(|e| BlobError::from_io(key.as_str(), e))?;

        debug!(key = %key, size = data.len(), "Read blob");

        Ok(data)
    }

    async fn delete(&self, key: &BlobKey) -> BlobResult<()> {
        match fs::remove_file(self.object_path(key)).await {
            Ok(()) => {
                debug!(key = %key, "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobError::from_io(key.as_str(), e)),
        }
    }

    async fn list(&self) -> BlobResult<Vec<BlobKey>> {
        let root_str = self.root.display().to_string();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| BlobError::from_io(&root_str, e))?;

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BlobError::from_io(&root_str, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }

            // Files that are not valid keys were not written by us.
            if let Some(key) = entry
                .file_name()
                .to_str()
                .and_then(|name| BlobKey::new(name).ok())
            {
                keys.push(key);
            }
        }

        keys.sort();
        Ok(keys)
    }
}

struct FsBlobWriter {
    key: BlobKey,
    tmp_path: PathBuf,
    final_path: PathBuf,
    file: Option<fs::File>,
    written: u64,
}

impl FsBlobWriter {
    fn file(&mut self) -> BlobResult<&mut fs::File> {
        self.file.as_mut().ok_or(BlobError::WriterClosed)
    }
}

#[async_trait]
impl BlobWriter for FsBlobWriter {
    async fn write(&mut self, chunk: &[u8]) -> BlobResult<()> {
        let key = self.key.clone();
        self.file()?
            .write_all(chunk)
            .await
            .map_err(|e| BlobError::from_io(key.as_str(), e))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn commit(&mut self) -> BlobResult<()> {
        let mut file = self.file.take().ok_or(BlobError::WriterClosed)?;
        let key = self.key.as_str();

        let synced = match file.flush().await {
            Ok(()) => file.sync_all().await,
            Err(e) => Err(e),
        };
        drop(file);

        let published = match synced {
            Ok(()) => fs::rename(&self.tmp_path, &self.final_path).await,
            Err(e) => Err(e),
        };

        if let Err(e) = published {
            if let Err(cleanup) = fs::remove_file(&self.tmp_path).await {
                warn!(path = %self.tmp_path.display(), error = %cleanup, "Failed to remove temporary blob");
            }
            return Err(BlobError::from_io(key, e));
        }

        debug!(key = %key, size = self.written, "Stored blob");
        Ok(())
    }

    async fn abort(&mut self) -> BlobResult<()> {
        drop(self.file.take().ok_or(BlobError::WriterClosed)?);
        match fs::remove_file(&self.tmp_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobError::from_io(self.key.as_str(), e)),
        }
    }
}

impl Drop for FsBlobWriter {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}
