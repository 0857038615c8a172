//! Blob storage for uploaded documents and their extracted content.
//!
//! Keys are `/`-separated paths such as `pdf/docling/report/extracted_data.md`.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid storage key: '{0}'")]
    InvalidKey(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Write an object, replacing any previous content.
    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// All keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Reject empty keys and keys that could escape the store root.
pub fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.contains('\\')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Objects stored as files below a root directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, segment| path.join(segment)))
    }
}

fn io_error(key: &str, source: io::Error) -> StorageError {
    if source.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io {
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn kind(&self) -> &'static str {
        "fs"
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(key, e))?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| io_error(key, e))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|e| io_error(key, e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut dirs = vec![(self.root.clone(), String::new())];

        while let Some((dir, dir_key)) = dirs.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // Nothing stored yet
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&dir_key, e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_error(&dir_key, e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = if dir_key.is_empty() {
                    name
                } else {
                    format!("{}/{}", dir_key, name)
                };

                let file_type = entry.file_type().await.map_err(|e| io_error(&key, e))?;
                if file_type.is_dir() {
                    dirs.push((entry.path(), key));
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// In-process store for tests and demos.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.objects
            .write()
            .await
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
