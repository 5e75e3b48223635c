//! Local filesystem storage backend. The simplest of the three providers;
//! `path` is joined onto `root` and parent directories are created on write.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::BufReader;

use crate::error::StorageError;

use super::{ObjectStream, StorageProvider};

pub struct LocalFsStorage {
    root: PathBuf,
    backend_id: i32,
}

impl LocalFsStorage {
    pub fn new(root: impl Into<PathBuf>, backend_id: i32) -> Self {
        Self {
            root: root.into(),
            backend_id,
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

fn io_err(e: std::io::Error, path: &Path) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(path.display().to_string())
    } else {
        StorageError::Io(e.to_string())
    }
}

#[async_trait]
impl StorageProvider for LocalFsStorage {
    fn backend_id(&self) -> i32 {
        self.backend_id
    }

    async fn put(&self, path: &str, data: Vec<u8>) -> Result<(), StorageError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }
        fs::write(&full, data)
            .await
            .map_err(|e| io_err(e, &full))
    }

    async fn get(&self, path: &str) -> Result<ObjectStream, StorageError> {
        let full = self.resolve(path);
        let file = fs::File::open(&full).await.map_err(|e| io_err(e, &full))?;
        Ok(Box::new(BufReader::new(file)))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve(path);
        match fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e.to_string())),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.resolve(path))
            .await
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn put_then_get_round_trips_bytes() {
        let dir = tempfile_dir();
        let storage = LocalFsStorage::new(&dir, 1);
        storage
            .put("original/2026/03/07/abc123.jpg", b"hello world".to_vec())
            .await
            .unwrap();

        let mut reader = storage.get("original/2026/03/07/abc123.jpg").await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello world");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn get_missing_path_is_not_found() {
        let dir = tempfile_dir();
        let storage = LocalFsStorage::new(&dir, 1);
        let err = storage.get("missing.jpg").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile_dir();
        let storage = LocalFsStorage::new(&dir, 1);
        storage.delete("never-existed.jpg").await.unwrap();
        storage.delete("never-existed.jpg").await.unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    fn tempfile_dir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("imagehost-test-{}", uuid::Uuid::new_v4()));
        dir
    }
}
