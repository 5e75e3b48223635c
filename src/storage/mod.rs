//! Storage provider abstraction (§4.A): byte-level object I/O over local
//! filesystem, S3-compatible, or WebDAV, behind one small capability trait.
//! Path generation is content-addressed and lives here too — the provider
//! never chooses a path, it only resolves the one handed to it.

pub mod local_fs;
pub mod path;
pub mod s3;
pub mod webdav;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::StorageError;

/// A boxed, owned async byte stream. Object-safe stand-in for "seekable
/// reader" — callers that need the whole object (the pipeline fetch stage)
/// read it to a `Vec<u8>`; the retrieval service streams it straight into
/// the HTTP response body.
pub type ObjectStream = Box<dyn AsyncRead + Unpin + Send>;

#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Integer id pinning an image to the backend instance that stored it.
    fn backend_id(&self) -> i32;

    async fn put(&self, path: &str, data: Vec<u8>) -> Result<(), StorageError>;
    async fn get(&self, path: &str) -> Result<ObjectStream, StorageError>;
    async fn delete(&self, path: &str) -> Result<(), StorageError>;
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Convenience wrapper used by the pipeline's fetch stage, which always
    /// wants the full object in memory up to a byte ceiling.
    async fn get_bytes(&self, path: &str, max_bytes: u64) -> Result<Vec<u8>, StorageError> {
        use tokio::io::AsyncReadExt;
        let mut reader = self.get(path).await?;
        let mut buf = Vec::new();
        let mut limited = (&mut reader).take(max_bytes + 1);
        limited
            .read_to_end(&mut buf)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        if buf.len() as u64 > max_bytes {
            return Err(StorageError::Io("exceeds max size ceiling".to_string()));
        }
        Ok(buf)
    }
}
