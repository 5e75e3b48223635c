//! S3-compatible object storage backend.
//!
//! Wraps the real `aws_sdk_s3::Client` behind an internal seam trait so unit
//! tests can substitute a fake without mocking SDK types directly — the same
//! pattern the teacher uses for its GCS adapter (`GcsClient` / `FakeGcsClient`).

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

use crate::error::StorageError;

use super::{ObjectStream, StorageProvider};

#[async_trait]
trait S3Client: Send + Sync {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), String>;
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, String>;
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), String>;
    async fn head_object(&self, bucket: &str, key: &str) -> Result<bool, String>;
}

struct RealS3Client {
    client: aws_sdk_s3::Client,
}

#[async_trait]
impl S3Client for RealS3Client {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), String> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, String> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| e.to_string())?
            .into_bytes();
        Ok(bytes.to_vec())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), String> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<bool, String> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let msg = e.to_string().to_lowercase();
                if msg.contains("not found") || msg.contains("404") {
                    Ok(false)
                } else {
                    Err(e.to_string())
                }
            }
        }
    }
}

fn map_s3_error(msg: &str) -> StorageError {
    let m = msg.to_lowercase();
    if m.contains("not found") || m.contains("404") || m.contains("nosuchkey") {
        StorageError::NotFound(msg.to_string())
    } else if m.contains("credential") || m.contains("config") {
        StorageError::Configuration(msg.to_string())
    } else if m.contains("timeout") || m.contains("connection") || m.contains("network") {
        StorageError::Transient(msg.to_string())
    } else {
        StorageError::Io(msg.to_string())
    }
}

pub struct S3Storage {
    client: Arc<dyn S3Client>,
    bucket: String,
    backend_id: i32,
}

impl S3Storage {
    pub async fn new(bucket: String, region: String, endpoint: Option<String>, backend_id: i32) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region));
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        let client = aws_sdk_s3::Client::new(&sdk_config);
        Self {
            client: Arc::new(RealS3Client { client }),
            bucket,
            backend_id,
        }
    }
}

#[async_trait]
impl StorageProvider for S3Storage {
    fn backend_id(&self) -> i32 {
        self.backend_id
    }

    async fn put(&self, path: &str, data: Vec<u8>) -> Result<(), StorageError> {
        self.client
            .put_object(&self.bucket, path, data)
            .await
            .map_err(|e| map_s3_error(&e))
    }

    async fn get(&self, path: &str) -> Result<ObjectStream, StorageError> {
        let bytes = self
            .client
            .get_object(&self.bucket, path)
            .await
            .map_err(|e| map_s3_error(&e))?;
        Ok(Box::new(tokio::io::BufReader::new(SyncToAsyncReader(
            std::io::Cursor::new(bytes),
        ))))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.client
            .delete_object(&self.bucket, path)
            .await
            .map_err(|e| map_s3_error(&e))
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        self.client
            .head_object(&self.bucket, path)
            .await
            .map_err(|e| map_s3_error(&e))
    }
}

/// Adapts the `Vec<u8>` cursor returned by the fetched S3 object to
/// `tokio::io::AsyncRead` without pulling in `tokio-util`'s compat shim for a
/// single call site.
struct SyncToAsyncReader<R>(R);

impl<R: std::io::Read + Unpin> tokio::io::AsyncRead for SyncToAsyncReader<R> {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let unfilled = buf.initialize_unfilled();
        match self.0.read(unfilled) {
            Ok(n) => {
                buf.advance(n);
                std::task::Poll::Ready(Ok(()))
            }
            Err(e) => std::task::Poll::Ready(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeS3Client {
        objects: Mutex<std::collections::HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl S3Client for FakeS3Client {
        async fn put_object(&self, _bucket: &str, key: &str, body: Vec<u8>) -> Result<(), String> {
            self.objects.lock().unwrap().insert(key.to_string(), body);
            Ok(())
        }

        async fn get_object(&self, _bucket: &str, key: &str) -> Result<Vec<u8>, String> {
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| "NoSuchKey: not found".to_string())
        }

        async fn delete_object(&self, _bucket: &str, key: &str) -> Result<(), String> {
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }

        async fn head_object(&self, _bucket: &str, key: &str) -> Result<bool, String> {
            Ok(self.objects.lock().unwrap().contains_key(key))
        }
    }

    fn fake_storage() -> S3Storage {
        S3Storage {
            client: Arc::new(FakeS3Client {
                objects: Mutex::new(std::collections::HashMap::new()),
            }),
            bucket: "test-bucket".to_string(),
            backend_id: 2,
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips_through_the_fake_client() {
        let storage = fake_storage();
        storage.put("converted/webp/a.webp", b"abc".to_vec()).await.unwrap();
        let mut reader = storage.get("converted/webp/a.webp").await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"abc");
    }

    #[tokio::test]
    async fn missing_key_maps_to_not_found() {
        let storage = fake_storage();
        let err = storage.get("missing.webp").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn exists_reflects_the_fake_backing_store() {
        let storage = fake_storage();
        assert!(!storage.exists("a.webp").await.unwrap());
        storage.put("a.webp", b"x".to_vec()).await.unwrap();
        assert!(storage.exists("a.webp").await.unwrap());
    }
}
