//! WebDAV storage backend. No dedicated WebDAV crate is used elsewhere in
//! this ecosystem, so this adapter speaks the handful of HTTP verbs WebDAV
//! needs (`PUT`, `GET`, `DELETE`, `HEAD`, `MKCOL`) directly over `reqwest`,
//! the HTTP client already in the dependency stack.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::error::StorageError;

use super::{ObjectStream, StorageProvider};

pub struct WebDavStorage {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    backend_id: i32,
}

impl WebDavStorage {
    pub fn new(
        base_url: String,
        username: Option<String>,
        password: Option<String>,
        backend_id: i32,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url,
            username,
            password,
            backend_id,
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.username, &self.password) {
            (Some(u), p) => req.basic_auth(u, p.clone()),
            _ => req,
        }
    }

    /// Creates parent collections along `path` so a `PUT` to a nested path
    /// doesn't fail with 409 Conflict on a server that requires them to
    /// exist first.
    async fn ensure_parents(&self, path: &str) -> Result<(), StorageError> {
        let parent_segments: Vec<&str> = path.rsplit_once('/').map(|(p, _)| p).into_iter().flat_map(|p| p.split('/')).collect();
        let mut acc = String::new();
        for segment in parent_segments {
            if segment.is_empty() {
                continue;
            }
            if !acc.is_empty() {
                acc.push('/');
            }
            acc.push_str(segment);
            let req = self.authed(self.client.request(
                reqwest::Method::from_bytes(b"MKCOL").unwrap(),
                self.url_for(&acc),
            ));
            let _ = req.send().await; // best-effort: 405/409 means it already exists
        }
        Ok(())
    }
}

fn map_status(status: StatusCode) -> StorageError {
    if status == StatusCode::NOT_FOUND {
        StorageError::NotFound(status.to_string())
    } else if status.is_client_error() {
        StorageError::Configuration(format!("webdav request rejected: {status}"))
    } else {
        StorageError::Transient(format!("webdav server error: {status}"))
    }
}

#[async_trait]
impl StorageProvider for WebDavStorage {
    fn backend_id(&self) -> i32 {
        self.backend_id
    }

    async fn put(&self, path: &str, data: Vec<u8>) -> Result<(), StorageError> {
        self.ensure_parents(path).await?;
        let resp = self
            .authed(self.client.put(self.url_for(path)).body(data))
            .send()
            .await
            .map_err(|e| StorageError::Transient(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(map_status(resp.status()))
        }
    }

    async fn get(&self, path: &str) -> Result<ObjectStream, StorageError> {
        let resp = self
            .authed(self.client.get(self.url_for(path)))
            .send()
            .await
            .map_err(|e| StorageError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(map_status(resp.status()));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(Box::new(tokio::io::BufReader::new(std::io::Cursor::new(
            bytes.to_vec(),
        ))))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let resp = self
            .authed(self.client.delete(self.url_for(path)))
            .send()
            .await
            .map_err(|e| StorageError::Transient(e.to_string()))?;
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(map_status(resp.status()))
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let resp = self
            .authed(self.client.head(self.url_for(path)))
            .send()
            .await
            .map_err(|e| StorageError::Transient(e.to_string()))?;
        Ok(resp.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_for_joins_base_and_path_without_doubling_slashes() {
        let storage = WebDavStorage::new("https://dav.example.com/files/".to_string(), None, None, 3);
        assert_eq!(
            storage.url_for("/original/2026/03/07/abc.jpg"),
            "https://dav.example.com/files/original/2026/03/07/abc.jpg"
        );
    }
}
