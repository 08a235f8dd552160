//! Object store interface (SPEC_FULL.md §11): CastPilot never provisions or
//! manages the bucket backing uploaded video bytes. It only ever consumes a
//! store that already exists, through this trait, so video storage can be
//! swapped (S3, GCS, a house-grown blob service) without touching the
//! scheduling/dispatch core.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use reqwest::{Client, Url};
use sha2::Sha256;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::config::ObjectStoreConfig;
use crate::error::ObjectStoreError;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// A URL the caller can `PUT` raw video bytes to directly, valid for
    /// `ttl`. CastPilot hands this to clients uploading a video; it never
    /// proxies the bytes itself.
    fn presigned_put_url(&self, key: &str, ttl: Duration) -> Result<Url, ObjectStoreError>;

    /// Open a readable stream over the object at `key`, for the dispatcher
    /// to hand to a platform adapter's upload call.
    async fn open_read(&self, key: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>, ObjectStoreError>;
}

/// Speaks a presigned-URL HTTP protocol over `reqwest` (`OBJECT_STORE_*`
/// configuration): a GET/PUT against `{endpoint}/{bucket}/{key}`, with PUT
/// URLs authorized by an HMAC-SHA256 query-string signature over the key
/// and expiry, keyed by `secret_key`. This matches the minimal subset of
/// S3-style presigned URLs the dispatcher and upload clients need; it is
/// not a general client for any one vendor's object storage API.
pub struct HttpObjectStore {
    http: Client,
    endpoint: String,
    bucket: String,
    access_key: String,
    secret_key: String,
}

impl HttpObjectStore {
    pub fn new(config: &ObjectStoreConfig) -> Result<Self, ObjectStoreError> {
        let endpoint = config.endpoint.clone().ok_or_else(|| ObjectStoreError::Unavailable {
            message: "object_store.endpoint is not configured".to_string(),
        })?;
        let bucket = config.bucket.clone().ok_or_else(|| ObjectStoreError::Unavailable {
            message: "object_store.bucket is not configured".to_string(),
        })?;
        let access_key = config.access_key.clone().ok_or_else(|| ObjectStoreError::Unavailable {
            message: "object_store.access_key is not configured".to_string(),
        })?;
        let secret_key = config.secret_key.clone().ok_or_else(|| ObjectStoreError::Unavailable {
            message: "object_store.secret_key is not configured".to_string(),
        })?;

        Ok(Self { http: Client::new(), endpoint, bucket, access_key, secret_key })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint.trim_end_matches('/'), self.bucket, key)
    }

    fn sign(&self, key: &str, expires_at: i64) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("hmac accepts a key of any length");
        mac.update(format!("PUT\n{key}\n{expires_at}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn presigned_put_url(&self, key: &str, ttl: Duration) -> Result<Url, ObjectStoreError> {
        let expires_at = chrono::Utc::now()
            .checked_add_signed(chrono::Duration::from_std(ttl).unwrap_or_default())
            .map(|t| t.timestamp())
            .unwrap_or_default();
        let signature = self.sign(key, expires_at);

        let mut url = Url::parse(&self.object_url(key))
            .map_err(|e| ObjectStoreError::Unavailable { message: e.to_string() })?;
        url.query_pairs_mut()
            .append_pair("X-Castpilot-Access-Key", &self.access_key)
            .append_pair("X-Castpilot-Expires", &expires_at.to_string())
            .append_pair("X-Castpilot-Signature", &signature);
        Ok(url)
    }

    async fn open_read(&self, key: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>, ObjectStoreError> {
        let response = self
            .http
            .get(self.object_url(key))
            .send()
            .await
            .map_err(|e| ObjectStoreError::Unavailable { message: e.to_string() })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound { key: key.to_string() });
        }
        let response = response
            .error_for_status()
            .map_err(|e| ObjectStoreError::Unavailable { message: e.to_string() })?;

        let stream = response
            .bytes_stream()
            .map(|result| result.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        Ok(Box::new(StreamReader::new(stream)))
    }
}

/// An in-memory store for tests: no network, no presigning beyond echoing
/// back a deterministic URL.
#[cfg(any(test, feature = "test-helpers"))]
pub struct InMemoryObjectStore {
    objects: tokio::sync::RwLock<std::collections::HashMap<String, Vec<u8>>>,
}

#[cfg(any(test, feature = "test-helpers"))]
impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self { objects: tokio::sync::RwLock::new(std::collections::HashMap::new()) }
    }

    pub async fn put(&self, key: &str, bytes: Vec<u8>) {
        self.objects.write().await.insert(key.to_string(), bytes);
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn presigned_put_url(&self, key: &str, ttl: Duration) -> Result<Url, ObjectStoreError> {
        Url::parse(&format!("https://test-object-store.invalid/{key}?ttl_secs={}", ttl.as_secs()))
            .map_err(|e| ObjectStoreError::Unavailable { message: e.to_string() })
    }

    async fn open_read(&self, key: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>, ObjectStoreError> {
        let objects = self.objects.read().await;
        let bytes = objects.get(key).cloned().ok_or_else(|| ObjectStoreError::NotFound { key: key.to_string() })?;
        Ok(Box::new(std::io::Cursor::new(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn presigned_put_url_carries_signature_and_expiry() {
        let config = ObjectStoreConfig {
            endpoint: Some("https://store.example.com".to_string()),
            bucket: Some("videos".to_string()),
            access_key: Some("ak".to_string()),
            secret_key: Some("sk".to_string()),
        };
        let store = HttpObjectStore::new(&config).unwrap();
        let url = store.presigned_put_url("videos/v1.mp4", Duration::from_secs(600)).unwrap();
        assert!(url.as_str().starts_with("https://store.example.com/videos/videos/v1.mp4"));
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["X-Castpilot-Access-Key"], "ak");
        assert!(query.contains_key("X-Castpilot-Signature"));
    }

    #[test]
    fn missing_endpoint_is_unavailable_not_a_panic() {
        let config = ObjectStoreConfig::default();
        let err = HttpObjectStore::new(&config).unwrap_err();
        assert!(matches!(err, ObjectStoreError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_bytes() {
        let store = InMemoryObjectStore::new();
        store.put("k1", b"hello".to_vec()).await;

        let mut reader = store.open_read("k1").await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn in_memory_store_reports_not_found() {
        let store = InMemoryObjectStore::new();
        let err = store.open_read("missing").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::NotFound { .. }));
    }
}
