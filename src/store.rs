//! Transient object storage for long-running recognition.
//!
//! Long-mode audio is referenced by URI, so blobs are parked in a cloud
//! bucket for the duration of the operation and deleted per policy
//! afterwards. Authentication is a bearer token from an
//! [`AccessTokenProvider`]; the chat layer wires in whatever credential
//! flow the deployment uses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::error::{Result, SttError};

/// OAuth scope for bucket read/write.
pub const SCOPE_STORAGE_RW: &str = "https://www.googleapis.com/auth/devstorage.read_write";
/// OAuth scope for the recognizer API.
pub const SCOPE_CLOUD_PLATFORM: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Source of bearer tokens for cloud calls.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// A currently-valid access token for the scope.
    async fn token(&self, scope: &str) -> Result<String>;
}

/// Fixed token, for deployments that refresh externally and for tests.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Wrap a pre-issued token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn token(&self, _scope: &str) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Blob storage addressed by object name.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store the bytes under `name`, returning the URI recognizers use
    /// to reference the object.
    async fn put(&self, name: &str, bytes: Bytes, content_type: &str) -> Result<String>;

    /// Delete the object.
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Google Cloud Storage over its JSON upload API.
pub struct GcsObjectStore {
    http: reqwest::Client,
    config: StorageConfig,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl GcsObjectStore {
    /// Create a store for the configured bucket.
    pub fn new(config: StorageConfig, tokens: Arc<dyn AccessTokenProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            tokens,
        }
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn put(&self, name: &str, bytes: Bytes, content_type: &str) -> Result<String> {
        let token = self.tokens.token(SCOPE_STORAGE_RW).await?;
        let url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.config.base_url,
            self.config.bucket,
            urlencoding::encode(name)
        );

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| SttError::Upload(format!("upload request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SttError::Upload(format!(
                "upload failed (HTTP {status}): {}",
                preview(&body)
            )));
        }

        Ok(format!("gs://{}/{name}", self.config.bucket))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let token = self.tokens.token(SCOPE_STORAGE_RW).await?;
        let url = format!(
            "{}/storage/v1/b/{}/o/{}",
            self.config.base_url,
            self.config.bucket,
            urlencoding::encode(name)
        );

        let resp = self
            .http
            .delete(&url)
            .bearer_auth(&token)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| SttError::Api(format!("object delete request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SttError::Api(format!(
                "object delete failed (HTTP {status}): {}",
                preview(&body)
            )));
        }
        Ok(())
    }
}

/// Delete `name` after `delay`, best-effort. The task dies with the
/// process; a bucket lifecycle rule is the backstop.
pub fn schedule_delete(store: Arc<dyn ObjectStore>, name: String, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match store.delete(&name).await {
            Ok(()) => info!(%name, "deleted transient object"),
            Err(e) => warn!(%name, "failed to delete transient object: {e}"),
        }
    });
}

/// First 800 characters of an error body.
pub(crate) fn preview(body: &str) -> &str {
    let limit = 800.min(body.len());
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[tokio::test]
    async fn static_provider_returns_token() {
        let provider = StaticTokenProvider::new("tok-1");
        assert_eq!(provider.token(SCOPE_STORAGE_RW).await.unwrap(), "tok-1");
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long = "ก".repeat(400); // 3 bytes each
        let p = preview(&long);
        assert!(p.len() <= 800);
        assert!(p.chars().all(|c| c == 'ก'));
        assert_eq!(preview("short"), "short");
    }
}
