//! Synchronous recognition for bounded blobs.
//!
//! Audio travels base64-inline in the request body, so this arm has a
//! hard input ceiling. Above it (locally checked, or reported by the
//! API as a 400) the caller is expected to promote to long mode.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{Result, SttError};
use crate::media::{AudioBlob, AudioEncoding};
use crate::recognize::{
    RecognitionOutcome, RecognizeMode, RecognizeOptions, Recognizer, build_wire_config,
    join_transcripts,
};
use crate::store::preview;

/// Client for single-request recognition.
pub struct SyncRecognizer {
    http: reqwest::Client,
    config: SyncConfig,
    max_bytes: usize,
}

impl SyncRecognizer {
    /// Create a client with the configured endpoint and size ceiling.
    pub fn new(config: SyncConfig, max_bytes: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            max_bytes,
        }
    }

    /// Point the client at a different base URL (mock servers in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Recognizer for SyncRecognizer {
    fn mode(&self) -> RecognizeMode {
        RecognizeMode::Sync
    }

    async fn recognize(
        &self,
        blob: &AudioBlob,
        primary: &str,
        alternates: Option<&[String]>,
        options: &RecognizeOptions,
        cancel: &CancellationToken,
    ) -> Result<RecognitionOutcome> {
        if blob.len() > self.max_bytes {
            return Err(SttError::OversizedInput { size: blob.len() });
        }

        let encoding = AudioEncoding::from_tag(&blob.tag);
        let config = build_wire_config(primary, alternates, encoding, options);
        let content = base64::engine::general_purpose::STANDARD.encode(&blob.bytes);
        let body = json!({
            "config": config,
            "audio": { "content": content },
        });

        let url = format!(
            "{}/v1/speech:recognize?key={}",
            self.config.base_url, self.config.api_key
        );
        debug!(
            primary,
            encoding = encoding.as_str(),
            bytes = blob.len(),
            "sync recognize"
        );

        let send = self
            .http
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(self.config.read_timeout_secs))
            .send();

        let resp = tokio::select! {
            () = cancel.cancelled() => return Err(SttError::Cancelled),
            resp = send => resp,
        };

        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => {
                return Ok(RecognitionOutcome::ApiError {
                    message: format!("recognize request failed: {e}"),
                    raw: Value::Null,
                });
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            // The API reports over-length audio as a 400; remap it so the
            // caller can promote to long mode.
            if status.as_u16() == 400 && text.to_lowercase().contains("sync input too long") {
                return Err(SttError::OversizedInput { size: blob.len() });
            }
            let raw = serde_json::from_str(&text).unwrap_or(Value::Null);
            return Ok(RecognitionOutcome::ApiError {
                message: format!("recognize failed (HTTP {status}): {}", preview(&text)),
                raw,
            });
        }

        let raw: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                return Ok(RecognitionOutcome::ApiError {
                    message: format!("recognize response unreadable: {e}"),
                    raw: Value::Null,
                });
            }
        };

        let text = join_transcripts(raw.get("results").unwrap_or(&Value::Null));
        if text.is_empty() {
            Ok(RecognitionOutcome::Empty { raw })
        } else {
            Ok(RecognitionOutcome::Text { text, raw })
        }
    }
}
