//! Long-running recognition for inputs past the sync ceiling.
//!
//! Flow: park the blob in object storage, start a long-running
//! operation referencing its URI, poll until done, join the transcript,
//! and clean the object up per policy. Every failure path still
//! schedules cleanup so no transient object outlives its request for
//! longer than the configured delay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{LongConfig, StorageConfig};
use crate::error::{Result, SttError};
use crate::media::{AudioBlob, AudioEncoding};
use crate::recognize::{
    RecognitionOutcome, RecognizeMode, RecognizeOptions, Recognizer, build_wire_config,
    join_transcripts,
};
use crate::store::{AccessTokenProvider, ObjectStore, SCOPE_CLOUD_PLATFORM, preview, schedule_delete};

/// Handle to an operation started without polling.
///
/// For callers that run their own job UX: the transcript can be fetched
/// later by polling `operation_name` themselves. Immediate deletion is
/// refused in this mode (the operation still reads the object); the
/// delayed delete, when configured, is already scheduled.
#[derive(Debug, Clone)]
pub struct StartedOperation {
    /// Operation name to poll.
    pub operation_name: String,
    /// Object name uploaded for this operation.
    pub object_name: String,
    /// URI handed to the recognizer.
    pub uri: String,
}

/// Client for upload-and-poll recognition.
pub struct LongRecognizer {
    http: reqwest::Client,
    config: LongConfig,
    storage: StorageConfig,
    store: Arc<dyn ObjectStore>,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl LongRecognizer {
    /// Create a client over an object store and a token source.
    pub fn new(
        config: LongConfig,
        storage: StorageConfig,
        store: Arc<dyn ObjectStore>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            storage,
            store,
            tokens,
        }
    }

    /// Point the client at a different base URL (mock servers in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    fn object_name(&self, ext: &str) -> String {
        let ext = if ext.is_empty() { ".wav" } else { ext };
        format!("{}{}{ext}", self.storage.prefix, Uuid::new_v4().simple())
    }

    /// Upload and start, without polling.
    ///
    /// # Errors
    ///
    /// Returns [`SttError::Upload`] or [`SttError::Api`]; cleanup is
    /// scheduled on start failure.
    pub async fn start_only(
        &self,
        blob: &AudioBlob,
        primary: &str,
        alternates: Option<&[String]>,
        options: &RecognizeOptions,
    ) -> Result<StartedOperation> {
        let (object_name, uri) = self.upload(blob).await?;
        match self.start_operation(blob, &uri, primary, alternates, options).await {
            Ok(operation_name) => {
                // The operation still reads the object, so only the
                // delayed delete applies here.
                if self.storage.delete_delay_seconds > 0 {
                    schedule_delete(
                        Arc::clone(&self.store),
                        object_name.clone(),
                        Duration::from_secs(self.storage.delete_delay_seconds),
                    );
                }
                Ok(StartedOperation {
                    operation_name,
                    object_name,
                    uri,
                })
            }
            Err(e) => {
                self.apply_cleanup(&object_name).await;
                Err(e)
            }
        }
    }

    async fn upload(&self, blob: &AudioBlob) -> Result<(String, String)> {
        let object_name = self.object_name(&blob.tag.ext);
        let content_type = if blob.tag.content_type.is_empty() {
            "application/octet-stream"
        } else {
            blob.tag.content_type.as_str()
        };
        let uri = self
            .store
            .put(&object_name, blob.bytes.clone(), content_type)
            .await?;
        debug!(%uri, bytes = blob.len(), "uploaded long-mode audio");
        Ok((object_name, uri))
    }

    async fn start_operation(
        &self,
        blob: &AudioBlob,
        uri: &str,
        primary: &str,
        alternates: Option<&[String]>,
        options: &RecognizeOptions,
    ) -> Result<String> {
        let encoding = AudioEncoding::from_tag(&blob.tag);
        let config = build_wire_config(primary, alternates, encoding, options);
        let body = json!({
            "config": config,
            "audio": { "uri": uri },
        });

        let token = self.tokens.token(SCOPE_CLOUD_PLATFORM).await?;
        let url = format!("{}/v1/speech:longrunningrecognize", self.config.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| SttError::Api(format!("speech start request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SttError::Api(format!(
                "speech start failed (HTTP {status}): {}",
                preview(&text)
            )));
        }

        let started: Value = resp
            .json()
            .await
            .map_err(|e| SttError::Api(format!("speech start response unreadable: {e}")))?;
        started
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| SttError::Api("speech operation has no name".to_owned()))
    }

    async fn poll_operation(&self, name: &str, cancel: &CancellationToken) -> Result<Value> {
        let token = self.tokens.token(SCOPE_CLOUD_PLATFORM).await?;
        let url = format!("{}/v1/operations/{name}", self.config.base_url);
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let mut waited = Duration::ZERO;
        let budget = Duration::from_secs(self.config.poll_max_secs);

        loop {
            let send = self
                .http
                .get(&url)
                .bearer_auth(&token)
                .timeout(Duration::from_secs(60))
                .send();
            let resp = tokio::select! {
                () = cancel.cancelled() => return Err(SttError::Cancelled),
                resp = send => resp,
            }
            .map_err(|e| SttError::Api(format!("operation poll request failed: {e}")))?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(SttError::Api(format!(
                    "operation poll failed (HTTP {status}): {}",
                    preview(&text)
                )));
            }
            let op: Value = resp
                .json()
                .await
                .map_err(|e| SttError::Api(format!("operation poll response unreadable: {e}")))?;
            if op.get("done").and_then(Value::as_bool) == Some(true) {
                return Ok(op);
            }

            if waited >= budget {
                return Err(SttError::PollTimeout(
                    "timeout while polling speech operation".to_owned(),
                ));
            }
            tokio::select! {
                () = cancel.cancelled() => return Err(SttError::Cancelled),
                () = tokio::time::sleep(interval) => {}
            }
            waited += interval;
        }
    }

    /// Delete now or schedule the delayed delete, per policy.
    async fn apply_cleanup(&self, object_name: &str) {
        if self.storage.delete_immediately {
            match self.store.delete(object_name).await {
                Ok(()) => info!(object = object_name, "deleted transient object"),
                Err(e) => warn!(object = object_name, "transient object delete failed: {e}"),
            }
        } else if self.storage.delete_delay_seconds > 0 {
            schedule_delete(
                Arc::clone(&self.store),
                object_name.to_owned(),
                Duration::from_secs(self.storage.delete_delay_seconds),
            );
        }
    }
}

#[async_trait]
impl Recognizer for LongRecognizer {
    fn mode(&self) -> RecognizeMode {
        RecognizeMode::Long
    }

    async fn recognize(
        &self,
        blob: &AudioBlob,
        primary: &str,
        alternates: Option<&[String]>,
        options: &RecognizeOptions,
        cancel: &CancellationToken,
    ) -> Result<RecognitionOutcome> {
        let (object_name, uri) = match self.upload(blob).await {
            Ok(pair) => pair,
            Err(e) => {
                return Ok(RecognitionOutcome::ApiError {
                    message: e.to_string(),
                    raw: Value::Null,
                });
            }
        };

        let op_name = match self
            .start_operation(blob, &uri, primary, alternates, options)
            .await
        {
            Ok(name) => name,
            Err(e) => {
                self.apply_cleanup(&object_name).await;
                return Ok(RecognitionOutcome::ApiError {
                    message: e.to_string(),
                    raw: Value::Null,
                });
            }
        };
        debug!(operation = %op_name, "long recognition started");

        let op = match self.poll_operation(&op_name, cancel).await {
            Ok(op) => op,
            Err(SttError::Cancelled) => {
                self.apply_cleanup(&object_name).await;
                return Err(SttError::Cancelled);
            }
            Err(e) => {
                self.apply_cleanup(&object_name).await;
                return Ok(RecognitionOutcome::ApiError {
                    message: e.to_string(),
                    raw: Value::Null,
                });
            }
        };

        self.apply_cleanup(&object_name).await;

        if let Some(error) = op.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("operation failed");
            return Ok(RecognitionOutcome::ApiError {
                message: format!("long recognition failed: {message}"),
                raw: op.clone(),
            });
        }

        let results = op
            .pointer("/response/results")
            .cloned()
            .unwrap_or(Value::Null);
        let text = join_transcripts(&results);
        if text.is_empty() {
            Ok(RecognitionOutcome::Empty { raw: op })
        } else {
            Ok(RecognitionOutcome::Text { text, raw: op })
        }
    }
}
