//! In-memory fakes shared by unit and integration tests.
//!
//! These model the semantics the orchestrator relies on (atomic-enough
//! reservation, histogram bumps, scripted recognizer outcomes) without
//! any external service.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SttError};
use crate::lang::history::{LangHistogram, LanguageHistory};
use crate::media::{AudioBlob, MediaTag};
use crate::quota::QuotaStore;
use crate::recognize::{RecognitionOutcome, RecognizeMode, RecognizeOptions, Recognizer};
use crate::store::ObjectStore;
use crate::transcode::Transcoder;

/// Quota store over a process-local map. The map mutex stands in for
/// the store-side atomicity of the real reserve script.
pub struct MemoryQuotaStore {
    used: Mutex<HashMap<(String, Option<String>), u64>>,
    limit: u32,
}

impl MemoryQuotaStore {
    /// Create a store with the given daily limit.
    pub fn new(limit: u32) -> Self {
        Self {
            used: Mutex::new(HashMap::new()),
            limit,
        }
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn try_reserve(&self, user: &str, guild: Option<&str>, seconds: u32) -> bool {
        let key = (user.to_owned(), guild.map(str::to_owned));
        let mut used = self.used.lock().unwrap_or_else(|e| e.into_inner());
        let current = used.get(&key).copied().unwrap_or(0);
        if current + u64::from(seconds) > u64::from(self.limit) {
            return false;
        }
        used.insert(key, current + u64::from(seconds));
        true
    }

    async fn refund(&self, user: &str, guild: Option<&str>, seconds: u32) {
        let key = (user.to_owned(), guild.map(str::to_owned));
        let mut used = self.used.lock().unwrap_or_else(|e| e.into_inner());
        let current = used.get(&key).copied().unwrap_or(0);
        used.insert(key, current.saturating_sub(u64::from(seconds)));
    }

    async fn get_used(&self, user: &str, guild: Option<&str>) -> u64 {
        let key = (user.to_owned(), guild.map(str::to_owned));
        let used = self.used.lock().unwrap_or_else(|e| e.into_inner());
        used.get(&key).copied().unwrap_or(0)
    }

    fn daily_limit(&self) -> u32 {
        self.limit
    }
}

/// Histograms in a pair of maps.
#[derive(Default)]
pub struct MemoryLanguageHistory {
    channels: Mutex<HashMap<String, LangHistogram>>,
    users: Mutex<HashMap<String, LangHistogram>>,
}

impl MemoryLanguageHistory {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a user histogram entry.
    pub fn seed_user(&self, user: &str, code: &str, count: u32) {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        users
            .entry(user.to_owned())
            .or_default()
            .insert(code.to_owned(), count);
    }

    /// Count recorded for (channel, code).
    pub fn channel_count(&self, channel: &str, code: &str) -> u32 {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .get(channel)
            .and_then(|h| h.get(code))
            .copied()
            .unwrap_or(0)
    }

    /// Count recorded for (user, code).
    pub fn user_count(&self, user: &str, code: &str) -> u32 {
        let users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        users
            .get(user)
            .and_then(|h| h.get(code))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl LanguageHistory for MemoryLanguageHistory {
    async fn channel_hist(&self, channel: &str) -> LangHistogram {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.get(channel).cloned().unwrap_or_default()
    }

    async fn user_hist(&self, user: &str) -> LangHistogram {
        let users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        users.get(user).cloned().unwrap_or_default()
    }

    async fn bump(&self, channel: &str, user: &str, code: &str) {
        {
            let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
            *channels
                .entry(channel.to_owned())
                .or_default()
                .entry(code.to_owned())
                .or_insert(0) += 1;
        }
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        *users
            .entry(user.to_owned())
            .or_default()
            .entry(code.to_owned())
            .or_insert(0) += 1;
    }
}

/// Object store over a map, recording deletions.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    deleted: Mutex<Vec<String>>,
}

impl MemoryObjectStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names currently stored.
    pub fn object_names(&self) -> Vec<String> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.keys().cloned().collect()
    }

    /// Names deleted so far, in order.
    pub fn deleted_names(&self) -> Vec<String> {
        let deleted = self.deleted.lock().unwrap_or_else(|e| e.into_inner());
        deleted.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, name: &str, bytes: Bytes, content_type: &str) -> Result<String> {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.insert(name.to_owned(), (bytes.to_vec(), content_type.to_owned()));
        Ok(format!("gs://test-bucket/{name}"))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.remove(name);
        let mut deleted = self.deleted.lock().unwrap_or_else(|e| e.into_inner());
        deleted.push(name.to_owned());
        Ok(())
    }
}

/// Transcoder that fabricates WAV bytes without spawning anything.
pub struct FakeTranscoder {
    wav_bytes: Vec<u8>,
    duration: u32,
    fail: bool,
    transcode_calls: AtomicUsize,
}

impl FakeTranscoder {
    /// Succeeding transcoder producing `wav_len` bytes and reporting
    /// `duration` seconds from the probe.
    pub fn new(wav_len: usize, duration: u32) -> Self {
        Self {
            wav_bytes: vec![0u8; wav_len],
            duration,
            fail: false,
            transcode_calls: AtomicUsize::new(0),
        }
    }

    /// Transcoder whose plans all fail.
    pub fn failing() -> Self {
        Self {
            wav_bytes: Vec::new(),
            duration: 10,
            fail: true,
            transcode_calls: AtomicUsize::new(0),
        }
    }

    /// How many transcodes ran.
    pub fn calls(&self) -> usize {
        self.transcode_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn to_wav_16k_mono(&self, _blob: &AudioBlob) -> Result<AudioBlob> {
        self.transcode_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SttError::Transcode(
                "ffmpeg failed on every plan. tail:\nfake".to_owned(),
            ));
        }
        Ok(AudioBlob::new(self.wav_bytes.clone(), MediaTag::wav()))
    }

    async fn probe_duration(&self, _path: &std::path::Path) -> u32 {
        self.duration
    }
}

/// One scripted reply for [`ScriptedRecognizer`].
pub enum ScriptedResponse {
    /// Return this outcome.
    Outcome(RecognitionOutcome),
    /// Return the sync-arm oversize error.
    Oversized,
}

/// Everything one recognize call saw, for assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Primary language submitted.
    pub primary: String,
    /// Alternates submitted, if any.
    pub alternates: Option<Vec<String>>,
    /// Blob size at call time.
    pub blob_len: usize,
    /// Blob tag at call time.
    pub tag: MediaTag,
    /// Options as built for the attempt.
    pub sample_rate_hz: Option<u32>,
}

/// Recognizer arm that replays a script and records its calls.
pub struct ScriptedRecognizer {
    mode: RecognizeMode,
    script: Mutex<VecDeque<ScriptedResponse>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRecognizer {
    /// Arm with a fixed reply sequence; an exhausted script keeps
    /// returning `Empty`.
    pub fn new(mode: RecognizeMode, script: Vec<ScriptedResponse>) -> Self {
        Self {
            mode,
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Arm that always answers with the same transcript.
    pub fn always_text(mode: RecognizeMode, text: &str) -> Self {
        Self::new(mode, vec![ScriptedResponse::Outcome(text_outcome(text))])
    }

    /// Calls made so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.clone()
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    fn mode(&self) -> RecognizeMode {
        self.mode
    }

    async fn recognize(
        &self,
        blob: &AudioBlob,
        primary: &str,
        alternates: Option<&[String]>,
        options: &RecognizeOptions,
        _cancel: &CancellationToken,
    ) -> Result<RecognitionOutcome> {
        {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            calls.push(RecordedCall {
                primary: primary.to_owned(),
                alternates: alternates.map(<[String]>::to_vec),
                blob_len: blob.len(),
                tag: blob.tag.clone(),
                sample_rate_hz: options.sample_rate_hz,
            });
        }
        let next = {
            let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
            script.pop_front()
        };
        match next {
            Some(ScriptedResponse::Outcome(outcome)) => Ok(outcome),
            Some(ScriptedResponse::Oversized) => {
                Err(SttError::OversizedInput { size: blob.len() })
            }
            None => Ok(empty_outcome()),
        }
    }
}

/// A `Text` outcome with a minimal raw body.
pub fn text_outcome(text: &str) -> RecognitionOutcome {
    RecognitionOutcome::Text {
        text: text.to_owned(),
        raw: serde_json::json!({
            "results": [{"alternatives": [{"transcript": text}]}]
        }),
    }
}

/// An `Empty` outcome.
pub fn empty_outcome() -> RecognitionOutcome {
    RecognitionOutcome::Empty {
        raw: serde_json::json!({}),
    }
}

/// An `ApiError` outcome.
pub fn api_error_outcome(message: &str) -> RecognitionOutcome {
    RecognitionOutcome::ApiError {
        message: message.to_owned(),
        raw: serde_json::Value::Null,
    }
}
