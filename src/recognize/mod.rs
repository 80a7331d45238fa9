//! Recognizer clients and their shared wire types.
//!
//! Two backends implement the same [`Recognizer`] capability: a
//! synchronous client for bounded blobs and a long-running client that
//! stages audio in object storage and polls an operation. The
//! orchestrator picks an arm by input size and codec family.

pub mod long;
pub mod sync;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::media::{AudioBlob, AudioEncoding};

pub use long::LongRecognizer;
pub use sync::SyncRecognizer;

/// Which backend produced (or will produce) a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizeMode {
    /// Single request/response recognition.
    Sync,
    /// Upload + long-running operation + poll.
    Long,
}

impl RecognizeMode {
    /// Tag used in user-facing result labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Long => "long",
        }
    }
}

/// Result of one recognition attempt.
///
/// `Empty` is distinct from `ApiError`: the recognizer answered
/// successfully but heard nothing it could transcribe.
#[derive(Debug, Clone)]
pub enum RecognitionOutcome {
    /// A non-empty transcript.
    Text {
        /// Joined transcript text.
        text: String,
        /// Raw provider response.
        raw: Value,
    },
    /// Successful response with zero transcribable content.
    Empty {
        /// Raw provider response.
        raw: Value,
    },
    /// The API refused or failed the request.
    ApiError {
        /// Short diagnostic, including a body preview where available.
        message: String,
        /// Raw provider response when one was received.
        raw: Value,
    },
}

/// Optional recognizer settings forwarded verbatim onto the wire.
///
/// Built fresh for every attempt. Punctuation is always requested and
/// `maxAlternatives` is pinned to 1; everything else is pass-through.
#[derive(Debug, Clone, Default)]
pub struct RecognizeOptions {
    /// Explicit sample rate, e.g. 16 000 for canonical WAV.
    pub sample_rate_hz: Option<u32>,
    /// Channel count when known (1 after a mono transcode).
    pub audio_channel_count: Option<u32>,
    /// Speaker diarization with this speaker count.
    pub diarization_speaker_count: Option<u32>,
    /// Recognition model name.
    pub model: Option<String>,
    /// Request the enhanced model tier.
    pub use_enhanced: Option<bool>,
    /// Mask profanity in the transcript.
    pub profanity_filter: Option<bool>,
    /// Recognize each channel separately.
    pub separate_recognition_per_channel: Option<bool>,
    /// Phrase hint contexts, passed through as-is.
    pub speech_contexts: Option<Value>,
}

/// A recognition backend.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Which arm this is.
    fn mode(&self) -> RecognizeMode;

    /// Run one recognition attempt.
    ///
    /// API-level failures come back as
    /// [`RecognitionOutcome::ApiError`]; `Err` is reserved for
    /// [`crate::error::SttError::OversizedInput`] (sync arm only) and
    /// cancellation.
    async fn recognize(
        &self,
        blob: &AudioBlob,
        primary: &str,
        alternates: Option<&[String]>,
        options: &RecognizeOptions,
        cancel: &CancellationToken,
    ) -> Result<RecognitionOutcome>;
}

/// Alternates the wire accepts per request.
pub(crate) const MAX_ALTERNATE_CODES: usize = 3;

/// Build the JSON `config` object shared by both arms.
pub(crate) fn build_wire_config(
    primary: &str,
    alternates: Option<&[String]>,
    encoding: AudioEncoding,
    options: &RecognizeOptions,
) -> Value {
    let mut config = json!({
        "languageCode": primary,
        "enableAutomaticPunctuation": true,
        "maxAlternatives": 1,
        "encoding": encoding.as_str(),
    });

    if let Some(alts) = alternates {
        let capped: Vec<&String> = alts.iter().take(MAX_ALTERNATE_CODES).collect();
        if !capped.is_empty() {
            config["alternativeLanguageCodes"] = json!(capped);
        }
    }
    if let Some(rate) = options.sample_rate_hz.or(encoding.default_sample_rate()) {
        config["sampleRateHertz"] = json!(rate);
    }
    if let Some(channels) = options.audio_channel_count {
        config["audioChannelCount"] = json!(channels);
    }
    if let Some(separate) = options.separate_recognition_per_channel {
        config["enableSeparateRecognitionPerChannel"] = json!(separate);
    }
    if let Some(speakers) = options.diarization_speaker_count {
        let speakers = speakers.max(1);
        config["diarizationConfig"] = json!({
            "enableSpeakerDiarization": true,
            "minSpeakerCount": speakers,
            "maxSpeakerCount": speakers,
        });
    }
    if let Some(model) = &options.model {
        config["model"] = json!(model);
    }
    if let Some(enhanced) = options.use_enhanced {
        config["useEnhanced"] = json!(enhanced);
    }
    if let Some(filter) = options.profanity_filter {
        config["profanityFilter"] = json!(filter);
    }
    if let Some(contexts) = &options.speech_contexts {
        config["speechContexts"] = contexts.clone();
    }

    config
}

/// Join every non-empty alternative transcript under `results`, in
/// order, separated by single spaces.
pub(crate) fn join_transcripts(results: &Value) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(results) = results.as_array() {
        for result in results {
            let Some(alts) = result.get("alternatives").and_then(Value::as_array) else {
                continue;
            };
            for alt in alts {
                if let Some(t) = alt.get("transcript").and_then(Value::as_str) {
                    let t = t.trim();
                    if !t.is_empty() {
                        parts.push(t);
                    }
                }
            }
        }
    }
    parts.join(" ").trim().to_owned()
}
