//! Hark: audio-message transcription orchestrator for chat backends.
//!
//! This crate takes an uploaded media file through the full speech
//! recognition pipeline:
//! Attachment → quota reservation → format adaptation → language
//! resolution → recognition with retries → transcript
//!
//! # Architecture
//!
//! The pipeline composes independent collaborators behind traits, all
//! bundled in a [`ServiceContext`]:
//! - **Quota store**: atomic per-day seconds budget over Redis
//! - **Transcoder**: multi-plan ffmpeg conversion to canonical WAV
//! - **Language resolver**: script detection, histograms, two-round
//!   alternate selection
//! - **Recognizers**: a synchronous arm for bounded blobs and a
//!   long-running arm that stages audio in object storage
//! - **Orchestrator**: the per-request state machine, including
//!   refund-on-failure and transient-object cleanup guarantees

pub mod config;
pub mod error;
pub mod lang;
pub mod media;
pub mod orchestrator;
pub mod quota;
pub mod recognize;
pub mod store;
pub mod transcode;

#[doc(hidden)]
pub mod test_utils;

pub use config::{QuotaScope, SttConfig};
pub use error::{Result, SttError};
pub use lang::{LangContext, LanguageHints, LanguageResolver};
pub use media::{Attachment, AudioBlob, BytesAttachment, MediaTag};
pub use orchestrator::{
    NullProgress, ProgressSink, ProgressStage, ServiceContext, TranscribeOutcome,
    TranscribeRequest,
};
pub use quota::{QuotaStore, RedisQuotaStore};
pub use recognize::{
    LongRecognizer, RecognitionOutcome, RecognizeMode, RecognizeOptions, Recognizer,
    SyncRecognizer,
};
pub use store::{AccessTokenProvider, GcsObjectStore, ObjectStore, StaticTokenProvider};
pub use transcode::{FfmpegTranscoder, Transcoder};
