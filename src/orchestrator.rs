//! Request orchestration: quota → transcode → recognize with retries.
//!
//! One call to [`ServiceContext::transcribe`] takes an attachment
//! through the whole pipeline: duration probe and quota reservation,
//! format normalization, language resolution, backend selection, and a
//! disciplined retry ladder over the two recognizer arms. The
//! reservation is refunded exactly once iff the request fails before a
//! final transcript decision; `NoSpeech` keeps the reservation because
//! the pipeline did the work.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SttConfig;
use crate::error::{Result, SttError};
use crate::lang::{LangContext, LanguageHistory, LanguageResolver};
use crate::media::{Attachment, AudioBlob, MediaTag};
use crate::quota::QuotaStore;
use crate::recognize::{RecognitionOutcome, RecognizeMode, RecognizeOptions, Recognizer};
use crate::transcode::Transcoder;

/// Floor applied when the duration probe fails: reserve a minute rather
/// than nothing.
const MIN_RESERVE_SECONDS: u32 = 60;

/// Pipeline states surfaced to the progress sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    /// Downloading bytes and probing duration.
    Prepare,
    /// Format normalization before the first attempt.
    Normalize,
    /// A recognition attempt is starting.
    Attempt,
    /// Forcing a transcode (long-mode mono, or the second-chance pass).
    Retranscode,
}

/// Best-effort progress reporting. The chat adapter renders these
/// however it likes; they are not part of the functional contract.
pub trait ProgressSink: Send + Sync {
    /// Report entering a stage.
    fn update(&self, stage: ProgressStage, detail: &str);
}

/// Sink that discards all progress.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn update(&self, _stage: ProgressStage, _detail: &str) {}
}

/// One transcription request.
pub struct TranscribeRequest<'a> {
    /// The uploaded media file.
    pub attachment: &'a dyn Attachment,
    /// Requesting user id (quota + histogram key).
    pub user_id: &'a str,
    /// Guild id when the message came from one.
    pub guild_id: Option<&'a str>,
    /// Channel id (histogram key).
    pub channel_id: &'a str,
    /// Display name of the user (language context).
    pub user_name: &'a str,
    /// Channel name (language context).
    pub channel_name: &'a str,
    /// Message text accompanying the attachment (language context).
    pub caption: &'a str,
    /// Primary language picked interactively, bypassing resolution.
    pub primary_override: Option<&'a str>,
    /// Recognizer passthrough settings (diarization, model, …).
    pub options: RecognizeOptions,
}

/// Terminal result of a transcription request.
#[derive(Debug, Clone)]
pub enum TranscribeOutcome {
    /// A transcript was produced; quota stays consumed and the
    /// histograms were updated.
    Success {
        /// The transcript text.
        transcript: String,
        /// Which backend produced it.
        mode: RecognizeMode,
        /// Script-detected language fed back into the histograms.
        language: String,
        /// Seconds charged against the daily quota.
        reserved_seconds: u32,
    },
    /// Every attempt heard nothing. Quota stays consumed; histograms
    /// untouched.
    NoSpeech {
        /// Seconds charged against the daily quota.
        reserved_seconds: u32,
    },
    /// The reservation would exceed the daily limit. Nothing ran.
    QuotaExceeded {
        /// Seconds already consumed today.
        used: u64,
        /// The daily limit in seconds.
        limit: u32,
    },
}

impl TranscribeOutcome {
    /// Seconds still available today, for `QuotaExceeded` messages.
    pub fn remaining(&self) -> Option<u64> {
        match self {
            Self::QuotaExceeded { used, limit } => Some(u64::from(*limit).saturating_sub(*used)),
            _ => None,
        }
    }
}

/// Scoped quota reservation.
///
/// `commit` keeps the seconds consumed; `refund` returns them. A guard
/// dropped without either (a panic, an early `?`) spawns a best-effort
/// refund task so no failure path leaks a reservation.
struct Reservation {
    quota: Arc<dyn QuotaStore>,
    user: String,
    guild: Option<String>,
    seconds: u32,
    armed: bool,
}

impl Reservation {
    fn new(quota: Arc<dyn QuotaStore>, user: &str, guild: Option<&str>, seconds: u32) -> Self {
        Self {
            quota,
            user: user.to_owned(),
            guild: guild.map(str::to_owned),
            seconds,
            armed: true,
        }
    }

    fn commit(mut self) {
        self.armed = false;
    }

    async fn refund(mut self) {
        self.armed = false;
        self.quota
            .refund(&self.user, self.guild.as_deref(), self.seconds)
            .await;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            let quota = Arc::clone(&self.quota);
            let user = std::mem::take(&mut self.user);
            let guild = self.guild.take();
            let seconds = self.seconds;
            tokio::spawn(async move {
                quota.refund(&user, guild.as_deref(), seconds).await;
            });
        }
    }
}

/// Typed handles for everything one request needs.
///
/// Built once at program startup and shared across in-flight requests;
/// each request's state lives on its own task.
pub struct ServiceContext {
    config: SttConfig,
    quota: Arc<dyn QuotaStore>,
    transcoder: Arc<dyn Transcoder>,
    history: Arc<dyn LanguageHistory>,
    sync_arm: Arc<dyn Recognizer>,
    long_arm: Arc<dyn Recognizer>,
    resolver: LanguageResolver,
}

/// Outcome of one rung of the retry ladder.
enum Step {
    Done(String, RecognizeMode),
    Empty,
}

impl ServiceContext {
    /// Assemble a context from its collaborators.
    pub fn new(
        config: SttConfig,
        quota: Arc<dyn QuotaStore>,
        transcoder: Arc<dyn Transcoder>,
        history: Arc<dyn LanguageHistory>,
        sync_arm: Arc<dyn Recognizer>,
        long_arm: Arc<dyn Recognizer>,
    ) -> Self {
        let resolver = LanguageResolver::new(config.lang.clone());
        Self {
            config,
            quota,
            transcoder,
            history,
            sync_arm,
            long_arm,
            resolver,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &SttConfig {
        &self.config
    }

    /// The quota store, for usage queries from the chat layer.
    pub fn quota(&self) -> &Arc<dyn QuotaStore> {
        &self.quota
    }

    /// Transcribe one attachment for one user in one channel.
    ///
    /// # Errors
    ///
    /// Returns [`SttError::Api`] / [`SttError::Transcode`] /
    /// [`SttError::Cancelled`] after refunding the reservation.
    /// `NoSpeech` and `QuotaExceeded` are outcomes, not errors.
    pub async fn transcribe(
        &self,
        req: &TranscribeRequest<'_>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<TranscribeOutcome> {
        if cancel.is_cancelled() {
            return Err(SttError::Cancelled);
        }

        // Prepare: fetch bytes and probe duration.
        progress.update(ProgressStage::Prepare, "fetching attachment");
        let fetch = req.attachment.read_bytes();
        let bytes = tokio::select! {
            () = cancel.cancelled() => return Err(SttError::Cancelled),
            bytes = fetch => bytes?,
        };
        let tag = MediaTag::from_name(req.attachment.file_name(), req.attachment.content_type());
        let blob = AudioBlob::new(bytes, tag);

        let probed = self.probe_blob_duration(&blob).await;
        let reserved_seconds = if probed == 0 {
            MIN_RESERVE_SECONDS
        } else {
            probed
        };

        // Reserve.
        if !self
            .quota
            .try_reserve(req.user_id, req.guild_id, reserved_seconds)
            .await
        {
            let used = self.quota.get_used(req.user_id, req.guild_id).await;
            let limit = self.quota.daily_limit();
            info!(user = req.user_id, used, limit, "daily quota exceeded");
            return Ok(TranscribeOutcome::QuotaExceeded { used, limit });
        }
        let reservation = Reservation::new(
            Arc::clone(&self.quota),
            req.user_id,
            req.guild_id,
            reserved_seconds,
        );

        if cancel.is_cancelled() {
            reservation.refund().await;
            return Err(SttError::Cancelled);
        }

        match self
            .run_pipeline(req, blob, reserved_seconds, progress, cancel)
            .await
        {
            Ok(outcome) => {
                reservation.commit();
                Ok(outcome)
            }
            Err(e) => {
                reservation.refund().await;
                Err(e)
            }
        }
    }

    /// Normalize → resolve → attempt ladder. Runs with the reservation
    /// held; any `Err` triggers the caller's refund.
    async fn run_pipeline(
        &self,
        req: &TranscribeRequest<'_>,
        blob: AudioBlob,
        reserved_seconds: u32,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<TranscribeOutcome> {
        // Normalize.
        progress.update(ProgressStage::Normalize, &blob.tag.content_type);
        let (mut blob, normalized) = self.transcoder.ensure_compatible(&blob).await?;
        // Our own transcodes are known-canonical WAV 16k mono.
        let mut wav_canonical = normalized;

        // Resolve languages.
        let (user_hist, channel_hist) = tokio::join!(
            self.history.user_hist(req.user_id),
            self.history.channel_hist(req.channel_id),
        );
        let ctx = LangContext {
            user_name: req.user_name,
            channel_name: req.channel_name,
            caption: req.caption,
            file_name: req.attachment.file_name(),
        };
        let hints = self
            .resolver
            .resolve(&ctx, &user_hist, &channel_hist, req.primary_override);
        info!(
            primary = %hints.primary,
            score = hints.primary_score,
            strict = hints.round_1.is_none(),
            "language resolved"
        );

        // Pick backend.
        let routing = &self.config.routing;
        let mut use_long = blob.len() > routing.sync_max_bytes
            || (blob.tag.is_compressed() && blob.len() > routing.long_compressed_min_bytes);

        // Long mode is far less forgiving of multi-channel input: force
        // canonical mono before the first long attempt.
        if use_long && !wav_canonical {
            progress.update(ProgressStage::Retranscode, "converting for long recognition");
            blob = self.transcoder.to_wav_16k_mono(&blob).await?;
            wav_canonical = true;
        }

        let first_alts = hints.round_1.as_deref().or(hints.round_2.as_deref());
        let second_alts = if hints.round_1.is_some() {
            hints.round_2.as_deref().or(hints.round_1.as_deref())
        } else {
            hints.round_2.as_deref()
        };

        // Attempt 1 — strict.
        let step = self
            .attempt(
                1,
                &mut use_long,
                &mut blob,
                &mut wav_canonical,
                &hints.primary,
                None,
                req,
                progress,
                cancel,
            )
            .await?;
        if let Step::Done(text, mode) = step {
            return self.post(req, text, mode, reserved_seconds).await;
        }

        // Attempt 2 — alternates.
        if let Some(alts) = first_alts {
            let step = self
                .attempt(
                    2,
                    &mut use_long,
                    &mut blob,
                    &mut wav_canonical,
                    &hints.primary,
                    Some(alts),
                    req,
                    progress,
                    cancel,
                )
                .await?;
            if let Step::Done(text, mode) = step {
                return self.post(req, text, mode, reserved_seconds).await;
            }
        }

        // Attempt 3 — force a fresh transcode and run both passes again,
        // but only when the input went in untouched the first time.
        if !normalized {
            progress.update(ProgressStage::Retranscode, "second-chance transcode");
            blob = self.transcoder.to_wav_16k_mono(&blob).await?;
            wav_canonical = true;
            // WAV is uncompressed, so only the absolute ceiling applies.
            use_long = blob.len() > routing.sync_max_bytes;

            let step = self
                .attempt(
                    3,
                    &mut use_long,
                    &mut blob,
                    &mut wav_canonical,
                    &hints.primary,
                    None,
                    req,
                    progress,
                    cancel,
                )
                .await?;
            if let Step::Done(text, mode) = step {
                return self.post(req, text, mode, reserved_seconds).await;
            }

            if let Some(alts) = second_alts {
                let step = self
                    .attempt(
                        3,
                        &mut use_long,
                        &mut blob,
                        &mut wav_canonical,
                        &hints.primary,
                        Some(alts),
                        req,
                        progress,
                        cancel,
                    )
                    .await?;
                if let Step::Done(text, mode) = step {
                    return self.post(req, text, mode, reserved_seconds).await;
                }
            }
        }

        info!(user = req.user_id, "no intelligible speech after all attempts");
        Ok(TranscribeOutcome::NoSpeech { reserved_seconds })
    }

    /// One recognition attempt against the currently selected arm,
    /// promoting sync → long when the ceiling is hit.
    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        number: u8,
        use_long: &mut bool,
        blob: &mut AudioBlob,
        wav_canonical: &mut bool,
        primary: &str,
        alternates: Option<&[String]>,
        req: &TranscribeRequest<'_>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Step> {
        loop {
            if cancel.is_cancelled() {
                return Err(SttError::Cancelled);
            }
            let arm: &dyn Recognizer = if *use_long {
                self.long_arm.as_ref()
            } else {
                self.sync_arm.as_ref()
            };
            progress.update(
                ProgressStage::Attempt,
                &format!("attempt {number} ({})", arm.mode().as_str()),
            );

            let mut options = req.options.clone();
            if *wav_canonical {
                options.sample_rate_hz = Some(16_000);
                options.audio_channel_count = Some(1);
            }

            match arm
                .recognize(blob, primary, alternates, &options, cancel)
                .await
            {
                Ok(RecognitionOutcome::Text { text, .. }) => {
                    return Ok(Step::Done(text, arm.mode()));
                }
                Ok(RecognitionOutcome::Empty { .. }) => {
                    debug!(number, "attempt returned empty transcript");
                    return Ok(Step::Empty);
                }
                Ok(RecognitionOutcome::ApiError { message, .. }) => {
                    return Err(SttError::Api(message));
                }
                Err(SttError::OversizedInput { size }) if !*use_long => {
                    debug!(size, "sync ceiling hit, promoting to long mode");
                    *use_long = true;
                    if !*wav_canonical {
                        progress.update(
                            ProgressStage::Retranscode,
                            "converting for long recognition",
                        );
                        *blob = self.transcoder.to_wav_16k_mono(blob).await?;
                        *wav_canonical = true;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Record the detected script and build the success outcome.
    async fn post(
        &self,
        req: &TranscribeRequest<'_>,
        transcript: String,
        mode: RecognizeMode,
        reserved_seconds: u32,
    ) -> Result<TranscribeOutcome> {
        let language = self.resolver.detect_script_from_text(&transcript).to_owned();
        self.history
            .bump(req.channel_id, req.user_id, &language)
            .await;
        info!(
            mode = mode.as_str(),
            %language,
            chars = transcript.len(),
            "transcription complete"
        );
        Ok(TranscribeOutcome::Success {
            transcript,
            mode,
            language,
            reserved_seconds,
        })
    }

    /// Probe the blob's duration via a scratch file, 0 when unknown.
    async fn probe_blob_duration(&self, blob: &AudioBlob) -> u32 {
        let suffix = if blob.tag.ext.is_empty() {
            ".bin".to_owned()
        } else {
            blob.tag.ext.clone()
        };
        let tmp = match tempfile::Builder::new().suffix(&suffix).tempfile() {
            Ok(tmp) => tmp,
            Err(_) => return 0,
        };
        if std::fs::write(tmp.path(), &blob.bytes).is_err() {
            return 0;
        }
        self.transcoder.probe_duration(tmp.path()).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::test_utils::MemoryQuotaStore;

    #[tokio::test]
    async fn reservation_commit_keeps_seconds() {
        let quota = Arc::new(MemoryQuotaStore::new(120));
        assert!(quota.try_reserve("u", None, 30).await);
        let reservation = Reservation::new(quota.clone(), "u", None, 30);
        reservation.commit();
        assert_eq!(quota.get_used("u", None).await, 30);
    }

    #[tokio::test]
    async fn reservation_refund_returns_seconds() {
        let quota = Arc::new(MemoryQuotaStore::new(120));
        assert!(quota.try_reserve("u", None, 30).await);
        let reservation = Reservation::new(quota.clone(), "u", None, 30);
        reservation.refund().await;
        assert_eq!(quota.get_used("u", None).await, 0);
    }

    #[tokio::test]
    async fn dropped_reservation_refunds_in_background() {
        let quota = Arc::new(MemoryQuotaStore::new(120));
        assert!(quota.try_reserve("u", None, 45).await);
        {
            let _reservation = Reservation::new(quota.clone(), "u", None, 45);
        }
        // The drop refund runs on a spawned task.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(quota.get_used("u", None).await, 0);
    }

    #[test]
    fn quota_exceeded_remaining() {
        let outcome = TranscribeOutcome::QuotaExceeded {
            used: 110,
            limit: 120,
        };
        assert_eq!(outcome.remaining(), Some(10));

        let over = TranscribeOutcome::QuotaExceeded {
            used: 130,
            limit: 120,
        };
        assert_eq!(over.remaining(), Some(0));
    }
}
