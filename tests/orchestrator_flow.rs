//! Orchestrator End-to-End Scenarios
//!
//! The six canonical flows plus the routing and quota boundary cases,
//! run against in-memory fakes so every quota/histogram side effect can
//! be asserted exactly.

use std::sync::Arc;

use hark::config::SttConfig;
use hark::media::BytesAttachment;
use hark::orchestrator::{NullProgress, ServiceContext, TranscribeOutcome, TranscribeRequest};
use hark::recognize::{
    RecognitionOutcome, RecognizeMode, RecognizeOptions, Recognizer,
};
use hark::test_utils::{
    FakeTranscoder, MemoryLanguageHistory, MemoryQuotaStore, ScriptedRecognizer,
    ScriptedResponse, api_error_outcome, empty_outcome, text_outcome,
};
use hark::{QuotaStore, SttError};
use tokio_util::sync::CancellationToken;

struct Fixture {
    context: ServiceContext,
    quota: Arc<MemoryQuotaStore>,
    history: Arc<MemoryLanguageHistory>,
    transcoder: Arc<FakeTranscoder>,
    sync_arm: Arc<ScriptedRecognizer>,
    long_arm: Arc<ScriptedRecognizer>,
}

fn fixture(
    limit: u32,
    transcoder: FakeTranscoder,
    sync_script: Vec<ScriptedResponse>,
    long_script: Vec<ScriptedResponse>,
) -> Fixture {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let quota = Arc::new(MemoryQuotaStore::new(limit));
    let history = Arc::new(MemoryLanguageHistory::new());
    let transcoder = Arc::new(transcoder);
    let sync_arm = Arc::new(ScriptedRecognizer::new(RecognizeMode::Sync, sync_script));
    let long_arm = Arc::new(ScriptedRecognizer::new(RecognizeMode::Long, long_script));
    let context = ServiceContext::new(
        SttConfig::default(),
        quota.clone(),
        transcoder.clone(),
        history.clone(),
        sync_arm.clone(),
        long_arm.clone(),
    );
    Fixture {
        context,
        quota,
        history,
        transcoder,
        sync_arm,
        long_arm,
    }
}

fn request<'a>(
    attachment: &'a BytesAttachment,
    primary_override: Option<&'a str>,
) -> TranscribeRequest<'a> {
    TranscribeRequest {
        attachment,
        user_id: "u1",
        guild_id: None,
        channel_id: "c1",
        user_name: "somebody",
        channel_name: "general",
        caption: "",
        primary_override,
        options: RecognizeOptions::default(),
    }
}

async fn run(fixture: &Fixture, req: &TranscribeRequest<'_>) -> hark::Result<TranscribeOutcome> {
    fixture
        .context
        .transcribe(req, &NullProgress, &CancellationToken::new())
        .await
}

#[tokio::test]
async fn happy_path_short_thai_wav() {
    let fx = fixture(
        120,
        FakeTranscoder::new(50_000, 12),
        vec![ScriptedResponse::Outcome(text_outcome("สวัสดีครับ ทดสอบ"))],
        vec![],
    );
    let attachment = BytesAttachment::new("note.wav", Some("audio/wav"), vec![0u8; 200_000]);
    let req = request(&attachment, Some("th-TH"));

    let outcome = run(&fx, &req).await.expect("transcribe should succeed");
    match outcome {
        TranscribeOutcome::Success {
            transcript,
            mode,
            language,
            reserved_seconds,
        } => {
            assert_eq!(transcript, "สวัสดีครับ ทดสอบ");
            assert_eq!(mode, RecognizeMode::Sync);
            assert_eq!(language, "th-TH");
            assert_eq!(reserved_seconds, 12);
        }
        other => panic!("expected Success, got {other:?}"),
    }

    assert_eq!(fx.quota.get_used("u1", None).await, 12);
    assert_eq!(fx.history.channel_count("c1", "th-TH"), 1);
    assert_eq!(fx.history.user_count("u1", "th-TH"), 1);

    // One strict attempt, no alternates, no long-arm involvement.
    let calls = fx.sync_arm.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].primary, "th-TH");
    assert!(calls[0].alternates.is_none());
    assert!(fx.long_arm.calls().is_empty());
}

#[tokio::test]
async fn empty_strict_pass_falls_back_to_alternates() {
    let fx = fixture(
        120,
        FakeTranscoder::new(50_000, 8),
        vec![
            ScriptedResponse::Outcome(empty_outcome()),
            ScriptedResponse::Outcome(text_outcome("hello how are you")),
        ],
        vec![],
    );
    let attachment = BytesAttachment::new("note.wav", Some("audio/wav"), vec![0u8; 150_000]);
    let req = request(&attachment, Some("th-TH"));

    let outcome = run(&fx, &req).await.expect("transcribe should succeed");
    match outcome {
        TranscribeOutcome::Success {
            transcript,
            language,
            ..
        } => {
            assert_eq!(transcript, "hello how are you");
            assert_eq!(language, "en-US");
        }
        other => panic!("expected Success, got {other:?}"),
    }

    let calls = fx.sync_arm.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].alternates.is_none(), "first pass is strict");
    let alts = calls[1].alternates.clone().expect("second pass has alternates");
    assert!(
        alts.iter().any(|a| a == "en-US"),
        "alternates must include en-US: {alts:?}"
    );

    assert_eq!(fx.history.channel_count("c1", "en-US"), 1);
    assert_eq!(fx.history.user_count("u1", "en-US"), 1);
    assert_eq!(fx.history.user_count("u1", "th-TH"), 0);
}

#[tokio::test]
async fn big_stereo_mp3_goes_long_with_forced_mono() {
    let fx = fixture(
        600,
        FakeTranscoder::new(5_000_000, 180),
        vec![],
        vec![ScriptedResponse::Outcome(text_outcome("a three minute story"))],
    );
    let attachment = BytesAttachment::new("song.mp3", Some("audio/mpeg"), vec![0u8; 12_000_000]);
    let req = request(&attachment, Some("en-US"));

    let outcome = run(&fx, &req).await.expect("transcribe should succeed");
    match outcome {
        TranscribeOutcome::Success {
            mode,
            reserved_seconds,
            ..
        } => {
            assert_eq!(mode, RecognizeMode::Long);
            assert_eq!(reserved_seconds, 180);
        }
        other => panic!("expected Success, got {other:?}"),
    }

    // Pre-recognition mono transcode ran exactly once, and the long arm
    // saw canonical WAV with explicit rate hints.
    assert_eq!(fx.transcoder.calls(), 1);
    let calls = fx.long_arm.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tag.ext, ".wav");
    assert_eq!(calls[0].sample_rate_hz, Some(16_000));
    assert!(fx.sync_arm.calls().is_empty());

    assert_eq!(fx.quota.get_used("u1", None).await, 180);
}

#[tokio::test]
async fn quota_exceeded_runs_nothing() {
    let fx = fixture(120, FakeTranscoder::new(50_000, 60), vec![], vec![]);
    assert!(fx.quota.try_reserve("u1", None, 110).await);

    let attachment = BytesAttachment::new("note.wav", Some("audio/wav"), vec![0u8; 100_000]);
    let req = request(&attachment, None);

    let outcome = run(&fx, &req).await.expect("quota denial is an outcome");
    match &outcome {
        TranscribeOutcome::QuotaExceeded { used, limit } => {
            assert_eq!(*used, 110);
            assert_eq!(*limit, 120);
            assert_eq!(outcome.remaining(), Some(10));
        }
        other => panic!("expected QuotaExceeded, got {other:?}"),
    }

    assert_eq!(fx.quota.get_used("u1", None).await, 110);
    assert!(fx.sync_arm.calls().is_empty());
    assert!(fx.long_arm.calls().is_empty());
    assert_eq!(fx.transcoder.calls(), 0);
    assert_eq!(fx.history.user_count("u1", "th-TH"), 0);
}

#[tokio::test]
async fn api_error_refunds_reservation() {
    let fx = fixture(
        120,
        FakeTranscoder::new(50_000, 30),
        vec![ScriptedResponse::Outcome(api_error_outcome(
            "recognize failed (HTTP 500): backend exploded",
        ))],
        vec![],
    );
    let attachment = BytesAttachment::new("note.wav", Some("audio/wav"), vec![0u8; 100_000]);
    let req = request(&attachment, Some("th-TH"));

    let result = run(&fx, &req).await;
    match result {
        Err(SttError::Api(message)) => assert!(message.contains("500"), "message: {message}"),
        other => panic!("expected Api error, got {other:?}"),
    }

    assert_eq!(fx.quota.get_used("u1", None).await, 0);
    assert_eq!(fx.history.user_count("u1", "th-TH"), 0);
}

#[tokio::test]
async fn silence_exhausts_all_attempts_without_refund() {
    // Empty script: every attempt answers Empty.
    let fx = fixture(120, FakeTranscoder::new(50_000, 10), vec![], vec![]);
    let attachment = BytesAttachment::new("silence.wav", Some("audio/wav"), vec![0u8; 100_000]);
    let req = request(&attachment, Some("th-TH"));

    let outcome = run(&fx, &req).await.expect("no-speech is an outcome");
    match outcome {
        TranscribeOutcome::NoSpeech { reserved_seconds } => assert_eq!(reserved_seconds, 10),
        other => panic!("expected NoSpeech, got {other:?}"),
    }

    // Strict, alternates, then the second-chance transcode repeats both.
    let calls = fx.sync_arm.calls();
    assert_eq!(calls.len(), 4);
    assert!(calls[0].alternates.is_none());
    assert!(calls[1].alternates.is_some());
    assert!(calls[2].alternates.is_none());
    assert!(calls[3].alternates.is_some());
    assert_eq!(fx.transcoder.calls(), 1, "second-chance transcode ran");
    // The re-transcoded passes see canonical WAV.
    assert_eq!(calls[3].tag.ext, ".wav");
    assert_eq!(calls[3].sample_rate_hz, Some(16_000));

    // Work was performed: no refund, no histogram update.
    assert_eq!(fx.quota.get_used("u1", None).await, 10);
    assert_eq!(fx.history.user_count("u1", "th-TH"), 0);
}

#[tokio::test]
async fn transcode_failure_refunds() {
    let fx = fixture(120, FakeTranscoder::failing(), vec![], vec![]);
    // m4a forces normalization, which fails.
    let attachment = BytesAttachment::new("voice.m4a", Some("audio/mp4"), vec![0u8; 100_000]);
    let req = request(&attachment, None);

    let result = run(&fx, &req).await;
    assert!(matches!(result, Err(SttError::Transcode(_))));
    assert_eq!(fx.quota.get_used("u1", None).await, 0);
    assert!(fx.sync_arm.calls().is_empty());
}

#[tokio::test]
async fn sync_ceiling_boundary_routes_backends() {
    // Exactly at the ceiling: stays sync.
    let fx = fixture(
        600,
        FakeTranscoder::new(50_000, 30),
        vec![ScriptedResponse::Outcome(text_outcome("at the edge"))],
        vec![],
    );
    let attachment = BytesAttachment::new("big.wav", Some("audio/wav"), vec![0u8; 9_000_000]);
    let outcome = run(&fx, &request(&attachment, Some("en-US")))
        .await
        .expect("transcribe should succeed");
    assert!(matches!(
        outcome,
        TranscribeOutcome::Success {
            mode: RecognizeMode::Sync,
            ..
        }
    ));
    assert!(fx.long_arm.calls().is_empty());

    // One byte over: long mode.
    let fx = fixture(
        600,
        FakeTranscoder::new(50_000, 30),
        vec![],
        vec![ScriptedResponse::Outcome(text_outcome("over the edge"))],
    );
    let attachment = BytesAttachment::new("big.wav", Some("audio/wav"), vec![0u8; 9_000_001]);
    let outcome = run(&fx, &request(&attachment, Some("en-US")))
        .await
        .expect("transcribe should succeed");
    assert!(matches!(
        outcome,
        TranscribeOutcome::Success {
            mode: RecognizeMode::Long,
            ..
        }
    ));
    assert!(fx.sync_arm.calls().is_empty());
}

#[tokio::test]
async fn compressed_threshold_routes_small_mp3_to_long() {
    // 1.8 MB + 1: compressed heuristic kicks in well below 9 MB.
    let fx = fixture(
        600,
        FakeTranscoder::new(50_000, 90),
        vec![],
        vec![ScriptedResponse::Outcome(text_outcome("compressed long"))],
    );
    let attachment = BytesAttachment::new("note.mp3", Some("audio/mpeg"), vec![0u8; 1_800_001]);
    let outcome = run(&fx, &request(&attachment, Some("en-US")))
        .await
        .expect("transcribe should succeed");
    assert!(matches!(
        outcome,
        TranscribeOutcome::Success {
            mode: RecognizeMode::Long,
            ..
        }
    ));

    // At the threshold: still sync.
    let fx = fixture(
        600,
        FakeTranscoder::new(50_000, 90),
        vec![ScriptedResponse::Outcome(text_outcome("compressed sync"))],
        vec![],
    );
    let attachment = BytesAttachment::new("note.mp3", Some("audio/mpeg"), vec![0u8; 1_800_000]);
    let outcome = run(&fx, &request(&attachment, Some("en-US")))
        .await
        .expect("transcribe should succeed");
    assert!(matches!(
        outcome,
        TranscribeOutcome::Success {
            mode: RecognizeMode::Sync,
            ..
        }
    ));
}

#[tokio::test]
async fn unknown_duration_reserves_the_floor() {
    let fx = fixture(
        120,
        FakeTranscoder::new(50_000, 0),
        vec![ScriptedResponse::Outcome(text_outcome("ok"))],
        vec![],
    );
    let attachment = BytesAttachment::new("odd.wav", Some("audio/wav"), vec![0u8; 10_000]);
    let outcome = run(&fx, &request(&attachment, Some("en-US")))
        .await
        .expect("transcribe should succeed");
    match outcome {
        TranscribeOutcome::Success {
            reserved_seconds, ..
        } => assert_eq!(reserved_seconds, 60),
        other => panic!("expected Success, got {other:?}"),
    }
    assert_eq!(fx.quota.get_used("u1", None).await, 60);
}

#[tokio::test]
async fn sync_oversize_promotes_to_long_mid_attempt() {
    let fx = fixture(
        600,
        FakeTranscoder::new(60_000, 45),
        vec![ScriptedResponse::Oversized],
        vec![ScriptedResponse::Outcome(text_outcome("promoted"))],
    );
    let attachment = BytesAttachment::new("dense.wav", Some("audio/wav"), vec![0u8; 5_000_000]);
    let outcome = run(&fx, &request(&attachment, Some("en-US")))
        .await
        .expect("transcribe should succeed");
    assert!(matches!(
        outcome,
        TranscribeOutcome::Success {
            mode: RecognizeMode::Long,
            ..
        }
    ));

    assert_eq!(fx.sync_arm.calls().len(), 1);
    let long_calls = fx.long_arm.calls();
    assert_eq!(long_calls.len(), 1);
    // Promotion forces the canonical mono transcode first.
    assert_eq!(fx.transcoder.calls(), 1);
    assert_eq!(long_calls[0].tag.ext, ".wav");
}

/// Recognizer that cancels the request token, then reports empty.
struct CancellingRecognizer {
    token: CancellationToken,
}

#[async_trait::async_trait]
impl Recognizer for CancellingRecognizer {
    fn mode(&self) -> RecognizeMode {
        RecognizeMode::Sync
    }

    async fn recognize(
        &self,
        _blob: &hark::AudioBlob,
        _primary: &str,
        _alternates: Option<&[String]>,
        _options: &RecognizeOptions,
        _cancel: &CancellationToken,
    ) -> hark::Result<RecognitionOutcome> {
        self.token.cancel();
        Ok(empty_outcome())
    }
}

#[tokio::test]
async fn cancellation_after_reserve_refunds() {
    let quota = Arc::new(MemoryQuotaStore::new(120));
    let history = Arc::new(MemoryLanguageHistory::new());
    let transcoder = Arc::new(FakeTranscoder::new(50_000, 20));
    let cancel = CancellationToken::new();
    let sync_arm = Arc::new(CancellingRecognizer {
        token: cancel.clone(),
    });
    let long_arm = Arc::new(ScriptedRecognizer::new(RecognizeMode::Long, vec![]));
    let context = ServiceContext::new(
        SttConfig::default(),
        quota.clone(),
        transcoder,
        history,
        sync_arm,
        long_arm,
    );

    let attachment = BytesAttachment::new("note.wav", Some("audio/wav"), vec![0u8; 10_000]);
    let req = request(&attachment, Some("th-TH"));
    let result = context.transcribe(&req, &NullProgress, &cancel).await;

    assert!(matches!(result, Err(SttError::Cancelled)));
    assert_eq!(quota.get_used("u1", None).await, 0);
}

#[tokio::test]
async fn pre_cancelled_request_never_reserves() {
    let fx = fixture(120, FakeTranscoder::new(50_000, 20), vec![], vec![]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let attachment = BytesAttachment::new("note.wav", Some("audio/wav"), vec![0u8; 10_000]);
    let req = request(&attachment, None);
    let result = fx.context.transcribe(&req, &NullProgress, &cancel).await;

    assert!(matches!(result, Err(SttError::Cancelled)));
    assert_eq!(fx.quota.get_used("u1", None).await, 0);
}

#[tokio::test]
async fn reserve_at_limit_succeeds_exactly_once() {
    let quota = MemoryQuotaStore::new(120);
    assert!(quota.try_reserve("u", None, 120).await);
    assert!(!quota.try_reserve("u", None, 120).await);
    assert!(!quota.try_reserve("u", None, 1).await);
}

#[tokio::test]
async fn double_refund_clamps_to_zero() {
    let quota = MemoryQuotaStore::new(120);
    assert!(quota.try_reserve("u", None, 30).await);
    quota.refund("u", None, 30).await;
    quota.refund("u", None, 30).await;
    assert_eq!(quota.get_used("u", None).await, 0);
}

#[tokio::test]
async fn concurrent_reservations_never_exceed_limit() {
    let quota = Arc::new(MemoryQuotaStore::new(120));
    let mut handles = Vec::new();
    for _ in 0..10 {
        let quota = quota.clone();
        handles.push(tokio::spawn(
            async move { quota.try_reserve("u", None, 30).await },
        ));
    }
    let mut granted = 0;
    for handle in handles {
        if handle.await.expect("task should not panic") {
            granted += 1;
        }
    }
    assert_eq!(granted, 4);
    assert_eq!(quota.get_used("u", None).await, 120);
}
