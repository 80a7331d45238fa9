//! Error types for the transcription pipeline.

/// Top-level error type for the speech-recognition orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum SttError {
    /// Quota store infrastructure error (connection, script execution).
    ///
    /// `try_reserve` never surfaces this — it fails open. Other store
    /// operations do.
    #[error("quota store error: {0}")]
    QuotaStore(String),

    /// All transcode plans failed. Carries the last stderr tail.
    #[error("transcode error: {0}")]
    Transcode(String),

    /// Object-store upload failed.
    #[error("upload error: {0}")]
    Upload(String),

    /// Recognizer API error (non-200, malformed response, request failure).
    #[error("recognizer error: {0}")]
    Api(String),

    /// Long-running operation did not complete within the poll budget.
    #[error("poll timeout: {0}")]
    PollTimeout(String),

    /// Input exceeds the synchronous recognizer ceiling.
    ///
    /// Internal: the orchestrator converts this into a switch to long
    /// mode instead of surfacing it to callers.
    #[error("input too large for sync recognition: {size} bytes")]
    OversizedInput {
        /// Size of the rejected blob in bytes.
        size: usize,
    },

    /// The caller cancelled the request.
    #[error("cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SttError>;
