//! Media descriptors: blobs, tags, MIME guessing, and the wire encoding map.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Extension + content type pair carried alongside audio bytes.
///
/// The extension is canonical lowercase with a leading dot (`".mp3"`);
/// the content type is a lowercase MIME string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTag {
    /// Canonical file extension, e.g. `".wav"`. Empty when unknown.
    pub ext: String,
    /// Lowercase MIME type, e.g. `"audio/wav"`.
    pub content_type: String,
}

impl MediaTag {
    /// Build a tag from a file name and an optional declared content type.
    ///
    /// The extension is taken from the file name; when no content type is
    /// declared it is guessed from the extension.
    pub fn from_name(file_name: &str, content_type: Option<&str>) -> Self {
        let ext = file_ext(file_name);
        let content_type = match content_type {
            Some(ct) if !ct.trim().is_empty() => ct.trim().to_ascii_lowercase(),
            _ => guess_content_type(file_name).to_owned(),
        };
        Self { ext, content_type }
    }

    /// Tag for canonical recognizer WAV output.
    pub fn wav() -> Self {
        Self {
            ext: ".wav".to_owned(),
            content_type: "audio/wav".to_owned(),
        }
    }

    /// True when this tag names a compressed container family.
    ///
    /// Compressed inputs with small byte counts often exceed a minute of
    /// audio, which matters for backend selection.
    pub fn is_compressed(&self) -> bool {
        matches!(
            self.ext.as_str(),
            ".mp3" | ".m4a" | ".mp4" | ".ogg" | ".opus" | ".webm"
        ) || ["audio/ogg", "audio/webm", "audio/mpeg", "video/mp4"]
            .iter()
            .any(|m| self.content_type.contains(m))
    }
}

/// Extract the lowercase dot-prefixed extension from a file name.
pub fn file_ext(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() && !ext.contains('/') => {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => String::new(),
    }
}

/// Guess a MIME type from a file name's extension.
pub fn guess_content_type(file_name: &str) -> &'static str {
    match file_ext(file_name).as_str() {
        ".wav" => "audio/wav",
        ".flac" => "audio/flac",
        ".mp3" => "audio/mpeg",
        ".m4a" | ".mp4" => "audio/mp4",
        ".aac" => "audio/aac",
        ".ogg" | ".opus" => "audio/ogg",
        ".webm" => "audio/webm",
        _ => "application/octet-stream",
    }
}

/// An opaque audio byte buffer plus its media tag.
///
/// Several of these may exist sequentially within one request (original,
/// transcoded); each is owned by the orchestrator frame.
#[derive(Debug, Clone)]
pub struct AudioBlob {
    /// Raw container bytes.
    pub bytes: Bytes,
    /// Extension + MIME describing the bytes.
    pub tag: MediaTag,
}

impl AudioBlob {
    /// Construct a blob from bytes and a tag.
    pub fn new(bytes: impl Into<Bytes>, tag: MediaTag) -> Self {
        Self {
            bytes: bytes.into(),
            tag,
        }
    }

    /// Size of the blob in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the blob holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Recognizer wire encoding derived from a media tag.
///
/// Containers are checked before bare codecs: WebM and Ogg both carry
/// Opus, and the recognizer distinguishes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    /// Opus in WebM.
    WebmOpus,
    /// Opus in Ogg.
    OggOpus,
    /// MPEG layer 3.
    Mp3,
    /// FLAC.
    Flac,
    /// Signed 16-bit little-endian PCM (WAV).
    Linear16,
    /// Let the recognizer sniff the container.
    Unspecified,
}

impl AudioEncoding {
    /// Map a media tag to the wire encoding.
    pub fn from_tag(tag: &MediaTag) -> Self {
        let m = tag.content_type.as_str();
        let ext = tag.ext.as_str();
        if m.contains("webm") || ext == ".webm" {
            Self::WebmOpus
        } else if m.contains("ogg") || ext == ".ogg" || ext == ".opus" {
            Self::OggOpus
        } else if m.contains("mpeg") || ext == ".mp3" {
            Self::Mp3
        } else if ext == ".flac" || m.contains("flac") {
            Self::Flac
        } else if ext == ".wav" || m.contains("wav") {
            Self::Linear16
        } else {
            Self::Unspecified
        }
    }

    /// Wire name of the encoding.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebmOpus => "WEBM_OPUS",
            Self::OggOpus => "OGG_OPUS",
            Self::Mp3 => "MP3",
            Self::Flac => "FLAC",
            Self::Linear16 => "LINEAR16",
            Self::Unspecified => "ENCODING_UNSPECIFIED",
        }
    }

    /// Sample rate the recognizer requires when none is supplied.
    ///
    /// Opus containers must declare 48 kHz explicitly.
    pub fn default_sample_rate(self) -> Option<u32> {
        match self {
            Self::WebmOpus | Self::OggOpus => Some(48_000),
            _ => None,
        }
    }
}

/// An uploaded media file as handed over by the chat adapter.
///
/// Implementations wrap whatever the platform provides (a CDN URL, an
/// in-memory buffer). The descriptor lives for one request only.
#[async_trait]
pub trait Attachment: Send + Sync {
    /// Original file name as posted.
    fn file_name(&self) -> &str;

    /// Declared content type, when the platform supplies one.
    fn content_type(&self) -> Option<&str>;

    /// Fetch the full attachment bytes.
    async fn read_bytes(&self) -> Result<Bytes>;
}

/// In-memory attachment, used by tests and by adapters that already
/// hold the bytes.
#[derive(Debug, Clone)]
pub struct BytesAttachment {
    name: String,
    content_type: Option<String>,
    data: Bytes,
}

impl BytesAttachment {
    /// Wrap a byte buffer as an attachment.
    pub fn new(name: impl Into<String>, content_type: Option<&str>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.map(str::to_owned),
            data: data.into(),
        }
    }
}

#[async_trait]
impl Attachment for BytesAttachment {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    async fn read_bytes(&self) -> Result<Bytes> {
        Ok(self.data.clone())
    }
}
