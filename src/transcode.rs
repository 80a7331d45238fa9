//! Audio format adaptation via ffmpeg.
//!
//! The recognizer is most reliable on signed 16-bit PCM WAV, 16 kHz,
//! mono. Arbitrary chat uploads arrive in many container/codec
//! combinations, some of which ffmpeg cannot decode from a non-seekable
//! pipe, so conversion runs a multi-plan sequence: pipe first, then
//! forced demuxers, then seekable temp files.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::TranscodeConfig;
use crate::error::{Result, SttError};
use crate::media::{AudioBlob, MediaTag};

/// Outputs smaller than this are treated as failed conversions; a valid
/// WAV of any real utterance is well past a kilobyte.
const WAV_SANITY_FLOOR: usize = 1000;

/// How much trailing stderr to keep for the final error.
const STDERR_TAIL_BYTES: usize = 600;

/// Canonical-WAV conversion and duration probing.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Convert arbitrary container bytes to WAV (s16le, mono, 16 kHz).
    ///
    /// # Errors
    ///
    /// Fails with [`SttError::Transcode`] only after every plan is
    /// exhausted; the message carries the last stderr tail.
    async fn to_wav_16k_mono(&self, blob: &AudioBlob) -> Result<AudioBlob>;

    /// Duration of the media file in whole seconds, 0 when unknown.
    async fn probe_duration(&self, path: &Path) -> u32;

    /// Rewrite the blob to WAV when its format is known to trip the
    /// recognizer, otherwise pass it through.
    ///
    /// Returns the (possibly new) blob and whether a transcode ran.
    async fn ensure_compatible(&self, blob: &AudioBlob) -> Result<(AudioBlob, bool)> {
        if !needs_wav(&blob.tag) {
            return Ok((blob.clone(), false));
        }
        let wav = self.to_wav_16k_mono(blob).await?;
        Ok((wav, true))
    }
}

/// True when the recognizer cannot take this format directly.
///
/// MP4/AAC containers decode unreliably server-side; WebM is fine only
/// when it actually carries Opus.
pub fn needs_wav(tag: &MediaTag) -> bool {
    let ct = tag.content_type.as_str();
    if matches!(tag.ext.as_str(), ".m4a" | ".mp4" | ".aac")
        || ct.contains("audio/mp4")
        || ct.contains("video/mp4")
        || ct.contains("audio/aac")
    {
        return true;
    }
    tag.ext == ".webm" && !ct.contains("opus")
}

/// Demuxer names worth forcing for this tag, in attempt order.
fn forced_demuxers(tag: &MediaTag) -> Vec<&'static str> {
    let ct = tag.content_type.as_str();
    let mut fmts = Vec::new();
    if matches!(tag.ext.as_str(), ".m4a" | ".mp4")
        || ct.contains("audio/mp4")
        || ct.contains("video/mp4")
    {
        fmts.push("mp4");
    }
    if tag.ext == ".aac" || ct.contains("audio/aac") {
        fmts.push("aac");
    }
    if tag.ext == ".webm" || ct.contains("webm") {
        fmts.push("webm");
    }
    fmts
}

/// True when the container needs a seekable input to demux.
fn needs_seekable(tag: &MediaTag) -> bool {
    let ct = tag.content_type.as_str();
    matches!(tag.ext.as_str(), ".m4a" | ".mp4" | ".aac")
        || ct.contains("audio/mp4")
        || ct.contains("video/mp4")
        || ct.contains("audio/aac")
}

/// Keep at most the last `limit` bytes of a stderr string, on a char
/// boundary.
fn stderr_tail(err: &str, limit: usize) -> &str {
    if err.len() <= limit {
        return err;
    }
    let mut start = err.len() - limit;
    while !err.is_char_boundary(start) {
        start += 1;
    }
    &err[start..]
}

/// ffmpeg/ffprobe-backed transcoder.
pub struct FfmpegTranscoder {
    config: TranscodeConfig,
}

impl FfmpegTranscoder {
    /// Create a transcoder using the configured binaries.
    pub fn new(config: TranscodeConfig) -> Self {
        Self { config }
    }

    /// Run one ffmpeg invocation, returning (stdout, stderr, success).
    async fn run_ffmpeg(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<(Vec<u8>, String, bool)> {
        let mut cmd = Command::new(&self.config.ffmpeg_bin);
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;

        if let Some(input) = stdin {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| SttError::Transcode("ffmpeg stdin unavailable".to_owned()))?;
            let buf = input.to_vec();
            // Writer runs concurrently with the output drain below, so a
            // full stdout pipe cannot deadlock the stdin write.
            tokio::spawn(async move {
                let _ = pipe.write_all(&buf).await;
                let _ = pipe.shutdown().await;
            });
        }

        let output = child.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Ok((output.stdout, stderr, output.status.success()))
    }

    async fn try_plan(
        &self,
        args: &[&str],
        stdin: Option<&[u8]>,
        last_err: &mut String,
    ) -> Result<Option<Vec<u8>>> {
        let (out, err, ok) = self.run_ffmpeg(args, stdin).await?;
        if ok && out.len() > WAV_SANITY_FLOOR {
            return Ok(Some(out));
        }
        if !err.is_empty() {
            *last_err = err;
        }
        Ok(None)
    }
}

const HEAD: &[&str] = &["-nostdin", "-loglevel", "error", "-hide_banner", "-y"];
const PROBE_HINTS: &[&str] = &["-probesize", "50M", "-analyzeduration", "200M"];
const WAV_TAIL: &[&str] = &[
    "-vn", "-sn", "-acodec", "pcm_s16le", "-ac", "1", "-ar", "16000", "-f", "wav", "pipe:1",
];

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn to_wav_16k_mono(&self, blob: &AudioBlob) -> Result<AudioBlob> {
        let tag = &blob.tag;
        let bytes = blob.bytes.as_ref();
        let mut last_err = String::new();

        // Plan A: straight pipe with generous probing.
        let mut args: Vec<&str> = Vec::new();
        args.extend_from_slice(HEAD);
        args.extend_from_slice(PROBE_HINTS);
        args.extend_from_slice(&["-i", "pipe:0"]);
        args.extend_from_slice(WAV_TAIL);
        if let Some(out) = self.try_plan(&args, Some(bytes), &mut last_err).await? {
            return Ok(AudioBlob::new(out, MediaTag::wav()));
        }

        // Plan B: force the demuxer for containers ffmpeg missniffs on
        // a pipe.
        for fmt in forced_demuxers(tag) {
            let mut args: Vec<&str> = Vec::new();
            args.extend_from_slice(HEAD);
            args.extend_from_slice(&["-f", fmt]);
            args.extend_from_slice(PROBE_HINTS);
            args.extend_from_slice(&["-i", "pipe:0"]);
            args.extend_from_slice(WAV_TAIL);
            if let Some(out) = self.try_plan(&args, Some(bytes), &mut last_err).await? {
                return Ok(AudioBlob::new(out, MediaTag::wav()));
            }
        }

        // Plan C: MP4-family containers put their index at the end and
        // need a seekable file.
        if needs_seekable(tag) {
            let suffix = if matches!(tag.ext.as_str(), ".m4a" | ".mp4" | ".aac") {
                tag.ext.clone()
            } else {
                ".bin".to_owned()
            };
            let tmp = write_temp(bytes, &suffix)?;
            let path = tmp
                .path()
                .to_str()
                .ok_or_else(|| SttError::Transcode("temp path not utf-8".to_owned()))?;

            let mut args: Vec<&str> = Vec::new();
            args.extend_from_slice(HEAD);
            args.extend_from_slice(PROBE_HINTS);
            args.extend_from_slice(&["-i", path]);
            args.extend_from_slice(WAV_TAIL);
            if let Some(out) = self.try_plan(&args, None, &mut last_err).await? {
                return Ok(AudioBlob::new(out, MediaTag::wav()));
            }

            // Second sub-attempt tolerates broken indexes and timestamps.
            let mut args: Vec<&str> = Vec::new();
            args.extend_from_slice(HEAD);
            args.extend_from_slice(&[
                "-fflags",
                "+genpts+ignidx",
                "-err_detect",
                "ignore_err",
            ]);
            args.extend_from_slice(PROBE_HINTS);
            args.extend_from_slice(&["-i", path]);
            args.extend_from_slice(WAV_TAIL);
            if let Some(out) = self.try_plan(&args, None, &mut last_err).await? {
                return Ok(AudioBlob::new(out, MediaTag::wav()));
            }
        }

        // Plan D: WebM via temp file.
        if tag.ext == ".webm" || tag.content_type.contains("webm") {
            let tmp = write_temp(bytes, ".webm")?;
            let path = tmp
                .path()
                .to_str()
                .ok_or_else(|| SttError::Transcode("temp path not utf-8".to_owned()))?;
            let mut args: Vec<&str> = Vec::new();
            args.extend_from_slice(HEAD);
            args.extend_from_slice(PROBE_HINTS);
            args.extend_from_slice(&["-i", path]);
            args.extend_from_slice(WAV_TAIL);
            if let Some(out) = self.try_plan(&args, None, &mut last_err).await? {
                return Ok(AudioBlob::new(out, MediaTag::wav()));
            }
        }

        let tail = if last_err.is_empty() {
            "no stderr"
        } else {
            stderr_tail(&last_err, STDERR_TAIL_BYTES)
        };
        Err(SttError::Transcode(format!(
            "ffmpeg failed on every plan. tail:\n{tail}"
        )))
    }

    async fn probe_duration(&self, path: &Path) -> u32 {
        let output = Command::new(&self.config.ffprobe_bin)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await;

        let Ok(output) = output else {
            return 0;
        };
        if !output.status.success() {
            return 0;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        match text.trim().parse::<f64>() {
            Ok(secs) if secs.is_finite() && secs > 0.0 => secs.ceil() as u32,
            _ => {
                debug!("ffprobe returned no usable duration");
                0
            }
        }
    }
}

fn write_temp(bytes: &[u8], suffix: &str) -> Result<tempfile::NamedTempFile> {
    let tmp = tempfile::Builder::new().suffix(suffix).tempfile()?;
    std::fs::write(tmp.path(), bytes)?;
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn tag(name: &str, ct: &str) -> MediaTag {
        MediaTag {
            ext: crate::media::file_ext(name),
            content_type: ct.to_owned(),
        }
    }

    #[test]
    fn needs_wav_for_mp4_family() {
        assert!(needs_wav(&tag("a.m4a", "audio/mp4")));
        assert!(needs_wav(&tag("a.mp4", "video/mp4")));
        assert!(needs_wav(&tag("a.aac", "audio/aac")));
        assert!(needs_wav(&tag("a.bin", "audio/mp4")));
    }

    #[test]
    fn webm_needs_wav_only_without_opus() {
        assert!(needs_wav(&tag("a.webm", "audio/webm")));
        assert!(!needs_wav(&tag("a.webm", "audio/webm; codecs=opus")));
    }

    #[test]
    fn canonical_formats_pass_through() {
        assert!(!needs_wav(&tag("a.wav", "audio/wav")));
        assert!(!needs_wav(&tag("a.mp3", "audio/mpeg")));
        assert!(!needs_wav(&tag("a.ogg", "audio/ogg")));
        assert!(!needs_wav(&tag("a.flac", "audio/flac")));
    }

    #[test]
    fn forced_demuxers_by_family() {
        assert_eq!(forced_demuxers(&tag("a.m4a", "audio/mp4")), vec!["mp4"]);
        assert_eq!(forced_demuxers(&tag("a.aac", "audio/aac")), vec!["aac"]);
        assert_eq!(forced_demuxers(&tag("a.webm", "audio/webm")), vec!["webm"]);
        assert!(forced_demuxers(&tag("a.wav", "audio/wav")).is_empty());
    }

    #[test]
    fn stderr_tail_truncates_on_char_boundary() {
        let long = format!("{}สวัสดี", "x".repeat(700));
        let tail = stderr_tail(&long, STDERR_TAIL_BYTES);
        assert!(tail.len() <= STDERR_TAIL_BYTES);
        assert!(tail.ends_with("สวัสดี"));

        let short = "tiny error";
        assert_eq!(stderr_tail(short, STDERR_TAIL_BYTES), short);
    }

    #[test]
    fn seekable_rule_matches_mp4_family_only() {
        assert!(needs_seekable(&tag("a.m4a", "audio/mp4")));
        assert!(needs_seekable(&tag("clip", "video/mp4")));
        assert!(!needs_seekable(&tag("a.webm", "audio/webm")));
        assert!(!needs_seekable(&tag("a.mp3", "audio/mpeg")));
    }
}
