//! Configuration types for the transcription pipeline.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the speech-recognition orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Daily quota settings.
    pub quota: QuotaConfig,
    /// Language selection settings.
    pub lang: LangConfig,
    /// Synchronous recognizer settings.
    pub sync: SyncConfig,
    /// Long-running recognizer settings.
    pub long: LongConfig,
    /// Object-store settings for long-mode uploads.
    pub storage: StorageConfig,
    /// Transcoder settings.
    pub transcode: TranscodeConfig,
    /// Backend routing thresholds.
    pub routing: RoutingConfig,
}

/// Scope of the daily quota key.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaScope {
    /// One counter per user across all guilds.
    #[default]
    User,
    /// One counter per (guild, user) pair.
    GuildUser,
}

/// Daily seconds-quota configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Redis connection URL for the shared quota/history store.
    pub redis_url: String,
    /// Seconds of recognition allowed per local day.
    pub daily_limit_seconds: u32,
    /// Key scoping mode.
    pub scope: QuotaScope,
    /// IANA time zone defining the local day window.
    ///
    /// An invalid name falls back to UTC with a warning.
    pub tz: String,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_owned(),
            daily_limit_seconds: 120,
            scope: QuotaScope::default(),
            tz: "Asia/Bangkok".to_owned(),
        }
    }
}

impl QuotaConfig {
    /// Parse the configured time zone, falling back to UTC.
    pub fn time_zone(&self) -> chrono_tz::Tz {
        self.tz.parse().unwrap_or_else(|_| {
            tracing::warn!("invalid TZ '{}', falling back to UTC", self.tz);
            chrono_tz::UTC
        })
    }
}

/// Language selection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LangConfig {
    /// Primary language used when no context signal wins.
    pub default_primary: String,
    /// Context score above which the first pass runs strict (no alternates).
    pub strict_confidence_threshold: f32,
    /// Damp the Japanese alternate weight unless the user's history backs it.
    pub damp_japanese_when_uncertain: bool,
    /// TTL in days for the per-user and per-channel language histograms.
    pub history_ttl_days: u32,
}

impl Default for LangConfig {
    fn default() -> Self {
        Self {
            default_primary: "th-TH".to_owned(),
            strict_confidence_threshold: 2.0,
            damp_japanese_when_uncertain: false,
            history_ttl_days: 90,
        }
    }
}

/// Synchronous recognizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// API key appended to the recognize URL.
    pub api_key: String,
    /// Recognizer endpoint base URL.
    pub base_url: String,
    /// Read timeout for the recognize call, in seconds.
    pub read_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://speech.googleapis.com".to_owned(),
            read_timeout_secs: 120,
        }
    }
}

/// Long-running recognizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LongConfig {
    /// Recognizer endpoint base URL.
    pub base_url: String,
    /// Seconds between operation polls.
    pub poll_interval_secs: u64,
    /// Wall-clock bound on the whole poll loop, in seconds.
    pub poll_max_secs: u64,
}

impl Default for LongConfig {
    fn default() -> Self {
        Self {
            base_url: "https://speech.googleapis.com".to_owned(),
            poll_interval_secs: 5,
            poll_max_secs: 900,
        }
    }
}

/// Object-store configuration for long-mode uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Bucket receiving transient uploads.
    pub bucket: String,
    /// Key prefix for transient objects.
    pub prefix: String,
    /// Object-store endpoint base URL.
    pub base_url: String,
    /// Delete the object right after a successful transcription.
    pub delete_immediately: bool,
    /// When not deleting immediately, schedule a best-effort delete
    /// after this many seconds. 0 disables the delayed delete.
    pub delete_delay_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: "discord_uploads/".to_owned(),
            base_url: "https://storage.googleapis.com".to_owned(),
            delete_immediately: true,
            delete_delay_seconds: 0,
        }
    }
}

/// Transcoder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// ffmpeg binary name or path.
    pub ffmpeg_bin: String,
    /// ffprobe binary name or path.
    pub ffprobe_bin: String,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_owned(),
            ffprobe_bin: "ffprobe".to_owned(),
        }
    }
}

/// Thresholds deciding between the sync and long recognizers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Absolute byte ceiling for synchronous recognition.
    pub sync_max_bytes: usize,
    /// Compressed-container inputs above this size go to long mode:
    /// a small compressed file often exceeds a minute of audio.
    pub long_compressed_min_bytes: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            sync_max_bytes: 9_000_000,
            long_compressed_min_bytes: 1_800_000,
        }
    }
}

impl SttConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::SttError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::SttError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SttConfig::default();
        assert_eq!(config.quota.daily_limit_seconds, 120);
        assert_eq!(config.quota.scope, QuotaScope::User);
        assert_eq!(config.lang.default_primary, "th-TH");
        assert!((config.lang.strict_confidence_threshold - 2.0).abs() < f32::EPSILON);
        assert_eq!(config.routing.sync_max_bytes, 9_000_000);
        assert_eq!(config.routing.long_compressed_min_bytes, 1_800_000);
        assert_eq!(config.long.poll_interval_secs, 5);
        assert_eq!(config.long.poll_max_secs, 900);
        assert_eq!(config.storage.prefix, "discord_uploads/");
    }

    #[test]
    fn tz_parses_and_falls_back() {
        let config = QuotaConfig::default();
        assert_eq!(config.time_zone(), chrono_tz::Asia::Bangkok);

        let bad = QuotaConfig {
            tz: "Not/AZone".to_owned(),
            ..Default::default()
        };
        assert_eq!(bad.time_zone(), chrono_tz::UTC);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = SttConfig::default();
        config.quota.daily_limit_seconds = 300;
        config.quota.scope = QuotaScope::GuildUser;
        config.lang.default_primary = "ja-JP".to_owned();
        config.storage.bucket = "notes".to_owned();

        config.save_to_file(&path).unwrap();
        let loaded = SttConfig::from_file(&path).unwrap();
        assert_eq!(loaded.quota.daily_limit_seconds, 300);
        assert_eq!(loaded.quota.scope, QuotaScope::GuildUser);
        assert_eq!(loaded.lang.default_primary, "ja-JP");
        assert_eq!(loaded.storage.bucket, "notes");
    }

    #[test]
    fn scope_deserializes_snake_case() {
        let toml_str = r#"
[quota]
scope = "guild_user"
"#;
        let config: SttConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.quota.scope, QuotaScope::GuildUser);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config: SttConfig = toml::from_str("[sync]\nread_timeout_secs = 30").unwrap();
        assert_eq!(config.sync.read_timeout_secs, 30);
        assert_eq!(config.long.poll_max_secs, 900);
        assert!(config.storage.delete_immediately);
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = SttConfig::from_file(std::path::Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }
}
