//! Per-channel and per-user language histograms.
//!
//! Histograms record which languages actually came out of recognition,
//! per channel and per user, and feed back into primary/alternate
//! selection. Reads tolerate stale data; writes are last-writer-wins
//! with no locking discipline.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::warn;

use crate::error::{Result, SttError};

/// Language code → observation count.
pub type LangHistogram = HashMap<String, u32>;

/// Store for the language histograms.
#[async_trait]
pub trait LanguageHistory: Send + Sync {
    /// Histogram of languages seen in a channel. Empty on store error.
    async fn channel_hist(&self, channel: &str) -> LangHistogram;

    /// Histogram of languages seen from a user. Empty on store error.
    async fn user_hist(&self, user: &str) -> LangHistogram;

    /// Record one observation of `code` for both scopes. Best-effort.
    async fn bump(&self, channel: &str, user: &str, code: &str);
}

/// Redis hash per scope with a long TTL, refreshed on every write.
pub struct RedisLanguageHistory {
    conn: ConnectionManager,
    ttl_secs: i64,
}

fn channel_key(channel: &str) -> String {
    format!("stt:lang:ch:{channel}")
}

fn user_key(user: &str) -> String {
    format!("stt:lang:user:{user}")
}

impl RedisLanguageHistory {
    /// Connect using an existing URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the connection fails.
    pub async fn connect(redis_url: &str, ttl_days: u32) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| SttError::QuotaStore(format!("invalid redis url: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| SttError::QuotaStore(format!("redis connect failed: {e}")))?;
        Ok(Self::from_connection(conn, ttl_days))
    }

    /// Wrap an existing connection (shared with the quota store).
    pub fn from_connection(conn: ConnectionManager, ttl_days: u32) -> Self {
        Self {
            conn,
            ttl_secs: i64::from(ttl_days) * 86_400,
        }
    }

    async fn read_hist(&self, key: &str) -> LangHistogram {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<HashMap<String, u32>> =
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await;
        match result {
            Ok(map) => map,
            Err(e) => {
                warn!(%key, "language histogram read failed: {e}");
                LangHistogram::new()
            }
        }
    }

    async fn bump_key(&self, key: &str, code: &str) {
        let mut conn = self.conn.clone();
        let incr: redis::RedisResult<i64> = redis::cmd("HINCRBY")
            .arg(key)
            .arg(code)
            .arg(1)
            .query_async(&mut conn)
            .await;
        if let Err(e) = incr {
            warn!(%key, code, "language histogram bump failed: {e}");
            return;
        }
        if self.ttl_secs > 0 {
            let _: redis::RedisResult<i64> = redis::cmd("EXPIRE")
                .arg(key)
                .arg(self.ttl_secs)
                .query_async(&mut conn)
                .await;
        }
    }
}

#[async_trait]
impl LanguageHistory for RedisLanguageHistory {
    async fn channel_hist(&self, channel: &str) -> LangHistogram {
        self.read_hist(&channel_key(channel)).await
    }

    async fn user_hist(&self, user: &str) -> LangHistogram {
        self.read_hist(&user_key(user)).await
    }

    async fn bump(&self, channel: &str, user: &str, code: &str) {
        self.bump_key(&channel_key(channel), code).await;
        self.bump_key(&user_key(user), code).await;
    }
}
