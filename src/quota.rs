//! Daily seconds quota over a shared Redis store.
//!
//! Counters are keyed by local date plus user (and optionally guild) and
//! expire shortly after local midnight. Reservation is atomic: a
//! server-side script reads, compares against the limit, increments, and
//! refreshes the TTL in one step, so concurrent requests can never push
//! a counter past the daily limit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use crate::config::{QuotaConfig, QuotaScope};
use crate::error::{Result, SttError};

/// Atomic read-compare-increment-expire. Returns -1 when the reservation
/// would exceed the limit, otherwise the new counter value.
const RESERVE_SCRIPT: &str = r"
local cur = tonumber(redis.call('GET', KEYS[1]) or '0')
local delta = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local ttl = tonumber(ARGV[3])
if cur + delta > limit then
  return -1
end
local newv = redis.call('INCRBY', KEYS[1], delta)
if ttl > 0 then
  redis.call('EXPIRE', KEYS[1], ttl)
end
return newv
";

/// Decrement with clamp to zero; re-assert the TTL when missing.
const REFUND_SCRIPT: &str = r"
local v = redis.call('DECRBY', KEYS[1], tonumber(ARGV[1]))
if v < 0 then
  redis.call('SET', KEYS[1], '0')
  v = 0
end
if redis.call('TTL', KEYS[1]) < 0 then
  redis.call('EXPIRE', KEYS[1], tonumber(ARGV[2]))
end
return v
";

/// Per-day seconds budget with at-most-once reservation semantics.
///
/// `try_reserve` fails open: when the store is unreachable the quota is
/// treated as a courtesy limit, not a security boundary, and the request
/// is allowed through. Operators should expect brief over-serving during
/// store outages.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Atomically reserve `seconds` against today's counter.
    ///
    /// Returns `false` only when the reservation would exceed the daily
    /// limit. Store errors log a warning and return `true`.
    async fn try_reserve(&self, user: &str, guild: Option<&str>, seconds: u32) -> bool;

    /// Return `seconds` to today's counter, clamping at zero.
    ///
    /// Best-effort: store errors are logged and swallowed.
    async fn refund(&self, user: &str, guild: Option<&str>, seconds: u32);

    /// Seconds consumed today. Best-effort: returns 0 on store error.
    async fn get_used(&self, user: &str, guild: Option<&str>) -> u64;

    /// The configured daily limit in seconds.
    fn daily_limit(&self) -> u32;
}

/// Build the counter key for a local date.
///
/// `User` scope keys omit the guild; `GuildUser` includes it when known.
/// A `GuildUser` call without a guild (direct message) degrades to the
/// user-only key, so callers must be consistent per deployment.
pub fn quota_key(scope: QuotaScope, date_yyyymmdd: &str, user: &str, guild: Option<&str>) -> String {
    match (scope, guild) {
        (QuotaScope::GuildUser, Some(g)) => format!("stt:sec:{date_yyyymmdd}:{g}:{user}"),
        _ => format!("stt:sec:{date_yyyymmdd}:{user}"),
    }
}

/// Today's date in the quota time zone, formatted `YYYYMMDD`.
pub fn local_date_str(tz: Tz, now: DateTime<Utc>) -> String {
    now.with_timezone(&tz).format("%Y%m%d").to_string()
}

/// Seconds remaining until the next local midnight.
pub fn seconds_until_local_midnight(tz: Tz, now: DateTime<Utc>) -> i64 {
    let local = now.with_timezone(&tz).naive_local();
    let next_midnight = local
        .date()
        .succ_opt()
        .unwrap_or(local.date())
        .and_hms_opt(0, 0, 0)
        .unwrap_or(local);
    (next_midnight - local).num_seconds().max(0)
}

/// TTL applied to quota keys: the rest of the local day plus a grace
/// minute so a reservation made at 23:59:59 still expires cleanly.
pub fn quota_key_ttl(tz: Tz, now: DateTime<Utc>) -> i64 {
    seconds_until_local_midnight(tz, now) + 60
}

/// Redis-backed quota store using a compiled server-side script for the
/// reserve step.
pub struct RedisQuotaStore {
    conn: ConnectionManager,
    config: QuotaConfig,
    tz: Tz,
    reserve: redis::Script,
    refund: redis::Script,
}

impl RedisQuotaStore {
    /// Connect to the configured Redis URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the initial connection
    /// fails.
    pub async fn connect(config: QuotaConfig) -> Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| SttError::QuotaStore(format!("invalid redis url: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| SttError::QuotaStore(format!("redis connect failed: {e}")))?;
        let tz = config.time_zone();
        Ok(Self {
            conn,
            config,
            tz,
            reserve: redis::Script::new(RESERVE_SCRIPT),
            refund: redis::Script::new(REFUND_SCRIPT),
        })
    }

    fn key(&self, user: &str, guild: Option<&str>) -> String {
        let date = local_date_str(self.tz, Utc::now());
        quota_key(self.config.scope, &date, user, guild)
    }
}

#[async_trait]
impl QuotaStore for RedisQuotaStore {
    async fn try_reserve(&self, user: &str, guild: Option<&str>, seconds: u32) -> bool {
        let key = self.key(user, guild);
        let ttl = quota_key_ttl(self.tz, Utc::now());
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<i64> = self
            .reserve
            .key(&key)
            .arg(i64::from(seconds))
            .arg(i64::from(self.config.daily_limit_seconds))
            .arg(ttl)
            .invoke_async(&mut conn)
            .await;
        match result {
            Ok(-1) => {
                debug!(%key, seconds, "quota reservation denied");
                false
            }
            Ok(newv) => {
                debug!(%key, seconds, used = newv, "quota reserved");
                true
            }
            Err(e) => {
                warn!(%key, "quota store unavailable, failing open: {e}");
                true
            }
        }
    }

    async fn refund(&self, user: &str, guild: Option<&str>, seconds: u32) {
        let key = self.key(user, guild);
        let ttl = quota_key_ttl(self.tz, Utc::now());
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<i64> = self
            .refund
            .key(&key)
            .arg(i64::from(seconds))
            .arg(ttl)
            .invoke_async(&mut conn)
            .await;
        match result {
            Ok(remaining) => debug!(%key, seconds, used = remaining, "quota refunded"),
            Err(e) => warn!(%key, seconds, "quota refund failed: {e}"),
        }
    }

    async fn get_used(&self, user: &str, guild: Option<&str>) -> u64 {
        let key = self.key(user, guild);
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<Option<u64>> =
            redis::cmd("GET").arg(&key).query_async(&mut conn).await;
        match result {
            Ok(v) => v.unwrap_or(0),
            Err(e) => {
                warn!(%key, "quota read failed, reporting 0: {e}");
                0
            }
        }
    }

    fn daily_limit(&self) -> u32 {
        self.config.daily_limit_seconds
    }
}
