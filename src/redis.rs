use crate::algorithms::{RateDecision, WindowRule, WindowStore};
use crate::error::GatewayError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

/// Sliding window log kept in a sorted set, scored by admission time in ms.
///
/// Runs as one script so trimming, counting and recording are atomic. The
/// clock is read inside Redis, so replicas with skewed clocks still agree.
/// Returns `{admitted, count, oldest_ms}`.
const SLIDING_WINDOW_SCRIPT: &str = r"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local window = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])

redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
local count = redis.call('ZCARD', KEYS[1])
local admitted = 0
if count < limit then
    redis.call('ZADD', KEYS[1], now, ARGV[3])
    count = count + 1
    admitted = 1
end
redis.call('PEXPIRE', KEYS[1], window)

local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
local oldest_ms = -1
if oldest[2] then
    oldest_ms = tonumber(oldest[2])
end
return {admitted, count, oldest_ms}
";

/// Upper bound on a single store round trip when none is configured.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct RedisWindowStore {
    connection: ConnectionManager,
    script: Script,
    prefix: String,
    timeout: Duration,
}

/// Bound `fut` by `limit`; a store that stops answering counts as a store error.
async fn bounded<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = redis::RedisResult<T>>,
) -> Result<T, GatewayError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(|e| GatewayError::Store(format!("{} failed: {}", what, e))),
        Err(_) => Err(GatewayError::Store(format!(
            "{} timed out after {}ms",
            what,
            limit.as_millis()
        ))),
    }
}

impl RedisWindowStore {
    /// Open a managed connection and verify the server answers within `timeout`.
    pub async fn connect(
        redis_url: &str,
        prefix: &str,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::open(redis_url)
            .map_err(|e| GatewayError::Store(format!("Failed to create Redis client: {}", e)))?;
        let connection = bounded(timeout, "Redis connect", ConnectionManager::new(client)).await?;

        let store = Self {
            connection,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
            prefix: prefix.to_string(),
            timeout,
        };
        store.ping().await?;
        Ok(store)
    }

    fn window_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn take(&self, key: &str, rule: &WindowRule) -> Result<RateDecision, GatewayError> {
        let mut conn = self.connection.clone();
        let window_ms = rule.window.as_millis() as u64;

        let mut invocation = self.script.key(self.window_key(key));
        invocation
            .arg(window_ms)
            .arg(rule.limit)
            .arg(Uuid::new_v4().to_string());
        let (admitted, count, oldest_ms): (i64, u64, i64) = bounded(
            self.timeout,
            "Sliding window script",
            invocation.invoke_async(&mut conn),
        )
        .await?;

        let reset_at = (oldest_ms >= 0).then(|| (oldest_ms as u64 + window_ms).div_ceil(1000));

        Ok(RateDecision {
            limit: rule.limit,
            remaining: rule.limit.saturating_sub(count),
            reset_at,
            admitted: admitted == 1,
        })
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        let mut conn = self.connection.clone();
        let ping = redis::cmd("PING");
        bounded(self.timeout, "Ping", ping.query_async::<_, String>(&mut conn))
            .await
            .map(|_| ())
    }
}
