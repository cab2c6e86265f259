use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use tracing::{info, warn};

use crate::{
    error::StoreError,
    limiter::{self, Decision, Quota},
    store::CounterStore,
};

/// Atomic GCRA check-and-update. Reads the stored theoretical arrival time,
/// decides, and writes the advanced TAT in one indivisible script so
/// concurrent servers racing on one key are totally ordered by Redis.
///
/// ARGV: now (us), emission interval (us), delay tolerance (us), TTL (ms).
/// Returns {allowed, remaining, retry_after_us, reset_after_us}.
const GCRA_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local interval = tonumber(ARGV[2])
local tolerance = tonumber(ARGV[3])
local ttl_ms = tonumber(ARGV[4])

local tat = tonumber(redis.call('GET', key))
if not tat or tat < now then
    tat = now
end

local new_tat = tat + interval
if new_tat - now > tolerance then
    return {0, 0, new_tat - now - tolerance, tat - now}
end

redis.call('SET', key, string.format('%.0f', new_tat), 'PX', ttl_ms)
local remaining = math.floor((tolerance - (new_tat - now)) / interval)
return {1, remaining, 0, new_tat - now}
"#;

/// Redis connection configuration for the counter store.
#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub url: String,
    pub connect_timeout: Duration,
    /// Per-command budget, deliberately shorter than any request timeout so a
    /// slow store surfaces as `StoreError::Timeout` rather than a hang.
    pub command_timeout: Duration,
    /// Retries of the whole check-and-write on transient connection errors.
    pub max_retries: u32,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_millis(150),
            max_retries: 2,
        }
    }
}

/// Redis client wrapper around a shared connection manager.
#[derive(Clone)]
pub struct RedisClient {
    connection: ConnectionManager,
    settings: RedisSettings,
}

impl RedisClient {
    /// Connect and verify the server answers PING.
    pub async fn connect(settings: RedisSettings) -> Result<Self, StoreError> {
        info!(url = %settings.url, "connecting to redis");

        let client = redis::Client::open(settings.url.clone())?;

        let connection = tokio::time::timeout(
            settings.connect_timeout,
            client.get_connection_manager(),
        )
        .await
        .map_err(|_| StoreError::Timeout(settings.connect_timeout))?
        .map_err(|e| {
            warn!("failed to create redis connection manager: {}", e);
            StoreError::Unavailable(e)
        })?;

        let client = Self {
            connection,
            settings,
        };
        client.ping().await?;
        info!("redis connection established");
        Ok(client)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        tokio::time::timeout(
            self.settings.command_timeout,
            redis::cmd("PING").query_async::<_, ()>(&mut conn),
        )
        .await
        .map_err(|_| StoreError::Timeout(self.settings.command_timeout))?
        .map_err(StoreError::Unavailable)?;
        Ok(())
    }
}

/// Redis-backed [`CounterStore`]. The server's script atomicity substitutes
/// for in-process locking; nothing is cached locally between requests.
pub struct RedisCounterStore {
    client: RedisClient,
    script: Script,
    key_prefix: String,
}

impl RedisCounterStore {
    pub fn new(client: RedisClient, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            script: Script::new(GCRA_SCRIPT),
            key_prefix: key_prefix.into(),
        }
    }

    fn storage_key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }

    async fn invoke_once(
        &self,
        key: &str,
        now_us: u64,
        quota: &Quota,
    ) -> Result<(i64, i64, u64, u64), StoreError> {
        let mut conn = self.client.connection.clone();
        // Abandoned keys self-expire once the bucket would have drained.
        let ttl_ms = (quota.delay_tolerance_us() / 1_000).max(1);

        tokio::time::timeout(self.client.settings.command_timeout, async {
            self.script
                .key(key)
                .arg(now_us)
                .arg(quota.emission_interval_us())
                .arg(quota.delay_tolerance_us())
                .arg(ttl_ms)
                .invoke_async(&mut conn)
                .await
        })
        .await
        .map_err(|_| StoreError::Timeout(self.client.settings.command_timeout))?
        .map_err(StoreError::Unavailable)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn check(&self, key: &str, quota: &Quota) -> Result<Decision, StoreError> {
        let storage_key = self.storage_key(key);

        let mut attempt = 0;
        let (allowed, remaining, retry_after_us, reset_after_us) = loop {
            // The whole check-and-write is retried as one unit; a partial
            // update cannot be applied because the script is indivisible.
            // Each attempt samples its own clock so a retry after a slow
            // failure is not judged against a stale `now`.
            let now_us = limiter::unix_now_us();
            match self.invoke_once(&storage_key, now_us, quota).await {
                Ok(reply) => break reply,
                Err(err @ StoreError::Unavailable(_)) => {
                    if attempt >= self.client.settings.max_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    warn!(key, attempt, "retrying counter store check: {}", err);
                }
                Err(err) => return Err(err),
            }
        };

        Ok(Decision {
            allowed: allowed == 1,
            limit: quota.rate,
            remaining: (remaining.max(0) as u32).min(quota.burst.saturating_sub(1)),
            retry_after: Duration::from_micros(retry_after_us),
            reset_after: Duration::from_micros(reset_after_us),
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.client.ping().await
    }
}
