//! Redis-compatible counter store client.
//!
//! Consume runs as a single Lua script so the increment, the window expiry
//! and the block transition happen atomically on the server.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, RedisResult, Script};
use tracing::{debug, warn};

use super::store::{ConsumeOutcome, Counter, CounterStore, StoreError};
use super::tier::{BlockDuration, TierPolicy};

/// KEYS[1]: counter key
/// ARGV[1]: cost, ARGV[2]: budget, ARGV[3]: window ms, ARGV[4]: block ms (0 = indefinite)
const CONSUME_SCRIPT: &str = r#"
local cost = tonumber(ARGV[1])
local budget = tonumber(ARGV[2])
local consumed = redis.call('INCRBY', KEYS[1], cost)
if consumed == cost then
  redis.call('PEXPIRE', KEYS[1], ARGV[3])
end
if consumed > budget and consumed - cost <= budget then
  local block_ms = tonumber(ARGV[4])
  if block_ms > 0 then
    redis.call('PEXPIRE', KEYS[1], block_ms)
  else
    redis.call('PERSIST', KEYS[1])
  end
end
return {consumed, redis.call('PTTL', KEYS[1])}
"#;

/// Counter store client for Redis and wire-compatible servers.
pub struct RedisCounterStore {
    connection: ConnectionManager,
    consume_script: Script,
    op_timeout: Duration,
}

impl RedisCounterStore {
    /// Connect to the store and check it answers.
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| {
            warn!(error = %e, "Invalid counter store URL");
            StoreError::Unavailable(format!("invalid counter store URL: {}", e))
        })?;

        let connection = tokio::time::timeout(op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(op_timeout.as_millis() as u64))?
            .map_err(|e| classify(e, op_timeout))?;

        let store = Self {
            connection,
            consume_script: Script::new(CONSUME_SCRIPT),
            op_timeout,
        };

        let mut conn = store.connection.clone();
        let pong: String = store
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;
        debug!(reply = %pong, "Connected to counter store");

        Ok(store)
    }

    /// Await a store call under the operation timeout.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = RedisResult<T>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.op_timeout, call).await {
            Ok(result) => result.map_err(|e| classify(e, self.op_timeout)),
            Err(_) => Err(StoreError::Timeout(self.op_timeout.as_millis() as u64)),
        }
    }
}

/// Map a client error onto the store error taxonomy.
fn classify(error: RedisError, op_timeout: Duration) -> StoreError {
    if error.is_timeout() {
        StoreError::Timeout(op_timeout.as_millis() as u64)
    } else if error.kind() == redis::ErrorKind::TypeError {
        StoreError::Malformed(error.to_string())
    } else {
        StoreError::Unavailable(error.to_string())
    }
}

/// Window and block lengths in the units the script expects.
fn script_durations(policy: &TierPolicy) -> (u64, u64) {
    let window_ms = policy.window.as_millis().max(1) as u64;
    let block_ms = match policy.block {
        BlockDuration::For(duration) => duration.as_millis().max(1) as u64,
        BlockDuration::Indefinite => 0,
    };
    (window_ms, block_ms)
}

/// Build a counter from a value and a `PTTL` reply.
///
/// `PTTL` answers -1 for a key without expiry and -2 for a missing key.
fn counter_from_reply(points: u64, pttl: i64) -> Result<Counter, StoreError> {
    match pttl {
        -1 => Ok(Counter::new(points, None)),
        ms if ms >= 0 => Ok(Counter::new(points, Some(ms as u64))),
        other => Err(StoreError::Malformed(format!(
            "unexpected PTTL {} for a live key",
            other
        ))),
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<Counter>, StoreError> {
        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("GET").arg(key).cmd("PTTL").arg(key);

        let (points, pttl): (Option<u64>, i64) = self.bounded(pipe.query_async(&mut conn)).await?;

        match points {
            // Expired between the two reads, or never written.
            None => Ok(None),
            Some(_) if pttl == -2 => Ok(None),
            Some(points) => counter_from_reply(points, pttl).map(Some),
        }
    }

    async fn consume(
        &self,
        key: &str,
        cost: u64,
        policy: &TierPolicy,
    ) -> Result<ConsumeOutcome, StoreError> {
        let (window_ms, block_ms) = script_durations(policy);
        let mut conn = self.connection.clone();
        let mut invocation = self.consume_script.key(key);
        invocation
            .arg(cost)
            .arg(policy.points)
            .arg(window_ms)
            .arg(block_ms);

        let (consumed, pttl): (u64, i64) =
            self.bounded(invocation.invoke_async(&mut conn)).await?;
        let counter = counter_from_reply(consumed, pttl)?;

        if consumed > policy.points {
            Ok(ConsumeOutcome::Exhausted(counter))
        } else {
            Ok(ConsumeOutcome::Consumed(counter))
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = self
            .bounded(redis::cmd("DEL").arg(key).query_async(&mut conn))
            .await?;
        Ok(())
    }
}
