//! Reliable Redis list queue carrying notification ids.
//!
//! Keys, for a queue named `q`:
//! - `q`: pending ids. Producers `LPUSH`, consumers take from the right
//! - `q:processing:{owner}`: the id one consumer is currently dispatching
//! - `q:lease:{owner}`: expiring key kept alive while that consumer runs
//! - `q:consumers`: set of owners that have registered a processing list
//! - `q:delayed`: sorted set of ids waiting for redelivery, scored by due time
//!   in epoch milliseconds
//! - `q:attempts`: hash of payload → failed invocations so far
//! - `q:dead`: ids that will not be retried
//!
//! A message leaves a processing list only once it has been settled. Lists
//! whose owner's lease has expired are drained back onto `q` by
//! [`RedisQueue::recover_orphans`]; live consumers' lists are never touched.

use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use tokio::task::JoinHandle;
use uuid::Uuid;

use herald_common::config::AppConfig;
use herald_common::error::AppError;
use herald_common::redis_pool::create_redis_pool;
use herald_common::types::DispatchResult;

/// How long a consumer's lease survives without a heartbeat.
pub const LEASE_TTL: Duration = Duration::from_secs(30);

/// Upper bound on a single redelivery delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Most delayed messages promoted in one round trip.
const PROMOTE_BATCH: usize = 100;

/// Moves due members of the delayed set (KEYS[1]) onto the queue (KEYS[2]).
const PROMOTE_SCRIPT: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, payload in ipairs(due) do
    redis.call('ZREM', KEYS[1], payload)
    redis.call('LPUSH', KEYS[2], payload)
end
return #due
";

/// Redelivery budget and backoff for retryable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_redeliveries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_redeliveries: u32, base_delay: Duration) -> Self {
        Self {
            max_redeliveries,
            base_delay,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.queue_max_redeliveries,
            Duration::from_millis(config.queue_retry_base_ms),
        )
    }

    /// Wait before redelivering after the `failures`-th failed invocation:
    /// `base * 2^(failures - 1)`, capped at [`MAX_RETRY_DELAY`].
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(MAX_RETRY_DELAY)
    }
}

/// What to do with a message after its invocation returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Dispatch completed; drop the message.
    Ack,
    /// Transient failure; redeliver once `after` has passed.
    Requeue { after: Duration },
    /// Permanent failure or redelivery budget exhausted.
    DeadLetter,
}

/// Decide the fate of a message.
///
/// `failures` counts failed invocations of this payload including the current
/// one; it is only consulted for retryable errors.
pub fn disposition(
    result: &Result<DispatchResult, AppError>,
    failures: u32,
    policy: &RetryPolicy,
) -> Disposition {
    match result {
        Ok(_) => Disposition::Ack,
        Err(e) if !e.is_retryable() => Disposition::DeadLetter,
        Err(_) if failures > policy.max_redeliveries => Disposition::DeadLetter,
        Err(_) => Disposition::Requeue {
            after: policy.delay(failures),
        },
    }
}

/// Keeps a consumer's lease alive until dropped.
pub struct Lease {
    heartbeat: JoinHandle<()>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

/// One consumer's handle on the queue.
pub struct RedisQueue {
    redis: ConnectionManager,
    name: String,
    owner: String,
    processing: String,
    lease: String,
    consumers: String,
    delayed: String,
    attempts: String,
    dead: String,
    policy: RetryPolicy,
    promote: redis::Script,
}

impl RedisQueue {
    /// Handle with a fresh owner id, and so its own processing list.
    pub fn new(redis: ConnectionManager, name: &str, policy: RetryPolicy) -> Self {
        let owner = Uuid::new_v4().to_string();
        Self {
            redis,
            name: name.to_string(),
            processing: processing_key(name, &owner),
            lease: lease_key(name, &owner),
            consumers: format!("{}:consumers", name),
            delayed: format!("{}:delayed", name),
            attempts: format!("{}:attempts", name),
            dead: format!("{}:dead", name),
            owner,
            policy,
            promote: redis::Script::new(PROMOTE_SCRIPT),
        }
    }

    /// Open a dedicated Redis connection for this consumer.
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let redis = create_redis_pool(&config.redis_url).await?;
        Ok(Self::new(
            redis,
            &config.queue_name,
            RetryPolicy::from_config(config),
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Enqueue a notification id, as an upstream producer would.
    pub async fn push(&mut self, notification_id: i32) -> Result<(), AppError> {
        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.name)
            .arg(notification_id.to_string())
            .query_async(&mut self.redis)
            .await?;
        Ok(())
    }

    /// Take the lease on this handle's processing list and keep renewing it
    /// in the background until the returned [`Lease`] is dropped.
    pub async fn register(&mut self) -> Result<Lease, AppError> {
        let ttl_ms = LEASE_TTL.as_millis() as u64;

        // A listed owner always had a lease at some point.
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(&self.lease)
            .arg(1)
            .arg("PX")
            .arg(ttl_ms)
            .ignore()
            .cmd("SADD")
            .arg(&self.consumers)
            .arg(&self.owner)
            .ignore();
        let _: () = pipe.query_async(&mut self.redis).await?;

        let mut conn = self.redis.clone();
        let key = self.lease.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(LEASE_TTL / 3);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let renewed: Result<(), redis::RedisError> = redis::cmd("SET")
                    .arg(&key)
                    .arg(1)
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut conn)
                    .await;
                if let Err(e) = renewed {
                    tracing::warn!(lease = %key, error = %e, "Failed to renew consumer lease");
                }
            }
        });

        Ok(Lease { heartbeat })
    }

    /// Give up the lease. Anything still in this handle's processing list is
    /// put back on the queue first.
    pub async fn release(&mut self, lease: Lease) -> Result<(), AppError> {
        drop(lease);
        drain(&mut self.redis, &self.processing, &self.name).await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("DEL")
            .arg(&self.lease)
            .ignore()
            .cmd("SREM")
            .arg(&self.consumers)
            .arg(&self.owner)
            .ignore();
        let _: () = pipe.query_async(&mut self.redis).await?;
        Ok(())
    }

    /// Move unsettled messages back onto the queue.
    ///
    /// Covers this handle's own processing list, which is only non-empty
    /// between messages when a settle failed, and the lists of every owner
    /// whose lease has expired. Must not be called while a message taken by
    /// this handle is still being dispatched.
    pub async fn recover_orphans(&mut self) -> Result<usize, AppError> {
        let mut recovered = drain(&mut self.redis, &self.processing, &self.name).await?;

        let owners: Vec<String> = redis::cmd("SMEMBERS")
            .arg(&self.consumers)
            .query_async(&mut self.redis)
            .await?;

        for owner in owners.iter().filter(|o| **o != self.owner) {
            let alive: bool = redis::cmd("EXISTS")
                .arg(lease_key(&self.name, owner))
                .query_async(&mut self.redis)
                .await?;
            if alive {
                continue;
            }

            let from = processing_key(&self.name, owner);
            let moved = drain(&mut self.redis, &from, &self.name).await?;
            let _: i64 = redis::cmd("SREM")
                .arg(&self.consumers)
                .arg(owner)
                .query_async(&mut self.redis)
                .await?;

            if moved > 0 {
                tracing::warn!(
                    queue = %self.name,
                    owner = %owner,
                    moved,
                    "Recovered messages from expired consumer"
                );
            }
            recovered += moved;
        }

        Ok(recovered)
    }

    /// Move delayed messages whose redelivery time has passed onto the queue.
    pub async fn promote_due(&mut self) -> Result<usize, AppError> {
        let now = Utc::now().timestamp_millis();
        let promoted: usize = self
            .promote
            .key(&self.delayed)
            .key(&self.name)
            .arg(now)
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut self.redis)
            .await?;
        Ok(promoted)
    }

    /// Wait up to `timeout_secs` for the next message, moving it to this
    /// handle's processing list atomically.
    pub async fn next(&mut self, timeout_secs: f64) -> Result<Option<Vec<u8>>, AppError> {
        let payload: Option<Vec<u8>> = redis::cmd("BLMOVE")
            .arg(&self.name)
            .arg(&self.processing)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout_secs)
            .query_async(&mut self.redis)
            .await?;
        Ok(payload)
    }

    /// Count a failed invocation of `payload`. Returns the new total.
    pub async fn record_failure(&mut self, payload: &[u8]) -> Result<u32, AppError> {
        let failures: u32 = redis::cmd("HINCRBY")
            .arg(&self.attempts)
            .arg(payload)
            .arg(1)
            .query_async(&mut self.redis)
            .await?;
        Ok(failures)
    }

    /// Apply a disposition to a message taken by [`RedisQueue::next`].
    pub async fn settle(
        &mut self,
        payload: &[u8],
        disposition: Disposition,
    ) -> Result<(), AppError> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("LREM")
            .arg(&self.processing)
            .arg(1)
            .arg(payload)
            .ignore();

        match disposition {
            Disposition::Ack => {
                pipe.cmd("HDEL").arg(&self.attempts).arg(payload).ignore();
            }
            Disposition::Requeue { after } => {
                let due = Utc::now().timestamp_millis() + after.as_millis() as i64;
                pipe.cmd("ZADD").arg(&self.delayed).arg(due).arg(payload).ignore();
            }
            Disposition::DeadLetter => {
                pipe.cmd("HDEL").arg(&self.attempts).arg(payload).ignore();
                pipe.cmd("LPUSH").arg(&self.dead).arg(payload).ignore();
            }
        }

        let _: () = pipe.query_async(&mut self.redis).await?;
        Ok(())
    }
}

fn processing_key(name: &str, owner: &str) -> String {
    format!("{}:processing:{}", name, owner)
}

fn lease_key(name: &str, owner: &str) -> String {
    format!("{}:lease:{}", name, owner)
}

/// Move every element of `from` onto the consuming end of `to`, oldest first.
async fn drain(conn: &mut ConnectionManager, from: &str, to: &str) -> Result<usize, AppError> {
    let mut moved = 0usize;
    loop {
        let payload: Option<Vec<u8>> = redis::cmd("LMOVE")
            .arg(from)
            .arg(to)
            .arg("LEFT")
            .arg("RIGHT")
            .query_async(conn)
            .await?;
        if payload.is_none() {
            return Ok(moved);
        }
        moved += 1;
    }
}
