//! Redis-backed durable webhook queue.
//!
//! # Key layout
//!
//! All keys share the prefix `{prefix}:{queue}`:
//!
//! | Key              | Type   | Contents                                        |
//! |------------------|--------|-------------------------------------------------|
//! | `:id`            | string | job id counter                                  |
//! | `:job:{id}`      | hash   | `name`, `shop`, `data` (absent without a payload), `timestamp`, `attemptsMade`, `failedReason`, `processedOn`, `finishedOn` |
//! | `:wait`          | list   | ids ready to run (pushed left, claimed right)   |
//! | `:delayed`       | zset   | ids waiting for a retry, scored by due time     |
//! | `:active`        | list   | ids claimed by a worker                         |
//! | `:completed`     | list   | settled ids, newest first                       |
//! | `:failed`        | list   | ids that used up their attempts, newest first   |
//! | `:lock:{id}`     | string | claim token, expires after the lock duration    |
//!
//! Every state change that touches more than one key runs as a Lua script,
//! so a crash never leaves a job in two lists or in `:active` without a lock
//! having been taken.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pulse_core::{DurableJobMeta, Job, JobStatus, ShopDomain, TopicKey};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error, info, instrument, warn};

use super::QueueError;

/// Maximum number of ids listed per state by a snapshot.
pub const SNAPSHOT_LIMIT: isize = 1000;

/// Due delayed jobs promoted per claim attempt.
const PROMOTE_BATCH: u32 = 100;

/// Redis scripts for atomic state changes.
mod scripts {
    use redis::Script;

    /// Shared helper: drop everything past `keep` in a settled list.
    const TRIM: &str = r"
        local function trim(list, keep, base)
            local stale = redis.call('LRANGE', list, keep, -1)
            for _, stale_id in ipairs(stale) do
                redis.call('DEL', base .. ':job:' .. stale_id)
            end
            if keep == 0 then
                redis.call('DEL', list)
            else
                redis.call('LTRIM', list, 0, keep - 1)
            end
        end
    ";

    /// KEYS: wait, active, delayed. ARGV: base, now ms, token, lock ms, batch.
    pub fn claim() -> Script {
        Script::new(
            r"
            local due = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[2], 'LIMIT', 0, tonumber(ARGV[5]))
            for _, id in ipairs(due) do
                redis.call('ZREM', KEYS[3], id)
                redis.call('LPUSH', KEYS[1], id)
            end

            local id = redis.call('LMOVE', KEYS[1], KEYS[2], 'RIGHT', 'LEFT')
            if not id then
                return false
            end

            redis.call('SET', ARGV[1] .. ':lock:' .. id, ARGV[3], 'PX', ARGV[4])
            redis.call('HSET', ARGV[1] .. ':job:' .. id, 'processedOn', ARGV[2])
            return id
            ",
        )
    }

    /// KEYS: active, completed. ARGV: base, id, token, now ms, keep.
    pub fn complete() -> Script {
        Script::new(&format!(
            r"
            {TRIM}
            local lock_key = ARGV[1] .. ':lock:' .. ARGV[2]
            local owner = redis.call('GET', lock_key)
            if owner and owner ~= ARGV[3] then
                return 0
            end
            if redis.call('LREM', KEYS[1], 0, ARGV[2]) == 0 then
                return 0
            end
            redis.call('DEL', lock_key)
            redis.call('HSET', ARGV[1] .. ':job:' .. ARGV[2], 'finishedOn', ARGV[4])
            redis.call('LPUSH', KEYS[2], ARGV[2])
            trim(KEYS[2], tonumber(ARGV[5]), ARGV[1])
            return 1
            "
        ))
    }

    /// KEYS: active, delayed, failed.
    /// ARGV: base, id, token, now ms, reason, max attempts, backoff ms, keep.
    ///
    /// Returns `{attempts, will_retry}`, or `{-1, 0}` if the lock was lost.
    pub fn fail() -> Script {
        Script::new(&format!(
            r"
            {TRIM}
            local lock_key = ARGV[1] .. ':lock:' .. ARGV[2]
            local owner = redis.call('GET', lock_key)
            if owner and owner ~= ARGV[3] then
                return {{-1, 0}}
            end
            if redis.call('LREM', KEYS[1], 0, ARGV[2]) == 0 then
                return {{-1, 0}}
            end
            redis.call('DEL', lock_key)

            local job_key = ARGV[1] .. ':job:' .. ARGV[2]
            local attempts = redis.call('HINCRBY', job_key, 'attemptsMade', 1)
            redis.call('HSET', job_key, 'failedReason', ARGV[5])

            if attempts < tonumber(ARGV[6]) then
                local delay = tonumber(ARGV[7]) * (2 ^ (attempts - 1))
                redis.call('ZADD', KEYS[2], tonumber(ARGV[4]) + delay, ARGV[2])
                return {{attempts, 1}}
            end

            redis.call('HSET', job_key, 'finishedOn', ARGV[4])
            redis.call('LPUSH', KEYS[3], ARGV[2])
            trim(KEYS[3], tonumber(ARGV[8]), ARGV[1])
            return {{attempts, 0}}
            "
        ))
    }

    /// ARGV: lock key, token, lock ms.
    pub fn extend_lock() -> Script {
        Script::new(
            r"
            if redis.call('GET', ARGV[1]) == ARGV[2] then
                return redis.call('PEXPIRE', ARGV[1], ARGV[3])
            end
            return 0
            ",
        )
    }

    /// KEYS: active, wait. ARGV: base.
    pub fn recover_stalled() -> Script {
        Script::new(
            r"
            local ids = redis.call('LRANGE', KEYS[1], 0, -1)
            local moved = 0
            for _, id in ipairs(ids) do
                if redis.call('EXISTS', ARGV[1] .. ':lock:' .. id) == 0 then
                    redis.call('LREM', KEYS[1], 0, id)
                    redis.call('RPUSH', KEYS[2], id)
                    moved = moved + 1
                end
            end
            return moved
            ",
        )
    }

    /// KEYS: wait, delayed, completed, failed. ARGV: base.
    pub fn clear() -> Script {
        Script::new(
            r"
            local removed = 0
            for i, key in ipairs(KEYS) do
                local ids
                if i == 2 then
                    ids = redis.call('ZRANGE', key, 0, -1)
                else
                    ids = redis.call('LRANGE', key, 0, -1)
                end
                for _, id in ipairs(ids) do
                    redis.call('DEL', ARGV[1] .. ':job:' .. id)
                    removed = removed + 1
                end
                redis.call('DEL', key)
            end
            return removed
            ",
        )
    }
}

struct QueueScripts {
    claim: Script,
    complete: Script,
    fail: Script,
    extend_lock: Script,
    recover_stalled: Script,
    clear: Script,
}

impl QueueScripts {
    fn load() -> Self {
        Self {
            claim: scripts::claim(),
            complete: scripts::complete(),
            fail: scripts::fail(),
            extend_lock: scripts::extend_lock(),
            recover_stalled: scripts::recover_stalled(),
            clear: scripts::clear(),
        }
    }
}

// =============================================================================
// Key layout
// =============================================================================

/// Redis key names for one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    base: String,
}

impl QueueKeys {
    /// Keys for `queue_name` under `prefix`.
    #[must_use]
    pub fn new(prefix: &str, queue_name: &str) -> Self {
        Self {
            base: format!("{prefix}:{queue_name}"),
        }
    }

    /// Common prefix of every key.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Id counter.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}:id", self.base)
    }

    /// Hash holding job `id`.
    #[must_use]
    pub fn job(&self, id: &str) -> String {
        format!("{}:job:{id}", self.base)
    }

    /// Claim lock for job `id`.
    #[must_use]
    pub fn lock(&self, id: &str) -> String {
        format!("{}:lock:{id}", self.base)
    }

    /// Ready list.
    #[must_use]
    pub fn wait(&self) -> String {
        format!("{}:wait", self.base)
    }

    /// Retry schedule.
    #[must_use]
    pub fn delayed(&self) -> String {
        format!("{}:delayed", self.base)
    }

    /// Claimed list.
    #[must_use]
    pub fn active(&self) -> String {
        format!("{}:active", self.base)
    }

    /// Completed list.
    #[must_use]
    pub fn completed(&self) -> String {
        format!("{}:completed", self.base)
    }

    /// Failed list.
    #[must_use]
    pub fn failed(&self) -> String {
        format!("{}:failed", self.base)
    }
}

// =============================================================================
// Job hash mapping
// =============================================================================

/// Hash field names.
mod fields {
    pub const NAME: &str = "name";
    pub const SHOP: &str = "shop";
    pub const DATA: &str = "data";
    pub const TIMESTAMP: &str = "timestamp";
    pub const ATTEMPTS_MADE: &str = "attemptsMade";
    pub const FAILED_REASON: &str = "failedReason";
    pub const PROCESSED_ON: &str = "processedOn";
    pub const FINISHED_ON: &str = "finishedOn";
}

/// Build a [`Job`] from a job hash.
///
/// `status` comes from the list or set the id was found in. The last
/// `failedReason` is only reported for failed jobs; a job waiting for a retry
/// keeps it in the hash but shows no error.
///
/// # Errors
///
/// Returns `QueueError::Corrupt` if a required field is missing or
/// unreadable.
pub fn job_from_hash(
    id: &str,
    status: JobStatus,
    hash: &HashMap<String, String>,
    queue_name: &str,
) -> Result<Job, QueueError> {
    let field = |name: &str| hash.get(name).map(String::as_str).filter(|v| !v.is_empty());
    let required = |name: &str| {
        field(name).ok_or_else(|| QueueError::Corrupt(format!("job {id} has no {name}")))
    };
    let millis = |name: &str| -> Result<Option<i64>, QueueError> {
        field(name)
            .map(|raw| {
                raw.parse::<i64>()
                    .map_err(|e| QueueError::Corrupt(format!("job {id} has invalid {name}: {e}")))
            })
            .transpose()
    };

    let job_name = required(fields::NAME)?;
    let topic = TopicKey::parse(job_name)
        .map_err(|e| QueueError::Corrupt(format!("job {id} has invalid topic: {e}")))?;
    let shop_domain = ShopDomain::parse(required(fields::SHOP)?)
        .map_err(|e| QueueError::Corrupt(format!("job {id} has invalid shop: {e}")))?;

    let payload = field(fields::DATA)
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .map_err(|e| QueueError::Corrupt(format!("job {id} has invalid data: {e}")))?;

    let timestamp_ms = millis(fields::TIMESTAMP)?
        .ok_or_else(|| QueueError::Corrupt(format!("job {id} has no {}", fields::TIMESTAMP)))?;
    let enqueued_at = DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .ok_or_else(|| QueueError::Corrupt(format!("job {id} has out of range timestamp")))?;

    let attempts = field(fields::ATTEMPTS_MADE)
        .map(str::parse::<u32>)
        .transpose()
        .map_err(|e| QueueError::Corrupt(format!("job {id} has invalid attemptsMade: {e}")))?
        .unwrap_or(0);

    Ok(Job {
        id: id.to_string(),
        topic,
        shop_domain,
        payload,
        status,
        attempts,
        error: (status == JobStatus::Failed)
            .then(|| field(fields::FAILED_REASON).map(str::to_string))
            .flatten(),
        enqueued_at,
        durable: Some(DurableJobMeta {
            queue_name: queue_name.to_string(),
            job_name: job_name.to_string(),
            timestamp_ms,
            processed_on_ms: millis(fields::PROCESSED_ON)?,
            finished_on_ms: millis(fields::FINISHED_ON)?,
        }),
    })
}

// =============================================================================
// Queue
// =============================================================================

/// A job claimed by a worker, with the token that proves the claim.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// The claimed job (status `Processing`).
    pub job: Job,
    /// Lock token; required to complete, fail or extend the claim.
    pub token: String,
}

/// Result of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailOutcome {
    /// Failed attempts so far, this one included.
    pub attempts: u32,
    /// Whether the job was scheduled for another attempt.
    pub will_retry: bool,
}

/// Durable webhook queue.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    keys: QueueKeys,
    queue_name: String,
    scripts: Arc<QueueScripts>,
}

impl std::fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueue")
            .field("connection", &"ConnectionManager")
            .field("queue_name", &self.queue_name)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl RedisQueue {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Redis` if the URL is invalid or the connection
    /// cannot be established.
    pub async fn connect(
        redis_url: &SecretString,
        queue_name: &str,
        prefix: &str,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.expose_secret())?;
        let conn = ConnectionManager::new(client).await?;
        info!(queue = queue_name, prefix, "Connected to Redis webhook queue");

        Ok(Self {
            conn,
            keys: QueueKeys::new(prefix, queue_name),
            queue_name: queue_name.to_string(),
            scripts: Arc::new(QueueScripts::load()),
        })
    }

    /// Key layout in use.
    #[must_use]
    pub const fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    /// Queue name.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub(super) async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    pub(super) async fn enqueue(
        &self,
        topic: TopicKey,
        shop_domain: ShopDomain,
        payload: Option<serde_json::Value>,
    ) -> Result<Job, QueueError> {
        let mut conn = self.conn.clone();
        let data = payload.as_ref().map(serde_json::to_string).transpose()?;
        let id: u64 = conn.incr(self.keys.id(), 1).await?;
        let id = id.to_string();

        let enqueued_at = Utc::now();
        let timestamp_ms = enqueued_at.timestamp_millis();
        let timestamp = timestamp_ms.to_string();

        let mut hash = vec![
            (fields::NAME, topic.as_str()),
            (fields::SHOP, shop_domain.as_str()),
            (fields::TIMESTAMP, timestamp.as_str()),
            (fields::ATTEMPTS_MADE, "0"),
        ];
        if let Some(data) = &data {
            hash.push((fields::DATA, data.as_str()));
        }

        redis::pipe()
            .atomic()
            .hset_multiple(self.keys.job(&id), &hash)
            .ignore()
            .lpush(self.keys.wait(), &id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        let job_name = topic.as_str().to_string();
        Ok(Job {
            enqueued_at,
            durable: Some(DurableJobMeta {
                queue_name: self.queue_name.clone(),
                job_name,
                timestamp_ms,
                processed_on_ms: None,
                finished_on_ms: None,
            }),
            ..Job::new(id, topic, shop_domain, payload)
        })
    }

    /// List jobs by state: waiting (oldest first), delayed, active,
    /// completed and failed (newest first).
    #[instrument(skip(self), fields(queue = %self.queue_name))]
    pub(super) async fn snapshot(&self) -> Result<Vec<Job>, QueueError> {
        let mut conn = self.conn.clone();
        let last = SNAPSHOT_LIMIT - 1;

        let (mut wait, delayed, active, completed, failed): (
            Vec<String>,
            Vec<String>,
            Vec<String>,
            Vec<String>,
            Vec<String>,
        ) = redis::pipe()
            .lrange(self.keys.wait(), -SNAPSHOT_LIMIT, -1)
            .zrange(self.keys.delayed(), 0, last)
            .lrange(self.keys.active(), 0, last)
            .lrange(self.keys.completed(), 0, last)
            .lrange(self.keys.failed(), 0, last)
            .query_async(&mut conn)
            .await?;
        wait.reverse();

        let listed: Vec<(String, JobStatus)> = wait
            .into_iter()
            .chain(delayed)
            .map(|id| (id, JobStatus::Pending))
            .chain(active.into_iter().map(|id| (id, JobStatus::Processing)))
            .chain(completed.into_iter().map(|id| (id, JobStatus::Completed)))
            .chain(failed.into_iter().map(|id| (id, JobStatus::Failed)))
            .collect();
        if listed.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for (id, _) in &listed {
            pipe.hgetall(self.keys.job(id));
        }
        let hashes: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        let jobs = listed
            .iter()
            .zip(&hashes)
            .filter(|(_, hash)| !hash.is_empty())
            .filter_map(|((id, status), hash)| {
                job_from_hash(id, *status, hash, &self.queue_name)
                    .inspect_err(|e| warn!(job_id = %id, error = %e, "Skipping unreadable job"))
                    .ok()
            })
            .collect();

        Ok(jobs)
    }

    /// Remove waiting, delayed, completed and failed jobs. Returns how many
    /// job records were deleted.
    pub(super) async fn clear(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let removed: u64 = self
            .scripts
            .clear
            .key(self.keys.wait())
            .key(self.keys.delayed())
            .key(self.keys.completed())
            .key(self.keys.failed())
            .arg(self.keys.base())
            .invoke_async(&mut conn)
            .await?;
        Ok(removed)
    }

    /// Promote due retries, then claim the oldest waiting job.
    ///
    /// Returns `None` when nothing is waiting.
    pub(crate) async fn claim(&self, lock_duration: Duration) -> Result<Option<ClaimedJob>, QueueError> {
        let mut conn = self.conn.clone();
        let token = uuid::Uuid::new_v4().to_string();
        let now_ms = Utc::now().timestamp_millis();

        let id: Option<String> = self
            .scripts
            .claim
            .key(self.keys.wait())
            .key(self.keys.active())
            .key(self.keys.delayed())
            .arg(self.keys.base())
            .arg(now_ms)
            .arg(&token)
            .arg(duration_ms(lock_duration))
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await?;
        let Some(id) = id else {
            return Ok(None);
        };

        let hash: HashMap<String, String> = conn.hgetall(self.keys.job(&id)).await?;
        match job_from_hash(&id, JobStatus::Processing, &hash, &self.queue_name) {
            Ok(job) => {
                debug!(job_id = %id, "Claimed webhook job");
                Ok(Some(ClaimedJob { job, token }))
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "Discarding unreadable job");
                redis::pipe()
                    .atomic()
                    .lrem(self.keys.active(), 0, &id)
                    .ignore()
                    .del(self.keys.lock(&id))
                    .ignore()
                    .del(self.keys.job(&id))
                    .ignore()
                    .query_async::<()>(&mut conn)
                    .await?;
                Err(e)
            }
        }
    }

    /// Settle a claimed job as completed, keeping at most `keep` completed
    /// jobs. Returns `false` if the claim was lost to another worker.
    pub(crate) async fn complete(&self, claimed: &ClaimedJob, keep: usize) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let done: i64 = self
            .scripts
            .complete
            .key(self.keys.active())
            .key(self.keys.completed())
            .arg(self.keys.base())
            .arg(&claimed.job.id)
            .arg(&claimed.token)
            .arg(Utc::now().timestamp_millis())
            .arg(keep)
            .invoke_async(&mut conn)
            .await?;
        Ok(done == 1)
    }

    /// Record a failed attempt.
    ///
    /// While fewer than `max_attempts` attempts have failed the job is
    /// scheduled again after `backoff * 2^(attempts - 1)`; otherwise it moves
    /// to the failed list (which keeps at most `keep` entries). Returns
    /// `None` if the claim was lost to another worker.
    pub(crate) async fn fail(
        &self,
        claimed: &ClaimedJob,
        reason: &str,
        max_attempts: u32,
        backoff: Duration,
        keep: usize,
    ) -> Result<Option<FailOutcome>, QueueError> {
        let mut conn = self.conn.clone();
        let (attempts, will_retry): (i64, i64) = self
            .scripts
            .fail
            .key(self.keys.active())
            .key(self.keys.delayed())
            .key(self.keys.failed())
            .arg(self.keys.base())
            .arg(&claimed.job.id)
            .arg(&claimed.token)
            .arg(Utc::now().timestamp_millis())
            .arg(reason)
            .arg(max_attempts)
            .arg(duration_ms(backoff))
            .arg(keep)
            .invoke_async(&mut conn)
            .await?;

        if attempts < 0 {
            return Ok(None);
        }
        Ok(Some(FailOutcome {
            attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
            will_retry: will_retry == 1,
        }))
    }

    /// Extend the claim on a job. Returns `false` if the claim was lost.
    pub(crate) async fn extend_lock(
        &self,
        claimed: &ClaimedJob,
        lock_duration: Duration,
    ) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .scripts
            .extend_lock
            .arg(self.keys.lock(&claimed.job.id))
            .arg(&claimed.token)
            .arg(duration_ms(lock_duration))
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    /// Move active jobs whose lock has expired back to the front of the wait
    /// list. Returns how many were moved.
    pub(crate) async fn recover_stalled(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let moved: u64 = self
            .scripts
            .recover_stalled
            .key(self.keys.active())
            .key(self.keys.wait())
            .arg(self.keys.base())
            .invoke_async(&mut conn)
            .await?;
        Ok(moved)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
