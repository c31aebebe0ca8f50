//! Priority queue storage engine.
//!
//! A [`QueueStore`] keeps, per queue identity, a scored ready-set of
//! pending job ids paired with a record store of serialized payloads. The
//! pairing is the core invariant: a record never exists without its
//! ready-set entry or vice versa, except transiently inside the atomic
//! operation that establishes or removes both.
//!
//! Two implementations conform:
//!
//! - [`RedisStore`]: Lua-scripted atomic operations over a shared Redis
//!   instance; the production backend.
//! - [`MemoryStore`]: mutex-guarded in-process state with the same
//!   observable semantics; for tests and store-less local runs.
//!
//! # Error policy
//!
//! No operation raises across the public boundary. Backing-store failures
//! are logged with operation context and converted to the operation's empty
//! result (`false`, `None`, `0`, `[]`). Callers must treat every return
//! value as potentially meaning "nothing happened".

mod memory;
mod redis;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::error;

use crate::keys::KeySpace;
use crate::record::Record;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Errors internal to store operations.
///
/// These never cross the [`QueueStore`] boundary; they exist so the
/// implementations can propagate with `?` up to the operation entry point,
/// where they are logged and flattened.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// Record serialization failed.
    #[error("Record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Ready-set score for a job enqueued now.
///
/// Higher priorities and later enqueue times both raise the score, so
/// `pop(desc)` drains by priority first and recency second. Computed per
/// call; a long-lived store never weights new work against a stale clock.
pub(crate) fn score_weight(priority: f64) -> f64 {
    Utc::now().timestamp() as f64 * priority
}

/// Atomic priority-queue operations over one table.
///
/// Every method is scoped to one `(table, queue)` identity except
/// [`queues`](QueueStore::queues), which enumerates the table. `put`, `pop`
/// and `remove` execute as single indivisible units on the store side; two
/// concurrent pops can never both claim the same job, and a half-written
/// put is never observable.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// The key space this store operates in.
    fn key_space(&self) -> &KeySpace;

    /// Atomically inserts `record` under `id` with the given priority.
    ///
    /// Rejects empty ids and empty records without touching the store.
    /// Returns `true` on success, `false` on rejection or store error.
    async fn put(&self, queue: &str, id: &str, record: &Record, priority: f64) -> bool;

    /// Atomically removes and returns the highest-scored record (`desc`),
    /// or the lowest-scored one (`!desc`).
    ///
    /// Returns `None` when the queue is empty, on store error, or when the
    /// popped member's record was already gone (a soft miss, not an error).
    async fn pop(&self, queue: &str, desc: bool) -> Option<Record>;

    /// Atomically removes the ready-set member and record for `id`.
    ///
    /// Returns `true` only if the member actually existed; removing an
    /// unknown id is a non-throwing `false` that leaves state unchanged.
    async fn remove(&self, queue: &str, id: &str) -> bool;

    /// Snapshot of up to `limit` pending records in score order.
    ///
    /// `limit < 0` means all. Entries whose record is missing or
    /// undecodable are silently dropped. No isolation guarantee beyond the
    /// underlying reads; results may be stale by the time they return.
    async fn list(&self, queue: &str, desc: bool, limit: i64) -> Vec<Record>;

    /// Cardinality of the ready-set. Returns 0 on store error.
    async fn count(&self, queue: &str) -> u64;

    /// Deletes the ready-set and every stored record for `queue` via
    /// bounded-batch cursor iteration.
    ///
    /// Not atomic as a whole; partial progress on error is left in place.
    async fn clear(&self, queue: &str);

    /// Enumerates the queue names that currently have a ready-set key
    /// under this table.
    async fn queues(&self) -> HashSet<String>;

    /// Requeues a failed job, or drops it once retries are exhausted.
    ///
    /// Below `max_retries` the record goes back in with `retry_count`
    /// incremented and the same priority. At or above the cap it is
    /// dropped and logged. Returns whether the job was requeued.
    async fn requeue_failed(
        &self,
        queue: &str,
        id: &str,
        record: &Record,
        priority: f64,
        max_retries: u32,
    ) -> bool {
        if record.retry_count >= max_retries {
            error!(queue, job_id = id, retries = record.retry_count, "max retries reached, dropping job");
            return false;
        }
        let mut retried = record.clone();
        retried.retry_count += 1;
        self.put(queue, id, &retried, priority).await
    }
}
