//! Redis-backed queue store with Lua-scripted atomic operations.
//!
//! The ready-set is a sorted set (`ZADD`/`ZPOPMAX`/`ZPOPMIN`) and the
//! record store is plain string keys. Every mutation that must keep the
//! two in step runs as one server-side Lua script, so no concurrent
//! producer, consumer or crash window can observe a half-applied state:
//! a second consumer racing a `pop` either gets the next job or nothing,
//! never the same job twice.

use std::collections::HashSet;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{error, warn};

use crate::config::QueueConfig;
use crate::keys::KeySpace;
use crate::record::{self, Record};

use super::{score_weight, QueueStore, StoreError};

/// Keys examined per SCAN round when clearing or enumerating queues.
const SCAN_BATCH: usize = 1000;

/// ZADD the ready-set entry and SET the record in one step.
const PUT_SCRIPT: &str = r#"
redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
redis.call('SET', KEYS[2], ARGV[3])
return 1
"#;

/// Pop one member off the ready-set, then fetch and delete its record,
/// all server-side. The record key is derived here by appending the
/// member to the caller-supplied prefix. A missing record comes back as
/// an empty string ("no record" on the wire) because a Lua table reply
/// would be truncated at a nil.
const POP_SCRIPT: &str = r#"
local popped
if ARGV[1] == 'desc' then
    popped = redis.call('ZPOPMAX', KEYS[1], 1)
else
    popped = redis.call('ZPOPMIN', KEYS[1], 1)
end
if popped == nil or #popped == 0 then
    return nil
end
local member = popped[1]
local data_key = ARGV[2] .. ':' .. member
local payload = redis.call('GET', data_key)
redis.call('DEL', data_key)
return {member, payload or ''}
"#;

/// ZREM the ready-set member and DEL its record in one step. Returns the
/// ZREM count so the caller can tell "removed" from "was never there".
const REMOVE_SCRIPT: &str = r#"
local removed = redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('DEL', KEYS[2])
return removed
"#;

/// Queue store backed by a shared Redis instance.
pub struct RedisStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    keys: KeySpace,
    put_script: Script,
    pop_script: Script,
    remove_script: Script,
}

impl RedisStore {
    /// Connects to Redis using the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the connection cannot be
    /// established. This is the one fallible boundary; once connected,
    /// operations follow the log-and-default policy.
    pub async fn connect(config: &QueueConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.redis_url())
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, config.key_space()))
    }

    /// Creates a store from an existing connection manager.
    ///
    /// Useful when sharing a connection across components.
    pub fn from_connection(redis: ConnectionManager, keys: KeySpace) -> Self {
        Self {
            redis,
            keys,
            put_script: Script::new(PUT_SCRIPT),
            pop_script: Script::new(POP_SCRIPT),
            remove_script: Script::new(REMOVE_SCRIPT),
        }
    }

    async fn try_put(
        &self,
        queue: &str,
        id: &str,
        record: &Record,
        priority: f64,
    ) -> Result<bool, StoreError> {
        let Some(payload) = record::encode(record)? else {
            return Ok(false);
        };

        let mut conn = self.redis.clone();
        let result: i64 = self
            .put_script
            .key(self.keys.set_key(queue))
            .key(self.keys.data_key(queue, id))
            .arg(score_weight(priority))
            .arg(id)
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;

        Ok(result == 1)
    }

    async fn try_pop(&self, queue: &str, desc: bool) -> Result<Option<Record>, StoreError> {
        let mut conn = self.redis.clone();
        let popped: Option<(String, String)> = self
            .pop_script
            .key(self.keys.set_key(queue))
            .arg(if desc { "desc" } else { "asc" })
            .arg(self.keys.data_prefix(queue))
            .invoke_async(&mut conn)
            .await?;

        // An empty payload is a soft miss: the member existed but its
        // record was already gone.
        Ok(popped.and_then(|(_, payload)| record::decode(&payload)))
    }

    async fn try_remove(&self, queue: &str, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let removed: i64 = self
            .remove_script
            .key(self.keys.set_key(queue))
            .key(self.keys.data_key(queue, id))
            .arg(id)
            .invoke_async(&mut conn)
            .await?;

        Ok(removed > 0)
    }

    async fn try_list(
        &self,
        queue: &str,
        desc: bool,
        limit: i64,
    ) -> Result<Vec<Record>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.clone();
        let set_key = self.keys.set_key(queue);
        let stop: isize = if limit < 0 { -1 } else { limit as isize - 1 };

        let ids: Vec<String> = if desc {
            conn.zrevrange(&set_key, 0, stop).await?
        } else {
            conn.zrange(&set_key, 0, stop).await?
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let data_keys: Vec<String> = ids.iter().map(|id| self.keys.data_key(queue, id)).collect();
        let payloads: Vec<Option<String>> = conn.mget(&data_keys).await?;

        Ok(payloads
            .into_iter()
            .flatten()
            .filter_map(|payload| record::decode(&payload))
            .collect())
    }

    async fn try_count(&self, queue: &str) -> Result<u64, StoreError> {
        let mut conn = self.redis.clone();
        let count: u64 = conn.zcard(self.keys.set_key(queue)).await?;
        Ok(count)
    }

    async fn try_clear(&self, queue: &str) -> Result<(), StoreError> {
        self.delete_by_prefix(&self.keys.set_key(queue)).await?;
        self.delete_by_prefix(&self.keys.data_prefix(queue)).await?;
        Ok(())
    }

    /// Deletes every key under `prefix` in bounded SCAN/DEL batches, never
    /// holding the server for an unbounded sweep.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                conn.del::<_, ()>(keys).await?;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(())
    }

    async fn try_queues(&self) -> Result<HashSet<String>, StoreError> {
        let mut conn = self.redis.clone();
        let prefix = self.keys.set_prefix();
        let pattern = format!("{prefix}*");
        let mut found = HashSet::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            for key in keys {
                if let Some(queue) = self.keys.queue_from_set_key(&key) {
                    found.insert(queue.to_string());
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(found)
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    fn key_space(&self) -> &KeySpace {
        &self.keys
    }

    async fn put(&self, queue: &str, id: &str, record: &Record, priority: f64) -> bool {
        if id.is_empty() || record.is_empty() {
            warn!(queue, "rejecting enqueue of empty job record");
            return false;
        }
        match self.try_put(queue, id, record, priority).await {
            Ok(stored) => stored,
            Err(e) => {
                error!(queue, job_id = id, error = %e, "failed to enqueue job");
                false
            }
        }
    }

    async fn pop(&self, queue: &str, desc: bool) -> Option<Record> {
        match self.try_pop(queue, desc).await {
            Ok(record) => record,
            Err(e) => {
                error!(queue, error = %e, "failed to pop job");
                None
            }
        }
    }

    async fn remove(&self, queue: &str, id: &str) -> bool {
        match self.try_remove(queue, id).await {
            Ok(removed) => removed,
            Err(e) => {
                error!(queue, job_id = id, error = %e, "failed to remove job");
                false
            }
        }
    }

    async fn list(&self, queue: &str, desc: bool, limit: i64) -> Vec<Record> {
        match self.try_list(queue, desc, limit).await {
            Ok(records) => records,
            Err(e) => {
                error!(queue, error = %e, "failed to list jobs");
                Vec::new()
            }
        }
    }

    async fn count(&self, queue: &str) -> u64 {
        match self.try_count(queue).await {
            Ok(count) => count,
            Err(e) => {
                error!(queue, error = %e, "failed to count jobs");
                0
            }
        }
    }

    async fn clear(&self, queue: &str) {
        if let Err(e) = self.try_clear(queue).await {
            error!(queue, error = %e, "failed to clear queue");
        }
    }

    async fn queues(&self) -> HashSet<String> {
        match self.try_queues().await {
            Ok(queues) => queues,
            Err(e) => {
                error!(error = %e, "failed to enumerate queues");
                HashSet::new()
            }
        }
    }
}
