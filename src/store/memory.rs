//! In-memory queue store.
//!
//! Mirrors the Redis layout key for key: a map of ready-set keys to scored
//! members and an ordered map of record keys to payloads, both behind one
//! mutex so every operation is atomic exactly where the Lua scripts are.
//! Payloads are stored encoded, so codec behavior (empty = no record,
//! undecodable entries dropped) matches the wire path.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::keys::KeySpace;
use crate::record::{self, Record};

use super::{score_weight, QueueStore};

#[derive(Debug, Default)]
struct MemoryState {
    /// Ready-set key to `(score, member)` entries.
    sets: HashMap<String, Vec<(f64, String)>>,
    /// Record key to encoded payload; ordered for prefix sweeps.
    data: BTreeMap<String, String>,
}

/// Compares entries the way Redis orders a sorted set: by score, ties
/// broken by member lexicographic order.
fn entry_order(a: &(f64, String), b: &(f64, String)) -> Ordering {
    a.0.partial_cmp(&b.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.1.cmp(&b.1))
}

/// Queue store held entirely in process memory.
///
/// Conforms to every [`QueueStore`] contract, including unified-mode key
/// collapsing and the empty-set key disappearing from
/// [`queues`](QueueStore::queues) once drained. Used by the test suite and
/// available for store-less local runs.
pub struct MemoryStore {
    keys: KeySpace,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty store for `table`.
    pub fn new(table: impl Into<String>, unified: bool) -> Self {
        Self {
            keys: KeySpace::new(table, unified),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Ids currently present in the ready-set, unordered.
    ///
    /// Diagnostic accessor used to check the set/record pairing invariant.
    pub async fn ready_ids(&self, queue: &str) -> HashSet<String> {
        let state = self.state.lock().await;
        state
            .sets
            .get(&self.keys.set_key(queue))
            .map(|entries| entries.iter().map(|(_, id)| id.clone()).collect())
            .unwrap_or_default()
    }

    /// Ids currently present in the record store, unordered.
    ///
    /// Diagnostic accessor used to check the set/record pairing invariant.
    pub async fn stored_ids(&self, queue: &str) -> HashSet<String> {
        let state = self.state.lock().await;
        let prefix = format!("{}:", self.keys.data_prefix(queue));
        state
            .data
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    fn key_space(&self) -> &KeySpace {
        &self.keys
    }

    async fn put(&self, queue: &str, id: &str, record: &Record, priority: f64) -> bool {
        if id.is_empty() || record.is_empty() {
            warn!(queue, "rejecting enqueue of empty job record");
            return false;
        }
        let payload = match record::encode(record) {
            Ok(Some(payload)) => payload,
            Ok(None) => return false,
            Err(e) => {
                error!(queue, job_id = id, error = %e, "failed to encode job record");
                return false;
            }
        };

        let mut state = self.state.lock().await;
        let entries = state.sets.entry(self.keys.set_key(queue)).or_default();
        entries.retain(|(_, member)| member != id);
        entries.push((score_weight(priority), id.to_string()));
        state.data.insert(self.keys.data_key(queue, id), payload);
        true
    }

    async fn pop(&self, queue: &str, desc: bool) -> Option<Record> {
        let mut state = self.state.lock().await;
        let set_key = self.keys.set_key(queue);

        let entries = state.sets.get_mut(&set_key)?;
        let index = if desc {
            entries
                .iter()
                .enumerate()
                .max_by(|a, b| entry_order(a.1, b.1))
                .map(|(i, _)| i)?
        } else {
            entries
                .iter()
                .enumerate()
                .min_by(|a, b| entry_order(a.1, b.1))
                .map(|(i, _)| i)?
        };
        let (_, id) = entries.remove(index);
        if entries.is_empty() {
            // Redis drops a sorted-set key once its last member goes.
            state.sets.remove(&set_key);
        }

        let payload = state.data.remove(&self.keys.data_key(queue, &id));
        payload.and_then(|payload| record::decode(&payload))
    }

    async fn remove(&self, queue: &str, id: &str) -> bool {
        let mut state = self.state.lock().await;
        let set_key = self.keys.set_key(queue);

        let mut removed = false;
        let mut now_empty = false;
        if let Some(entries) = state.sets.get_mut(&set_key) {
            let before = entries.len();
            entries.retain(|(_, member)| member != id);
            removed = entries.len() < before;
            now_empty = entries.is_empty();
        }
        if now_empty {
            state.sets.remove(&set_key);
        }
        state.data.remove(&self.keys.data_key(queue, id));
        removed
    }

    async fn list(&self, queue: &str, desc: bool, limit: i64) -> Vec<Record> {
        if limit == 0 {
            return Vec::new();
        }

        let state = self.state.lock().await;
        let Some(entries) = state.sets.get(&self.keys.set_key(queue)) else {
            return Vec::new();
        };

        let mut ordered = entries.clone();
        ordered.sort_by(entry_order);
        if desc {
            ordered.reverse();
        }
        if limit > 0 {
            ordered.truncate(limit as usize);
        }

        ordered
            .into_iter()
            .filter_map(|(_, id)| state.data.get(&self.keys.data_key(queue, &id)))
            .filter_map(|payload| record::decode(payload))
            .collect()
    }

    async fn count(&self, queue: &str) -> u64 {
        let state = self.state.lock().await;
        state
            .sets
            .get(&self.keys.set_key(queue))
            .map(|entries| entries.len() as u64)
            .unwrap_or(0)
    }

    async fn clear(&self, queue: &str) {
        let mut state = self.state.lock().await;
        let set_prefix = self.keys.set_key(queue);
        let data_prefix = self.keys.data_prefix(queue);
        state.sets.retain(|key, _| !key.starts_with(&set_prefix));
        state.data.retain(|key, _| !key.starts_with(&data_prefix));
    }

    async fn queues(&self) -> HashSet<String> {
        let state = self.state.lock().await;
        state
            .sets
            .keys()
            .filter_map(|key| self.keys.queue_from_set_key(key))
            .map(str::to_string)
            .collect()
    }
}
