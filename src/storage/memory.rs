//! In-process MVCC backend
//!
//! An etcd-like store kept in memory: one global revision, a sorted key
//! space and a bounded history of change events used to resume watches.
//! All mutations and watch registrations happen under one mutex, so the
//! revision sequence observed by watchers has no gaps.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::backend::{
    CasOutcome, EventKind, KeyValue, KvBackend, KvEvent, RangeResult, StoreError, StoreResult,
    WatchTarget,
};
use super::broker::{Subscription, WatchBroker};

/// Revision the store starts from when none is configured
pub const DEFAULT_INITIAL_REVISION: i64 = 100;

/// Number of change events retained for watch resumption
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

struct MemoryState {
    revision: i64,
    data: BTreeMap<String, KeyValue>,
    history: VecDeque<KvEvent>,
    history_limit: usize,
    /// Events at or below this revision are no longer retained
    compacted: i64,
    closed: bool,
}

impl MemoryState {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed {
            Err(StoreError::Unavailable("store is closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn record(&mut self, event: KvEvent) -> KvEvent {
        if self.history_limit == 0 {
            self.compacted = event.revision();
            return event;
        }
        if self.history.len() == self.history_limit {
            if let Some(evicted) = self.history.pop_front() {
                self.compacted = evicted.revision();
            }
        }
        self.history.push_back(event.clone());
        event
    }

    fn apply_put(&mut self, key: &str, value: Bytes) -> KvEvent {
        self.revision += 1;
        let revision = self.revision;
        let prev = self.data.get(key).cloned();
        let kv = match &prev {
            Some(old) => KeyValue {
                key: key.to_string(),
                value,
                create_revision: old.create_revision,
                mod_revision: revision,
                version: old.version + 1,
            },
            None => KeyValue {
                key: key.to_string(),
                value,
                create_revision: revision,
                mod_revision: revision,
                version: 1,
            },
        };
        self.data.insert(key.to_string(), kv.clone());
        self.record(KvEvent {
            kind: EventKind::Put,
            kv,
            prev_kv: prev,
        })
    }

    fn tombstone(key: &str, revision: i64, prev: KeyValue) -> KvEvent {
        KvEvent {
            kind: EventKind::Delete,
            kv: KeyValue {
                key: key.to_string(),
                value: Bytes::new(),
                create_revision: 0,
                mod_revision: revision,
                version: 0,
            },
            prev_kv: Some(prev),
        }
    }
}

/// Memory-backed [`KvBackend`]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    broker: WatchBroker,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_options(DEFAULT_INITIAL_REVISION, DEFAULT_HISTORY_LIMIT)
    }

    /// Create a backend whose first write lands at `initial_revision + 1`
    pub fn with_options(initial_revision: i64, history_limit: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                revision: initial_revision,
                data: BTreeMap::new(),
                history: VecDeque::with_capacity(history_limit.min(4096)),
                history_limit,
                // Nothing before the initial revision was ever recorded
                compacted: initial_revision.min(0),
                closed: false,
            }),
            broker: WatchBroker::new(),
        }
    }

    /// Stop serving requests and end every open watch
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.broker.close_all();
        info!("Memory backend closed at revision {}", state.revision);
    }

    pub fn watcher_count(&self) -> usize {
        self.broker.subscriber_count()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn put(&self, key: &str, value: Bytes) -> StoreResult<i64> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        let event = state.apply_put(key, value);
        self.broker.publish(&event);
        Ok(event.revision())
    }

    async fn compare_and_put(
        &self,
        key: &str,
        value: Bytes,
        expected: i64,
    ) -> StoreResult<CasOutcome> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        let current = state.data.get(key).map(|kv| kv.mod_revision).unwrap_or(0);
        if current != expected {
            debug!(
                "compare_and_put on {} rejected: expected {}, stored {}",
                key, expected, current
            );
            return Ok(CasOutcome::Mismatch(current));
        }
        let event = state.apply_put(key, value);
        self.broker.publish(&event);
        Ok(CasOutcome::Applied(event.revision()))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<KeyValue>> {
        let state = self.state.lock();
        state.ensure_open()?;
        Ok(state.data.get(key).cloned())
    }

    async fn range(&self, prefix: &str) -> StoreResult<RangeResult> {
        let state = self.state.lock();
        state.ensure_open()?;
        let kvs = state
            .data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, kv)| kv.clone())
            .collect();
        Ok(RangeResult {
            kvs,
            revision: state.revision,
        })
    }

    async fn delete(&self, key: &str) -> StoreResult<Option<i64>> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        let Some(prev) = state.data.remove(key) else {
            return Ok(None);
        };
        state.revision += 1;
        let revision = state.revision;
        let event = state.record(MemoryState::tombstone(key, revision, prev));
        self.broker.publish(&event);
        Ok(Some(revision))
    }

    async fn delete_prefix(&self, prefix: &str) -> StoreResult<Option<i64>> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        let keys: Vec<String> = state
            .data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        if keys.is_empty() {
            return Ok(None);
        }

        state.revision += 1;
        let revision = state.revision;
        for key in keys {
            if let Some(prev) = state.data.remove(&key) {
                let event = state.record(MemoryState::tombstone(&key, revision, prev));
                self.broker.publish(&event);
            }
        }
        Ok(Some(revision))
    }

    async fn current_revision(&self) -> StoreResult<i64> {
        let state = self.state.lock();
        state.ensure_open()?;
        Ok(state.revision)
    }

    async fn watch(&self, target: WatchTarget, after: Option<i64>) -> StoreResult<Subscription> {
        let state = self.state.lock();
        state.ensure_open()?;

        let backlog = match after {
            Some(rev) if rev < state.compacted => {
                return Err(StoreError::Compacted {
                    requested: rev,
                    oldest: state.compacted,
                });
            }
            Some(rev) => state
                .history
                .iter()
                .filter(|e| e.revision() > rev && target.matches(&e.kv.key))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        Ok(self.broker.subscribe(target, backlog))
    }
}
