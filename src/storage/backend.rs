//! Backing key-value store contract
//!
//! The control plane never talks to a concrete database directly. Everything
//! goes through [`KvBackend`], an etcd-shaped interface: a single global
//! revision, per-key create/mod revisions, prefix ranges and watches.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use super::broker::Subscription;

/// Errors surfaced by the backing store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    #[error("Revision {requested} has been compacted (oldest available: {oldest})")]
    Compacted { requested: i64, oldest: i64 },

    #[error("Codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A stored key with its revision bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Bytes,
    /// Revision of the write that created the key
    pub create_revision: i64,
    /// Revision of the latest write to the key
    pub mod_revision: i64,
    /// Number of writes since creation (1 on create)
    pub version: i64,
}

/// Kind of backing-store notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// A single backing-store change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEvent {
    pub kind: EventKind,
    /// For deletes only `key` and `mod_revision` are meaningful
    pub kv: KeyValue,
    /// Value before the change (always present on delete)
    pub prev_kv: Option<KeyValue>,
}

impl KvEvent {
    /// Revision at which this change happened
    pub fn revision(&self) -> i64 {
        self.kv.mod_revision
    }
}

/// What a watch subscribes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    Key(String),
    Prefix(String),
}

impl WatchTarget {
    pub fn matches(&self, key: &str) -> bool {
        match self {
            WatchTarget::Key(k) => k == key,
            WatchTarget::Prefix(p) => key.starts_with(p.as_str()),
        }
    }
}

/// Outcome of a compare-and-put
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write happened at this revision
    Applied(i64),
    /// Nothing was written; carries the stored mod revision (0 if absent)
    Mismatch(i64),
}

/// Result of a prefix range read, consistent at `revision`
#[derive(Debug, Clone, Default)]
pub struct RangeResult {
    pub kvs: Vec<KeyValue>,
    pub revision: i64,
}

/// Strongly consistent key-value store with a global revision counter
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    /// Unconditional write. Returns the new global revision.
    async fn put(&self, key: &str, value: Bytes) -> StoreResult<i64>;

    /// Write only if the key's current mod revision equals `expected`
    async fn compare_and_put(&self, key: &str, value: Bytes, expected: i64)
        -> StoreResult<CasOutcome>;

    async fn get(&self, key: &str) -> StoreResult<Option<KeyValue>>;

    /// All keys starting with `prefix`, sorted by key
    async fn range(&self, prefix: &str) -> StoreResult<RangeResult>;

    /// Returns the deletion revision, or `None` if the key was absent
    async fn delete(&self, key: &str) -> StoreResult<Option<i64>>;

    /// Deletes every key under `prefix` in one revision
    async fn delete_prefix(&self, prefix: &str) -> StoreResult<Option<i64>>;

    async fn current_revision(&self) -> StoreResult<i64>;

    /// Subscribe to changes. With `after = Some(rev)` every retained event
    /// newer than `rev` is replayed first.
    async fn watch(&self, target: WatchTarget, after: Option<i64>) -> StoreResult<Subscription>;
}
