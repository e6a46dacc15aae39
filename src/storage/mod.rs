//! Storage layer: backing store contract, in-memory backend, watch broker
//! and the versioned store the API server writes through.

pub mod backend;
pub mod broker;
pub mod memory;
pub mod versioned;

pub use backend::{
    CasOutcome, EventKind, KeyValue, KvBackend, KvEvent, RangeResult, StoreError, StoreResult,
    WatchTarget,
};
pub use broker::{Subscription, WatchBroker};
pub use memory::{MemoryBackend, DEFAULT_HISTORY_LIMIT, DEFAULT_INITIAL_REVISION};
pub use versioned::{CheckAndPut, VersionedStore};
