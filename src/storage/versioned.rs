//! Versioned key-value store with optimistic concurrency
//!
//! Every mutation returns the backing store's new global revision. Versions
//! are therefore comparable across keys and across resource kinds.

use std::sync::Arc;

use bytes::Bytes;

use super::backend::{CasOutcome, KvBackend, RangeResult, StoreResult, WatchTarget};
use super::broker::Subscription;

/// Result of [`VersionedStore::check_and_put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckAndPut {
    /// New revision on success, the stored revision otherwise
    pub version: i64,
    pub success: bool,
}

/// Store façade used by the API server
#[derive(Clone)]
pub struct VersionedStore {
    backend: Arc<dyn KvBackend>,
}

impl VersionedStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// Unconditional write
    pub async fn put(&self, key: &str, value: impl Into<Bytes>) -> StoreResult<i64> {
        self.backend.put(key, value.into()).await
    }

    /// Write if the key's stored version is still `expected_version`.
    ///
    /// On mismatch nothing is written and `success` is false; the caller must
    /// re-read and retry.
    pub async fn check_and_put(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        expected_version: i64,
    ) -> StoreResult<CheckAndPut> {
        let outcome = self
            .backend
            .compare_and_put(key, value.into(), expected_version)
            .await?;
        Ok(match outcome {
            CasOutcome::Applied(version) => CheckAndPut {
                version,
                success: true,
            },
            CasOutcome::Mismatch(version) => CheckAndPut {
                version,
                success: false,
            },
        })
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        Ok(self.backend.get(key).await?.map(|kv| kv.value))
    }

    pub async fn get_with_version(&self, key: &str) -> StoreResult<Option<(Bytes, i64)>> {
        Ok(self
            .backend
            .get(key)
            .await?
            .map(|kv| (kv.value, kv.mod_revision)))
    }

    pub async fn has(&self, key: &str) -> StoreResult<bool> {
        Ok(self.backend.get(key).await?.is_some())
    }

    pub async fn has_with_version(&self, key: &str) -> StoreResult<Option<i64>> {
        Ok(self.backend.get(key).await?.map(|kv| kv.mod_revision))
    }

    pub async fn get_all_with_prefix(&self, prefix: &str) -> StoreResult<Vec<Bytes>> {
        Ok(self
            .backend
            .range(prefix)
            .await?
            .kvs
            .into_iter()
            .map(|kv| kv.value)
            .collect())
    }

    /// Prefix scan together with the revision it is consistent at
    pub async fn list_with_prefix(&self, prefix: &str) -> StoreResult<RangeResult> {
        self.backend.range(prefix).await
    }

    /// Returns the deletion version, `None` if the key did not exist
    pub async fn delete(&self, key: &str) -> StoreResult<Option<i64>> {
        self.backend.delete(key).await
    }

    pub async fn delete_all_with_prefix(&self, prefix: &str) -> StoreResult<Option<i64>> {
        self.backend.delete_prefix(prefix).await
    }

    pub async fn current_version(&self) -> StoreResult<i64> {
        self.backend.current_revision().await
    }

    pub async fn watch(&self, key: &str) -> StoreResult<Subscription> {
        self.backend
            .watch(WatchTarget::Key(key.to_string()), None)
            .await
    }

    pub async fn watch_all_with_prefix(&self, prefix: &str) -> StoreResult<Subscription> {
        self.backend
            .watch(WatchTarget::Prefix(prefix.to_string()), None)
            .await
    }

    /// Watch a key, replaying changes newer than `after`
    pub async fn watch_from(&self, key: &str, after: i64) -> StoreResult<Subscription> {
        self.backend
            .watch(WatchTarget::Key(key.to_string()), Some(after))
            .await
    }

    /// Watch a prefix, replaying changes newer than `after`
    pub async fn watch_prefix_from(&self, prefix: &str, after: i64) -> StoreResult<Subscription> {
        self.backend
            .watch(WatchTarget::Prefix(prefix.to_string()), Some(after))
            .await
    }
}
