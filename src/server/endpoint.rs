//! Resource endpoint - CRUD and watch for one resource kind
//!
//! Writes follow a version-check protocol: the caller submits the
//! `resourceVersion` it read; if the stored version moved on the write is
//! rejected with a conflict and the caller must re-fetch. Every write, for
//! every kind, runs inside the [`VersionAllocator`] critical section so the
//! version stamped into an object is the revision it is stored at.
//!
//! The allocator is a single process-wide lock. It keeps the allocator
//! trivially correct at the cost of serializing all writes.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::ApiError;
use crate::resources::{Resource, TypeMeta};
use crate::storage::{StoreResult, Subscription, VersionedStore};

/// Serializes "read next version, stamp, write" across all resource kinds
#[derive(Debug, Default)]
pub struct VersionAllocator {
    lock: Mutex<()>,
}

/// Held while a write is being stamped and committed
pub struct AllocationGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl VersionAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self) -> AllocationGuard<'_> {
        AllocationGuard {
            _guard: self.lock.lock().await,
        }
    }
}

impl AllocationGuard<'_> {
    /// Version the next write will be stored at
    pub async fn next_version(&self, store: &VersionedStore) -> StoreResult<i64> {
        Ok(store.current_version().await? + 1)
    }
}

/// Identity of a freshly created object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub uid: String,
    pub version: i64,
}

/// Server-side handler for one resource collection
pub struct ResourceEndpoint<K> {
    store: VersionedStore,
    allocator: Arc<VersionAllocator>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: Resource> ResourceEndpoint<K> {
    pub fn new(store: VersionedStore, allocator: Arc<VersionAllocator>) -> Self {
        Self {
            store,
            allocator,
            _kind: PhantomData,
        }
    }

    fn not_found(uid: &str) -> ApiError {
        ApiError::NotFound {
            kind: K::KIND,
            uid: uid.to_string(),
        }
    }

    fn decode(bytes: &[u8], version: i64) -> Result<K, ApiError> {
        let mut obj: K = serde_json::from_slice(bytes)?;
        obj.metadata_mut().set_resource_version(version);
        Ok(obj)
    }

    /// Assign a uid, stamp the initial version and store the object
    pub async fn create(&self, mut obj: K) -> Result<Created, ApiError> {
        let uid = Uuid::new_v4().to_string();
        let key = K::storage_key(&uid);

        let guard = self.allocator.acquire().await;
        let version = guard.next_version(&self.store).await?;

        *obj.type_meta_mut() = TypeMeta::of::<K>();
        let meta = obj.metadata_mut();
        meta.uid = uid.clone();
        meta.set_resource_version(version);
        meta.creation_timestamp = Some(Utc::now());
        if meta.namespace.is_empty() {
            meta.namespace = "default".to_string();
        }

        let written = self.store.put(&key, serde_json::to_vec(&obj)?).await?;
        if written != version {
            warn!(
                "{} {} stamped with version {} but stored at {}",
                K::KIND,
                uid,
                version,
                written
            );
        }

        info!(
            "Created {} '{}' ({}) at version {}",
            K::KIND,
            obj.metadata().name,
            uid,
            written
        );
        Ok(Created {
            uid,
            version: written,
        })
    }

    pub async fn get(&self, uid: &str) -> Result<K, ApiError> {
        let (bytes, version) = self
            .store
            .get_with_version(&K::storage_key(uid))
            .await?
            .ok_or_else(|| Self::not_found(uid))?;
        Self::decode(&bytes, version)
    }

    /// All objects plus the version the listing is consistent at
    pub async fn list(&self) -> Result<(Vec<K>, i64), ApiError> {
        let range = self.store.list_with_prefix(&K::storage_prefix()).await?;
        let items = range
            .kvs
            .iter()
            .map(|kv| Self::decode(&kv.value, kv.mod_revision))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((items, range.revision))
    }

    /// Replace the whole object. `obj` must carry the version it was read at.
    pub async fn replace(&self, uid: &str, obj: K) -> Result<i64, ApiError> {
        let submitted = obj.metadata().resource_version();
        self.write_checked(uid, submitted, move |_stored| obj).await
    }

    pub async fn get_status(&self, uid: &str) -> Result<Option<K::Status>, ApiError> {
        Ok(self.get(uid).await?.status().cloned())
    }

    /// Replace only the status of the stored object, with the same version check
    pub async fn put_status(&self, uid: &str, obj: K) -> Result<i64, ApiError> {
        let submitted = obj.metadata().resource_version();
        let status = obj.status().cloned();
        self.write_checked(uid, submitted, move |mut stored| {
            stored.set_status(status);
            stored
        })
        .await
    }

    pub async fn delete(&self, uid: &str) -> Result<i64, ApiError> {
        let _guard = self.allocator.acquire().await;
        let version = self
            .store
            .delete(&K::storage_key(uid))
            .await?
            .ok_or_else(|| Self::not_found(uid))?;
        info!("Deleted {} {} at version {}", K::KIND, uid, version);
        Ok(version)
    }

    /// Subscribe to one object. Without `after` the object must exist.
    pub async fn watch_one(&self, uid: &str, after: Option<i64>) -> Result<Subscription, ApiError> {
        let key = K::storage_key(uid);
        let subscription = match after {
            Some(rev) => self.store.watch_from(&key, rev).await?,
            None => {
                // Subscribe before the existence check so a racing delete is delivered
                let subscription = self.store.watch(&key).await?;
                if !self.store.has(&key).await? {
                    return Err(Self::not_found(uid));
                }
                subscription
            }
        };
        debug!("Watch opened on {} {}", K::KIND, uid);
        Ok(subscription)
    }

    pub async fn watch_collection(&self, after: Option<i64>) -> Result<Subscription, ApiError> {
        let prefix = K::storage_prefix();
        let subscription = match after {
            Some(rev) => self.store.watch_prefix_from(&prefix, rev).await?,
            None => self.store.watch_all_with_prefix(&prefix).await?,
        };
        debug!("Watch opened on {} collection", K::KIND);
        Ok(subscription)
    }

    async fn write_checked<F>(
        &self,
        uid: &str,
        submitted: Option<i64>,
        update: F,
    ) -> Result<i64, ApiError>
    where
        F: FnOnce(K) -> K,
    {
        let submitted = submitted
            .ok_or_else(|| ApiError::BadRequest("resourceVersion is required".to_string()))?;
        let key = K::storage_key(uid);

        let guard = self.allocator.acquire().await;
        let (bytes, current) = self
            .store
            .get_with_version(&key)
            .await?
            .ok_or_else(|| Self::not_found(uid))?;
        if submitted != current {
            debug!(
                "{} {} conflict: submitted {}, stored {}",
                K::KIND,
                uid,
                submitted,
                current
            );
            return Err(ApiError::Conflict {
                kind: K::KIND,
                uid: uid.to_string(),
                submitted,
                current,
            });
        }

        let stored: K = serde_json::from_slice(&bytes)?;
        let created_at = stored.metadata().creation_timestamp;
        let mut next = update(stored);

        let version = guard.next_version(&self.store).await?;
        *next.type_meta_mut() = TypeMeta::of::<K>();
        let meta = next.metadata_mut();
        meta.uid = uid.to_string();
        meta.creation_timestamp = created_at;
        meta.set_resource_version(version);

        let outcome = self
            .store
            .check_and_put(&key, serde_json::to_vec(&next)?, current)
            .await?;
        if !outcome.success {
            return Err(ApiError::Conflict {
                kind: K::KIND,
                uid: uid.to_string(),
                submitted,
                current: outcome.version,
            });
        }
        if outcome.version != version {
            warn!(
                "{} {} stamped with version {} but stored at {}",
                K::KIND,
                uid,
                version,
                outcome.version
            );
        }

        debug!("Updated {} {} to version {}", K::KIND, uid, outcome.version);
        Ok(outcome.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Container, Node, Pod, PodPhase, PodStatus};
    use crate::storage::{EventKind, MemoryBackend};

    fn setup() -> (ResourceEndpoint<Pod>, ResourceEndpoint<Node>) {
        let store = VersionedStore::new(Arc::new(MemoryBackend::new()));
        let allocator = Arc::new(VersionAllocator::new());
        (
            ResourceEndpoint::new(store.clone(), allocator.clone()),
            ResourceEndpoint::new(store, allocator),
        )
    }

    fn pod(name: &str) -> Pod {
        Pod::new(name, vec![Container::new("app", "busybox")])
    }

    #[tokio::test]
    async fn test_create_stamps_metadata() {
        let (pods, _) = setup();
        let created = pods.create(pod("a")).await.unwrap();
        assert_eq!(created.version, 101);

        let stored = pods.get(&created.uid).await.unwrap();
        assert_eq!(stored.metadata.uid, created.uid);
        assert_eq!(stored.metadata.resource_version(), Some(101));
        assert!(stored.metadata.creation_timestamp.is_some());
        assert_eq!(stored.type_meta.kind, "Pod");
    }

    #[tokio::test]
    async fn test_replace_conflict_scenario() {
        let (pods, _) = setup();
        let created = pods.create(pod("a")).await.unwrap();
        assert_eq!(created.version, 101);

        let mut first = pods.get(&created.uid).await.unwrap();
        let stale = first.clone();
        first.spec.node_name = Some("n1".into());
        assert_eq!(pods.replace(&created.uid, first).await.unwrap(), 102);

        let err = pods.replace(&created.uid, stale).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Conflict {
                submitted: 101,
                current: 102,
                ..
            }
        ));

        let mut fresh = pods.get(&created.uid).await.unwrap();
        assert_eq!(fresh.metadata.resource_version(), Some(102));
        fresh.spec.node_name = Some("n2".into());
        assert_eq!(pods.replace(&created.uid, fresh).await.unwrap(), 103);
    }

    #[tokio::test]
    async fn test_replace_keeps_identity() {
        let (pods, _) = setup();
        let created = pods.create(pod("a")).await.unwrap();
        let original = pods.get(&created.uid).await.unwrap();

        let mut update = original.clone();
        update.metadata.uid = "spoofed".into();
        update.metadata.creation_timestamp = None;
        pods.replace(&created.uid, update).await.unwrap();

        let stored = pods.get(&created.uid).await.unwrap();
        assert_eq!(stored.metadata.uid, created.uid);
        assert_eq!(
            stored.metadata.creation_timestamp,
            original.metadata.creation_timestamp
        );
    }

    #[tokio::test]
    async fn test_replace_requires_version() {
        let (pods, _) = setup();
        let created = pods.create(pod("a")).await.unwrap();
        let mut obj = pods.get(&created.uid).await.unwrap();
        obj.metadata.resource_version.clear();
        assert!(matches!(
            pods.replace(&created.uid, obj).await,
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_replace_missing_is_not_found() {
        let (pods, _) = setup();
        let mut obj = pod("a");
        obj.metadata.set_resource_version(101);
        assert!(matches!(
            pods.replace("nope", obj).await,
            Err(ApiError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_put_status_only_touches_status() {
        let (pods, _) = setup();
        let created = pods.create(pod("a")).await.unwrap();

        let mut obj = pods.get(&created.uid).await.unwrap();
        obj.spec.node_name = Some("ignored".into());
        obj.status = Some(PodStatus {
            phase: PodPhase::Running,
            ..Default::default()
        });
        let version = pods.put_status(&created.uid, obj.clone()).await.unwrap();
        assert!(version > created.version);

        let stored = pods.get(&created.uid).await.unwrap();
        assert!(stored.spec.node_name.is_none());
        assert_eq!(
            pods.get_status(&created.uid).await.unwrap().unwrap().phase,
            PodPhase::Running
        );

        // Same stale version again
        assert!(matches!(
            pods.put_status(&created.uid, obj).await,
            Err(ApiError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_versions_shared_across_kinds() {
        let (pods, nodes) = setup();
        let p = pods.create(pod("a")).await.unwrap();
        let n = nodes.create(Node::new("n1", "10.0.0.1")).await.unwrap();
        let d = pods.delete(&p.uid).await.unwrap();
        assert!(p.version < n.version && n.version < d);
        assert!(matches!(
            pods.get(&p.uid).await,
            Err(ApiError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_reports_revision() {
        let (pods, nodes) = setup();
        pods.create(pod("a")).await.unwrap();
        pods.create(pod("b")).await.unwrap();
        let n = nodes.create(Node::new("n1", "10.0.0.1")).await.unwrap();

        let (items, revision) = pods.list().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(revision, n.version);
    }

    #[tokio::test]
    async fn test_concurrent_replace_one_wins() {
        let (pods, _) = setup();
        let pods = Arc::new(pods);
        let created = pods.create(pod("a")).await.unwrap();
        let base = pods.get(&created.uid).await.unwrap();

        let mut handles = Vec::new();
        for node in ["n1", "n2"] {
            let pods = pods.clone();
            let uid = created.uid.clone();
            let mut obj = base.clone();
            obj.spec.node_name = Some(node.to_string());
            handles.push(tokio::spawn(async move { pods.replace(&uid, obj).await }));
        }

        let mut wins = Vec::new();
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(v) => wins.push(v),
                Err(ApiError::Conflict { .. }) => conflicts += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(wins.len(), 1);
        assert_eq!(conflicts, 1);
        assert!(wins[0] > created.version);
        assert_eq!(
            pods.get(&created.uid).await.unwrap().metadata.resource_version(),
            Some(wins[0])
        );
    }

    #[tokio::test]
    async fn test_watch_one_requires_existing_object() {
        let (pods, _) = setup();
        assert!(matches!(
            pods.watch_one("nope", None).await,
            Err(ApiError::NotFound { .. })
        ));

        let created = pods.create(pod("a")).await.unwrap();
        let mut sub = pods.watch_one(&created.uid, None).await.unwrap();
        pods.delete(&created.uid).await.unwrap();
        assert_eq!(sub.recv().await.unwrap().kind, EventKind::Delete);
    }

    #[tokio::test]
    async fn test_watch_one_missing_object_releases_subscription() {
        let backend = Arc::new(MemoryBackend::new());
        let pods = ResourceEndpoint::<Pod>::new(
            VersionedStore::new(backend.clone()),
            Arc::new(VersionAllocator::new()),
        );

        assert!(matches!(
            pods.watch_one("nope", None).await,
            Err(ApiError::NotFound { .. })
        ));
        assert_eq!(backend.watcher_count(), 0);

        let created = pods.create(pod("a")).await.unwrap();
        let sub = pods.watch_one(&created.uid, None).await.unwrap();
        assert_eq!(backend.watcher_count(), 1);
        drop(sub);
        assert_eq!(backend.watcher_count(), 0);
    }
}
