use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::endpoint::{ResourceEndpoint, VersionAllocator};
use crate::resources::Resource;
use crate::storage::{MemoryBackend, VersionedStore};

/// Shared API server state
#[derive(Clone)]
pub struct ApiState {
    pub store: VersionedStore,
    pub allocator: Arc<VersionAllocator>,
    /// Cancelled on server shutdown; open watch streams end with a final status frame
    pub shutdown: CancellationToken,
}

impl ApiState {
    pub fn new(store: VersionedStore) -> Self {
        Self {
            store,
            allocator: Arc::new(VersionAllocator::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// State over a fresh in-memory backend
    pub fn in_memory() -> Self {
        Self::new(VersionedStore::new(Arc::new(MemoryBackend::new())))
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn endpoint<K: Resource>(&self) -> ResourceEndpoint<K> {
        ResourceEndpoint::new(self.store.clone(), self.allocator.clone())
    }
}
