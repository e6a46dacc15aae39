//! Local object cache fed by a reflector

use std::sync::Arc;

use dashmap::DashMap;

use crate::resources::Resource;

/// Thread-safe uid -> object map.
///
/// Only the owning reflector writes; any number of workers read.
pub struct Store<K> {
    items: Arc<DashMap<String, Arc<K>>>,
}

impl<K> Clone for Store<K> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<K> Default for Store<K> {
    fn default() -> Self {
        Self {
            items: Arc::new(DashMap::new()),
        }
    }
}

impl<K: Resource> Store<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uid: &str) -> Option<Arc<K>> {
        self.items.get(uid).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<Arc<K>> {
        self.items.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.items.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.items.contains_key(uid)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert or replace by uid, returning the previous entry
    pub(crate) fn upsert(&self, obj: Arc<K>) -> Option<Arc<K>> {
        self.items.insert(obj.metadata().uid.clone(), obj)
    }

    pub(crate) fn remove(&self, uid: &str) -> Option<Arc<K>> {
        self.items.remove(uid).map(|(_, obj)| obj)
    }
}
