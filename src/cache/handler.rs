//! Event handlers registered on an informer

/// Callbacks for cache changes. Every method defaults to a no-op.
///
/// Handlers run on the informer's dispatch task, after the cache already
/// reflects the change. They should be quick; enqueue work rather than do it.
pub trait ResourceEventHandler<K>: Send + Sync {
    fn on_add(&self, _obj: &K) {}

    fn on_update(&self, _old: &K, _new: &K) {}

    fn on_delete(&self, _obj: &K) {}
}

type AddFn<K> = Box<dyn Fn(&K) + Send + Sync>;
type UpdateFn<K> = Box<dyn Fn(&K, &K) + Send + Sync>;

/// Handler assembled from closures
pub struct FnHandler<K> {
    add: Option<AddFn<K>>,
    update: Option<UpdateFn<K>>,
    delete: Option<AddFn<K>>,
}

impl<K> Default for FnHandler<K> {
    fn default() -> Self {
        Self {
            add: None,
            update: None,
            delete: None,
        }
    }
}

impl<K> FnHandler<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_add(mut self, f: impl Fn(&K) + Send + Sync + 'static) -> Self {
        self.add = Some(Box::new(f));
        self
    }

    pub fn on_update(mut self, f: impl Fn(&K, &K) + Send + Sync + 'static) -> Self {
        self.update = Some(Box::new(f));
        self
    }

    pub fn on_delete(mut self, f: impl Fn(&K) + Send + Sync + 'static) -> Self {
        self.delete = Some(Box::new(f));
        self
    }
}

impl<K> ResourceEventHandler<K> for FnHandler<K> {
    fn on_add(&self, obj: &K) {
        if let Some(f) = &self.add {
            f(obj);
        }
    }

    fn on_update(&self, old: &K, new: &K) {
        if let Some(f) = &self.update {
            f(old, new);
        }
    }

    fn on_delete(&self, obj: &K) {
        if let Some(f) = &self.delete {
            f(obj);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fn_handler_calls_only_set_closures() {
        let adds = Arc::new(AtomicUsize::new(0));
        let counter = adds.clone();
        let handler = FnHandler::<u32>::new().on_add(move |v| {
            counter.fetch_add(*v as usize, Ordering::SeqCst);
        });

        ResourceEventHandler::on_add(&handler, &3);
        ResourceEventHandler::on_update(&handler, &1, &2);
        ResourceEventHandler::on_delete(&handler, &4);
        assert_eq!(adds.load(Ordering::SeqCst), 3);
    }
}
