//! Reflector and informer
//!
//! A [`Reflector`] lists one resource collection, seeds a [`Store`] with the
//! result and then watches from the list revision, applying every event to
//! the store. Each applied change is published as a [`Delta`]; the
//! [`Informer`] dispatches deltas to registered handlers on a separate task,
//! so slow handlers never hold up decoding.
//!
//! State machine: `Idle -> Listing -> Watching -> (Error | Stopped)`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handler::ResourceEventHandler;
use super::store::Store;
use crate::client::{Backoff, ClientError, ReconnectPolicy, ResourceClient};
use crate::resources::Resource;
use crate::watch::{EventType, WatchEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectorState {
    Idle,
    Listing,
    Watching,
    Error,
    Stopped,
}

/// A change applied to the local store
#[derive(Debug, Clone)]
pub enum Delta<K> {
    Added(Arc<K>),
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(Arc<K>),
}

pub struct Reflector<K> {
    client: Arc<dyn ResourceClient<K>>,
    store: Store<K>,
    deltas: mpsc::UnboundedSender<Delta<K>>,
    state: watch::Sender<ReflectorState>,
    policy: ReconnectPolicy,
    last_revision: AtomicI64,
    synced: AtomicBool,
}

impl<K: Resource> Reflector<K> {
    pub fn new(
        client: Arc<dyn ResourceClient<K>>,
        store: Store<K>,
        deltas: mpsc::UnboundedSender<Delta<K>>,
    ) -> Self {
        let (state, _) = watch::channel(ReflectorState::Idle);
        Self {
            client,
            store,
            deltas,
            state,
            policy: ReconnectPolicy::default(),
            last_revision: AtomicI64::new(0),
            synced: AtomicBool::new(false),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Store<K> {
        &self.store
    }

    /// Cached object by uid
    pub fn get(&self, uid: &str) -> Option<Arc<K>> {
        self.store.get(uid)
    }

    pub fn list(&self) -> Vec<Arc<K>> {
        self.store.list()
    }

    pub fn state(&self) -> ReflectorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ReflectorState> {
        self.state.subscribe()
    }

    /// Highest revision applied to the store
    pub fn last_revision(&self) -> i64 {
        self.last_revision.load(Ordering::SeqCst)
    }

    /// True once the first list has been applied
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: ReflectorState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("{} reflector: {:?} -> {:?}", K::KIND, previous, next);
        }
    }

    /// One List then Watch attempt.
    ///
    /// Returns `Ok(())` when `stop` fires or the server ends the stream
    /// cleanly, and the error otherwise. Does not retry.
    pub async fn list_and_watch(&self, stop: &CancellationToken) -> Result<(), ClientError> {
        let mut backoff = self.policy.backoff();
        self.attempt(stop, true, &mut backoff).await
    }

    /// List and watch until `stop` fires, reconnecting under the policy.
    ///
    /// Transport failures resume the watch from the last applied revision;
    /// an expired resume point forces a fresh list. Returns the last error
    /// once the policy runs out of attempts.
    pub async fn run(&self, stop: CancellationToken) -> Result<(), ClientError> {
        let mut backoff = self.policy.backoff();
        let mut relist = true;

        loop {
            let result = self.attempt(&stop, relist, &mut backoff).await;
            if stop.is_cancelled() {
                self.set_state(ReflectorState::Stopped);
                info!("{} reflector stopped", K::KIND);
                return Ok(());
            }

            match result {
                Ok(()) => {
                    debug!(
                        "{} watch closed by server, resuming from {}",
                        K::KIND,
                        self.last_revision()
                    );
                    self.set_state(ReflectorState::Idle);
                    relist = !self.has_synced();
                    tokio::select! {
                        _ = stop.cancelled() => {}
                        _ = tokio::time::sleep(self.policy.initial_backoff) => {}
                    }
                }
                Err(e) => {
                    // An expired resume point can only be recovered by listing again
                    relist = matches!(e, ClientError::Expired(_)) || !self.has_synced();
                    let Some(delay) = backoff.next() else {
                        warn!(
                            "{} reflector giving up after {} attempts: {}",
                            K::KIND,
                            backoff.attempts() - 1,
                            e
                        );
                        return Err(e);
                    };
                    if let ClientError::Expired(msg) = &e {
                        info!("{} watch expired ({}), re-listing in {:?}", K::KIND, msg, delay);
                    } else {
                        warn!(
                            "{} reflector error: {} (retrying in {:?})",
                            K::KIND,
                            e,
                            delay
                        );
                    }
                    tokio::select! {
                        _ = stop.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        stop: &CancellationToken,
        relist: bool,
        backoff: &mut Backoff,
    ) -> Result<(), ClientError> {
        let result = self.list_then_watch(stop, relist, backoff).await;
        match &result {
            Ok(()) => {}
            Err(ClientError::StopRequested) => {
                self.set_state(ReflectorState::Stopped);
                return Ok(());
            }
            Err(_) => self.set_state(ReflectorState::Error),
        }
        result
    }

    async fn list_then_watch(
        &self,
        stop: &CancellationToken,
        relist: bool,
        backoff: &mut Backoff,
    ) -> Result<(), ClientError> {
        if relist {
            self.set_state(ReflectorState::Listing);
            let list = tokio::select! {
                _ = stop.cancelled() => return Err(ClientError::StopRequested),
                list = self.client.get_all() => list?,
            };
            let revision = list.revision().ok_or_else(|| {
                ClientError::Decode(format!("{} list carries no resourceVersion", K::KIND))
            })?;
            let count = list.items.len();
            self.replace(list.items);
            self.last_revision.store(revision, Ordering::SeqCst);
            self.synced.store(true, Ordering::SeqCst);
            info!("{} reflector listed {} objects at revision {}", K::KIND, count, revision);
        }

        let from = self.last_revision();
        let mut watcher = tokio::select! {
            _ = stop.cancelled() => return Err(ClientError::StopRequested),
            watcher = self.client.watch_all(Some(from)) => watcher?,
        };
        self.set_state(ReflectorState::Watching);
        backoff.reset();

        loop {
            let event = tokio::select! {
                _ = stop.cancelled() => {
                    watcher.stop();
                    return Err(ClientError::StopRequested);
                }
                event = watcher.next_event() => event,
            };
            let Some(event) = event else {
                return Ok(());
            };
            if event.event_type == EventType::Error {
                let message = event
                    .error_status()
                    .map(|s| s.message().to_string())
                    .unwrap_or_default();
                return Err(ClientError::Transport(message));
            }
            self.apply(event);
        }
    }

    fn apply(&self, event: WatchEvent<K>) {
        let revision = event.mod_revision;
        let event_type = event.event_type;
        let Some(obj) = event.into_resource() else {
            return;
        };

        match event_type {
            EventType::Added | EventType::Modified => {
                let new = Arc::new(obj);
                let delta = match self.store.upsert(new.clone()) {
                    Some(old) => Delta::Updated { old, new },
                    None => Delta::Added(new),
                };
                self.publish(delta);
            }
            EventType::Deleted => {
                self.store.remove(&obj.metadata().uid);
                self.publish(Delta::Deleted(Arc::new(obj)));
            }
            EventType::Bookmark | EventType::Error => {}
        }
        self.last_revision.fetch_max(revision, Ordering::SeqCst);
    }

    /// Make the store match a fresh listing, publishing the difference
    fn replace(&self, items: Vec<K>) {
        let mut seen = HashSet::with_capacity(items.len());
        for obj in items {
            seen.insert(obj.metadata().uid.clone());
            let new = Arc::new(obj);
            match self.store.upsert(new.clone()) {
                None => self.publish(Delta::Added(new)),
                Some(old) if old.metadata().resource_version != new.metadata().resource_version => {
                    self.publish(Delta::Updated { old, new })
                }
                Some(_) => {}
            }
        }

        for uid in self.store.keys() {
            if seen.contains(&uid) {
                continue;
            }
            if let Some(old) = self.store.remove(&uid) {
                self.publish(Delta::Deleted(old));
            }
        }
    }

    fn publish(&self, delta: Delta<K>) {
        // No receiver means nobody registered for deltas; the store is still current
        let _ = self.deltas.send(delta);
    }
}

type SharedHandler<K> = Arc<dyn ResourceEventHandler<K>>;

/// Reflector, cache and handler fan-out for one resource kind
pub struct Informer<K> {
    reflector: Arc<Reflector<K>>,
    handlers: Arc<RwLock<Vec<SharedHandler<K>>>>,
    deltas: Mutex<Option<mpsc::UnboundedReceiver<Delta<K>>>>,
}

impl<K: Resource> Informer<K> {
    pub fn new(client: Arc<dyn ResourceClient<K>>) -> Self {
        Self::with_policy(client, ReconnectPolicy::default())
    }

    pub fn with_policy(client: Arc<dyn ResourceClient<K>>, policy: ReconnectPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let reflector = Reflector::new(client, Store::new(), tx).with_policy(policy);
        Self {
            reflector: Arc::new(reflector),
            handlers: Arc::new(RwLock::new(Vec::new())),
            deltas: Mutex::new(Some(rx)),
        }
    }

    pub fn add_event_handler(&self, handler: impl ResourceEventHandler<K> + 'static) {
        self.handlers.write().push(Arc::new(handler));
    }

    pub fn store(&self) -> Store<K> {
        self.reflector.store().clone()
    }

    pub fn has_synced(&self) -> bool {
        self.reflector.has_synced()
    }

    pub fn reflector(&self) -> &Reflector<K> {
        &self.reflector
    }

    pub fn state(&self) -> watch::Receiver<ReflectorState> {
        self.reflector.subscribe_state()
    }

    /// Wait until the first list has been applied; false if `stop` fired first
    pub async fn wait_for_sync(&self, stop: &CancellationToken) -> bool {
        let mut state = self.state();
        loop {
            if self.has_synced() {
                return true;
            }
            tokio::select! {
                _ = stop.cancelled() => return false,
                changed = state.changed() => {
                    if changed.is_err() {
                        return self.has_synced();
                    }
                }
            }
        }
    }

    /// Run the reflector and the handler dispatcher until `stop` fires.
    ///
    /// An informer runs once; later calls return immediately.
    pub async fn run(&self, stop: CancellationToken) -> Result<(), ClientError> {
        let Some(rx) = self.deltas.lock().take() else {
            warn!("{} informer is already running", K::KIND);
            return Ok(());
        };

        let dispatch_stop = stop.child_token();
        let dispatcher = tokio::spawn(dispatch_loop(
            rx,
            self.handlers.clone(),
            dispatch_stop.clone(),
        ));

        let result = self.reflector.run(stop).await;
        dispatch_stop.cancel();
        if let Err(e) = dispatcher.await {
            warn!("{} informer dispatcher failed: {}", K::KIND, e);
        }
        result
    }
}

async fn dispatch_loop<K: Resource>(
    mut rx: mpsc::UnboundedReceiver<Delta<K>>,
    handlers: Arc<RwLock<Vec<SharedHandler<K>>>>,
    stop: CancellationToken,
) {
    loop {
        let delta = tokio::select! {
            biased;
            delta = rx.recv() => delta,
            _ = stop.cancelled() => None,
        };
        let Some(delta) = delta else {
            return;
        };

        let current: Vec<SharedHandler<K>> = handlers.read().clone();
        for handler in &current {
            match &delta {
                Delta::Added(obj) => handler.on_add(obj),
                Delta::Updated { old, new } => handler.on_update(old, new),
                Delta::Deleted(obj) => handler.on_delete(obj),
            }
        }
    }
}
