//! Watch broker - fans backing-store notifications out to subscribers
//!
//! Each subscriber gets its own unbounded channel so a slow watcher never
//! stalls writers. Publishing happens while the backend holds its write
//! lock, which is what gives every subscriber revision order.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::trace;

use super::backend::{KvEvent, WatchTarget};

struct Subscriber {
    target: WatchTarget,
    tx: mpsc::UnboundedSender<KvEvent>,
}

#[derive(Default)]
struct BrokerInner {
    next_id: AtomicU64,
    subscribers: DashMap<u64, Subscriber>,
}

/// Registry of live watch subscriptions
#[derive(Clone, Default)]
pub struct WatchBroker {
    inner: Arc<BrokerInner>,
}

impl WatchBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. `backlog` is delivered before any live event.
    pub fn subscribe(&self, target: WatchTarget, backlog: Vec<KvEvent>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in backlog {
            // Receiver is still in scope, cannot fail
            let _ = tx.send(event);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        trace!("Watch subscriber {} registered for {:?}", id, target);
        self.inner.subscribers.insert(id, Subscriber { target, tx });

        Subscription {
            id,
            broker: Arc::downgrade(&self.inner),
            rx,
        }
    }

    /// Deliver an event to every matching subscriber
    pub fn publish(&self, event: &KvEvent) {
        let mut gone = Vec::new();
        for entry in self.inner.subscribers.iter() {
            if entry.target.matches(&event.kv.key) && entry.tx.send(event.clone()).is_err() {
                gone.push(*entry.key());
            }
        }
        for id in gone {
            self.inner.subscribers.remove(&id);
        }
    }

    /// Drop every subscriber; their streams end
    pub fn close_all(&self) {
        self.inner.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

/// A live watch: cancel handle plus event receiver.
///
/// Dropping the subscription cancels it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    broker: Weak<BrokerInner>,
    rx: mpsc::UnboundedReceiver<KvEvent>,
}

impl Subscription {
    /// Next event, or `None` once canceled or the store closed
    pub async fn recv(&mut self) -> Option<KvEvent> {
        self.rx.recv().await
    }

    /// Unregister from the broker. Safe to call more than once.
    pub fn cancel(&mut self) {
        if let Some(inner) = self.broker.upgrade() {
            if inner.subscribers.remove(&self.id).is_some() {
                trace!("Watch subscriber {} canceled", self.id);
            }
        }
        self.rx.close();
    }
}

impl Stream for Subscription {
    type Item = KvEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<KvEvent>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
