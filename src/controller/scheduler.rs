//! Pod scheduler
//!
//! Watches pods and nodes through informers and binds every unscheduled pod
//! to a node by writing `spec.nodeName`. Nodes are picked round-robin among
//! those that are schedulable, match the pod's node selector and report
//! `Ready`. When no node reports a status yet, every matching node is a
//! candidate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::worker::{
    retry_on_conflict, ReconcileError, Reconciler, Worker, DEFAULT_RETRY_INTERVAL,
};
use crate::cache::{FnHandler, Informer, Store, WorkQueue};
use crate::client::{ClientError, ReconnectPolicy, ResourceClient};
use crate::resources::{LabelSelector, Node, NodePhase, Pod};

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub workers: usize,
    pub retry_interval: Duration,
    pub conflict_retries: u32,
    pub reconnect: ReconnectPolicy,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            conflict_retries: 5,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

pub struct Scheduler {
    pods: Arc<dyn ResourceClient<Pod>>,
    pod_informer: Arc<Informer<Pod>>,
    node_informer: Arc<Informer<Node>>,
    queue: Arc<WorkQueue<String>>,
    next_node: AtomicUsize,
    options: SchedulerOptions,
}

impl Scheduler {
    pub fn new(
        pods: Arc<dyn ResourceClient<Pod>>,
        nodes: Arc<dyn ResourceClient<Node>>,
        options: SchedulerOptions,
    ) -> Arc<Self> {
        let pod_informer = Arc::new(Informer::with_policy(
            pods.clone(),
            options.reconnect.clone(),
        ));
        let node_informer = Arc::new(Informer::with_policy(nodes, options.reconnect.clone()));
        let queue = Arc::new(WorkQueue::new());

        let (on_add, on_update) = (queue.clone(), queue.clone());
        pod_informer.add_event_handler(
            FnHandler::new()
                .on_add(move |pod: &Pod| {
                    if !pod.is_scheduled() {
                        on_add.enqueue(pod.metadata.uid.clone());
                    }
                })
                .on_update(move |_, pod: &Pod| {
                    if !pod.is_scheduled() {
                        on_update.enqueue(pod.metadata.uid.clone());
                    }
                }),
        );

        // A new or recovered node may unblock pods that found no candidate
        let (pending, waiting) = (pod_informer.store(), queue.clone());
        let (pending_update, waiting_update) = (pod_informer.store(), queue.clone());
        node_informer.add_event_handler(
            FnHandler::new()
                .on_add(move |_: &Node| enqueue_unscheduled(&pending, &waiting))
                .on_update(move |_, _: &Node| {
                    enqueue_unscheduled(&pending_update, &waiting_update)
                }),
        );

        Arc::new(Self {
            pods,
            pod_informer,
            node_informer,
            queue,
            next_node: AtomicUsize::new(0),
            options,
        })
    }

    pub fn pod_store(&self) -> Store<Pod> {
        self.pod_informer.store()
    }

    pub fn node_store(&self) -> Store<Node> {
        self.node_informer.store()
    }

    /// Run informers and workers until `stop` fires
    pub async fn run(self: Arc<Self>, stop: CancellationToken) -> Result<(), ClientError> {
        info!("Starting scheduler with {} workers", self.options.workers);

        let pod_informer = self.pod_informer.clone();
        let pods_stop = stop.clone();
        let pods = tokio::spawn(async move { pod_informer.run(pods_stop).await });

        let node_informer = self.node_informer.clone();
        let nodes_stop = stop.clone();
        let nodes = tokio::spawn(async move { node_informer.run(nodes_stop).await });

        if !self.pod_informer.wait_for_sync(&stop).await
            || !self.node_informer.wait_for_sync(&stop).await
        {
            info!("Scheduler stopped before caches synced");
        } else {
            info!("Scheduler caches synced");
            let worker = Worker::new("scheduler", self.queue.clone(), self.clone())
                .with_retry_interval(self.options.retry_interval);
            let handles: Vec<_> = (0..self.options.workers.max(1))
                .map(|_| {
                    let worker = worker.clone();
                    let stop = stop.clone();
                    tokio::spawn(async move { worker.run(stop).await })
                })
                .collect();
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!("Scheduler worker failed: {}", e);
                }
            }
        }

        // Workers only return on stop; informers end with it
        stop.cancel();
        let mut result = Ok(());
        for informer in [pods, nodes] {
            match informer.await {
                Ok(Err(e)) => result = Err(e),
                Err(e) => warn!("Scheduler informer task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
        info!("Scheduler stopped");
        result
    }

    /// Candidate node for `pod`, or `None` if nothing fits.
    ///
    /// The round-robin cursor only advances once a bind lands.
    fn pick_node(&self, pod: &Pod) -> Option<String> {
        let selector = LabelSelector {
            match_labels: pod.spec.node_selector.clone(),
        };
        let matching: Vec<Arc<Node>> = self
            .node_informer
            .store()
            .list()
            .into_iter()
            .filter(|node| node.spec.schedulable && selector.matches(&node.metadata.labels))
            .collect();

        let reporting = matching.iter().any(|node| node.status.is_some());
        let mut candidates: Vec<&Arc<Node>> = matching
            .iter()
            .filter(|node| !reporting || node.phase() == NodePhase::Ready)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

        let index = self.next_node.load(Ordering::Relaxed) % candidates.len();
        Some(candidates[index].metadata.name.clone())
    }
}

fn enqueue_unscheduled(pods: &Store<Pod>, queue: &WorkQueue<String>) {
    for pod in pods.list() {
        if !pod.is_scheduled() {
            queue.enqueue(pod.metadata.uid.clone());
        }
    }
}

#[async_trait]
impl Reconciler<String> for Scheduler {
    async fn reconcile(&self, uid: &String) -> Result<(), ReconcileError> {
        let Some(cached) = self.pod_informer.store().get(uid) else {
            debug!("Pod {} no longer exists, nothing to schedule", uid);
            return Ok(());
        };
        if cached.is_scheduled() {
            return Ok(());
        }

        let node = self.pick_node(&cached).ok_or_else(|| {
            ReconcileError::NotReady(format!(
                "no schedulable node for pod '{}'",
                cached.metadata.name
            ))
        })?;

        let bound = retry_on_conflict(self.options.conflict_retries, || {
            let pods = self.pods.clone();
            let node = node.clone();
            let uid = uid.clone();
            async move {
                let mut pod = pods.get(&uid).await?;
                if pod.is_scheduled() {
                    return Ok(None);
                }
                pod.spec.node_name = Some(node);
                pods.put(&uid, &pod).await.map(Some)
            }
        })
        .await;

        match bound {
            Ok(Some(version)) => {
                self.next_node.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Bound pod '{}' ({}) to node '{}' at version {}",
                    cached.metadata.name, uid, node, version
                );
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(ClientError::NotFound(_)) => {
                debug!("Pod {} deleted before it could be bound", uid);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
