//! Controllers: the shared reconcile loop and the pod scheduler

pub mod scheduler;
pub mod worker;

pub use scheduler::{Scheduler, SchedulerOptions};
pub use worker::{
    retry_on_conflict, ReconcileError, Reconciler, Worker, DEFAULT_RETRY_INTERVAL,
};
