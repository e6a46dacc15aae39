//! Client-side caching: reflectors, informers and work queues

pub mod handler;
pub mod reflector;
pub mod store;
pub mod workqueue;

pub use handler::{FnHandler, ResourceEventHandler};
pub use reflector::{Delta, Informer, Reflector, ReflectorState};
pub use store::Store;
pub use workqueue::WorkQueue;
