//! minik8s: the resource synchronization core of a miniature cluster
//! control plane.
//!
//! A versioned object store with compare-and-swap writes, an HTTP API that
//! serves CRUD and framed watch streams, and the client machinery built on
//! top of it: stream decoding, reflectors that mirror server state into a
//! local cache, work queues and reconcile loops.

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod controller;
pub mod resources;
pub mod server;
pub mod storage;
pub mod watch;
