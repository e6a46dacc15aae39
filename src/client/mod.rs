//! Client side of the API: typed CRUD calls, watch decoding and reconnect policy

pub mod backoff;
pub mod error;
pub mod http;
pub mod local;
pub mod stream;

pub use backoff::{Backoff, ReconnectPolicy};
pub use error::ClientError;
pub use http::{Api, HttpClient, ResourceClient, DEFAULT_REQUEST_TIMEOUT};
pub use local::LocalClient;
pub use stream::{Decoder, StreamWatcher};
