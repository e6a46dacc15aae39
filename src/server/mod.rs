//! API server: resource endpoints, watch streams and HTTP routes

pub mod endpoint;
pub mod error;
pub mod handlers;
pub mod state;
pub mod stream;

pub use endpoint::{AllocationGuard, Created, ResourceEndpoint, VersionAllocator};
pub use error::ApiError;
pub use handlers::{create_router, WatchQuery};
pub use state::ApiState;
pub use stream::{watch_body, WatchScope, WATCH_CONTENT_TYPE};
