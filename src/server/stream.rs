//! Watch response bodies
//!
//! A watch body is a sequence of event frames followed by exactly one status
//! frame: `OK` when the watch ended normally (object deleted, server
//! shutting down) and `ERR` when the backing store went away or a frame
//! could not be encoded.

use std::convert::Infallible;

use axum::body::Body;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::resources::ApiStatus;
use crate::storage::{EventKind, Subscription};
use crate::watch::{encode_event, encode_status};

/// Content type of watch responses
pub const WATCH_CONTENT_TYPE: &str = "application/vnd.minik8s.watch+json";

/// What a watch is subscribed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchScope {
    /// A single object; the stream ends after its deletion
    One,
    Collection,
}

/// Stream a subscription as a framed response body
pub fn watch_body(
    mut subscription: Subscription,
    scope: WatchScope,
    shutdown: CancellationToken,
) -> Body {
    let frames = async_stream::stream! {
        let terminal = loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => None,
                event = subscription.recv() => Some(event),
            };
            let event = match next {
                None => {
                    debug!("Watch closed by server shutdown");
                    break ApiStatus::ok();
                }
                Some(None) => break ApiStatus::err("backing store closed"),
                Some(Some(event)) => event,
            };

            let frame = match encode_event(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Failed to encode watch event for {}: {}", event.kv.key, e);
                    break ApiStatus::err(e.to_string());
                }
            };
            yield Ok::<_, Infallible>(frame);

            if scope == WatchScope::One && event.kind == EventKind::Delete {
                break ApiStatus::ok();
            }
        };

        subscription.cancel();
        match encode_status(&terminal) {
            Ok(frame) => yield Ok(frame),
            Err(e) => warn!("Failed to encode terminal watch frame: {}", e),
        }
    };
    Body::from_stream(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::storage::{MemoryBackend, VersionedStore};
    use crate::watch::{WireFrame, FRAME_DELIMITER};

    async fn collect_frames(body: Body) -> Vec<WireFrame> {
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        bytes
            .split(|b| *b == FRAME_DELIMITER)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| serde_json::from_slice(chunk).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_single_object_stream_ends_after_delete() {
        let backend = Arc::new(MemoryBackend::new());
        let store = VersionedStore::new(backend);
        store.put("/registry/pods/a", "{}").await.unwrap();

        let sub = store.watch("/registry/pods/a").await.unwrap();
        let body = watch_body(sub, WatchScope::One, CancellationToken::new());

        store.put("/registry/pods/a", "{}").await.unwrap();
        store.delete("/registry/pods/a").await.unwrap();

        let frames = collect_frames(body).await;
        assert_eq!(frames.len(), 3);
        assert!(matches!(&frames[0], WireFrame::Event(_)));
        assert!(matches!(&frames[1], WireFrame::Event(_)));
        assert_eq!(frames[2], WireFrame::Status(ApiStatus::ok()));
    }

    #[tokio::test]
    async fn test_shutdown_ends_stream_with_ok() {
        let store = VersionedStore::new(Arc::new(MemoryBackend::new()));
        let sub = store.watch_all_with_prefix("/registry/pods/").await.unwrap();
        let shutdown = CancellationToken::new();
        let body = watch_body(sub, WatchScope::Collection, shutdown.clone());

        store.put("/registry/pods/a", "{}").await.unwrap();
        shutdown.cancel();

        let frames = collect_frames(body).await;
        assert_eq!(frames.last(), Some(&WireFrame::Status(ApiStatus::ok())));
    }

    #[tokio::test]
    async fn test_closed_store_ends_stream_with_err() {
        let backend = Arc::new(MemoryBackend::new());
        let store = VersionedStore::new(backend.clone());
        let sub = store.watch_all_with_prefix("/registry/pods/").await.unwrap();
        let body = watch_body(sub, WatchScope::Collection, CancellationToken::new());

        backend.close();

        let frames = collect_frames(body).await;
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            WireFrame::Status(status) => assert!(!status.is_ok()),
            WireFrame::Event(_) => panic!("expected status frame"),
        }
    }
}
