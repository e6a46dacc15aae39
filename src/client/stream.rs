//! Client side of the watch stream
//!
//! [`Decoder`] turns raw body chunks into frames. [`StreamWatcher`] runs a
//! decode task per watch and hands typed events to the consumer.

use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::ClientError;
use crate::resources::{ApiStatus, Resource};
use crate::watch::{WatchEvent, WireFrame, FRAME_DELIMITER};

/// Incremental frame decoder
#[derive(Debug, Default)]
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete frame, `None` if more bytes are needed
    pub fn next_frame(&mut self) -> Result<Option<WireFrame>, ClientError> {
        let Some(pos) = self.buffer.iter().position(|b| *b == FRAME_DELIMITER) else {
            return Ok(None);
        };
        let mut frame = self.buffer.split_to(pos + 1);
        frame[pos] = b'\n';
        Ok(Some(serde_json::from_slice(&frame)?))
    }

    /// Check for a truncated frame once the body has ended
    pub fn finish(&self) -> Result<(), ClientError> {
        if self.buffer.iter().all(u8::is_ascii_whitespace) {
            Ok(())
        } else {
            Err(ClientError::Decode(format!(
                "stream ended inside a frame ({} bytes pending)",
                self.buffer.len()
            )))
        }
    }
}

/// Typed view over one watch response body.
///
/// Events arrive in order. A decode or transport failure yields one `Error`
/// event and then the stream ends; a clean end of stream just ends it.
#[derive(Debug)]
pub struct StreamWatcher<K> {
    rx: mpsc::Receiver<WatchEvent<K>>,
    done: CancellationToken,
}

impl<K: Resource> StreamWatcher<K> {
    pub fn new<S, E>(body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let done = CancellationToken::new();
        tokio::spawn(decode_loop::<K, E>(Box::pin(body), tx, done.clone()));
        Self { rx, done }
    }

    /// Next event, `None` once the stream is over
    pub async fn next_event(&mut self) -> Option<WatchEvent<K>> {
        self.rx.recv().await
    }
}

impl<K> StreamWatcher<K> {
    /// Stop decoding. Safe to call more than once.
    pub fn stop(&self) {
        self.done.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.done.is_cancelled()
    }
}

impl<K> Stream for StreamWatcher<K> {
    type Item = WatchEvent<K>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<K> Drop for StreamWatcher<K> {
    fn drop(&mut self) {
        self.done.cancel();
    }
}

async fn decode_loop<K, E>(
    mut body: Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>,
    tx: mpsc::Sender<WatchEvent<K>>,
    done: CancellationToken,
) where
    K: Resource,
    E: Display + Send + 'static,
{
    let mut decoder = Decoder::new();
    loop {
        let chunk = tokio::select! {
            _ = done.cancelled() => return,
            chunk = body.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => decoder.push(&bytes),
            Some(Err(e)) => {
                fail(&tx, &done, ClientError::Transport(e.to_string())).await;
                return;
            }
            None => {
                if let Err(e) = decoder.finish() {
                    fail(&tx, &done, e).await;
                } else {
                    debug!("Watch stream ended");
                }
                return;
            }
        }

        loop {
            let frame = match decoder.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    fail(&tx, &done, e).await;
                    return;
                }
            };
            match frame {
                WireFrame::Status(status) if status.is_ok() => {
                    debug!("Watch stream completed by server");
                    return;
                }
                WireFrame::Status(status) => {
                    warn!("Watch stream terminated by server: {}", status.message());
                    deliver(&tx, &done, WatchEvent::error(status)).await;
                    return;
                }
                WireFrame::Event(raw) => match WatchEvent::from_wire(raw) {
                    Ok(event) => {
                        if !deliver(&tx, &done, event).await {
                            return;
                        }
                    }
                    Err(e) => {
                        fail(&tx, &done, ClientError::from(e)).await;
                        return;
                    }
                },
            }
        }
    }
}

async fn deliver<K>(
    tx: &mpsc::Sender<WatchEvent<K>>,
    done: &CancellationToken,
    event: WatchEvent<K>,
) -> bool {
    tokio::select! {
        _ = done.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

async fn fail<K>(tx: &mpsc::Sender<WatchEvent<K>>, done: &CancellationToken, error: ClientError) {
    if done.is_cancelled() {
        return;
    }
    warn!("Watch stream failed: {}", error);
    deliver(tx, done, WatchEvent::error(ApiStatus::err(error.to_string()))).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Container, Pod};
    use crate::storage::{EventKind, KeyValue, KvEvent};
    use crate::watch::{encode_event, encode_status, EventType};
    use std::convert::Infallible;
    use std::io;

    fn pod_event(kind: EventKind, create: i64, modified: i64) -> KvEvent {
        let value = Bytes::from(
            serde_json::to_vec(&Pod::new("web", vec![Container::new("c", "img")])).unwrap(),
        );
        let kv = KeyValue {
            key: "/registry/pods/u1".into(),
            value: value.clone(),
            create_revision: create,
            mod_revision: modified,
            version: 1,
        };
        match kind {
            EventKind::Put => KvEvent {
                kind,
                kv,
                prev_kv: None,
            },
            EventKind::Delete => KvEvent {
                kind,
                kv: KeyValue {
                    key: kv.key.clone(),
                    value: Bytes::new(),
                    create_revision: 0,
                    mod_revision: modified + 1,
                    version: 0,
                },
                prev_kv: Some(kv),
            },
        }
    }

    fn chunks(parts: Vec<Bytes>) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        futures::stream::iter(parts.into_iter().map(Ok))
    }

    #[test]
    fn test_decoder_handles_split_frames() {
        let frame = encode_event(&pod_event(EventKind::Put, 101, 101)).unwrap();
        let (head, tail) = frame.split_at(frame.len() / 2);

        let mut decoder = Decoder::new();
        decoder.push(head);
        assert!(decoder.next_frame().unwrap().is_none());
        assert!(decoder.finish().is_err());

        decoder.push(tail);
        assert!(matches!(
            decoder.next_frame().unwrap(),
            Some(WireFrame::Event(_))
        ));
        assert!(decoder.next_frame().unwrap().is_none());
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_decoder_rejects_garbage() {
        let mut decoder = Decoder::new();
        decoder.push(b"{nope}\x1e");
        assert!(matches!(decoder.next_frame(), Err(ClientError::Decode(_))));
    }

    #[tokio::test]
    async fn test_watcher_classifies_events() {
        let mut body = BytesMut::new();
        body.extend_from_slice(&encode_event(&pod_event(EventKind::Put, 101, 101)).unwrap());
        body.extend_from_slice(&encode_event(&pod_event(EventKind::Put, 101, 102)).unwrap());
        body.extend_from_slice(&encode_event(&pod_event(EventKind::Delete, 101, 102)).unwrap());
        body.extend_from_slice(&encode_status(&ApiStatus::ok()).unwrap());

        let mut watcher = StreamWatcher::<Pod>::new(chunks(vec![body.freeze()]));
        let mut types = Vec::new();
        while let Some(event) = watcher.next_event().await {
            types.push(event.event_type);
        }
        assert_eq!(
            types,
            vec![EventType::Added, EventType::Modified, EventType::Deleted]
        );
    }

    #[tokio::test]
    async fn test_deleted_object_carries_last_version() {
        let frame = encode_event(&pod_event(EventKind::Delete, 101, 102)).unwrap();
        let mut watcher = StreamWatcher::<Pod>::new(chunks(vec![frame]));
        let event = watcher.next_event().await.unwrap();
        assert_eq!(event.mod_revision, 103);
        assert_eq!(
            event.resource().unwrap().metadata.resource_version(),
            Some(102)
        );
    }

    #[tokio::test]
    async fn test_clean_eof_is_silent() {
        let frame = encode_event(&pod_event(EventKind::Put, 101, 101)).unwrap();
        let mut watcher = StreamWatcher::<Pod>::new(chunks(vec![frame]));
        assert_eq!(
            watcher.next_event().await.unwrap().event_type,
            EventType::Added
        );
        assert!(watcher.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_truncated_stream_yields_one_error() {
        let frame = encode_event(&pod_event(EventKind::Put, 101, 101)).unwrap();
        let partial = frame.slice(..frame.len() - 5);
        let mut watcher = StreamWatcher::<Pod>::new(chunks(vec![partial]));

        let event = watcher.next_event().await.unwrap();
        assert_eq!(event.event_type, EventType::Error);
        assert!(event.error_status().is_some());
        assert!(watcher.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_transport_error_yields_one_error() {
        let parts: Vec<Result<Bytes, io::Error>> =
            vec![Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))];
        let mut watcher = StreamWatcher::<Pod>::new(futures::stream::iter(parts));

        let event = watcher.next_event().await.unwrap();
        assert_eq!(event.event_type, EventType::Error);
        assert!(event.error_status().unwrap().message().contains("reset"));
        assert!(watcher.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_server_err_status_becomes_error_event() {
        let frame = encode_status(&ApiStatus::err("backing store closed")).unwrap();
        let mut watcher = StreamWatcher::<Pod>::new(chunks(vec![frame]));
        let event = watcher.next_event().await.unwrap();
        assert_eq!(event.event_type, EventType::Error);
        assert!(watcher.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (_tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(1);
        let body = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let mut watcher = StreamWatcher::<Pod>::new(body);

        watcher.stop();
        watcher.stop();
        assert!(watcher.is_stopped());
        assert!(watcher.next_event().await.is_none());
    }
}
