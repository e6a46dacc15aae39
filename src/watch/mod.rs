//! Watch event stream: wire frames and typed events

pub mod event;
pub mod frame;

pub use event::{classify, EventType, WatchEvent, WatchObject};
pub use frame::{
    encode_event, encode_status, WireEvent, WireEventType, WireFrame, WireKeyValue,
    FRAME_DELIMITER,
};
