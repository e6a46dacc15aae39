//! Typed watch events
//!
//! A raw notification becomes a [`WatchEvent`] once its value is decoded into
//! the resource kind of the subscription. There is no creation flag on the
//! wire: a put whose create revision equals its mod revision is an `Added`,
//! any later put is a `Modified`.

use serde::{Deserialize, Serialize};

use super::frame::{WireEvent, WireEventType};
use crate::resources::{ApiStatus, Resource};

/// Types of watch events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "ADDED")]
    Added,
    #[serde(rename = "MODIFIED")]
    Modified,
    #[serde(rename = "DELETED")]
    Deleted,
    /// Reserved, never produced by the server
    #[serde(rename = "BOOKMARK")]
    Bookmark,
    /// Synthetic event wrapping a decode or transport failure
    #[serde(rename = "ERROR")]
    Error,
}

/// Classify a put or delete notification
pub fn classify(event_type: WireEventType, create_revision: i64, mod_revision: i64) -> EventType {
    match event_type {
        WireEventType::Delete => EventType::Deleted,
        WireEventType::Put if create_revision == mod_revision => EventType::Added,
        WireEventType::Put => EventType::Modified,
    }
}

/// Payload of a watch event
#[derive(Debug, Clone)]
pub enum WatchObject<K> {
    Resource(K),
    /// Stand-in object carried by `Error` events
    Status(ApiStatus),
}

/// Watch event for resource changes
#[derive(Debug, Clone)]
pub struct WatchEvent<K> {
    pub event_type: EventType,
    pub key: String,
    pub object: WatchObject<K>,
    pub create_revision: i64,
    pub mod_revision: i64,
    pub version: i64,
}

impl<K: Resource> WatchEvent<K> {
    /// Re-hydrate a raw notification into a typed event.
    ///
    /// Deletes carry the object as it was before removal.
    pub fn from_wire(event: WireEvent) -> Result<Self, serde_json::Error> {
        let event_type = classify(
            event.event_type,
            event.kv.create_revision,
            event.kv.mod_revision,
        );
        let (payload, object_version) = match (event.event_type, &event.prev_kv) {
            (WireEventType::Delete, Some(prev)) => (&prev.value, prev.mod_revision),
            (WireEventType::Delete, None) => {
                return Err(serde::de::Error::custom(format!(
                    "delete of {} carries no previous value",
                    event.kv.key
                )))
            }
            (WireEventType::Put, _) => (&event.kv.value, event.kv.mod_revision),
        };
        let mut object: K = serde_json::from_slice(payload)?;
        object.metadata_mut().set_resource_version(object_version);

        Ok(Self {
            event_type,
            key: event.kv.key,
            object: WatchObject::Resource(object),
            create_revision: event.kv.create_revision,
            mod_revision: event.kv.mod_revision,
            version: event.kv.version,
        })
    }
}

impl<K> WatchEvent<K> {
    /// Synthetic error event
    pub fn error(status: ApiStatus) -> Self {
        Self {
            event_type: EventType::Error,
            key: String::new(),
            object: WatchObject::Status(status),
            create_revision: 0,
            mod_revision: 0,
            version: 0,
        }
    }

    pub fn resource(&self) -> Option<&K> {
        match &self.object {
            WatchObject::Resource(obj) => Some(obj),
            WatchObject::Status(_) => None,
        }
    }

    pub fn into_resource(self) -> Option<K> {
        match self.object {
            WatchObject::Resource(obj) => Some(obj),
            WatchObject::Status(_) => None,
        }
    }

    pub fn error_status(&self) -> Option<&ApiStatus> {
        match &self.object {
            WatchObject::Status(status) => Some(status),
            WatchObject::Resource(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Container, Pod};
    use crate::watch::frame::WireKeyValue;

    fn pod_bytes(name: &str) -> Vec<u8> {
        serde_json::to_vec(&Pod::new(name, vec![Container::new("c", "img")])).unwrap()
    }

    fn kv(value: Vec<u8>, create: i64, modified: i64) -> WireKeyValue {
        WireKeyValue {
            key: "/registry/pods/u1".into(),
            value,
            create_revision: create,
            mod_revision: modified,
            version: 1,
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(WireEventType::Put, 5, 5), EventType::Added);
        assert_eq!(classify(WireEventType::Put, 5, 6), EventType::Modified);
        assert_eq!(classify(WireEventType::Delete, 0, 7), EventType::Deleted);
    }

    #[test]
    fn test_added_then_modified() {
        let added = WatchEvent::<Pod>::from_wire(WireEvent {
            event_type: WireEventType::Put,
            kv: kv(pod_bytes("web"), 101, 101),
            prev_kv: None,
        })
        .unwrap();
        assert_eq!(added.event_type, EventType::Added);
        assert_eq!(added.resource().unwrap().metadata.name, "web");

        let modified = WatchEvent::<Pod>::from_wire(WireEvent {
            event_type: WireEventType::Put,
            kv: kv(pod_bytes("web"), 101, 102),
            prev_kv: None,
        })
        .unwrap();
        assert_eq!(modified.event_type, EventType::Modified);
        assert_eq!(modified.mod_revision, 102);
    }

    #[test]
    fn test_deleted_uses_previous_value() {
        let deleted = WatchEvent::<Pod>::from_wire(WireEvent {
            event_type: WireEventType::Delete,
            kv: kv(Vec::new(), 0, 103),
            prev_kv: Some(kv(pod_bytes("gone"), 101, 102)),
        })
        .unwrap();
        assert_eq!(deleted.event_type, EventType::Deleted);
        assert_eq!(deleted.resource().unwrap().metadata.name, "gone");

        let missing = WatchEvent::<Pod>::from_wire(WireEvent {
            event_type: WireEventType::Delete,
            kv: kv(Vec::new(), 0, 103),
            prev_kv: None,
        });
        assert!(missing.is_err());
    }

    #[test]
    fn test_error_event() {
        let event = WatchEvent::<Pod>::error(ApiStatus::err("boom"));
        assert_eq!(event.event_type, EventType::Error);
        assert!(event.resource().is_none());
        assert_eq!(event.error_status().unwrap().message(), "boom");
    }
}
