//! Watch stream framing
//!
//! Each backing-store notification is written as one JSON object followed by
//! [`FRAME_DELIMITER`]. Byte values are base64 encoded, the way etcd renders
//! byte slices in JSON. A stream ends with a status frame.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::resources::ApiStatus;
use crate::storage::{EventKind, KeyValue, KvEvent};

/// Terminates every frame (ASCII record separator)
pub const FRAME_DELIMITER: u8 = 0x1e;

mod base64_bytes {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireEventType {
    #[serde(rename = "PUT")]
    Put,
    #[serde(rename = "DELETE")]
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireKeyValue {
    #[serde(rename = "Key")]
    pub key: String,

    #[serde(rename = "Value", with = "base64_bytes", default)]
    pub value: Vec<u8>,

    #[serde(rename = "CreateRevision", default)]
    pub create_revision: i64,

    #[serde(rename = "ModRevision", default)]
    pub mod_revision: i64,

    #[serde(rename = "Version", default)]
    pub version: i64,
}

/// Raw notification as it travels on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "Type")]
    pub event_type: WireEventType,

    #[serde(rename = "Kv")]
    pub kv: WireKeyValue,

    #[serde(rename = "PrevKv", default)]
    pub prev_kv: Option<WireKeyValue>,
}

/// Any frame that can appear in a watch body
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireFrame {
    Event(WireEvent),
    Status(ApiStatus),
}

impl From<&KeyValue> for WireKeyValue {
    fn from(kv: &KeyValue) -> Self {
        Self {
            key: kv.key.clone(),
            value: kv.value.to_vec(),
            create_revision: kv.create_revision,
            mod_revision: kv.mod_revision,
            version: kv.version,
        }
    }
}

impl From<&KvEvent> for WireEvent {
    fn from(event: &KvEvent) -> Self {
        Self {
            event_type: match event.kind {
                EventKind::Put => WireEventType::Put,
                EventKind::Delete => WireEventType::Delete,
            },
            kv: WireKeyValue::from(&event.kv),
            prev_kv: event.prev_kv.as_ref().map(WireKeyValue::from),
        }
    }
}

fn delimited<T: Serialize>(value: &T) -> Result<Bytes, serde_json::Error> {
    let mut buf = BytesMut::new().writer();
    serde_json::to_writer(&mut buf, value)?;
    let mut buf = buf.into_inner();
    buf.put_u8(FRAME_DELIMITER);
    Ok(buf.freeze())
}

/// Encode one store notification as a delimited frame
pub fn encode_event(event: &KvEvent) -> Result<Bytes, serde_json::Error> {
    delimited(&WireEvent::from(event))
}

/// Encode the terminal status frame
pub fn encode_status(status: &ApiStatus) -> Result<Bytes, serde_json::Error> {
    delimited(status)
}
