//! Resource model shared by the API server and its clients
//!
//! Every object stored by the control plane carries Kubernetes-style type
//! metadata (`apiVersion`, `kind`) and [`ObjectMeta`]. The [`Resource`] trait
//! ties a Rust type to its collection path and storage prefix.

use std::collections::HashMap;
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub mod node;
pub mod pod;
pub mod replicaset;

pub use node::{Node, NodePhase, NodeSpec, NodeStatus};
pub use pod::{Container, Pod, PodPhase, PodSpec, PodStatus};
pub use replicaset::{PodTemplate, ReplicaSet, ReplicaSetSpec, ReplicaSetStatus};

/// API group/version stamped on every object
pub const API_VERSION: &str = "minik8s/v1";

/// Prefix under which all objects live in the backing store
pub const REGISTRY_PREFIX: &str = "/registry";

/// A typed resource kind served by the control plane
pub trait Resource:
    Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static
{
    /// Kind name, e.g. "Pod"
    const KIND: &'static str;

    /// Lowercase plural used in paths, e.g. "pods"
    const PLURAL: &'static str;

    /// Status sub-resource
    type Status: Serialize + DeserializeOwned + Clone + Debug + Default + Send + Sync + 'static;

    fn type_meta_mut(&mut self) -> &mut TypeMeta;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn status(&self) -> Option<&Self::Status>;

    fn set_status(&mut self, status: Option<Self::Status>);

    /// HTTP collection path, e.g. `/api/v1/pods`
    fn collection_path() -> String {
        format!("/api/v1/{}", Self::PLURAL)
    }

    /// Backing-store prefix for the collection (trailing slash included)
    fn storage_prefix() -> String {
        format!("{}/{}/", REGISTRY_PREFIX, Self::PLURAL)
    }

    fn storage_key(uid: &str) -> String {
        format!("{}{}", Self::storage_prefix(), uid)
    }
}

/// `apiVersion` and `kind`, flattened into every object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMeta {
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,

    #[serde(default)]
    pub kind: String,
}

impl TypeMeta {
    pub fn of<K: Resource>() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: K::KIND.to_string(),
        }
    }
}

/// Object metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Human readable name
    pub name: String,

    /// Namespace (defaults to "default")
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Unique identifier, assigned by the server on create
    #[serde(default)]
    pub uid: String,

    /// Global revision at the time of the last write, as a decimal string
    #[serde(rename = "resourceVersion", default)]
    pub resource_version: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,

    #[serde(rename = "creationTimestamp")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: default_namespace(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Parsed resource version; `None` when missing or malformed
    pub fn resource_version(&self) -> Option<i64> {
        self.resource_version.trim().parse().ok()
    }

    pub fn set_resource_version(&mut self, version: i64) {
        self.resource_version = version.to_string();
    }
}

/// Response for listing resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceList<T> {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Kind (e.g., "PodList")
    pub kind: String,

    /// Revision the list is consistent at; watch from here to continue
    #[serde(rename = "resourceVersion")]
    pub resource_version: String,

    pub items: Vec<T>,
}

impl<T> ResourceList<T> {
    pub fn new(kind: impl Into<String>, resource_version: i64, items: Vec<T>) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: kind.into(),
            resource_version: resource_version.to_string(),
            items,
        }
    }

    pub fn revision(&self) -> Option<i64> {
        self.resource_version.parse().ok()
    }
}

/// Label selector for filtering resources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelSelector {
    /// Match exact labels
    #[serde(rename = "matchLabels")]
    #[serde(default)]
    pub match_labels: HashMap<String, String>,
}

impl LabelSelector {
    /// Create a selector that matches a specific label
    pub fn matching(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut labels = HashMap::new();
        labels.insert(key.into(), value.into());
        Self {
            match_labels: labels,
        }
    }

    /// Check if labels match this selector. An empty selector matches all.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

/// Outcome classes reported in API responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusKind {
    #[serde(rename = "OK")]
    Ok,
    /// Request could not be served (not found, bad input, store failure)
    #[serde(rename = "ERR")]
    Err,
    /// Request was well formed but lost a version race
    #[serde(rename = "FAILED")]
    Failed,
}

/// Status body returned by mutating calls and by every error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiStatus {
    pub status: StatusKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(rename = "resourceVersion")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ApiStatus {
    pub fn ok() -> Self {
        Self {
            status: StatusKind::Ok,
            error: None,
            uid: None,
            resource_version: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            status: StatusKind::Err,
            error: Some(message.into()),
            uid: None,
            resource_version: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: StatusKind::Failed,
            error: Some(message.into()),
            uid: None,
            resource_version: None,
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.resource_version = Some(version.to_string());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusKind::Ok
    }

    pub fn version(&self) -> Option<i64> {
        self.resource_version.as_deref().and_then(|v| v.parse().ok())
    }

    pub fn message(&self) -> &str {
        self.error.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_layout() {
        assert_eq!(Pod::collection_path(), "/api/v1/pods");
        assert_eq!(Pod::storage_prefix(), "/registry/pods/");
        assert_eq!(Node::storage_key("abc"), "/registry/nodes/abc");
    }

    #[test]
    fn test_resource_version_parsing() {
        let mut meta = ObjectMeta::named("a");
        assert_eq!(meta.resource_version(), None);
        meta.set_resource_version(101);
        assert_eq!(meta.resource_version, "101");
        assert_eq!(meta.resource_version(), Some(101));
        meta.resource_version = "abc".into();
        assert_eq!(meta.resource_version(), None);
    }

    #[test]
    fn test_resource_list() {
        let list: ResourceList<String> =
            ResourceList::new("StringList", 42, vec!["a".into(), "b".into()]);
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.kind, "StringList");
        assert_eq!(list.revision(), Some(42));
    }

    #[test]
    fn test_label_selector_matches() {
        let selector = LabelSelector::matching("env", "prod");

        let meta = ObjectMeta::named("web")
            .with_label("env", "prod")
            .with_label("app", "web");
        assert!(selector.matches(&meta.labels));

        let mut labels = meta.labels;

        labels.insert("env".to_string(), "dev".to_string());
        assert!(!selector.matches(&labels));
        assert!(LabelSelector::default().matches(&labels));
    }

    #[test]
    fn test_api_status_wire_shape() {
        let json = serde_json::to_value(ApiStatus::ok().with_uid("u1").with_version(101)).unwrap();
        assert_eq!(json["status"], "OK");
        assert_eq!(json["uid"], "u1");
        assert_eq!(json["resourceVersion"], "101");
        assert!(json.get("error").is_none());

        let failed: ApiStatus =
            serde_json::from_str(r#"{"status":"FAILED","error":"stale"}"#).unwrap();
        assert_eq!(failed.status, StatusKind::Failed);
        assert_eq!(failed.message(), "stale");
    }
}
