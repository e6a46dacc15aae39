//! Pod resource - the schedulable unit
//!
//! A Pod groups one or more containers. The scheduler binds it to a node by
//! setting `spec.nodeName`; the node agent reports progress through status.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{ObjectMeta, Resource, TypeMeta};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: PodSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PodStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,

    /// Node the pod is bound to; unset until scheduled
    #[serde(rename = "nodeName")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    /// Node labels required for placement
    #[serde(rename = "nodeSelector")]
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub node_selector: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodStatus {
    #[serde(default)]
    pub phase: PodPhase,

    #[serde(rename = "podIP")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Pod {
    pub fn new(name: impl Into<String>, containers: Vec<Container>) -> Self {
        Self {
            type_meta: TypeMeta::of::<Pod>(),
            metadata: ObjectMeta::named(name),
            spec: PodSpec {
                containers,
                ..Default::default()
            },
            status: None,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.spec.node_name.is_some()
    }
}

impl Container {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: Vec::new(),
        }
    }
}

impl Resource for Pod {
    const KIND: &'static str = "Pod";
    const PLURAL: &'static str = "pods";
    type Status = PodStatus;

    fn type_meta_mut(&mut self) -> &mut TypeMeta {
        &mut self.type_meta
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn status(&self) -> Option<&PodStatus> {
        self.status.as_ref()
    }

    fn set_status(&mut self, status: Option<PodStatus>) {
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_deserialization() {
        let json = r#"{
            "apiVersion": "minik8s/v1",
            "kind": "Pod",
            "metadata": {"name": "web", "resourceVersion": "101"},
            "spec": {
                "containers": [{"name": "nginx", "image": "nginx:1.25"}],
                "nodeSelector": {"disk": "ssd"}
            }
        }"#;

        let pod: Pod = serde_json::from_str(json).unwrap();
        assert_eq!(pod.type_meta.kind, "Pod");
        assert_eq!(pod.metadata.namespace, "default");
        assert_eq!(pod.metadata.resource_version(), Some(101));
        assert_eq!(pod.spec.containers[0].image, "nginx:1.25");
        assert!(!pod.is_scheduled());
        assert!(pod.status.is_none());
    }

    #[test]
    fn test_pod_serialization_skips_empty() {
        let pod = Pod::new("web", vec![Container::new("nginx", "nginx")]);
        let json = serde_json::to_value(&pod).unwrap();
        assert_eq!(json["apiVersion"], "minik8s/v1");
        assert!(json["spec"].get("nodeName").is_none());
        assert!(json.get("status").is_none());
    }
}
