//! ReplicaSet resource - keeps a number of identical pods running

use serde::{Deserialize, Serialize};

use super::pod::PodSpec;
use super::{LabelSelector, ObjectMeta, Resource, TypeMeta};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaSet {
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    pub metadata: ObjectMeta,

    pub spec: ReplicaSetSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReplicaSetStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetSpec {
    #[serde(default = "default_replicas")]
    pub replicas: u32,

    #[serde(default)]
    pub selector: LabelSelector,

    pub template: PodTemplate,
}

fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodTemplate {
    #[serde(default)]
    pub metadata: ObjectMeta,

    pub spec: PodSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetStatus {
    #[serde(default)]
    pub replicas: u32,

    #[serde(rename = "readyReplicas")]
    #[serde(default)]
    pub ready_replicas: u32,
}

impl Resource for ReplicaSet {
    const KIND: &'static str = "ReplicaSet";
    const PLURAL: &'static str = "replicasets";
    type Status = ReplicaSetStatus;

    fn type_meta_mut(&mut self) -> &mut TypeMeta {
        &mut self.type_meta
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn status(&self) -> Option<&ReplicaSetStatus> {
        self.status.as_ref()
    }

    fn set_status(&mut self, status: Option<ReplicaSetStatus>) {
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicaset_deserialization() {
        let json = r#"{
            "kind": "ReplicaSet",
            "metadata": {"name": "web"},
            "spec": {
                "selector": {"matchLabels": {"app": "web"}},
                "template": {
                    "metadata": {"name": "web", "labels": {"app": "web"}},
                    "spec": {"containers": [{"name": "nginx", "image": "nginx"}]}
                }
            }
        }"#;

        let rs: ReplicaSet = serde_json::from_str(json).unwrap();
        assert_eq!(rs.spec.replicas, 1);
        assert!(rs
            .spec
            .selector
            .matches(&rs.spec.template.metadata.labels));
    }
}
