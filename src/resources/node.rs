//! Node resource - a machine that can run pods

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ObjectMeta, Resource, TypeMeta};

/// Default port of the node agent
pub const DEFAULT_NODE_PORT: u16 = 10250;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    pub metadata: ObjectMeta,

    pub spec: NodeSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Address where this node can be reached (e.g., "192.168.1.100")
    pub address: String,

    #[serde(default = "default_node_port")]
    pub port: u16,

    /// Whether this node can accept new pods
    #[serde(default = "default_true")]
    pub schedulable: bool,
}

fn default_node_port() -> u16 {
    DEFAULT_NODE_PORT
}

fn default_true() -> bool {
    true
}

/// Phase of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NodePhase {
    Ready,
    NotReady,
    /// Node status is unknown (missed heartbeats)
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(default)]
    pub phase: NodePhase,

    #[serde(rename = "lastHeartbeat")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Node {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            type_meta: TypeMeta::of::<Node>(),
            metadata: ObjectMeta::named(name),
            spec: NodeSpec {
                address: address.into(),
                port: DEFAULT_NODE_PORT,
                schedulable: true,
            },
            status: None,
        }
    }

    pub fn phase(&self) -> NodePhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }
}

impl Resource for Node {
    const KIND: &'static str = "Node";
    const PLURAL: &'static str = "nodes";
    type Status = NodeStatus;

    fn type_meta_mut(&mut self) -> &mut TypeMeta {
        &mut self.type_meta
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn status(&self) -> Option<&NodeStatus> {
        self.status.as_ref()
    }

    fn set_status(&mut self, status: Option<NodeStatus>) {
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_defaults() {
        let json = r#"{
            "apiVersion": "minik8s/v1",
            "kind": "Node",
            "metadata": {"name": "worker-1"},
            "spec": {"address": "192.168.1.100"}
        }"#;

        let node: Node = serde_json::from_str(json).unwrap();
        assert_eq!(node.spec.port, DEFAULT_NODE_PORT);
        assert!(node.spec.schedulable);
        assert_eq!(node.phase(), NodePhase::Unknown);
    }
}
