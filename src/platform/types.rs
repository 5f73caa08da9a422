//! Resource model shared with the orchestration platform.
//!
//! Field names follow the platform's JSON so that pod lists and cluster
//! resources can be read straight from `kubectl ... -o json` output.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const APP_LABEL: &str = "app";
pub const APP_NAME: &str = "redis";
pub const CLUSTER_LABEL: &str = "redis-cluster";
pub const ROLE_LABEL: &str = "redis-node-role";
pub const NODE_NUMBER_LABEL: &str = "node-number";
pub const LEADER_NUMBER_LABEL: &str = "leader-number";

/// Name of the container running the data store inside each pod
pub const REDIS_CONTAINER: &str = "redis-container";

/// Role a pod was created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodRole {
    Leader,
    Follower,
}

impl fmt::Display for PodRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leader => write!(f, "leader"),
            Self::Follower => write!(f, "follower"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatus {
    #[serde(default, rename = "podIP")]
    pub pod_ip: String,
    #[serde(default)]
    pub conditions: Vec<PodCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// Pod IP; empty until the pod is scheduled.
    pub fn ip(&self) -> &str {
        &self.status.pod_ip
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }

    /// Raw `node-number` label, empty when missing.
    pub fn node_number(&self) -> &str {
        self.label(NODE_NUMBER_LABEL).unwrap_or("")
    }

    /// Raw `leader-number` label, empty when missing.
    pub fn leader_number(&self) -> &str {
        self.label(LEADER_NUMBER_LABEL).unwrap_or("")
    }

    /// Carries a deletion marker.
    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == "True")
    }
}

/// Pod list as returned by the platform (`{"items": [...]}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodList {
    #[serde(default)]
    pub items: Vec<Pod>,
}

/// Coarse lifecycle state of a managed cluster, persisted in its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClusterState {
    #[default]
    NotExists,
    InitializingFollowers,
    Ready,
    Recovering,
    Updating,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotExists => write!(f, "NotExists"),
            Self::InitializingFollowers => write!(f, "InitializingFollowers"),
            Self::Ready => write!(f, "Ready"),
            Self::Recovering => write!(f, "Recovering"),
            Self::Updating => write!(f, "Updating"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisClusterSpec {
    pub leader_count: usize,
    pub leader_followers_count: usize,
    /// Overrides the image of the data-store container in the pod template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub redis_pod_spec: PodSpec,
}

impl RedisClusterSpec {
    /// Containers every pod is expected to run.
    pub fn desired_containers(&self) -> Vec<Container> {
        let mut containers = self.redis_pod_spec.containers.clone();
        if let Some(image) = &self.image {
            for container in containers.iter_mut().filter(|c| c.name == REDIS_CONTAINER) {
                container.image = image.clone();
            }
        }
        containers
    }

    /// Total number of nodes: leaders plus their followers.
    pub fn node_count(&self) -> usize {
        self.leader_count * (self.leader_followers_count + 1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisClusterStatus {
    #[serde(default)]
    pub cluster_state: ClusterState,
}

/// The managed cluster resource: desired shape plus persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisCluster {
    pub metadata: ObjectMeta,
    pub spec: RedisClusterSpec,
    #[serde(default)]
    pub status: RedisClusterStatus,
}

impl RedisCluster {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }
}
