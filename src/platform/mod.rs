//! Orchestration platform interface.
//!
//! The platform owns pod lifetime. The operator only asks it to list,
//! create and delete pods and to record the coarse cluster state; every
//! wait on pod readiness or deletion is built on top of [`Orchestrator::get_pod`]
//! with the operator's own bounded polls.

mod snapshot;
mod types;

pub use snapshot::SnapshotPlatform;
pub use types::{
    ClusterState, Container, ObjectMeta, Pod, PodCondition, PodList, PodRole, PodSpec, PodStatus,
    RedisCluster, RedisClusterSpec, RedisClusterStatus, ResourceRequirements, APP_LABEL, APP_NAME,
    CLUSTER_LABEL, LEADER_NUMBER_LABEL, NODE_NUMBER_LABEL, REDIS_CONTAINER, ROLE_LABEL,
};

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// Slot identity of a pod: its node number and the leader number it serves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeNumbers {
    pub node_number: String,
    pub leader_number: String,
}

impl NodeNumbers {
    pub fn new(node_number: impl Into<String>, leader_number: impl Into<String>) -> Self {
        Self {
            node_number: node_number.into(),
            leader_number: leader_number.into(),
        }
    }

    /// Slot numbers read from a pod's labels.
    pub fn of_pod(pod: &Pod) -> Self {
        Self::new(pod.node_number(), pod.leader_number())
    }
}

impl fmt::Display for NodeNumbers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node_number, self.leader_number)
    }
}

/// Pod and resource operations the operator needs from the platform.
///
/// A single shared handle is used from concurrent tasks; reads must be safe
/// to run in parallel.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Pods of `cluster`, optionally restricted to one role.
    async fn list_pods(&self, cluster: &RedisCluster, role: Option<PodRole>) -> Result<Vec<Pod>>;

    /// Current state of a pod, `None` once it is gone.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    /// The pod of `cluster` holding `ip`.
    async fn pod_by_ip(&self, cluster: &RedisCluster, ip: &str) -> Result<Pod>;

    /// Create one leader pod per leader number.
    async fn create_leader_pods(
        &self,
        cluster: &RedisCluster,
        leader_numbers: &[String],
    ) -> Result<Vec<Pod>>;

    /// Create one follower pod per slot.
    async fn create_follower_pods(
        &self,
        cluster: &RedisCluster,
        slots: &[NodeNumbers],
    ) -> Result<Vec<Pod>>;

    /// Delete the pods holding `ips`, returning the pods that were deleted.
    async fn delete_pods_by_ip(&self, cluster: &RedisCluster, ips: &[String]) -> Result<Vec<Pod>>;

    /// Delete one pod by name. Works for pods that have no address yet.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    /// Ensure the data-store settings config map exists.
    async fn create_settings_config_map(&self, cluster: &RedisCluster) -> Result<()>;

    /// Ensure the client-facing service exists.
    async fn create_service(&self, cluster: &RedisCluster) -> Result<()>;

    /// Persist the coarse cluster state in the resource status.
    async fn update_cluster_state(&self, cluster: &RedisCluster, state: ClusterState) -> Result<()>;
}
