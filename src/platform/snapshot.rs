//! Read-only platform backed by a pod list snapshot.

use super::types::{
    ClusterState, Pod, PodList, PodRole, RedisCluster, APP_LABEL, APP_NAME, CLUSTER_LABEL,
    ROLE_LABEL,
};
use super::{NodeNumbers, Orchestrator};
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use std::path::Path;

/// Serves pod reads from a fixed pod list; every mutation is refused.
///
/// Used to inspect a live cluster (view rendering, node-table cleanup)
/// from a `kubectl get pods -o json` dump without platform credentials.
#[derive(Debug, Clone, Default)]
pub struct SnapshotPlatform {
    pods: Vec<Pod>,
}

impl SnapshotPlatform {
    pub fn new(pods: Vec<Pod>) -> Self {
        Self { pods }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let list: PodList = serde_json::from_str(raw)?;
        Ok(Self::new(list.items))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    fn read_only(operation: &str) -> OperatorError {
        OperatorError::Platform(format!("{} is not available on a read-only snapshot", operation))
    }
}

#[async_trait]
impl Orchestrator for SnapshotPlatform {
    async fn list_pods(&self, cluster: &RedisCluster, role: Option<PodRole>) -> Result<Vec<Pod>> {
        let role = role.map(|r| r.to_string());
        Ok(self
            .pods
            .iter()
            .filter(|p| cluster.namespace().is_empty() || p.namespace() == cluster.namespace())
            .filter(|p| p.label(APP_LABEL) == Some(APP_NAME))
            .filter(|p| p.label(CLUSTER_LABEL) == Some(cluster.name()))
            .filter(|p| match &role {
                Some(role) => p.label(ROLE_LABEL) == Some(role.as_str()),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self
            .pods
            .iter()
            .find(|p| p.name() == name && p.namespace() == namespace)
            .cloned())
    }

    async fn pod_by_ip(&self, cluster: &RedisCluster, ip: &str) -> Result<Pod> {
        self.list_pods(cluster, None)
            .await?
            .into_iter()
            .find(|p| p.ip() == ip)
            .ok_or_else(|| OperatorError::NodeNotFound(format!("no pod with IP {}", ip)))
    }

    async fn create_leader_pods(
        &self,
        _cluster: &RedisCluster,
        _leader_numbers: &[String],
    ) -> Result<Vec<Pod>> {
        Err(Self::read_only("create_leader_pods"))
    }

    async fn create_follower_pods(
        &self,
        _cluster: &RedisCluster,
        _slots: &[NodeNumbers],
    ) -> Result<Vec<Pod>> {
        Err(Self::read_only("create_follower_pods"))
    }

    async fn delete_pods_by_ip(
        &self,
        _cluster: &RedisCluster,
        _ips: &[String],
    ) -> Result<Vec<Pod>> {
        Err(Self::read_only("delete_pods_by_ip"))
    }

    async fn delete_pod(&self, _namespace: &str, _name: &str) -> Result<()> {
        Err(Self::read_only("delete_pod"))
    }

    async fn create_settings_config_map(&self, _cluster: &RedisCluster) -> Result<()> {
        Err(Self::read_only("create_settings_config_map"))
    }

    async fn create_service(&self, _cluster: &RedisCluster) -> Result<()> {
        Err(Self::read_only("create_service"))
    }

    async fn update_cluster_state(
        &self,
        _cluster: &RedisCluster,
        _state: ClusterState,
    ) -> Result<()> {
        Err(Self::read_only("update_cluster_state"))
    }
}
