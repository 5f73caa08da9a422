//! Rolling replacement of pods whose containers drifted from the desired
//! spec.

use super::ClusterOperator;
use crate::error::{CommandErrorKind, OperatorError, Result};
use crate::platform::{Container, NodeNumbers, Pod};
use crate::rediscli::FailoverMode;
use tracing::{info, warn};

/// Every pod container named like a desired one carries its image and
/// resources. Containers the platform injected are not compared.
fn containers_match(actual: &[Container], desired: &[Container]) -> bool {
    desired.iter().all(|want| {
        actual
            .iter()
            .filter(|have| have.name == want.name)
            .all(|have| have.image == want.image && have.resources == want.resources)
    })
}

impl ClusterOperator {
    pub fn is_pod_up_to_date(&self, pod: &Pod) -> bool {
        containers_match(&pod.spec.containers, &self.cluster.spec.desired_containers())
    }

    /// Whether every pod of the cluster runs the desired containers.
    pub async fn is_cluster_up_to_date(&self) -> Result<bool> {
        let pods = self.platform.list_pods(&self.cluster, None).await?;
        Ok(pods.iter().all(|p| self.is_pod_up_to_date(p)))
    }

    /// Replace outdated followers, then outdated leaders, slot by slot.
    pub async fn update_cluster(&self) -> Result<()> {
        let view = self.cluster_view().await?;
        info!(view = %view, "updating cluster");

        for leader in view.leaders() {
            for follower in &leader.followers {
                let pod = follower.pod.as_ref().ok_or_else(|| {
                    OperatorError::NodeNotFound(format!("follower {}", follower.node_number))
                })?;
                if self.is_pod_up_to_date(pod) {
                    let pods = self.wait_for_pod_ready(std::slice::from_ref(pod)).await?;
                    let ips: Vec<String> = pods.iter().map(|p| p.ip().to_string()).collect();
                    self.wait_for_redis(&ips).await?;
                } else {
                    self.update_follower(pod).await?;
                }
            }

            let pod = leader
                .pod
                .as_ref()
                .ok_or_else(|| OperatorError::NodeNotFound(format!("leader {}", leader.node_number)))?;
            if !self.is_pod_up_to_date(pod) {
                self.update_leader(pod).await?;
            }
        }

        self.forget_lost_nodes().await
    }

    /// Delete an outdated follower and re-add it at the same slot.
    async fn update_follower(&self, pod: &Pod) -> Result<()> {
        info!(follower = %pod.node_number(), "replacing outdated follower");
        let slot = NodeNumbers::of_pod(pod);
        self.platform
            .delete_pods_by_ip(&self.cluster, &[pod.ip().to_string()])
            .await?;
        self.wait_for_pod_delete(std::slice::from_ref(pod)).await?;
        self.add_followers(&[slot]).await
    }

    /// Move leadership off an outdated leader, then replace its pod.
    ///
    /// A leader that lost leadership concurrently is deleted outright; the
    /// next reconcile sees the vacant slot and recovers it.
    async fn update_leader(&self, pod: &Pod) -> Result<()> {
        info!(leader = %pod.node_number(), "replacing outdated leader");
        let leader_ip = pod.ip().to_string();
        let promoted = match self
            .do_failover(&leader_ip, None, FailoverMode::Default)
            .await
        {
            Ok(ip) => ip,
            Err(e) if e.command_kind() == Some(CommandErrorKind::NotMaster) => {
                warn!(leader = %pod.node_number(), "leader is no longer master, deleting it");
                self.platform
                    .delete_pods_by_ip(&self.cluster, &[leader_ip])
                    .await?;
                self.wait_for_pod_delete(std::slice::from_ref(pod)).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        self.platform
            .delete_pods_by_ip(&self.cluster, &[leader_ip])
            .await?;
        self.wait_for_pod_delete(std::slice::from_ref(pod)).await?;
        self.recreate_leader(&promoted).await
    }
}
