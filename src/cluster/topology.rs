//! Topology operations: bootstrap, replica join, failover and leader
//! recreation.
//!
//! Every operation here may be re-run after a partial failure. Steps that
//! would fail on a second run (joining a node that already joined,
//! failing over to a node that is already master) are recognised through
//! [`CommandErrorKind`] and treated as done.

use super::ClusterOperator;
use crate::error::{CommandErrorKind, OperatorError, Result};
use crate::platform::{NodeNumbers, Pod, PodRole};
use crate::rediscli::FailoverMode;
use std::collections::BTreeMap;
use tracing::{info, warn};

impl ClusterOperator {
    /// Provision the shared resources and bootstrap the leaders.
    pub async fn create_new_cluster(&self) -> Result<()> {
        info!(cluster = %self.cluster.name(), "creating new cluster");
        self.platform.create_settings_config_map(&self.cluster).await?;
        self.platform.create_service(&self.cluster).await?;
        self.initialize_cluster().await
    }

    /// Create the leader pods and join them into a cluster.
    ///
    /// Leaders go first so the scheduler can spread them before any
    /// follower exists.
    pub async fn initialize_cluster(&self) -> Result<()> {
        let leader_numbers: Vec<String> = (0..self.leader_count()).map(|i| i.to_string()).collect();
        let pods = self
            .platform
            .create_leader_pods(&self.cluster, &leader_numbers)
            .await?;
        let pods = self.wait_for_pod_ready(&pods).await?;
        let leader_ips: Vec<String> = pods.iter().map(|p| p.ip().to_string()).collect();
        self.wait_for_redis(&leader_ips).await?;

        for ip in &leader_ips {
            if let Err(e) = self.commands.flush_all(ip).await {
                warn!(ip = %ip, "flushall failed: {}", e);
            }
            if let Err(e) = self.commands.cluster_reset(ip).await {
                warn!(ip = %ip, "cluster reset failed: {}", e);
            }
        }

        info!(leaders = ?leader_ips, "running cluster create");
        if let Err(e) = self.commands.cluster_create(&leader_ips).await {
            // a bootstrap can report an error after it went through
            let first = leader_ips
                .first()
                .ok_or_else(|| OperatorError::NodeNotFound("no leader pods".to_string()))?;
            let info = self.commands.cluster_info(first).await?;
            if info.is_ok() && info.size() == Some(self.leader_count()) {
                warn!(ip = %first, "cluster create reported an error but the cluster formed: {}", e);
            } else {
                return Err(e);
            }
        }
        self.wait_for_cluster_create(&leader_ips).await
    }

    /// Add `F` followers under every leader.
    pub async fn initialize_followers(&self) -> Result<()> {
        let mut leaders = self
            .platform
            .list_pods(&self.cluster, Some(PodRole::Leader))
            .await?;
        leaders.sort_by_key(|p| p.node_number().parse::<usize>().unwrap_or(usize::MAX));

        let (l, f) = (self.leader_count(), self.followers_per_leader());
        if f == 0 {
            return Ok(());
        }
        let mut slots = Vec::with_capacity(leaders.len() * f);
        for (i, leader) in leaders.iter().enumerate() {
            for j in 0..f {
                slots.push(NodeNumbers::new(
                    (l + i * f + j).to_string(),
                    leader.node_number(),
                ));
            }
        }
        info!(followers = slots.len(), "initializing followers");
        self.add_followers(&slots).await
    }

    /// Create follower pods for `slots` and join each as a replica of its
    /// leader.
    pub async fn add_followers(&self, slots: &[NodeNumbers]) -> Result<()> {
        if slots.is_empty() {
            return Err(OperatorError::Internal("no followers to add".to_string()));
        }
        let pods = self
            .platform
            .create_follower_pods(&self.cluster, slots)
            .await?;
        let node_ips = self.node_ips().await?;
        let pods = self.wait_for_pod_ready(&pods).await?;

        for pod in &pods {
            let follower_ip = pod.ip().to_string();
            self.wait_for_redis(std::slice::from_ref(&follower_ip)).await?;
            let leader_ip = node_ips.get(pod.leader_number()).ok_or_else(|| {
                OperatorError::NodeNotFound(format!(
                    "leader {} of follower {}",
                    pod.leader_number(),
                    pod.name()
                ))
            })?;
            info!(follower = %pod.node_number(), leader = %pod.leader_number(), "replicating leader");
            self.replicate_leader(&follower_ip, leader_ip).await?;
        }
        Ok(())
    }

    /// Join `follower_ip` as a replica of the leader at `leader_ip` and wait
    /// until it has met the leader, been listed as its replica, synced and
    /// loaded.
    pub async fn replicate_leader(&self, follower_ip: &str, leader_ip: &str) -> Result<()> {
        let leader_id = self.commands.my_cluster_id(leader_ip).await?;
        let follower_id = self.commands.my_cluster_id(follower_ip).await?;

        match self
            .commands
            .add_node_as_replica(follower_ip, leader_ip, &leader_id)
            .await
        {
            Ok(()) => {}
            Err(e) if e.command_kind() == Some(CommandErrorKind::AlreadyAgreed) => {
                warn!(follower = %follower_ip, "node already joined: {}", e)
            }
            Err(e) => return Err(e),
        }

        self.wait_for_redis_meet(leader_ip, follower_ip).await?;
        self.wait_for_redis_replication(leader_ip, &leader_id, &follower_id)
            .await?;
        self.wait_for_redis_sync(follower_ip).await?;
        self.wait_for_redis_load(follower_ip).await
    }

    /// Fail over the leader at `leader_ip` to `target`, or to its first
    /// replica. Returns the promoted address.
    pub async fn do_failover(
        &self,
        leader_ip: &str,
        target: Option<&str>,
        mode: FailoverMode,
    ) -> Result<String> {
        let promoted = match target {
            Some(ip) => ip.to_string(),
            None => {
                let leader_id = self.commands.my_cluster_id(leader_ip).await?;
                let replicas = self.commands.cluster_replicas(leader_ip, &leader_id).await?;
                let first = replicas.first().ok_or_else(|| {
                    OperatorError::Unsupported(format!("leader {} has no followers", leader_ip))
                })?;
                first.ip().to_string()
            }
        };
        info!(leader = %leader_ip, promoted = %promoted, ?mode, "running failover");
        self.commands.cluster_failover(&promoted, mode).await?;
        self.wait_for_manual_failover(&promoted).await?;
        Ok(promoted)
    }

    /// Forced failover on a follower whose leader is unreachable.
    pub async fn do_forced_failover(&self, ip: &str) -> Result<()> {
        info!(ip = %ip, "running forced failover");
        self.commands.cluster_failover(ip, FailoverMode::Force).await?;
        self.wait_for_manual_failover(ip).await
    }

    /// Refill the leader slot that `promoted_ip` took over: create a fresh
    /// leader pod, replicate the promoted node onto it and hand leadership
    /// back so the slot number is leader again.
    pub async fn recreate_leader(&self, promoted_ip: &str) -> Result<()> {
        let promoted = self.platform.pod_by_ip(&self.cluster, promoted_ip).await?;
        let leader_number = promoted.leader_number().to_string();
        info!(leader = %leader_number, promoted = %promoted_ip, "recreating leader");

        let pods = self
            .platform
            .create_leader_pods(&self.cluster, &[leader_number])
            .await?;
        let pods = self.wait_for_pod_ready(&pods).await?;
        let new_ips: Vec<String> = pods.iter().map(|p| p.ip().to_string()).collect();
        self.wait_for_redis(&new_ips).await?;

        for new_ip in &new_ips {
            self.replicate_leader(new_ip, promoted_ip).await?;
            self.do_failover(promoted_ip, Some(new_ip), FailoverMode::Default)
                .await?;
        }
        Ok(())
    }

    /// Leader IPs keyed by leader number.
    pub async fn node_ips(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .platform
            .list_pods(&self.cluster, Some(PodRole::Leader))
            .await?
            .into_iter()
            .map(|p| (p.leader_number().to_string(), p.ip().to_string()))
            .collect())
    }

    /// Slot numbers of the pod holding `ip`.
    pub async fn node_numbers_of(&self, ip: &str) -> Result<NodeNumbers> {
        let pod = self.platform.pod_by_ip(&self.cluster, ip).await?;
        Ok(NodeNumbers::of_pod(&pod))
    }

    /// Address of the leader a follower pod replicates.
    pub async fn leader_ip_of(&self, follower: &Pod) -> Result<String> {
        let leaders = self.node_ips().await?;
        leaders
            .get(follower.leader_number())
            .filter(|ip| !ip.is_empty())
            .cloned()
            .ok_or_else(|| {
                OperatorError::NodeNotFound(format!(
                    "leader {} of {}",
                    follower.leader_number(),
                    follower.name()
                ))
            })
    }
}
