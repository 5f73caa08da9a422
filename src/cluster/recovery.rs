//! Recovery engine: restore failed leader and follower slots.

use super::view::{FollowerNode, LeaderNode};
use super::ClusterOperator;
use crate::error::{CommandErrorKind, OperatorError, Result};
use crate::platform::{NodeNumbers, Pod};
use tracing::{debug, info, warn};

impl ClusterOperator {
    /// Walk every leader slot of a fresh view and repair what is broken,
    /// then verify the cluster and forget stale members.
    pub async fn recover_cluster(&self) -> Result<()> {
        let view = self.cluster_view().await?;
        info!(view = %view, "recovering cluster");

        let probe_ip = view
            .healthy_node_ips()
            .into_iter()
            .next()
            .ok_or_else(|| OperatorError::NodeNotFound("no healthy node left".to_string()))?;

        for leader in view.leaders() {
            if leader.failed || leader.terminating {
                self.recover_leader(leader, &probe_ip).await?;
            } else if leader.followers.iter().any(|f| !f.is_healthy()) {
                self.recover_followers(leader).await?;
            }
        }

        if !self.is_cluster_complete().await? {
            return Err(OperatorError::RecoveryIncomplete);
        }
        if let Err(e) = self.forget_lost_nodes().await {
            warn!("node table cleanup failed: {}", e);
        }
        info!("cluster recovered");
        Ok(())
    }

    async fn recover_leader(&self, leader: &LeaderNode, probe_ip: &str) -> Result<()> {
        info!(leader = %leader.node_number, "recovering leader");
        if leader.terminating {
            if let Some(pod) = &leader.pod {
                self.wait_for_pod_delete(std::slice::from_ref(pod)).await?;
            }
        }

        self.wait_for_fail_detection(probe_ip).await?;

        let promoted = match self.wait_for_failover(leader).await {
            Ok(ip) => Some(ip),
            Err(e) if e.is_timeout() => {
                warn!(leader = %leader.node_number, "no automatic failover, forcing promotion");
                self.force_promotion(leader).await
            }
            Err(e) => return Err(e),
        };
        let promoted = promoted.ok_or_else(|| {
            OperatorError::Unsupported(format!(
                "no follower of leader {} could be promoted",
                leader.node_number
            ))
        })?;
        info!(leader = %leader.node_number, promoted = %promoted, "follower promoted");

        if let Some(pod) = &leader.pod {
            if !leader.terminating {
                self.platform.delete_pod(pod.namespace(), pod.name()).await?;
            }
            self.wait_for_pod_delete(std::slice::from_ref(pod)).await?;
        }

        self.recreate_leader(&promoted).await
    }

    /// Poll the live followers of `leader` until one reports the master
    /// role.
    async fn wait_for_failover(&self, leader: &LeaderNode) -> Result<String> {
        if leader.followers.iter().all(|f| f.failed) {
            return Err(OperatorError::Unsupported(format!(
                "all followers of leader {} are lost",
                leader.node_number
            )));
        }
        let candidates: Vec<&str> = leader
            .followers
            .iter()
            .filter(|f| !f.failed)
            .filter_map(FollowerNode::ip)
            .collect();
        info!(leader = %leader.node_number, "waiting for automatic failover");

        let commands = &*self.commands;
        let candidates = &candidates;
        self.generic_poll()
            .until_some(
                &format!("failover of leader {}", leader.node_number),
                move || async move {
                    for ip in candidates {
                        match commands.info(ip).await {
                            Ok(info) if info.is_master() => return Ok(Some(ip.to_string())),
                            Ok(_) => {}
                            Err(e) => debug!(ip = %ip, "info failed: {}", e),
                        }
                    }
                    Ok(None)
                },
            )
            .await
    }

    /// Try a forced failover on each reachable follower of `leader` in
    /// order. A follower that already is master counts as promoted.
    pub async fn force_promotion(&self, leader: &LeaderNode) -> Option<String> {
        for follower in leader.followers.iter().filter(|f| !f.failed) {
            let Some(ip) = follower.ip() else { continue };
            if let Err(e) = self.commands.ping(ip).await {
                debug!(ip = %ip, "follower unreachable: {}", e);
                continue;
            }
            match self.do_forced_failover(ip).await {
                Ok(()) => return Some(ip.to_string()),
                Err(e) if e.command_kind() == Some(CommandErrorKind::NotReplica) => {
                    info!(ip = %ip, "follower is already master");
                    return Some(ip.to_string());
                }
                Err(e) => warn!(ip = %ip, "forced failover failed: {}", e),
            }
        }
        None
    }

    /// Replace every unhealthy follower of a healthy leader at the same
    /// slot.
    async fn recover_followers(&self, leader: &LeaderNode) -> Result<()> {
        let mut missing = Vec::new();
        let mut terminating: Vec<&Pod> = Vec::new();
        let mut failed: Vec<&Pod> = Vec::new();
        for follower in &leader.followers {
            match &follower.pod {
                None => missing.push(follower),
                Some(pod) if follower.terminating => terminating.push(pod),
                Some(pod) if follower.failed => failed.push(pod),
                Some(_) => {}
            }
        }
        info!(
            leader = %leader.node_number,
            missing = missing.len(),
            terminating = terminating.len(),
            failed = failed.len(),
            "recovering followers"
        );

        // by name: a pod that never became ready has no address
        for pod in &failed {
            self.platform.delete_pod(pod.namespace(), pod.name()).await?;
        }
        let gone: Vec<Pod> = failed
            .iter()
            .chain(terminating.iter())
            .map(|p| (*p).clone())
            .collect();
        self.wait_for_pod_delete(&gone).await?;

        let vacant: Vec<NodeNumbers> = leader
            .followers
            .iter()
            .filter(|f| !f.is_healthy())
            .map(|f| NodeNumbers::new(f.node_number.clone(), leader.node_number.clone()))
            .collect();
        if vacant.is_empty() {
            return Ok(());
        }

        let leader_ip = leader
            .ip()
            .ok_or_else(|| OperatorError::NodeNotFound(format!("leader {}", leader.node_number)))?;
        self.wait_for_fail_detection(leader_ip).await?;
        self.add_followers(&vacant).await
    }
}
