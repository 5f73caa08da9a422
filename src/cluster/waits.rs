//! Convergence waits built on [`Poll`].

use super::ClusterOperator;
use crate::error::{OperatorError, Result};
use crate::platform::Pod;
use crate::wait::Poll;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const NODE_TIMEOUT_KEY: &str = "cluster-node-timeout";

/// Failure-detection window of the clustering protocol:
/// `NODE_TIMEOUT * FAIL_REPORT_VALIDITY_MULT` plus a quarter timeout of slack.
pub fn fail_detection_window(node_timeout_ms: u64) -> Duration {
    Duration::from_millis(
        node_timeout_ms
            .saturating_mul(4)
            .saturating_add(node_timeout_ms / 4),
    )
}

impl ClusterOperator {
    fn pod_poll(&self, timeout: Duration) -> Poll {
        Poll::immediate(self.timing().pod_check_interval(), timeout)
    }

    /// Wait until every pod is ready and has an address; returns the
    /// refreshed pods.
    pub async fn wait_for_pod_ready(&self, pods: &[Pod]) -> Result<Vec<Pod>> {
        let poll = self.pod_poll(self.timing().pod_ready_timeout());
        let platform = &*self.platform;
        let mut ready = Vec::with_capacity(pods.len());
        for pod in pods {
            let (namespace, name) = (pod.namespace(), pod.name());
            let what = format!("pod {} to become ready", name);
            let pod = poll
                .until_some(&what, move || async move {
                    Ok(platform
                        .get_pod(namespace, name)
                        .await?
                        .filter(|p| p.is_ready() && !p.ip().is_empty()))
                })
                .await?;
            debug!(pod = %pod.name(), ip = %pod.ip(), "pod ready");
            ready.push(pod);
        }
        Ok(ready)
    }

    /// Wait until every pod is gone from the platform.
    pub async fn wait_for_pod_delete(&self, pods: &[Pod]) -> Result<()> {
        let poll = self.pod_poll(self.timing().pod_delete_timeout());
        let platform = &*self.platform;
        for pod in pods {
            let (namespace, name) = (pod.namespace(), pod.name());
            info!(pod = %name, "waiting for pod deletion");
            let what = format!("pod {} to be deleted", name);
            poll.until(&what, move || async move {
                Ok(platform.get_pod(namespace, name).await?.is_none())
            })
            .await?;
        }
        Ok(())
    }

    /// Wait until the data store answers `PING` on every address.
    pub async fn wait_for_redis(&self, ips: &[String]) -> Result<()> {
        let poll = self.generic_poll();
        let commands = &*self.commands;
        for ip in ips {
            if ip.is_empty() {
                return Err(OperatorError::NodeNotFound("Missing IP".to_string()));
            }
            info!(ip = %ip, "waiting for redis");
            let ip = ip.as_str();
            poll.until(&format!("redis on {}", ip), move || async move {
                match commands.ping(ip).await {
                    Ok(reply) => Ok(reply.trim().eq_ignore_ascii_case("pong")),
                    Err(e) => {
                        debug!(ip = %ip, "ping failed: {}", e);
                        Ok(false)
                    }
                }
            })
            .await?;
        }
        Ok(())
    }

    /// Wait until every leader reports a non-failing cluster and a node
    /// table of exactly the bootstrapped leaders.
    pub async fn wait_for_cluster_create(&self, leader_ips: &[String]) -> Result<()> {
        info!("waiting for cluster create execution to complete");
        let poll = Poll::delayed(
            self.timing().cluster_create_interval(),
            self.timing().cluster_create_timeout(),
        );
        let commands = &*self.commands;
        poll.until("cluster create", move || async move {
            for ip in leader_ips {
                if commands.cluster_info(ip).await?.is_cluster_fail() {
                    return Ok(false);
                }
                if commands.cluster_nodes(ip).await?.len() != leader_ips.len() {
                    return Ok(false);
                }
            }
            Ok(true)
        })
        .await
    }

    /// Wait until `new_ip` shows up in the node table of `node_ip`.
    pub async fn wait_for_redis_meet(&self, node_ip: &str, new_ip: &str) -> Result<()> {
        info!(node = %node_ip, new_node = %new_ip, "waiting for CLUSTER MEET");
        let commands = &*self.commands;
        self.generic_poll()
            .until(&format!("{} to meet {}", node_ip, new_ip), move || async move {
                let table = commands.cluster_nodes(node_ip).await?;
                Ok(table.iter().any(|n| n.ip() == new_ip))
            })
            .await
    }

    /// Wait until `follower_id` is listed as a replica of `leader_id`.
    pub async fn wait_for_redis_replication(
        &self,
        leader_ip: &str,
        leader_id: &str,
        follower_id: &str,
    ) -> Result<()> {
        info!(leader = %leader_ip, follower_id = %follower_id, "waiting for CLUSTER REPLICATION");
        let commands = &*self.commands;
        self.generic_poll()
            .until(
                &format!("{} to replicate {}", follower_id, leader_id),
                move || async move {
                    let replicas = commands.cluster_replicas(leader_ip, leader_id).await?;
                    Ok(replicas.iter().any(|r| r.id == follower_id))
                },
            )
            .await
    }

    /// Wait until the node reports no full sync in progress. Returns at once
    /// on leaders.
    pub async fn wait_for_redis_sync(&self, ip: &str) -> Result<()> {
        info!(ip = %ip, "waiting for SYNC");
        let commands = &*self.commands;
        self.generic_poll()
            .until(&format!("sync on {}", ip), move || async move {
                match commands.info(ip).await?.sync_status() {
                    Some(status) => {
                        debug!(ip = %ip, status = %status, "sync in progress");
                        Ok(false)
                    }
                    None => Ok(true),
                }
            })
            .await?;
        info!(ip = %ip, "node is fully synced");
        Ok(())
    }

    /// Wait for the node to finish loading its dataset.
    ///
    /// Loading may start and finish between two polls, so the first phase
    /// only tries to observe the start and treats its own timeout as
    /// "already finished".
    pub async fn wait_for_redis_load(&self, ip: &str) -> Result<()> {
        let commands = &*self.commands;
        info!(ip = %ip, "waiting for node to start LOADING");
        let start = Poll::immediate(
            self.timing().load_check_interval(),
            self.timing().generic_check_timeout(),
        );
        match start
            .until(&format!("load start on {}", ip), move || async move {
                Ok(commands.info(ip).await?.load_status().is_some())
            })
            .await
        {
            Ok(()) => info!(ip = %ip, "node started to load"),
            Err(e) if e.is_timeout() => {
                warn!(ip = %ip, "timeout waiting for LOADING process to start")
            }
            Err(e) => return Err(e),
        }

        self.generic_poll()
            .until(&format!("load on {}", ip), move || async move {
                match commands.info(ip).await?.load_status() {
                    Some(eta) => {
                        debug!(ip = %ip, eta = %eta, "node loading");
                        Ok(false)
                    }
                    None => Ok(true),
                }
            })
            .await?;
        info!(ip = %ip, "node is fully loaded");
        Ok(())
    }

    /// Wait until the node reports the master role.
    pub async fn wait_for_manual_failover(&self, ip: &str) -> Result<()> {
        info!(ip = %ip, "waiting for node to become leader");
        let commands = &*self.commands;
        self.generic_poll()
            .until(&format!("{} to become master", ip), move || async move {
                Ok(commands.info(ip).await?.is_master())
            })
            .await
    }

    /// `cluster-node-timeout` of the node, in milliseconds.
    pub async fn cluster_node_timeout(&self, ip: &str) -> Result<u64> {
        let setting = self.commands.config_get(ip, NODE_TIMEOUT_KEY).await?;
        let raw = setting.get(NODE_TIMEOUT_KEY).ok_or_else(|| {
            OperatorError::Protocol(format!("{} missing from CONFIG GET on {}", NODE_TIMEOUT_KEY, ip))
        })?;
        raw.trim().parse().map_err(|_| {
            OperatorError::Protocol(format!("invalid {} on {}: '{}'", NODE_TIMEOUT_KEY, ip, raw))
        })
    }

    /// Sleep through the failure-detection window read from `ip`.
    ///
    /// Automatic promotion cannot be trusted before the window has passed,
    /// so it is never shortened.
    pub async fn wait_for_fail_detection(&self, ip: &str) -> Result<()> {
        let node_timeout = self.cluster_node_timeout(ip).await?;
        let window = fail_detection_window(node_timeout);
        info!(window_ms = window.as_millis() as u64, "waiting for redis to detect the failure");
        sleep(window).await;
        Ok(())
    }
}
