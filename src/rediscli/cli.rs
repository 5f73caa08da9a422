//! `redis-cli` backed command transport.

use super::{ClusterInfo, ClusterNode, FailoverMode, NodeCommands, RedisArray, RedisInfo};
use crate::config::RedisConfig;
use crate::error::{CommandErrorKind, OperatorError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Marker printed by `redis-cli --cluster` once the slot layout is consistent.
const ALREADY_AGREED_MARKER: &str = "All nodes agree about slots configuration";

/// Runs `redis-cli` for every command. Stateless; safe to share.
#[derive(Debug, Clone)]
pub struct RedisCli {
    binary: String,
    port: u16,
}

impl RedisCli {
    pub fn new(config: &RedisConfig) -> Self {
        Self {
            binary: config.cli_path.clone(),
            port: config.port,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn addr(&self, ip: &str) -> String {
        format!("{}:{}", ip, self.port)
    }

    /// Execute `redis-cli` with `args`, returning stdout.
    ///
    /// A non-zero exit status or an error reply is turned into a classified
    /// command error.
    async fn execute(&self, node: &str, args: &[String]) -> Result<String> {
        debug!(node = %node, args = ?args, "executing redis-cli command");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                OperatorError::command(
                    node,
                    args.join(" "),
                    CommandErrorKind::Unreachable,
                    format!("failed to spawn {}: {}", self.binary, e),
                )
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() || is_error_reply(&stdout) {
            let message = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                format!("{} {}", stdout.trim(), stderr.trim())
            };
            let kind = classify(&stdout, &stderr);
            warn!(node = %node, kind = %kind, "redis-cli command failed: {}", message);
            return Err(OperatorError::command(node, args.join(" "), kind, message));
        }

        debug!(node = %node, "redis-cli command output: {}", stdout.trim());
        Ok(stdout)
    }

    /// Run a plain command against a single node.
    async fn node_command(&self, ip: &str, command: &[&str]) -> Result<String> {
        if ip.is_empty() {
            return Err(OperatorError::NodeNotFound("missing node IP".to_string()));
        }
        let mut args = vec![
            "-h".to_string(),
            ip.to_string(),
            "-p".to_string(),
            self.port.to_string(),
        ];
        args.extend(command.iter().map(|s| s.to_string()));
        self.execute(ip, &args).await
    }
}

/// Whether a successful exit still carried an error reply.
fn is_error_reply(stdout: &str) -> bool {
    let first = stdout.trim_start();
    first.starts_with("ERR ") || first.starts_with("(error)") || first.starts_with("[ERR]")
}

/// Map reply text to a reason code.
pub(crate) fn classify(stdout: &str, stderr: &str) -> CommandErrorKind {
    let text = format!("{}\n{}", stdout, stderr);
    if text.contains(ALREADY_AGREED_MARKER) {
        CommandErrorKind::AlreadyAgreed
    } else if text.contains("CLUSTER FAILOVER to a replica")
        || text.contains("CLUSTER FAILOVER to a slave")
    {
        CommandErrorKind::NotReplica
    } else if text.contains("is not a master") {
        CommandErrorKind::NotMaster
    } else if text.contains("Unknown node") {
        CommandErrorKind::UnknownNode
    } else if text.contains("Could not connect") || text.contains("Connection refused") {
        CommandErrorKind::Unreachable
    } else {
        CommandErrorKind::Rejected
    }
}

#[async_trait]
impl NodeCommands for RedisCli {
    async fn ping(&self, ip: &str) -> Result<String> {
        let reply = self.node_command(ip, &["ping"]).await?;
        Ok(reply.trim().to_string())
    }

    async fn cluster_info(&self, ip: &str) -> Result<ClusterInfo> {
        let reply = self.node_command(ip, &["cluster", "info"]).await?;
        Ok(ClusterInfo::parse(&reply))
    }

    async fn cluster_nodes(&self, ip: &str) -> Result<Vec<ClusterNode>> {
        let reply = self.node_command(ip, &["cluster", "nodes"]).await?;
        Ok(ClusterNode::parse_table(&reply))
    }

    async fn my_cluster_id(&self, ip: &str) -> Result<String> {
        let reply = self.node_command(ip, &["cluster", "myid"]).await?;
        let id = reply.trim().to_string();
        if id.is_empty() {
            return Err(OperatorError::Protocol(format!("empty cluster ID from {}", ip)));
        }
        Ok(id)
    }

    async fn cluster_create(&self, leader_ips: &[String]) -> Result<()> {
        let first = leader_ips
            .first()
            .ok_or_else(|| OperatorError::NodeNotFound("no leader addresses".to_string()))?;
        let mut args = vec!["--cluster".to_string(), "create".to_string()];
        args.extend(leader_ips.iter().map(|ip| self.addr(ip)));
        // non-interactive
        args.push("--cluster-yes".to_string());
        self.execute(first, &args).await.map(|_| ())
    }

    async fn add_node_as_replica(
        &self,
        follower_ip: &str,
        leader_ip: &str,
        leader_id: &str,
    ) -> Result<()> {
        let args = vec![
            "--cluster".to_string(),
            "add-node".to_string(),
            self.addr(follower_ip),
            self.addr(leader_ip),
            "--cluster-slave".to_string(),
            "--cluster-master-id".to_string(),
            leader_id.to_string(),
        ];
        self.execute(follower_ip, &args).await.map(|_| ())
    }

    async fn cluster_failover(&self, ip: &str, mode: FailoverMode) -> Result<()> {
        let mut command = vec!["cluster", "failover"];
        if let Some(arg) = mode.as_arg() {
            command.push(arg);
        }
        self.node_command(ip, &command).await.map(|_| ())
    }

    async fn cluster_replicas(&self, leader_ip: &str, leader_id: &str) -> Result<Vec<ClusterNode>> {
        let reply = self
            .node_command(leader_ip, &["cluster", "replicas", leader_id])
            .await?;
        Ok(ClusterNode::parse_table(&reply))
    }

    async fn cluster_forget(&self, ip: &str, node_id: &str) -> Result<()> {
        self.node_command(ip, &["cluster", "forget", node_id])
            .await
            .map(|_| ())
    }

    async fn info(&self, ip: &str) -> Result<RedisInfo> {
        let reply = self.node_command(ip, &["info"]).await?;
        Ok(RedisInfo::parse(&reply))
    }

    async fn flush_all(&self, ip: &str) -> Result<()> {
        self.node_command(ip, &["flushall"]).await.map(|_| ())
    }

    async fn cluster_reset(&self, ip: &str) -> Result<()> {
        self.node_command(ip, &["cluster", "reset"]).await.map(|_| ())
    }

    async fn config_get(&self, ip: &str, key: &str) -> Result<RedisArray> {
        let reply = self.node_command(ip, &["config", "get", key]).await?;
        Ok(RedisArray::parse(&reply))
    }
}
