//! Command interface to the data-store nodes.
//!
//! [`NodeCommands`] is the seam between the reconciliation core and the
//! nodes: every read or mutation of cluster state goes through it. The
//! production implementation is [`RedisCli`], which shells out to
//! `redis-cli`; tests substitute an in-memory cluster.
//!
//! Failed commands surface as [`OperatorError::Command`](crate::OperatorError)
//! carrying a [`CommandErrorKind`](crate::CommandErrorKind), so callers can
//! tell an idempotent re-run ("already agreed", "not a replica", "unknown
//! node") from a real failure without looking at reply text.

mod cli;
mod types;

pub use cli::RedisCli;
pub use types::{ClusterInfo, ClusterNode, RedisArray, RedisInfo};

use crate::error::Result;
use async_trait::async_trait;

/// Failover flavour for `CLUSTER FAILOVER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailoverMode {
    /// Coordinated with the current master
    #[default]
    Default,
    /// Skip the handshake with the master (master unreachable)
    Force,
    /// Skip cluster agreement entirely
    Takeover,
}

impl FailoverMode {
    /// Extra argument appended to `CLUSTER FAILOVER`.
    pub fn as_arg(&self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::Force => Some("FORCE"),
            Self::Takeover => Some("TAKEOVER"),
        }
    }
}

/// Per-node operations against the data store.
///
/// Nodes are addressed by IP; implementations own the port.
#[async_trait]
pub trait NodeCommands: Send + Sync {
    /// `PING`, returning the raw reply (normally `PONG`).
    async fn ping(&self, ip: &str) -> Result<String>;

    async fn cluster_info(&self, ip: &str) -> Result<ClusterInfo>;

    /// The node's membership table.
    async fn cluster_nodes(&self, ip: &str) -> Result<Vec<ClusterNode>>;

    async fn my_cluster_id(&self, ip: &str) -> Result<String>;

    /// Non-interactive cluster bootstrap across the given leader IPs.
    async fn cluster_create(&self, leader_ips: &[String]) -> Result<()>;

    /// Join `follower_ip` to the cluster as a replica of `leader_id`.
    ///
    /// A join that fails because all nodes already agree on the slot
    /// configuration reports [`CommandErrorKind::AlreadyAgreed`](crate::CommandErrorKind).
    async fn add_node_as_replica(
        &self,
        follower_ip: &str,
        leader_ip: &str,
        leader_id: &str,
    ) -> Result<()>;

    /// Failover issued against a replica; reports
    /// [`CommandErrorKind::NotReplica`](crate::CommandErrorKind) when the
    /// node already is a master.
    async fn cluster_failover(&self, ip: &str, mode: FailoverMode) -> Result<()>;

    /// Replicas of `leader_id` as seen by `leader_ip`.
    async fn cluster_replicas(&self, leader_ip: &str, leader_id: &str) -> Result<Vec<ClusterNode>>;

    async fn cluster_forget(&self, ip: &str, node_id: &str) -> Result<()>;

    async fn info(&self, ip: &str) -> Result<RedisInfo>;

    async fn flush_all(&self, ip: &str) -> Result<()>;

    async fn cluster_reset(&self, ip: &str) -> Result<()>;

    async fn config_get(&self, ip: &str, key: &str) -> Result<RedisArray>;
}
