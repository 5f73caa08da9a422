//! Topology reconciliation and recovery.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │     ClusterReconciler (state machine)       │
//! │   NotExists → InitializingFollowers → Ready │
//! │         Ready ⇄ Recovering | Updating       │
//! └─────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────┐
//! │  ClusterOperator                            │
//! │   view     : ClusterView snapshot           │
//! │   topology : create / replicate / failover  │
//! │   recovery : restore failed slots           │
//! │   update   : rolling pod replacement        │
//! │   cleanup  : forget stale members           │
//! │   waits    : convergence polls              │
//! └─────────────────────────────────────────────┘
//!          │                         │
//!          ▼                         ▼
//!   NodeCommands (nodes)     Orchestrator (pods)
//! ```
//!
//! Every operation is safe to re-run after a partial failure; a failed
//! reconcile is simply retried from a fresh view.

mod cleanup;
pub mod fanout;
mod reconciler;
mod recovery;
mod topology;
mod update;
mod view;
mod waits;

pub use reconciler::{ClusterReconciler, ReconcileOutcome};
pub use view::{slot_of, ClusterView, FollowerNode, LeaderNode, SlotIndex};
pub use waits::fail_detection_window;

use crate::config::{OperatorConfig, TimingConfig};
use crate::error::Result;
use crate::platform::{Orchestrator, RedisCluster};
use crate::rediscli::NodeCommands;
use crate::wait::Poll;
use std::sync::Arc;

/// Operations on one managed cluster.
///
/// Holds the desired resource for the current reconcile plus shared handles
/// to the node command transport and the platform. Cheap to build; a new
/// one is made for every reconcile so the desired spec is always fresh.
pub struct ClusterOperator {
    cluster: RedisCluster,
    commands: Arc<dyn NodeCommands>,
    platform: Arc<dyn Orchestrator>,
    config: Arc<OperatorConfig>,
}

impl ClusterOperator {
    pub fn new(
        cluster: RedisCluster,
        commands: Arc<dyn NodeCommands>,
        platform: Arc<dyn Orchestrator>,
        config: Arc<OperatorConfig>,
    ) -> Self {
        Self {
            cluster,
            commands,
            platform,
            config,
        }
    }

    pub fn cluster(&self) -> &RedisCluster {
        &self.cluster
    }

    pub fn leader_count(&self) -> usize {
        self.cluster.spec.leader_count
    }

    pub fn followers_per_leader(&self) -> usize {
        self.cluster.spec.leader_followers_count
    }

    fn timing(&self) -> &TimingConfig {
        &self.config.timing
    }

    fn fan_out_limit(&self) -> usize {
        self.config.reconcile.max_concurrency
    }

    /// The default convergence poll: immediate first check, generic interval
    /// and timeout.
    fn generic_poll(&self) -> Poll {
        Poll::immediate(
            self.timing().generic_check_interval(),
            self.timing().generic_check_timeout(),
        )
    }

    /// Build a fresh view from the current pods and live node health.
    pub async fn cluster_view(&self) -> Result<ClusterView> {
        let pods = self.platform.list_pods(&self.cluster, None).await?;
        let mut view = ClusterView::from_pods(
            self.leader_count(),
            self.followers_per_leader(),
            pods,
        )?;
        view.probe_health(self.commands.clone(), self.fan_out_limit())
            .await;
        Ok(view)
    }

    /// Whether every slot is populated, healthy and not terminating.
    pub async fn is_cluster_complete(&self) -> Result<bool> {
        let view = self.cluster_view().await?;
        for leader in view.leaders() {
            if leader.terminating || leader.failed {
                tracing::info!(leader = %leader.node_number, "found unhealthy leader");
                return Ok(false);
            }
            for follower in &leader.followers {
                if follower.terminating || follower.failed {
                    tracing::info!(follower = %follower.node_number, "found unhealthy follower");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
