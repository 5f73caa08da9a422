//! Reconcile entry point and coarse lifecycle state.

use super::ClusterOperator;
use crate::config::OperatorConfig;
use crate::error::Result;
use crate::platform::{ClusterState, Orchestrator, RedisCluster};
use crate::rediscli::NodeCommands;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Result of one reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub state: ClusterState,
    /// When the caller should reconcile again if nothing else triggers it.
    pub requeue_after: Duration,
}

/// Drives one managed cluster through its lifecycle.
///
/// Owns the cluster state; it is only changed through `&mut self`, so one
/// reconciler serializes all passes for its cluster. Distinct clusters use
/// distinct reconcilers and share nothing mutable.
pub struct ClusterReconciler {
    commands: Arc<dyn NodeCommands>,
    platform: Arc<dyn Orchestrator>,
    config: Arc<OperatorConfig>,
    state: ClusterState,
}

impl ClusterReconciler {
    /// Start from the state persisted in the resource status.
    pub fn new(
        cluster: &RedisCluster,
        commands: Arc<dyn NodeCommands>,
        platform: Arc<dyn Orchestrator>,
        config: Arc<OperatorConfig>,
    ) -> Self {
        Self {
            commands,
            platform,
            config,
            state: cluster.status.cluster_state,
        }
    }

    pub fn state(&self) -> ClusterState {
        self.state
    }

    /// Run one pass against the desired `cluster`.
    ///
    /// On error the state is left where the failing step started, so the
    /// next pass resumes that step from a fresh view.
    pub async fn reconcile(&mut self, cluster: &RedisCluster) -> Result<ReconcileOutcome> {
        let operator = ClusterOperator::new(
            cluster.clone(),
            self.commands.clone(),
            self.platform.clone(),
            self.config.clone(),
        );
        info!(cluster = %cluster.name(), state = %self.state, "reconciling");

        if let Err(e) = self.step(&operator).await {
            error!(cluster = %cluster.name(), state = %self.state, "reconcile failed: {}", e);
            return Err(e);
        }
        Ok(ReconcileOutcome {
            state: self.state,
            requeue_after: self.config.reconcile.requeue_after(),
        })
    }

    async fn step(&mut self, operator: &ClusterOperator) -> Result<()> {
        match self.state {
            ClusterState::NotExists => {
                operator.create_new_cluster().await?;
                self.transition(operator, ClusterState::InitializingFollowers)
                    .await?;
                operator.initialize_followers().await?;
                self.transition(operator, ClusterState::Ready).await
            }
            ClusterState::InitializingFollowers => {
                operator.initialize_followers().await?;
                self.transition(operator, ClusterState::Ready).await
            }
            ClusterState::Ready | ClusterState::Updating => {
                // a slot lost mid-update is recovered before updating resumes
                if !operator.is_cluster_complete().await? {
                    self.transition(operator, ClusterState::Recovering).await?;
                    operator.recover_cluster().await?;
                    self.transition(operator, ClusterState::Ready).await
                } else if self.state == ClusterState::Updating
                    || !operator.is_cluster_up_to_date().await?
                {
                    if self.state != ClusterState::Updating {
                        self.transition(operator, ClusterState::Updating).await?;
                    }
                    operator.update_cluster().await?;
                    self.transition(operator, ClusterState::Ready).await
                } else {
                    Ok(())
                }
            }
            ClusterState::Recovering => {
                operator.recover_cluster().await?;
                self.transition(operator, ClusterState::Ready).await
            }
        }
    }

    async fn transition(&mut self, operator: &ClusterOperator, next: ClusterState) -> Result<()> {
        info!(cluster = %operator.cluster().name(), from = %self.state, to = %next, "state change");
        self.platform
            .update_cluster_state(operator.cluster(), next)
            .await?;
        self.state = next;
        Ok(())
    }
}
