//! Node-table cleanup: forget members that no longer back a healthy pod.
//!
//! A member is forgotten when it appears in any healthy node's table but is
//! not the ID of a currently healthy node. Forgetting an ID that a node has
//! already dropped is not an error, so the pass can be repeated freely.

use super::fanout::{fan_out, first_error};
use super::ClusterOperator;
use crate::error::{CommandErrorKind, OperatorError, Result};
use std::collections::BTreeSet;
use tracing::{info, warn};

impl ClusterOperator {
    /// Forget every lost member on every healthy node.
    ///
    /// Refuses to run unless the whole cluster is healthy, since a node
    /// that is only temporarily unreachable would otherwise be forgotten.
    pub async fn forget_lost_nodes(&self) -> Result<()> {
        let view = self.cluster_view().await?;
        let healthy_ips = view.healthy_node_ips();
        let expected = self.cluster.spec.node_count();
        if healthy_ips.len() != expected {
            return Err(OperatorError::Internal(format!(
                "cleanup needs all {} nodes healthy, found {}",
                expected,
                healthy_ips.len()
            )));
        }

        let commands = self.commands.clone();
        let ids = first_error(
            fan_out(&healthy_ips, self.fan_out_limit(), |ip| {
                let commands = commands.clone();
                async move { commands.my_cluster_id(&ip).await }
            })
            .await,
        )?;
        let healthy_ids: BTreeSet<String> = ids.into_iter().map(|(_, id)| id).collect();

        let tables = fan_out(&healthy_ips, self.fan_out_limit(), |ip| {
            let commands = commands.clone();
            async move { commands.cluster_nodes(&ip).await }
        })
        .await;
        let mut lost = BTreeSet::new();
        for (ip, table) in tables {
            match table {
                Ok(table) => lost.extend(
                    table
                        .into_iter()
                        .map(|node| node.id)
                        .filter(|id| !healthy_ids.contains(id)),
                ),
                Err(e) => warn!(ip = %ip, "could not read node table: {}", e),
            }
        }

        if lost.is_empty() {
            return Ok(());
        }
        info!(lost = ?lost, "forgetting lost nodes");
        let mut first_failure = None;
        for id in &lost {
            if let Err(e) = self.forget_node(&healthy_ips, id).await {
                warn!(id = %id, "forget failed: {}", e);
                first_failure.get_or_insert(e);
            }
        }
        first_failure.map_or(Ok(()), Err)
    }

    /// Issue `CLUSTER FORGET id` on every node in parallel.
    pub async fn forget_node(&self, ips: &[String], id: &str) -> Result<()> {
        let commands = self.commands.clone();
        let results = fan_out(ips, self.fan_out_limit(), |ip| {
            let commands = commands.clone();
            let id = id.to_string();
            async move {
                match commands.cluster_forget(&ip, &id).await {
                    Err(e) if e.command_kind() == Some(CommandErrorKind::UnknownNode) => Ok(()),
                    other => other,
                }
            }
        })
        .await;
        first_error(results).map(|_| ())
    }
}
