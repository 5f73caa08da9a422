//! Point-in-time logical view of a cluster.
//!
//! A view always has one entry per leader slot and one follower entry per
//! replica slot, whether or not a pod currently occupies it. Slots are
//! numbered identities; pods come and go underneath them. A slot is
//! `failed` unless its pod exists and reports `cluster_state:ok`, and
//! `terminating` when its pod carries a deletion marker.

use super::fanout::fan_out;
use crate::error::{OperatorError, Result};
use crate::platform::{Pod, LEADER_NUMBER_LABEL, NODE_NUMBER_LABEL};
use crate::rediscli::NodeCommands;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct FollowerNode {
    pub pod: Option<Pod>,
    pub node_number: String,
    pub leader_number: String,
    pub redis_id: String,
    pub failed: bool,
    pub terminating: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderNode {
    pub pod: Option<Pod>,
    pub node_number: String,
    pub redis_id: String,
    pub failed: bool,
    pub terminating: bool,
    pub followers: Vec<FollowerNode>,
}

/// Address of a populated pod, if it has one yet.
fn pod_ip(pod: Option<&Pod>) -> Option<&str> {
    pod.map(Pod::ip).filter(|ip| !ip.is_empty())
}

fn render(
    f: &mut fmt::Formatter<'_>,
    number: &str,
    pod: Option<&Pod>,
    terminating: bool,
    failed: bool,
) -> fmt::Result {
    let pod_status = match pod {
        None => "down",
        Some(_) if terminating => "terminating",
        Some(_) => "up",
    };
    let status = if failed { "fail" } else { "ok" };
    write!(f, "{}({},{})", number, pod_status, status)
}

impl FollowerNode {
    pub fn ip(&self) -> Option<&str> {
        pod_ip(self.pod.as_ref())
    }

    pub fn is_healthy(&self) -> bool {
        self.pod.is_some() && !self.failed && !self.terminating
    }
}

impl LeaderNode {
    pub fn ip(&self) -> Option<&str> {
        pod_ip(self.pod.as_ref())
    }

    pub fn is_healthy(&self) -> bool {
        self.pod.is_some() && !self.failed && !self.terminating
    }
}

/// Position of a pod in the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotIndex {
    Leader(usize),
    Follower { leader: usize, index: usize },
}

/// Derive the slot a pod occupies from its labels.
///
/// `node-number == leader-number` is a leader slot; any other node number
/// `n` is follower `(n - L) mod F` of leader `leader-number`.
pub fn slot_of(pod: &Pod, leader_count: usize, followers: usize) -> Result<SlotIndex> {
    let nn = parse_label(pod, NODE_NUMBER_LABEL, pod.node_number())?;
    let ln = parse_label(pod, LEADER_NUMBER_LABEL, pod.leader_number())?;
    if ln >= leader_count {
        return Err(OperatorError::SlotOutOfRange(format!(
            "pod {} serves leader {} but the cluster has {} leaders",
            pod.name(),
            ln,
            leader_count
        )));
    }
    if nn == ln {
        return Ok(SlotIndex::Leader(ln));
    }
    if nn < leader_count || followers == 0 {
        return Err(OperatorError::SlotOutOfRange(format!(
            "pod {} has follower node number {} outside the follower range",
            pod.name(),
            nn
        )));
    }
    Ok(SlotIndex::Follower {
        leader: ln,
        index: (nn - leader_count) % followers,
    })
}

fn parse_label(pod: &Pod, label: &'static str, value: &str) -> Result<usize> {
    value.parse::<usize>().map_err(|_| OperatorError::InvalidLabel {
        label,
        value: value.to_string(),
        pod: pod.name().to_string(),
    })
}

/// Ordered leader slots, each with its follower slots.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClusterView {
    leaders: Vec<LeaderNode>,
}

impl ClusterView {
    /// An empty view: every slot present, vacant and failed.
    pub fn new(leader_count: usize, followers: usize) -> Self {
        let mut follower_counter = leader_count;
        let leaders = (0..leader_count)
            .map(|i| {
                let followers = (0..followers)
                    .map(|_| {
                        let follower = FollowerNode {
                            pod: None,
                            node_number: follower_counter.to_string(),
                            leader_number: i.to_string(),
                            redis_id: String::new(),
                            failed: true,
                            terminating: false,
                        };
                        follower_counter += 1;
                        follower
                    })
                    .collect();
                LeaderNode {
                    pod: None,
                    node_number: i.to_string(),
                    redis_id: String::new(),
                    failed: true,
                    terminating: false,
                    followers,
                }
            })
            .collect();
        Self { leaders }
    }

    /// Place pods into their slots. Health is not queried; every slot stays
    /// failed until [`ClusterView::probe_health`] runs.
    ///
    /// Fails on the first pod whose slot labels cannot be trusted.
    pub fn from_pods(leader_count: usize, followers: usize, pods: Vec<Pod>) -> Result<Self> {
        let mut view = Self::new(leader_count, followers);
        for pod in pods {
            let terminating = pod.is_terminating();
            match slot_of(&pod, leader_count, followers)? {
                SlotIndex::Leader(i) => {
                    let leader = &mut view.leaders[i];
                    leader.node_number = pod.node_number().to_string();
                    leader.terminating = terminating;
                    leader.pod = Some(pod);
                }
                SlotIndex::Follower { leader, index } => {
                    let follower = &mut view.leaders[leader].followers[index];
                    follower.node_number = pod.node_number().to_string();
                    follower.leader_number = pod.leader_number().to_string();
                    follower.terminating = terminating;
                    follower.pod = Some(pod);
                }
            }
        }
        Ok(view)
    }

    /// Query `CLUSTER INFO` on every live, addressable pod and clear `failed`
    /// where the node reports `cluster_state:ok`.
    pub async fn probe_health(&mut self, commands: Arc<dyn NodeCommands>, limit: usize) {
        let mut targets = Vec::new();
        let mut ips = Vec::new();
        for (i, leader) in self.leaders.iter().enumerate() {
            if let (false, Some(ip)) = (leader.terminating, leader.ip()) {
                targets.push(SlotIndex::Leader(i));
                ips.push(ip.to_string());
            }
            for (j, follower) in leader.followers.iter().enumerate() {
                if let (false, Some(ip)) = (follower.terminating, follower.ip()) {
                    targets.push(SlotIndex::Follower { leader: i, index: j });
                    ips.push(ip.to_string());
                }
            }
        }

        let results = fan_out(&ips, limit, |ip| {
            let commands = commands.clone();
            async move { commands.cluster_info(&ip).await }
        })
        .await;

        for (slot, (ip, result)) in targets.into_iter().zip(results) {
            let healthy = match result {
                Ok(info) => info.is_ok(),
                Err(e) => {
                    debug!(ip = %ip, "health query failed: {}", e);
                    false
                }
            };
            if healthy {
                match slot {
                    SlotIndex::Leader(i) => self.leaders[i].failed = false,
                    SlotIndex::Follower { leader, index } => {
                        self.leaders[leader].followers[index].failed = false
                    }
                }
            }
        }
    }

    pub fn leaders(&self) -> &[LeaderNode] {
        &self.leaders
    }

    pub fn leader(&self, number: usize) -> Option<&LeaderNode> {
        self.leaders.get(number)
    }

    /// Every populated pod address.
    pub fn ips(&self) -> Vec<String> {
        let mut ips = Vec::new();
        for leader in &self.leaders {
            ips.extend(leader.ip().map(str::to_string));
            ips.extend(leader.followers.iter().filter_map(|f| f.ip()).map(str::to_string));
        }
        ips
    }

    /// Addresses of pods that are neither failed nor terminating.
    pub fn healthy_node_ips(&self) -> Vec<String> {
        let mut ips = Vec::new();
        for leader in &self.leaders {
            if leader.is_healthy() {
                ips.extend(leader.ip().map(str::to_string));
            }
            ips.extend(
                leader
                    .followers
                    .iter()
                    .filter(|f| f.is_healthy())
                    .filter_map(|f| f.ip())
                    .map(str::to_string),
            );
        }
        ips
    }

    /// No slot is failed or terminating.
    pub fn is_complete(&self) -> bool {
        self.leaders.iter().all(|leader| {
            !leader.failed
                && !leader.terminating
                && leader.followers.iter().all(|f| !f.failed && !f.terminating)
        })
    }
}

impl fmt::Display for ClusterView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for leader in &self.leaders {
            write!(f, "Leader: ")?;
            render(
                f,
                &leader.node_number,
                leader.pod.as_ref(),
                leader.terminating,
                leader.failed,
            )?;
            write!(f, "-[")?;
            for follower in &leader.followers {
                render(
                    f,
                    &follower.node_number,
                    follower.pod.as_ref(),
                    follower.terminating,
                    follower.failed,
                )?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}
