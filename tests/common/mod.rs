//! In-memory cluster used by the integration tests.
//!
//! `FakeCluster` plays both the platform and the data-store nodes. Pods are
//! ready as soon as they are created and each one starts a node with a fresh
//! ID. Membership is global: a node table lists every member that ever
//! joined, minus the IDs that node has forgotten, with dead members flagged
//! `fail`.

#![allow(dead_code)]

use async_trait::async_trait;
use redis_operator::platform::{
    ClusterState, Container, NodeNumbers, ObjectMeta, Orchestrator, Pod, PodCondition, PodRole,
    PodSpec, RedisCluster, RedisClusterSpec, APP_LABEL, APP_NAME, CLUSTER_LABEL,
    LEADER_NUMBER_LABEL, NODE_NUMBER_LABEL, REDIS_CONTAINER, ROLE_LABEL,
};
use redis_operator::rediscli::{
    ClusterInfo, ClusterNode, FailoverMode, NodeCommands, RedisArray, RedisInfo,
};
use redis_operator::{
    ClusterOperator, ClusterReconciler, CommandErrorKind, OperatorConfig, OperatorError, Result,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

pub const NAMESPACE: &str = "default";
pub const NODE_TIMEOUT_MS: u64 = 20;

pub fn test_config() -> Arc<OperatorConfig> {
    let config = OperatorConfig::from_toml_str(
        r#"
        [timing]
        generic_check_interval_ms = 5
        generic_check_timeout_ms = 400
        cluster_create_interval_ms = 5
        cluster_create_timeout_ms = 1000
        load_check_interval_ms = 5
        pod_check_interval_ms = 5
        pod_ready_timeout_ms = 1000
        pod_delete_timeout_ms = 1000

        [reconcile]
        max_concurrency = 4
        "#,
    )
    .expect("test config");
    Arc::new(config)
}

pub fn redis_cluster(leaders: usize, followers: usize) -> RedisCluster {
    RedisCluster {
        metadata: ObjectMeta {
            name: "dev-rdc".to_string(),
            namespace: NAMESPACE.to_string(),
            ..Default::default()
        },
        spec: RedisClusterSpec {
            leader_count: leaders,
            leader_followers_count: followers,
            image: None,
            redis_pod_spec: PodSpec {
                containers: vec![Container {
                    name: REDIS_CONTAINER.to_string(),
                    image: "redis:7.0".to_string(),
                    resources: Default::default(),
                }],
            },
        },
        status: Default::default(),
    }
}

#[derive(Debug)]
struct Node {
    ip: String,
    /// ID of the master this node replicates; `None` for masters
    master: Option<String>,
    alive: bool,
    joined: bool,
    forgotten: BTreeSet<String>,
    /// Number of upcoming INFO replies reporting `loading:1`
    loading_polls: u32,
}

#[derive(Debug, Default)]
struct State {
    pods: BTreeMap<String, Pod>,
    nodes: BTreeMap<String, Node>,
    members: Vec<String>,
    next_ip: u32,
    next_id: u32,
    next_uid: u32,
    auto_failover: bool,
    create_error: Option<bool>,
    forced_failover_errors: HashMap<String, CommandErrorKind>,
    /// Remaining `get_pod` lookups before a terminating pod is gone
    terminating: HashMap<String, u32>,
    config_keys: Vec<String>,
    states: Vec<ClusterState>,
    config_maps: usize,
    services: usize,
    created_pods: usize,
}

impl State {
    fn live_id(&self, ip: &str) -> Option<String> {
        self.nodes
            .iter()
            .find(|(_, n)| n.alive && n.ip == ip)
            .map(|(id, _)| id.clone())
    }

    fn node(&self, ip: &str, command: &str) -> Result<(String, &Node)> {
        let id = self.live_id(ip).ok_or_else(|| {
            OperatorError::command(
                ip,
                command,
                CommandErrorKind::Unreachable,
                format!("Could not connect to Redis at {}:6379: Connection refused", ip),
            )
        })?;
        let node = &self.nodes[&id];
        Ok((id, node))
    }

    fn node_mut(&mut self, ip: &str, command: &str) -> Result<(String, &mut Node)> {
        let (id, _) = self.node(ip, command)?;
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| OperatorError::Internal(id.clone()))?;
        Ok((id, node))
    }

    /// Promote `id` over its master; the old master and its other replicas
    /// follow the new one.
    fn promote(&mut self, id: &str) {
        let Some(old_master) = self.nodes.get(id).and_then(|n| n.master.clone()) else {
            return;
        };
        for (other, node) in self.nodes.iter_mut() {
            if other == id {
                node.master = None;
            } else if other == &old_master || node.master.as_deref() == Some(old_master.as_str()) {
                node.master = Some(id.to_string());
            }
        }
    }

    fn line(&self, viewer: &str, id: &str) -> String {
        let node = &self.nodes[id];
        let mut flags = Vec::new();
        if id == viewer {
            flags.push("myself");
        }
        flags.push(if node.master.is_some() { "slave" } else { "master" });
        if !node.alive {
            flags.push("fail");
        }
        format!(
            "{} {}:6379@16379 {} {} 0 0 1 {}",
            id,
            node.ip,
            flags.join(","),
            node.master.as_deref().unwrap_or("-"),
            if node.alive { "connected" } else { "disconnected" }
        )
    }

    fn add_pod(&mut self, cluster: &RedisCluster, role: PodRole, slot: &NodeNumbers) -> Pod {
        self.next_ip += 1;
        self.next_id += 1;
        self.next_uid += 1;
        self.created_pods += 1;
        let ip = format!("10.0.{}.{}", self.next_ip / 250, self.next_ip % 250 + 1);

        let mut labels = BTreeMap::new();
        labels.insert(APP_LABEL.to_string(), APP_NAME.to_string());
        labels.insert(CLUSTER_LABEL.to_string(), cluster.name().to_string());
        labels.insert(ROLE_LABEL.to_string(), role.to_string());
        labels.insert(NODE_NUMBER_LABEL.to_string(), slot.node_number.clone());
        labels.insert(LEADER_NUMBER_LABEL.to_string(), slot.leader_number.clone());

        let mut pod = Pod {
            metadata: ObjectMeta {
                name: format!("redis-node-{}-{}", slot.node_number, self.next_uid),
                namespace: cluster.namespace().to_string(),
                labels,
                deletion_timestamp: None,
            },
            spec: PodSpec {
                containers: cluster.spec.desired_containers(),
            },
            status: Default::default(),
        };
        pod.status.pod_ip = ip.clone();
        pod.status.conditions.push(PodCondition {
            kind: "Ready".to_string(),
            status: "True".to_string(),
        });

        self.nodes.insert(
            format!("id-{}", self.next_id),
            Node {
                ip,
                master: None,
                alive: true,
                joined: false,
                forgotten: BTreeSet::new(),
                loading_polls: 0,
            },
        );
        self.pods.insert(pod.name().to_string(), pod.clone());
        pod
    }

    /// Stop the node at `ip`; a lost master fails over to a live replica
    /// when automatic failover is on.
    fn kill_node(&mut self, ip: &str) {
        let Some(id) = self.live_id(ip) else { return };
        let was_master = self.nodes[&id].master.is_none();
        if let Some(node) = self.nodes.get_mut(&id) {
            node.alive = false;
        }
        if was_master && self.auto_failover {
            let replica = self
                .nodes
                .iter()
                .find(|(_, n)| n.alive && n.master.as_deref() == Some(id.as_str()))
                .map(|(rid, _)| rid.clone());
            if let Some(replica) = replica {
                self.promote(&replica);
            }
        }
    }

    fn remove_pod(&mut self, name: &str) -> Option<Pod> {
        let pod = self.pods.remove(name)?;
        self.terminating.remove(name);
        self.kill_node(pod.ip());
        Some(pod)
    }

    fn pod_name(&self, node_number: &str) -> Option<String> {
        self.pods
            .values()
            .find(|p| p.node_number() == node_number)
            .map(|p| p.name().to_string())
    }
}

/// Shared fake; clone handles freely.
#[derive(Clone)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        let state = State {
            auto_failover: true,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake state")
    }

    pub fn operator(&self, cluster: &RedisCluster) -> ClusterOperator {
        ClusterOperator::new(
            cluster.clone(),
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            test_config(),
        )
    }

    pub fn reconciler(&self, cluster: &RedisCluster) -> ClusterReconciler {
        ClusterReconciler::new(
            cluster,
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            test_config(),
        )
    }

    /// Create and fully initialize a cluster.
    pub async fn bootstrap(&self, cluster: &RedisCluster) {
        let operator = self.operator(cluster);
        operator.create_new_cluster().await.expect("create cluster");
        operator
            .initialize_followers()
            .await
            .expect("initialize followers");
    }

    pub fn set_auto_failover(&self, enabled: bool) {
        self.lock().auto_failover = enabled;
    }

    /// Make the next `CLUSTER CREATE` fail; with `formed` the cluster is
    /// still bootstrapped before the error is reported.
    pub fn fail_cluster_create(&self, formed: bool) {
        self.lock().create_error = Some(formed);
    }

    pub fn fail_forced_failover(&self, ip: &str, kind: CommandErrorKind) {
        self.lock()
            .forced_failover_errors
            .insert(ip.to_string(), kind);
    }

    /// Pod currently holding `node_number`.
    pub fn pod(&self, node_number: &str) -> Option<Pod> {
        self.lock()
            .pods
            .values()
            .find(|p| p.node_number() == node_number)
            .cloned()
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.lock().pods.values().cloned().collect()
    }

    /// Remove the pod of a slot as if its host vanished.
    pub fn kill(&self, node_number: &str) -> Pod {
        let mut state = self.lock();
        let name = state.pod_name(node_number).expect("pod to kill");
        state.remove_pod(&name).expect("pod removed")
    }

    /// Mark the pod of a slot for deletion and stop its node. The pod stays
    /// listed until it has been looked up `lookups` more times.
    pub fn terminate(&self, node_number: &str, lookups: u32) -> Pod {
        let mut state = self.lock();
        let name = state.pod_name(node_number).expect("pod to terminate");
        let ip = state.pods[&name].ip().to_string();
        state.kill_node(&ip);
        state.terminating.insert(name.clone(), lookups);
        let pod = state.pods.get_mut(&name).expect("pod");
        pod.metadata.deletion_timestamp = Some("2024-01-01T00:00:00Z".to_string());
        pod.clone()
    }

    /// Turn the pod of a slot into one that was rescheduled and never came
    /// up: no address, not ready, no node behind it.
    pub fn make_pending(&self, node_number: &str) -> Pod {
        let mut state = self.lock();
        let name = state.pod_name(node_number).expect("pod to reschedule");
        let ip = state.pods[&name].ip().to_string();
        state.kill_node(&ip);
        let pod = state.pods.get_mut(&name).expect("pod");
        pod.status.pod_ip.clear();
        pod.status.conditions.clear();
        pod.clone()
    }

    /// Append a container the platform injected into every pod.
    pub fn add_sidecar(&self, name: &str) {
        let mut state = self.lock();
        for pod in state.pods.values_mut() {
            pod.spec.containers.push(Container {
                name: name.to_string(),
                image: format!("{}:latest", name),
                resources: Default::default(),
            });
        }
    }

    pub fn set_pod_image(&self, node_number: &str, image: &str) {
        let mut state = self.lock();
        if let Some(pod) = state
            .pods
            .values_mut()
            .find(|p| p.node_number() == node_number)
        {
            for container in &mut pod.spec.containers {
                container.image = image.to_string();
            }
        }
    }

    /// Promote the node at `ip` as if an automatic failover happened.
    pub fn promote(&self, ip: &str) {
        let mut state = self.lock();
        if let Some(id) = state.live_id(ip) {
            state.promote(&id);
        }
    }

    /// Add a member ID that belongs to no pod to every node table.
    pub fn add_phantom_member(&self, id: &str) {
        let mut state = self.lock();
        state.nodes.insert(
            id.to_string(),
            Node {
                ip: "10.9.9.9".to_string(),
                master: None,
                alive: false,
                joined: true,
                forgotten: BTreeSet::new(),
                loading_polls: 0,
            },
        );
        state.members.push(id.to_string());
    }

    pub fn is_master(&self, ip: &str) -> bool {
        let state = self.lock();
        state
            .live_id(ip)
            .map_or(false, |id| state.nodes[&id].master.is_none())
    }

    pub fn master_of(&self, ip: &str) -> Option<String> {
        let state = self.lock();
        let id = state.live_id(ip)?;
        let master = state.nodes[&id].master.clone()?;
        Some(state.nodes[&master].ip.clone())
    }

    /// IDs in the node table of `ip`.
    pub fn table_ids(&self, ip: &str) -> Vec<String> {
        let state = self.lock();
        let id = state.live_id(ip).expect("live node");
        let forgotten = &state.nodes[&id].forgotten;
        state
            .members
            .iter()
            .filter(|m| !forgotten.contains(*m))
            .cloned()
            .collect()
    }

    /// Keys requested through `CONFIG GET`, in order.
    pub fn config_keys(&self) -> Vec<String> {
        self.lock().config_keys.clone()
    }

    pub fn states(&self) -> Vec<ClusterState> {
        self.lock().states.clone()
    }

    pub fn created_pods(&self) -> usize {
        self.lock().created_pods
    }

    pub fn provisioned(&self) -> (usize, usize) {
        let state = self.lock();
        (state.config_maps, state.services)
    }
}

#[async_trait]
impl NodeCommands for FakeCluster {
    async fn ping(&self, ip: &str) -> Result<String> {
        self.lock().node(ip, "PING")?;
        Ok("PONG".to_string())
    }

    async fn cluster_info(&self, ip: &str) -> Result<ClusterInfo> {
        let state = self.lock();
        let (_, node) = state.node(ip, "CLUSTER INFO")?;
        let (cluster_state, size) = if node.joined {
            let masters = state
                .members
                .iter()
                .filter(|m| {
                    let n = &state.nodes[*m];
                    n.alive && n.master.is_none()
                })
                .count();
            ("ok", masters)
        } else {
            ("fail", 0)
        };
        Ok(ClusterInfo::parse(&format!(
            "cluster_state:{}\r\ncluster_size:{}\r\n",
            cluster_state, size
        )))
    }

    async fn cluster_nodes(&self, ip: &str) -> Result<Vec<ClusterNode>> {
        let state = self.lock();
        let (id, node) = state.node(ip, "CLUSTER NODES")?;
        if !node.joined {
            return Ok(ClusterNode::parse_table(&state.line(&id, &id)));
        }
        let table: Vec<String> = state
            .members
            .iter()
            .filter(|m| !node.forgotten.contains(*m))
            .map(|m| state.line(&id, m))
            .collect();
        Ok(ClusterNode::parse_table(&table.join("\n")))
    }

    async fn my_cluster_id(&self, ip: &str) -> Result<String> {
        Ok(self.lock().node(ip, "CLUSTER MYID")?.0)
    }

    async fn cluster_create(&self, leader_ips: &[String]) -> Result<()> {
        let mut state = self.lock();
        let outcome = state.create_error.take();
        if outcome == Some(false) {
            return Err(OperatorError::command(
                leader_ips.join(","),
                "--cluster create",
                CommandErrorKind::Rejected,
                "[ERR] Node is not empty",
            ));
        }
        for ip in leader_ips {
            let (id, node) = state.node_mut(ip, "--cluster create")?;
            node.joined = true;
            node.master = None;
            if !state.members.contains(&id) {
                state.members.push(id);
            }
        }
        match outcome {
            Some(_) => Err(OperatorError::command(
                leader_ips.join(","),
                "--cluster create",
                CommandErrorKind::Rejected,
                "[ERR] Timed out waiting for the cluster to join",
            )),
            None => Ok(()),
        }
    }

    async fn add_node_as_replica(
        &self,
        follower_ip: &str,
        leader_ip: &str,
        leader_id: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        state.node(leader_ip, "--cluster add-node")?;
        let (id, node) = state.node_mut(follower_ip, "--cluster add-node")?;
        if node.joined && node.master.as_deref() == Some(leader_id) {
            return Err(OperatorError::command(
                follower_ip,
                "--cluster add-node",
                CommandErrorKind::AlreadyAgreed,
                "[OK] All nodes agree about slots configuration.",
            ));
        }
        node.joined = true;
        node.master = Some(leader_id.to_string());
        node.loading_polls = 2;
        if !state.members.contains(&id) {
            state.members.push(id);
        }
        Ok(())
    }

    async fn cluster_failover(&self, ip: &str, mode: FailoverMode) -> Result<()> {
        let mut state = self.lock();
        if mode == FailoverMode::Force {
            if let Some(kind) = state.forced_failover_errors.get(ip) {
                return Err(OperatorError::command(
                    ip,
                    "CLUSTER FAILOVER FORCE",
                    *kind,
                    "ERR forced failover rejected",
                ));
            }
        }
        let (id, node) = state.node(ip, "CLUSTER FAILOVER")?;
        if node.master.is_none() {
            return Err(OperatorError::command(
                ip,
                "CLUSTER FAILOVER",
                CommandErrorKind::NotReplica,
                "ERR You should send CLUSTER FAILOVER to a replica",
            ));
        }
        state.promote(&id);
        Ok(())
    }

    async fn cluster_replicas(&self, leader_ip: &str, leader_id: &str) -> Result<Vec<ClusterNode>> {
        let state = self.lock();
        let (id, node) = state.node(leader_ip, "CLUSTER REPLICAS")?;
        if node.master.is_some() {
            return Err(OperatorError::command(
                leader_ip,
                "CLUSTER REPLICAS",
                CommandErrorKind::NotMaster,
                "ERR The specified node is not a master",
            ));
        }
        let lines: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, n)| n.alive && n.master.as_deref() == Some(leader_id))
            .map(|(rid, _)| state.line(&id, rid))
            .collect();
        Ok(ClusterNode::parse_table(&lines.join("\n")))
    }

    async fn cluster_forget(&self, ip: &str, node_id: &str) -> Result<()> {
        let mut state = self.lock();
        let known = state.members.iter().any(|m| m == node_id);
        let (id, node) = state.node_mut(ip, "CLUSTER FORGET")?;
        if id == node_id {
            return Err(OperatorError::command(
                ip,
                "CLUSTER FORGET",
                CommandErrorKind::Rejected,
                "ERR I tried hard but I can't forget myself...",
            ));
        }
        if !known || !node.forgotten.insert(node_id.to_string()) {
            return Err(OperatorError::command(
                ip,
                "CLUSTER FORGET",
                CommandErrorKind::UnknownNode,
                format!("ERR Unknown node {}", node_id),
            ));
        }
        Ok(())
    }

    async fn info(&self, ip: &str) -> Result<RedisInfo> {
        let mut state = self.lock();
        let (_, node) = state.node_mut(ip, "INFO")?;
        let loading = if node.loading_polls > 0 {
            node.loading_polls -= 1;
            "1"
        } else {
            "0"
        };
        let master = node.master.clone();
        let mut replication = vec![("master_sync_in_progress".to_string(), "0".to_string())];
        match master {
            Some(master) => {
                replication.push(("role".to_string(), "slave".to_string()));
                replication.push(("master_host".to_string(), state.nodes[&master].ip.clone()));
            }
            None => replication.push(("role".to_string(), "master".to_string())),
        }
        Ok(RedisInfo::from_sections(vec![
            ("Replication".to_string(), replication),
            (
                "Persistence".to_string(),
                vec![
                    ("loading".to_string(), loading.to_string()),
                    ("loading_eta_seconds".to_string(), "1".to_string()),
                ],
            ),
        ]))
    }

    async fn flush_all(&self, ip: &str) -> Result<()> {
        self.lock().node(ip, "FLUSHALL")?;
        Ok(())
    }

    async fn cluster_reset(&self, ip: &str) -> Result<()> {
        let mut state = self.lock();
        let (_, node) = state.node_mut(ip, "CLUSTER RESET")?;
        node.joined = false;
        node.master = None;
        node.forgotten.clear();
        Ok(())
    }

    async fn config_get(&self, ip: &str, key: &str) -> Result<RedisArray> {
        let mut state = self.lock();
        state.node(ip, "CONFIG GET")?;
        state.config_keys.push(key.to_string());
        let mut values = HashMap::new();
        if key == "cluster-node-timeout" {
            values.insert(key.to_string(), NODE_TIMEOUT_MS.to_string());
        }
        Ok(RedisArray(values))
    }
}

#[async_trait]
impl Orchestrator for FakeCluster {
    async fn list_pods(&self, cluster: &RedisCluster, role: Option<PodRole>) -> Result<Vec<Pod>> {
        let role = role.map(|r| r.to_string());
        Ok(self
            .lock()
            .pods
            .values()
            .filter(|p| p.namespace() == cluster.namespace())
            .filter(|p| p.label(CLUSTER_LABEL) == Some(cluster.name()))
            .filter(|p| role.as_deref().map_or(true, |r| p.label(ROLE_LABEL) == Some(r)))
            .cloned()
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let mut state = self.lock();
        let gone = match state.terminating.get_mut(name) {
            Some(0) => true,
            Some(left) => {
                *left -= 1;
                false
            }
            None => false,
        };
        if gone {
            state.remove_pod(name);
        }
        Ok(state
            .pods
            .get(name)
            .filter(|p| p.namespace() == namespace)
            .cloned())
    }

    async fn pod_by_ip(&self, cluster: &RedisCluster, ip: &str) -> Result<Pod> {
        self.list_pods(cluster, None)
            .await?
            .into_iter()
            .find(|p| p.ip() == ip)
            .ok_or_else(|| OperatorError::NodeNotFound(format!("no pod with IP {}", ip)))
    }

    async fn create_leader_pods(
        &self,
        cluster: &RedisCluster,
        leader_numbers: &[String],
    ) -> Result<Vec<Pod>> {
        let mut state = self.lock();
        Ok(leader_numbers
            .iter()
            .map(|n| state.add_pod(cluster, PodRole::Leader, &NodeNumbers::new(n.clone(), n.clone())))
            .collect())
    }

    async fn create_follower_pods(
        &self,
        cluster: &RedisCluster,
        slots: &[NodeNumbers],
    ) -> Result<Vec<Pod>> {
        let mut state = self.lock();
        Ok(slots
            .iter()
            .map(|slot| state.add_pod(cluster, PodRole::Follower, slot))
            .collect())
    }

    async fn delete_pods_by_ip(&self, _cluster: &RedisCluster, ips: &[String]) -> Result<Vec<Pod>> {
        let mut state = self.lock();
        let names: Vec<String> = state
            .pods
            .values()
            .filter(|p| ips.iter().any(|ip| ip == p.ip()))
            .map(|p| p.name().to_string())
            .collect();
        Ok(names
            .iter()
            .filter_map(|name| state.remove_pod(name))
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        if state.pods.get(name).map_or(false, |p| p.namespace() == namespace) {
            state.remove_pod(name);
        }
        Ok(())
    }

    async fn create_settings_config_map(&self, _cluster: &RedisCluster) -> Result<()> {
        self.lock().config_maps += 1;
        Ok(())
    }

    async fn create_service(&self, _cluster: &RedisCluster) -> Result<()> {
        self.lock().services += 1;
        Ok(())
    }

    async fn update_cluster_state(&self, _cluster: &RedisCluster, state: ClusterState) -> Result<()> {
        self.lock().states.push(state);
        Ok(())
    }
}
