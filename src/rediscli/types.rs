//! Parsed replies of the data-store commands the operator relies on.

use std::collections::HashMap;

/// `CLUSTER INFO` reply: `key:value` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    fields: HashMap<String, String>,
}

impl ClusterInfo {
    pub fn parse(raw: &str) -> Self {
        let fields = raw
            .lines()
            .filter_map(|line| line.trim().split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Value of `cluster_state` (`ok` or `fail`), empty when absent.
    pub fn state(&self) -> &str {
        self.get("cluster_state").unwrap_or("")
    }

    /// Value of `cluster_size`: the number of masters serving slots.
    pub fn size(&self) -> Option<usize> {
        self.get("cluster_size").and_then(|s| s.parse().ok())
    }

    pub fn is_ok(&self) -> bool {
        self.state() == "ok"
    }

    pub fn is_cluster_fail(&self) -> bool {
        self.state() == "fail"
    }
}

impl FromIterator<(String, String)> for ClusterInfo {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// One line of `CLUSTER NODES` / `CLUSTER REPLICAS`.
///
/// `<id> <ip:port@cport> <flags> <master> <ping-sent> <pong-recv> <epoch> <link> <slot>...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub id: String,
    pub addr: String,
    pub flags: Vec<String>,
    /// Master ID, `-` for masters
    pub master_id: String,
    pub link_state: String,
}

impl ClusterNode {
    pub fn parse_line(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            return None;
        }
        Some(Self {
            id: parts[0].to_string(),
            addr: parts[1].to_string(),
            flags: parts[2].split(',').map(str::to_string).collect(),
            master_id: parts.get(3).unwrap_or(&"-").to_string(),
            link_state: parts.get(7).unwrap_or(&"").to_string(),
        })
    }

    /// Parse a multi-line reply, skipping blank or malformed lines.
    pub fn parse_table(raw: &str) -> Vec<Self> {
        raw.lines().filter_map(Self::parse_line).collect()
    }

    /// Host part of the address, without port and bus port.
    pub fn ip(&self) -> &str {
        let host = self.addr.split('@').next().unwrap_or("");
        match host.rsplit_once(':') {
            Some((ip, _)) => ip,
            None => host,
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// Flagged `fail` or `fail?` by the node that produced the table.
    pub fn is_failing(&self) -> bool {
        self.has_flag("fail") || self.has_flag("fail?")
    }

    pub fn is_myself(&self) -> bool {
        self.has_flag("myself")
    }

    pub fn is_master(&self) -> bool {
        self.has_flag("master")
    }
}

/// Sectioned `INFO` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedisInfo {
    sections: HashMap<String, HashMap<String, String>>,
}

impl RedisInfo {
    pub fn parse(raw: &str) -> Self {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current = String::new();
        for line in raw.lines() {
            let line = line.trim();
            if let Some(name) = line.strip_prefix('#') {
                current = name.trim().to_lowercase();
                continue;
            }
            if let Some((k, v)) = line.split_once(':') {
                sections
                    .entry(current.clone())
                    .or_default()
                    .insert(k.to_string(), v.to_string());
            }
        }
        Self { sections }
    }

    /// Build an info reply directly from section entries.
    pub fn from_sections<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<(S, S)>)>,
        S: Into<String>,
    {
        let sections = entries
            .into_iter()
            .map(|(name, fields)| {
                let fields = fields
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect();
                (name.into().to_lowercase(), fields)
            })
            .collect();
        Self { sections }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    /// `role` of the replication section: `master` or `slave`.
    pub fn role(&self) -> &str {
        self.get("replication", "role").unwrap_or("")
    }

    pub fn is_master(&self) -> bool {
        self.role() == "master"
    }

    pub fn master_host(&self) -> Option<&str> {
        self.get("replication", "master_host")
    }

    /// Bytes left to sync while a full resync from the master is running.
    pub fn sync_status(&self) -> Option<String> {
        if self.get("replication", "master_sync_in_progress") == Some("1") {
            let left = self
                .get("replication", "master_sync_left_bytes")
                .unwrap_or("unknown");
            return Some(left.to_string());
        }
        None
    }

    /// Load ETA in seconds while the dataset is being loaded.
    pub fn load_status(&self) -> Option<String> {
        if self.get("persistence", "loading") == Some("1") {
            let eta = self
                .get("persistence", "loading_eta_seconds")
                .unwrap_or("unknown");
            return Some(eta.to_string());
        }
        None
    }
}

/// Alternating key/value lines, as printed for `CONFIG GET`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedisArray(pub HashMap<String, String>);

impl RedisArray {
    pub fn parse(raw: &str) -> Self {
        let mut map = HashMap::new();
        if raw.trim().is_empty() {
            return Self(map);
        }
        let lines: Vec<&str> = raw.split('\n').collect();
        for pair in lines.chunks_exact(2) {
            let key = pair[0].trim_end_matches('\r').to_string();
            let value = pair[1].trim_end_matches('\r').to_string();
            map.insert(key, value);
        }
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}
