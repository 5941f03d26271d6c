use std::time::Duration;

use super::RaftError;

#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub node_id: String,
    pub members: Vec<String>,       // every node id in the cluster, self included
    pub election_timeout_min: u64,  // in milliseconds
    pub election_timeout_span: u64, // in milliseconds
    pub heartbeat_interval: u64,    // in milliseconds
    pub rpc_timeout: u64,           // in milliseconds
    pub max_append_entries: usize,
}

impl RaftConfig {
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            members: vec![node_id.to_string()],
            election_timeout_min: 500,
            election_timeout_span: 500,
            heartbeat_interval: 50,
            rpc_timeout: 200,
            max_append_entries: 64,
        }
    }

    pub fn add_member(&mut self, node_id: &str) {
        if !self.members.iter().any(|m| m == node_id) {
            self.members.push(node_id.to_string());
        }
    }

    /// Every member except the local node.
    pub fn peers(&self) -> impl Iterator<Item = &String> + '_ {
        self.members.iter().filter(move |m| **m != self.node_id)
    }

    /// Smallest number of members that forms a majority.
    pub fn quorum(&self) -> usize {
        self.members.len() / 2 + 1
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    pub fn rpc_deadline(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout)
    }

    pub fn validate(&self) -> Result<(), RaftError> {
        if self.members.len() % 2 != 1 {
            return Err(RaftError::InvalidConfig(format!(
                "number of nodes in the cluster must be odd, got {}",
                self.members.len()
            )));
        }
        if !self.members.contains(&self.node_id) {
            return Err(RaftError::InvalidConfig(format!(
                "local node {:?} is not a cluster member",
                self.node_id
            )));
        }
        if self.election_timeout_min == 0 || self.heartbeat_interval >= self.election_timeout_min {
            return Err(RaftError::InvalidConfig(format!(
                "heartbeat interval ({}ms) must be shorter than the election timeout ({}ms)",
                self.heartbeat_interval, self.election_timeout_min
            )));
        }
        if self.max_append_entries == 0 {
            return Err(RaftError::InvalidConfig(
                "max_append_entries must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
