use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::raft::{RaftConfig, RaftError};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid cluster config: {0}")]
    Invalid(String),
}

/// Cluster description shared by every node; each node loads its own copy
/// with its own `local_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub local_id: String,
    pub nodes: Vec<PeerConfig>,
    #[serde(default = "default_election_timeout_min_ms")]
    pub election_timeout_min_ms: u64,
    #[serde(default = "default_election_timeout_span_ms")]
    pub election_timeout_span_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    /// Bound on how long the gRPC server waits for the local node.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_append_entries")]
    pub max_append_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: String,
    pub address: String,
}

fn default_election_timeout_min_ms() -> u64 {
    500
}

fn default_election_timeout_span_ms() -> u64 {
    500
}

fn default_heartbeat_interval_ms() -> u64 {
    50
}

fn default_rpc_timeout_ms() -> u64 {
    200
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_max_append_entries() -> usize {
    64
}

impl ClusterConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: ClusterConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks what only the JSON form can get wrong, then defers to
    /// `RaftConfig::validate` for cluster size and timing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate node id {:?}", node.id)));
            }
            if node.address.is_empty() {
                return Err(ConfigError::Invalid(format!("node {:?} has no address", node.id)));
            }
        }

        // `raft_config` always counts the local node, so check it is listed.
        if !seen.contains(self.local_id.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "local id {:?} is not listed in nodes",
                self.local_id
            )));
        }

        self.raft_config().validate().map_err(|e| match e {
            RaftError::InvalidConfig(reason) => ConfigError::Invalid(reason),
            other => ConfigError::Invalid(other.to_string()),
        })
    }

    /// Address the local node listens on.
    pub fn local_address(&self) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.id == self.local_id)
            .map(|n| n.address.as_str())
    }

    /// Every node except the local one.
    pub fn peers(&self) -> impl Iterator<Item = &PeerConfig> + '_ {
        self.nodes.iter().filter(move |n| n.id != self.local_id)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn raft_config(&self) -> RaftConfig {
        let mut config = RaftConfig::new(&self.local_id);
        for node in &self.nodes {
            config.add_member(&node.id);
        }
        config.election_timeout_min = self.election_timeout_min_ms;
        config.election_timeout_span = self.election_timeout_span_ms;
        config.heartbeat_interval = self.heartbeat_interval_ms;
        config.rpc_timeout = self.rpc_timeout_ms;
        config.max_append_entries = self.max_append_entries;
        config
    }
}
