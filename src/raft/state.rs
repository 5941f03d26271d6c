use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Follower => write!(f, "follower"),
            NodeRole::Candidate => write!(f, "candidate"),
            NodeRole::Leader => write!(f, "leader"),
        }
    }
}

/// Position and size of one log entry, without its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSummary {
    pub index: u64,
    pub term: u64,
    pub size: usize,
}

/// Point-in-time view of a node, taken between two events of its loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub current_term: u64,
    pub commit_index: u64,
    pub last_applied: u64,
    pub role: NodeRole,
    pub current_leader: Option<String>,
    pub next_index: BTreeMap<String, u64>,
    pub match_index: BTreeMap<String, u64>,
    pub logs: Vec<LogSummary>,
}

impl NodeSnapshot {
    pub fn is_leader(&self) -> bool {
        self.role == NodeRole::Leader
    }

    pub fn last_log_index(&self) -> u64 {
        self.logs.last().map(|l| l.index).unwrap_or(0)
    }
}
