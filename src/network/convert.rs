//! Conversions between the wire messages and the node's own types.

use super::proto;
use super::NetworkError;
use crate::raft::{
    AppendDataRequest, AppendDataResponse, AppendEntriesRequest, AppendEntriesResponse, LogEntry,
    LogSummary, NodeRole, NodeSnapshot, RequestVoteRequest, RequestVoteResponse,
};

impl From<LogEntry> for proto::LogEntry {
    fn from(entry: LogEntry) -> Self {
        Self {
            index: entry.index,
            term: entry.term,
            data: entry.data,
        }
    }
}

impl From<proto::LogEntry> for LogEntry {
    fn from(entry: proto::LogEntry) -> Self {
        LogEntry::new(entry.index, entry.term, entry.data)
    }
}

impl From<AppendEntriesRequest> for proto::AppendEntriesRequest {
    fn from(req: AppendEntriesRequest) -> Self {
        Self {
            term: req.term,
            leader_id: req.leader_id,
            prev_log_index: req.prev_log_index,
            prev_log_term: req.prev_log_term,
            entries: req.entries.into_iter().map(Into::into).collect(),
            leader_commit: req.leader_commit,
        }
    }
}

impl From<proto::AppendEntriesRequest> for AppendEntriesRequest {
    fn from(req: proto::AppendEntriesRequest) -> Self {
        Self {
            term: req.term,
            leader_id: req.leader_id,
            prev_log_index: req.prev_log_index,
            prev_log_term: req.prev_log_term,
            entries: req.entries.into_iter().map(Into::into).collect(),
            leader_commit: req.leader_commit,
        }
    }
}

impl From<AppendEntriesResponse> for proto::AppendEntriesResponse {
    fn from(resp: AppendEntriesResponse) -> Self {
        Self {
            term: resp.term,
            success: resp.success,
        }
    }
}

impl From<proto::AppendEntriesResponse> for AppendEntriesResponse {
    fn from(resp: proto::AppendEntriesResponse) -> Self {
        Self {
            term: resp.term,
            success: resp.success,
        }
    }
}

impl From<RequestVoteRequest> for proto::RequestVoteRequest {
    fn from(req: RequestVoteRequest) -> Self {
        Self {
            term: req.term,
            candidate_id: req.candidate_id,
            last_log_index: req.last_log_index,
            last_log_term: req.last_log_term,
        }
    }
}

impl From<proto::RequestVoteRequest> for RequestVoteRequest {
    fn from(req: proto::RequestVoteRequest) -> Self {
        Self {
            term: req.term,
            candidate_id: req.candidate_id,
            last_log_index: req.last_log_index,
            last_log_term: req.last_log_term,
        }
    }
}

impl From<RequestVoteResponse> for proto::RequestVoteResponse {
    fn from(resp: RequestVoteResponse) -> Self {
        Self {
            term: resp.term,
            vote_granted: resp.vote_granted,
        }
    }
}

impl From<proto::RequestVoteResponse> for RequestVoteResponse {
    fn from(resp: proto::RequestVoteResponse) -> Self {
        Self {
            term: resp.term,
            vote_granted: resp.vote_granted,
        }
    }
}

impl From<AppendDataRequest> for proto::AppendDataRequest {
    fn from(req: AppendDataRequest) -> Self {
        Self { data: req.data }
    }
}

impl From<proto::AppendDataRequest> for AppendDataRequest {
    fn from(req: proto::AppendDataRequest) -> Self {
        Self { data: req.data }
    }
}

impl From<AppendDataResponse> for proto::AppendDataResponse {
    fn from(resp: AppendDataResponse) -> Self {
        Self {
            success: resp.success,
        }
    }
}

impl From<proto::AppendDataResponse> for AppendDataResponse {
    fn from(resp: proto::AppendDataResponse) -> Self {
        Self {
            success: resp.success,
        }
    }
}

impl From<NodeRole> for proto::Role {
    fn from(role: NodeRole) -> Self {
        match role {
            NodeRole::Follower => proto::Role::Follower,
            NodeRole::Candidate => proto::Role::Candidate,
            NodeRole::Leader => proto::Role::Leader,
        }
    }
}

impl From<proto::Role> for NodeRole {
    fn from(role: proto::Role) -> Self {
        match role {
            proto::Role::Follower => NodeRole::Follower,
            proto::Role::Candidate => NodeRole::Candidate,
            proto::Role::Leader => NodeRole::Leader,
        }
    }
}

impl From<NodeSnapshot> for proto::SnapshotResponse {
    fn from(snapshot: NodeSnapshot) -> Self {
        Self {
            current_term: snapshot.current_term,
            commit_index: snapshot.commit_index,
            last_applied: snapshot.last_applied,
            role: proto::Role::from(snapshot.role) as i32,
            current_leader: snapshot.current_leader.unwrap_or_default(),
            next_index: snapshot.next_index.into_iter().collect(),
            match_index: snapshot.match_index.into_iter().collect(),
            logs: snapshot
                .logs
                .into_iter()
                .map(|l| proto::LogSummary {
                    index: l.index,
                    term: l.term,
                    size: l.size as u64,
                })
                .collect(),
        }
    }
}

impl TryFrom<proto::SnapshotResponse> for NodeSnapshot {
    type Error = NetworkError;

    fn try_from(resp: proto::SnapshotResponse) -> Result<Self, Self::Error> {
        let role = proto::Role::try_from(resp.role)
            .map_err(|_| NetworkError::InvalidMessage(format!("unknown role {}", resp.role)))?;

        Ok(Self {
            current_term: resp.current_term,
            commit_index: resp.commit_index,
            last_applied: resp.last_applied,
            role: role.into(),
            // An empty leader id on the wire means "unknown".
            current_leader: Some(resp.current_leader).filter(|l| !l.is_empty()),
            next_index: resp.next_index.into_iter().collect(),
            match_index: resp.match_index.into_iter().collect(),
            logs: resp
                .logs
                .into_iter()
                .map(|l| LogSummary {
                    index: l.index,
                    term: l.term,
                    size: l.size as usize,
                })
                .collect(),
        })
    }
}
