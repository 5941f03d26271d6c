use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tonic::{Request, Response, Status};

use super::proto;
use super::proto::raft_service_server::RaftService;
use crate::raft::{Raft, RaftError};

/// Serves the Raft RPCs by handing every request to the local node.
pub struct RaftServer {
    raft: Raft,
    request_timeout: Duration,
}

impl RaftServer {
    pub fn new(raft: Raft, request_timeout: Duration) -> Self {
        Self {
            raft,
            request_timeout,
        }
    }

    pub fn into_service(self) -> proto::raft_service_server::RaftServiceServer<Self> {
        proto::raft_service_server::RaftServiceServer::new(self)
    }

    /// Bounds a call into the node by the per-request timeout.
    async fn call<T>(
        &self,
        rpc: &str,
        fut: impl Future<Output = Result<T, RaftError>>,
    ) -> Result<T, Status> {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!("{rpc} failed: {e}");
                Err(e.into())
            }
            Err(_) => {
                warn!("{rpc} timed out after {:?}", self.request_timeout);
                Err(RaftError::Timeout.into())
            }
        }
    }
}

impl From<RaftError> for Status {
    fn from(err: RaftError) -> Self {
        match err {
            RaftError::Stopped | RaftError::NoLeader | RaftError::Network(_) => {
                Status::unavailable(err.to_string())
            }
            RaftError::Timeout => Status::deadline_exceeded(err.to_string()),
            other => Status::internal(other.to_string()),
        }
    }
}

#[tonic::async_trait]
impl RaftService for RaftServer {
    async fn append_entries(
        &self,
        request: Request<proto::AppendEntriesRequest>,
    ) -> Result<Response<proto::AppendEntriesResponse>, Status> {
        let req = request.into_inner();
        debug!(
            "Received AppendEntries: term={}, leader={}, entries={}",
            req.term,
            req.leader_id,
            req.entries.len()
        );

        let resp = self
            .call("AppendEntries", self.raft.append_entries(req.into()))
            .await?;
        Ok(Response::new(resp.into()))
    }

    async fn request_vote(
        &self,
        request: Request<proto::RequestVoteRequest>,
    ) -> Result<Response<proto::RequestVoteResponse>, Status> {
        let req = request.into_inner();
        debug!("Received RequestVote: {:?}", req);

        let resp = self
            .call("RequestVote", self.raft.request_vote(req.into()))
            .await?;
        Ok(Response::new(resp.into()))
    }

    async fn append_data(
        &self,
        request: Request<proto::AppendDataRequest>,
    ) -> Result<Response<proto::AppendDataResponse>, Status> {
        let req = request.into_inner();
        debug!("Received AppendData: {} bytes", req.data.len());

        let resp = self
            .call("AppendData", self.raft.append_data(req.into()))
            .await?;
        Ok(Response::new(resp.into()))
    }

    async fn get_snapshot(
        &self,
        _request: Request<proto::SnapshotRequest>,
    ) -> Result<Response<proto::SnapshotResponse>, Status> {
        let snapshot = self.call("GetSnapshot", self.raft.get_snapshot()).await?;
        Ok(Response::new(snapshot.into()))
    }
}
