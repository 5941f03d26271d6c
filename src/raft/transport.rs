use async_trait::async_trait;

use super::{
    AppendDataRequest, AppendDataResponse, AppendEntriesRequest, AppendEntriesResponse,
    RequestVoteRequest, RequestVoteResponse,
};
use crate::network::NetworkError;

/// Outbound connection to a single peer.
///
/// The core never awaits these calls on its own loop: each call runs on a
/// spawned task bounded by the configured RPC timeout, and an error is
/// treated the same as a lost response.
#[async_trait]
pub trait RaftTransport: Send + Sync + 'static {
    async fn append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, NetworkError>;

    async fn request_vote(
        &self,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse, NetworkError>;

    /// Only used to forward client writes to the leader.
    async fn append_data(
        &self,
        request: AppendDataRequest,
    ) -> Result<AppendDataResponse, NetworkError>;
}
