use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use super::proto;
use super::proto::raft_service_client::RaftServiceClient;
use super::NetworkError;
use crate::raft::{
    AppendDataRequest, AppendDataResponse, AppendEntriesRequest, AppendEntriesResponse,
    NodeSnapshot, RaftTransport, RequestVoteRequest, RequestVoteResponse,
};

/// gRPC connection to one peer. Connects lazily on first use and drops the
/// channel after a transport failure so the next call reconnects.
pub struct GrpcTransport {
    address: String,
    client: Mutex<Option<RaftServiceClient<Channel>>>,
}

impl GrpcTransport {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            client: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<RaftServiceClient<Channel>, NetworkError> {
        let endpoint = Endpoint::from_shared(format!("http://{}", self.address))
            .map_err(|e| NetworkError::ConnectionError(e.to_string()))?;

        let channel = endpoint
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(5))
            .connect()
            .await?;

        debug!("Connected to {}", self.address);
        Ok(RaftServiceClient::new(channel))
    }

    /// Returns a handle to the shared channel, connecting first if needed.
    async fn client(&self) -> Result<RaftServiceClient<Channel>, NetworkError> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = self.connect().await?;
        *guard = Some(client.clone());
        Ok(client)
    }

    async fn forget_on_transport_error<T>(
        &self,
        result: Result<T, tonic::Status>,
    ) -> Result<T, NetworkError> {
        match result {
            Ok(value) => Ok(value),
            Err(status) => {
                if status.code() == tonic::Code::Unavailable {
                    *self.client.lock().await = None;
                }
                Err(status.into())
            }
        }
    }

    pub async fn get_snapshot(&self) -> Result<NodeSnapshot, NetworkError> {
        let mut client = self.client().await?;
        let result = client
            .get_snapshot(Request::new(proto::SnapshotRequest {}))
            .await;
        let response = self.forget_on_transport_error(result).await?.into_inner();
        NodeSnapshot::try_from(response)
    }
}

#[async_trait]
impl RaftTransport for GrpcTransport {
    async fn append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, NetworkError> {
        let mut client = self.client().await?;
        let result = client
            .append_entries(Request::new(proto::AppendEntriesRequest::from(request)))
            .await;
        Ok(self.forget_on_transport_error(result).await?.into_inner().into())
    }

    async fn request_vote(
        &self,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse, NetworkError> {
        let mut client = self.client().await?;
        let result = client
            .request_vote(Request::new(proto::RequestVoteRequest::from(request)))
            .await;
        Ok(self.forget_on_transport_error(result).await?.into_inner().into())
    }

    async fn append_data(
        &self,
        request: AppendDataRequest,
    ) -> Result<AppendDataResponse, NetworkError> {
        let mut client = self.client().await?;
        let result = client
            .append_data(Request::new(proto::AppendDataRequest::from(request)))
            .await;
        Ok(self.forget_on_transport_error(result).await?.into_inner().into())
    }
}
