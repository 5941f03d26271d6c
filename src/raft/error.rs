use thiserror::Error;

use crate::network::NetworkError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum RaftError {
    #[error("No known leader")]
    NoLeader,

    #[error("Node is stopped")]
    Stopped,

    #[error("Timeout")]
    Timeout,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Failed to apply log entry {index}: {source}")]
    Apply {
        index: u64,
        #[source]
        source: anyhow::Error,
    },
}
