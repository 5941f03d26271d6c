use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Sled error: {0}")]
    SledError(#[from] sled::Error),

    #[error("Encode error: {0}")]
    EncodeError(#[from] bincode::error::EncodeError),

    #[error("Decode error: {0}")]
    DecodeError(#[from] bincode::error::DecodeError),

    #[error("Non-contiguous log write: expected index {expected}, got {got}")]
    NonContiguous { expected: u64, got: u64 },

    #[error("Log entry {0} is missing")]
    MissingEntry(u64),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}
