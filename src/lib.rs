pub mod config;
pub mod network;
pub mod raft;
pub mod storage;

// Public exports
pub use config::ClusterConfig;
pub use raft::{Raft, RaftConfig, RaftError};
