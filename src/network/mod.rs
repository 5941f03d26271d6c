mod client;
mod convert;
mod error;
mod server;

pub mod proto {
    tonic::include_proto!("raft");
}

pub use client::GrpcTransport;
pub use error::NetworkError;
pub use server::RaftServer;
