use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use log::{error, info};

use chorus::network::{GrpcTransport, RaftServer};
use chorus::raft::{AppendDataRequest, LoggingApplier, Raft, RaftTransport};
use chorus::storage::SledStorage;
use chorus::ClusterConfig;

struct RotatingFile {
    path: String,
    max_size: u64,
    max_files: u32,
    file: File,
    current_size: u64,
}

impl RotatingFile {
    fn new(path: String, max_size: u64, max_files: u32) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            max_size,
            max_files,
            file,
            current_size,
        })
    }

    // path.N-1 -> path.N, ..., path -> path.1
    fn rotate(&mut self) -> io::Result<()> {
        for i in (1..self.max_files).rev() {
            let _ = std::fs::rename(
                format!("{}.{}", self.path, i),
                format!("{}.{}", self.path, i + 1),
            );
        }
        let _ = std::fs::rename(&self.path, format!("{}.1", self.path));

        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.current_size = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.current_size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// `RUST_LOG` filters (default `info`); `CHORUS_LOG_FILE` redirects output
/// to a size-rotated file.
fn init_logging() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if let Ok(path) = std::env::var("CHORUS_LOG_FILE") {
        let max_size_mb: u64 = env_or("CHORUS_LOG_MAX_SIZE_MB", 10);
        let max_files: u32 = env_or("CHORUS_LOG_MAX_FILES", 3);

        match RotatingFile::new(path.clone(), max_size_mb * 1024 * 1024, max_files) {
            Ok(rot) => {
                builder.target(env_logger::Target::Pipe(Box::new(rot)));
            }
            Err(e) => eprintln!("Cannot open log file {path}: {e}, logging to stderr"),
        }
    }

    builder.init();
}

#[derive(Parser)]
#[command(name = "chorus")]
#[command(about = "A Raft consensus node with a serialized event-loop core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a cluster member
    Node {
        /// Cluster config JSON (local_id, nodes, timing)
        #[arg(short, long)]
        config: String,

        /// Directory for the node's persistent state
        #[arg(short, long, default_value = "data")]
        db: String,
    },

    /// Print a node's state as JSON
    Status {
        /// gRPC address of the node, e.g. 127.0.0.1:7001
        #[arg(short, long)]
        address: String,
    },

    /// Submit a client write to the cluster through any node
    Append {
        /// gRPC address of the node, e.g. 127.0.0.1:7001
        #[arg(short, long)]
        address: String,

        /// Payload of the new log entry
        #[arg(short, long)]
        data: String,
    },
}

async fn run_node(config_path: &str, db: &str) -> anyhow::Result<()> {
    let config = ClusterConfig::from_file(config_path)
        .with_context(|| format!("loading cluster config {config_path}"))?;
    let address: std::net::SocketAddr = config
        .local_address()
        .ok_or_else(|| anyhow!("no address for local node {}", config.local_id))?
        .parse()
        .context("parsing listen address")?;

    let storage = SledStorage::open(db).with_context(|| format!("opening storage at {db}"))?;

    let mut peers: HashMap<String, Arc<dyn RaftTransport>> = HashMap::new();
    for peer in config.peers() {
        info!("Added peer: {} at {}", peer.id, peer.address);
        peers.insert(peer.id.clone(), Arc::new(GrpcTransport::new(&peer.address)));
    }

    let raft = Raft::start(config.raft_config(), storage, peers, LoggingApplier)?;
    let server = RaftServer::new(raft.clone(), config.request_timeout());

    // Stop serving on ctrl-c or if the node dies on its own.
    let mut node_exit = None;
    let signal = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
            result = raft.join() => node_exit = Some(result),
        }
    };

    info!("gRPC server for {} listening on {address}", config.local_id);
    let served = tonic::transport::Server::builder()
        .add_service(server.into_service())
        .serve_with_shutdown(address, signal)
        .await;

    raft.close();
    let node_result = match node_exit {
        Some(result) => result,
        None => raft.join().await,
    };
    if let Err(e) = &node_result {
        error!("Node stopped with error: {e}");
    }

    served?;
    node_result?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Node { config, db } => run_node(&config, &db).await?,
        Command::Status { address } => {
            let snapshot = GrpcTransport::new(&address).get_snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Append { address, data } => {
            let response = GrpcTransport::new(&address)
                .append_data(AppendDataRequest {
                    data: data.into_bytes(),
                })
                .await?;
            println!("{}", if response.success { "ok" } else { "rejected" });
        }
    }

    Ok(())
}
