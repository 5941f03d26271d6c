mod apply;
mod config;
mod error;
mod log;
mod message;
mod node;
mod state;
mod timer;
mod transport;

pub use self::apply::{Applier, LoggingApplier};
pub use self::config::RaftConfig;
pub use self::error::RaftError;
pub use self::log::LogEntry;
pub use self::message::{
    AppendDataRequest, AppendDataResponse, AppendEntriesRequest, AppendEntriesResponse,
    RequestVoteRequest, RequestVoteResponse,
};
pub use self::state::{LogSummary, NodeRole, NodeSnapshot};
pub use self::transport::RaftTransport;

use std::collections::HashMap;
use std::sync::Arc;

use ::log::info;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use self::node::{Event, RaftNode};
use self::timer::ElectionTimer;
use crate::storage::Storage;

/// Handle to a running Raft node.
///
/// Every call is turned into an event on the node's queue and answered once
/// the event loop has processed it. Clones share the same node.
#[derive(Clone)]
pub struct Raft {
    id: String,
    events: mpsc::UnboundedSender<Event>,
    shutdown: Arc<watch::Sender<bool>>,
    task: Arc<Mutex<Option<JoinHandle<Result<(), RaftError>>>>>,
}

impl Raft {
    /// Validates `config`, spawns the event loop and the election timer, and
    /// returns immediately. `peers` must hold a transport for every other
    /// member.
    pub fn start<S, A>(
        config: RaftConfig,
        storage: S,
        peers: HashMap<String, Arc<dyn RaftTransport>>,
        applier: A,
    ) -> Result<Raft, RaftError>
    where
        S: Storage,
        A: Applier,
    {
        config.validate()?;
        if let Some(missing) = config.peers().find(|p| !peers.contains_key(*p)) {
            return Err(RaftError::InvalidConfig(format!(
                "no transport for member {missing:?}"
            )));
        }

        let (events, inbox) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (election_timer, signals) = ElectionTimer::new();

        let id = config.node_id.clone();
        let (min, span) = (config.election_timeout_min, config.election_timeout_span);
        let node = RaftNode::new(
            config,
            storage,
            peers,
            Box::new(applier),
            events.clone(),
            election_timer,
            shutdown_rx.clone(),
        )?;

        tokio::spawn(timer::run_election_timer(
            signals,
            events.clone(),
            shutdown_rx,
            min,
            span,
        ));
        let task = tokio::spawn(node.run(inbox));

        info!("Raft node {id} started");
        Ok(Raft {
            id,
            events,
            shutdown: Arc::new(shutdown),
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    pub async fn append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, RaftError> {
        self.submit(|reply| Event::AppendEntries { request, reply })
            .await
    }

    pub async fn request_vote(
        &self,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse, RaftError> {
        self.submit(|reply| Event::RequestVote { request, reply })
            .await
    }

    /// Appends `request.data` through the leader. A follower forwards the
    /// call to the leader it knows of; `RaftError::NoLeader` if there is none.
    ///
    /// Success means the entry is in the leader's log, not that it is
    /// committed.
    pub async fn append_data(
        &self,
        request: AppendDataRequest,
    ) -> Result<AppendDataResponse, RaftError> {
        self.submit(|reply| Event::AppendData { request, reply })
            .await?
    }

    pub async fn get_snapshot(&self) -> Result<NodeSnapshot, RaftError> {
        self.submit(|reply| Event::Snapshot { reply }).await
    }

    async fn submit<T>(
        &self,
        event: impl FnOnce(oneshot::Sender<T>) -> Event,
    ) -> Result<T, RaftError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(event(reply))
            .map_err(|_| RaftError::Stopped)?;

        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            result = response => result.map_err(|_| RaftError::Stopped),
            _ = timer::stopped(&mut shutdown) => Err(RaftError::Stopped),
        }
    }

    /// Signals the event loop and all timers to stop. Calls still queued or
    /// in flight fail with `RaftError::Stopped`.
    pub fn close(&self) {
        if !self.shutdown.send_replace(true) {
            info!("Raft node {} shutting down", self.id);
        }
    }

    /// Waits for the event loop to exit and returns its outcome. Only the
    /// first caller to see the exit gets the result; later calls return
    /// `Ok(())`.
    pub async fn join(&self) -> Result<(), RaftError> {
        let mut guard = self.task.lock().await;
        let Some(task) = guard.as_mut() else {
            return Ok(());
        };
        let outcome = task.await;
        *guard = None;
        outcome.map_err(|_| RaftError::Stopped)?
    }
}
