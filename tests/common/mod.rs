#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chorus::network::NetworkError;
use chorus::raft::{
    AppendDataRequest, AppendDataResponse, AppendEntriesRequest, AppendEntriesResponse, LogEntry,
    NodeRole, NodeSnapshot, Raft, RaftConfig, RaftError, RaftTransport, RequestVoteRequest,
    RequestVoteResponse,
};
use chorus::storage::MemoryStorage;
use tokio::time::{sleep, Instant};

/// Delivers calls between in-process nodes; links can be cut and restored.
#[derive(Default)]
pub struct Router {
    nodes: Mutex<HashMap<String, Raft>>,
    cut: Mutex<HashSet<(String, String)>>,
}

impl Router {
    fn target(&self, from: &str, to: &str) -> Result<Raft, NetworkError> {
        let cut = self.cut.lock().unwrap();
        if cut.contains(&(from.to_string(), to.to_string())) {
            return Err(NetworkError::ConnectionError(format!("{from} cannot reach {to}")));
        }
        drop(cut);
        self.nodes
            .lock()
            .unwrap()
            .get(to)
            .cloned()
            .ok_or_else(|| NetworkError::ConnectionError(format!("{to} is down")))
    }

    fn sever(&self, a: &str, b: &str) {
        let mut cut = self.cut.lock().unwrap();
        cut.insert((a.to_string(), b.to_string()));
        cut.insert((b.to_string(), a.to_string()));
    }
}

pub struct LocalTransport {
    from: String,
    to: String,
    router: Arc<Router>,
}

fn remote(err: RaftError) -> NetworkError {
    NetworkError::ConnectionError(err.to_string())
}

#[async_trait]
impl RaftTransport for LocalTransport {
    async fn append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, NetworkError> {
        let node = self.router.target(&self.from, &self.to)?;
        node.append_entries(request).await.map_err(remote)
    }

    async fn request_vote(
        &self,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse, NetworkError> {
        let node = self.router.target(&self.from, &self.to)?;
        node.request_vote(request).await.map_err(remote)
    }

    async fn append_data(
        &self,
        request: AppendDataRequest,
    ) -> Result<AppendDataResponse, NetworkError> {
        let node = self.router.target(&self.from, &self.to)?;
        node.append_data(request).await.map_err(remote)
    }
}

/// Peer that never answers; every call fails as a timeout.
pub struct Unreachable;

#[async_trait]
impl RaftTransport for Unreachable {
    async fn append_entries(
        &self,
        _request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, NetworkError> {
        Err(NetworkError::TimeoutError)
    }

    async fn request_vote(
        &self,
        _request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse, NetworkError> {
        Err(NetworkError::TimeoutError)
    }

    async fn append_data(
        &self,
        _request: AppendDataRequest,
    ) -> Result<AppendDataResponse, NetworkError> {
        Err(NetworkError::TimeoutError)
    }
}

/// Remembers the last term and commit index seen per node and fails the
/// test if either goes backwards.
#[derive(Default)]
pub struct Monotonic {
    seen: HashMap<String, (u64, u64)>,
}

impl Monotonic {
    pub fn observe(&mut self, id: &str, snapshot: &NodeSnapshot) {
        assert!(
            snapshot.last_applied <= snapshot.commit_index,
            "{id} applied {} past commit {}",
            snapshot.last_applied,
            snapshot.commit_index
        );
        let now = (snapshot.current_term, snapshot.commit_index);
        if let Some(&(term, commit)) = self.seen.get(id) {
            assert!(now.0 >= term, "{id} term went back from {term} to {}", now.0);
            assert!(now.1 >= commit, "{id} commit went back from {commit} to {}", now.1);
        }
        self.seen.insert(id.to_string(), now);
    }
}

pub type Applied = Arc<Mutex<Vec<Vec<u8>>>>;

pub struct Cluster {
    pub ids: Vec<String>,
    router: Arc<Router>,
    nodes: HashMap<String, Raft>,
    applied: HashMap<String, Applied>,
}

pub fn fast_config(id: &str, ids: &[String]) -> RaftConfig {
    let mut config = RaftConfig::new(id);
    for member in ids {
        config.add_member(member);
    }
    config.election_timeout_min = 150;
    config.election_timeout_span = 150;
    config.heartbeat_interval = 25;
    config.rpc_timeout = 100;
    config
}

impl Cluster {
    pub fn start(size: usize) -> Cluster {
        let ids: Vec<String> = (1..=size).map(|i| format!("n{i}")).collect();
        let router = Arc::new(Router::default());
        let mut nodes = HashMap::new();
        let mut applied = HashMap::new();

        for id in &ids {
            let mut peers: HashMap<String, Arc<dyn RaftTransport>> = HashMap::new();
            for peer in ids.iter().filter(|p| *p != id) {
                peers.insert(
                    peer.clone(),
                    Arc::new(LocalTransport {
                        from: id.clone(),
                        to: peer.clone(),
                        router: Arc::clone(&router),
                    }),
                );
            }

            let sink: Applied = Arc::default();
            let log = Arc::clone(&sink);
            let applier = move |entry: &LogEntry| -> anyhow::Result<()> {
                log.lock().unwrap().push(entry.data.clone());
                Ok(())
            };

            let raft = Raft::start(fast_config(id, &ids), MemoryStorage::new(), peers, applier)
                .expect("start node");
            router.nodes.lock().unwrap().insert(id.clone(), raft.clone());
            nodes.insert(id.clone(), raft);
            applied.insert(id.clone(), sink);
        }

        Cluster {
            ids,
            router,
            nodes,
            applied,
        }
    }

    pub fn node(&self, id: &str) -> &Raft {
        &self.nodes[id]
    }

    pub fn applied(&self, id: &str) -> Vec<Vec<u8>> {
        self.applied[id].lock().unwrap().clone()
    }

    /// Splits the cluster so nodes only reach members of their own group.
    pub fn partition(&self, groups: &[&[&str]]) {
        for (i, a) in groups.iter().enumerate() {
            for b in groups.iter().skip(i + 1) {
                for x in a.iter() {
                    for y in b.iter() {
                        self.router.sever(x, y);
                    }
                }
            }
        }
    }

    pub fn heal(&self) {
        self.router.cut.lock().unwrap().clear();
    }

    pub async fn snapshots(&self, ids: &[&str]) -> HashMap<String, NodeSnapshot> {
        let mut out = HashMap::new();
        for id in ids {
            if let Ok(snapshot) = self.node(id).get_snapshot().await {
                out.insert(id.to_string(), snapshot);
            }
        }
        out
    }

    pub fn all(&self) -> Vec<&str> {
        self.ids.iter().map(String::as_str).collect()
    }

    /// Waits until exactly one node among `ids` leads at a term above
    /// `after_term`, and returns it with its term.
    pub async fn wait_for_leader(&self, ids: &[&str], after_term: u64) -> (String, u64) {
        eventually(Duration::from_secs(5), move || async move {
            let snapshots = self.snapshots(ids).await;
            let leaders: Vec<(String, u64)> = snapshots
                .iter()
                .filter(|(_, s)| s.role == NodeRole::Leader && s.current_term > after_term)
                .map(|(id, s)| (id.clone(), s.current_term))
                .collect();
            match leaders.as_slice() {
                [one] => Some(one.clone()),
                _ => None,
            }
        })
        .await
        .expect("no leader elected")
    }

    pub fn shutdown(&self) {
        for raft in self.nodes.values() {
            raft.close();
        }
    }
}

/// Polls `check` every 20ms until it yields a value or `limit` passes.
pub async fn eventually<T, F, Fut>(limit: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = Instant::now() + limit;
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(Duration::from_millis(20)).await;
    }
}
