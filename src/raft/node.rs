use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ::log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;

use super::timer::{self, ElectionTimer};
use super::{
    log::follows, AppendDataRequest, AppendDataResponse, AppendEntriesRequest,
    AppendEntriesResponse, Applier, LogEntry, LogSummary, NodeRole, NodeSnapshot, RaftConfig,
    RaftError, RaftTransport, RequestVoteRequest, RequestVoteResponse,
};
use crate::network::NetworkError;
use crate::storage::{Storage, StorageError};

/// Everything the event loop reacts to. Each variant is handled to
/// completion before the next one is taken off the queue.
pub(crate) enum Event {
    AppendEntries {
        request: AppendEntriesRequest,
        reply: oneshot::Sender<AppendEntriesResponse>,
    },
    RequestVote {
        request: RequestVoteRequest,
        reply: oneshot::Sender<RequestVoteResponse>,
    },
    AppendEntriesResult {
        peer: String,
        request: AppendEntriesRequest,
        response: AppendEntriesResponse,
    },
    RequestVoteResult {
        peer: String,
        // Term the vote was requested for.
        term: u64,
        response: RequestVoteResponse,
    },
    ElectionTimeout,
    SendAppendEntries,
    AppendData {
        request: AppendDataRequest,
        reply: oneshot::Sender<Result<AppendDataResponse, RaftError>>,
    },
    Snapshot {
        reply: oneshot::Sender<NodeSnapshot>,
    },
}

pub(crate) type Peers = HashMap<String, Arc<dyn RaftTransport>>;

pub(crate) struct RaftNode<S: Storage> {
    // Node identity
    id: String,
    config: RaftConfig,

    // Persistent state
    storage: S,
    applier: Box<dyn Applier>,

    // Communication
    peers: Peers,
    events: mpsc::UnboundedSender<Event>,
    timer: ElectionTimer,
    // Some(term) while leader for that term; watched by the heartbeat ticker.
    leadership: watch::Sender<Option<u64>>,
    shutdown: watch::Receiver<bool>,

    // Volatile state
    commit_index: u64,
    last_applied: u64,
    role: NodeRole,
    current_leader: Option<String>,

    // Candidate state
    votes: HashSet<String>,

    // Leader state
    next_index: HashMap<String, u64>,
    match_index: HashMap<String, u64>,
}

impl<S: Storage> RaftNode<S> {
    pub(crate) fn new(
        config: RaftConfig,
        storage: S,
        mut peers: Peers,
        applier: Box<dyn Applier>,
        events: mpsc::UnboundedSender<Event>,
        timer: ElectionTimer,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, RaftError> {
        peers.retain(|id, _| *id != config.node_id);

        // Entries up to the checkpoint were committed and applied before the
        // restart; resume from there.
        let last_applied = storage.last_applied()?.min(storage.last_log_index()?);
        let (leadership, _) = watch::channel(None);

        Ok(Self {
            id: config.node_id.clone(),
            config,
            storage,
            applier,
            peers,
            events,
            timer,
            leadership,
            shutdown,
            commit_index: last_applied,
            last_applied,
            role: NodeRole::Follower,
            current_leader: None,
            votes: HashSet::new(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
        })
    }

    /// Drains the event queue until shutdown. Storage and apply failures end
    /// the loop with an error; nothing else does.
    pub(crate) async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Event>) -> Result<(), RaftError> {
        info!(
            "Node {} starting at term {} with commit index {}",
            self.id,
            self.storage.current_term()?,
            self.commit_index
        );

        let mut shutdown = self.shutdown.clone();
        self.timer.open_gate();

        let result = loop {
            if let Err(e) = self.apply_committed() {
                break Err(e);
            }

            let event = tokio::select! {
                _ = timer::stopped(&mut shutdown) => break Ok(()),
                event = inbox.recv() => match event {
                    Some(event) => event,
                    None => break Ok(()),
                },
            };

            if let Err(e) = self.handle_event(event) {
                break Err(e);
            }
        };

        self.leadership.send_replace(None);
        match &result {
            Ok(()) => info!("Node {} stopped", self.id),
            Err(e) => error!("Node {} stopped on fatal error: {e}", self.id),
        }
        result
    }

    pub(crate) fn handle_event(&mut self, event: Event) -> Result<(), RaftError> {
        match event {
            Event::AppendEntries { request, reply } => {
                let response = self.with_timer(|node| node.handle_append_entries(request))?;
                let _ = reply.send(response);
            }
            Event::RequestVote { request, reply } => {
                let response = self.with_timer(|node| node.handle_request_vote(request))?;
                let _ = reply.send(response);
            }
            Event::AppendEntriesResult {
                peer,
                request,
                response,
            } => {
                self.with_timer(|node| node.handle_append_entries_result(peer, request, response))?;
            }
            Event::RequestVoteResult {
                peer,
                term,
                response,
            } => {
                self.with_timer(|node| node.handle_request_vote_result(peer, term, response))?;
            }
            Event::ElectionTimeout => self.handle_election_timeout()?,
            Event::SendAppendEntries => self.send_append_entries()?,
            Event::AppendData { request, reply } => self.handle_append_data(request, reply)?,
            Event::Snapshot { reply } => {
                let snapshot = self.snapshot()?;
                let _ = reply.send(snapshot);
            }
        }
        Ok(())
    }

    /// Stops the election countdown while `f` runs and re-arms it afterwards,
    /// whatever `f` returns.
    fn with_timer<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, RaftError>,
    ) -> Result<T, RaftError> {
        self.timer.reset();
        let result = f(self);
        self.timer.open_gate();
        result
    }

    fn set_role(&mut self, role: NodeRole, term: u64) {
        if self.role != role {
            debug!("Node {}: {} -> {} at term {term}", self.id, self.role, role);
        }
        self.role = role;
        self.votes.clear();
        self.leadership
            .send_replace((role == NodeRole::Leader).then_some(term));
    }

    /// If `term` is newer than ours, adopts it, clears the vote and the known
    /// leader and reverts to follower. Returns the current term either way.
    fn maybe_become_follower(&mut self, term: u64) -> Result<u64, RaftError> {
        let current_term = self.storage.current_term()?;
        if term <= current_term {
            return Ok(current_term);
        }

        self.storage.set_current_term(term)?;
        self.storage.set_voted_for(None)?;
        if self.role != NodeRole::Follower {
            info!(
                "Node {} saw term {term} (> {current_term}), stepping down from {}",
                self.id, self.role
            );
        }
        self.set_role(NodeRole::Follower, term);
        self.current_leader = None;
        Ok(term)
    }

    fn handle_append_entries(
        &mut self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, RaftError> {
        let current_term = self.maybe_become_follower(request.term)?;
        let reject = AppendEntriesResponse {
            term: current_term,
            success: false,
        };

        // 1. Reply false if term < currentTerm.
        if request.term < current_term {
            debug!(
                "Rejecting AppendEntries from {} with stale term {} (current {current_term})",
                request.leader_id, request.term
            );
            return Ok(reject);
        }

        // The sender is the legitimate leader of this term.
        if self.role != NodeRole::Follower {
            if self.role == NodeRole::Leader {
                warn!(
                    "Node {} is leader at term {current_term} but {} sent AppendEntries",
                    self.id, request.leader_id
                );
            }
            self.set_role(NodeRole::Follower, current_term);
        }
        if self.current_leader.as_deref() != Some(request.leader_id.as_str()) {
            info!(
                "Node {} following leader {} at term {current_term}",
                self.id, request.leader_id
            );
            self.current_leader = Some(request.leader_id.clone());
        }

        // 2. Reply false if the log has no entry at prevLogIndex with prevLogTerm.
        let local_prev_term = self.storage.log_term(request.prev_log_index)?;
        if local_prev_term != Some(request.prev_log_term) {
            info!(
                "Local term {:?} at index {} mismatches request prev log term {}",
                local_prev_term, request.prev_log_index, request.prev_log_term
            );
            return Ok(reject);
        }

        if !follows(request.prev_log_index, &request.entries) {
            warn!(
                "Rejecting AppendEntries from {}: entries do not follow index {}",
                request.leader_id, request.prev_log_index
            );
            return Ok(reject);
        }

        // 3-4. Drop conflicting entries, append the missing ones.
        if !request.entries.is_empty() {
            self.merge_entries(&request.entries)?;
        }

        // 5. commitIndex = min(leaderCommit, index of last local entry).
        if request.leader_commit > self.commit_index {
            let commit = request.leader_commit.min(self.storage.last_log_index()?);
            if commit > self.commit_index {
                debug!(
                    "Commit index {} -> {commit} (leader commit {})",
                    self.commit_index, request.leader_commit
                );
                self.commit_index = commit;
            }
        }

        Ok(AppendEntriesResponse {
            term: current_term,
            success: true,
        })
    }

    fn merge_entries(&mut self, entries: &[LogEntry]) -> Result<(), RaftError> {
        let mut start = None;
        for (i, entry) in entries.iter().enumerate() {
            match self.storage.log_term(entry.index)? {
                None => {
                    start = Some(i);
                    break;
                }
                Some(term) if term != entry.term => {
                    info!(
                        "Local log conflicts at index {} (term {term} vs {}), deleting onwards",
                        entry.index, entry.term
                    );
                    self.storage.delete_logs_from(entry.index)?;
                    start = Some(i);
                    break;
                }
                Some(_) => {}
            }
        }

        if let Some(start) = start {
            debug!(
                "Appending {} entries from index {}",
                entries.len() - start,
                entries[start].index
            );
            self.storage.write_logs(&entries[start..])?;
        }
        Ok(())
    }

    fn handle_append_entries_result(
        &mut self,
        peer: String,
        request: AppendEntriesRequest,
        response: AppendEntriesResponse,
    ) -> Result<(), RaftError> {
        let current_term = self.maybe_become_follower(response.term)?;
        if self.role != NodeRole::Leader || request.term != current_term {
            return Ok(());
        }

        if !response.success {
            // Log inconsistency: back off one entry and retry on the next round.
            let next = self.next_index.entry(peer.clone()).or_insert(1);
            *next = next.saturating_sub(1).max(1);
            debug!("AppendEntries to {peer} failed, next index now {next}");
            return Ok(());
        }

        if request.is_heartbeat() {
            return Ok(());
        }

        let replicated = request.last_index();
        self.next_index.insert(peer.clone(), replicated + 1);
        let matched = self.match_index.entry(peer).or_insert(0);
        *matched = (*matched).max(replicated);

        // Highest N > commitIndex on a majority with log[N].term == currentTerm;
        // lower indices are committed along with it.
        for entry in request.entries.iter().rev() {
            if entry.index <= self.commit_index {
                break;
            }
            if self.is_on_majority(entry.index)
                && self.storage.log_term(entry.index)? == Some(current_term)
            {
                info!(
                    "Node {} commit index {} -> {}",
                    self.id, self.commit_index, entry.index
                );
                self.commit_index = entry.index;
                break;
            }
        }
        Ok(())
    }

    fn is_on_majority(&self, index: u64) -> bool {
        let replicas = 1 + self
            .config
            .peers()
            .filter(|peer| self.match_index.get(*peer).copied().unwrap_or(0) >= index)
            .count();
        replicas >= self.config.quorum()
    }

    fn handle_request_vote(
        &mut self,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse, RaftError> {
        let current_term = self.maybe_become_follower(request.term)?;
        let deny = RequestVoteResponse {
            term: current_term,
            vote_granted: false,
        };

        if request.term < current_term {
            return Ok(deny);
        }

        if let Some(voted_for) = self.storage.voted_for()? {
            if voted_for != request.candidate_id {
                debug!(
                    "Node {} already voted for {voted_for} at term {current_term}, denying {}",
                    self.id, request.candidate_id
                );
                return Ok(deny);
            }
        }

        // Candidate's log must be at least as up-to-date as ours.
        let last_log_term = self.storage.last_log_term()?;
        if request.last_log_term < last_log_term {
            return Ok(deny);
        }
        if request.last_log_term == last_log_term
            && request.last_log_index < self.storage.last_log_index()?
        {
            return Ok(deny);
        }

        // The vote is durable before anyone can observe it.
        self.storage.set_voted_for(Some(&request.candidate_id))?;
        info!(
            "Node {} granted vote to {} for term {current_term}",
            self.id, request.candidate_id
        );
        Ok(RequestVoteResponse {
            term: current_term,
            vote_granted: true,
        })
    }

    fn handle_request_vote_result(
        &mut self,
        peer: String,
        term: u64,
        response: RequestVoteResponse,
    ) -> Result<(), RaftError> {
        let current_term = self.maybe_become_follower(response.term)?;
        if self.role != NodeRole::Candidate || term != current_term {
            return Ok(());
        }

        if response.vote_granted {
            self.votes.insert(peer);
            if self.votes.len() >= self.config.quorum() {
                self.become_leader(current_term)?;
            }
        }
        Ok(())
    }

    fn become_leader(&mut self, term: u64) -> Result<(), RaftError> {
        info!(
            "Node {} becoming leader for term {term} with {} votes",
            self.id,
            self.votes.len()
        );
        self.set_role(NodeRole::Leader, term);
        self.current_leader = Some(self.id.clone());

        let next = self.storage.last_log_index()? + 1;
        let peers: Vec<String> = self.config.peers().cloned().collect();
        self.next_index = peers.iter().map(|p| (p.clone(), next)).collect();
        self.match_index = peers.into_iter().map(|p| (p, 0)).collect();

        tokio::spawn(timer::run_heartbeat(
            term,
            self.config.heartbeat(),
            self.leadership.subscribe(),
            self.events.clone(),
            self.shutdown.clone(),
        ));

        self.send_append_entries()
    }

    /// Starts an election for the next term. A leader never campaigns
    /// against itself: it only re-arms the timer and keeps leading, even
    /// when no peer has answered it for a whole timeout. It steps down only
    /// on seeing a higher term.
    fn handle_election_timeout(&mut self) -> Result<(), RaftError> {
        if self.role == NodeRole::Leader {
            self.timer.open_gate();
            return Ok(());
        }

        let term = self.storage.current_term()? + 1;
        info!("Node {} election timeout, campaigning for term {term}", self.id);

        self.set_role(NodeRole::Candidate, term);
        self.current_leader = None;
        self.storage.set_current_term(term)?;
        self.storage.set_voted_for(Some(&self.id))?;
        self.votes.insert(self.id.clone());

        self.timer.open_gate();

        if self.votes.len() >= self.config.quorum() {
            return self.become_leader(term);
        }
        self.send_vote_requests(term)
    }

    fn send_vote_requests(&self, term: u64) -> Result<(), RaftError> {
        let request = RequestVoteRequest {
            term,
            candidate_id: self.id.clone(),
            last_log_index: self.storage.last_log_index()?,
            last_log_term: self.storage.last_log_term()?,
        };

        for (peer, client) in &self.peers {
            let peer = peer.clone();
            let client = Arc::clone(client);
            let request = request.clone();
            let events = self.events.clone();
            let deadline = self.config.rpc_deadline();

            tokio::spawn(async move {
                match call_with_deadline(deadline, client.request_vote(request)).await {
                    Ok(response) => {
                        let _ = events.send(Event::RequestVoteResult {
                            peer,
                            term,
                            response,
                        });
                    }
                    Err(e) => debug!("Failed to send RequestVote to {peer}: {e}"),
                }
            });
        }
        Ok(())
    }

    /// One replication round: every peer gets the entries from its next
    /// index onward, or an empty heartbeat when it is caught up.
    fn send_append_entries(&self) -> Result<(), RaftError> {
        if self.role != NodeRole::Leader {
            return Ok(());
        }
        let term = self.storage.current_term()?;

        for (peer, client) in &self.peers {
            let next = self.next_index.get(peer).copied().unwrap_or(1).max(1);
            let prev_log_index = next - 1;
            let prev_log_term = self
                .storage
                .log_term(prev_log_index)?
                .ok_or(StorageError::MissingEntry(prev_log_index))?;
            let entries = self
                .storage
                .logs_range(next, self.config.max_append_entries)?;

            let request = AppendEntriesRequest {
                term,
                leader_id: self.id.clone(),
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: self.commit_index,
            };

            let peer = peer.clone();
            let client = Arc::clone(client);
            let events = self.events.clone();
            let deadline = self.config.rpc_deadline();

            tokio::spawn(async move {
                match call_with_deadline(deadline, client.append_entries(request.clone())).await {
                    Ok(response) => {
                        let _ = events.send(Event::AppendEntriesResult {
                            peer,
                            request,
                            response,
                        });
                    }
                    Err(e) => debug!("Failed to send AppendEntries to {peer}: {e}"),
                }
            });
        }
        Ok(())
    }

    fn handle_append_data(
        &mut self,
        request: AppendDataRequest,
        reply: oneshot::Sender<Result<AppendDataResponse, RaftError>>,
    ) -> Result<(), RaftError> {
        if self.role != NodeRole::Leader {
            self.forward_append_data(request, reply);
            return Ok(());
        }

        let index = self.storage.last_log_index()? + 1;
        let term = self.storage.current_term()?;
        let entry = LogEntry::new(index, term, request.data);
        self.storage.write_log(&entry)?;
        debug!(
            "Log written: index {index}, term {term}, {} bytes",
            entry.data.len()
        );

        // Only true here for a single-member cluster.
        if self.is_on_majority(index) {
            self.commit_index = index;
        }

        let _ = reply.send(Ok(AppendDataResponse { success: true }));
        Ok(())
    }

    fn forward_append_data(
        &self,
        request: AppendDataRequest,
        reply: oneshot::Sender<Result<AppendDataResponse, RaftError>>,
    ) {
        let leader = self
            .current_leader
            .as_ref()
            .and_then(|id| self.peers.get(id).map(|client| (id.clone(), Arc::clone(client))));

        let Some((leader, client)) = leader else {
            let _ = reply.send(Err(RaftError::NoLeader));
            return;
        };

        debug!("Forwarding AppendData to leader {leader}");
        let deadline = self.config.rpc_deadline();
        tokio::spawn(async move {
            let result = match call_with_deadline(deadline, client.append_data(request)).await {
                Ok(response) => Ok(response),
                Err(NetworkError::TimeoutError) => Err(RaftError::Timeout),
                Err(e) => {
                    debug!("Failed to forward AppendData to leader {leader}: {e}");
                    Err(RaftError::Network(e))
                }
            };
            let _ = reply.send(result);
        });
    }

    fn snapshot(&self) -> Result<NodeSnapshot, RaftError> {
        let logs = self
            .storage
            .logs_from(1)?
            .into_iter()
            .map(|entry| LogSummary {
                index: entry.index,
                term: entry.term,
                size: entry.data.len(),
            })
            .collect();

        Ok(NodeSnapshot {
            current_term: self.storage.current_term()?,
            commit_index: self.commit_index,
            last_applied: self.last_applied,
            role: self.role,
            current_leader: self.current_leader.clone(),
            next_index: self.next_index.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            match_index: self.match_index.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            logs,
        })
    }

    /// Hands every committed but unapplied entry to the application, in order.
    fn apply_committed(&mut self) -> Result<(), RaftError> {
        while self.commit_index > self.last_applied {
            let index = self.last_applied + 1;
            let entry = self
                .storage
                .log(index)?
                .ok_or(StorageError::MissingEntry(index))?;
            self.applier
                .apply(&entry)
                .map_err(|source| RaftError::Apply { index, source })?;
            self.last_applied = index;
            self.storage.set_last_applied(index)?;
            debug!("Applied log at index {index}");
        }
        Ok(())
    }
}

/// Runs an outbound RPC, failing with `TimeoutError` once `deadline` passes.
async fn call_with_deadline<T>(
    deadline: Duration,
    call: impl Future<Output = Result<T, NetworkError>>,
) -> Result<T, NetworkError> {
    timeout(deadline, call)
        .await
        .unwrap_or(Err(NetworkError::TimeoutError))
}
