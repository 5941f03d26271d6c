use serde::{Deserialize, Serialize};

/// One replicated command. `index` starts at 1 and has no gaps; `term` is
/// the term of the leader that created the entry.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub data: Vec<u8>,
}

impl LogEntry {
    pub fn new(index: u64, term: u64, data: Vec<u8>) -> Self {
        Self { index, term, data }
    }
}

/// Whether `entries` continue directly after `prev_log_index`.
pub(crate) fn follows(prev_log_index: u64, entries: &[LogEntry]) -> bool {
    entries
        .iter()
        .enumerate()
        .all(|(i, entry)| entry.index == prev_log_index + 1 + i as u64)
}
