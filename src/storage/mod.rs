//! Durable state for a Raft node: the current term, the vote cast in that
//! term, the replicated log and the applied-index checkpoint.

mod error;
mod memory;
mod sled_store;

pub use self::error::StorageError;
pub use self::memory::MemoryStorage;
pub use self::sled_store::SledStorage;

use crate::raft::LogEntry;

/// Persistent store consumed by the consensus core.
///
/// Every method is synchronous and every mutating method must be durable
/// before it returns. Index 0 is the virtual slot preceding the first entry;
/// it never holds an entry and its term is 0.
pub trait Storage: Send + 'static {
    fn current_term(&self) -> Result<u64, StorageError>;

    fn set_current_term(&mut self, term: u64) -> Result<(), StorageError>;

    fn voted_for(&self) -> Result<Option<String>, StorageError>;

    fn set_voted_for(&mut self, candidate: Option<&str>) -> Result<(), StorageError>;

    /// Returns the entry at `index`, or `None` when the log doesn't reach it.
    fn log(&self, index: u64) -> Result<Option<LogEntry>, StorageError>;

    /// Returns the term of the entry at `index`. `Some(0)` for index 0.
    fn log_term(&self, index: u64) -> Result<Option<u64>, StorageError> {
        if index == 0 {
            return Ok(Some(0));
        }
        Ok(self.log(index)?.map(|entry| entry.term))
    }

    /// Index of the last entry, 0 for an empty log.
    fn last_log_index(&self) -> Result<u64, StorageError>;

    /// Term of the last entry, 0 for an empty log.
    fn last_log_term(&self) -> Result<u64, StorageError> {
        let last = self.last_log_index()?;
        Ok(self.log_term(last)?.unwrap_or(0))
    }

    /// Appends a single entry. Its index must be `last_log_index() + 1`.
    fn write_log(&mut self, entry: &LogEntry) -> Result<(), StorageError> {
        self.write_logs(std::slice::from_ref(entry))
    }

    /// Appends a contiguous run of entries directly after the current tail.
    fn write_logs(&mut self, entries: &[LogEntry]) -> Result<(), StorageError>;

    /// All entries from `index` (inclusive) to the tail, in index order.
    fn logs_from(&self, index: u64) -> Result<Vec<LogEntry>, StorageError>;

    /// At most `limit` entries starting at `from`.
    fn logs_range(&self, from: u64, limit: usize) -> Result<Vec<LogEntry>, StorageError> {
        let mut entries = self.logs_from(from)?;
        entries.truncate(limit);
        Ok(entries)
    }

    /// Removes the entry at `index` and everything after it.
    fn delete_logs_from(&mut self, index: u64) -> Result<(), StorageError>;

    /// Highest index handed to the application so far.
    fn last_applied(&self) -> Result<u64, StorageError>;

    fn set_last_applied(&mut self, index: u64) -> Result<(), StorageError>;
}

/// Checks that `entries` continue a log whose last index is `last_index`.
pub(crate) fn check_contiguous(last_index: u64, entries: &[LogEntry]) -> Result<(), StorageError> {
    let mut expected = last_index + 1;
    for entry in entries {
        if entry.index != expected {
            return Err(StorageError::NonContiguous {
                expected,
                got: entry.index,
            });
        }
        expected += 1;
    }
    Ok(())
}
