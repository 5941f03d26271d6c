use super::{check_contiguous, Storage, StorageError};
use crate::raft::LogEntry;

/// Volatile store backed by a `Vec`. Nothing survives the process; used by
/// tests and single-shot simulations.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    current_term: u64,
    voted_for: Option<String>,
    entries: Vec<LogEntry>,
    last_applied: u64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store that already holds `entries` (indices must start at 1).
    pub fn with_entries(entries: Vec<LogEntry>) -> Result<Self, StorageError> {
        let mut storage = Self::new();
        storage.write_logs(&entries)?;
        Ok(storage)
    }

    fn position(&self, index: u64) -> Option<usize> {
        if index == 0 || index > self.entries.len() as u64 {
            return None;
        }
        Some(index as usize - 1)
    }
}

impl Storage for MemoryStorage {
    fn current_term(&self) -> Result<u64, StorageError> {
        Ok(self.current_term)
    }

    fn set_current_term(&mut self, term: u64) -> Result<(), StorageError> {
        self.current_term = term;
        Ok(())
    }

    fn voted_for(&self) -> Result<Option<String>, StorageError> {
        Ok(self.voted_for.clone())
    }

    fn set_voted_for(&mut self, candidate: Option<&str>) -> Result<(), StorageError> {
        self.voted_for = candidate.map(str::to_string);
        Ok(())
    }

    fn log(&self, index: u64) -> Result<Option<LogEntry>, StorageError> {
        Ok(self.position(index).map(|pos| self.entries[pos].clone()))
    }

    fn last_log_index(&self) -> Result<u64, StorageError> {
        Ok(self.entries.len() as u64)
    }

    fn write_logs(&mut self, entries: &[LogEntry]) -> Result<(), StorageError> {
        check_contiguous(self.entries.len() as u64, entries)?;
        self.entries.extend_from_slice(entries);
        Ok(())
    }

    fn logs_from(&self, index: u64) -> Result<Vec<LogEntry>, StorageError> {
        let start = index.max(1) as usize - 1;
        Ok(self.entries.get(start..).map(<[_]>::to_vec).unwrap_or_default())
    }

    fn delete_logs_from(&mut self, index: u64) -> Result<(), StorageError> {
        let keep = index.max(1) as usize - 1;
        self.entries.truncate(keep);
        Ok(())
    }

    fn last_applied(&self) -> Result<u64, StorageError> {
        Ok(self.last_applied)
    }

    fn set_last_applied(&mut self, index: u64) -> Result<(), StorageError> {
        self.last_applied = index;
        Ok(())
    }
}
