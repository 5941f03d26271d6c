use std::path::Path;

use super::{check_contiguous, Storage, StorageError};
use crate::raft::LogEntry;

const META_TREE: &str = "__meta__";
const LOG_TREE: &str = "__log__";

const CURRENT_TERM_KEY: &[u8] = b"current_term";
const VOTED_FOR_KEY: &[u8] = b"voted_for";
const LAST_APPLIED_KEY: &[u8] = b"last_applied";

/// Crash-durable store on top of sled. Log entries live in their own tree
/// keyed by big-endian index so that range scans follow log order; every
/// write is flushed before returning.
pub struct SledStorage {
    db: sled::Db,
    meta: sled::Tree,
    logs: sled::Tree,
}

impl SledStorage {
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, StorageError> {
        let path = data_dir.as_ref();
        std::fs::create_dir_all(path)?;

        let db = sled::open(path)?;
        let meta = db.open_tree(META_TREE)?;
        let logs = db.open_tree(LOG_TREE)?;

        log::info!("Sled raft storage opened at {:?}", path);

        Ok(Self { db, meta, logs })
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn read_u64(&self, key: &[u8]) -> Result<u64, StorageError> {
        match self.meta.get(key)? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }

    fn write_u64(&self, key: &[u8], value: u64) -> Result<(), StorageError> {
        self.meta.insert(key, value.to_be_bytes().to_vec())?;
        self.flush()
    }
}

fn decode_u64(bytes: &[u8]) -> Result<u64, StorageError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Corrupt(format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

fn decode_entry(bytes: &[u8]) -> Result<LogEntry, StorageError> {
    let (entry, _): (LogEntry, usize) =
        bincode::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(entry)
}

impl Storage for SledStorage {
    fn current_term(&self) -> Result<u64, StorageError> {
        self.read_u64(CURRENT_TERM_KEY)
    }

    fn set_current_term(&mut self, term: u64) -> Result<(), StorageError> {
        self.write_u64(CURRENT_TERM_KEY, term)
    }

    fn voted_for(&self) -> Result<Option<String>, StorageError> {
        match self.meta.get(VOTED_FOR_KEY)? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|e| StorageError::Corrupt(e.to_string())),
            None => Ok(None),
        }
    }

    fn set_voted_for(&mut self, candidate: Option<&str>) -> Result<(), StorageError> {
        match candidate {
            Some(id) => {
                self.meta.insert(VOTED_FOR_KEY, id.as_bytes())?;
            }
            None => {
                self.meta.remove(VOTED_FOR_KEY)?;
            }
        }
        self.flush()
    }

    fn log(&self, index: u64) -> Result<Option<LogEntry>, StorageError> {
        if index == 0 {
            return Ok(None);
        }
        match self.logs.get(index.to_be_bytes())? {
            Some(bytes) => decode_entry(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn last_log_index(&self) -> Result<u64, StorageError> {
        match self.logs.last()? {
            Some((key, _)) => decode_u64(&key),
            None => Ok(0),
        }
    }

    fn write_logs(&mut self, entries: &[LogEntry]) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        check_contiguous(self.last_log_index()?, entries)?;

        let mut batch = sled::Batch::default();
        for entry in entries {
            let value = bincode::encode_to_vec(entry, bincode::config::standard())?;
            batch.insert(entry.index.to_be_bytes().to_vec(), value);
        }
        self.logs.apply_batch(batch)?;
        self.flush()?;

        log::debug!(
            "Wrote {} log entries ending at index {}",
            entries.len(),
            entries[entries.len() - 1].index
        );
        Ok(())
    }

    fn logs_from(&self, index: u64) -> Result<Vec<LogEntry>, StorageError> {
        self.logs_range(index, usize::MAX)
    }

    fn logs_range(&self, from: u64, limit: usize) -> Result<Vec<LogEntry>, StorageError> {
        let start = from.max(1).to_be_bytes();
        let mut entries = Vec::new();
        for item in self.logs.range(start..).take(limit) {
            let (_key, value) = item?;
            entries.push(decode_entry(&value)?);
        }
        Ok(entries)
    }

    fn delete_logs_from(&mut self, index: u64) -> Result<(), StorageError> {
        let start = index.max(1).to_be_bytes();
        let mut batch = sled::Batch::default();
        let mut removed = 0usize;
        for item in self.logs.range(start..) {
            let (key, _) = item?;
            batch.remove(key);
            removed += 1;
        }
        self.logs.apply_batch(batch)?;
        self.flush()?;

        log::debug!("Deleted {removed} log entries from index {index}");
        Ok(())
    }

    fn last_applied(&self) -> Result<u64, StorageError> {
        self.read_u64(LAST_APPLIED_KEY)
    }

    fn set_last_applied(&mut self, index: u64) -> Result<(), StorageError> {
        self.write_u64(LAST_APPLIED_KEY, index)
    }
}
