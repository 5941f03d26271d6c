use ::log::info;

use super::LogEntry;

/// Receives committed entries in index order, exactly once per index for
/// the lifetime of the store's applied-index checkpoint.
///
/// An error stops the node: the event loop exits with `RaftError::Apply`.
pub trait Applier: Send + 'static {
    fn apply(&mut self, entry: &LogEntry) -> anyhow::Result<()>;
}

impl<F> Applier for F
where
    F: FnMut(&LogEntry) -> anyhow::Result<()> + Send + 'static,
{
    fn apply(&mut self, entry: &LogEntry) -> anyhow::Result<()> {
        self(entry)
    }
}

/// Default applier for the standalone binary: logs each command.
#[derive(Debug, Default)]
pub struct LoggingApplier;

impl Applier for LoggingApplier {
    fn apply(&mut self, entry: &LogEntry) -> anyhow::Result<()> {
        info!(
            "Apply index {} (term {}): {}",
            entry.index,
            entry.term,
            String::from_utf8_lossy(&entry.data)
        );
        Ok(())
    }
}
