//! Append-only operation log enabling `undo` (spec §4.8). Grounded in the
//! teacher's `operation.rs`/`op_store.rs` pair — an append-only history of
//! operations each carrying enough state to be inverted — simplified to a
//! flat JSON-lines file instead of a content-addressed operation store,
//! since this crate's journal only ever needs to pop its own tail.

use std::fs;
use std::io::BufRead as _;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use crate::error::Error;
use crate::object_id::ObjectId;

/// A snapshot of every branch/tag ref's resolved id, sufficient to restore
/// the ref set an operation changed (spec §4.8 "before_state/after_state
/// ... typically ref snapshots and index snapshots").
pub type RefSnapshot = std::collections::BTreeMap<String, Option<ObjectId>>;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OperationState {
    pub refs: RefSnapshot,
    /// Path to a saved copy of the index file at this point, or `None` if
    /// the operation did not touch the index.
    pub index_snapshot_path: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct JournalEntry {
    pub id: u64,
    pub timestamp: i64,
    pub operation: String,
    pub description: String,
    pub before_state: OperationState,
    pub after_state: OperationState,
}

/// Append-only, file-backed operation log (spec §6.1 `.wit/journal`).
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
    snapshots_dir: PathBuf,
}

impl Journal {
    pub fn new(wit_dir: impl Into<PathBuf>) -> Self {
        let wit_dir = wit_dir.into();
        Self {
            path: wit_dir.join("journal"),
            snapshots_dir: wit_dir.join("journal_snapshots"),
        }
    }

    pub fn initialize(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.snapshots_dir)?;
        if !self.path.exists() {
            fs::File::create(&self.path)?;
        }
        Ok(())
    }

    fn next_id(&self) -> Result<u64, Error> {
        Ok(self.read_all()?.last().map(|e| e.id + 1).unwrap_or(0))
    }

    /// Saves a copy of the index file as it stood at `before_state` or
    /// `after_state` time, returning a path to record in the
    /// [`OperationState`].
    pub fn snapshot_index(&self, index_path: &Path, entry_id: u64, label: &str) -> Result<String, Error> {
        fs::create_dir_all(&self.snapshots_dir)?;
        let dest = self.snapshots_dir.join(format!("{entry_id}-{label}"));
        match fs::read(index_path) {
            Ok(bytes) => fs::write(&dest, bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => fs::write(&dest, b"")?,
            Err(e) => return Err(Error::Other(e)),
        }
        Ok(dest.to_string_lossy().into_owned())
    }

    /// Appends a new entry describing a completed mutating verb (spec
    /// §4.8). Every mutating façade call wraps its work in this.
    pub fn append(
        &self,
        operation: &str,
        description: &str,
        before_state: OperationState,
        after_state: OperationState,
        timestamp: i64,
    ) -> Result<JournalEntry, Error> {
        let entry = JournalEntry {
            id: self.next_id()?,
            timestamp,
            operation: operation.to_owned(),
            description: description.to_owned(),
            before_state,
            after_state,
        };
        let line = serde_json::to_string(&entry).map_err(|e| Error::MalformedObject(None, e.to_string()))?;
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(entry)
    }

    pub fn read_all(&self) -> Result<Vec<JournalEntry>, Error> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Other(e)),
        };
        let reader = std::io::BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry =
                serde_json::from_str(&line).map_err(|e| Error::MalformedObject(None, e.to_string()))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Removes and returns the most recent `count` entries (newest first),
    /// rewriting the log without them. Used by `undo` (spec §4.8 "pop the
    /// most recent entry"; `-n <k>` pops `count` of them).
    pub fn pop(&self, count: usize) -> Result<Vec<JournalEntry>, Error> {
        let mut entries = self.read_all()?;
        let split_at = entries.len().saturating_sub(count);
        let popped = entries.split_off(split_at);
        let mut file = fs::File::create(&self.path)?;
        for entry in &entries {
            let line =
                serde_json::to_string(entry).map_err(|e| Error::MalformedObject(None, e.to_string()))?;
            writeln!(file, "{line}")?;
        }
        Ok(popped.into_iter().rev().collect())
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.read_all()?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn journal() -> (tempfile::TempDir, Journal) {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path());
        journal.initialize().unwrap();
        (dir, journal)
    }

    fn empty_state() -> OperationState {
        OperationState {
            refs: RefSnapshot::new(),
            index_snapshot_path: None,
        }
    }

    #[test]
    fn append_then_read_round_trips() {
        let (_dir, journal) = journal();
        journal
            .append("commit", "commit -m first", empty_state(), empty_state(), 100)
            .unwrap();
        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "commit");
    }

    #[test]
    fn pop_returns_most_recent_first_and_truncates_log() {
        let (_dir, journal) = journal();
        journal.append("add", "add a", empty_state(), empty_state(), 1).unwrap();
        journal.append("commit", "commit m", empty_state(), empty_state(), 2).unwrap();
        let popped = journal.pop(1).unwrap();
        assert_eq!(popped.len(), 1);
        assert_eq!(popped[0].operation, "commit");
        let remaining = journal.read_all().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].operation, "add");
    }

    #[test]
    fn pop_more_than_available_returns_everything() {
        let (_dir, journal) = journal();
        journal.append("add", "add a", empty_state(), empty_state(), 1).unwrap();
        let popped = journal.pop(5).unwrap();
        assert_eq!(popped.len(), 1);
        assert!(journal.is_empty().unwrap());
    }
}
