//! Named, mutable pointers to object ids: a ref's resolved target kept
//! separate from its change history, using a direct/symbolic model with
//! single-writer-per-name compare-and-swap rather than conflict-merged refs.

use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use tempfile::NamedTempFile;

use crate::error::Error;
use crate::object_id::ObjectId;

pub const HEAD: &str = "HEAD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    Direct(ObjectId),
    Symbolic(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    pub target: RefTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogEntry {
    pub timestamp: i64,
    pub old_id: Option<ObjectId>,
    pub new_id: Option<ObjectId>,
    pub operation_label: String,
}

/// Filesystem-backed reference store: `refs/heads/<name>`,
/// `refs/tags/<name>`, `refs/remotes/<remote>/<name>`, plus `HEAD` and
/// `logs/...` reflogs (spec §6.1).
#[derive(Debug, Clone)]
pub struct RefStore {
    root: PathBuf,
}

impl RefStore {
    pub fn new(wit_dir: impl Into<PathBuf>) -> Self {
        Self { root: wit_dir.into() }
    }

    pub fn initialize(&self) -> Result<(), Error> {
        fs::create_dir_all(self.root.join("refs/heads"))?;
        fs::create_dir_all(self.root.join("refs/tags"))?;
        fs::create_dir_all(self.root.join("refs/remotes"))?;
        fs::create_dir_all(self.root.join("logs/refs"))?;
        Ok(())
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        if name == HEAD {
            self.root.join("HEAD")
        } else {
            self.root.join(name)
        }
    }

    fn log_path(&self, name: &str) -> PathBuf {
        self.root.join("logs").join(name)
    }

    /// Reads the ref's raw target without following symbolic indirection.
    pub fn read(&self, name: &str) -> Result<Reference, Error> {
        let path = self.ref_path(name);
        let content = fs::read_to_string(&path)
            .map_err(|_| Error::RefNotFound(name.to_owned()))?;
        let content = content.trim();
        let target = if let Some(rest) = content.strip_prefix("ref: ") {
            RefTarget::Symbolic(rest.trim().to_owned())
        } else {
            ObjectId::from_hex(content)
                .map(RefTarget::Direct)
                .ok_or_else(|| Error::MalformedObject(None, format!("malformed ref content in {name}")))?
        };
        Ok(Reference { name: name.to_owned(), target })
    }

    /// Resolves `name` to a concrete object id, following symbolic chains.
    /// Returns `Ok(None)` for an unborn branch (symbolic ref pointing at a
    /// name that does not yet exist, e.g. `HEAD` before the first commit).
    pub fn resolve(&self, name: &str) -> Result<Option<ObjectId>, Error> {
        let mut current = name.to_owned();
        let mut hops = 0;
        loop {
            hops += 1;
            if hops > 32 {
                return Err(Error::MalformedObject(None, "symbolic ref cycle".into()));
            }
            match self.read(&current) {
                Ok(Reference { target: RefTarget::Direct(id), .. }) => return Ok(Some(id)),
                Ok(Reference { target: RefTarget::Symbolic(next), .. }) => current = next,
                Err(Error::RefNotFound(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    /// Atomically sets `name` to `new_id`. If `expected_old_id` is `Some`,
    /// the update is a compare-and-swap against the current resolved value
    /// (spec §4.3 "Ordering & atomicity"). Appends a reflog entry.
    pub fn set(
        &self,
        name: &str,
        new_id: Option<ObjectId>,
        expected_old_id: Option<Option<ObjectId>>,
        operation_label: &str,
        timestamp: i64,
    ) -> Result<(), Error> {
        let current = self.resolve(name).unwrap_or(None);
        if let Some(expected) = &expected_old_id
            && *expected != current
        {
            return Err(Error::RefConflict {
                name: name.to_owned(),
                expected: expected.clone(),
                actual: current.clone(),
            });
        }
        let path = self.ref_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match &new_id {
            Some(id) => self.atomic_write(&path, &format!("{}\n", id.to_hex()))?,
            None => {
                let _ = fs::remove_file(&path);
            }
        }
        self.append_reflog(name, current, new_id, operation_label, timestamp)?;
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<(), Error> {
        let path = self.ref_path(name);
        fs::remove_file(&path).map_err(|_| Error::RefNotFound(name.to_owned()))
    }

    pub fn create_symbolic(&self, name: &str, target: &str) -> Result<(), Error> {
        let path = self.ref_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.atomic_write(&path, &format!("ref: {target}\n"))
    }

    /// Sets `HEAD` to track a branch (`refs/heads/<name>`) or to a detached
    /// commit id.
    pub fn update_head(&self, target: HeadUpdate, timestamp: i64, operation_label: &str) -> Result<(), Error> {
        let current = self.resolve(HEAD).unwrap_or(None);
        match target {
            HeadUpdate::Symbolic(branch) => self.create_symbolic(HEAD, &branch)?,
            HeadUpdate::Detached(id) => self.atomic_write(&self.ref_path(HEAD), &format!("{}\n", id.to_hex()))?,
        }
        let new = self.resolve(HEAD).unwrap_or(None);
        self.append_reflog(HEAD, current, new, operation_label, timestamp)
    }

    pub fn list(&self, namespace: &str) -> Result<Vec<Reference>, Error> {
        let dir = self.root.join(namespace);
        let mut out = Vec::new();
        if !dir.is_dir() {
            return Ok(out);
        }
        self.collect_refs(&dir, namespace, &mut out)?;
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn collect_refs(&self, dir: &Path, namespace: &str, out: &mut Vec<Reference>) -> Result<(), Error> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let name = format!("{namespace}/{}", file_name.to_string_lossy());
            if entry.file_type()?.is_dir() {
                self.collect_refs(&entry.path(), &name, out)?;
            } else {
                out.push(self.read(&name)?);
            }
        }
        Ok(())
    }

    pub fn reflog(&self, name: &str) -> Result<Vec<ReflogEntry>, Error> {
        let path = self.log_path(name);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Other(e)),
        };
        let mut entries = Vec::new();
        for line in content.lines() {
            entries.push(parse_reflog_line(line)?);
        }
        Ok(entries)
    }

    /// Ids referenced by any reflog entry for `name` newer than
    /// `now - retention_secs` (spec §3.5 "GC reachability over a
    /// configurable retention window").
    pub fn reflog_reachable(&self, name: &str, now: i64, retention_secs: i64) -> Result<Vec<ObjectId>, Error> {
        let cutoff = now - retention_secs;
        let mut ids = Vec::new();
        for entry in self.reflog(name)? {
            if entry.timestamp >= cutoff {
                ids.extend(entry.old_id);
                ids.extend(entry.new_id);
            }
        }
        Ok(ids)
    }

    fn append_reflog(
        &self,
        name: &str,
        old_id: Option<ObjectId>,
        new_id: Option<ObjectId>,
        operation_label: &str,
        timestamp: i64,
    ) -> Result<(), Error> {
        let path = self.log_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = format!(
            "{} {} {timestamp} {operation_label}\n",
            old_id.as_ref().map(ObjectId::to_hex).unwrap_or_else(|| "-".to_owned()),
            new_id.as_ref().map(ObjectId::to_hex).unwrap_or_else(|| "-".to_owned()),
        );
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn atomic_write(&self, path: &Path, content: &str) -> Result<(), Error> {
        let dir = path.parent().unwrap_or(&self.root);
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(content.as_bytes())?;
        temp.as_file().sync_data()?;
        temp.persist(path).map_err(|e| Error::Other(e.error))?;
        Ok(())
    }
}

pub enum HeadUpdate {
    Symbolic(String),
    Detached(ObjectId),
}

fn parse_reflog_line(line: &str) -> Result<ReflogEntry, Error> {
    let malformed = || Error::MalformedObject(None, format!("malformed reflog line: {line:?}"));
    let mut parts = line.splitn(4, ' ');
    let old = parts.next().ok_or_else(malformed)?;
    let new = parts.next().ok_or_else(malformed)?;
    let ts: i64 = parts.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
    let label = parts.next().unwrap_or("").to_owned();
    Ok(ReflogEntry {
        timestamp: ts,
        old_id: (old != "-").then(|| ObjectId::from_hex(old)).flatten(),
        new_id: (new != "-").then(|| ObjectId::from_hex(new)).flatten(),
        operation_label: label,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, RefStore) {
        let dir = tempfile::tempdir().unwrap();
        let refs = RefStore::new(dir.path());
        refs.initialize().unwrap();
        (dir, refs)
    }

    fn id(byte: u8) -> ObjectId {
        ObjectId::from_bytes(vec![byte; 32])
    }

    #[test]
    fn unborn_head_resolves_to_none() {
        let (_dir, refs) = store();
        refs.create_symbolic(HEAD, "refs/heads/main").unwrap();
        assert_eq!(refs.resolve(HEAD).unwrap(), None);
    }

    #[test]
    fn set_then_resolve_via_symbolic_head() {
        let (_dir, refs) = store();
        refs.create_symbolic(HEAD, "refs/heads/main").unwrap();
        refs.set("refs/heads/main", Some(id(1)), None, "commit", 100).unwrap();
        assert_eq!(refs.resolve(HEAD).unwrap(), Some(id(1)));
    }

    #[test]
    fn compare_and_swap_rejects_stale_expected() {
        let (_dir, refs) = store();
        refs.set("refs/heads/main", Some(id(1)), None, "commit", 100).unwrap();
        let err = refs
            .set("refs/heads/main", Some(id(2)), Some(Some(id(99))), "commit", 101)
            .unwrap_err();
        assert!(matches!(err, Error::RefConflict { .. }));
    }

    #[test]
    fn reflog_records_each_update() {
        let (_dir, refs) = store();
        refs.set("refs/heads/main", Some(id(1)), None, "commit", 100).unwrap();
        refs.set("refs/heads/main", Some(id(2)), Some(Some(id(1))), "commit", 200).unwrap();
        let log = refs.reflog("refs/heads/main").unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].old_id, Some(id(1)));
        assert_eq!(log[1].new_id, Some(id(2)));
    }

    #[test]
    fn list_namespace_returns_sorted_refs() {
        let (_dir, refs) = store();
        refs.set("refs/heads/b", Some(id(2)), None, "branch", 1).unwrap();
        refs.set("refs/heads/a", Some(id(1)), None, "branch", 1).unwrap();
        let list = refs.list("refs/heads").unwrap();
        assert_eq!(list.iter().map(|r| r.name.clone()).collect::<Vec<_>>(), vec!["refs/heads/a", "refs/heads/b"]);
    }

    #[test]
    fn reflog_reachable_respects_retention_window() {
        let (_dir, refs) = store();
        refs.set("refs/heads/main", Some(id(1)), None, "commit", 0).unwrap();
        refs.set("refs/heads/main", Some(id(2)), Some(Some(id(1))), "commit", 1000).unwrap();
        let reachable = refs.reflog_reachable("refs/heads/main", 1000, 100).unwrap();
        assert!(reachable.contains(&id(2)));
        assert!(!reachable.contains(&id(1)));
    }
}
