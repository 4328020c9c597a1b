//! Repository façade (spec §4.9): orchestrates the object store, ref store,
//! index, and journal behind the verb surface of spec §6.3. Grounded in the
//! teacher's `Workspace`/`WorkspaceCommandHelper` pair in `cli_util.rs` —
//! locate-root-by-walking-upward, lazily build the backing stores, wrap each
//! mutating call so it can be undone — adapted to this crate's plain
//! object/ref/index model instead of jj's operation-log-of-views.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use crate::backend::StorageBackend;
use crate::backend::local::LocalBackend;
use crate::backend::remote::RemoteBackend;
use crate::backend::remote::RemoteBackendConfig;
use crate::config::BackendKind;
use crate::config::RepoConfig;
use crate::diff::DiffResult;
use crate::error::Error;
use crate::error::OperationContext;
use crate::index::Index;
use crate::index::IndexEntry;
use crate::index::Stage;
use crate::index::StatCache;
use crate::journal::Journal;
use crate::journal::OperationState;
use crate::journal::RefSnapshot;
use crate::merge::FileMergeOutcome;
use crate::merge::MergeStatus;
use crate::merge::PathMergeOutcome;
use crate::merge::PathState;
use crate::merge::conflicted_paths as merge_conflicted_paths;
use crate::merge::has_conflicts as merge_has_conflicts;
use crate::merge::merge_file_contents;
use crate::merge::merge_trees;
use crate::merge::resolve_merge_base;
use crate::merge::write_merged_tree;
use crate::merge::DEFAULT_MAX_RECURSION_DEPTH;
use crate::object::Commit;
use crate::object::Mode;
use crate::object::Object;
use crate::object::ObjectKind;
use crate::object::Signature;
use crate::object::Tree;
use crate::object::canonical_bytes;
use crate::object_id::HashAlgorithm;
use crate::object_id::ObjectId;
use crate::object_store::ObjectStore;
use crate::refs::HEAD;
use crate::refs::HeadUpdate;
use crate::refs::RefStore;
use crate::refs::RefTarget;
use crate::repo_path::RepoPathBuf;
use crate::working_copy;

const WIT_DIR_NAME: &str = ".wit";
const BRANCH_NS: &str = "refs/heads";
const TAG_NS: &str = "refs/tags";
const DEFAULT_BRANCH: &str = "main";

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// What to stage on `add` (spec §6.3 "`add <path>...`; `.` means all").
pub enum AddTarget {
    All,
    Paths(Vec<RepoPathBuf>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: RepoPathBuf,
    pub change: ChangeKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub staged: Vec<StatusEntry>,
    pub unstaged: Vec<StatusEntry>,
    pub untracked: Vec<RepoPathBuf>,
    pub conflicted: Vec<RepoPathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: ObjectId,
    pub commit: Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    Soft,
    Mixed,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    AlreadyUpToDate,
    FastForwarded(ObjectId),
    Merged(ObjectId),
    Conflicts(Vec<RepoPathBuf>),
}

/// Orchestrates every component behind one repository root (spec §4.9).
pub struct Repo {
    root: PathBuf,
    wit_dir: PathBuf,
    store: ObjectStore,
    refs: RefStore,
    journal: Journal,
    config: RepoConfig,
}

impl Repo {
    fn index_path(&self) -> PathBuf {
        self.wit_dir.join("index")
    }

    fn merge_head_path(&self) -> PathBuf {
        self.wit_dir.join("MERGE_HEAD")
    }

    fn merge_msg_path(&self) -> PathBuf {
        self.wit_dir.join("MERGE_MSG")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Creates a brand-new repository at `path` backed by the local
    /// filesystem object store (spec §6.3 `init`).
    pub fn init(path: &Path, hash_algorithm: HashAlgorithm) -> Result<Self, Error> {
        Self::init_with_backend(path, hash_algorithm, BackendKind::Local)
    }

    /// Same as [`Self::init`], but lets the caller select which of the two
    /// concrete `StorageBackend`s (spec §4.2) the repository is backed by.
    pub fn init_with_backend(path: &Path, hash_algorithm: HashAlgorithm, backend: BackendKind) -> Result<Self, Error> {
        let root = path.to_path_buf();
        let wit_dir = root.join(WIT_DIR_NAME);
        if wit_dir.exists() {
            return Err(Error::AlreadyExists(wit_dir.display().to_string()));
        }
        fs::create_dir_all(&root)?;
        fs::create_dir_all(&wit_dir)?;

        let config = RepoConfig {
            hash_algorithm,
            backend,
            ..RepoConfig::default()
        };
        config.save(&wit_dir.join("config"))?;

        let backend = Self::construct_backend(&wit_dir, &config)?;

        let refs = RefStore::new(&wit_dir);
        refs.initialize()?;
        refs.create_symbolic(HEAD, &format!("{BRANCH_NS}/{DEFAULT_BRANCH}"))?;

        let journal = Journal::new(&wit_dir);
        journal.initialize()?;

        Index::default().save(&wit_dir.join("index"))?;
        fs::write(wit_dir.join("description"), "Unnamed repository\n")?;

        Ok(Self {
            store: ObjectStore::new(backend, hash_algorithm),
            root,
            wit_dir,
            refs,
            journal,
            config,
        })
    }

    /// Builds the concrete `StorageBackend` a config selects (spec §4.2:
    /// the object store sits behind a backend trait so either the local
    /// filesystem tier or the HTTP-backed remote tier can serve it).
    fn construct_backend(wit_dir: &Path, config: &RepoConfig) -> Result<Arc<dyn StorageBackend>, Error> {
        match &config.backend {
            BackendKind::Local => {
                crate::backend::local::scaffold(&wit_dir.join("objects"))?;
                let backend = LocalBackend::new(wit_dir.join("objects"), config.hash_algorithm);
                pollster::block_on(backend.initialize())?;
                Ok(Arc::new(backend))
            }
            BackendKind::Remote(remote) => {
                let backend = RemoteBackend::new(
                    remote.endpoint.clone(),
                    wit_dir.join(&remote.cache_dir),
                    config.hash_algorithm,
                    RemoteBackendConfig::default(),
                )?;
                pollster::block_on(backend.initialize())?;
                Ok(Arc::new(backend))
            }
        }
    }

    /// Locates a repository by walking upward from `start` (spec §4.9
    /// "Locate the repository root ... by walking upward").
    pub fn discover(start: &Path) -> Result<Self, Error> {
        let mut dir = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
        loop {
            let candidate = dir.join(WIT_DIR_NAME);
            if candidate.is_dir() {
                return Self::open(&dir);
            }
            match dir.parent() {
                Some(parent) => dir = parent.to_path_buf(),
                None => return Err(Error::NotARepository),
            }
        }
    }

    fn open(root: &Path) -> Result<Self, Error> {
        let wit_dir = root.join(WIT_DIR_NAME);
        let config = RepoConfig::load(&wit_dir.join("config"))?;
        let backend = Self::construct_backend(&wit_dir, &config)?;
        let refs = RefStore::new(&wit_dir);
        let journal = Journal::new(&wit_dir);
        Ok(Self {
            store: ObjectStore::new(backend, config.hash_algorithm),
            root: root.to_path_buf(),
            wit_dir,
            refs,
            journal,
            config,
        })
    }

    /// The branch `HEAD` points at, or `None` when detached (spec §6.3
    /// `switch`/`checkout`, `status`).
    pub fn current_branch(&self) -> Result<Option<String>, Error> {
        match self.refs.read(HEAD) {
            Ok(r) => match r.target {
                RefTarget::Symbolic(target) => {
                    Ok(target.strip_prefix(format!("{BRANCH_NS}/").as_str()).map(str::to_owned))
                }
                RefTarget::Direct(_) => Ok(None),
            },
            Err(Error::RefNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn ref_snapshot(&self) -> Result<RefSnapshot, Error> {
        let mut snapshot = RefSnapshot::new();
        snapshot.insert(HEAD.to_owned(), self.refs.resolve(HEAD).unwrap_or(None));
        for r in self.refs.list(BRANCH_NS)? {
            snapshot.insert(r.name.clone(), self.refs.resolve(&r.name).unwrap_or(None));
        }
        Ok(snapshot)
    }

    fn operation_state(&self, label: &str) -> Result<OperationState, Error> {
        let refs = self.ref_snapshot()?;
        let index_path = self.index_path();
        let index_snapshot_path = if index_path.exists() {
            Some(self.journal.snapshot_index(&index_path, self.journal.read_all()?.len() as u64, label)?)
        } else {
            None
        };
        Ok(OperationState {
            refs,
            index_snapshot_path,
        })
    }

    fn record(
        &self,
        operation: &str,
        description: &str,
        before: OperationState,
        timestamp: i64,
    ) -> Result<(), Error> {
        let after = self.operation_state("after")?;
        self.journal.append(operation, description, before, after, timestamp)?;
        Ok(())
    }

    async fn commit_tree(&self, commit_id: &ObjectId) -> Result<Tree, Error> {
        let Object::Commit(commit) = self.store.read(commit_id).await? else {
            return Err(Error::MalformedObject(Some(commit_id.clone()), "not a commit".into()));
        };
        let Object::Tree(tree) = self.store.read(&commit.tree).await? else {
            return Err(Error::MalformedObject(Some(commit.tree), "not a tree".into()));
        };
        Ok(tree)
    }

    /// Resolves a user-supplied revision expression: `HEAD`, a branch/tag
    /// name, or a full hex object id (spec §6.3 `rev-parse`).
    pub async fn rev_parse(&self, rev: &str) -> Result<ObjectId, Error> {
        if let Some(id) = ObjectId::from_hex(rev)
            && self.store.has(&id).await?
        {
            return Ok(id);
        }
        for candidate in [
            rev.to_owned(),
            format!("{BRANCH_NS}/{rev}"),
            format!("{TAG_NS}/{rev}"),
        ] {
            if let Ok(Some(id)) = self.refs.resolve(&candidate) {
                return Ok(id);
            }
        }
        Err(Error::UnknownRevision(rev.to_owned()))
    }

    fn walk_working_tree(&self) -> Result<BTreeSet<RepoPathBuf>, Error> {
        let mut out = BTreeSet::new();
        self.walk_dir(&self.root, RepoPathBuf::root(), &mut out)?;
        Ok(out)
    }

    fn walk_dir(&self, dir: &Path, prefix: RepoPathBuf, out: &mut BTreeSet<RepoPathBuf>) -> Result<(), Error> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == WIT_DIR_NAME {
                continue;
            }
            let path = prefix.join(&name);
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.walk_dir(&entry.path(), path, out)?;
            } else {
                out.insert(path);
            }
        }
        Ok(())
    }

    fn read_working_file(&self, path: &RepoPathBuf) -> Result<Option<(Mode, Vec<u8>)>, Error> {
        let fs_path = path.to_fs_path(&self.root);
        let metadata = match fs::symlink_metadata(&fs_path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Other(e)),
        };
        if metadata.file_type().is_symlink() {
            let target = fs::read_link(&fs_path)?;
            return Ok(Some((Mode::Symlink, target.to_string_lossy().into_owned().into_bytes())));
        }
        let content = fs::read(&fs_path)?;
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt as _;
            if metadata.permissions().mode() & 0o111 != 0 {
                Mode::ExecutableFile
            } else {
                Mode::RegularFile
            }
        };
        #[cfg(not(unix))]
        let mode = Mode::RegularFile;
        Ok(Some((mode, content)))
    }

    /// Stages paths into the index (spec §6.3 `add`, §4.4 stat-cache rule).
    pub async fn add(&self, target: AddTarget) -> Result<(), Error> {
        let before = self.operation_state("before")?;
        let mut index = Index::load(&self.index_path())?;
        let paths = match target {
            AddTarget::All => self.walk_working_tree()?.into_iter().collect::<Vec<_>>(),
            AddTarget::Paths(paths) => paths,
        };
        for path in &paths {
            let Some((mode, content)) = self.read_working_file(path)? else {
                index.remove(path);
                continue;
            };
            let fs_path = path.to_fs_path(&self.root);
            let stat = fs::symlink_metadata(&fs_path).ok().map(|m| StatCache::from_metadata(&m));
            let reuse_id = index.get(path).filter(|e| {
                e.mode == mode
                    && stat
                        .as_ref()
                        .zip(e.stat.as_ref())
                        .is_some_and(|(s, cached)| s.is_clean(cached))
            });
            let id = if let Some(existing) = reuse_id {
                existing.id.clone()
            } else {
                self.store.write(&Object::Blob(content)).await?
            };
            index.put(IndexEntry {
                path: path.clone(),
                mode,
                id,
                stage: Stage::Normal,
                stat,
            });
        }
        index.save(&self.index_path())?;
        self.record("add", &format!("add {} path(s)", paths.len()), before, now_unix())?;
        Ok(())
    }

    /// Stages every tracked path whose working-tree content differs from the
    /// index (spec §6.3 `commit -a`).
    async fn stage_tracked_modifications(&self, index: &mut Index) -> Result<(), Error> {
        let tracked: Vec<RepoPathBuf> = index.normal_entries().map(|e| e.path.clone()).collect();
        for path in tracked {
            match self.read_working_file(&path)? {
                None => index.remove(&path),
                Some((mode, content)) => {
                    let id = self.store.write(&Object::Blob(content)).await?;
                    let fs_path = path.to_fs_path(&self.root);
                    let stat = fs::symlink_metadata(&fs_path).ok().map(|m| StatCache::from_metadata(&m));
                    index.put(IndexEntry {
                        path,
                        mode,
                        id,
                        stage: Stage::Normal,
                        stat,
                    });
                }
            }
        }
        Ok(())
    }

    /// Creates a commit from the current index (spec §6.3 `commit`, §4.9).
    pub async fn commit(
        &self,
        message: &str,
        stage_all: bool,
        author: Signature,
        committer: Signature,
    ) -> Result<ObjectId, Error> {
        let before = self.operation_state("before")?;
        let mut index = Index::load(&self.index_path())?;
        if stage_all {
            self.stage_tracked_modifications(&mut index).await?;
        }
        if index.has_conflicts() {
            return Err(Error::MergeConflict(
                index.conflicted_paths().iter().map(RepoPathBuf::to_string).collect(),
            ));
        }

        let merge_head = fs::read_to_string(self.merge_head_path())
            .ok()
            .and_then(|s| ObjectId::from_hex(s.trim()));

        let parent = self.refs.resolve(HEAD).unwrap_or(None);
        let tree_id = index.write_tree(&self.store).await?;

        if merge_head.is_none()
            && let Some(parent_id) = &parent
        {
            let parent_tree = self.commit_tree(parent_id).await?;
            let parent_tree_id = self.store.write(&Object::Tree(parent_tree)).await?;
            if parent_tree_id == tree_id {
                return Err(Error::AlreadyExists("nothing to commit, working tree clean".into()));
            }
        }

        let mut parents = Vec::new();
        parents.extend(parent.clone());
        parents.extend(merge_head.clone());

        let commit = Commit {
            tree: tree_id,
            parents,
            author,
            committer,
            message: message.to_owned(),
        };
        let commit_id = self.store.write(&Object::Commit(commit)).await?;

        let timestamp = now_unix();
        match self.current_branch()? {
            Some(name) => {
                self.refs
                    .set(&format!("{BRANCH_NS}/{name}"), Some(commit_id.clone()), Some(parent), "commit", timestamp)?;
            }
            None => {
                self.refs
                    .update_head(HeadUpdate::Detached(commit_id.clone()), timestamp, "commit")?;
            }
        }

        if merge_head.is_some() {
            let _ = fs::remove_file(self.merge_head_path());
            let _ = fs::remove_file(self.merge_msg_path());
        }
        index.save(&self.index_path())?;
        self.record("commit", message, before, timestamp)?;
        Ok(commit_id)
    }

    /// Reports staged, unstaged, untracked and conflicted paths (spec §6.3
    /// `status`).
    pub async fn status(&self) -> Result<StatusReport, Error> {
        let index = Index::load(&self.index_path())?;
        let head_tree: BTreeMap<RepoPathBuf, PathState> = match self.refs.resolve(HEAD).unwrap_or(None) {
            Some(id) => crate::merge::flatten_tree(&self.store, &self.commit_tree(&id).await?, RepoPathBuf::root()).await?,
            None => BTreeMap::new(),
        };
        let indexed: BTreeMap<RepoPathBuf, PathState> = index
            .normal_entries()
            .map(|e| (e.path.clone(), PathState { mode: e.mode, id: e.id.clone() }))
            .collect();

        let mut staged_paths: BTreeSet<RepoPathBuf> = BTreeSet::new();
        staged_paths.extend(head_tree.keys().cloned());
        staged_paths.extend(indexed.keys().cloned());
        let mut staged = Vec::new();
        for path in staged_paths {
            match (head_tree.get(&path), indexed.get(&path)) {
                (None, Some(_)) => staged.push(StatusEntry { path, change: ChangeKind::Added }),
                (Some(_), None) => staged.push(StatusEntry { path, change: ChangeKind::Deleted }),
                (Some(a), Some(b)) if a != b => staged.push(StatusEntry { path, change: ChangeKind::Modified }),
                _ => {}
            }
        }

        let working = self.walk_working_tree()?;
        let mut unstaged = Vec::new();
        for (path, state) in &indexed {
            match self.read_working_file(path)? {
                None => unstaged.push(StatusEntry { path: path.clone(), change: ChangeKind::Deleted }),
                Some((mode, content)) => {
                    let hash = self.store.algorithm().hash(&canonical_bytes(ObjectKind::Blob, &content));
                    if mode != state.mode || hash != state.id {
                        unstaged.push(StatusEntry { path: path.clone(), change: ChangeKind::Modified });
                    }
                }
            }
        }
        let indexed_paths: BTreeSet<RepoPathBuf> = indexed.keys().cloned().collect();
        let untracked: Vec<RepoPathBuf> = working.difference(&indexed_paths).cloned().collect();

        Ok(StatusReport {
            staged,
            unstaged,
            untracked,
            conflicted: index.conflicted_paths(),
        })
    }

    /// Walks commit history from `start` (default `HEAD`) newest-first (spec
    /// §6.3 `log`).
    pub async fn log(&self, start: Option<&str>, limit: Option<usize>) -> Result<Vec<LogEntry>, Error> {
        let start_id = match start {
            Some(rev) => self.rev_parse(rev).await?,
            None => self.refs.resolve(HEAD)?.ok_or_else(|| Error::UnknownRevision(HEAD.to_owned()))?,
        };
        let mut seen = BTreeSet::new();
        let mut queue = vec![start_id];
        let mut entries = Vec::new();
        while let Some(id) = queue.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let Object::Commit(commit) = self.store.read(&id).await? else {
                return Err(Error::MalformedObject(Some(id), "not a commit".into()));
            };
            queue.extend(commit.parents.clone());
            entries.push(LogEntry { id, commit });
        }
        entries.sort_by(|a, b| {
            b.commit
                .author
                .unix_timestamp
                .cmp(&a.commit.author.unix_timestamp)
                .then_with(|| b.id.cmp(&a.id))
        });
        if let Some(n) = limit {
            entries.truncate(n);
        }
        Ok(entries)
    }

    /// Diffs working-tree-vs-index, or index-vs-HEAD when `staged` (spec
    /// §6.3 `diff [--staged]`).
    pub async fn diff(&self, staged: bool) -> Result<BTreeMap<RepoPathBuf, DiffResult>, Error> {
        let index = Index::load(&self.index_path())?;
        let indexed: BTreeMap<RepoPathBuf, PathState> = index
            .normal_entries()
            .map(|e| (e.path.clone(), PathState { mode: e.mode, id: e.id.clone() }))
            .collect();

        let (old_side, new_side): (BTreeMap<RepoPathBuf, PathState>, BTreeMap<RepoPathBuf, Option<Vec<u8>>>) =
            if staged {
                let head_tree = match self.refs.resolve(HEAD).unwrap_or(None) {
                    Some(id) => crate::merge::flatten_tree(&self.store, &self.commit_tree(&id).await?, RepoPathBuf::root()).await?,
                    None => BTreeMap::new(),
                };
                let mut new_side = BTreeMap::new();
                for (path, state) in &indexed {
                    let Object::Blob(bytes) = self.store.read(&state.id).await? else {
                        return Err(Error::MalformedObject(Some(state.id.clone()), "not a blob".into()));
                    };
                    new_side.insert(path.clone(), Some(bytes));
                }
                (head_tree, new_side)
            } else {
                let mut new_side = BTreeMap::new();
                for path in self.walk_working_tree()? {
                    new_side.insert(path.clone(), self.read_working_file(&path)?.map(|(_, c)| c));
                }
                (indexed, new_side)
            };

        let mut paths: BTreeSet<RepoPathBuf> = BTreeSet::new();
        paths.extend(old_side.keys().cloned());
        paths.extend(new_side.keys().cloned());

        let mut out = BTreeMap::new();
        for path in paths {
            let old_bytes = match old_side.get(&path) {
                Some(state) => match self.store.read(&state.id).await? {
                    Object::Blob(bytes) => bytes,
                    _ => return Err(Error::MalformedObject(Some(state.id.clone()), "not a blob".into())),
                },
                None => Vec::new(),
            };
            let new_bytes = new_side.get(&path).cloned().flatten().unwrap_or_default();
            let unchanged = old_side.contains_key(&path) == new_side.contains_key(&path) && old_bytes == new_bytes;
            if unchanged {
                continue;
            }
            out.insert(path, crate::diff::diff(&old_bytes, &new_bytes, crate::diff::DEFAULT_CONTEXT));
        }
        Ok(out)
    }

    pub fn branch_list(&self) -> Result<Vec<String>, Error> {
        let prefix = format!("{BRANCH_NS}/");
        Ok(self
            .refs
            .list(BRANCH_NS)?
            .into_iter()
            .map(|r| r.name.trim_start_matches(prefix.as_str()).to_owned())
            .collect())
    }

    pub fn branch_create(&self, name: &str) -> Result<(), Error> {
        let full = format!("{BRANCH_NS}/{name}");
        if self.refs.resolve(&full).unwrap_or(None).is_some() {
            return Err(Error::AlreadyExists(full));
        }
        let head = self.refs.resolve(HEAD)?.ok_or(Error::UnknownRevision(HEAD.to_owned()))?;
        self.refs.set(&full, Some(head), None, "branch", now_unix())
    }

    pub fn branch_delete(&self, name: &str, force: bool) -> Result<(), Error> {
        if !force && self.current_branch()?.as_deref() == Some(name) {
            return Err(Error::RefConflict {
                name: format!("{BRANCH_NS}/{name}"),
                expected: None,
                actual: None,
            });
        }
        self.refs.delete(&format!("{BRANCH_NS}/{name}"))
    }

    /// Switches `HEAD` to branch `name`, creating it first if `create` (spec
    /// §6.3 `switch <branch> [-c]`).
    pub async fn switch(&self, name: &str, create: bool) -> Result<(), Error> {
        if create {
            self.branch_create(name)?;
        }
        let before = self.operation_state("before")?;
        let target_id = self
            .refs
            .resolve(&format!("{BRANCH_NS}/{name}"))?
            .ok_or_else(|| Error::RefNotFound(format!("{BRANCH_NS}/{name}")))?;
        let tree = self.commit_tree(&target_id).await?;
        let mut index = Index::load(&self.index_path())?;
        working_copy::checkout(&self.store, &self.root, &mut index, &tree, false)
            .await
            .map_err(|e| e.with_context(OperationContext::for_verb("switch").with_path(name)))?;
        index.save(&self.index_path())?;
        self.refs.create_symbolic(HEAD, &format!("{BRANCH_NS}/{name}"))?;
        self.record("checkout", &format!("switch to {name}"), before, now_unix())?;
        Ok(())
    }

    /// Detaches `HEAD` at an arbitrary revision (spec §6.3 `checkout <ref>`).
    pub async fn checkout_detached(&self, rev: &str, force: bool) -> Result<(), Error> {
        let before = self.operation_state("before")?;
        let target_id = self.rev_parse(rev).await?;
        let tree = self.commit_tree(&target_id).await?;
        let mut index = Index::load(&self.index_path())?;
        working_copy::checkout(&self.store, &self.root, &mut index, &tree, force)
            .await
            .map_err(|e| e.with_context(OperationContext::for_verb("checkout").with_path(rev)))?;
        index.save(&self.index_path())?;
        self.refs.update_head(HeadUpdate::Detached(target_id), now_unix(), "checkout")?;
        self.record("checkout", &format!("checkout {rev}"), before, now_unix())?;
        Ok(())
    }

    fn merge_status(&self) -> Result<MergeStatus, Error> {
        if !self.merge_head_path().exists() {
            return Ok(MergeStatus::Idle);
        }
        let index = Index::load(&self.index_path())?;
        Ok(if index.has_conflicts() {
            MergeStatus::InProgressConflicts
        } else {
            MergeStatus::InProgressClean
        })
    }

    /// Merges `other_ref` into the current branch (spec §4.6, §6.3 `merge`).
    pub async fn merge(&self, other_ref: &str) -> Result<MergeOutcome, Error> {
        if self.merge_status()? != MergeStatus::Idle {
            return Err(Error::MergeInProgress);
        }
        let before = self.operation_state("before")?;
        let current = self.refs.resolve(HEAD)?.ok_or_else(|| Error::UnknownRevision(HEAD.to_owned()))?;
        let other = self.rev_parse(other_ref).await?;

        if current == other {
            return Ok(MergeOutcome::AlreadyUpToDate);
        }

        let base = resolve_merge_base(&self.store, &current, &other, DEFAULT_MAX_RECURSION_DEPTH).await?;
        if base == other {
            return Ok(MergeOutcome::AlreadyUpToDate);
        }

        let timestamp = now_unix();
        if base == current {
            // Fast-forward: the branch tip simply advances (spec §4.6
            // scenario 3); no merge commit is created.
            let tree = self.commit_tree(&other).await?;
            let mut index = Index::load(&self.index_path())?;
            working_copy::checkout(&self.store, &self.root, &mut index, &tree, false)
                .await
                .map_err(|e| e.with_context(OperationContext::for_verb("merge").with_path(other_ref)))?;
            index.save(&self.index_path())?;
            if let Some(name) = self.current_branch()? {
                self.refs
                    .set(&format!("{BRANCH_NS}/{name}"), Some(other.clone()), Some(Some(current)), "merge", timestamp)?;
            } else {
                self.refs.update_head(HeadUpdate::Detached(other.clone()), timestamp, "merge")?;
            }
            self.record("merge", &format!("fast-forward to {other_ref}"), before, timestamp)?;
            return Ok(MergeOutcome::FastForwarded(other));
        }

        let base_tree = self.commit_tree(&base).await?;
        let ours_tree = self.commit_tree(&current).await?;
        let theirs_tree = self.commit_tree(&other).await?;
        let outcomes = merge_trees(&self.store, &base_tree, &ours_tree, &theirs_tree).await?;

        if merge_has_conflicts(&outcomes) {
            self.materialize_merge(&outcomes).await?;
            fs::write(self.merge_head_path(), format!("{}\n", other.to_hex()))?;
            fs::write(self.merge_msg_path(), format!("Merge {other_ref} into {}\n", self.current_branch()?.unwrap_or_default()))?;
            self.record("merge", &format!("merge {other_ref} (conflicts)"), before, timestamp)?;
            return Ok(MergeOutcome::Conflicts(merge_conflicted_paths(&outcomes)));
        }

        let merged_tree_id = write_merged_tree(&self.store, &outcomes).await?;
        let mut index = Index::load(&self.index_path())?;
        let merged_tree = match self.store.read(&merged_tree_id).await? {
            Object::Tree(t) => t,
            _ => unreachable!("write_merged_tree always writes a tree"),
        };
        working_copy::checkout(&self.store, &self.root, &mut index, &merged_tree, true)
            .await
            .map_err(|e| e.with_context(OperationContext::for_verb("merge").with_path(other_ref)))?;
        index.save(&self.index_path())?;

        let sig = Signature {
            name: "wit".into(),
            email: "wit@localhost".into(),
            unix_timestamp: timestamp,
            tz_offset_minutes: 0,
        };
        let commit = Commit {
            tree: merged_tree_id,
            parents: vec![current.clone(), other.clone()],
            author: sig.clone(),
            committer: sig,
            message: format!("Merge {other_ref}\n"),
        };
        let commit_id = self.store.write(&Object::Commit(commit)).await?;
        if let Some(name) = self.current_branch()? {
            self.refs
                .set(&format!("{BRANCH_NS}/{name}"), Some(commit_id.clone()), Some(Some(current)), "merge", timestamp)?;
        } else {
            self.refs.update_head(HeadUpdate::Detached(commit_id.clone()), timestamp, "merge")?;
        }
        self.record("merge", &format!("merge {other_ref}"), before, timestamp)?;
        Ok(MergeOutcome::Merged(commit_id))
    }

    /// Writes conflict-marked working-tree files and multi-stage index
    /// entries for every unresolved path (spec §4.6 "Merge commit").
    async fn materialize_merge(&self, outcomes: &BTreeMap<RepoPathBuf, PathMergeOutcome>) -> Result<(), Error> {
        let mut index = Index::load(&self.index_path())?;
        for (path, outcome) in outcomes {
            match outcome {
                PathMergeOutcome::Resolved(Some(state)) => {
                    let Object::Blob(bytes) = self.store.read(&state.id).await? else {
                        return Err(Error::MalformedObject(Some(state.id.clone()), "not a blob".into()));
                    };
                    working_copy::write_file(&self.root, path, state.mode, &bytes)?;
                    index.remove(path);
                    index.put(IndexEntry {
                        path: path.clone(),
                        mode: state.mode,
                        id: state.id.clone(),
                        stage: Stage::Normal,
                        stat: None,
                    });
                }
                PathMergeOutcome::Resolved(None) => {
                    index.remove(path);
                    working_copy::remove_file_and_empty_parents(&self.root, path);
                }
                PathMergeOutcome::Conflict { base, ours, theirs } => {
                    index.remove(path);
                    if let Some(b) = base {
                        index.put(IndexEntry { path: path.clone(), mode: b.mode, id: b.id.clone(), stage: Stage::Base, stat: None });
                    }
                    if let Some(o) = ours {
                        index.put(IndexEntry { path: path.clone(), mode: o.mode, id: o.id.clone(), stage: Stage::Ours, stat: None });
                    }
                    if let Some(t) = theirs {
                        index.put(IndexEntry { path: path.clone(), mode: t.mode, id: t.id.clone(), stage: Stage::Theirs, stat: None });
                    }
                    let render = |state: &Option<PathState>| async {
                        match state {
                            Some(s) => match self.store.read(&s.id).await {
                                Ok(Object::Blob(bytes)) => Ok(bytes),
                                _ => Ok(Vec::new()),
                            },
                            None => Ok::<_, Error>(Vec::new()),
                        }
                    };
                    let base_bytes = render(base).await?;
                    let ours_bytes = render(ours).await?;
                    let theirs_bytes = render(theirs).await?;
                    let rendered = match merge_file_contents(&base_bytes, &ours_bytes, &theirs_bytes) {
                        FileMergeOutcome::Clean(bytes) => bytes,
                        FileMergeOutcome::Conflicted { rendered, .. } => rendered,
                    };
                    let mode = ours.as_ref().or(theirs.as_ref()).map(|s| s.mode).unwrap_or(Mode::RegularFile);
                    working_copy::write_file(&self.root, path, mode, &rendered)?;
                }
            }
        }
        index.save(&self.index_path())?;
        Ok(())
    }

    /// Restores the pre-merge state, including the working tree (spec §4.6
    /// "abort ... working tree restored").
    pub async fn merge_abort(&self) -> Result<(), Error> {
        if self.merge_status()? == MergeStatus::Idle {
            return Err(Error::NoMergeInProgress);
        }
        let entries = self.journal.read_all()?;
        let last = entries.last().ok_or(Error::NoMergeInProgress)?;
        self.restore_operation_state(&last.before_state)?;

        // `restore_operation_state` only puts refs and the index back; the
        // working tree still holds whatever `materialize_merge` wrote
        // (conflict markers, or files from a clean virtual merge that never
        // went through `checkout` and so never touched the index). Rewrite
        // every path the pre-merge tree tracks from its blob, unconditionally
        // rather than diffing against the just-restored index, and remove
        // every path the working tree gained during the merge.
        let head_id = self.refs.resolve(HEAD)?.ok_or_else(|| Error::UnknownRevision(HEAD.to_owned()))?;
        let tree = self.commit_tree(&head_id).await?;
        let target = crate::merge::flatten_tree(&self.store, &tree, RepoPathBuf::root()).await?;
        for (path, state) in &target {
            let Object::Blob(bytes) = self.store.read(&state.id).await? else {
                return Err(Error::MalformedObject(Some(state.id.clone()), "not a blob".into()));
            };
            working_copy::write_file(&self.root, path, state.mode, &bytes)?;
        }
        for path in self.walk_working_tree()? {
            if !target.contains_key(&path) {
                working_copy::remove_file_and_empty_parents(&self.root, &path);
            }
        }

        let _ = fs::remove_file(self.merge_head_path());
        let _ = fs::remove_file(self.merge_msg_path());
        self.journal.pop(1)?;
        Ok(())
    }

    fn restore_operation_state(&self, state: &OperationState) -> Result<(), Error> {
        let timestamp = now_unix();
        for (name, id) in &state.refs {
            // HEAD is ordinarily symbolic and is restored implicitly once the
            // branch it points at is restored; writing it directly here
            // would wrongly detach it.
            if name == HEAD {
                continue;
            }
            self.refs.set(name, id.clone(), None, "undo", timestamp)?;
        }
        match &state.index_snapshot_path {
            Some(path) => {
                let bytes = fs::read(path)?;
                if bytes.is_empty() {
                    Index::default().save(&self.index_path())?;
                } else {
                    fs::write(self.index_path(), bytes)?;
                }
            }
            None => Index::default().save(&self.index_path())?,
        }
        Ok(())
    }

    /// Resolves conflicts already staged and completes a merge (spec §4.6
    /// "`continue` ... requires the index to contain no multi-stage
    /// entries").
    pub async fn merge_continue(&self, author: Signature, committer: Signature) -> Result<ObjectId, Error> {
        if self.merge_status()? != MergeStatus::InProgressClean {
            return Err(Error::MergeInProgress);
        }
        let message = fs::read_to_string(self.merge_msg_path()).unwrap_or_else(|_| "Merge\n".to_owned());
        self.commit(&message, false, author, committer).await
    }

    /// Moves `HEAD`/index/working tree toward `target` per `mode` (spec
    /// §6.3 `reset [--soft|--mixed|--hard] <ref>`).
    pub async fn reset(&self, target: &str, mode: ResetMode) -> Result<(), Error> {
        let before = self.operation_state("before")?;
        let target_id = self.rev_parse(target).await?;
        let timestamp = now_unix();
        match self.current_branch()? {
            Some(name) => self.refs.set(&format!("{BRANCH_NS}/{name}"), Some(target_id.clone()), None, "reset", timestamp)?,
            None => self.refs.update_head(HeadUpdate::Detached(target_id.clone()), timestamp, "reset")?,
        }
        if mode != ResetMode::Soft {
            let tree = self.commit_tree(&target_id).await?;
            let mut index = Index::load(&self.index_path())?;
            if mode == ResetMode::Hard {
                working_copy::checkout(&self.store, &self.root, &mut index, &tree, true)
                    .await
                    .map_err(|e| e.with_context(OperationContext::for_verb("reset").with_path(target)))?;
            } else {
                let flat = crate::merge::flatten_tree(&self.store, &tree, RepoPathBuf::root()).await?;
                index = Index::default();
                for (path, state) in flat {
                    index.put(IndexEntry { path, mode: state.mode, id: state.id, stage: Stage::Normal, stat: None });
                }
            }
            index.save(&self.index_path())?;
        }
        self.record("reset", &format!("reset {target}"), before, timestamp)?;
        Ok(())
    }

    /// Pops the last `count` journal entries, restoring refs and index to
    /// the oldest of their pre-operation states (spec §4.8 "`undo` policy").
    pub fn undo(&self, count: usize, force: bool) -> Result<(), Error> {
        if !force {
            let index = Index::load(&self.index_path())?;
            for entry in index.normal_entries() {
                let fs_path = entry.path.to_fs_path(&self.root);
                match fs::read(&fs_path) {
                    Ok(bytes) => {
                        let hash = self.store.algorithm().hash(&canonical_bytes(ObjectKind::Blob, &bytes));
                        if hash != entry.id {
                            return Err(Error::IndexDirty);
                        }
                    }
                    Err(_) => return Err(Error::IndexDirty),
                }
            }
        }
        let popped = self.journal.pop(count)?;
        let Some(oldest) = popped.last() else {
            return Ok(());
        };
        self.restore_operation_state(&oldest.before_state)
    }

    pub async fn cat_file(&self, id: &ObjectId) -> Result<Object, Error> {
        self.store.read(id).await
    }

    /// Computes (and optionally stores) a blob's id for raw bytes (spec
    /// §6.3 `hash-object [-w] <file>`).
    pub async fn hash_object(&self, content: &[u8], write: bool) -> Result<ObjectId, Error> {
        if write {
            self.store.write(&Object::Blob(content.to_vec())).await
        } else {
            Ok(self.store.algorithm().hash(&canonical_bytes(ObjectKind::Blob, content)))
        }
    }

    /// Lists a tree's entries, recursing into subdirectories when
    /// `recursive` (spec §6.3 `ls-tree [-r] <tree>`).
    pub async fn ls_tree(&self, tree_id: &ObjectId, recursive: bool) -> Result<Vec<(RepoPathBuf, Mode, ObjectId)>, Error> {
        if recursive {
            let Object::Tree(tree) = self.store.read(tree_id).await? else {
                return Err(Error::MalformedObject(Some(tree_id.clone()), "not a tree".into()));
            };
            let flat = crate::merge::flatten_tree(&self.store, &tree, RepoPathBuf::root()).await?;
            Ok(flat.into_iter().map(|(p, s)| (p, s.mode, s.id)).collect())
        } else {
            let Object::Tree(tree) = self.store.read(tree_id).await? else {
                return Err(Error::MalformedObject(Some(tree_id.clone()), "not a tree".into()));
            };
            Ok(tree
                .entries()
                .iter()
                .map(|e| (RepoPathBuf::from(e.name.as_str()), e.mode, e.id.clone()))
                .collect())
        }
    }

    pub fn ls_files(&self) -> Result<Vec<RepoPathBuf>, Error> {
        Ok(Index::load(&self.index_path())?.normal_entries().map(|e| e.path.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(ts: i64) -> Signature {
        Signature {
            name: "Test User".into(),
            email: "test@example.com".into(),
            unix_timestamp: ts,
            tz_offset_minutes: 0,
        }
    }

    fn write_file(root: &Path, name: &str, content: &str) {
        fs::write(root.join(name), content).unwrap();
    }

    #[test]
    fn init_then_commit_seed_scenario() {
        pollster::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let repo = Repo::init(dir.path(), HashAlgorithm::Sha256).unwrap();
            write_file(dir.path(), "a.txt", "hello\n");
            repo.add(AddTarget::Paths(vec![RepoPathBuf::from("a.txt")])).await.unwrap();
            let commit_id = repo.commit("first", false, sig(100), sig(100)).await.unwrap();

            let log = repo.log(None, None).await.unwrap();
            assert_eq!(log.len(), 1);
            assert_eq!(log[0].id, commit_id);

            let tree = repo.commit_tree(&commit_id).await.unwrap();
            assert_eq!(tree.entries().len(), 1);
            assert_eq!(tree.entries()[0].name, "a.txt");

            let Object::Blob(bytes) = repo.store.read(&tree.entries()[0].id).await.unwrap() else { panic!() };
            assert_eq!(bytes, b"hello\n");
        });
    }

    #[test]
    fn commit_with_nothing_staged_fails() {
        pollster::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let repo = Repo::init(dir.path(), HashAlgorithm::Sha256).unwrap();
            write_file(dir.path(), "a.txt", "hello\n");
            repo.add(AddTarget::Paths(vec![RepoPathBuf::from("a.txt")])).await.unwrap();
            repo.commit("first", false, sig(1), sig(1)).await.unwrap();
            let err = repo.commit("again", false, sig(2), sig(2)).await.unwrap_err();
            assert!(matches!(err, Error::AlreadyExists(_)));
        });
    }

    #[test]
    fn status_reports_untracked_and_staged() {
        pollster::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let repo = Repo::init(dir.path(), HashAlgorithm::Sha256).unwrap();
            write_file(dir.path(), "a.txt", "hello\n");
            let status = repo.status().await.unwrap();
            assert_eq!(status.untracked, vec![RepoPathBuf::from("a.txt")]);

            repo.add(AddTarget::All).await.unwrap();
            let status = repo.status().await.unwrap();
            assert_eq!(status.staged.len(), 1);
            assert_eq!(status.staged[0].change, ChangeKind::Added);
        });
    }

    #[test]
    fn fast_forward_merge_advances_branch_without_merge_commit() {
        pollster::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let repo = Repo::init(dir.path(), HashAlgorithm::Sha256).unwrap();
            write_file(dir.path(), "a.txt", "one\n");
            repo.add(AddTarget::All).await.unwrap();
            let base_commit = repo.commit("base", false, sig(1), sig(1)).await.unwrap();

            repo.branch_create("feature").unwrap();
            repo.switch("feature", false).await.unwrap();
            write_file(dir.path(), "b.txt", "two\n");
            repo.add(AddTarget::All).await.unwrap();
            let feature_commit = repo.commit("feature work", false, sig(2), sig(2)).await.unwrap();

            repo.switch("main", false).await.unwrap();
            let outcome = repo.merge("feature").await.unwrap();
            assert_eq!(outcome, MergeOutcome::FastForwarded(feature_commit.clone()));
            assert_eq!(repo.refs.resolve(HEAD).unwrap(), Some(feature_commit));
            let _ = base_commit;
        });
    }

    #[test]
    fn conflicting_merge_then_abort_restores_state() {
        pollster::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let repo = Repo::init(dir.path(), HashAlgorithm::Sha256).unwrap();
            write_file(dir.path(), "a.txt", "base\n");
            repo.add(AddTarget::All).await.unwrap();
            repo.commit("base", false, sig(1), sig(1)).await.unwrap();

            repo.branch_create("feature").unwrap();
            repo.switch("feature", false).await.unwrap();
            write_file(dir.path(), "a.txt", "feature change\n");
            repo.add(AddTarget::All).await.unwrap();
            repo.commit("feature change", false, sig(2), sig(2)).await.unwrap();

            repo.switch("main", false).await.unwrap();
            write_file(dir.path(), "a.txt", "main change\n");
            repo.add(AddTarget::All).await.unwrap();
            let pre_merge_main = repo.commit("main change", false, sig(3), sig(3)).await.unwrap();

            let outcome = repo.merge("feature").await.unwrap();
            assert!(matches!(outcome, MergeOutcome::Conflicts(_)));
            let conflicted = fs::read_to_string(dir.path().join("a.txt")).unwrap();
            assert!(conflicted.contains("<<<<<<< ours"));
            assert_eq!(repo.merge_status().unwrap(), MergeStatus::InProgressConflicts);

            repo.merge_abort().await.unwrap();
            assert_eq!(repo.refs.resolve(HEAD).unwrap(), Some(pre_merge_main));
            assert!(!repo.merge_head_path().exists());
            let restored = fs::read_to_string(dir.path().join("a.txt")).unwrap();
            assert_eq!(restored, "main change\n");
        });
    }

    #[test]
    fn checkout_refuses_to_lose_unstaged_modification() {
        pollster::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let repo = Repo::init(dir.path(), HashAlgorithm::Sha256).unwrap();
            write_file(dir.path(), "a.txt", "one\n");
            repo.add(AddTarget::All).await.unwrap();
            repo.commit("base", false, sig(1), sig(1)).await.unwrap();

            repo.branch_create("feature").unwrap();
            repo.switch("feature", false).await.unwrap();
            write_file(dir.path(), "a.txt", "two\n");
            repo.add(AddTarget::All).await.unwrap();
            repo.commit("feature", false, sig(2), sig(2)).await.unwrap();

            repo.switch("main", false).await.unwrap();
            write_file(dir.path(), "a.txt", "dirty uncommitted edit\n");

            let err = repo.switch("feature", false).await.unwrap_err();
            assert!(matches!(err, Error::IndexDirty));
            let content = fs::read_to_string(dir.path().join("a.txt")).unwrap();
            assert_eq!(content, "dirty uncommitted edit\n");
        });
    }

    #[test]
    fn undo_restores_branch_to_pre_merge_commit() {
        pollster::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let repo = Repo::init(dir.path(), HashAlgorithm::Sha256).unwrap();
            write_file(dir.path(), "a.txt", "one\n");
            repo.add(AddTarget::All).await.unwrap();
            let base_commit = repo.commit("base", false, sig(1), sig(1)).await.unwrap();

            repo.branch_create("feature").unwrap();
            repo.switch("feature", false).await.unwrap();
            write_file(dir.path(), "b.txt", "two\n");
            repo.add(AddTarget::All).await.unwrap();
            repo.commit("feature", false, sig(2), sig(2)).await.unwrap();

            repo.switch("main", false).await.unwrap();
            repo.merge("feature").await.unwrap();

            repo.undo(1, false).unwrap();
            assert_eq!(repo.refs.resolve(HEAD).unwrap(), Some(base_commit));
        });
    }
}
