//! The staging area: an ordered mapping from path to `(mode, object id,
//! stat cache)` that becomes the next commit's tree. The stat cache is a
//! hint used only to skip rehashing unchanged files, never to suppress a
//! real change — on doubt, rehash.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::Error;
use crate::object::Mode;
use crate::object::Object;
use crate::object::Tree;
use crate::object::TreeEntry;
use crate::object_id::ObjectId;
use crate::object_store::ObjectStore;
use crate::repo_path::RepoPathBuf;

/// Which side of an in-progress merge an index entry belongs to. Stage 0
/// (`Normal`) is the ordinary, resolved state; stages 1-3 hold the
/// multi-stage conflict entries described in spec §4.6 "Merge commit".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum Stage {
    Normal = 0,
    Base = 1,
    Ours = 2,
    Theirs = 3,
}

/// `(mtime, size, ino)` plus `ctime`, used only as a hint to skip rehashing
/// (spec §4.4, mitigated per §9 "Index stat cache").
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatCache {
    pub mtime_secs: i64,
    pub mtime_nanos: u32,
    pub ctime_secs: i64,
    pub size: u64,
    pub ino: u64,
}

impl StatCache {
    #[cfg(unix)]
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt as _;
        Self {
            mtime_secs: metadata.mtime(),
            mtime_nanos: metadata.mtime_nsec() as u32,
            ctime_secs: metadata.ctime(),
            size: metadata.len(),
            ino: metadata.ino(),
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        Self {
            mtime_secs: metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            mtime_nanos: 0,
            ctime_secs: 0,
            size: metadata.len(),
            ino: 0,
        }
    }

    /// True if `self` still looks like `previous` — i.e. the file can be
    /// assumed unchanged and rehashing may be skipped. Any mismatch,
    /// including in the `ctime` mitigation field, forces a rehash.
    pub fn is_clean(&self, previous: &Self) -> bool {
        self.mtime_secs == previous.mtime_secs
            && self.mtime_nanos == previous.mtime_nanos
            && self.ctime_secs == previous.ctime_secs
            && self.size == previous.size
            && self.ino == previous.ino
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexEntry {
    pub path: RepoPathBuf,
    pub mode: Mode,
    pub id: ObjectId,
    pub stage: Stage,
    pub stat: Option<StatCache>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Index {
    /// Kept ordered by `(path, stage)` at all times (spec §3.4).
    entries: BTreeMap<(RepoPathBuf, Stage), IndexEntry>,
}

impl Index {
    pub fn load(path: &Path) -> Result<Self, Error> {
        match fs::read(path) {
            Ok(bytes) => {
                let entries: Vec<IndexEntry> = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::MalformedObject(None, format!("malformed index: {e}")))?;
                Ok(Self {
                    entries: entries.into_iter().map(|e| ((e.path.clone(), e.stage), e)).collect(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Other(e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let entries: Vec<&IndexEntry> = self.entries.values().collect();
        let bytes = serde_json::to_vec_pretty(&entries)
            .map_err(|e| Error::MalformedObject(None, e.to_string()))?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_data()?;
        temp.persist(path).map_err(|e| Error::Other(e.error))?;
        Ok(())
    }

    pub fn get(&self, path: &RepoPathBuf) -> Option<&IndexEntry> {
        self.entries.get(&(path.clone(), Stage::Normal))
    }

    pub fn get_stage(&self, path: &RepoPathBuf, stage: Stage) -> Option<&IndexEntry> {
        self.entries.get(&(path.clone(), stage))
    }

    pub fn put(&mut self, entry: IndexEntry) {
        self.entries.insert((entry.path.clone(), entry.stage), entry);
    }

    /// Removes every stage for `path` (used by plain `rm`, and to clear
    /// conflict stages once resolved).
    pub fn remove(&mut self, path: &RepoPathBuf) {
        for stage in [Stage::Normal, Stage::Base, Stage::Ours, Stage::Theirs] {
            self.entries.remove(&(path.clone(), stage));
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    pub fn normal_entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values().filter(|e| e.stage == Stage::Normal)
    }

    pub fn has_conflicts(&self) -> bool {
        self.entries.keys().any(|(_, stage)| *stage != Stage::Normal)
    }

    pub fn conflicted_paths(&self) -> Vec<RepoPathBuf> {
        let mut paths: Vec<RepoPathBuf> = self
            .entries
            .keys()
            .filter(|(_, stage)| *stage != Stage::Normal)
            .map(|(path, _)| path.clone())
            .collect();
        paths.dedup();
        paths
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recursively builds tree objects bottom-up from the `Normal`-stage
    /// entries and returns the root tree id (spec §4.4 "`writeTree`
    /// algorithm"). Identical subtrees are written exactly once because
    /// `ObjectStore::write` is idempotent.
    pub async fn write_tree(&self, store: &ObjectStore) -> Result<ObjectId, Error> {
        let leaves: Vec<Leaf> = self
            .normal_entries()
            .map(|e| Leaf {
                components: e.path.components().map(str::to_owned).collect(),
                mode: e.mode,
                id: e.id.clone(),
            })
            .collect();
        let leaf_refs: Vec<&Leaf> = leaves.iter().collect();
        build_subtree(&leaf_refs, 0, store).await
    }
}

struct Leaf {
    components: Vec<String>,
    mode: Mode,
    id: ObjectId,
}

fn build_subtree<'a>(
    leaves: &'a [&'a Leaf],
    depth: usize,
    store: &'a ObjectStore,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<ObjectId, Error>> + 'a>> {
    Box::pin(async move {
        let mut groups: BTreeMap<&str, Vec<&Leaf>> = BTreeMap::new();
        for leaf in leaves {
            groups.entry(leaf.components[depth].as_str()).or_default().push(leaf);
        }
        let mut entries = Vec::with_capacity(groups.len());
        for (name, group) in groups {
            if group.len() == 1 && group[0].components.len() == depth + 1 {
                entries.push(TreeEntry {
                    mode: group[0].mode,
                    name: name.to_owned(),
                    id: group[0].id.clone(),
                });
            } else {
                let subtree_id = build_subtree(&group, depth + 1, store).await?;
                entries.push(TreeEntry {
                    mode: Mode::Subdirectory,
                    name: name.to_owned(),
                    id: subtree_id,
                });
            }
        }
        let tree = Tree::build(entries)?;
        store.write(&Object::Tree(tree)).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalBackend;
    use crate::object_id::HashAlgorithm;
    use std::sync::Arc;

    async fn store() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().join("objects"), HashAlgorithm::Sha256);
        backend.initialize().await.unwrap();
        (dir, ObjectStore::new(Arc::new(backend), HashAlgorithm::Sha256))
    }

    fn entry(path: &str, content: &[u8]) -> IndexEntry {
        IndexEntry {
            path: RepoPathBuf::from(path),
            mode: Mode::RegularFile,
            id: HashAlgorithm::Sha256.hash(&crate::object::canonical_bytes(
                crate::object::ObjectKind::Blob,
                content,
            )),
            stage: Stage::Normal,
            stat: None,
        }
    }

    #[test]
    fn empty_index_writes_empty_tree() {
        pollster::block_on(async {
            let (_dir, store) = store().await;
            let index = Index::default();
            let tree_id = index.write_tree(&store).await.unwrap();
            let tree = store.read(&tree_id).await.unwrap();
            assert_eq!(tree, Object::Tree(Tree::default()));
        });
    }

    #[test]
    fn single_file_tree() {
        pollster::block_on(async {
            let (_dir, store) = store().await;
            let mut index = Index::default();
            for content in [b"hello\n".as_slice()] {
                store.write(&Object::Blob(content.to_vec())).await.unwrap();
            }
            index.put(entry("a.txt", b"hello\n"));
            let tree_id = index.write_tree(&store).await.unwrap();
            let Object::Tree(tree) = store.read(&tree_id).await.unwrap() else { panic!() };
            assert_eq!(tree.entries().len(), 1);
            assert_eq!(tree.entries()[0].name, "a.txt");
        });
    }

    #[test]
    fn nested_paths_produce_subtrees() {
        pollster::block_on(async {
            let (_dir, store) = store().await;
            for content in [b"x".as_slice(), b"y".as_slice()] {
                store.write(&Object::Blob(content.to_vec())).await.unwrap();
            }
            let mut index = Index::default();
            index.put(entry("src/main.rs", b"x"));
            index.put(entry("src/lib.rs", b"y"));
            let tree_id = index.write_tree(&store).await.unwrap();
            let Object::Tree(root) = store.read(&tree_id).await.unwrap() else { panic!() };
            assert_eq!(root.entries().len(), 1);
            assert_eq!(root.entries()[0].name, "src");
            assert!(root.entries()[0].mode.is_dir());
            let Object::Tree(src) = store.read(&root.entries()[0].id).await.unwrap() else { panic!() };
            assert_eq!(src.entries().len(), 2);
        });
    }

    #[test]
    fn identical_subtrees_are_deduplicated() {
        pollster::block_on(async {
            let (_dir, store) = store().await;
            store.write(&Object::Blob(b"same".to_vec())).await.unwrap();
            let mut index = Index::default();
            index.put(entry("a/file.txt", b"same"));
            index.put(entry("b/file.txt", b"same"));
            let tree_id = index.write_tree(&store).await.unwrap();
            let Object::Tree(root) = store.read(&tree_id).await.unwrap() else { panic!() };
            assert_eq!(root.entries()[0].id, root.entries()[1].id);
        });
    }

    #[test]
    fn stat_cache_never_suppresses_size_change() {
        let previous = StatCache {
            mtime_secs: 1,
            mtime_nanos: 0,
            ctime_secs: 1,
            size: 10,
            ino: 7,
        };
        let current = StatCache { size: 11, ..previous };
        assert!(!current.is_clean(&previous));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        let mut index = Index::default();
        index.put(entry("a.txt", b"content"));
        index.save(&path).unwrap();
        let loaded = Index::load(&path).unwrap();
        assert_eq!(loaded.normal_entries().count(), 1);
    }

    #[test]
    fn conflicted_paths_reports_multi_stage_entries() {
        let mut index = Index::default();
        let mut base = entry("a.txt", b"base");
        base.stage = Stage::Base;
        index.put(base);
        assert!(index.has_conflicts());
        assert_eq!(index.conflicted_paths(), vec![RepoPathBuf::from("a.txt")]);
    }
}
