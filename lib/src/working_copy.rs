//! Checkout/restore: materializing a tree into the filesystem and the
//! index safely, using a flat `(mode, blob id)` model rather than
//! tree-state diffing.
//!
//! `HEAD` is intentionally left untouched here: the façade only advances it
//! after this function returns success, so a crash mid-checkout leaves the
//! old `HEAD` (and reflog) pointing at a consistent, already-materialized
//! state.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use bstr::ByteSlice as _;

use crate::error::Error;
use crate::index::Index;
use crate::index::IndexEntry;
use crate::index::Stage;
use crate::index::StatCache;
use crate::merge::PathState;
use crate::merge::flatten_tree;
use crate::object::Mode;
use crate::object::Object;
use crate::object::ObjectKind;
use crate::object::Tree;
use crate::object::canonical_bytes;
use crate::object_store::ObjectStore;
use crate::repo_path::RepoPathBuf;

fn index_to_flat(index: &Index) -> BTreeMap<RepoPathBuf, PathState> {
    index
        .normal_entries()
        .map(|e| {
            (
                e.path.clone(),
                PathState {
                    mode: e.mode,
                    id: e.id.clone(),
                },
            )
        })
        .collect()
}

/// True if the working-tree file at `path` no longer matches `recorded_id`
/// (an unstaged modification). Missing files count as unmodified here —
/// deletion handling is the caller's concern, not a dirty-check.
fn is_unstaged_modification(
    workdir: &Path,
    path: &RepoPathBuf,
    recorded_id: &crate::object_id::ObjectId,
    algorithm: crate::object_id::HashAlgorithm,
) -> bool {
    let fs_path = path.to_fs_path(workdir);
    match fs::read(&fs_path) {
        Ok(bytes) => {
            let actual = algorithm.hash(&canonical_bytes(ObjectKind::Blob, &bytes));
            &actual != recorded_id
        }
        Err(_) => false,
    }
}

pub(crate) fn write_file(workdir: &Path, path: &RepoPathBuf, mode: Mode, content: &[u8]) -> Result<(), Error> {
    let fs_path = path.to_fs_path(workdir);
    if let Some(parent) = fs_path.parent() {
        fs::create_dir_all(parent)?;
    }
    match mode {
        Mode::Symlink => {
            let target = content.to_str_lossy().into_owned();
            let _ = fs::remove_file(&fs_path);
            #[cfg(unix)]
            std::os::unix::fs::symlink(target, &fs_path)?;
            #[cfg(not(unix))]
            fs::write(&fs_path, target.as_bytes())?;
        }
        Mode::ExecutableFile => {
            fs::write(&fs_path, content)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt as _;
                let mut perms = fs::metadata(&fs_path)?.permissions();
                perms.set_mode(0o755);
                fs::set_permissions(&fs_path, perms)?;
            }
        }
        Mode::RegularFile => {
            fs::write(&fs_path, content)?;
        }
        Mode::Subdirectory => unreachable!("flattened trees never contain directory entries"),
    }
    Ok(())
}

pub(crate) fn remove_file_and_empty_parents(workdir: &Path, path: &RepoPathBuf) {
    let fs_path = path.to_fs_path(workdir);
    let _ = fs::remove_file(&fs_path);
    let mut dir = fs_path.parent().map(Path::to_path_buf);
    while let Some(d) = dir {
        if d == *workdir {
            break;
        }
        if fs::read_dir(&d).map(|mut it| it.next().is_none()).unwrap_or(false) {
            let _ = fs::remove_dir(&d);
            dir = d.parent().map(Path::to_path_buf);
        } else {
            break;
        }
    }
}

/// Checks out `target_tree` into `workdir`, updating `index` in place.
/// Implements spec §4.7 steps 1-4 (step 5, updating `HEAD`, is the
/// façade's job once this returns `Ok`).
pub async fn checkout(
    store: &ObjectStore,
    workdir: &Path,
    index: &mut Index,
    target_tree: &Tree,
    force: bool,
) -> Result<(), Error> {
    let current = index_to_flat(index);
    let target = flatten_tree(store, target_tree, RepoPathBuf::root()).await?;

    let mut all_paths: BTreeSet<RepoPathBuf> = BTreeSet::new();
    all_paths.extend(current.keys().cloned());
    all_paths.extend(target.keys().cloned());
    let changed: Vec<RepoPathBuf> = all_paths
        .into_iter()
        .filter(|p| current.get(p) != target.get(p))
        .collect();

    if !force {
        for path in &changed {
            if let Some(state) = current.get(path)
                && is_unstaged_modification(workdir, path, &state.id, store.algorithm())
            {
                return Err(Error::IndexDirty);
            }
        }
    }

    for path in &changed {
        match (current.get(path), target.get(path)) {
            (_, Some(new_state)) => {
                let Object::Blob(content) = store.read(&new_state.id).await? else {
                    return Err(Error::MalformedObject(Some(new_state.id.clone()), "not a blob".into()));
                };
                write_file(workdir, path, new_state.mode, &content)?;
            }
            (Some(_), None) => {
                remove_file_and_empty_parents(workdir, path);
            }
            (None, None) => unreachable!("path present in the union of both sides"),
        }
    }

    *index = Index::default();
    for (path, state) in &target {
        let fs_path = path.to_fs_path(workdir);
        let stat = fs::symlink_metadata(&fs_path).ok().map(|m| StatCache::from_metadata(&m));
        index.put(IndexEntry {
            path: path.clone(),
            mode: state.mode,
            id: state.id.clone(),
            stage: Stage::Normal,
            stat,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalBackend;
    use crate::object::TreeEntry;
    use crate::object_id::HashAlgorithm;
    use std::sync::Arc;

    async fn store() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().join("objects"), HashAlgorithm::Sha256);
        backend.initialize().await.unwrap();
        (dir, ObjectStore::new(Arc::new(backend), HashAlgorithm::Sha256))
    }

    async fn tree_with_file(store: &ObjectStore, name: &str, content: &[u8]) -> Tree {
        let id = store.write(&Object::Blob(content.to_vec())).await.unwrap();
        Tree::build(vec![TreeEntry {
            mode: Mode::RegularFile,
            name: name.to_owned(),
            id,
        }])
        .unwrap()
    }

    #[test]
    fn checkout_materializes_files_and_index() {
        pollster::block_on(async {
            let (_store_dir, store) = store().await;
            let workdir = tempfile::tempdir().unwrap();
            let tree = tree_with_file(&store, "a.txt", b"hello\n").await;
            let mut index = Index::default();
            checkout(&store, workdir.path(), &mut index, &tree, false).await.unwrap();
            let content = fs::read(workdir.path().join("a.txt")).unwrap();
            assert_eq!(content, b"hello\n");
            assert_eq!(index.normal_entries().count(), 1);
        });
    }

    #[test]
    fn checkout_refuses_to_clobber_unstaged_modification() {
        pollster::block_on(async {
            let (_store_dir, store) = store().await;
            let workdir = tempfile::tempdir().unwrap();
            let tree_v1 = tree_with_file(&store, "a.txt", b"v1\n").await;
            let mut index = Index::default();
            checkout(&store, workdir.path(), &mut index, &tree_v1, false).await.unwrap();

            fs::write(workdir.path().join("a.txt"), b"unstaged edit\n").unwrap();

            let tree_v2 = tree_with_file(&store, "a.txt", b"v2\n").await;
            let err = checkout(&store, workdir.path(), &mut index, &tree_v2, false)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::IndexDirty));
            assert_eq!(fs::read(workdir.path().join("a.txt")).unwrap(), b"unstaged edit\n");
        });
    }

    #[test]
    fn forced_checkout_overwrites_unstaged_modification() {
        pollster::block_on(async {
            let (_store_dir, store) = store().await;
            let workdir = tempfile::tempdir().unwrap();
            let tree_v1 = tree_with_file(&store, "a.txt", b"v1\n").await;
            let mut index = Index::default();
            checkout(&store, workdir.path(), &mut index, &tree_v1, false).await.unwrap();
            fs::write(workdir.path().join("a.txt"), b"unstaged edit\n").unwrap();

            let tree_v2 = tree_with_file(&store, "a.txt", b"v2\n").await;
            checkout(&store, workdir.path(), &mut index, &tree_v2, true).await.unwrap();
            assert_eq!(fs::read(workdir.path().join("a.txt")).unwrap(), b"v2\n");
        });
    }

    #[test]
    fn checkout_removes_files_absent_from_target() {
        pollster::block_on(async {
            let (_store_dir, store) = store().await;
            let workdir = tempfile::tempdir().unwrap();
            let tree_with_a = tree_with_file(&store, "a.txt", b"content\n").await;
            let mut index = Index::default();
            checkout(&store, workdir.path(), &mut index, &tree_with_a, false).await.unwrap();

            let empty_tree = Tree::default();
            checkout(&store, workdir.path(), &mut index, &empty_tree, false).await.unwrap();
            assert!(!workdir.path().join("a.txt").exists());
            assert_eq!(index.normal_entries().count(), 0);
        });
    }
}
