//! `wit`: a content-addressed version control engine — object store, refs,
//! staging index, diff and merge, and the checkout/commit/undo machinery
//! that sits behind a CLI.
//!
//! # Crate layout
//!
//! - [`object`] / [`object_id`] — the immutable object model (blob, tree,
//!   commit, tag) and content hashing.
//! - [`backend`] — the [`backend::StorageBackend`] port and its local
//!   filesystem implementation.
//! - [`object_store`] — the content-addressed store built on top of a
//!   backend.
//! - [`refs`] — branches, tags, `HEAD`, and the reflog.
//! - [`index`] — the staging area between the working tree and commits.
//! - [`diff`] / [`merge`] — line-level diffing and three-way merge.
//! - [`working_copy`] — materializing a tree into the filesystem.
//! - [`journal`] — the operation log behind `undo`.
//! - [`config`] — `.wit/config` parsing.
//! - [`repo`] — the [`repo::Repo`] façade tying all of the above together.

pub mod backend;
pub mod config;
pub mod diff;
pub mod error;
pub mod hex_util;
pub mod index;
pub mod journal;
pub mod merge;
pub mod object;
pub mod object_id;
pub mod object_store;
pub mod repo;
pub mod repo_path;
pub mod refs;
pub mod working_copy;

pub use error::Error;
pub use object::Commit;
pub use object::Object;
pub use object::Signature;
pub use object::Tree;
pub use object_id::HashAlgorithm;
pub use object_id::ObjectId;
pub use repo::AddTarget;
pub use repo::MergeOutcome;
pub use repo::Repo;
pub use repo::ResetMode;
pub use repo_path::RepoPathBuf;
