//! The storage backend port: the abstract interface through which the
//! object store persists data. Modeled as a trait object rather than a
//! class hierarchy — `async_trait`, a local filesystem implementation,
//! and room for a second, asynchronous remote implementation.

pub mod local;
pub mod remote;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::Error;
use crate::object::ObjectKind;
use crate::object_id::ObjectId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub count: u64,
    pub bytes: u64,
}

/// Outcome of a `copy_to` migration between backends (spec §4.2
/// `copyTo(other_backend)`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub copied: u64,
    pub already_present: u64,
}

/// Abstract object persistence. Satisfied by a local filesystem backend
/// ([`local::LocalBackend`]) or a remote, HTTP/S3-style backend
/// ([`remote::RemoteBackend`]), per spec §4.2 "Pluggability".
#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Prepares on-disk (or remote-side) structures for a brand new store.
    async fn initialize(&self) -> Result<(), Error>;

    async fn health_check(&self) -> Result<(), Error>;

    async fn has(&self, id: &ObjectId) -> Result<bool, Error>;

    /// Writes an object, idempotently. Returns the id the object already has
    /// or now has; writing an id that already exists is a no-op (spec §3.2).
    async fn write(&self, kind: ObjectKind, payload: &[u8]) -> Result<ObjectId, Error>;

    async fn read(&self, id: &ObjectId) -> Result<(ObjectKind, Vec<u8>), Error>;

    /// Streaming read for large blobs (spec §4.2 `stream(id)`).
    async fn stream(
        &self,
        id: &ObjectId,
    ) -> Result<std::pin::Pin<Box<dyn AsyncRead + Send>>, Error>;

    /// Used only by GC (out of core scope, but the contract must exist per
    /// spec §3.5 "Lifecycles").
    async fn delete(&self, id: &ObjectId) -> Result<(), Error>;

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<ObjectId>, Error>;

    async fn stats(&self) -> Result<BackendStats, Error>;

    /// Only meaningful for remote stores; `None` for a local filesystem
    /// backend (spec §4.2 `getSignedUrl`, "optional, for remote stores").
    async fn get_signed_url(&self, _id: &ObjectId) -> Result<Option<String>, Error> {
        Ok(None)
    }

    /// Copies every object this backend has into `other`, skipping ids
    /// `other` already has (spec §4.2 `copyTo(other_backend)`).
    async fn copy_to(&self, other: &dyn StorageBackend) -> Result<CopyReport, Error> {
        let mut report = CopyReport::default();
        for id in self.list("", usize::MAX).await? {
            if other.has(&id).await? {
                report.already_present += 1;
                continue;
            }
            let (kind, payload) = self.read(&id).await?;
            other.write(kind, &payload).await?;
            report.copied += 1;
        }
        Ok(report)
    }
}
