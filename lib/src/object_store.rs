//! The content-addressed, immutable object database (spec §4.2). Wraps a
//! [`StorageBackend`] trait object so the façade never depends on a concrete
//! backend (spec §9 "model it as an interface/port... not a class tree").

use std::sync::Arc;

use crate::backend::BackendStats;
use crate::backend::StorageBackend;
use crate::error::Error;
use crate::object::Object;
use crate::object_id::HashAlgorithm;
use crate::object_id::ObjectId;

#[derive(Clone)]
pub struct ObjectStore {
    backend: Arc<dyn StorageBackend>,
    algorithm: HashAlgorithm,
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl ObjectStore {
    pub fn new(backend: Arc<dyn StorageBackend>, algorithm: HashAlgorithm) -> Self {
        Self { backend, algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub async fn has(&self, id: &ObjectId) -> Result<bool, Error> {
        self.backend.has(id).await
    }

    /// Writes a typed object, returning its id. Idempotent (spec §3.2).
    pub async fn write(&self, object: &Object) -> Result<ObjectId, Error> {
        let kind = object.kind();
        let payload = object.encode_payload();
        self.backend.write(kind, &payload).await
    }

    /// Writes an object and verifies it matches an id the caller already
    /// expects, failing with [`Error::HashMismatch`] on disagreement (spec
    /// §4.1 "Failures").
    pub async fn write_expecting(&self, object: &Object, expected: &ObjectId) -> Result<ObjectId, Error> {
        let actual = self.write(object).await?;
        if &actual != expected {
            return Err(Error::HashMismatch {
                expected: expected.clone(),
                actual,
            });
        }
        Ok(actual)
    }

    pub async fn read(&self, id: &ObjectId) -> Result<Object, Error> {
        let (kind, payload) = self.backend.read(id).await?;
        Object::decode(kind, &payload, self.algorithm.id_len())
    }

    pub async fn delete(&self, id: &ObjectId) -> Result<(), Error> {
        self.backend.delete(id).await
    }

    pub async fn stats(&self) -> Result<BackendStats, Error> {
        self.backend.stats().await
    }

    pub async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<ObjectId>, Error> {
        self.backend.list(prefix, limit).await
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalBackend;
    use crate::object::Tree;

    async fn store() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().join("objects"), HashAlgorithm::Sha256);
        backend.initialize().await.unwrap();
        (dir, ObjectStore::new(Arc::new(backend), HashAlgorithm::Sha256))
    }

    #[test]
    fn universal_round_trip_invariant() {
        pollster::block_on(async {
            let (_dir, store) = store().await;
            let blob = Object::Blob(b"payload".to_vec());
            let id = store.write(&blob).await.unwrap();
            let read_back = store.read(&id).await.unwrap();
            assert_eq!(read_back, blob);
        });
    }

    #[test]
    fn content_addressing_invariant() {
        pollster::block_on(async {
            let (_dir, store) = store().await;
            let blob = Object::Blob(b"content address me".to_vec());
            let id = store.write(&blob).await.unwrap();
            let expected = HashAlgorithm::Sha256.hash(&crate::object::canonical_bytes(
                crate::object::ObjectKind::Blob,
                b"content address me",
            ));
            assert_eq!(id, expected);
        });
    }

    #[test]
    fn write_expecting_mismatch_is_an_error() {
        pollster::block_on(async {
            let (_dir, store) = store().await;
            let blob = Object::Blob(b"a".to_vec());
            let wrong = HashAlgorithm::Sha256.hash(b"not a");
            let err = store.write_expecting(&blob, &wrong).await.unwrap_err();
            assert!(matches!(err, Error::HashMismatch { .. }));
        });
    }

    #[test]
    fn empty_tree_round_trips() {
        pollster::block_on(async {
            let (_dir, store) = store().await;
            let tree = Object::Tree(Tree::default());
            let id = store.write(&tree).await.unwrap();
            assert_eq!(store.read(&id).await.unwrap(), tree);
        });
    }
}
