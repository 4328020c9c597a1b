//! Local filesystem object store backend. Objects live compressed at
//! `<objects_root>/<id[0..2]>/<id[2..]>`, written atomically via a
//! temporary file renamed into place, using the Git-compatible canonical
//! encoding from [`crate::object`].

use std::fs;
use std::io::Read as _;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use tempfile::NamedTempFile;
use tokio::io::AsyncRead;

use crate::backend::BackendStats;
use crate::backend::StorageBackend;
use crate::error::Error;
use crate::object::ObjectKind;
use crate::object::canonical_bytes;
use crate::object::parse_canonical_bytes;
use crate::object_id::HashAlgorithm;
use crate::object_id::ObjectId;

#[derive(Debug)]
pub struct LocalBackend {
    objects_root: PathBuf,
    algorithm: HashAlgorithm,
}

impl LocalBackend {
    pub fn new(objects_root: impl Into<PathBuf>, algorithm: HashAlgorithm) -> Self {
        Self {
            objects_root: objects_root.into(),
            algorithm,
        }
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        let (fan_out, rest) = hex.split_at(2);
        self.objects_root.join(fan_out).join(rest)
    }

    fn fan_out_dir(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.objects_root.join(&hex[..2])
    }

    fn compress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes)?;
        encoder.finish()
    }

    fn decompress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(bytes);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }

    fn read_sync(&self, id: &ObjectId) -> Result<(ObjectKind, Vec<u8>), Error> {
        let path = self.object_path(id);
        let compressed = fs::read(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::ObjectNotFound(id.clone())
            } else {
                Error::Other(err)
            }
        })?;
        let raw = Self::decompress(&compressed)
            .map_err(|e| Error::MalformedObject(Some(id.clone()), e.to_string()))?;
        parse_canonical_bytes(&raw)
    }

    fn write_sync(&self, kind: ObjectKind, payload: &[u8]) -> Result<ObjectId, Error> {
        let id = self.algorithm.hash(&canonical_bytes(kind, payload));
        let final_path = self.object_path(&id);
        if final_path.exists() {
            return Ok(id);
        }
        let dir = self.fan_out_dir(&id);
        fs::create_dir_all(&dir)?;
        let raw = canonical_bytes(kind, payload);
        let compressed = Self::compress(&raw)?;
        let mut temp = NamedTempFile::new_in(&dir)?;
        temp.write_all(&compressed)?;
        temp.as_file().sync_data()?;
        // Atomic rename into the fan-out directory (spec §4.2 "Writes are
        // atomic via write-to-temporary-then-rename").
        match temp.persist_noclobber(&final_path) {
            Ok(_) => {}
            Err(err) if final_path.exists() => {
                // Another writer raced us to the same content-addressed
                // path; the content is identical by construction, so this
                // is not an error (spec §3.2 "writing an object whose id
                // already exists is a no-op").
                drop(err);
            }
            Err(err) => return Err(Error::Other(err.error)),
        }
        Ok(id)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn initialize(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.objects_root)?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        if self.objects_root.is_dir() {
            Ok(())
        } else {
            Err(Error::BackendUnavailable(format!(
                "objects root {} missing",
                self.objects_root.display()
            )))
        }
    }

    async fn has(&self, id: &ObjectId) -> Result<bool, Error> {
        Ok(self.object_path(id).is_file())
    }

    async fn write(&self, kind: ObjectKind, payload: &[u8]) -> Result<ObjectId, Error> {
        self.write_sync(kind, payload)
    }

    async fn read(&self, id: &ObjectId) -> Result<(ObjectKind, Vec<u8>), Error> {
        self.read_sync(id)
    }

    async fn stream(&self, id: &ObjectId) -> Result<Pin<Box<dyn AsyncRead + Send>>, Error> {
        let (_, payload) = self.read_sync(id)?;
        Ok(Box::pin(std::io::Cursor::new(payload)))
    }

    async fn delete(&self, id: &ObjectId) -> Result<(), Error> {
        let path = self.object_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Other(err)),
        }
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<ObjectId>, Error> {
        let mut ids = Vec::new();
        if !self.objects_root.is_dir() {
            return Ok(ids);
        }
        for fan_out_entry in fs::read_dir(&self.objects_root)? {
            let fan_out_entry = fan_out_entry?;
            if !fan_out_entry.file_type()?.is_dir() {
                continue;
            }
            let fan_out_name = fan_out_entry.file_name();
            let fan_out_name = fan_out_name.to_string_lossy();
            for rest_entry in fs::read_dir(fan_out_entry.path())? {
                let rest_entry = rest_entry?;
                let rest_name = rest_entry.file_name();
                let hex = format!("{fan_out_name}{}", rest_name.to_string_lossy());
                if hex.starts_with(prefix) {
                    if let Some(id) = ObjectId::from_hex(&hex) {
                        ids.push(id);
                        if ids.len() >= limit {
                            return Ok(ids);
                        }
                    }
                }
            }
        }
        Ok(ids)
    }

    async fn stats(&self) -> Result<BackendStats, Error> {
        let ids = self.list("", usize::MAX).await?;
        let mut bytes = 0u64;
        for id in &ids {
            bytes += fs::metadata(self.object_path(id))?.len();
        }
        Ok(BackendStats {
            count: ids.len() as u64,
            bytes,
        })
    }
}

/// Ensures the fan-out object directory tree exists at `root` (used by
/// `init`, spec §6.1).
pub fn scaffold(root: &Path) -> std::io::Result<()> {
    fs::create_dir_all(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().join("objects"), HashAlgorithm::Sha256);
        pollster::block_on(backend.initialize()).unwrap();
        (dir, backend)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_dir, backend) = backend();
        let id = pollster::block_on(backend.write(ObjectKind::Blob, b"hello\n")).unwrap();
        let (kind, payload) = pollster::block_on(backend.read(&id)).unwrap();
        assert_eq!(kind, ObjectKind::Blob);
        assert_eq!(payload, b"hello\n");
    }

    #[test]
    fn write_is_idempotent() {
        let (_dir, backend) = backend();
        let id1 = pollster::block_on(backend.write(ObjectKind::Blob, b"same")).unwrap();
        let id2 = pollster::block_on(backend.write(ObjectKind::Blob, b"same")).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn missing_object_is_not_found() {
        let (_dir, backend) = backend();
        let bogus = HashAlgorithm::Sha256.hash(b"never written");
        let err = pollster::block_on(backend.read(&bogus)).unwrap_err();
        assert!(matches!(err, Error::ObjectNotFound(_)));
    }

    #[test]
    fn list_returns_written_objects() {
        let (_dir, backend) = backend();
        let id = pollster::block_on(backend.write(ObjectKind::Blob, b"content")).unwrap();
        let ids = pollster::block_on(backend.list("", 100)).unwrap();
        assert!(ids.contains(&id));
    }

    #[test]
    fn fan_out_directory_uses_first_two_hex_chars() {
        let (_dir, backend) = backend();
        let id = pollster::block_on(backend.write(ObjectKind::Blob, b"fan-out test")).unwrap();
        let path = backend.object_path(&id);
        let fan_out = path.parent().unwrap().file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(fan_out, &id.to_hex()[..2]);
    }
}
