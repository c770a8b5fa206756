use std::{
    collections::BTreeSet,
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};

use keel_core::StoreError;
use tracing::{debug, instrument};
use zeroize::Zeroize;

use crate::{
    aead::EnvelopeEngine, failure::FailureHandler, keyset::DataKey, locks::ResourceLocks,
    names::NameCodec,
};

/// Temp files written during a save start with this prefix; never a valid token.
const TEMP_PREFIX: &str = ".keel-tmp";

/// Longest filename common filesystems accept, in bytes.
const MAX_FILE_NAME_LEN: usize = 255;

/// Directory of encrypted blobs, one file per logical name.
///
/// Each file holds exactly one envelope. Writes go through a temp file and an atomic
/// rename under the per-name lock, so readers see either the old or the new contents.
///
/// A name must encode to at most 255 filename bytes: 191 bytes of name with plain
/// filenames, 175 with encrypted ones. Longer names are rejected before touching disk.
pub(crate) struct BlobStore {
    root: PathBuf,
    engine: EnvelopeEngine,
    key: DataKey,
    names: NameCodec,
    failures: FailureHandler,
    locks: ResourceLocks,
}

impl BlobStore {
    pub(crate) fn new(
        root: impl Into<PathBuf>,
        engine: EnvelopeEngine,
        key: DataKey,
        names: NameCodec,
        failures: FailureHandler,
    ) -> Self {
        Self {
            root: root.into(),
            engine,
            key,
            names,
            failures,
            locks: ResourceLocks::new(),
        }
    }

    pub(crate) fn names_encrypted(&self) -> bool {
        self.names.is_encrypted()
    }

    #[instrument(skip_all)]
    pub(crate) fn save(&self, name: &str, mut bytes: Vec<u8>) -> Result<(), StoreError> {
        let sealed = self
            .engine
            .encrypt(&self.key, &bytes, self.engine.associated_data(name));
        if self.engine.secure_memory() {
            bytes.zeroize();
        }
        let envelope = sealed?;

        let physical = self.physical_name(name)?;
        let lock = self.locks.handle(&physical);
        let _guard = lock.lock();
        write_atomic(&self.root, &self.root.join(&physical), &envelope)
    }

    #[instrument(skip_all)]
    pub(crate) fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let physical = self.physical_name(name)?;
        let path = self.root.join(&physical);
        let lock = self.locks.handle(&physical);
        let _guard = lock.lock();

        let Some(envelope) = read_file(&path)? else {
            return Ok(None);
        };
        let opened = self.engine.decrypt(
            &self.key,
            &envelope,
            self.engine.associated_data(name),
            name,
        );
        match opened {
            Ok(plain) => Ok(Some(plain)),
            // The lock is already held here, so purge removes the file directly.
            Err(err) => self.failures.recover(err, || remove_file(&path).map(|_| ())),
        }
    }

    #[instrument(skip_all)]
    pub(crate) fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let physical = self.physical_name(name)?;
        let lock = self.locks.handle(&physical);
        let existed = {
            let _guard = lock.lock();
            remove_file(&self.root.join(&physical))?
        };
        self.locks.release(&physical, lock);
        Ok(existed)
    }

    pub(crate) fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let physical = self.physical_name(name)?;
        match fs::metadata(self.root.join(physical)) {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::storage(err)),
        }
    }

    /// Logical names of every blob whose filename can be decoded.
    #[instrument(skip_all)]
    pub(crate) fn list_names(&self) -> Result<BTreeSet<String>, StoreError> {
        let mut out = BTreeSet::new();
        for token in self.physical_names()? {
            match self.names.decrypt_name(&token) {
                Ok(name) => {
                    out.insert(name);
                }
                Err(err) => debug!(error = %err, "skipping undecodable blob name"),
            }
        }
        Ok(out)
    }

    /// Delete every blob, each under its own lock, then drop idle lock entries.
    #[instrument(skip_all)]
    pub(crate) fn clear(&self) -> Result<(), StoreError> {
        for token in self.physical_names()? {
            let lock = self.locks.handle(&token);
            {
                let _guard = lock.lock();
                remove_file(&self.root.join(&token))?;
            }
            self.locks.release(&token, lock);
        }
        self.locks.purge();
        Ok(())
    }

    fn physical_name(&self, name: &str) -> Result<String, StoreError> {
        if name.is_empty() {
            return Err(StoreError::Storage {
                reason: "blob name must not be empty".to_string(),
            });
        }
        let token = self.names.encrypt_name(name)?;
        if token.len() > MAX_FILE_NAME_LEN {
            return Err(StoreError::Storage {
                reason: format!(
                    "blob name of {} bytes is too long: its filename would be {} bytes, \
                     limit {MAX_FILE_NAME_LEN}",
                    name.len(),
                    token.len()
                ),
            });
        }
        Ok(token)
    }

    fn physical_names(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::storage(err)),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(token) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !token.starts_with('.') {
                out.push(token);
            }
        }
        Ok(out)
    }

    #[cfg(test)]
    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(self.physical_name(name).expect("name"))
    }
}

fn write_atomic(dir: &Path, path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::storage(e.error))?;
    Ok(())
}

fn read_file(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StoreError::storage(err)),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(Some(buf))
}

/// Returns whether a file was removed.
fn remove_file(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StoreError::storage(err)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use keel_core::{Algorithm, FailurePolicy, StoreConfig};

    use super::*;
    use crate::keyset::NameKey;

    fn store(root: &Path, encrypt_names: bool, policy: FailurePolicy) -> BlobStore {
        let config = StoreConfig::builder()
            .decryption_failure_policy(policy)
            .secure_memory(true)
            .build()
            .unwrap();
        BlobStore::new(
            root,
            EnvelopeEngine::new(&config),
            DataKey::generate(Algorithm::ChaCha20Poly1305),
            NameCodec::for_blob_names(encrypt_names.then(|| Arc::new(NameKey::generate()))),
            FailureHandler::new(policy),
        )
    }

    #[test]
    fn round_trip_encrypts_and_decrypts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blobs = store(dir.path(), false, FailurePolicy::ReturnEmpty);

        blobs
            .save("workspace/session", b"hello-keel".to_vec())
            .expect("save");
        assert_eq!(
            blobs.read("workspace/session").expect("read").as_deref(),
            Some(&b"hello-keel"[..])
        );

        // ensure plaintext is not present on disk
        let stored = fs::read(blobs.path_for("workspace/session")).expect("read ciphertext");
        assert!(!stored.windows(10).any(|w| w == b"hello-keel"));
    }

    #[test]
    fn delete_reports_existence_and_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blobs = store(dir.path(), true, FailurePolicy::ReturnEmpty);
        blobs.save("cert", vec![1, 2, 3]).expect("save");
        assert!(blobs.exists("cert").unwrap());

        assert!(blobs.delete("cert").expect("delete"));
        assert_eq!(blobs.read("cert").unwrap(), None);
        assert!(!blobs.delete("cert").expect("delete again"));
        assert_eq!(blobs.locks.len(), 0);
    }

    #[test]
    fn renamed_file_fails_authentication() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blobs = store(dir.path(), false, FailurePolicy::Raise);
        blobs.save("alpha", b"A".to_vec()).unwrap();
        fs::copy(blobs.path_for("alpha"), blobs.path_for("beta")).unwrap();

        let err = blobs.read("beta").expect_err("bound to alpha");
        assert!(matches!(err, StoreError::Decryption { .. }));
    }

    #[test]
    fn corrupted_file_is_deleted_under_delete_policy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blobs = store(dir.path(), true, FailurePolicy::DeleteAndReturnEmpty);
        blobs.save("cert", vec![9; 64]).unwrap();
        let path = blobs.path_for("cert");
        let mut raw = fs::read(&path).unwrap();
        raw[20] ^= 0xff;
        fs::write(&path, raw).unwrap();

        assert_eq!(blobs.read("cert").unwrap(), None);
        assert!(!blobs.exists("cert").unwrap());
    }

    #[test]
    fn listing_skips_temp_and_foreign_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blobs = store(dir.path(), true, FailurePolicy::ReturnEmpty);
        blobs.save("a", b"1".to_vec()).unwrap();
        blobs.save("b", b"2".to_vec()).unwrap();
        fs::write(dir.path().join(".keel-tmpXYZ"), b"partial").unwrap();
        fs::write(dir.path().join("stray"), b"?").unwrap();

        let names = blobs.list_names().unwrap();
        assert_eq!(names, BTreeSet::from(["a".to_string(), "b".to_string()]));

        blobs.clear().unwrap();
        assert!(blobs.list_names().unwrap().is_empty());
        assert!(!blobs.exists("a").unwrap());
    }

    #[test]
    fn long_names_are_rejected_before_touching_disk() {
        for encrypt_names in [false, true] {
            let dir = tempfile::tempdir().expect("tempdir");
            let blobs = store(dir.path(), encrypt_names, FailurePolicy::Raise);

            let longest = "n".repeat(175);
            blobs.save(&longest, vec![1]).expect("175-byte name fits");
            assert_eq!(blobs.read(&longest).unwrap(), Some(vec![1]));

            let too_long = "n".repeat(200);
            let err = blobs.save(&too_long, vec![2]).expect_err("200-byte name");
            match err {
                StoreError::Storage { reason } => assert!(reason.contains("too long"), "{reason}"),
                other => panic!("unexpected error: {other:?}"),
            }
            assert!(blobs.exists(&too_long).is_err());
            assert_eq!(
                blobs.list_names().unwrap(),
                BTreeSet::from([longest.clone()])
            );
        }
    }

    #[test]
    fn exists_surfaces_io_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let not_a_dir = dir.path().join("blobs");
        fs::write(&not_a_dir, b"file where the blob directory should be").unwrap();
        let blobs = store(&not_a_dir, false, FailurePolicy::ReturnEmpty);

        let err = blobs.exists("cert").expect_err("blob root is a file");
        assert!(matches!(err, StoreError::Storage { .. }));
    }

    #[test]
    fn empty_name_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blobs = store(dir.path(), false, FailurePolicy::ReturnEmpty);
        assert!(blobs.save("", vec![1]).is_err());
    }
}
