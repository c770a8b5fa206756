use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};

use keel_core::{storage::KeyValueBackend, StoreError};
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::instrument;

/// Key-value map persisted as a single JSON document.
///
/// Every mutation rewrites the document through a temp file and an atomic rename, so a
/// crash leaves either the previous or the new map on disk. A failed commit leaves the
/// in-memory map untouched.
pub struct JsonFileBackend {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileBackend {
    /// Open the map at `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = read_map(&path)?;
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn commit(
        &self,
        mutate: impl FnOnce(&mut BTreeMap<String, String>) -> bool,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        if !mutate(&mut next) {
            return Ok(());
        }
        write_map(&self.path, &next)?;
        *entries = next;
        Ok(())
    }
}

impl KeyValueBackend for JsonFileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    #[instrument(skip_all)]
    fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.commit(|map| {
            map.insert(key.to_string(), value);
            true
        })
    }

    #[instrument(skip_all)]
    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.commit(|map| map.remove(key).is_some())
    }

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.lock().contains_key(key))
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.lock().keys().cloned().collect())
    }

    #[instrument(skip_all)]
    fn clear(&self) -> Result<(), StoreError> {
        self.commit(|map| {
            let changed = !map.is_empty();
            map.clear();
            changed
        })
    }
}

fn read_map(path: &Path) -> Result<BTreeMap<String, String>, StoreError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(StoreError::storage(err)),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    if buf.is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_slice(&buf).map_err(|e| StoreError::Storage {
        reason: format!("corrupt preference file {}: {e}", path.display()),
    })
}

fn write_map(path: &Path, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| StoreError::Storage {
        reason: "invalid storage path".to_string(),
    })?;
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    let json = serde_json::to_vec(map).map_err(StoreError::storage)?;
    tmp.write_all(&json)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| StoreError::storage(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        let backend = JsonFileBackend::open(&path).expect("open");
        backend.put("a", "1".into()).expect("put");
        backend.put("b", "2".into()).expect("put");
        backend.remove("a").expect("remove");
        backend.remove("a").expect("remove again");

        let reopened = JsonFileBackend::open(&path).expect("reopen");
        assert_eq!(reopened.get("b").unwrap().as_deref(), Some("2"));
        assert!(!reopened.contains("a").unwrap());
        assert_eq!(reopened.keys().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn failed_commit_keeps_memory_consistent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("sub");
        let backend = JsonFileBackend::open(blocker.join("prefs.json")).expect("open");
        fs::write(&blocker, b"file").expect("write blocker");

        let err = backend.put("k", "v".into()).expect_err("parent is a file");
        assert!(matches!(err, StoreError::Storage { .. }));
        assert!(!backend.contains("k").unwrap());
    }

    #[test]
    fn corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        fs::write(&path, b"{broken").expect("write");
        let err = JsonFileBackend::open(&path).err().expect("corrupt");
        assert!(matches!(err, StoreError::Storage { .. }));
    }
}
