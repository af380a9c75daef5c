//! File-backed record store for host (development) builds.
//!
//! Each record lives in its own file under
//! `~/.onboard-esp32/<namespace>/<key>.bin`.

use super::{RecordStore, StorageError};
use log::info;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Get the default storage directory for a namespace.
///
/// Returns `~/.onboard-esp32/<namespace>`
pub fn default_store_dir(namespace: &str) -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home).join(".onboard-esp32").join(namespace))
}

/// Record store keeping one file per key.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    /// Store records under `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store records for `namespace` under the default directory.
    pub fn open_default(namespace: &str) -> Result<Self, StorageError> {
        let dir = default_store_dir(namespace)?;
        Ok(Self::new(dir))
    }

    /// Directory holding the record files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", key))
    }
}

impl RecordStore for FileRecordStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        fs::write(&path, value)?;

        // Verify write by reading back
        if fs::read(&path)? != value {
            return Err(StorageError::VerifyFailed);
        }

        info!("Record {:?} written to {:?}", key, path);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CredentialStore;
    use std::env;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Counter to ensure unique test directories even in parallel execution
    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_store_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        env::temp_dir().join(format!("onboard-test-{}-{}", pid, id))
    }

    #[test]
    fn test_missing_record_reads_none() {
        let dir = unique_store_dir();
        let store = FileRecordStore::new(&dir);
        assert!(store.read("credentials").unwrap().is_none());
    }

    #[test]
    fn test_record_roundtrip() {
        let dir = unique_store_dir();
        let mut store = FileRecordStore::new(&dir);

        store.write("credentials", b"\x01a\x00").expect("Failed to write");
        assert_eq!(store.read("credentials").unwrap().unwrap(), b"\x01a\x00");

        store.remove("credentials").expect("Failed to remove");
        assert!(store.read("credentials").unwrap().is_none());

        // Removing twice is fine
        store.remove("credentials").expect("Failed to remove again");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_credentials_survive_reopen() {
        let dir = unique_store_dir();

        let mut first = CredentialStore::new(Box::new(FileRecordStore::new(&dir)));
        assert!(first.save("HomeNet", "secret123"));
        drop(first);

        let second = CredentialStore::new(Box::new(FileRecordStore::new(&dir)));
        let credential = second.load().expect("credential should persist");
        assert_eq!(credential.ssid, "HomeNet");
        assert_eq!(credential.passphrase, "secret123");

        let _ = fs::remove_dir_all(&dir);
    }
}
