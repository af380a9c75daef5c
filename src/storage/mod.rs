//! Durable credential storage.
//!
//! The store holds exactly one credential set in a single named record.
//! Backends implement [`RecordStore`]; [`CredentialStore`] layers the
//! credential encoding on top and turns every backend failure into an
//! "absent"/`false` result so provisioning always stays retryable.
//!
//! # Components
//!
//! - [`MemoryRecordStore`] - volatile store (tests, fallback when flash is unavailable)
//! - [`FileRecordStore`] - one file per record (host builds)
//! - `NvsRecordStore` - ESP-IDF NVS namespace (ESP32 only)
//!
//! # Example
//!
//! ```
//! use onboard_esp32::storage::{CredentialStore, MemoryRecordStore};
//!
//! let mut store = CredentialStore::new(Box::new(MemoryRecordStore::new()));
//! assert!(!store.has());
//! assert!(store.save("HomeNet", "secret123"));
//! assert_eq!(store.load().unwrap().ssid, "HomeNet");
//! assert!(store.clear());
//! assert!(store.load().is_none());
//! ```

mod file;
#[cfg(feature = "esp32")]
mod nvs;

pub use file::FileRecordStore;
#[cfg(feature = "esp32")]
pub use nvs::NvsRecordStore;

use crate::config::Credential;
use log::{debug, error, info, warn};
use std::collections::HashMap;

/// Namespace holding the credential record.
pub const CREDENTIAL_NAMESPACE: &str = "wifi_config";

/// Key of the credential record inside [`CREDENTIAL_NAMESPACE`].
pub const CREDENTIAL_KEY: &str = "credentials";

/// Key-value persistence primitive.
pub trait RecordStore: Send {
    /// Read a record. `Ok(None)` means the record does not exist.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Create or replace a record.
    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a record. Deleting a missing record succeeds.
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

/// Errors reported by storage backends.
#[derive(Debug)]
pub enum StorageError {
    /// Persistence layer cannot be used.
    Unavailable(String),
    /// Written data did not read back identically.
    VerifyFailed,
    /// File system error.
    Io(std::io::Error),
    /// ESP-IDF error.
    #[cfg(feature = "esp32")]
    Esp(esp_idf_sys::EspError),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "storage unavailable: {}", msg),
            Self::VerifyFailed => write!(f, "read-back verification failed"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => write!(f, "ESP error: {:?}", e),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for StorageError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Esp(e)
    }
}

/// Volatile record store.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: HashMap<String, Vec<u8>>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.records.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.records.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.records.remove(key);
        Ok(())
    }
}

/// Single-record credential store.
///
/// Only the orchestrator thread calls into the store, so it needs no lock.
pub struct CredentialStore {
    backend: Box<dyn RecordStore>,
}

impl CredentialStore {
    /// Wrap a record backend.
    pub fn new(backend: Box<dyn RecordStore>) -> Self {
        Self { backend }
    }

    /// Store backed by memory only.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryRecordStore::new()))
    }

    /// Check whether a valid credential is stored.
    pub fn has(&self) -> bool {
        self.load().is_some()
    }

    /// Persist a credential, replacing any previous one.
    ///
    /// Returns `false` if the credential is invalid or the write failed.
    pub fn save(&mut self, ssid: &str, passphrase: &str) -> bool {
        match Credential::new(ssid, passphrase) {
            Ok(credential) => self.save_credential(&credential),
            Err(e) => {
                warn!("Refusing to store credential: {}", e);
                false
            }
        }
    }

    /// Persist an already validated credential.
    pub fn save_credential(&mut self, credential: &Credential) -> bool {
        match self.backend.write(CREDENTIAL_KEY, &credential.to_bytes()) {
            Ok(()) => {
                info!("WiFi credentials saved: {}", credential.ssid);
                true
            }
            Err(e) => {
                error!("Failed to save credentials: {}", e);
                false
            }
        }
    }

    /// Load the stored credential, if any.
    ///
    /// Corrupted records and backend failures read as absent.
    pub fn load(&self) -> Option<Credential> {
        let bytes = match self.backend.read(CREDENTIAL_KEY) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("No stored credentials");
                return None;
            }
            Err(e) => {
                warn!("Failed to read credentials: {}", e);
                return None;
            }
        };

        match Credential::from_bytes(&bytes) {
            Ok(credential) => Some(credential),
            Err(e) => {
                error!("Stored credentials are corrupt: {}", e);
                None
            }
        }
    }

    /// Erase the stored credential.
    pub fn clear(&mut self) -> bool {
        match self.backend.remove(CREDENTIAL_KEY) {
            Ok(()) => {
                info!("WiFi credentials cleared");
                true
            }
            Err(e) => {
                error!("Failed to clear credentials: {}", e);
                false
            }
        }
    }
}
