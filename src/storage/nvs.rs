//! NVS record store.
//!
//! Stores records in an ESP32 Non-Volatile Storage namespace so they
//! persist across reboots.

use super::{RecordStore, StorageError};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use log::debug;

/// Largest record this store reads back.
///
/// The credential record is `[ssid_len:1][ssid:32][pass_len:1][pass:63]` = 97 bytes;
/// a small margin is added.
const MAX_RECORD_SIZE: usize = 128;

/// Record store over one NVS namespace.
pub struct NvsRecordStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsRecordStore {
    /// Open (creating if needed) `namespace` in the default NVS partition.
    pub fn open(partition: EspDefaultNvsPartition, namespace: &str) -> Result<Self, StorageError> {
        let nvs = EspNvs::new(partition, namespace, true)?;
        Ok(Self { nvs })
    }

    /// Take the default partition and open `namespace`.
    pub fn open_default(namespace: &str) -> Result<Self, StorageError> {
        let partition = EspDefaultNvsPartition::take()?;
        Self::open(partition, namespace)
    }
}

impl RecordStore for NvsRecordStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let bytes = self.nvs.get_raw(key, &mut buf)?;
        if bytes.is_none() {
            debug!("No NVS record for {:?}", key);
        }
        Ok(bytes.map(<[u8]>::to_vec))
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        if value.len() > MAX_RECORD_SIZE {
            return Err(StorageError::Unavailable(format!(
                "record of {} bytes exceeds {} byte limit",
                value.len(),
                MAX_RECORD_SIZE
            )));
        }

        self.nvs.set_raw(key, value)?;

        // Read back and verify to catch silent flash write failures
        let mut verify_buf = [0u8; MAX_RECORD_SIZE];
        match self.nvs.get_raw(key, &mut verify_buf)? {
            Some(read_back) if read_back == value => Ok(()),
            _ => Err(StorageError::VerifyFailed),
        }
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.nvs.remove(key)?;
        Ok(())
    }
}
