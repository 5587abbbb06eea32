use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::PeerAddress;

/// Errors returned by device-set persistence helpers.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to encode device set: {0}")]
    Encode(String),
    #[error("failed to decode device set: {0}")]
    Decode(String),
    #[error("failed to read device file: {0}")]
    Read(std::io::Error),
    #[error("failed to write device file: {0}")]
    Write(std::io::Error),
}

/// Remembered peers: the last one that connected and every known candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedDeviceSet {
    pub last_connected: Option<PeerAddress>,
    pub known_candidates: BTreeSet<PeerAddress>,
}

impl PersistedDeviceSet {
    /// Records a successful connection. Returns true if anything changed.
    pub fn record_connected(&mut self, address: PeerAddress) -> bool {
        let changed = self.last_connected != Some(address);
        self.last_connected = Some(address);
        self.known_candidates.insert(address) || changed
    }

    /// Adds a discovered candidate. Returns true if it was new.
    pub fn remember(&mut self, address: PeerAddress) -> bool {
        self.known_candidates.insert(address)
    }
}

/// Storage backend for [`PersistedDeviceSet`].
pub trait DeviceStore: Send + Sync {
    fn load(&self) -> Result<PersistedDeviceSet, PersistenceError>;
    fn save(&self, devices: &PersistedDeviceSet) -> Result<(), PersistenceError>;
}

/// Shared in-memory store; clones see the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryDeviceStore {
    inner: Arc<Mutex<PersistedDeviceSet>>,
}

impl MemoryDeviceStore {
    pub fn with_devices(devices: PersistedDeviceSet) -> Self {
        Self {
            inner: Arc::new(Mutex::new(devices)),
        }
    }

    pub fn snapshot(&self) -> PersistedDeviceSet {
        self.inner.lock().clone()
    }
}

impl DeviceStore for MemoryDeviceStore {
    fn load(&self) -> Result<PersistedDeviceSet, PersistenceError> {
        Ok(self.snapshot())
    }

    fn save(&self, devices: &PersistedDeviceSet) -> Result<(), PersistenceError> {
        *self.inner.lock() = devices.clone();
        Ok(())
    }
}

/// CBOR file store. A missing file loads as an empty set.
#[derive(Debug, Clone)]
pub struct FileDeviceStore {
    path: PathBuf,
}

impl FileDeviceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeviceStore for FileDeviceStore {
    fn load(&self) -> Result<PersistedDeviceSet, PersistenceError> {
        if !self.path.exists() {
            return Ok(PersistedDeviceSet::default());
        }
        let bytes = fs::read(&self.path).map_err(PersistenceError::Read)?;
        decode_devices_cbor(&bytes)
    }

    fn save(&self, devices: &PersistedDeviceSet) -> Result<(), PersistenceError> {
        let bytes = encode_devices_cbor(devices)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(PersistenceError::Write)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(PersistenceError::Write)?;
        fs::rename(&tmp, &self.path).map_err(PersistenceError::Write)
    }
}

pub fn encode_devices_cbor(devices: &PersistedDeviceSet) -> Result<Vec<u8>, PersistenceError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(devices, &mut out)
        .map_err(|err| PersistenceError::Encode(err.to_string()))?;
    Ok(out)
}

pub fn decode_devices_cbor(bytes: &[u8]) -> Result<PersistedDeviceSet, PersistenceError> {
    ciborium::de::from_reader(bytes).map_err(|err| PersistenceError::Decode(err.to_string()))
}
