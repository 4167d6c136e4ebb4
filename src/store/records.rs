//! Durable descriptor records, one per method identity

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{sha256_hex, write_atomic, StorageError};
use crate::descriptor::{MethodDescriptor, MethodId};

/// The persisted form of a registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodRecord {
    /// Registration sequence number, preserves listing order across restarts
    pub seq: u64,
    pub descriptor: MethodDescriptor,
}

/// Durable keyed storage of method records
pub trait RecordStore: Send + Sync {
    /// Insert or overwrite the record for `record.descriptor.id`
    fn save(&self, record: &MethodRecord) -> Result<(), StorageError>;

    /// Remove the record for `id`; removing an absent record succeeds
    fn remove(&self, id: &MethodId) -> Result<(), StorageError>;

    /// Every stored record, sorted by sequence number
    fn load_all(&self) -> Result<Vec<MethodRecord>, StorageError>;
}

/// Records as `<root>/<sha256(id)>.json` files
pub struct FsRecordStore {
    root: PathBuf,
}

impl FsRecordStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &MethodId) -> PathBuf {
        // Identities are free-form; hash them into safe file names
        self.root.join(format!("{}.json", sha256_hex(id.as_str().as_bytes())))
    }
}

impl RecordStore for FsRecordStore {
    fn save(&self, record: &MethodRecord) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.path_for(&record.descriptor.id), &json)
    }

    fn remove(&self, id: &MethodId) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn load_all(&self) -> Result<Vec<MethodRecord>, StorageError> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.extension().map_or(false, |ext| ext == "json") {
                continue;
            }
            let raw = std::fs::read(&path)?;
            let record: MethodRecord =
                serde_json::from_slice(&raw).map_err(|e| StorageError::Corrupt {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            if path != self.path_for(&record.descriptor.id) {
                warn!(path = %path.display(), id = %record.descriptor.id, "record stored under unexpected name, skipping");
                continue;
            }
            records.push(record);
        }
        records.sort_by_key(|r| r.seq);
        Ok(records)
    }
}

/// Records held in process memory
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<MethodId, MethodRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn save(&self, record: &MethodRecord) -> Result<(), StorageError> {
        self.records
            .lock()
            .insert(record.descriptor.id.clone(), record.clone());
        Ok(())
    }

    fn remove(&self, id: &MethodId) -> Result<(), StorageError> {
        self.records.lock().remove(id);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<MethodRecord>, StorageError> {
        let mut records: Vec<MethodRecord> = self.records.lock().values().cloned().collect();
        records.sort_by_key(|r| r.seq);
        Ok(records)
    }
}
