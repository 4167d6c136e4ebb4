//! Content-addressed artifact storage

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{sha256_hex, write_atomic, StorageError};

/// Opaque handle to stored artifact bytes (hex SHA-256 of the content)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    /// The reference under which `bytes` are (or would be) stored
    pub fn for_bytes(bytes: &[u8]) -> Self {
        ArtifactRef(sha256_hex(bytes))
    }

    /// Rebuild a reference from its string form, rejecting anything that is
    /// not a 64-digit lowercase hex digest.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == 64
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| ArtifactRef(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage of immutable artifact bytes
pub trait ArtifactStore: Send + Sync {
    /// Store bytes and return their reference; storing existing content is a no-op
    fn put(&self, bytes: &[u8]) -> Result<ArtifactRef, StorageError>;

    fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, StorageError>;

    /// Remove stored bytes; removing an absent reference succeeds
    fn delete(&self, artifact: &ArtifactRef) -> Result<(), StorageError>;

    fn contains(&self, artifact: &ArtifactRef) -> Result<bool, StorageError>;

    /// All stored references, in no particular order
    fn list(&self) -> Result<Vec<ArtifactRef>, StorageError>;
}

/// Artifacts as `<root>/<sha256>.wasm` files
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, artifact: &ArtifactRef) -> PathBuf {
        self.root.join(format!("{}.wasm", artifact.as_str()))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, bytes: &[u8]) -> Result<ArtifactRef, StorageError> {
        let artifact = ArtifactRef::for_bytes(bytes);
        let path = self.path_for(&artifact);
        if path.exists() {
            debug!(artifact = %artifact, "artifact already stored");
            return Ok(artifact);
        }
        write_atomic(&path, bytes)?;
        debug!(artifact = %artifact, size = bytes.len(), "stored artifact");
        Ok(artifact)
    }

    fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, StorageError> {
        match std::fs::read(self.path_for(artifact)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::ArtifactNotFound(artifact.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, artifact: &ArtifactRef) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(artifact)) {
            Ok(()) => {
                debug!(artifact = %artifact, "deleted artifact");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, artifact: &ArtifactRef) -> Result<bool, StorageError> {
        Ok(self.path_for(artifact).is_file())
    }

    fn list(&self) -> Result<Vec<ArtifactRef>, StorageError> {
        let mut refs = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "wasm") {
                if let Some(artifact) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(ArtifactRef::parse)
                {
                    refs.push(artifact);
                }
            }
        }
        Ok(refs)
    }
}

/// Artifacts held in process memory
#[derive(Default)]
pub struct MemoryArtifactStore {
    blobs: RwLock<HashMap<ArtifactRef, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, bytes: &[u8]) -> Result<ArtifactRef, StorageError> {
        let artifact = ArtifactRef::for_bytes(bytes);
        self.blobs
            .write()
            .entry(artifact.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(artifact)
    }

    fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, StorageError> {
        self.blobs
            .read()
            .get(artifact)
            .cloned()
            .ok_or_else(|| StorageError::ArtifactNotFound(artifact.clone()))
    }

    fn delete(&self, artifact: &ArtifactRef) -> Result<(), StorageError> {
        self.blobs.write().remove(artifact);
        Ok(())
    }

    fn contains(&self, artifact: &ArtifactRef) -> Result<bool, StorageError> {
        Ok(self.blobs.read().contains_key(artifact))
    }

    fn list(&self) -> Result<Vec<ArtifactRef>, StorageError> {
        Ok(self.blobs.read().keys().cloned().collect())
    }
}
