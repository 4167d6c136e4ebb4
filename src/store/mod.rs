//! Durable storage for artifacts and descriptor records
//!
//! Two independent stores back the registry:
//!
//! - **Artifact store:** content-addressed bytes of uploaded method modules.
//!   A reference is the SHA-256 of the content, so stored bytes never change
//!   under a reference.
//! - **Record store:** one JSON record per registered method, keyed by
//!   identity.
//!
//! Both come in a filesystem flavour (writes go through a temp file that is
//! renamed into place) and an in-memory flavour.
//!
//! # Directory Layout
//!
//! ```text
//! <data_dir>/
//! ├── artifacts/
//! │   └── 3f9a…e1.wasm        # <sha256>.wasm
//! └── methods/
//!     └── 8c21…4d.json        # <sha256(method id)>.json
//! ```

mod artifact;
mod records;

use std::io::Write;
use std::path::Path;

pub use artifact::{ArtifactRef, ArtifactStore, FsArtifactStore, MemoryArtifactStore};
pub use records::{FsRecordStore, MemoryRecordStore, MethodRecord, RecordStore};

/// Error types for the storage layer
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(ArtifactRef),

    #[error("Corrupt record {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Write `bytes` to `path` so readers see either the old file or the full new one
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let dir = path
        .parent()
        .ok_or_else(|| StorageError::Unavailable(format!("{} has no parent", path.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;
    Ok(())
}

/// Hex SHA-256 of arbitrary bytes
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(bytes))
}
