//! Method service - main coordinator for uploads, queries and validation
//!
//! The service ties the loader, the registry and the validator together and
//! is the single entry point a transport layer talks to. Every operation
//! returns a typed [`ServiceError`] instead of panicking or swallowing
//! failures.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::descriptor::{DynamicParam, MethodDescriptor, MethodId, MethodStatus, Port};
use crate::error::ServiceError;
use crate::plugin::{CancelToken, PluginLoader};
use crate::registry::MethodRegistry;
use crate::store::{
    ArtifactRef, ArtifactStore, FsArtifactStore, FsRecordStore, MemoryArtifactStore,
    MemoryRecordStore, RecordStore, StorageError,
};
use crate::validator::{self, PortConfigMapping, ValidationResult};

/// Outcome of importing one file during [`MethodService::populate`]
#[derive(Debug)]
pub enum PopulateOutcome {
    Registered(MethodId),
    AlreadyRegistered(MethodId),
    Failed(ServiceError),
}

/// The method service manages all method operations
pub struct MethodService {
    loader: PluginLoader,
    registry: MethodRegistry,
    max_artifact_bytes: usize,
}

impl MethodService {
    pub fn new(loader: PluginLoader, registry: MethodRegistry, max_artifact_bytes: usize) -> Self {
        Self {
            loader,
            registry,
            max_artifact_bytes,
        }
    }

    /// Open a service over the on-disk stores named by `config`
    pub fn open(config: &Config) -> Result<Self, ServiceError> {
        let artifacts: Arc<dyn ArtifactStore> =
            Arc::new(FsArtifactStore::open(config.artifacts_dir())?);
        let records: Arc<dyn RecordStore> = Arc::new(FsRecordStore::open(config.methods_dir())?);
        let registry = MethodRegistry::open(records, artifacts)?;
        Ok(Self::new(
            PluginLoader::new(config.load_limits()),
            registry,
            config.max_artifact_bytes,
        ))
    }

    /// A service backed entirely by memory
    pub fn in_memory(config: &Config) -> Result<Self, ServiceError> {
        let registry = MethodRegistry::open(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryArtifactStore::new()),
        )?;
        Ok(Self::new(
            PluginLoader::new(config.load_limits()),
            registry,
            config.max_artifact_bytes,
        ))
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    // === Upload / update / delete ===

    /// Load, store and register a new method
    pub fn upload(&self, bytes: &[u8]) -> Result<Arc<MethodDescriptor>, ServiceError> {
        self.upload_with_cancel(bytes, &CancelToken::new())
    }

    pub fn upload_with_cancel(
        &self,
        bytes: &[u8],
        cancel: &CancelToken,
    ) -> Result<Arc<MethodDescriptor>, ServiceError> {
        self.check_upload(bytes)?;
        let descriptor = self.loader.load_with_cancel(bytes, cancel)?;
        Ok(self.registry.install(descriptor, bytes)?)
    }

    /// Replace an existing method with a new artifact declaring the same identity.
    ///
    /// The method keeps its status: updating an INACTIVE method does not
    /// reactivate it.
    pub fn update(&self, id: &MethodId, bytes: &[u8]) -> Result<Arc<MethodDescriptor>, ServiceError> {
        self.update_with_cancel(id, bytes, &CancelToken::new())
    }

    pub fn update_with_cancel(
        &self,
        id: &MethodId,
        bytes: &[u8],
        cancel: &CancelToken,
    ) -> Result<Arc<MethodDescriptor>, ServiceError> {
        if !self.registry.contains(id) {
            return Err(ServiceError::NotFound(id.clone()));
        }
        self.check_upload(bytes)?;
        let descriptor = self.loader.load_with_cancel(bytes, cancel)?;
        if descriptor.id != *id {
            return Err(ServiceError::IdentityMismatch {
                expected: id.clone(),
                found: descriptor.id,
            });
        }
        Ok(self.registry.upgrade(id, descriptor, bytes)?)
    }

    /// Remove a method together with its artifact
    pub fn delete(&self, id: &MethodId) -> Result<(), ServiceError> {
        Ok(self.registry.delete(id)?)
    }

    pub fn set_status(&self, id: &MethodId, status: MethodStatus) -> Result<(), ServiceError> {
        Ok(self.registry.set_status(id, status)?)
    }

    // === Queries ===

    pub fn get(&self, id: &MethodId) -> Result<Arc<MethodDescriptor>, ServiceError> {
        Ok(self.registry.get(id)?)
    }

    pub fn list(&self) -> Vec<Arc<MethodDescriptor>> {
        self.registry.list()
    }

    pub fn input_ports(&self, id: &MethodId) -> Result<Vec<Port>, ServiceError> {
        Ok(self.get(id)?.inputs.clone())
    }

    pub fn output_ports(&self, id: &MethodId) -> Result<Vec<Port>, ServiceError> {
        Ok(self.get(id)?.outputs.clone())
    }

    pub fn dynamic_params(&self, id: &MethodId) -> Result<Vec<DynamicParam>, ServiceError> {
        Ok(self.get(id)?.params.clone())
    }

    /// The stored bytes of a method's artifact
    pub fn artifact(&self, id: &MethodId) -> Result<Vec<u8>, ServiceError> {
        let descriptor = self.get(id)?;
        Ok(self.registry.artifacts().get(&descriptor.artifact)?)
    }

    /// Validate a port configuration against the method's current descriptor.
    ///
    /// Only an unknown identity is an error; mismatches are findings.
    pub fn validate(
        &self,
        id: &MethodId,
        mapping: &PortConfigMapping,
    ) -> Result<ValidationResult, ServiceError> {
        let descriptor = self.get(id)?;
        Ok(validator::validate(&descriptor, mapping))
    }

    // === Bulk import / maintenance ===

    /// Upload every `*.wasm` file in `dir`, in file name order.
    ///
    /// Files whose method is already registered, active or not, are skipped;
    /// a failing file is reported and does not stop the scan.
    pub fn populate(&self, dir: &Path) -> Result<Vec<(PathBuf, PopulateOutcome)>, ServiceError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(StorageError::from)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == "wasm"))
            .collect();
        paths.sort();

        let mut outcomes = Vec::new();
        for path in paths {
            let outcome = match std::fs::read(&path) {
                Ok(bytes) => self.populate_one(&bytes),
                Err(e) => PopulateOutcome::Failed(StorageError::from(e).into()),
            };
            match &outcome {
                PopulateOutcome::Registered(id) => {
                    info!(method = %id, path = %path.display(), "imported method")
                }
                PopulateOutcome::AlreadyRegistered(id) => {
                    info!(method = %id, path = %path.display(), "method already registered")
                }
                PopulateOutcome::Failed(e) => {
                    warn!(path = %path.display(), error = %e, "failed to import method")
                }
            }
            outcomes.push((path, outcome));
        }
        Ok(outcomes)
    }

    fn populate_one(&self, bytes: &[u8]) -> PopulateOutcome {
        let installed = self
            .check_upload(bytes)
            .and_then(|()| Ok(self.loader.load(bytes)?))
            .and_then(|descriptor| Ok(self.registry.install_absent(descriptor, bytes)?));
        match installed {
            Ok(descriptor) => PopulateOutcome::Registered(descriptor.id.clone()),
            Err(ServiceError::DuplicateIdentity(id)) => PopulateOutcome::AlreadyRegistered(id),
            Err(e) => PopulateOutcome::Failed(e),
        }
    }

    /// Remove stored artifacts no method references
    pub fn collect_garbage(&self) -> Result<Vec<ArtifactRef>, ServiceError> {
        Ok(self.registry.collect_garbage()?)
    }

    fn check_upload(&self, bytes: &[u8]) -> Result<(), ServiceError> {
        if bytes.is_empty() {
            return Err(ServiceError::MalformedUpload("artifact is empty".to_string()));
        }
        if bytes.len() > self.max_artifact_bytes {
            return Err(ServiceError::MalformedUpload(format!(
                "artifact of {} bytes exceeds the {} byte limit",
                bytes.len(),
                self.max_artifact_bytes
            )));
        }
        Ok(())
    }
}
