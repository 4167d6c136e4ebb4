//! Method registry with durable records and per-identity serialization
//!
//! The registry exclusively owns the identity → descriptor mapping. Every
//! mutation writes the durable record first and only then swaps the in-memory
//! entry, so a failed write leaves the previous state visible and intact.
//! Readers receive `Arc` snapshots: a descriptor handed out by [`get`] stays
//! valid even if the method is replaced or deleted a moment later.
//!
//! Mutations of the same identity are serialized through a per-identity lock;
//! mutations of different identities only contend on the short index swap.
//!
//! [`get`]: MethodRegistry::get

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex, RwLock};
use tracing::{debug, info, warn};

use crate::descriptor::{MethodDescriptor, MethodId, MethodStatus};
use crate::store::{ArtifactRef, ArtifactStore, MethodRecord, RecordStore, StorageError};

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Method '{0}' is already registered")]
    DuplicateIdentity(MethodId),

    #[error("Method not found: {0}")]
    NotFound(MethodId),

    #[error("Descriptor for '{found}' cannot replace method '{expected}'")]
    IdentityMismatch { expected: MethodId, found: MethodId },

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
}

/// An entry in the registry index
#[derive(Clone)]
struct Entry {
    seq: u64,
    descriptor: Arc<MethodDescriptor>,
}

/// Registry of method descriptors backed by a record store and an artifact store
pub struct MethodRegistry {
    /// Method id -> entry, in registration order
    index: RwLock<IndexMap<MethodId, Entry>>,

    /// Per-identity mutation locks
    locks: Mutex<HashMap<MethodId, Arc<Mutex<()>>>>,

    /// Held shared by artifact writers, exclusively by garbage collection
    gc_gate: RwLock<()>,

    /// Artifacts stored by an install or upgrade that has not committed yet
    pinned: Mutex<HashMap<ArtifactRef, usize>>,

    next_seq: AtomicU64,

    records: Arc<dyn RecordStore>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl MethodRegistry {
    /// Open a registry, rebuilding the index from the record store
    pub fn open(
        records: Arc<dyn RecordStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Result<Self, StorageError> {
        let mut index = IndexMap::new();
        let mut max_seq = 0;
        for record in records.load_all()? {
            max_seq = max_seq.max(record.seq);
            if !artifacts.contains(&record.descriptor.artifact)? {
                warn!(
                    method = %record.descriptor.id,
                    artifact = %record.descriptor.artifact,
                    "record references a missing artifact"
                );
            }
            index.insert(
                record.descriptor.id.clone(),
                Entry {
                    seq: record.seq,
                    descriptor: Arc::new(record.descriptor),
                },
            );
        }
        info!(methods = index.len(), "opened method registry");

        Ok(Self {
            index: RwLock::new(index),
            locks: Mutex::new(HashMap::new()),
            gc_gate: RwLock::new(()),
            pinned: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(max_seq + 1),
            records,
            artifacts,
        })
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    // === Queries ===

    /// Snapshot of the current descriptor for `id`
    pub fn get(&self, id: &MethodId) -> Result<Arc<MethodDescriptor>, RegistryError> {
        self.index
            .read()
            .get(id)
            .map(|entry| Arc::clone(&entry.descriptor))
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// All descriptors in registration order
    pub fn list(&self) -> Vec<Arc<MethodDescriptor>> {
        self.index
            .read()
            .values()
            .map(|entry| Arc::clone(&entry.descriptor))
            .collect()
    }

    pub fn contains(&self, id: &MethodId) -> bool {
        self.index.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Every artifact referenced by a registered method
    pub fn referenced_artifacts(&self) -> HashSet<ArtifactRef> {
        self.index
            .read()
            .values()
            .map(|entry| entry.descriptor.artifact.clone())
            .collect()
    }

    // === Mutations over already stored artifacts ===

    /// Register a descriptor whose artifact is already in the artifact store
    pub fn register(
        &self,
        descriptor: MethodDescriptor,
        artifact: ArtifactRef,
    ) -> Result<MethodId, RegistryError> {
        let _gate = self.gc_gate.read();
        let _guard = self.lock_identity(&descriptor.id);
        self.ensure_stored(&artifact)?;
        self.register_locked(descriptor, artifact, Reregister::ReplaceInactive)
            .map(|stored| stored.id.clone())
    }

    /// Atomically replace the descriptor and artifact of an existing method
    pub fn replace(
        &self,
        id: &MethodId,
        descriptor: MethodDescriptor,
        artifact: ArtifactRef,
    ) -> Result<(), RegistryError> {
        let _gate = self.gc_gate.read();
        let _guard = self.lock_identity(id);
        self.ensure_stored(&artifact)?;
        self.replace_locked(id, descriptor, artifact).map(|_| ())
    }

    // === Mutations that also store the artifact ===

    /// Store `bytes` and register `descriptor` as one step.
    ///
    /// An INACTIVE method of the same identity is replaced. If registration
    /// fails the freshly stored artifact is removed again, unless some other
    /// record already referenced the same content.
    pub fn install(
        &self,
        descriptor: MethodDescriptor,
        bytes: &[u8],
    ) -> Result<Arc<MethodDescriptor>, RegistryError> {
        self.install_with(descriptor, bytes, Reregister::ReplaceInactive)
    }

    /// Like [`install`](Self::install), but any existing method of the same
    /// identity, active or not, is a `DuplicateIdentity`
    pub fn install_absent(
        &self,
        descriptor: MethodDescriptor,
        bytes: &[u8],
    ) -> Result<Arc<MethodDescriptor>, RegistryError> {
        self.install_with(descriptor, bytes, Reregister::Never)
    }

    fn install_with(
        &self,
        descriptor: MethodDescriptor,
        bytes: &[u8],
        policy: Reregister,
    ) -> Result<Arc<MethodDescriptor>, RegistryError> {
        let _gate = self.gc_gate.read();
        let _guard = self.lock_identity(&descriptor.id);

        if let Some(existing) = self.index.read().get(&descriptor.id) {
            if !policy.allows(&existing.descriptor) {
                return Err(RegistryError::DuplicateIdentity(descriptor.id.clone()));
            }
        }

        let pin = self.pin(ArtifactRef::for_bytes(bytes));
        let artifact = self.artifacts.put(bytes)?;
        let result = self.register_locked(descriptor, artifact.clone(), policy);
        drop(pin);
        result.map_err(|e| {
            self.release_artifact(&artifact);
            e
        })
    }

    /// Store `bytes` and replace the method `id` with `descriptor` as one step.
    ///
    /// The method keeps its current status; an INACTIVE method stays
    /// INACTIVE after an upgrade.
    pub fn upgrade(
        &self,
        id: &MethodId,
        descriptor: MethodDescriptor,
        bytes: &[u8],
    ) -> Result<Arc<MethodDescriptor>, RegistryError> {
        let _gate = self.gc_gate.read();
        let _guard = self.lock_identity(id);

        if !self.contains(id) {
            return Err(RegistryError::NotFound(id.clone()));
        }

        let pin = self.pin(ArtifactRef::for_bytes(bytes));
        let artifact = self.artifacts.put(bytes)?;
        let result = self.replace_locked(id, descriptor, artifact.clone());
        drop(pin);
        result.map_err(|e| {
            self.release_artifact(&artifact);
            e
        })
    }

    /// Remove a method and release its artifact
    pub fn delete(&self, id: &MethodId) -> Result<(), RegistryError> {
        let _guard = self.lock_identity(id);

        let old = self
            .index
            .read()
            .get(id)
            .map(|entry| Arc::clone(&entry.descriptor))
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;

        self.records.remove(id)?;
        self.index.write().shift_remove(id);
        info!(method = %id, "deleted method");

        self.release_artifact(&old.artifact);
        Ok(())
    }

    /// Activate or deactivate a method
    pub fn set_status(&self, id: &MethodId, status: MethodStatus) -> Result<(), RegistryError> {
        let _guard = self.lock_identity(id);

        let entry = self
            .index
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        if entry.descriptor.status == status {
            return Ok(());
        }

        let updated = entry.descriptor.with_status(status);
        self.records.save(&MethodRecord {
            seq: entry.seq,
            descriptor: updated.clone(),
        })?;
        self.index.write().insert(
            id.clone(),
            Entry {
                seq: entry.seq,
                descriptor: Arc::new(updated),
            },
        );
        info!(method = %id, ?status, "changed method status");
        Ok(())
    }

    /// Delete stored artifacts that no registered method references.
    ///
    /// Returns the removed references.
    pub fn collect_garbage(&self) -> Result<Vec<ArtifactRef>, RegistryError> {
        let _gate = self.gc_gate.write();
        let referenced = self.referenced_artifacts();
        let mut removed = Vec::new();
        for artifact in self.artifacts.list()? {
            if !referenced.contains(&artifact) {
                self.artifacts.delete(&artifact)?;
                removed.push(artifact);
            }
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "collected unreferenced artifacts");
        }
        Ok(removed)
    }

    // === Internals (caller holds the identity lock) ===

    fn register_locked(
        &self,
        mut descriptor: MethodDescriptor,
        artifact: ArtifactRef,
        policy: Reregister,
    ) -> Result<Arc<MethodDescriptor>, RegistryError> {
        let id = descriptor.id.clone();
        let previous = self.index.read().get(&id).cloned();
        if let Some(existing) = &previous {
            if !policy.allows(&existing.descriptor) {
                return Err(RegistryError::DuplicateIdentity(id));
            }
        }

        descriptor.artifact = artifact;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let record = MethodRecord { seq, descriptor };
        self.records.save(&record)?;

        let stored = Arc::new(record.descriptor);
        {
            let mut index = self.index.write();
            // A re-registered inactive method moves to the end of the listing
            index.shift_remove(&id);
            index.insert(
                id.clone(),
                Entry {
                    seq,
                    descriptor: Arc::clone(&stored),
                },
            );
        }
        info!(method = %id, artifact = %stored.artifact, "registered method");

        if let Some(old) = previous {
            if old.descriptor.artifact != stored.artifact {
                self.release_artifact(&old.descriptor.artifact);
            }
        }
        Ok(stored)
    }

    fn replace_locked(
        &self,
        id: &MethodId,
        mut descriptor: MethodDescriptor,
        artifact: ArtifactRef,
    ) -> Result<Arc<MethodDescriptor>, RegistryError> {
        if descriptor.id != *id {
            return Err(RegistryError::IdentityMismatch {
                expected: id.clone(),
                found: descriptor.id,
            });
        }
        let old = self
            .index
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;

        descriptor.artifact = artifact;
        // Activation is an operator decision, not part of the artifact
        descriptor.status = old.descriptor.status;
        let record = MethodRecord {
            seq: old.seq,
            descriptor,
        };
        self.records.save(&record)?;

        let stored = Arc::new(record.descriptor);
        // Inserting over an existing key keeps its position
        self.index.write().insert(
            id.clone(),
            Entry {
                seq: old.seq,
                descriptor: Arc::clone(&stored),
            },
        );
        info!(method = %id, artifact = %stored.artifact, "replaced method");

        if old.descriptor.artifact != stored.artifact {
            self.release_artifact(&old.descriptor.artifact);
        }
        Ok(stored)
    }

    fn ensure_stored(&self, artifact: &ArtifactRef) -> Result<(), RegistryError> {
        if self.artifacts.contains(artifact)? {
            Ok(())
        } else {
            Err(StorageError::ArtifactNotFound(artifact.clone()).into())
        }
    }

    /// Delete an artifact unless a registered method still points at it.
    ///
    /// Failures are logged, the artifact is left for [`collect_garbage`].
    ///
    /// [`collect_garbage`]: MethodRegistry::collect_garbage
    fn release_artifact(&self, artifact: &ArtifactRef) {
        // Held through the delete so a concurrent install cannot pin in between
        let pinned = self.pinned.lock();
        let in_use = pinned.contains_key(artifact)
            || self
                .index
                .read()
                .values()
                .any(|entry| entry.descriptor.artifact == *artifact);
        if in_use {
            debug!(artifact = %artifact, "artifact still referenced, keeping");
            return;
        }
        if let Err(e) = self.artifacts.delete(artifact) {
            warn!(artifact = %artifact, error = %e, "failed to release artifact");
        }
    }

    fn pin(&self, artifact: ArtifactRef) -> PinGuard<'_> {
        *self.pinned.lock().entry(artifact.clone()).or_insert(0) += 1;
        PinGuard {
            pinned: &self.pinned,
            artifact,
        }
    }

    /// Serialize mutations of `id` until the returned guard is dropped
    fn lock_identity(&self, id: &MethodId) -> IdentityGuard<'_> {
        let lock = Arc::clone(self.locks.lock().entry(id.clone()).or_default());
        IdentityGuard {
            locks: &self.locks,
            id: id.clone(),
            guard: Some(lock.lock_arc()),
        }
    }
}

/// Which existing entry a new registration may take the place of
#[derive(Clone, Copy)]
enum Reregister {
    /// An INACTIVE method is replaced, an ACTIVE one is a duplicate
    ReplaceInactive,
    /// Any existing method is a duplicate
    Never,
}

impl Reregister {
    fn allows(self, existing: &MethodDescriptor) -> bool {
        match self {
            Reregister::ReplaceInactive => !existing.is_active(),
            Reregister::Never => false,
        }
    }
}

/// Holds a per-identity lock; the map entry goes away with its last user
struct IdentityGuard<'a> {
    locks: &'a Mutex<HashMap<MethodId, Arc<Mutex<()>>>>,
    id: MethodId,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        // Unlock and release our handle before counting the rest
        drop(self.guard.take());
        if locks
            .get(&self.id)
            .map_or(false, |lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

/// Keeps an artifact out of reach of `release_artifact` until dropped
struct PinGuard<'a> {
    pinned: &'a Mutex<HashMap<ArtifactRef, usize>>,
    artifact: ArtifactRef,
}

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        let mut pinned = self.pinned.lock();
        if let Some(count) = pinned.get_mut(&self.artifact) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&self.artifact);
            }
        }
    }
}
