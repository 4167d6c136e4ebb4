//! Service-level error taxonomy
//!
//! Each layer reports its own typed error; [`ServiceError`] gathers them at
//! the facade and [`ErrorKind`] gives a transport one coarse class per error
//! so it can map each to a distinct status.

use crate::descriptor::MethodId;
use crate::plugin::LoaderError;
use crate::registry::RegistryError;
use crate::store::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Malformed upload: {0}")]
    MalformedUpload(String),

    #[error("Artifact rejected: {0}")]
    Loader(#[from] LoaderError),

    #[error("Method '{0}' is already registered")]
    DuplicateIdentity(MethodId),

    #[error("Method not found: {0}")]
    NotFound(MethodId),

    #[error("Artifact declares method '{found}' but '{expected}' was being updated")]
    IdentityMismatch { expected: MethodId, found: MethodId },

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl From<RegistryError> for ServiceError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::DuplicateIdentity(id) => ServiceError::DuplicateIdentity(id),
            RegistryError::NotFound(id) => ServiceError::NotFound(id),
            RegistryError::IdentityMismatch { expected, found } => {
                ServiceError::IdentityMismatch { expected, found }
            }
            RegistryError::Storage(e) => ServiceError::Storage(e),
        }
    }
}

/// Coarse classification of a [`ServiceError`] for the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is unusable
    BadRequest,
    /// The artifact was read but rejected by the loader
    Unprocessable,
    /// The referenced method does not exist
    NotFound,
    /// The request collides with existing state
    Conflict,
    /// Infrastructure failure, not the caller's fault
    Internal,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::MalformedUpload(_) => ErrorKind::BadRequest,
            ServiceError::Loader(_) => ErrorKind::Unprocessable,
            ServiceError::IdentityMismatch { .. } => ErrorKind::BadRequest,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::DuplicateIdentity(_) => ErrorKind::Conflict,
            ServiceError::Storage(_) => ErrorKind::Internal,
        }
    }
}
