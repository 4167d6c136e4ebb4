//! methodhub - registry and gatekeeper for pluggable analytics methods
//!
//! # Overview
//!
//! An analytics method is an externally authored WebAssembly module that
//! declares a typed data-contract: the columns it reads (input ports), the
//! columns it produces (output ports) and the configuration values it accepts
//! (dynamic parameters). methodhub loads such modules in a sandbox, extracts
//! that contract, keeps it in a durable registry and checks user-supplied
//! port configurations against it before anything is allowed to run.
//!
//! # Components
//!
//! ```text
//! upload ──► PluginLoader ──► MethodRegistry ──► ArtifactStore
//!            (sandboxed        (descriptor        (content-addressed
//!             introspection)    records)           bytes)
//!
//! validate ──► MethodRegistry::get ──► validator::validate ──► ValidationResult
//! ```
//!
//! # Example
//!
//! ```no_run
//! use methodhub::{Config, MethodService, PortConfigMapping};
//!
//! let service = MethodService::open(&Config::default()).unwrap();
//! let bytes = std::fs::read("kmeans.wasm").unwrap();
//! let descriptor = service.upload(&bytes).unwrap();
//!
//! let mapping: PortConfigMapping =
//!     serde_json::from_str(r#"{"features": [{"type": "numeric", "source": "scores.total"}]}"#).unwrap();
//! let result = service.validate(&descriptor.id, &mapping).unwrap();
//! println!("valid: {}", result.valid);
//! ```

pub mod config;
pub mod descriptor;
pub mod error;
pub mod plugin;
pub mod registry;
pub mod service;
pub mod store;
pub mod validator;

// Re-export commonly used items
pub use config::Config;
pub use descriptor::{
    Cardinality, DataType, DynamicParam, MethodDescriptor, MethodId, MethodStatus, ParamType, Port,
};
pub use error::{ErrorKind, ServiceError};
pub use plugin::{CancelToken, LoadLimits, LoaderError, PluginLoader};
pub use registry::{MethodRegistry, RegistryError};
pub use service::{MethodService, PopulateOutcome};
pub use store::{ArtifactRef, ArtifactStore, StorageError};
pub use validator::{
    validate, ColumnDescriptor, Finding, FindingKind, PortConfigMapping, ValidationResult,
};
