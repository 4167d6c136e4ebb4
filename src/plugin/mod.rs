//! Sandboxed method loader
//!
//! Uploaded methods are WebAssembly modules. Loading one means compiling it in
//! a fresh Wasmer engine, instantiating it with a minimal set of host imports
//! and asking it to describe itself through a fixed introspection protocol.
//! The resulting declaration is checked for shape errors before a
//! [`MethodDescriptor`](crate::descriptor::MethodDescriptor) is produced.
//!
//! # Introspection Protocol
//!
//! ```text
//! exports (required)
//!   memory                         linear memory holding the declaration
//!   method_describe() -> i64       (ptr << 32) | len of a UTF-8 JSON document
//!
//! exports (optional)
//!   method_abi_version() -> i32    must equal ABI_VERSION when present
//!   method_init()                  called once before method_describe
//!
//! imports (module "env", all optional)
//!   method_log(level, ptr, len)    forward a message to the host log
//!   method_fail(ptr, len)          report that introspection failed
//! ```
//!
//! Each load runs on its own worker thread with its own engine, store and
//! host environment, under an instruction budget and a wall-clock deadline.
//! Nothing survives a load except the extracted descriptor.

mod abi;
mod declaration;
mod imports;
mod loader;

pub use abi::ABI_VERSION;
pub use declaration::{DeclaredMethod, DeclaredPort};
pub use loader::{CancelToken, LoadLimits, PluginLoader};

/// Error types for the plugin loader
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoaderError {
    #[error("WASM compilation error: {0}")]
    Compilation(String),

    #[error("WASM instantiation error: {0}")]
    Instantiation(String),

    #[error("Missing introspection export: {0}")]
    MissingEntryPoint(String),

    #[error("Unsupported ABI version {found} (host speaks {expected})")]
    AbiMismatch { expected: i32, found: i32 },

    #[error("Introspection failed: {0}")]
    Introspection(String),

    #[error("Malformed declaration: {0}")]
    MalformedDeclaration(String),

    #[error("Invalid method shape: {0}")]
    InvalidShape(String),

    #[error("Instruction budget of {budget} exhausted during introspection")]
    BudgetExhausted { budget: u64 },

    #[error("Introspection did not finish within {0} ms")]
    Timeout(u128),

    #[error("Load cancelled")]
    Cancelled,
}
