//! Host functions offered to method modules during introspection
//!
//! The surface is deliberately tiny: a guest may log and may report failure.
//! There is no WASI, so a guest cannot reach files, sockets, clocks or the
//! environment while it is being described.

use wasmer::{Function, FunctionEnv, FunctionEnvMut, Imports, Memory, Store};

use super::abi::{log_levels, read_message, IMPORT_FAIL, IMPORT_LOG, IMPORT_MODULE};

/// Per-load state shared between host functions and the loader
pub struct GuestEnv {
    /// Guest memory (set after instantiation)
    pub memory: Option<Memory>,

    /// Short label identifying the artifact in log output
    pub label: String,

    /// Failure reported through `method_fail`, first report wins
    pub failure: Option<String>,
}

impl GuestEnv {
    pub fn new(label: String) -> Self {
        Self {
            memory: None,
            label,
            failure: None,
        }
    }

    pub fn set_memory(&mut self, memory: Memory) {
        self.memory = Some(memory);
    }
}

/// Create the imports object for a method module
pub fn create_imports(store: &mut Store, env: &FunctionEnv<GuestEnv>) -> Imports {
    let mut imports = Imports::new();

    imports.define(
        IMPORT_MODULE,
        IMPORT_LOG,
        Function::new_typed_with_env(store, env, method_log),
    );
    imports.define(
        IMPORT_MODULE,
        IMPORT_FAIL,
        Function::new_typed_with_env(store, env, method_fail),
    );

    imports
}

fn method_log(mut env: FunctionEnvMut<GuestEnv>, level: i32, ptr: u32, len: u32) {
    let (data, store) = env.data_and_store_mut();
    let Some(memory) = data.memory.as_ref() else {
        return;
    };
    let Some(message) = read_message(memory, &store, ptr, len) else {
        return;
    };
    let artifact = data.label.as_str();
    match level {
        log_levels::ERROR => tracing::error!(target: "methodhub::guest", artifact, "{}", message),
        log_levels::WARN => tracing::warn!(target: "methodhub::guest", artifact, "{}", message),
        log_levels::INFO => tracing::info!(target: "methodhub::guest", artifact, "{}", message),
        log_levels::DEBUG => tracing::debug!(target: "methodhub::guest", artifact, "{}", message),
        _ => tracing::trace!(target: "methodhub::guest", artifact, "{}", message),
    }
}

fn method_fail(mut env: FunctionEnvMut<GuestEnv>, ptr: u32, len: u32) {
    let (data, store) = env.data_and_store_mut();
    let message = data
        .memory
        .as_ref()
        .and_then(|memory| read_message(memory, &store, ptr, len))
        .unwrap_or_else(|| "unreadable failure message".to_string());
    if data.failure.is_none() {
        data.failure = Some(message);
    }
}
