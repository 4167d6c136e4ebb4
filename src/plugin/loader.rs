//! Isolated, bounded loading of method modules
//!
//! Every load gets a dedicated worker thread that owns a freshly built
//! engine, store and instance. The guest runs under an instruction budget
//! enforced by the metering middleware, so a runaway `method_describe` always
//! terminates. The calling thread waits for the worker with a wall-clock
//! deadline and a cancellation token; when either fires the caller gets an
//! error immediately and the worker's result is discarded when it finishes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use wasmer::sys::{CompilerConfig, EngineBuilder};
use wasmer::wasmparser::Operator;
use wasmer::{FunctionEnv, Instance, Module, RuntimeError, Store, TypedFunction, WasmTypeList};
use wasmer_compiler_cranelift::Cranelift;
use wasmer_middlewares::metering::{get_remaining_points, MeteringPoints};
use wasmer_middlewares::Metering;

use super::abi::{
    unpack_region, read_bytes, ABI_VERSION, EXPORT_ABI_VERSION, EXPORT_DESCRIBE, EXPORT_INIT,
    EXPORT_MEMORY, MAX_DECLARATION_LEN,
};
use super::declaration::DeclaredMethod;
use super::imports::{create_imports, GuestEnv};
use super::LoaderError;
use crate::descriptor::MethodDescriptor;
use crate::store::ArtifactRef;

/// How often the waiting caller re-checks its cancellation token
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Resource bounds applied to every load
#[derive(Debug, Clone)]
pub struct LoadLimits {
    /// Wall-clock bound on compilation plus introspection
    pub timeout: Duration,

    /// Instruction budget for guest code (one point per operator)
    pub fuel: u64,

    /// Introspection workers allowed to run at once, abandoned ones included
    pub max_workers: usize,
}

impl Default for LoadLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            fuel: 50_000_000,
            max_workers: 8,
        }
    }
}

/// Shared flag used to abandon an in-flight load
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Loader that turns artifact bytes into a validated descriptor.
///
/// Clones share one pool of worker slots.
#[derive(Debug, Clone, Default)]
pub struct PluginLoader {
    limits: LoadLimits,
    workers: Arc<AtomicUsize>,
}

impl PluginLoader {
    pub fn new(limits: LoadLimits) -> Self {
        Self {
            limits,
            workers: Arc::default(),
        }
    }

    pub fn limits(&self) -> &LoadLimits {
        &self.limits
    }

    /// Workers still running, including ones whose caller gave up
    pub fn active_workers(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }

    /// Load an artifact and extract its descriptor
    pub fn load(&self, bytes: &[u8]) -> Result<MethodDescriptor, LoaderError> {
        self.load_with_cancel(bytes, &CancelToken::new())
    }

    /// Load an artifact, giving up early if `cancel` fires
    pub fn load_with_cancel(
        &self,
        bytes: &[u8],
        cancel: &CancelToken,
    ) -> Result<MethodDescriptor, LoaderError> {
        if cancel.is_cancelled() {
            return Err(LoaderError::Cancelled);
        }

        let artifact = ArtifactRef::for_bytes(bytes);
        let label = artifact.as_str()[..12].to_string();
        let started = Instant::now();

        let deadline = started + self.limits.timeout;
        let slot = loop {
            if cancel.is_cancelled() {
                return Err(LoaderError::Cancelled);
            }
            if let Some(slot) = WorkerSlot::acquire(&self.workers, self.limits.max_workers) {
                break slot;
            }
            if Instant::now() >= deadline {
                warn!(artifact = %label, max_workers = self.limits.max_workers, "no introspection worker free");
                return Err(LoaderError::Timeout(self.limits.timeout.as_millis()));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let (tx, rx) = mpsc::channel();
        let owned = bytes.to_vec();
        let fuel = self.limits.fuel;
        let worker_label = label.clone();
        thread::Builder::new()
            .name(format!("introspect-{}", label))
            .spawn(move || {
                let _slot = slot;
                let result = introspect(&owned, &worker_label, fuel);
                // The caller may have stopped waiting; nothing to do then
                let _ = tx.send(result);
            })
            .map_err(|e| LoaderError::Introspection(format!("failed to start worker: {}", e)))?;

        let declared = loop {
            if cancel.is_cancelled() {
                warn!(artifact = %label, "load cancelled");
                return Err(LoaderError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(artifact = %label, timeout_ms = self.limits.timeout.as_millis() as u64, "load timed out");
                return Err(LoaderError::Timeout(self.limits.timeout.as_millis()));
            }
            match rx.recv_timeout((deadline - now).min(POLL_INTERVAL)) {
                Ok(result) => break result,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(LoaderError::Introspection(
                        "introspection worker terminated abnormally".to_string(),
                    ))
                }
            }
        };

        let declared = declared.map_err(|e| {
            debug!(artifact = %label, error = %e, "introspection rejected artifact");
            e
        })?;
        let descriptor = declared.into_descriptor(artifact)?;

        info!(
            method = %descriptor.id,
            artifact = %label,
            inputs = descriptor.inputs.len(),
            outputs = descriptor.outputs.len(),
            params = descriptor.params.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded method"
        );
        Ok(descriptor)
    }
}

/// A claim on one of the loader's worker slots, returned on drop
struct WorkerSlot(Arc<AtomicUsize>);

impl WorkerSlot {
    fn acquire(workers: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max.max(1)).then_some(n + 1)
            })
            .ok()
            .map(|_| WorkerSlot(Arc::clone(workers)))
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Compile, instantiate and describe a module inside a fresh engine.
///
/// Runs on the worker thread; everything created here is dropped on return.
fn introspect(bytes: &[u8], label: &str, fuel: u64) -> Result<DeclaredMethod, LoaderError> {
    // A metering middleware instance may only be attached to one module, so
    // each load builds its own compiler config and engine.
    let metering = Arc::new(Metering::new(fuel, |_: &Operator| -> u64 { 1 }));
    let mut compiler = Cranelift::default();
    compiler.push_middleware(metering);
    let mut store = Store::new(EngineBuilder::new(compiler));

    let module = Module::new(&store, bytes).map_err(|e| LoaderError::Compilation(e.to_string()))?;

    let env = FunctionEnv::new(&mut store, GuestEnv::new(label.to_string()));
    let imports = create_imports(&mut store, &env);
    let instance = Instance::new(&mut store, &module, &imports)
        .map_err(|e| LoaderError::Instantiation(e.to_string()))?;

    let memory = instance
        .exports
        .get_memory(EXPORT_MEMORY)
        .map_err(|e| LoaderError::MissingEntryPoint(format!("{}: {}", EXPORT_MEMORY, e)))?
        .clone();
    env.as_mut(&mut store).set_memory(memory.clone());

    if let Some(version) = optional_export::<(), i32>(&instance, &store, EXPORT_ABI_VERSION)? {
        let found = version
            .call(&mut store)
            .map_err(|e| call_failed(&mut store, &instance, fuel, EXPORT_ABI_VERSION, e))?;
        if found != ABI_VERSION {
            return Err(LoaderError::AbiMismatch {
                expected: ABI_VERSION,
                found,
            });
        }
    }

    if let Some(init) = optional_export::<(), ()>(&instance, &store, EXPORT_INIT)? {
        init.call(&mut store)
            .map_err(|e| call_failed(&mut store, &instance, fuel, EXPORT_INIT, e))?;
        reported_failure(&env, &store)?;
    }

    let describe: TypedFunction<(), i64> = instance
        .exports
        .get_typed_function(&store, EXPORT_DESCRIBE)
        .map_err(|e| LoaderError::MissingEntryPoint(format!("{}: {}", EXPORT_DESCRIBE, e)))?;
    let packed = describe
        .call(&mut store)
        .map_err(|e| call_failed(&mut store, &instance, fuel, EXPORT_DESCRIBE, e))?;
    reported_failure(&env, &store)?;

    let (ptr, len) = unpack_region(packed);
    if len > MAX_DECLARATION_LEN {
        return Err(LoaderError::MalformedDeclaration(format!(
            "declaration of {} bytes exceeds the {} byte limit",
            len, MAX_DECLARATION_LEN
        )));
    }
    let raw = read_bytes(&memory, &store, ptr, len, MAX_DECLARATION_LEN).ok_or_else(|| {
        LoaderError::MalformedDeclaration(format!(
            "declaration region {}+{} lies outside guest memory",
            ptr, len
        ))
    })?;

    DeclaredMethod::parse(&raw)
}

/// Look up an optional export, failing only if it exists with the wrong signature
fn optional_export<Args, Rets>(
    instance: &Instance,
    store: &Store,
    name: &str,
) -> Result<Option<TypedFunction<Args, Rets>>, LoaderError>
where
    Args: WasmTypeList,
    Rets: WasmTypeList,
{
    if instance.exports.get_function(name).is_err() {
        return Ok(None);
    }
    instance
        .exports
        .get_typed_function(store, name)
        .map(Some)
        .map_err(|e| LoaderError::MissingEntryPoint(format!("{}: {}", name, e)))
}

fn reported_failure(env: &FunctionEnv<GuestEnv>, store: &Store) -> Result<(), LoaderError> {
    match &env.as_ref(store).failure {
        Some(message) => Err(LoaderError::Introspection(message.clone())),
        None => Ok(()),
    }
}

/// Classify a trap raised by a guest call
fn call_failed(
    store: &mut Store,
    instance: &Instance,
    fuel: u64,
    export: &str,
    error: RuntimeError,
) -> LoaderError {
    if let MeteringPoints::Exhausted = get_remaining_points(store, instance) {
        return LoaderError::BudgetExhausted { budget: fuel };
    }
    LoaderError::Introspection(format!("{} trapped: {}", export, error.message()))
}
