//! Introspection ABI constants and guest memory helpers
//!
//! Defines the names and calling conventions a method module must follow and
//! the helpers the host uses to copy data out of guest memory.

use wasmer::{AsStoreRef, Memory, MemoryView, WasmPtr};

/// Version of the introspection protocol spoken by this host
pub const ABI_VERSION: i32 = 1;

/// Export names
pub const EXPORT_MEMORY: &str = "memory";
pub const EXPORT_DESCRIBE: &str = "method_describe";
pub const EXPORT_ABI_VERSION: &str = "method_abi_version";
pub const EXPORT_INIT: &str = "method_init";

/// Import module and function names
pub const IMPORT_MODULE: &str = "env";
pub const IMPORT_LOG: &str = "method_log";
pub const IMPORT_FAIL: &str = "method_fail";

/// Maximum size for guest log and failure messages
pub const MAX_MESSAGE_LEN: u32 = 4096;

/// Maximum size of the JSON declaration returned by `method_describe`
pub const MAX_DECLARATION_LEN: u32 = 1_048_576; // 1MB

/// Log levels accepted by `method_log`
pub mod log_levels {
    pub const ERROR: i32 = 0;
    pub const WARN: i32 = 1;
    pub const INFO: i32 = 2;
    pub const DEBUG: i32 = 3;
}

/// Split the packed `method_describe` result into `(ptr, len)`
pub fn unpack_region(packed: i64) -> (u32, u32) {
    let raw = packed as u64;
    ((raw >> 32) as u32, (raw & 0xffff_ffff) as u32)
}

/// Pack a `(ptr, len)` pair the way guests return it
pub fn pack_region(ptr: u32, len: u32) -> i64 {
    (((ptr as u64) << 32) | len as u64) as i64
}

/// Read bytes from guest memory, `None` if the region is out of bounds or too large
pub fn read_bytes(
    memory: &Memory,
    store: &impl AsStoreRef,
    ptr: u32,
    len: u32,
    max_len: u32,
) -> Option<Vec<u8>> {
    if len == 0 {
        return Some(Vec::new());
    }
    if len > max_len {
        return None;
    }

    let view: MemoryView = memory.view(store);
    let mut buffer = vec![0u8; len as usize];

    let wasm_ptr: WasmPtr<u8> = WasmPtr::new(ptr);
    let slice = wasm_ptr.slice(&view, len).ok()?;
    slice.read_slice(&mut buffer).ok()?;

    Some(buffer)
}

/// Read a UTF-8 message from guest memory, replacing invalid sequences
pub fn read_message(memory: &Memory, store: &impl AsStoreRef, ptr: u32, len: u32) -> Option<String> {
    let len = len.min(MAX_MESSAGE_LEN);
    read_bytes(memory, store, ptr, len, MAX_MESSAGE_LEN)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}
