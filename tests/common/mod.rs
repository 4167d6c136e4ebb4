//! Common test utilities for methodhub integration tests
//!
//! Method modules are written as WAT text; the loader accepts both the text
//! and binary formats, so fixtures never need a toolchain.

#![allow(dead_code)]

use std::time::Duration;

use methodhub::{Config, LoadLimits, MethodService, PluginLoader};

/// Where fixtures place their declaration in guest memory
const DECLARATION_OFFSET: u32 = 64;

/// Pack a memory region the way `method_describe` returns it
pub fn region(ptr: u32, len: u32) -> i64 {
    ((ptr as u64) << 32 | len as u64) as i64
}

/// Encode arbitrary bytes as a WAT string literal
pub fn wat_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("\\{:02x}", b)).collect()
}

/// A declaration with one required numeric input and one output
pub fn simple_json(id: &str) -> String {
    format!(
        r#"{{
            "id": "{}",
            "description": "test method",
            "inputs": [{{"name": "values", "types": ["numeric"], "cardinality": "exactly-one"}}],
            "outputs": [{{"name": "result", "types": ["numeric"], "cardinality": "exactly-one"}}]
        }}"#,
        id
    )
}

/// The declaration used in the validation walkthrough: a required
/// one-or-more features port and an optional single label port
pub fn clustering_json(id: &str) -> String {
    format!(
        r#"{{
            "id": "{}",
            "name": "K-Means",
            "inputs": [
                {{"name": "features", "types": ["numeric", "ordinal"], "cardinality": "one-or-more"}},
                {{"name": "label", "types": ["nominal"], "cardinality": "exactly-one", "required": false}}
            ],
            "outputs": [{{"name": "cluster", "types": ["nominal"], "cardinality": "exactly-one"}}],
            "params": [
                {{"name": "k", "type": "integer", "default": 3, "required": true}},
                {{"name": "metric", "type": "string", "default": "euclidean", "allowed": ["euclidean", "manhattan"]}}
            ]
        }}"#,
        id
    )
}

/// Module whose `method_describe` returns `json`
pub fn describing(json: &str) -> String {
    module_with(json, "", "")
}

/// Module that also exports `method_abi_version` returning `version`
pub fn with_abi_version(json: &str, version: i32) -> String {
    module_with(
        json,
        "",
        &format!(
            r#"(func (export "method_abi_version") (result i32) i32.const {})"#,
            version
        ),
    )
}

/// Module that only describes itself after `method_init` has run
pub fn needing_init(json: &str) -> String {
    format!(
        r#"(module
            (memory (export "memory") 1)
            (global $ready (mut i32) (i32.const 0))
            (data (i32.const {off}) "{data}")
            (func (export "method_init") i32.const 1 global.set $ready)
            (func (export "method_describe") (result i64)
                global.get $ready
                i32.eqz
                if
                    unreachable
                end
                i64.const {region}))"#,
        off = DECLARATION_OFFSET,
        data = wat_bytes(json.as_bytes()),
        region = region(DECLARATION_OFFSET, json.len() as u32),
    )
}

/// Module that logs `message` at INFO before describing itself
pub fn logging(json: &str, message: &str) -> String {
    format!(
        r#"(module
            (import "env" "method_log" (func $log (param i32 i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "{msg}")
            (data (i32.const {off}) "{data}")
            (func (export "method_describe") (result i64)
                i32.const 2
                i32.const 0
                i32.const {msg_len}
                call $log
                i64.const {region}))"#,
        msg = wat_bytes(message.as_bytes()),
        msg_len = message.len(),
        off = DECLARATION_OFFSET + 4096,
        data = wat_bytes(json.as_bytes()),
        region = region(DECLARATION_OFFSET + 4096, json.len() as u32),
    )
}

/// Module that reports `message` through `method_fail`
pub fn failing(message: &str) -> String {
    format!(
        r#"(module
            (import "env" "method_fail" (func $fail (param i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "{msg}")
            (func (export "method_describe") (result i64)
                i32.const 0
                i32.const {len}
                call $fail
                i64.const 0))"#,
        msg = wat_bytes(message.as_bytes()),
        len = message.len(),
    )
}

/// Module whose `method_describe` never returns
pub fn looping() -> String {
    r#"(module
        (memory (export "memory") 1)
        (func (export "method_describe") (result i64)
            (loop $spin (br $spin))
            i64.const 0))"#
        .to_string()
}

/// Module whose `method_describe` traps
pub fn trapping() -> String {
    r#"(module
        (memory (export "memory") 1)
        (func (export "method_describe") (result i64) unreachable))"#
        .to_string()
}

fn module_with(json: &str, imports: &str, extra: &str) -> String {
    format!(
        r#"(module
            {imports}
            (memory (export "memory") 1)
            (data (i32.const {off}) "{data}")
            {extra}
            (func (export "method_describe") (result i64) i64.const {region}))"#,
        imports = imports,
        off = DECLARATION_OFFSET,
        data = wat_bytes(json.as_bytes()),
        extra = extra,
        region = region(DECLARATION_OFFSET, json.len() as u32),
    )
}

/// Loader with a short deadline and an effectively unlimited budget
pub fn deadline_loader(timeout: Duration) -> PluginLoader {
    PluginLoader::new(LoadLimits {
        timeout,
        fuel: 2_000_000_000,
        ..LoadLimits::default()
    })
}

/// Config rooted in a scratch directory
pub fn config_in(dir: &std::path::Path) -> Config {
    Config {
        data_dir: dir.to_path_buf(),
        ..Config::default()
    }
}

/// In-memory service with default limits
pub fn memory_service() -> MethodService {
    MethodService::in_memory(&Config::default()).unwrap()
}
