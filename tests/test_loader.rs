//! Integration tests for sandboxed method loading

#[path = "common/mod.rs"]
mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::*;
use methodhub::{
    ArtifactRef, CancelToken, Cardinality, DataType, LoadLimits, LoaderError, MethodStatus,
    ParamType, PluginLoader,
};

// ============================================
// Successful introspection
// ============================================

#[test]
fn test_load_extracts_full_descriptor() {
    let wat = describing(&clustering_json("kmeans"));
    let descriptor = PluginLoader::default().load(wat.as_bytes()).unwrap();

    assert_eq!(descriptor.id.as_str(), "kmeans");
    assert_eq!(descriptor.name, "K-Means");
    assert_eq!(descriptor.status, MethodStatus::Active);
    assert_eq!(descriptor.artifact, ArtifactRef::for_bytes(wat.as_bytes()));

    let features = descriptor.input("features").unwrap();
    assert_eq!(features.types, vec![DataType::Numeric, DataType::Ordinal]);
    assert_eq!(features.cardinality, Cardinality::OneOrMore);
    assert!(features.required);
    assert!(!descriptor.input("label").unwrap().required);

    assert_eq!(descriptor.outputs.len(), 1);
    let k = descriptor.param("k").unwrap();
    assert_eq!(k.param_type, ParamType::Integer);
    assert_eq!(k.default, Some(serde_json::json!(3)));
    assert_eq!(descriptor.param("metric").unwrap().allowed.len(), 2);
}

#[test]
fn test_name_defaults_to_identity() {
    let wat = describing(&simple_json("stats.mean"));
    let descriptor = PluginLoader::default().load(wat.as_bytes()).unwrap();
    assert_eq!(descriptor.name, "stats.mean");
    assert_eq!(descriptor.description, "test method");
}

#[test]
fn test_load_is_deterministic_for_same_bytes() {
    let wat = describing(&simple_json("m1"));
    let loader = PluginLoader::default();
    let a = loader.load(wat.as_bytes()).unwrap();
    let b = loader.load(wat.as_bytes()).unwrap();
    assert_eq!(a.id, b.id);
    assert_eq!(a.inputs, b.inputs);
    assert_eq!(a.artifact, b.artifact);
}

#[test]
fn test_matching_abi_version_is_accepted() {
    let wat = with_abi_version(&simple_json("m1"), methodhub::plugin::ABI_VERSION);
    assert!(PluginLoader::default().load(wat.as_bytes()).is_ok());
}

#[test]
fn test_init_runs_before_describe() {
    let wat = needing_init(&simple_json("m1"));
    let descriptor = PluginLoader::default().load(wat.as_bytes()).unwrap();
    assert_eq!(descriptor.id.as_str(), "m1");
}

#[test]
fn test_guest_logging_does_not_disturb_load() {
    let wat = logging(&simple_json("m1"), "describing myself");
    let descriptor = PluginLoader::default().load(wat.as_bytes()).unwrap();
    assert_eq!(descriptor.id.as_str(), "m1");
}

// ============================================
// Rejected artifacts
// ============================================

#[test]
fn test_abi_version_mismatch() {
    let wat = with_abi_version(&simple_json("m1"), 7);
    let err = PluginLoader::default().load(wat.as_bytes()).unwrap_err();
    assert_eq!(
        err,
        LoaderError::AbiMismatch {
            expected: 1,
            found: 7
        }
    );
}

#[test]
fn test_guest_reported_failure() {
    let wat = failing("no model weights bundled");
    let err = PluginLoader::default().load(wat.as_bytes()).unwrap_err();
    assert_eq!(
        err,
        LoaderError::Introspection("no model weights bundled".to_string())
    );
}

#[test]
fn test_trap_during_describe() {
    let err = PluginLoader::default().load(trapping().as_bytes()).unwrap_err();
    assert!(matches!(err, LoaderError::Introspection(ref m) if m.contains("method_describe")));
}

#[test]
fn test_invalid_json_declaration() {
    let wat = describing("{\"id\": \"m1\", ");
    let err = PluginLoader::default().load(wat.as_bytes()).unwrap_err();
    assert!(matches!(err, LoaderError::MalformedDeclaration(_)));
}

#[test]
fn test_unknown_declaration_field() {
    let wat = describing(r#"{"id": "m1", "inputs": [], "colour": "blue"}"#);
    let err = PluginLoader::default().load(wat.as_bytes()).unwrap_err();
    assert!(matches!(err, LoaderError::MalformedDeclaration(ref m) if m.contains("colour")));
}

#[test]
fn test_shape_errors_are_rejected() {
    let cases = [
        r#"{"id": "", "inputs": [{"name": "a", "types": ["text"], "cardinality": "exactly-one"}]}"#,
        r#"{"id": "m1"}"#,
        r#"{"id": "m1", "inputs": [
            {"name": "a", "types": ["text"], "cardinality": "exactly-one"},
            {"name": "a", "types": ["date"], "cardinality": "exactly-one"}]}"#,
        r#"{"id": "m1", "inputs": [{"name": "a", "types": [], "cardinality": "exactly-one"}]}"#,
        r#"{"id": "m1", "outputs": [{"name": "o", "types": ["text"], "cardinality": "exactly-one"}],
            "params": [{"name": "k", "type": "integer", "default": "three"}]}"#,
    ];
    for json in cases {
        let err = PluginLoader::default()
            .load(describing(json).as_bytes())
            .unwrap_err();
        assert!(
            matches!(err, LoaderError::InvalidShape(_)),
            "expected shape error for {}, got {:?}",
            json,
            err
        );
    }
}

#[test]
fn test_text_that_is_not_a_module() {
    let err = PluginLoader::default().load(b"hello world").unwrap_err();
    assert!(matches!(err, LoaderError::Compilation(_)));
}

// ============================================
// Resource bounds
// ============================================

#[test]
fn test_budget_exhaustion() {
    let loader = PluginLoader::new(LoadLimits {
        timeout: Duration::from_secs(30),
        fuel: 10_000,
        ..LoadLimits::default()
    });
    let err = loader.load(looping().as_bytes()).unwrap_err();
    assert_eq!(err, LoaderError::BudgetExhausted { budget: 10_000 });
}

#[test]
fn test_wall_clock_timeout() {
    let loader = deadline_loader(Duration::from_millis(50));
    let started = Instant::now();
    let err = loader.load(looping().as_bytes()).unwrap_err();
    assert_eq!(err, LoaderError::Timeout(50));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_cancel_from_another_thread() {
    let loader = deadline_loader(Duration::from_secs(60));
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        trigger.cancel();
    });

    let started = Instant::now();
    let err = loader
        .load_with_cancel(looping().as_bytes(), &cancel)
        .unwrap_err();
    canceller.join().unwrap();

    assert_eq!(err, LoaderError::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_abandoned_workers_hold_their_slots() {
    let loader = PluginLoader::new(LoadLimits {
        timeout: Duration::from_millis(100),
        fuel: 2_000_000_000,
        max_workers: 1,
    });
    assert_eq!(
        loader.load(looping().as_bytes()).unwrap_err(),
        LoaderError::Timeout(100)
    );
    // The spinning guest still occupies the only slot
    assert_eq!(loader.active_workers(), 1);

    let err = loader
        .load(describing(&simple_json("m1")).as_bytes())
        .unwrap_err();
    assert_eq!(err, LoaderError::Timeout(100));

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = loader
        .load_with_cancel(describing(&simple_json("m1")).as_bytes(), &cancel)
        .unwrap_err();
    assert_eq!(err, LoaderError::Cancelled);
    assert_eq!(loader.active_workers(), 1);
}

#[test]
fn test_failed_load_leaves_loader_usable() {
    let loader = PluginLoader::new(LoadLimits {
        timeout: Duration::from_secs(30),
        fuel: 10_000,
        ..LoadLimits::default()
    });
    assert!(loader.load(looping().as_bytes()).is_err());
    assert!(loader.load(failing("boom").as_bytes()).is_err());
    let descriptor = loader.load(describing(&simple_json("m1")).as_bytes()).unwrap();
    assert_eq!(descriptor.id.as_str(), "m1");
}

#[test]
fn test_concurrent_loads_are_isolated() {
    let handles: Vec<_> = (0..4)
        .map(|i| {
            thread::spawn(move || {
                let wat = describing(&simple_json(&format!("m{}", i)));
                PluginLoader::default().load(wat.as_bytes()).unwrap()
            })
        })
        .collect();
    let mut ids: Vec<String> = handles
        .into_iter()
        .map(|h| h.join().unwrap().id.to_string())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["m0", "m1", "m2", "m3"]);
}
