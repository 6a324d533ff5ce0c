use std::collections::BTreeMap;
use std::sync::Arc;

use tempfile::tempdir;

use crate::adapter::{KvAdapter, StoredValue};
use crate::config::{BackendConfig, CallerContext, Options};
use crate::error::{ErrorCategory, KvError, Operation};
use crate::plugin_system::{BackendErrorKind, PluginCatalog, Version};
use crate::serializer::{Metadata, Value};

fn memory_adapter(id: &str) -> KvAdapter {
    let defaults = Options::new().with_backend_config("default", BackendConfig::new("memory", id));
    KvAdapter::new(
        Arc::new(PluginCatalog::with_builtin_backends()),
        defaults,
        CallerContext::new("production"),
    )
}

fn metadata() -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("owner".to_string(), serde_json::json!("ops"));
    metadata
}

#[test]
fn test_put_get_round_trip() {
    let adapter = memory_adapter("round_trip");
    let value = Value::Map(BTreeMap::from([
        ("port".to_string(), Value::Integer(8080)),
        ("hosts".to_string(), Value::Array(vec![Value::from("a"), Value::from("b")])),
    ]));

    assert!(adapter.put("app/settings", &value, &metadata(), &Options::new()).unwrap());
    let stored = adapter.get("app/settings", &Options::new()).unwrap().unwrap();
    assert_eq!(stored, StoredValue::new(value, metadata()));
}

#[test]
fn test_binary_values_round_trip() {
    let adapter = memory_adapter("binary");
    let value = Value::Binary(vec![0xff, 0xfe, 0x00, 0x80]);

    adapter.put("blob", &value, &Metadata::new(), &Options::new()).unwrap();
    let stored = adapter.get("blob", &Options::new()).unwrap().unwrap();
    assert_eq!(stored.value, value);
    assert!(stored.metadata.is_empty());
}

#[test]
fn test_environment_and_global_namespaces_are_separate() {
    let adapter = memory_adapter("namespaces");
    let global = Options::new().with_global(true);
    let staging = Options::new().with_environment("staging");

    adapter.put("shared", &Value::from("prod"), &Metadata::new(), &Options::new()).unwrap();
    adapter.put("shared", &Value::from("global"), &Metadata::new(), &global).unwrap();

    assert_eq!(adapter.get("shared", &Options::new()).unwrap().unwrap().value, Value::from("prod"));
    assert_eq!(adapter.get("shared", &global).unwrap().unwrap().value, Value::from("global"));
    assert_eq!(adapter.exists("shared", &staging).unwrap(), Some(false));
}

#[test]
fn test_file_backend_layout() {
    let temp_dir = tempdir().unwrap();
    let defaults = Options::new().with_backend_config(
        "default",
        BackendConfig::new("file", "layout").with_setting("root_path", temp_dir.path().to_str().unwrap()),
    );
    let adapter = KvAdapter::new(
        Arc::new(PluginCatalog::with_builtin_backends()),
        defaults,
        CallerContext::new("dev"),
    );

    adapter.put("app/key", &Value::Boolean(true), &Metadata::new(), &Options::new()).unwrap();
    adapter.put("app/key", &Value::Integer(1), &Metadata::new(), &Options::new().with_global(true)).unwrap();

    let env_bytes = std::fs::read(temp_dir.path().join("environments/dev/app/key")).unwrap();
    let envelope: serde_json::Value = serde_json::from_slice(&env_bytes).unwrap();
    assert_eq!(envelope["value"], serde_json::json!(true));
    assert!(temp_dir.path().join("globals/app/key").is_file());
}

#[test]
fn test_environment_cannot_escape_file_root() {
    let temp_dir = tempdir().unwrap();
    let root = temp_dir.path().join("a/b/root");
    let defaults = Options::new().with_backend_config(
        "default",
        BackendConfig::new("file", "escape").with_setting("root_path", root.to_str().unwrap()),
    );
    let adapter = KvAdapter::new(
        Arc::new(PluginCatalog::with_builtin_backends()),
        defaults,
        CallerContext::new("dev"),
    );

    let opts = Options::new().with_environment("../../..").with_softfail(true);
    let err = adapter.put("escaped", &Value::from("x"), &Metadata::new(), &opts).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Config);
    assert!(!err.is_softfailable());

    assert!(!temp_dir.path().join("a/escaped").exists());
    assert!(!temp_dir.path().join("escaped").exists());
}

#[test]
fn test_list_returns_one_level() {
    let adapter = memory_adapter("listing");
    let opts = Options::new();
    adapter.put("app1/x", &Value::from("x"), &Metadata::new(), &opts).unwrap();
    adapter.put("app1/y", &Value::from("y"), &Metadata::new(), &opts).unwrap();
    adapter.put("app1/sub/z", &Value::from("z"), &Metadata::new(), &opts).unwrap();

    let listing = adapter.list("app1/", &opts).unwrap().unwrap();
    assert_eq!(listing.folder, "app1");
    assert_eq!(listing.keys.keys().cloned().collect::<Vec<_>>(), vec!["x", "y"]);
    assert_eq!(listing.keys["y"].value, Value::from("y"));
    assert_eq!(listing.folders, vec!["sub".to_string()]);
}

#[test]
fn test_list_skips_undecodable_entries() {
    let temp_dir = tempdir().unwrap();
    let defaults = Options::new().with_backend_config(
        "default",
        BackendConfig::new("file", "corrupt").with_setting("root_path", temp_dir.path().to_str().unwrap()),
    );
    let adapter = KvAdapter::new(Arc::new(PluginCatalog::with_builtin_backends()), defaults, CallerContext::new("p"));

    adapter.put("dir/good", &Value::from("ok"), &Metadata::new(), &Options::new()).unwrap();
    std::fs::write(temp_dir.path().join("environments/p/dir/bad"), b"not json").unwrap();

    let listing = adapter.list("dir", &Options::new()).unwrap().unwrap();
    assert_eq!(listing.keys.len(), 1);
    assert!(listing.keys.contains_key("good"));
}

#[test]
fn test_delete_and_deletetree() {
    let adapter = memory_adapter("deletes");
    let opts = Options::new();
    adapter.put("tree/a", &Value::from("a"), &Metadata::new(), &opts).unwrap();
    adapter.put("tree/b/c", &Value::from("c"), &Metadata::new(), &opts).unwrap();

    assert!(adapter.delete("tree/a", &opts).unwrap());
    assert!(adapter.delete("tree/a", &opts).unwrap());
    assert_eq!(adapter.exists("tree/a", &opts).unwrap(), Some(false));

    assert!(adapter.deletetree("tree", &opts).unwrap());
    assert_eq!(adapter.exists("tree", &opts).unwrap(), Some(false));
    assert!(adapter.deletetree("tree", &opts).unwrap());
}

#[test]
fn test_get_missing_key_is_backend_error() {
    let adapter = memory_adapter("missing");
    let err = adapter.get("nope", &Options::new()).unwrap_err();

    assert_eq!(err.category(), ErrorCategory::BackendOperation);
    assert_eq!(err.operation(), Operation::Get);
    assert_eq!(err.identity(), Some("memory/missing"));
    assert_eq!(err.backend_error().map(|e| e.kind), Some(BackendErrorKind::NotFound));

    let message = err.to_string();
    assert!(message.contains("get"));
    assert!(message.contains("'nope'"));
    assert!(message.contains("memory/missing"));
}

#[test]
fn test_invalid_key_is_reported_before_resolution() {
    // Even an unresolvable configuration reports the key problem first
    let adapter = memory_adapter("invalid");
    let err = adapter
        .put("a/../b", &Value::from("x"), &Metadata::new(), &Options::new().with_backend("nope"))
        .unwrap_err();
    assert!(matches!(err, KvError::InvalidKey { .. }));
    assert_eq!(err.identity(), None);
}

#[test]
fn test_cas_through_adapter() {
    let adapter = memory_adapter("cas");
    let opts = Options::new();

    let absent = adapter.atomic_get("counter", &opts).unwrap().unwrap();
    assert_eq!(absent.value, None);
    assert_eq!(absent.version, Version::ABSENT);

    assert!(adapter.atomic_create("counter", &Value::Integer(1), &Metadata::new(), &opts).unwrap());
    assert!(!adapter.atomic_create("counter", &Value::Integer(9), &Metadata::new(), &opts).unwrap());

    let current = adapter.atomic_get("counter", &opts).unwrap().unwrap();
    assert_eq!(current.value.as_ref().map(|s| &s.value), Some(&Value::Integer(1)));

    assert!(adapter.atomic_put("counter", &Value::Integer(2), &metadata(), current.version, &opts).unwrap());
    assert!(!adapter.atomic_put("counter", &Value::Integer(3), &metadata(), current.version, &opts).unwrap());

    let latest = adapter.atomic_get("counter", &opts).unwrap().unwrap();
    assert_eq!(latest.value, Some(StoredValue::new(Value::Integer(2), metadata())));

    assert!(!adapter.atomic_delete("counter", current.version, &opts).unwrap());
    assert!(adapter.atomic_delete("counter", latest.version, &opts).unwrap());
    assert_eq!(adapter.exists("counter", &opts).unwrap(), Some(false));
}

#[test]
fn test_negative_previous_version_creates() {
    let adapter = memory_adapter("negative_version");
    let opts = Options::new();

    assert!(adapter.atomic_put("slot", &Value::Integer(1), &Metadata::new(), Version::new(-2), &opts).unwrap());
    assert!(!adapter.atomic_put("slot", &Value::Integer(2), &Metadata::new(), Version::new(-2), &opts).unwrap());
    assert_eq!(adapter.get("slot", &opts).unwrap().unwrap().value, Value::Integer(1));
}

#[test]
fn test_atomic_on_file_backend_is_unsupported() {
    let temp_dir = tempdir().unwrap();
    let defaults = Options::new().with_backend_config(
        "default",
        BackendConfig::new("file", "noatomic").with_setting("root_path", temp_dir.path().to_str().unwrap()),
    );
    let adapter = KvAdapter::new(Arc::new(PluginCatalog::with_builtin_backends()), defaults, CallerContext::default());

    let err = adapter
        .atomic_create("k", &Value::from("v"), &Metadata::new(), &Options::new())
        .unwrap_err();
    assert_eq!(err.backend_error().map(|e| e.kind), Some(BackendErrorKind::Unsupported));
}

#[test]
fn test_registry_reuses_instance_across_calls() {
    let adapter = memory_adapter("reuse");
    adapter.put("a", &Value::from("1"), &Metadata::new(), &Options::new()).unwrap();
    adapter.get("a", &Options::new()).unwrap();
    assert_eq!(adapter.registry().cached_identities(), vec!["memory/reuse".to_string()]);
}

#[test]
fn test_unrepresentable_value_is_serialization_error() {
    let adapter = memory_adapter("unrepresentable");
    let value = Value::Float(f64::NAN);
    let err = adapter.put("f", &value, &Metadata::new(), &Options::new()).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Serialization);
}
