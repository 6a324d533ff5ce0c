#![cfg(test)]

use tempfile::tempdir;

use super::common::{file_backend, shared_catalog, unit_of_work};
use crate::config::{BackendConfig, Options};
use crate::serializer::{Metadata, Value};

#[test]
fn test_backend_resolution_by_app_id() {
    let root_a = tempdir().unwrap();
    let root_b = tempdir().unwrap();
    let defaults = Options::new()
        .with_backend_config("default", file_backend("a", root_a.path()))
        .with_backend_config("myapp", file_backend("b", root_b.path()));
    let adapter = unit_of_work(&shared_catalog(), &defaults);

    let extra = Options::new().with_app_id("myapp-extra");
    let other = Options::new().with_app_id("other");
    adapter.put("k", &Value::from("to-b"), &Metadata::new(), &extra).unwrap();
    adapter.put("k", &Value::from("to-a"), &Metadata::new(), &other).unwrap();

    assert!(root_b.path().join("environments/production/k").is_file());
    assert!(root_a.path().join("environments/production/k").is_file());
    assert_eq!(adapter.get("k", &extra).unwrap().unwrap().value, Value::from("to-b"));
    assert_eq!(adapter.get("k", &other).unwrap().unwrap().value, Value::from("to-a"));
    assert_eq!(adapter.registry().cached_identities(), vec!["file/a".to_string(), "file/b".to_string()]);
}

#[test]
fn test_per_call_backends_override_defaults() {
    let root_default = tempdir().unwrap();
    let root_call = tempdir().unwrap();
    let defaults = Options::new().with_backend_config("default", file_backend("d", root_default.path()));
    let adapter = unit_of_work(&shared_catalog(), &defaults);

    let call = Options::new()
        .with_backend("scratch")
        .with_backend_config("scratch", file_backend("scratch", root_call.path()));
    adapter.put("k", &Value::Integer(7), &Metadata::new(), &call).unwrap();

    assert!(root_call.path().join("environments/production/k").is_file());
    assert!(!root_default.path().join("environments/production/k").exists());
}

#[test]
fn test_idempotent_delete() {
    let adapter = unit_of_work(
        &shared_catalog(),
        &Options::new().with_backend_config("default", BackendConfig::new("memory", "deletes")),
    );
    let opts = Options::new();

    adapter.put("k", &Value::from("v"), &Metadata::new(), &opts).unwrap();
    assert!(adapter.delete("k", &opts).unwrap());
    assert!(adapter.delete("k", &opts).unwrap());
    assert!(adapter.delete("never-existed", &opts).unwrap());
}

#[test]
fn test_listing_scenario_on_file_backend() {
    let root = tempdir().unwrap();
    let adapter = unit_of_work(
        &shared_catalog(),
        &Options::new().with_backend_config("default", file_backend("list", root.path())),
    );
    let opts = Options::new().with_global(true);

    adapter.put("app1/x", &Value::from("x"), &Metadata::new(), &opts).unwrap();
    adapter.put("app1/y", &Value::from("y"), &Metadata::new(), &opts).unwrap();
    adapter.put("app1/sub/z", &Value::from("z"), &Metadata::new(), &opts).unwrap();

    let listing = adapter.list("app1", &opts).unwrap().unwrap();
    assert_eq!(listing.keys.keys().cloned().collect::<Vec<_>>(), vec!["x", "y"]);
    assert_eq!(listing.folders, vec!["sub".to_string()]);
    assert!(root.path().join("globals/app1/sub/z").is_file());
}

#[test]
fn test_memory_data_outlives_unit_of_work() {
    let catalog = shared_catalog();
    let defaults = Options::new().with_backend_config("default", BackendConfig::new("memory", "persist"));

    {
        let first = unit_of_work(&catalog, &defaults);
        first.put("k", &Value::from("kept"), &Metadata::new(), &Options::new()).unwrap();
    }

    let second = unit_of_work(&catalog, &defaults);
    assert_eq!(second.get("k", &Options::new()).unwrap().unwrap().value, Value::from("kept"));
}
