#![cfg(test)]

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tempfile::tempdir;

use super::common::{file_backend, shared_catalog, unit_of_work};
use crate::config::{BackendConfig, Options};
use crate::serializer::{Metadata, Value};

#[test]
fn test_cas_linearizability_across_units_of_work() {
    let catalog = shared_catalog();
    let defaults = Options::new().with_backend_config("default", BackendConfig::new("memory", "race"));

    let setup = unit_of_work(&catalog, &defaults);
    assert!(setup.atomic_create("leader", &Value::from("nobody"), &Metadata::new(), &Options::new()).unwrap());
    let v1 = setup.atomic_get("leader", &Options::new()).unwrap().unwrap().version;

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["alice", "bob"]
        .into_iter()
        .map(|name| {
            let catalog = Arc::clone(&catalog);
            let defaults = defaults.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                // Each thread is its own unit of work with its own registry
                let adapter = unit_of_work(&catalog, &defaults);
                barrier.wait();
                let won = adapter
                    .atomic_put("leader", &Value::from(name), &Metadata::new(), v1, &Options::new())
                    .unwrap();
                (name, won)
            })
        })
        .collect();

    let results: Vec<(&str, bool)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<&str> = results.iter().filter(|(_, won)| *won).map(|(name, _)| *name).collect();
    assert_eq!(winners.len(), 1, "exactly one writer wins: {:?}", results);

    let after = setup.atomic_get("leader", &Options::new()).unwrap().unwrap();
    assert!(after.version > v1);
    assert_eq!(after.value.unwrap().value, Value::from(winners[0]));
}

#[test]
fn test_cas_counter_has_no_lost_updates() {
    let catalog = shared_catalog();
    let defaults = Options::new().with_backend_config("default", BackendConfig::new("memory", "counter"));
    let setup = unit_of_work(&catalog, &defaults);
    setup.atomic_create("count", &Value::Integer(0), &Metadata::new(), &Options::new()).unwrap();

    let threads = 8;
    let increments = 25;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let catalog = Arc::clone(&catalog);
            let defaults = defaults.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let adapter = unit_of_work(&catalog, &defaults);
                barrier.wait();
                for _ in 0..increments {
                    // Re-read and retry on a CAS miss
                    loop {
                        let current = adapter.atomic_get("count", &Options::new()).unwrap().unwrap();
                        let Some(Value::Integer(n)) = current.value.map(|s| s.value) else {
                            panic!("counter missing");
                        };
                        let next = Value::Integer(n + 1);
                        if adapter
                            .atomic_put("count", &next, &Metadata::new(), current.version, &Options::new())
                            .unwrap()
                        {
                            break;
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let stored = setup.get("count", &Options::new()).unwrap().unwrap();
    assert_eq!(stored.value, Value::Integer((threads * increments) as i64));
}

#[test]
fn test_lock_timeout_through_adapter() {
    let temp_dir = tempdir().unwrap();
    let catalog = shared_catalog();
    let defaults = Options::new().with_backend_config(
        "default",
        file_backend("locks", temp_dir.path()).with_setting("lock_timeout_seconds", 0.2),
    );
    let adapter = unit_of_work(&catalog, &defaults);
    adapter.put("held", &Value::from("before"), &Metadata::new(), &Options::new()).unwrap();

    let path = temp_dir.path().join("environments/production/held");
    let original = std::fs::read(&path).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let holder_barrier = Arc::clone(&barrier);
    let holder_path = path.clone();
    let holder = thread::spawn(move || {
        let file = std::fs::File::open(&holder_path).unwrap();
        fs2::FileExt::lock_exclusive(&file).unwrap();
        holder_barrier.wait();
        thread::sleep(Duration::from_millis(2000));
        drop(file);
    });

    barrier.wait();
    let err = adapter
        .put("held", &Value::from("after"), &Metadata::new(), &Options::new())
        .unwrap_err();
    assert!(err.is_lock_timeout());
    assert!(err.to_string().contains("timed out waiting for lock"));
    assert!(adapter.get("held", &Options::new()).unwrap_err().is_lock_timeout());
    assert_eq!(std::fs::read(&path).unwrap(), original);

    // With softfail the same timeout is a warning and an empty result
    let lenient = Options::new().with_softfail(true);
    assert!(!adapter.put("held", &Value::from("after"), &Metadata::new(), &lenient).unwrap());

    holder.join().unwrap();
    assert!(adapter.put("held", &Value::from("after"), &Metadata::new(), &Options::new()).unwrap());
    assert_eq!(adapter.get("held", &Options::new()).unwrap().unwrap().value, Value::from("after"));
}
