use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use semver::VersionReq;

use crate::config::{resolve, BackendConfig, CallerContext, Options, ResolvedConfig};
use crate::plugin_system::catalog::PluginCatalog;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::registry::PluginRegistry;
use crate::plugin_system::traits::{
    Backend, BackendError, BackendErrorKind, BackendFactory, BackendResult, Listing,
};

// --- Mock backend that counts constructions ---
#[derive(Debug)]
struct CountingBackend {
    identity: String,
    serial: usize,
}

impl Backend for CountingBackend {
    fn identity(&self) -> &str {
        &self.identity
    }
    fn delete(&self, _key: &str) -> BackendResult<()> {
        Ok(())
    }
    fn deletetree(&self, _keydir: &str) -> BackendResult<()> {
        Ok(())
    }
    fn exists(&self, _key: &str) -> BackendResult<bool> {
        Ok(false)
    }
    fn get(&self, key: &str) -> BackendResult<Vec<u8>> {
        Err(BackendError::not_found(key))
    }
    fn list(&self, _keydir: &str) -> BackendResult<Listing> {
        Ok(Listing::default())
    }
    fn put(&self, _key: &str, _value: &[u8]) -> BackendResult<()> {
        Ok(())
    }
}

struct CountingFactory {
    created: AtomicUsize,
    attempts: AtomicUsize,
}

impl CountingFactory {
    fn new() -> Self {
        Self { created: AtomicUsize::new(0), attempts: AtomicUsize::new(0) }
    }
}

impl BackendFactory for CountingFactory {
    fn backend_type(&self) -> &'static str {
        "counting"
    }

    fn compatible_api_versions(&self) -> VersionReq {
        VersionReq::parse("^0.1").unwrap()
    }

    fn create(&self, config: &ResolvedConfig) -> BackendResult<Arc<dyn Backend>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if config.backend_config().setting::<bool>("fail").ok().flatten() == Some(true) {
            return Err(BackendError::invalid_config("told to fail"));
        }
        let serial = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(CountingBackend { identity: config.identity(), serial }))
    }
}

fn setup() -> (Arc<CountingFactory>, Arc<PluginCatalog>) {
    let factory = Arc::new(CountingFactory::new());
    let mut catalog = PluginCatalog::new();
    catalog.register(factory.clone()).unwrap();
    (factory, Arc::new(catalog))
}

fn resolved(id: &str, fail: bool) -> ResolvedConfig {
    let defaults = Options::new().with_backend_config(
        "default",
        BackendConfig::new("counting", id).with_setting("fail", fail),
    );
    resolve(&Options::new(), &defaults, &["counting".to_string()], &CallerContext::default()).unwrap()
}

#[test]
fn test_instance_is_cached_per_identity() {
    let (factory, catalog) = setup();
    let registry = PluginRegistry::new(catalog);

    let a = registry.instance(&resolved("a", false)).unwrap();
    let a_again = registry.instance(&resolved("a", false)).unwrap();
    let b = registry.instance(&resolved("b", false)).unwrap();

    assert!(Arc::ptr_eq(&a, &a_again));
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    assert_eq!(registry.cached_identities(), vec!["counting/a".to_string(), "counting/b".to_string()]);
}

#[test]
fn test_separate_registries_build_separate_instances() {
    let (factory, catalog) = setup();
    let first = PluginRegistry::new(catalog.clone());
    let second = PluginRegistry::new(catalog);

    let a1 = first.instance(&resolved("a", false)).unwrap();
    let a2 = second.instance(&resolved("a", false)).unwrap();
    assert!(!Arc::ptr_eq(&a1, &a2));
    assert_eq!(factory.created.load(Ordering::SeqCst), 2);
}

#[test]
fn test_construction_failure_is_reported_and_not_cached() {
    let (factory, catalog) = setup();
    let registry = PluginRegistry::new(catalog);

    let err = registry.instance(&resolved("bad", true)).unwrap_err();
    match err {
        PluginSystemError::Construction { identity, source } => {
            assert_eq!(identity, "counting/bad");
            assert_eq!(source.kind, BackendErrorKind::InvalidConfig);
        }
        other => panic!("Expected Construction error, got {:?}", other),
    }
    assert!(registry.cached_identities().is_empty());

    // A later call with working settings constructs normally
    registry.instance(&resolved("bad", false)).unwrap();
    assert_eq!(factory.attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_concurrent_first_use_constructs_once() {
    let (factory, catalog) = setup();
    let registry = Arc::new(PluginRegistry::new(catalog));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.instance(&resolved("shared", false)).unwrap()
            })
        })
        .collect();

    let instances: Vec<Arc<dyn Backend>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    for instance in &instances[1..] {
        assert!(Arc::ptr_eq(&instances[0], instance));
    }
    assert!(format!("{:?}", instances[0]).contains("serial: 0"));
}
