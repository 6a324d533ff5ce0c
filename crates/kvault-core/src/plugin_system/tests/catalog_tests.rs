use std::sync::Arc;

use semver::VersionReq;

use crate::config::ResolvedConfig;
use crate::plugin_system::catalog::PluginCatalog;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::traits::{Backend, BackendError, BackendFactory, BackendResult};

// --- Mock factories for catalog tests ---
struct NamedFactory {
    backend_type: &'static str,
    requirement: &'static str,
}

impl BackendFactory for NamedFactory {
    fn backend_type(&self) -> &'static str {
        self.backend_type
    }

    fn compatible_api_versions(&self) -> VersionReq {
        VersionReq::parse(self.requirement).unwrap()
    }

    fn create(&self, _config: &ResolvedConfig) -> BackendResult<Arc<dyn Backend>> {
        Err(BackendError::other("mock factory builds nothing"))
    }
}

#[test]
fn test_builtin_backends_registered() {
    let catalog = PluginCatalog::with_builtin_backends();
    assert_eq!(catalog.backend_types(), vec!["file".to_string(), "memory".to_string()]);
    assert!(catalog.factory("file").is_some());
    assert!(catalog.factory("ldap").is_none());
}

#[test]
fn test_duplicate_registration_keeps_first() {
    let mut catalog = PluginCatalog::new();
    let first = Arc::new(NamedFactory { backend_type: "mock", requirement: "^0.1" });
    assert!(catalog.register(first.clone()).unwrap());

    let second = Arc::new(NamedFactory { backend_type: "mock", requirement: ">=0.0.0" });
    assert!(!catalog.register(second).unwrap(), "duplicate type is ignored");

    let kept = catalog.factory("mock").unwrap();
    assert_eq!(kept.compatible_api_versions(), VersionReq::parse("^0.1").unwrap());
    assert_eq!(catalog.backend_types().len(), 1);
}

#[test]
fn test_incompatible_api_is_rejected() {
    let mut catalog = PluginCatalog::new();
    let err = catalog
        .register(Arc::new(NamedFactory { backend_type: "future", requirement: "^2.0" }))
        .unwrap_err();

    match err {
        PluginSystemError::Registration { backend_type, message } => {
            assert_eq!(backend_type, "future");
            assert!(message.contains("^2.0"));
        }
        other => panic!("Expected Registration error, got {:?}", other),
    }
    assert!(catalog.backend_types().is_empty());
}
