use std::collections::BTreeMap;
use std::sync::Arc;

use semver::Version as SemverVersion;

use crate::backends::{FileBackendFactory, MemoryBackendFactory};
use crate::constants::API_VERSION;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::traits::BackendFactory;

/// Process-wide map of backend type to factory.
///
/// Built once at startup and then shared read-only (behind an `Arc`) by every
/// unit of work.
pub struct PluginCatalog {
    factories: BTreeMap<String, Arc<dyn BackendFactory>>,
    api_version: SemverVersion,
}

impl PluginCatalog {
    /// Create an empty catalog for the current core API version
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            // API_VERSION is a literal known to parse
            api_version: SemverVersion::parse(API_VERSION).unwrap_or_else(|_| SemverVersion::new(0, 1, 0)),
        }
    }

    /// Create a catalog with the backends shipped in the core (`file` and
    /// `memory`) already registered
    pub fn with_builtin_backends() -> Self {
        let mut catalog = Self::new();
        for factory in [
            Arc::new(FileBackendFactory) as Arc<dyn BackendFactory>,
            Arc::new(MemoryBackendFactory::new()),
        ] {
            // Builtins always target the current API and have distinct types
            if let Err(e) = catalog.register(factory) {
                log::error!("Failed to register builtin backend: {}", e);
            }
        }
        catalog
    }

    /// Register a factory under its backend type.
    ///
    /// Returns `Ok(false)` when the type is already registered; the first
    /// registration stays in effect. A factory built for an incompatible core
    /// API is rejected.
    pub fn register(&mut self, factory: Arc<dyn BackendFactory>) -> Result<bool, PluginSystemError> {
        let backend_type = factory.backend_type().to_string();

        let requirement = factory.compatible_api_versions();
        if !requirement.matches(&self.api_version) {
            return Err(PluginSystemError::Registration {
                backend_type,
                message: format!(
                    "requires core API {} but this is API version {}",
                    requirement, self.api_version
                ),
            });
        }

        if self.factories.contains_key(&backend_type) {
            log::warn!("Backend type '{}' is already registered; ignoring duplicate", backend_type);
            return Ok(false);
        }

        log::debug!("Registered backend type '{}'", backend_type);
        self.factories.insert(backend_type, factory);
        Ok(true)
    }

    /// Look up the factory for a backend type
    pub fn factory(&self, backend_type: &str) -> Option<Arc<dyn BackendFactory>> {
        self.factories.get(backend_type).cloned()
    }

    /// Registered backend types, sorted
    pub fn backend_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn api_version(&self) -> &SemverVersion {
        &self.api_version
    }
}

impl Default for PluginCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("backend_types", &self.backend_types())
            .field("api_version", &self.api_version)
            .finish()
    }
}
