use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::ResolvedConfig;
use crate::plugin_system::catalog::PluginCatalog;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::traits::Backend;

/// Per-unit-of-work cache of configured backend instances, keyed by
/// `<type>/<id>`.
///
/// At most one instance exists per identity for the lifetime of the
/// registry. The cache lock is held while an instance is constructed, so two
/// threads asking for the same identity never both build it.
#[derive(Debug)]
pub struct PluginRegistry {
    catalog: Arc<PluginCatalog>,
    instances: Mutex<HashMap<String, Arc<dyn Backend>>>,
}

impl PluginRegistry {
    pub fn new(catalog: Arc<PluginCatalog>) -> Self {
        Self {
            catalog,
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<PluginCatalog> {
        &self.catalog
    }

    /// Backend types available to the config resolver
    pub fn available_types(&self) -> Vec<String> {
        self.catalog.backend_types()
    }

    /// Return the cached instance for the resolved identity, constructing and
    /// configuring it on first use.
    ///
    /// A cached instance is returned as is, even if `config` carries
    /// different settings. A failed construction is not cached, and the
    /// error is reported as [`PluginSystemError::Construction`].
    pub fn instance(&self, config: &ResolvedConfig) -> Result<Arc<dyn Backend>, PluginSystemError> {
        let identity = config.identity();

        let mut instances = self
            .instances
            .lock()
            .map_err(|_| PluginSystemError::InternalError("backend instance cache lock poisoned".to_string()))?;

        if let Some(existing) = instances.get(&identity) {
            return Ok(Arc::clone(existing));
        }

        let factory = self
            .catalog
            .factory(config.backend_type())
            .ok_or_else(|| PluginSystemError::UnknownType {
                backend_type: config.backend_type().to_string(),
            })?;

        log::debug!("Constructing backend '{}' for '{}'", identity, config.backend);
        let backend = factory
            .create(config)
            .map_err(|source| PluginSystemError::Construction {
                identity: identity.clone(),
                source,
            })?;

        instances.insert(identity, Arc::clone(&backend));
        Ok(backend)
    }

    /// Identities with a live instance, sorted
    pub fn cached_identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = match self.instances.lock() {
            Ok(instances) => instances.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        };
        identities.sort();
        identities
    }
}
