#![cfg(test)]

use std::path::Path;
use std::sync::Arc;

use crate::adapter::KvAdapter;
use crate::config::{BackendConfig, CallerContext, Options};
use crate::plugin_system::PluginCatalog;

/// One catalog for the "process"; adapters built from it are separate units
/// of work that share backend storage.
pub fn shared_catalog() -> Arc<PluginCatalog> {
    Arc::new(PluginCatalog::with_builtin_backends())
}

pub fn file_backend(id: &str, root: &Path) -> BackendConfig {
    BackendConfig::new("file", id).with_setting("root_path", root.to_string_lossy().into_owned())
}

pub fn unit_of_work(catalog: &Arc<PluginCatalog>, defaults: &Options) -> KvAdapter {
    KvAdapter::new(Arc::clone(catalog), defaults.clone(), CallerContext::new("production"))
}
