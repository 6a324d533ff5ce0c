//! # kvault Builtin Backends
//!
//! The two backends shipped with the core:
//!
//! - **[`file`]**: [`FileBackend`], one file per key under a root directory,
//!   guarded by bounded-wait exclusive locks.
//! - **[`memory`]**: [`MemoryBackend`], process-local and versioned, with
//!   compare-and-swap support.
//!
//! Out-of-tree backends implement the same
//! [`Backend`](crate::plugin_system::Backend) trait and register a
//! [`BackendFactory`](crate::plugin_system::BackendFactory) with the
//! [`PluginCatalog`](crate::plugin_system::PluginCatalog).
pub mod file;
pub mod memory;

pub use file::{FileBackend, FileBackendFactory};
pub use memory::{MemoryBackend, MemoryBackendFactory, MemoryStore};

use semver::VersionReq;

/// API requirement declared by backends built alongside this core release
pub fn core_api_requirement() -> VersionReq {
    VersionReq::parse(&format!("^{}", crate::constants::API_VERSION)).unwrap_or(VersionReq::STAR)
}

#[cfg(test)]
mod tests;
