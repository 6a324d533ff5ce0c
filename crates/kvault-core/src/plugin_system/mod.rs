//! # kvault Plugin System
//!
//! Backends are plugins. A [`BackendFactory`] is registered once per process
//! in the [`PluginCatalog`] under its type name, and each unit of work gets
//! a [`PluginRegistry`] that hands out one configured [`Backend`] instance
//! per `<type>/<id>` identity.
//!
//! ## Key Submodules:
//!
//! - **[`traits`]**: the [`Backend`] contract, [`BackendFactory`], versions,
//!   listings and [`BackendError`].
//! - **[`catalog`]**: the process-wide [`PluginCatalog`], including API
//!   compatibility checks at registration.
//! - **[`registry`]**: the per-unit-of-work [`PluginRegistry`] instance cache.
//! - **[`error`]**: [`PluginSystemError`].
pub mod catalog;
pub mod error;
pub mod registry;
pub mod traits;

pub use catalog::PluginCatalog;
pub use error::PluginSystemError;
pub use registry::PluginRegistry;
pub use traits::{
    AtomicEntry, Backend, BackendError, BackendErrorKind, BackendFactory, BackendResult, Listing, Version,
};

#[cfg(test)]
mod tests;
