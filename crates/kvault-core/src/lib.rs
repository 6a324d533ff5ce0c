//! # kvault Core
//!
//! A hierarchical, versioned key-value adapter. Callers store typed values
//! with metadata against interchangeable storage backends through one
//! contract, and coordinate writers with compare-and-swap where the backend
//! supports it.
//!
//! Start with [`KvAdapter`]: build a [`PluginCatalog`] once per process,
//! then create one adapter per unit of work.
pub mod adapter;
pub mod backends;
pub mod config;
pub mod constants;
pub mod error;
pub mod key;
pub mod plugin_system;
pub mod serializer;
pub mod utils;

pub use adapter::{AtomicValue, KeyListing, KvAdapter, StoredValue};
pub use config::{BackendConfig, CallerContext, ConfigError, Options, ResolvedConfig};
pub use error::{ErrorCategory, KvError, KvResult, Operation};
pub use key::{KeyError, KeyGrammar, Scope};
pub use plugin_system::{
    AtomicEntry, Backend, BackendError, BackendErrorKind, BackendFactory, BackendResult, Listing, PluginCatalog,
    PluginRegistry, PluginSystemError, Version,
};
pub use serializer::{Metadata, SerializationError, Value};

#[cfg(test)]
mod tests;
