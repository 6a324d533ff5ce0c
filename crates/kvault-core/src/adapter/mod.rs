//! # kvault Adapter
//!
//! [`KvAdapter`] is the caller-facing surface. Every operation runs the same
//! pipeline:
//!
//! 1. validate the caller key against the standard grammar,
//! 2. resolve call options over the process defaults,
//! 3. fetch (or construct) the backend instance from the unit of work's
//!    [`PluginRegistry`],
//! 4. re-validate against the backend's own key grammar,
//! 5. namespace the key for its scope and call the backend, serializing or
//!    deserializing values on the way.
//!
//! With `softfail` set, failures after step 2 other than an invalid key are
//! logged as warnings and replaced by the operation's empty result.
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{resolve, CallerContext, Options, ResolvedConfig};
use crate::error::{KvError, KvResult, Operation};
use crate::key::{self, Scope};
use crate::plugin_system::{Backend, BackendError, PluginCatalog, PluginRegistry, Version};
use crate::serializer::{self, Metadata, SerializationError, Value};

/// A value read back from a backend, with the metadata stored alongside it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
    pub value: Value,
    pub metadata: Metadata,
}

impl StoredValue {
    pub fn new(value: Value, metadata: Metadata) -> Self {
        Self { value, metadata }
    }
}

/// Result of [`KvAdapter::atomic_get`]. An absent key has no value and
/// [`Version::ABSENT`].
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicValue {
    pub value: Option<StoredValue>,
    pub version: Version,
}

/// One level of a folder, as returned by [`KvAdapter::list`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyListing {
    /// The listed folder, relative to the caller's namespace
    pub folder: String,
    pub keys: BTreeMap<String, StoredValue>,
    pub folders: Vec<String>,
}

/// A resolved call: the backend to use and the key as it reaches it
struct Call<'a> {
    operation: Operation,
    key: &'a str,
    identity: String,
    backend: Arc<dyn Backend>,
    normalized: String,
    scope: Scope,
}

impl Call<'_> {
    fn backend_error(&self, source: BackendError) -> KvError {
        KvError::BackendOperation {
            operation: self.operation,
            key: self.key.to_string(),
            identity: self.identity.clone(),
            source,
        }
    }

    fn serialization_error(&self, source: SerializationError) -> KvError {
        KvError::Serialization {
            operation: self.operation,
            key: self.key.to_string(),
            identity: self.identity.clone(),
            source,
        }
    }

    fn encode(&self, value: &Value, metadata: &Metadata) -> KvResult<Vec<u8>> {
        serializer::serialize(value, metadata).map_err(|e| self.serialization_error(e))
    }

    fn decode(&self, bytes: &[u8]) -> KvResult<StoredValue> {
        let (value, metadata) = serializer::deserialize(bytes).map_err(|e| self.serialization_error(e))?;
        Ok(StoredValue::new(value, metadata))
    }
}

/// Entry point for one unit of work.
///
/// Owns the unit of work's [`PluginRegistry`], so backend instances live
/// exactly as long as the adapter. Create one adapter per request and drop
/// it when the request ends.
#[derive(Debug)]
pub struct KvAdapter {
    registry: PluginRegistry,
    defaults: Options,
    context: CallerContext,
}

impl KvAdapter {
    pub fn new(catalog: Arc<PluginCatalog>, defaults: Options, context: CallerContext) -> Self {
        Self {
            registry: PluginRegistry::new(catalog),
            defaults,
            context,
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn defaults(&self) -> &Options {
        &self.defaults
    }

    pub fn context(&self) -> &CallerContext {
        &self.context
    }

    /// Resolve the effective configuration a call with `options` would use
    pub fn resolve(&self, options: &Options) -> Result<ResolvedConfig, crate::config::ConfigError> {
        resolve(options, &self.defaults, &self.registry.available_types(), &self.context)
    }

    /// Store `value` with `metadata` at `key`
    pub fn put(&self, key: &str, value: &Value, metadata: &Metadata, options: &Options) -> KvResult<bool> {
        self.run(Operation::Put, key, options, false, |call| {
            let bytes = call.encode(value, metadata)?;
            call.backend.put(&call.normalized, &bytes).map_err(|e| call.backend_error(e))?;
            Ok(true)
        })
    }

    /// Read the value at `key`. A missing key is an error; with `softfail`
    /// it is `None`.
    pub fn get(&self, key: &str, options: &Options) -> KvResult<Option<StoredValue>> {
        self.run(Operation::Get, key, options, None, |call| {
            let bytes = call.backend.get(&call.normalized).map_err(|e| call.backend_error(e))?;
            call.decode(&bytes).map(Some)
        })
    }

    /// Whether `key` exists as a key or folder. `None` only when the answer
    /// is unknown and `softfail` is set.
    pub fn exists(&self, key: &str, options: &Options) -> KvResult<Option<bool>> {
        self.run(Operation::Exists, key, options, None, |call| {
            call.backend.exists(&call.normalized).map(Some).map_err(|e| call.backend_error(e))
        })
    }

    /// Remove `key`. Removing an absent key succeeds.
    pub fn delete(&self, key: &str, options: &Options) -> KvResult<bool> {
        self.run(Operation::Delete, key, options, false, |call| {
            call.backend.delete(&call.normalized).map_err(|e| call.backend_error(e))?;
            Ok(true)
        })
    }

    /// Recursively remove the folder `keydir`
    pub fn deletetree(&self, keydir: &str, options: &Options) -> KvResult<bool> {
        self.run(Operation::DeleteTree, keydir, options, false, |call| {
            call.backend.deletetree(&call.normalized).map_err(|e| call.backend_error(e))?;
            Ok(true)
        })
    }

    /// List one level of `keydir`. Entries that do not decode are skipped
    /// with a warning.
    pub fn list(&self, keydir: &str, options: &Options) -> KvResult<Option<KeyListing>> {
        self.run(Operation::List, keydir, options, None, |call| {
            let listing = call.backend.list(&call.normalized).map_err(|e| call.backend_error(e))?;

            let mut keys = BTreeMap::new();
            for (name, bytes) in listing.keys {
                match call.decode(&bytes) {
                    Ok(stored) => {
                        keys.insert(name, stored);
                    }
                    Err(e) => log::warn!("Skipping '{}' in listing of '{}': {}", name, keydir, e),
                }
            }

            Ok(Some(KeyListing {
                folder: key::denormalize(&call.normalized, &call.scope),
                keys,
                folders: listing.folders,
            }))
        })
    }

    /// Read `key` together with its version
    pub fn atomic_get(&self, key: &str, options: &Options) -> KvResult<Option<AtomicValue>> {
        self.run(Operation::AtomicGet, key, options, None, |call| {
            let entry = call.backend.atomic_get(&call.normalized).map_err(|e| call.backend_error(e))?;
            let value = match entry.value {
                Some(bytes) => Some(call.decode(&bytes)?),
                None => None,
            };
            Ok(Some(AtomicValue { value, version: entry.version }))
        })
    }

    /// Store `value` iff the stored version still equals `previous`.
    /// `Ok(false)` means another writer got there first.
    pub fn atomic_put(
        &self,
        key: &str,
        value: &Value,
        metadata: &Metadata,
        previous: Version,
        options: &Options,
    ) -> KvResult<bool> {
        self.run(Operation::AtomicPut, key, options, false, |call| {
            let bytes = call.encode(value, metadata)?;
            call.backend
                .atomic_put(&call.normalized, &bytes, previous.normalized())
                .map_err(|e| call.backend_error(e))
        })
    }

    /// Store `value` only if `key` does not exist yet
    pub fn atomic_create(&self, key: &str, value: &Value, metadata: &Metadata, options: &Options) -> KvResult<bool> {
        self.run(Operation::AtomicCreate, key, options, false, |call| {
            let bytes = call.encode(value, metadata)?;
            call.backend
                .atomic_create(&call.normalized, &bytes)
                .map_err(|e| call.backend_error(e))
        })
    }

    /// Remove `key` iff the stored version still equals `previous`
    pub fn atomic_delete(&self, key: &str, previous: Version, options: &Options) -> KvResult<bool> {
        self.run(Operation::AtomicDelete, key, options, false, |call| {
            call.backend
                .atomic_delete(&call.normalized, previous.normalized())
                .map_err(|e| call.backend_error(e))
        })
    }

    fn run<T>(
        &self,
        operation: Operation,
        key: &str,
        options: &Options,
        empty: T,
        body: impl FnOnce(&Call<'_>) -> KvResult<T>,
    ) -> KvResult<T> {
        key::validate(key).map_err(|source| KvError::InvalidKey {
            operation,
            key: key.to_string(),
            source,
        })?;

        let config = self.resolve(options).map_err(|source| KvError::Config {
            operation,
            key: key.to_string(),
            source,
        })?;

        let result = self.prepare(operation, key, &config).and_then(|call| body(&call));
        match result {
            Err(e) if config.softfail && e.is_softfailable() => {
                log::warn!("kvault {} ignored (softfail): {}", operation, e);
                Ok(empty)
            }
            other => other,
        }
    }

    fn prepare<'a>(&self, operation: Operation, key: &'a str, config: &ResolvedConfig) -> KvResult<Call<'a>> {
        let identity = config.identity();

        let backend = self.registry.instance(config).map_err(|source| KvError::Construction {
            operation,
            key: key.to_string(),
            identity: identity.clone(),
            source,
        })?;

        key::validate_with(key, backend.key_grammar()).map_err(|source| KvError::InvalidKey {
            operation,
            key: key.to_string(),
            source,
        })?;

        let scope = config.scope();
        let normalized = key::normalize(key, &scope);
        log::trace!("kvault {} '{}' -> {} '{}'", operation, key, identity, normalized);

        Ok(Call {
            operation,
            key,
            identity,
            backend,
            normalized,
            scope,
        })
    }
}

#[cfg(test)]
mod tests;
