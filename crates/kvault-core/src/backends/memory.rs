use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use semver::VersionReq;

use crate::config::ResolvedConfig;
use crate::constants::MEMORY_BACKEND_TYPE;
use crate::plugin_system::traits::{
    AtomicEntry, Backend, BackendError, BackendFactory, BackendResult, Listing, Version,
};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    version: Version,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<String, MemoryEntry>,
    last_version: i64,
}

impl MemoryState {
    fn next_version(&mut self) -> Version {
        self.last_version += 1;
        Version::new(self.last_version)
    }

    fn is_folder(&self, key: &str) -> bool {
        let prefix = folder_prefix(key);
        self.entries
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    /// Some ancestor of `key` is stored as a key
    fn has_key_ancestor(&self, key: &str) -> Option<String> {
        let mut end = 0;
        while let Some(offset) = key[end..].find('/') {
            end += offset;
            let ancestor = &key[..end];
            if self.entries.contains_key(ancestor) {
                return Some(ancestor.to_string());
            }
            end += 1;
        }
        None
    }

    fn store(&mut self, key: &str, value: &[u8]) -> BackendResult<()> {
        if self.is_folder(key) {
            return Err(BackendError::is_folder(format!("'{}' is a folder, not a key", key)));
        }
        if let Some(ancestor) = self.has_key_ancestor(key) {
            return Err(BackendError::other(format!(
                "cannot store '{}': '{}' is a key, not a folder",
                key, ancestor
            )));
        }
        let version = self.next_version();
        self.entries.insert(key.to_string(), MemoryEntry { value: value.to_vec(), version });
        Ok(())
    }
}

fn folder_prefix(keydir: &str) -> String {
    if keydir.is_empty() {
        String::new()
    } else {
        format!("{}/", keydir)
    }
}

/// The shared contents behind every [`MemoryBackend`] with the same id.
///
/// One mutex guards all entries and the version counter, so each
/// compare-and-swap checks and writes in a single critical section.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // Every mutation completes before the guard drops, so a poisoned
        // state is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local backend keeping entries in a [`MemoryStore`], with
/// monotonically increasing versions for compare-and-swap.
#[derive(Debug)]
pub struct MemoryBackend {
    identity: String,
    store: Arc<MemoryStore>,
}

impl MemoryBackend {
    pub fn new(identity: &str, store: Arc<MemoryStore>) -> Self {
        Self { identity: identity.to_string(), store }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

impl Backend for MemoryBackend {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn delete(&self, key: &str) -> BackendResult<()> {
        let mut state = self.store.lock();
        if !state.entries.contains_key(key) && state.is_folder(key) {
            return Err(BackendError::is_folder(format!("'{}' is a folder, not a key", key)));
        }
        state.entries.remove(key);
        Ok(())
    }

    fn deletetree(&self, keydir: &str) -> BackendResult<()> {
        let prefix = folder_prefix(keydir);
        let mut state = self.store.lock();
        state.entries.retain(|k, _| k != keydir && !k.starts_with(&prefix));
        Ok(())
    }

    fn exists(&self, key: &str) -> BackendResult<bool> {
        let state = self.store.lock();
        Ok(state.entries.contains_key(key) || state.is_folder(key))
    }

    fn get(&self, key: &str) -> BackendResult<Vec<u8>> {
        let state = self.store.lock();
        match state.entries.get(key) {
            Some(entry) => Ok(entry.value.clone()),
            None if state.is_folder(key) => Err(BackendError::is_folder(format!("'{}' is a folder, not a key", key))),
            None => Err(BackendError::not_found(format!("key '{}' does not exist", key))),
        }
    }

    fn list(&self, keydir: &str) -> BackendResult<Listing> {
        let prefix = folder_prefix(keydir);
        let state = self.store.lock();

        let mut listing = Listing::default();
        for (key, entry) in state.entries.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((folder, _)) => {
                    if listing.folders.last().map(String::as_str) != Some(folder) {
                        listing.folders.push(folder.to_string());
                    }
                }
                None => {
                    listing.keys.insert(rest.to_string(), entry.value.clone());
                }
            }
        }

        if !keydir.is_empty() && listing.keys.is_empty() && listing.folders.is_empty() {
            return Err(BackendError::not_found(format!("folder '{}' does not exist", keydir)));
        }
        listing.folders.sort();
        listing.folders.dedup();
        Ok(listing)
    }

    fn put(&self, key: &str, value: &[u8]) -> BackendResult<()> {
        self.store.lock().store(key, value)
    }

    fn supports_atomic(&self) -> bool {
        true
    }

    fn atomic_get(&self, key: &str) -> BackendResult<AtomicEntry> {
        let state = self.store.lock();
        Ok(match state.entries.get(key) {
            Some(entry) => AtomicEntry::present(entry.value.clone(), entry.version),
            None => AtomicEntry::absent(),
        })
    }

    fn atomic_put(&self, key: &str, value: &[u8], previous: Version) -> BackendResult<bool> {
        let mut state = self.store.lock();
        let current = state.entries.get(key).map_or(Version::ABSENT, |entry| entry.version);
        if current != previous.normalized() {
            log::debug!("CAS miss on '{}': expected version {}, found {}", key, previous, current);
            return Ok(false);
        }
        state.store(key, value)?;
        Ok(true)
    }

    fn atomic_delete(&self, key: &str, previous: Version) -> BackendResult<bool> {
        let mut state = self.store.lock();
        let current = state.entries.get(key).map_or(Version::ABSENT, |entry| entry.version);
        if current != previous.normalized() {
            log::debug!("CAS miss on delete of '{}': expected version {}, found {}", key, previous, current);
            return Ok(false);
        }
        state.entries.remove(key);
        Ok(true)
    }
}

/// Factory for [`MemoryBackend`], registered as type `memory`.
///
/// Stores are kept per id for the life of the factory, so every unit of work
/// resolving to the same id sees the same data.
#[derive(Debug, Default)]
pub struct MemoryBackendFactory {
    stores: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store for an id, created empty on first use
    pub fn store(&self, id: &str) -> Arc<MemoryStore> {
        let mut stores = self.stores.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(stores.entry(id.to_string()).or_default())
    }
}

impl BackendFactory for MemoryBackendFactory {
    fn backend_type(&self) -> &'static str {
        MEMORY_BACKEND_TYPE
    }

    fn compatible_api_versions(&self) -> VersionReq {
        super::core_api_requirement()
    }

    fn create(&self, config: &ResolvedConfig) -> BackendResult<Arc<dyn Backend>> {
        let store = self.store(config.backend_id());
        Ok(Arc::new(MemoryBackend::new(&config.identity(), store)))
    }
}
