use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use backon::{BlockingRetryable, ExponentialBuilder};
use kvault_core::backends::core_api_requirement;
use kvault_core::{
    AtomicEntry, Backend, BackendConfig, BackendError, BackendErrorKind, BackendFactory, BackendResult, KeyGrammar,
    Listing, ResolvedConfig, Version,
};
use semver::VersionReq;

use crate::client::{DirectoryClient, DirectoryEntry, LdapError, LdapResult, Modification, ResultCode, SearchScope};
use crate::tools::{LdapToolClient, ToolSettings};
use crate::{FOLDER_ATTRIBUTE, KEY_ATTRIBUTE, KEY_OBJECT_CLASS, LDAP_BACKEND_TYPE, VALUE_ATTRIBUTE, VERSION_ATTRIBUTE};

/// Busy retries when `retries` is not configured
pub const DEFAULT_RETRIES: usize = 5;

/// First backoff delay between busy retries
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

const ANY_OBJECT: &str = "(objectClass=*)";

/// Stores keys as entries below `ou=<id>,<base_dn>`.
///
/// Folders are `organizationalUnit` entries named by `ou`; keys are leaf
/// entries named by `kvKey`, holding the stored bytes in `kvJsonValue` and a
/// version in `kvVersion`. Version checks use LDAP assertions, so the
/// directory server decides every compare-and-swap atomically.
#[derive(Debug)]
pub struct LdapBackend {
    identity: String,
    root_dn: String,
    client: Arc<dyn DirectoryClient>,
    retries: usize,
    retry_delay: Duration,
}

impl LdapBackend {
    pub fn new(identity: &str, root_dn: String, client: Arc<dyn DirectoryClient>) -> Self {
        Self {
            identity: identity.to_string(),
            root_dn,
            client,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retries(mut self, retries: usize, retry_delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn root_dn(&self) -> &str {
        &self.root_dn
    }

    /// DN of the folder at `keydir`; the empty path is the instance root
    pub fn folder_dn(&self, keydir: &str) -> String {
        let mut dn = self.root_dn.clone();
        for segment in keydir.split('/').filter(|s| !s.is_empty()) {
            dn = format!("{}={},{}", FOLDER_ATTRIBUTE, segment, dn);
        }
        dn
    }

    /// DN of the leaf entry holding `key`
    pub fn key_dn(&self, key: &str) -> String {
        let (folder, name) = split_key(key);
        format!("{}={},{}", KEY_ATTRIBUTE, name, self.folder_dn(folder))
    }

    /// Run `operation`, retrying while the server reports busy
    fn retry_busy<T>(&self, what: &str, mut operation: impl FnMut() -> LdapResult<T>) -> LdapResult<T> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry_delay)
            .with_max_delay(self.retry_delay * 20)
            .with_max_times(self.retries)
            .with_factor(2.0)
            .with_jitter();

        (|| operation())
            .retry(backoff)
            .sleep(thread::sleep)
            .when(|e: &LdapError| e.is(ResultCode::BUSY))
            .notify(|e: &LdapError, delay: Duration| {
                log::debug!("{}: directory busy during {} ({}); retrying in {:?}", self.identity, what, e, delay);
            })
            .call()
    }

    fn failure(&self, what: &str, key: &str, error: LdapError) -> BackendError {
        let kind = match error.code {
            ResultCode::NO_SUCH_OBJECT => BackendErrorKind::NotFound,
            ResultCode::BUSY | ResultCode::UNAVAILABLE | ResultCode::LOCAL_ERROR => BackendErrorKind::Unavailable,
            ResultCode::INVALID_CREDENTIALS => BackendErrorKind::PermissionDenied,
            _ => BackendErrorKind::Other,
        };
        BackendError::new(kind, format!("{} '{}' failed: {}", what, key, error))
    }

    fn search_base(&self, dn: &str, attributes: &[&str]) -> LdapResult<Option<DirectoryEntry>> {
        match self.retry_busy("search", || self.client.search(dn, SearchScope::Base, ANY_OBJECT, attributes)) {
            Ok(mut entries) => Ok(entries.pop()),
            Err(e) if e.is(ResultCode::NO_SUCH_OBJECT) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn read_entry(&self, key: &str) -> LdapResult<Option<(Vec<u8>, Version)>> {
        let Some(entry) = self.search_base(&self.key_dn(key), &[VALUE_ATTRIBUTE, VERSION_ATTRIBUTE])? else {
            return Ok(None);
        };
        let value = entry
            .first(VALUE_ATTRIBUTE)
            .ok_or_else(|| LdapError::new(ResultCode::NO_SUCH_ATTRIBUTE, format!("{} has no {}", entry.dn, VALUE_ATTRIBUTE)))?;
        let version = entry
            .first(VERSION_ATTRIBUTE)
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| LdapError::new(ResultCode::NO_SUCH_ATTRIBUTE, format!("{} has no valid {}", entry.dn, VERSION_ATTRIBUTE)))?;
        Ok(Some((value.as_bytes().to_vec(), Version::new(version))))
    }

    /// Create every folder entry from the instance root down to `keydir`
    fn ensure_folders(&self, keydir: &str) -> LdapResult<()> {
        let mut path = String::new();
        let mut entries = vec![folder_entry(&self.root_dn)];
        for segment in keydir.split('/').filter(|s| !s.is_empty()) {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(segment);
            entries.push(folder_entry(&self.folder_dn(&path)));
        }

        for entry in entries {
            match self.retry_busy("add folder", || self.client.add(&entry)) {
                Ok(()) => {}
                Err(e) if e.is(ResultCode::ALREADY_EXISTS) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Add the key entry. `Ok(false)` when it already exists.
    fn create_entry(&self, key: &str, value: &str) -> LdapResult<bool> {
        let (folder, name) = split_key(key);
        self.ensure_folders(folder)?;

        let entry = DirectoryEntry::new(self.key_dn(key))
            .with_attribute("objectClass", KEY_OBJECT_CLASS)
            .with_attribute(KEY_ATTRIBUTE, name)
            .with_attribute(VALUE_ATTRIBUTE, value)
            .with_attribute(VERSION_ATTRIBUTE, next_version(None).to_string());

        match self.retry_busy("add", || self.client.add(&entry)) {
            Ok(()) => Ok(true),
            Err(e) if e.is(ResultCode::ALREADY_EXISTS) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Replace the value iff the entry is still at `previous`.
    /// `Ok(false)` on an assertion failure or a vanished entry.
    fn update_entry(&self, key: &str, value: &str, previous: Version) -> LdapResult<bool> {
        let changes = [
            Modification::replace(VALUE_ATTRIBUTE, value),
            Modification::replace(VERSION_ATTRIBUTE, next_version(Some(previous.value())).to_string()),
        ];
        let assertion = version_assertion(previous);
        let dn = self.key_dn(key);

        match self.retry_busy("modify", || self.client.modify(&dn, &changes, Some(&assertion))) {
            Ok(()) => Ok(true),
            Err(e) if e.is(ResultCode::ASSERTION_FAILED) || e.is(ResultCode::NO_SUCH_OBJECT) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl Backend for LdapBackend {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn key_grammar(&self) -> KeyGrammar {
        KeyGrammar::Lowercase
    }

    fn delete(&self, key: &str) -> BackendResult<()> {
        match self.retry_busy("delete", || self.client.delete(&self.key_dn(key), false, None)) {
            Ok(()) => Ok(()),
            Err(e) if e.is(ResultCode::NO_SUCH_OBJECT) => Ok(()),
            Err(e) => Err(self.failure("delete", key, e)),
        }
    }

    fn deletetree(&self, keydir: &str) -> BackendResult<()> {
        if !keydir.is_empty() {
            self.delete(keydir)?;
        }
        match self.retry_busy("deletetree", || self.client.delete(&self.folder_dn(keydir), true, None)) {
            Ok(()) => Ok(()),
            Err(e) if e.is(ResultCode::NO_SUCH_OBJECT) => Ok(()),
            Err(e) => Err(self.failure("deletetree", keydir, e)),
        }
    }

    fn exists(&self, key: &str) -> BackendResult<bool> {
        let found = self
            .search_base(&self.key_dn(key), &[KEY_ATTRIBUTE])
            .map_err(|e| self.failure("exists", key, e))?;
        if found.is_some() {
            return Ok(true);
        }
        let folder = self
            .search_base(&self.folder_dn(key), &[FOLDER_ATTRIBUTE])
            .map_err(|e| self.failure("exists", key, e))?;
        Ok(folder.is_some())
    }

    fn get(&self, key: &str) -> BackendResult<Vec<u8>> {
        if let Some((value, _)) = self.read_entry(key).map_err(|e| self.failure("get", key, e))? {
            return Ok(value);
        }
        if self.exists(key)? {
            return Err(BackendError::is_folder(format!("'{}' is a folder, not a key", key)));
        }
        Err(BackendError::not_found(format!("key '{}' does not exist", key)))
    }

    fn list(&self, keydir: &str) -> BackendResult<Listing> {
        let base = self.folder_dn(keydir);
        let entries = self
            .retry_busy("list", || {
                self.client
                    .search(&base, SearchScope::OneLevel, ANY_OBJECT, &[FOLDER_ATTRIBUTE, KEY_ATTRIBUTE, VALUE_ATTRIBUTE])
            })
            .map_err(|e| self.failure("list", keydir, e))?;

        let mut listing = Listing::default();
        for entry in entries {
            match (entry.first(KEY_ATTRIBUTE), entry.first(VALUE_ATTRIBUTE), entry.first(FOLDER_ATTRIBUTE)) {
                (Some(name), Some(value), _) => {
                    listing.keys.insert(name.to_string(), value.as_bytes().to_vec());
                }
                (None, _, Some(folder)) => listing.folders.push(folder.to_string()),
                _ => log::debug!("{}: skipping unrecognized entry {}", self.identity, entry.dn),
            }
        }
        listing.folders.sort();
        Ok(listing)
    }

    fn put(&self, key: &str, value: &[u8]) -> BackendResult<()> {
        let text = stored_text(key, value)?;

        // Optimistic loop: lost races against other writers are retried
        // with the freshly read version, so the last writer wins.
        for _ in 0..=self.retries {
            let current = self.read_entry(key).map_err(|e| self.failure("put", key, e))?;
            let written = match current {
                None => self.create_entry(key, &text),
                Some((_, version)) => self.update_entry(key, &text, version),
            }
            .map_err(|e| self.failure("put", key, e))?;
            if written {
                return Ok(());
            }
        }
        Err(BackendError::unavailable(format!(
            "put '{}' failed: lost {} consecutive races with other writers",
            key,
            self.retries + 1
        )))
    }

    fn supports_atomic(&self) -> bool {
        true
    }

    fn atomic_get(&self, key: &str) -> BackendResult<AtomicEntry> {
        Ok(match self.read_entry(key).map_err(|e| self.failure("atomic_get", key, e))? {
            Some((value, version)) => AtomicEntry::present(value, version),
            None => AtomicEntry::absent(),
        })
    }

    fn atomic_put(&self, key: &str, value: &[u8], previous: Version) -> BackendResult<bool> {
        let text = stored_text(key, value)?;
        let result = if previous.is_absent() {
            self.create_entry(key, &text)
        } else {
            self.update_entry(key, &text, previous)
        };
        result.map_err(|e| self.failure("atomic_put", key, e))
    }

    fn atomic_delete(&self, key: &str, previous: Version) -> BackendResult<bool> {
        if previous.is_absent() {
            let current = self.read_entry(key).map_err(|e| self.failure("atomic_delete", key, e))?;
            return Ok(current.is_none());
        }

        let assertion = version_assertion(previous);
        match self.retry_busy("delete", || self.client.delete(&self.key_dn(key), false, Some(&assertion))) {
            Ok(()) => Ok(true),
            Err(e) if e.is(ResultCode::ASSERTION_FAILED) || e.is(ResultCode::NO_SUCH_OBJECT) => Ok(false),
            Err(e) => Err(self.failure("atomic_delete", key, e)),
        }
    }
}

fn split_key(key: &str) -> (&str, &str) {
    key.rsplit_once('/').unwrap_or(("", key))
}

fn folder_entry(dn: &str) -> DirectoryEntry {
    let name = dn
        .split(',')
        .next()
        .and_then(|rdn| rdn.split_once('='))
        .map(|(_, value)| value)
        .unwrap_or_default();
    DirectoryEntry::new(dn)
        .with_attribute("objectClass", "organizationalUnit")
        .with_attribute(FOLDER_ATTRIBUTE, name)
}

fn version_assertion(version: Version) -> String {
    format!("({}={})", VERSION_ATTRIBUTE, version)
}

/// Versions are microsecond timestamps, bumped past the previous version
/// when the clock has not moved, so they keep increasing across
/// delete-and-recreate.
fn next_version(previous: Option<i64>) -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0);
    match previous {
        Some(previous) => now.max(previous + 1),
        None => now.max(1),
    }
}

/// Stored bytes are the JSON envelope, so they are always UTF-8 text
fn stored_text(key: &str, value: &[u8]) -> BackendResult<String> {
    String::from_utf8(value.to_vec())
        .map_err(|_| BackendError::other(format!("value for '{}' is not UTF-8 text", key)))
}

/// Settings of an `ldap` backend entry
#[derive(Debug, Clone, PartialEq)]
pub struct LdapSettings {
    pub base_dn: String,
    pub tools: ToolSettings,
    pub retries: usize,
    pub retry_delay: Duration,
}

impl LdapSettings {
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let required = |field: &str| -> BackendResult<String> {
            config
                .setting::<String>(field)
                .map_err(|e| BackendError::invalid_config(e.to_string()))?
                .ok_or_else(|| BackendError::invalid_config(format!("ldap backend requires '{}'", field)))
        };
        let optional_path = |field: &str| -> BackendResult<Option<PathBuf>> {
            config
                .setting::<PathBuf>(field)
                .map_err(|e| BackendError::invalid_config(e.to_string()))
        };

        let retries = config
            .setting::<usize>("retries")
            .map_err(|e| BackendError::invalid_config(e.to_string()))?
            .unwrap_or(DEFAULT_RETRIES);
        let retry_delay = config
            .setting::<u64>("retry_delay_ms")
            .map_err(|e| BackendError::invalid_config(e.to_string()))?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RETRY_DELAY);

        Ok(Self {
            base_dn: required("base_dn")?,
            tools: ToolSettings {
                ldap_uri: required("ldap_uri")?,
                admin_dn: required("admin_dn")?,
                admin_pw_file: PathBuf::from(required("admin_pw_file")?),
                tls_cacert: optional_path("tls_cacert")?,
                tool_dir: optional_path("tool_dir")?,
            },
            retries,
            retry_delay,
        })
    }
}

/// Factory for [`LdapBackend`], registered as type `ldap`.
///
/// Builds backends on [`LdapToolClient`] unless given another client.
#[derive(Debug, Default)]
pub struct LdapBackendFactory {
    client: Option<Arc<dyn DirectoryClient>>,
}

impl LdapBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `client` for every backend instead of the command-line tools
    pub fn with_client(client: Arc<dyn DirectoryClient>) -> Self {
        Self { client: Some(client) }
    }
}

impl BackendFactory for LdapBackendFactory {
    fn backend_type(&self) -> &'static str {
        LDAP_BACKEND_TYPE
    }

    fn compatible_api_versions(&self) -> VersionReq {
        core_api_requirement()
    }

    fn create(&self, config: &ResolvedConfig) -> BackendResult<Arc<dyn Backend>> {
        let settings = LdapSettings::from_config(config.backend_config())?;
        let id = config.backend_id();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')) {
            return Err(BackendError::invalid_config(format!("ldap backend id '{}' is not a valid RDN value", id)));
        }

        let client = match &self.client {
            Some(client) => Arc::clone(client),
            None => Arc::new(LdapToolClient::new(settings.tools.clone())) as Arc<dyn DirectoryClient>,
        };
        let root_dn = format!("{}={},{}", FOLDER_ATTRIBUTE, id, settings.base_dn);
        log::debug!("LDAP backend '{}' rooted at {}", config.identity(), root_dn);

        Ok(Arc::new(
            LdapBackend::new(&config.identity(), root_dn, client).with_retries(settings.retries, settings.retry_delay),
        ))
    }
}
