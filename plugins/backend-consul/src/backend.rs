use std::sync::Arc;
use std::time::Duration;

use kvault_core::backends::core_api_requirement;
use kvault_core::{
    AtomicEntry, Backend, BackendConfig, BackendError, BackendErrorKind, BackendFactory, BackendResult, Listing,
    ResolvedConfig, Version,
};
use semver::VersionReq;

use crate::api::{self, ConsulError, KvPair, KvRequest, KvResponse, Method};
use crate::transport::{ConsulTransport, UreqTransport};
use crate::{CONSUL_BACKEND_TYPE, DEFAULT_ROOT, DEFAULT_TIMEOUT_SECS, DEFAULT_URL};

/// Stores keys below a prefix of the Consul KV store
#[derive(Debug)]
pub struct ConsulBackend {
    identity: String,
    root: String,
    transport: Arc<dyn ConsulTransport>,
}

impl ConsulBackend {
    pub fn new(identity: &str, root: &str, transport: Arc<dyn ConsulTransport>) -> Self {
        Self {
            identity: identity.to_string(),
            root: root.trim_matches('/').to_string(),
            transport,
        }
    }

    /// Consul key prefix owned by this instance
    pub fn root(&self) -> &str {
        &self.root
    }

    fn send(&self, what: &str, key: &str, request: KvRequest) -> BackendResult<KvResponse> {
        let response = self.transport.send(&request).map_err(|e| self.failure(what, key, e))?;
        match response.status {
            200..=299 | 404 => Ok(response),
            status => {
                let kind = match status {
                    401 | 403 => BackendErrorKind::PermissionDenied,
                    429 | 500..=599 => BackendErrorKind::Unavailable,
                    _ => BackendErrorKind::Other,
                };
                Err(BackendError::new(
                    kind,
                    format!("{} '{}' failed: HTTP {}: {}", what, key, status, response.text()),
                ))
            }
        }
    }

    fn failure(&self, what: &str, key: &str, error: ConsulError) -> BackendError {
        let kind = match error {
            ConsulError::Transport { .. } => BackendErrorKind::Unavailable,
            ConsulError::Decode { .. } => BackendErrorKind::Other,
        };
        BackendError::new(kind, format!("{} '{}' failed: {}", what, key, error))
    }

    fn read_pair(&self, what: &str, key: &str) -> BackendResult<Option<KvPair>> {
        let response = self.send(what, key, KvRequest::new(Method::Get, api::key_path(&self.root, key)))?;
        if response.is_not_found() {
            return Ok(None);
        }
        let pairs = api::parse_pairs(key, &response.body).map_err(|e| self.failure(what, key, e))?;
        Ok(pairs.into_iter().next())
    }

    /// Entries one level below `keydir`, or `None` when nothing is stored there
    fn folder_keys(&self, what: &str, keydir: &str) -> BackendResult<Option<Vec<String>>> {
        let request = KvRequest::new(Method::Get, api::folder_path(&self.root, keydir))
            .with_query("keys", "")
            .with_query("separator", "/");
        let response = self.send(what, keydir, request)?;
        if response.is_not_found() {
            return Ok(None);
        }
        let keys = api::parse_keys(keydir, &response.body).map_err(|e| self.failure(what, keydir, e))?;
        Ok(Some(keys))
    }

    fn is_folder(&self, what: &str, key: &str) -> BackendResult<bool> {
        let prefix = format!("{}/", api::consul_key(&self.root, key));
        Ok(self
            .folder_keys(what, key)?
            .is_some_and(|keys| keys.iter().any(|k| k.len() > prefix.len() && k.starts_with(&prefix))))
    }

    fn answer(&self, what: &str, key: &str, response: &KvResponse) -> BackendResult<bool> {
        api::parse_bool(key, &response.body).map_err(|e| self.failure(what, key, e))
    }
}

impl Backend for ConsulBackend {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn delete(&self, key: &str) -> BackendResult<()> {
        if self.read_pair("delete", key)?.is_none() {
            if self.is_folder("delete", key)? {
                return Err(BackendError::is_folder(format!("'{}' is a folder, not a key", key)));
            }
            return Ok(());
        }
        self.send("delete", key, KvRequest::new(Method::Delete, api::key_path(&self.root, key)))?;
        Ok(())
    }

    fn deletetree(&self, keydir: &str) -> BackendResult<()> {
        if !keydir.is_empty() {
            self.send("deletetree", keydir, KvRequest::new(Method::Delete, api::key_path(&self.root, keydir)))?;
        }
        let request = KvRequest::new(Method::Delete, api::folder_path(&self.root, keydir)).with_query("recurse", "");
        self.send("deletetree", keydir, request)?;
        Ok(())
    }

    fn exists(&self, key: &str) -> BackendResult<bool> {
        if self.read_pair("exists", key)?.is_some() {
            return Ok(true);
        }
        self.is_folder("exists", key)
    }

    fn get(&self, key: &str) -> BackendResult<Vec<u8>> {
        if let Some(pair) = self.read_pair("get", key)? {
            return pair.decoded_value().map_err(|e| self.failure("get", key, e));
        }
        if self.is_folder("get", key)? {
            return Err(BackendError::is_folder(format!("'{}' is a folder, not a key", key)));
        }
        Err(BackendError::not_found(format!("key '{}' does not exist", key)))
    }

    fn list(&self, keydir: &str) -> BackendResult<Listing> {
        let Some(keys) = self.folder_keys("list", keydir)? else {
            if keydir.is_empty() {
                return Ok(Listing::default());
            }
            return Err(BackendError::not_found(format!("folder '{}' does not exist", keydir)));
        };

        let prefix = api::folder_path(&self.root, keydir)
            .trim_start_matches(api::KV_PATH)
            .trim_start_matches('/')
            .to_string();
        let (names, folders) = api::split_listing(&prefix, &keys);

        let mut listing = Listing {
            folders,
            ..Listing::default()
        };
        for name in names {
            let child = if keydir.is_empty() { name.clone() } else { format!("{}/{}", keydir, name) };
            match self.read_pair("list", &child).and_then(|pair| match pair {
                Some(pair) => pair.decoded_value().map(Some).map_err(|e| self.failure("list", &child, e)),
                None => Ok(None),
            }) {
                Ok(Some(value)) => {
                    listing.keys.insert(name, value);
                }
                // Deleted since the key listing was taken
                Ok(None) => {}
                Err(e) => log::debug!("Skipping key '{}' while listing: {}", child, e),
            }
        }
        Ok(listing)
    }

    fn put(&self, key: &str, value: &[u8]) -> BackendResult<()> {
        let request = KvRequest::new(Method::Put, api::key_path(&self.root, key)).with_body(value);
        let response = self.send("put", key, request)?;
        if response.is_not_found() || !self.answer("put", key, &response)? {
            return Err(BackendError::other(format!("put '{}' was rejected by consul", key)));
        }
        Ok(())
    }

    fn supports_atomic(&self) -> bool {
        true
    }

    fn atomic_get(&self, key: &str) -> BackendResult<AtomicEntry> {
        match self.read_pair("atomic_get", key)? {
            Some(pair) => {
                let value = pair.decoded_value().map_err(|e| self.failure("atomic_get", key, e))?;
                Ok(AtomicEntry::present(value, Version::new(pair.modify_index)))
            }
            None => Ok(AtomicEntry::absent()),
        }
    }

    fn atomic_put(&self, key: &str, value: &[u8], previous: Version) -> BackendResult<bool> {
        // cas=0 writes only when the key does not exist
        let cas = if previous.is_absent() { 0 } else { previous.value() };
        let request = KvRequest::new(Method::Put, api::key_path(&self.root, key))
            .with_query("cas", cas)
            .with_body(value);
        let response = self.send("atomic_put", key, request)?;
        if response.is_not_found() {
            return Ok(false);
        }
        self.answer("atomic_put", key, &response)
    }

    fn atomic_delete(&self, key: &str, previous: Version) -> BackendResult<bool> {
        // Consul acknowledges a cas delete of a missing key, so existence at
        // `previous` is checked first
        let Some(pair) = self.read_pair("atomic_delete", key)? else {
            return Ok(previous.is_absent());
        };
        if previous.is_absent() || pair.modify_index != previous.value() {
            log::debug!(
                "CAS miss on delete of '{}': expected version {}, found {}",
                key,
                previous,
                pair.modify_index
            );
            return Ok(false);
        }

        let request =
            KvRequest::new(Method::Delete, api::key_path(&self.root, key)).with_query("cas", previous.value());
        let response = self.send("atomic_delete", key, request)?;
        if response.is_not_found() {
            return Ok(false);
        }
        self.answer("atomic_delete", key, &response)
    }
}

/// Settings of a `consul` backend entry
#[derive(Debug, Clone, PartialEq)]
pub struct ConsulSettings {
    pub url: String,
    pub root: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl ConsulSettings {
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let setting_error = |e: kvault_core::ConfigError| BackendError::invalid_config(e.to_string());

        let timeout_secs = config
            .setting::<f64>("timeout_seconds")
            .map_err(setting_error)?
            .unwrap_or(DEFAULT_TIMEOUT_SECS as f64);
        if !timeout_secs.is_finite() || timeout_secs <= 0.0 {
            return Err(BackendError::invalid_config(format!(
                "timeout_seconds must be a positive number, got {}",
                timeout_secs
            )));
        }

        let url = config
            .setting::<String>("url")
            .map_err(setting_error)?
            .unwrap_or_else(|| DEFAULT_URL.to_string());
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(BackendError::invalid_config(format!("consul url '{}' must be http or https", url)));
        }

        Ok(Self {
            url,
            root: config
                .setting::<String>("root")
                .map_err(setting_error)?
                .unwrap_or_else(|| DEFAULT_ROOT.to_string()),
            token: config.setting::<String>("token").map_err(setting_error)?,
            timeout: Duration::from_secs_f64(timeout_secs),
        })
    }
}

/// Factory for [`ConsulBackend`], registered as type `consul`.
///
/// Instances live below `<root>/<id>`.
#[derive(Debug, Default)]
pub struct ConsulBackendFactory {
    transport: Option<Arc<dyn ConsulTransport>>,
}

impl ConsulBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send every request through `transport` instead of HTTP
    pub fn with_transport(transport: Arc<dyn ConsulTransport>) -> Self {
        Self { transport: Some(transport) }
    }
}

impl BackendFactory for ConsulBackendFactory {
    fn backend_type(&self) -> &'static str {
        CONSUL_BACKEND_TYPE
    }

    fn compatible_api_versions(&self) -> VersionReq {
        core_api_requirement()
    }

    fn create(&self, config: &ResolvedConfig) -> BackendResult<Arc<dyn Backend>> {
        let settings = ConsulSettings::from_config(config.backend_config())?;
        let id = config.backend_id();
        if id.is_empty() || id.contains('/') {
            return Err(BackendError::invalid_config(format!("consul backend id '{}' may not contain '/'", id)));
        }

        let transport = match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(UreqTransport::new(&settings.url, settings.token.clone(), settings.timeout))
                as Arc<dyn ConsulTransport>,
        };
        let root = api::consul_key(&settings.root, id);
        log::debug!("Consul backend '{}' at {} below '{}'", config.identity(), settings.url, root);

        Ok(Arc::new(ConsulBackend::new(&config.identity(), &root, transport)))
    }
}
