use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use semver::VersionReq;

use crate::config::{BackendConfig, ResolvedConfig};
use crate::constants::{
    APP_NAME, DEFAULT_LOCK_TIMEOUT_SECS, DEFAULT_PREFERRED_ROOT, FILE_BACKEND_TYPE, FOLDER_MODE, KEY_FILE_MODE,
};
use crate::plugin_system::traits::{Backend, BackendError, BackendFactory, BackendResult, Listing};
use crate::utils::{create_dir_all_with_mode, set_file_mode};

/// How often a contended lock is retried while waiting
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Stores each key as a file under a root directory.
///
/// Every read and write of a key file holds an exclusive advisory lock on
/// it, so readers and writers exclude each other across threads and
/// processes. Lock acquisition waits at most `lock_timeout`.
#[derive(Debug)]
pub struct FileBackend {
    identity: String,
    root: PathBuf,
    lock_timeout: Duration,
}

impl FileBackend {
    /// Create a backend rooted at an existing or creatable directory
    pub fn new(identity: &str, root: PathBuf, lock_timeout: Duration) -> BackendResult<Self> {
        create_dir_all_with_mode(&root, FOLDER_MODE).map_err(|e| {
            BackendError::invalid_config(format!("cannot create root directory {}: {}", root.display(), e))
        })?;
        Ok(Self {
            identity: identity.to_string(),
            root,
            lock_timeout,
        })
    }

    /// Configure from a backend entry, resolving the root directory.
    ///
    /// An explicit `root_path` must be usable. Otherwise `preferred_root` is
    /// used when it exists and a subdirectory can be created in it, and
    /// `fallback_root` when not.
    pub fn from_config(identity: &str, id: &str, config: &BackendConfig) -> BackendResult<Self> {
        let setting_error = |e: crate::config::ConfigError| BackendError::invalid_config(e.to_string());

        let timeout_secs = config
            .setting::<f64>("lock_timeout_seconds")
            .map_err(setting_error)?
            .unwrap_or(DEFAULT_LOCK_TIMEOUT_SECS as f64);
        if !timeout_secs.is_finite() || timeout_secs < 0.0 {
            return Err(BackendError::invalid_config(format!(
                "lock_timeout_seconds must be a non-negative number, got {}",
                timeout_secs
            )));
        }
        let lock_timeout = Duration::from_secs_f64(timeout_secs);

        if let Some(root_path) = config.setting::<PathBuf>("root_path").map_err(setting_error)? {
            return Self::new(identity, root_path, lock_timeout);
        }

        let preferred = config
            .setting::<PathBuf>("preferred_root")
            .map_err(setting_error)?
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PREFERRED_ROOT));
        if preferred.is_dir() {
            let root = preferred.join(FILE_BACKEND_TYPE).join(id);
            match create_dir_all_with_mode(&root, FOLDER_MODE) {
                Ok(()) => return Self::new(identity, root, lock_timeout),
                Err(e) => log::debug!("Preferred root {} unusable ({}); using fallback", root.display(), e),
            }
        }

        let fallback = config
            .setting::<PathBuf>("fallback_root")
            .map_err(setting_error)?
            .unwrap_or_else(default_fallback_root);
        Self::new(identity, fallback.join(FILE_BACKEND_TYPE).join(id), lock_timeout)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    fn key_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    /// Wait up to `lock_timeout` for an exclusive lock on `file`. The lock is
    /// released when the file is closed.
    fn lock_exclusive(&self, file: &File, key: &str) -> BackendResult<()> {
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match fs2::FileExt::try_lock_exclusive(file) {
                Ok(()) => return Ok(()),
                Err(e) if is_contended(&e) => {
                    if Instant::now() >= deadline {
                        return Err(BackendError::lock_timeout(format!(
                            "timed out waiting for lock on key '{}' after {:?}",
                            key, self.lock_timeout
                        )));
                    }
                    thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => return Err(BackendError::from_io(&e, format_args!("failed to lock key '{}'", key))),
            }
        }
    }
}

impl Backend for FileBackend {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn delete(&self, key: &str) -> BackendResult<()> {
        let path = self.key_path(key);
        if path.is_dir() {
            return Err(BackendError::is_folder(format!("'{}' is a folder, not a key", key)));
        }
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackendError::from_io(&e, format_args!("failed to delete key '{}'", key))),
        }
    }

    fn deletetree(&self, keydir: &str) -> BackendResult<()> {
        let path = self.key_path(keydir);
        let result = if path.is_file() {
            fs::remove_file(&path)
        } else {
            fs::remove_dir_all(&path)
        };
        match result {
            Ok(()) => Ok(()),
            // Another actor removed it first
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackendError::from_io(&e, format_args!("failed to delete folder '{}'", keydir))),
        }
    }

    fn exists(&self, key: &str) -> BackendResult<bool> {
        self.key_path(key)
            .try_exists()
            .map_err(|e| BackendError::from_io(&e, format_args!("failed to check key '{}'", key)))
    }

    fn get(&self, key: &str) -> BackendResult<Vec<u8>> {
        let path = self.key_path(key);
        if path.is_dir() {
            return Err(BackendError::is_folder(format!("'{}' is a folder, not a key", key)));
        }

        let mut file = File::open(&path).map_err(|e| BackendError::from_io(&e, format_args!("failed to read key '{}'", key)))?;
        self.lock_exclusive(&file, key)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(|e| BackendError::from_io(&e, format_args!("failed to read key '{}'", key)))?;
        Ok(contents)
    }

    fn list(&self, keydir: &str) -> BackendResult<Listing> {
        let path = self.key_path(keydir);
        let entries = fs::read_dir(&path)
            .map_err(|e| BackendError::from_io(&e, format_args!("failed to list folder '{}'", keydir)))?;

        let mut listing = Listing::default();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::debug!("Skipping unreadable entry in '{}': {}", keydir, e);
                    continue;
                }
            };
            let Ok(name) = entry.file_name().into_string() else {
                log::debug!("Skipping non UTF-8 entry in '{}'", keydir);
                continue;
            };

            if entry.path().is_dir() {
                listing.folders.push(name);
                continue;
            }

            let child = if keydir.is_empty() { name.clone() } else { format!("{}/{}", keydir, name) };
            match self.get(&child) {
                Ok(contents) => {
                    listing.keys.insert(name, contents);
                }
                Err(e) => log::debug!("Skipping key '{}' while listing: {}", child, e),
            }
        }
        listing.folders.sort();
        Ok(listing)
    }

    fn put(&self, key: &str, value: &[u8]) -> BackendResult<()> {
        let path = self.key_path(key);
        if path.is_dir() {
            return Err(BackendError::is_folder(format!("'{}' is a folder, not a key", key)));
        }
        if let Some(parent) = path.parent() {
            create_dir_all_with_mode(parent, FOLDER_MODE)
                .map_err(|e| BackendError::from_io(&e, format_args!("failed to create folder for key '{}'", key)))?;
        }

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|e| BackendError::from_io(&e, format_args!("failed to open key '{}'", key)))?;

            // Nothing is modified before the lock is held
            self.lock_exclusive(&file, key)?;

            let write = |file: &mut File| -> io::Result<()> {
                file.set_len(0)?;
                file.seek(SeekFrom::Start(0))?;
                file.write_all(value)?;
                file.flush()?;
                file.sync_data()
            };
            write(&mut file).map_err(|e| BackendError::from_io(&e, format_args!("failed to write key '{}'", key)))?;
        }

        if let Err(e) = set_file_mode(&path, KEY_FILE_MODE) {
            log::warn!("Failed to set permissions on {}: {}", path.display(), e);
        }
        Ok(())
    }
}

fn is_contended(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::WouldBlock
        || error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn default_fallback_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}

/// Factory for [`FileBackend`], registered as type `file`
#[derive(Debug, Default)]
pub struct FileBackendFactory;

impl BackendFactory for FileBackendFactory {
    fn backend_type(&self) -> &'static str {
        FILE_BACKEND_TYPE
    }

    fn compatible_api_versions(&self) -> VersionReq {
        super::core_api_requirement()
    }

    fn create(&self, config: &ResolvedConfig) -> BackendResult<Arc<dyn Backend>> {
        let backend = FileBackend::from_config(&config.identity(), config.backend_id(), config.backend_config())?;
        log::debug!("File backend '{}' rooted at {}", backend.identity, backend.root.display());
        Ok(Arc::new(backend))
    }
}
