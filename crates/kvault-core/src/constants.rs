/// Application name
pub const APP_NAME: &str = "kvault";

/// Current backend plugin API version
pub const API_VERSION: &str = "0.1.0";

/// Backend name used when nothing more specific matches
pub const DEFAULT_BACKEND_NAME: &str = "default";

/// Id given to the backend synthesized when no backends are configured
pub const AUTO_DEFAULT_ID: &str = "auto_default";

/// Environment assumed when the host does not supply one
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// Backend type of the built-in filesystem backend
pub const FILE_BACKEND_TYPE: &str = "file";

/// Backend type of the built-in in-memory backend
pub const MEMORY_BACKEND_TYPE: &str = "memory";

/// Default bounded wait for filesystem key locks, in seconds
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 5;

/// Well-known system root preferred by the filesystem backend
pub const DEFAULT_PREFERRED_ROOT: &str = "/var/lib/kvault";

/// Mode applied to key files after every write
pub const KEY_FILE_MODE: u32 = 0o640;

/// Mode applied to folders the filesystem backend creates
pub const FOLDER_MODE: u32 = 0o750;
