//! # kvault Consul Backend
//!
//! Stores kvault keys in the Consul KV store. Each backend instance owns the
//! prefix `<root>/<id>`; a key is stored at `/v1/kv/<root>/<id>/<key>` with
//! its `ModifyIndex` as the version. Consul has no folders, so a folder
//! exists while any key lives below it.
//!
//! Compare-and-swap uses Consul's `cas` query parameter, which the server
//! checks atomically; `cas=0` only writes a key that does not exist yet.
pub mod api;
pub mod backend;
pub mod transport;

pub use api::{ConsulError, KvPair, KvRequest, KvResponse, Method};
pub use backend::{ConsulBackend, ConsulBackendFactory, ConsulSettings};
pub use transport::{ConsulTransport, UreqTransport};

/// Backend type this plugin registers
pub const CONSUL_BACKEND_TYPE: &str = "consul";

pub const DEFAULT_URL: &str = "http://127.0.0.1:8500";
pub const DEFAULT_ROOT: &str = "kvault";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Header carrying the ACL token
pub const TOKEN_HEADER: &str = "X-Consul-Token";
