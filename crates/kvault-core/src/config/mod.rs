//! # kvault Config Resolver
//!
//! Merges per-call [`Options`] over process-wide defaults, selects the
//! backend entry a call applies to and validates it before any backend is
//! touched.
//!
//! ## Key Submodules:
//!
//! - **[`options`]**: [`Options`] and [`BackendConfig`], the serde shapes of
//!   call options, defaults and backend entries.
//! - **[`resolver`]**: [`resolve`], producing a [`ResolvedConfig`].
//! - **[`format`]**: [`ConfigFormat`] and loading defaults from JSON, YAML or
//!   TOML files.
//! - **[`error`]**: [`ConfigError`].
pub mod error;
pub mod format;
pub mod options;
pub mod resolver;

pub use error::ConfigError;
pub use format::ConfigFormat;
pub use options::{BackendConfig, Options};
pub use resolver::{resolve, select_backend_name, CallerContext, ResolvedConfig};
