//! # kvault LDAP Backend
//!
//! Stores kvault keys in an LDAP directory. Each backend instance owns the
//! subtree `ou=<id>,<base_dn>`; folders are `organizationalUnit` entries and
//! keys are `kvEntry` leaves carrying the stored envelope and a version.
//!
//! The directory needs a schema providing the `kvEntry` object class with the
//! `kvKey`, `kvJsonValue` and `kvVersion` attributes, and must support the
//! LDAP assertion control for compare-and-swap.
//!
//! ## Modules
//!
//! - **[`client`]**: the [`DirectoryClient`] trait and LDAP result codes.
//! - **[`tools`]**: [`LdapToolClient`], driving the OpenLDAP command-line
//!   tools.
//! - **[`ldif`]**: LDIF reading and writing for those tools.
//! - **[`backend`]**: [`LdapBackend`] and its factory.
pub mod backend;
pub mod client;
pub mod ldif;
pub mod tools;

pub use backend::{LdapBackend, LdapBackendFactory, LdapSettings};
pub use client::{DirectoryClient, DirectoryEntry, LdapError, LdapResult, Modification, ResultCode, SearchScope};
pub use tools::{LdapToolClient, ToolSettings};

/// Backend type this plugin registers
pub const LDAP_BACKEND_TYPE: &str = "ldap";

pub const KEY_OBJECT_CLASS: &str = "kvEntry";
pub const FOLDER_ATTRIBUTE: &str = "ou";
pub const KEY_ATTRIBUTE: &str = "kvKey";
pub const VALUE_ATTRIBUTE: &str = "kvJsonValue";
pub const VERSION_ATTRIBUTE: &str = "kvVersion";
