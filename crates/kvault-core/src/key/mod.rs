//! # kvault Key Normalizer
//!
//! Validates caller keys against the naming grammar and maps them in and out
//! of the namespace the backends actually store them under.
//!
//! A key is a forward-slash delimited path built from `[a-zA-Z0-9._:-/]`.
//! Before it reaches a backend it is prefixed with either
//! `environments/<env>/` or `globals/`, and the prefix is stripped again from
//! anything handed back to the caller.
pub mod error;

pub use error::KeyError;

/// Namespace prefix for keys shared across every environment
pub const GLOBAL_PREFIX: &str = "globals";

/// Namespace prefix for environment-scoped keys
pub const ENVIRONMENT_PREFIX: &str = "environments";

/// Which flavour of the key grammar to enforce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyGrammar {
    /// `[a-zA-Z0-9._:-/]`
    #[default]
    Standard,
    /// Same as [`KeyGrammar::Standard`] but uppercase letters are rejected,
    /// for backends whose storage is case-insensitive.
    Lowercase,
}

/// The namespace a key lives in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Shared across all environments, stored under `globals/`
    Global,
    /// Bound to one environment, stored under `environments/<env>/`.
    /// An empty environment name stores the key without any prefix.
    Environment(String),
}

impl Scope {
    /// Build the scope from the `environment` and `global` call options.
    /// `global` takes precedence over the environment.
    pub fn from_options(environment: &str, global: bool) -> Self {
        if global {
            Scope::Global
        } else {
            Scope::Environment(environment.to_string())
        }
    }

    /// The path prefix for this scope, if it has one
    pub fn prefix(&self) -> Option<String> {
        match self {
            Scope::Global => Some(GLOBAL_PREFIX.to_string()),
            Scope::Environment(env) if env.is_empty() => None,
            Scope::Environment(env) => Some(format!("{}/{}", ENVIRONMENT_PREFIX, env)),
        }
    }
}

/// Validate a key against the standard grammar
pub fn validate(key: &str) -> Result<(), KeyError> {
    validate_with(key, KeyGrammar::Standard)
}

/// Validate a key against the given grammar.
///
/// Checks run in a fixed order so the reported reason is stable: emptiness,
/// whitespace, character set, then relative path segments.
pub fn validate_with(key: &str, grammar: KeyGrammar) -> Result<(), KeyError> {
    if key.is_empty() {
        return Err(KeyError::Empty);
    }

    if key.chars().any(char::is_whitespace) {
        return Err(KeyError::Whitespace { key: key.to_string() });
    }

    for character in key.chars() {
        let allowed = character.is_ascii_alphanumeric() || matches!(character, '.' | '_' | ':' | '-' | '/');
        if !allowed {
            return Err(KeyError::InvalidCharacter { key: key.to_string(), character });
        }
        if grammar == KeyGrammar::Lowercase && character.is_ascii_uppercase() {
            return Err(KeyError::Uppercase { key: key.to_string(), character });
        }
    }

    if let Some(segment) = key.split('/').find(|segment| *segment == "." || *segment == "..") {
        return Err(KeyError::RelativeSegment {
            key: key.to_string(),
            segment: segment.to_string(),
        });
    }

    Ok(())
}

/// Prefix `key` with the namespace for `scope` and clean the result
pub fn normalize(key: &str, scope: &Scope) -> String {
    match scope.prefix() {
        Some(prefix) => clean_path(&format!("{}/{}", prefix, key)),
        None => clean_path(key),
    }
}

/// Exact inverse of [`normalize`] for keys that live inside `scope`.
///
/// A key outside the scope's namespace is returned cleaned but otherwise
/// untouched.
pub fn denormalize(normalized: &str, scope: &Scope) -> String {
    let cleaned = clean_path(normalized);
    let Some(prefix) = scope.prefix() else {
        return cleaned;
    };

    if cleaned == prefix {
        return String::new();
    }

    match cleaned.strip_prefix(&prefix).and_then(|rest| rest.strip_prefix('/')) {
        Some(rest) => rest.to_string(),
        None => cleaned,
    }
}

/// Collapse redundant slashes and drop leading/trailing slashes.
///
/// Keys are always relative to a backend's root, so a leading slash is never
/// meaningful.
pub fn clean_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether the caller addressed `key` as a folder (trailing slash)
pub fn is_folder_key(key: &str) -> bool {
    key.ends_with('/')
}
