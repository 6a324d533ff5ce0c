use std::collections::BTreeMap;

use crate::config::error::ConfigError;
use crate::config::options::{BackendConfig, Options};
use crate::constants::{AUTO_DEFAULT_ID, DEFAULT_BACKEND_NAME, DEFAULT_ENVIRONMENT, FILE_BACKEND_TYPE};
use crate::key::{self, Scope};

/// What the hosting environment knows about the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    /// The caller's current environment namespace
    pub environment: String,
    /// Identity of the invoking resource, if any. A backend with exactly
    /// this name is preferred over `default`.
    pub caller: Option<String>,
}

impl CallerContext {
    pub fn new(environment: &str) -> Self {
        Self { environment: environment.to_string(), caller: None }
    }

    pub fn with_caller(mut self, caller: &str) -> Self {
        self.caller = Some(caller.to_string());
        self
    }
}

impl Default for CallerContext {
    fn default() -> Self {
        Self::new(DEFAULT_ENVIRONMENT)
    }
}

/// The effective configuration for one call
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    /// Name of the selected backend entry
    pub backend: String,
    /// All backend entries after merging
    pub backends: BTreeMap<String, BackendConfig>,
    pub app_id: Option<String>,
    pub environment: String,
    pub global: bool,
    pub softfail: bool,
    backend_type: String,
    backend_id: String,
}

impl ResolvedConfig {
    /// The selected backend entry
    pub fn backend_config(&self) -> &BackendConfig {
        // The resolver only builds a ResolvedConfig around an existing entry
        &self.backends[&self.backend]
    }

    pub fn backend_type(&self) -> &str {
        &self.backend_type
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// `<type>/<id>` of the selected backend
    pub fn identity(&self) -> String {
        format!("{}/{}", self.backend_type, self.backend_id)
    }

    /// Key namespace implied by `environment` and `global`
    pub fn scope(&self) -> Scope {
        Scope::from_options(&self.environment, self.global)
    }
}

/// Merge call options over process defaults, pick the backend and validate.
///
/// `available_types` are the backend types the plugin catalog has loaded.
pub fn resolve(
    call: &Options,
    defaults: &Options,
    available_types: &[String],
    context: &CallerContext,
) -> Result<ResolvedConfig, ConfigError> {
    let merged = defaults.merged_with(call);

    let mut backends = merged.backends.clone().unwrap_or_default();
    if backends.is_empty() {
        log::debug!(
            "No backends configured; using {} backend '{}'",
            FILE_BACKEND_TYPE,
            AUTO_DEFAULT_ID
        );
        backends.insert(
            DEFAULT_BACKEND_NAME.to_string(),
            BackendConfig::new(FILE_BACKEND_TYPE, AUTO_DEFAULT_ID),
        );
    }

    let backend = select_backend_name(&merged, &backends, context);

    let Some(selected) = backends.get(&backend) else {
        return Err(ConfigError::UnknownBackend {
            name: backend,
            configured: backends.keys().cloned().collect(),
        });
    };

    let backend_id = selected.id.clone().ok_or_else(|| ConfigError::MissingField {
        backend: backend.clone(),
        field: "id".to_string(),
    })?;
    let backend_type = selected.backend_type.clone().ok_or_else(|| ConfigError::MissingField {
        backend: backend.clone(),
        field: "type".to_string(),
    })?;

    if !available_types.iter().any(|t| *t == backend_type) {
        return Err(ConfigError::UnsupportedType {
            backend: backend.clone(),
            backend_type,
            available: available_types.to_vec(),
        });
    }

    check_unique_identities(&backends)?;

    let environment = merged.environment.clone().unwrap_or_else(|| context.environment.clone());
    check_environment(&environment)?;

    Ok(ResolvedConfig {
        backend,
        backends,
        app_id: merged.app_id.clone(),
        environment,
        global: merged.global.unwrap_or(false),
        softfail: merged.softfail.unwrap_or(false),
        backend_type,
        backend_id,
    })
}

/// Pick the backend name, in priority order: explicit `backend`, `app_id`
/// match (exact, then longest prefix), a backend named after the caller, and
/// finally `default`.
pub fn select_backend_name(
    options: &Options,
    backends: &BTreeMap<String, BackendConfig>,
    context: &CallerContext,
) -> String {
    if let Some(explicit) = &options.backend {
        return explicit.clone();
    }

    if let Some(app_id) = options.app_id.as_deref().filter(|id| !id.is_empty()) {
        if backends.contains_key(app_id) {
            return app_id.to_string();
        }

        let longest_prefix = backends
            .keys()
            .filter(|name| !name.is_empty() && app_id.starts_with(name.as_str()))
            .max_by_key(|name| name.len());
        if let Some(name) = longest_prefix {
            return name.clone();
        }
    }

    if let Some(caller) = &context.caller {
        if backends.contains_key(caller) {
            return caller.clone();
        }
    }

    DEFAULT_BACKEND_NAME.to_string()
}

/// The environment becomes a single path segment of every scoped key. Empty
/// is allowed and means "no environment prefix".
fn check_environment(environment: &str) -> Result<(), ConfigError> {
    if environment.is_empty() {
        return Ok(());
    }

    let invalid = |message: String| ConfigError::InvalidEnvironment {
        environment: environment.to_string(),
        message,
    };
    if environment.contains('/') {
        return Err(invalid("must be a single path segment".to_string()));
    }
    key::validate(environment).map_err(|e| invalid(e.to_string()))
}

/// Only one live instance may exist per `(type, id)`, so entries sharing an
/// identity must agree on every other field.
fn check_unique_identities(backends: &BTreeMap<String, BackendConfig>) -> Result<(), ConfigError> {
    let mut seen: BTreeMap<(String, String), (&String, &BackendConfig)> = BTreeMap::new();

    for (name, config) in backends {
        let (Some(backend_type), Some(id)) = (&config.backend_type, &config.id) else {
            continue;
        };

        match seen.get(&(backend_type.clone(), id.clone())) {
            Some((first_name, first_config)) if first_config.settings != config.settings => {
                return Err(ConfigError::Conflict {
                    backend_type: backend_type.clone(),
                    id: id.clone(),
                    first: (*first_name).clone(),
                    second: name.clone(),
                });
            }
            Some(_) => {}
            None => {
                seen.insert((backend_type.clone(), id.clone()), (name, config));
            }
        }
    }

    Ok(())
}
