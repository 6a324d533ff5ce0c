use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;

/// Configuration of one named backend entry.
///
/// `type` and `id` are optional at this level so a missing field can be
/// reported by name during resolution instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub backend_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Type-specific fields
    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl BackendConfig {
    pub fn new(backend_type: &str, id: &str) -> Self {
        Self {
            backend_type: Some(backend_type.to_string()),
            id: Some(id.to_string()),
            settings: serde_json::Map::new(),
        }
    }

    /// Builder-style setter for a type-specific field
    pub fn with_setting(mut self, field: &str, value: impl Into<serde_json::Value>) -> Self {
        self.settings.insert(field.to_string(), value.into());
        self
    }

    /// `<type>/<id>`, when both are present
    pub fn identity(&self) -> Option<String> {
        match (&self.backend_type, &self.id) {
            (Some(backend_type), Some(id)) => Some(format!("{}/{}", backend_type, id)),
            _ => None,
        }
    }

    /// Typed lookup of a type-specific field. `Ok(None)` when unset.
    pub fn setting<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>, ConfigError> {
        match self.settings.get(field) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| ConfigError::InvalidSetting {
                backend: self.identity().unwrap_or_else(|| "<unnamed>".to_string()),
                field: field.to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Overlay `other` onto this entry, `other` winning field by field
    pub fn merge(&mut self, other: &BackendConfig) {
        if other.backend_type.is_some() {
            self.backend_type = other.backend_type.clone();
        }
        if other.id.is_some() {
            self.id = other.id.clone();
        }
        for (field, value) in &other.settings {
            self.settings.insert(field.clone(), value.clone());
        }
    }
}

/// Per-call options, and the shape of process-wide defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Explicit backend name to use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Named backend configurations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backends: Option<BTreeMap<String, BackendConfig>>,
    /// Application identifier used for prefix matching against backend names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    /// Environment namespace; defaults to the caller's current environment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Store the key in the global namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global: Option<bool>,
    /// Downgrade backend failures to a warning and an empty result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub softfail: Option<bool>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, name: &str) -> Self {
        self.backend = Some(name.to_string());
        self
    }

    pub fn with_backend_config(mut self, name: &str, config: BackendConfig) -> Self {
        self.backends.get_or_insert_with(BTreeMap::new).insert(name.to_string(), config);
        self
    }

    pub fn with_app_id(mut self, app_id: &str) -> Self {
        self.app_id = Some(app_id.to_string());
        self
    }

    pub fn with_environment(mut self, environment: &str) -> Self {
        self.environment = Some(environment.to_string());
        self
    }

    pub fn with_global(mut self, global: bool) -> Self {
        self.global = Some(global);
        self
    }

    pub fn with_softfail(mut self, softfail: bool) -> Self {
        self.softfail = Some(softfail);
        self
    }

    /// Overlay `call` onto `self`.
    ///
    /// Scalar fields are replaced wholesale when set in `call`; the
    /// `backends` map is merged per backend name and, within a name, per
    /// field.
    pub fn merged_with(&self, call: &Options) -> Options {
        let mut merged = self.clone();

        if call.backend.is_some() {
            merged.backend = call.backend.clone();
        }
        if call.app_id.is_some() {
            merged.app_id = call.app_id.clone();
        }
        if call.environment.is_some() {
            merged.environment = call.environment.clone();
        }
        if call.global.is_some() {
            merged.global = call.global;
        }
        if call.softfail.is_some() {
            merged.softfail = call.softfail;
        }

        if let Some(call_backends) = &call.backends {
            let backends = merged.backends.get_or_insert_with(BTreeMap::new);
            for (name, config) in call_backends {
                backends
                    .entry(name.clone())
                    .and_modify(|existing| existing.merge(config))
                    .or_insert_with(|| config.clone());
            }
        }

        merged
    }
}
