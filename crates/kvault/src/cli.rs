//! Command-line surface: argument definitions, value input and JSON output.
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Args, Parser, Subcommand};
use kvault_core::{AtomicValue, KeyListing, Metadata, Options, SerializationError, StoredValue, Value};

/// kvault: hierarchical, versioned key-value store over pluggable backends
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Process defaults (JSON, YAML or TOML, by extension)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Use this named backend instead of selecting one
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// Application id, matched against backend names by prefix
    #[arg(long, global = true)]
    pub app_id: Option<String>,

    /// Caller identity, used when no backend matches the application id
    #[arg(long, global = true)]
    pub caller: Option<String>,

    /// Environment namespace for keys
    #[arg(long, global = true)]
    pub environment: Option<String>,

    /// Address the global namespace instead of an environment
    #[arg(long, global = true)]
    pub global: bool,

    /// Print an empty result instead of failing when a backend fails
    #[arg(long, global = true)]
    pub softfail: bool,

    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Log JSON lines to stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the value and metadata stored at a key
    Get { key: String },
    /// Store a value at a key
    Put {
        key: String,
        #[command(flatten)]
        input: ValueInput,
    },
    /// Remove a key
    Delete { key: String },
    /// Remove a folder and everything below it
    Deletetree { keydir: String },
    /// Print whether a key or folder exists
    Exists { key: String },
    /// Print the keys and folders one level below a folder
    List { keydir: String },
    /// Print the value at a key together with its version
    AtomicGet { key: String },
    /// Store a value iff the key is still at the given version
    AtomicPut {
        key: String,
        #[command(flatten)]
        input: ValueInput,
        /// Version read by atomic-get; -1 for an absent key
        #[arg(long, allow_negative_numbers = true)]
        previous: i64,
    },
    /// Store a value iff the key does not exist
    AtomicCreate {
        key: String,
        #[command(flatten)]
        input: ValueInput,
    },
    /// Remove a key iff it is still at the given version
    AtomicDelete {
        key: String,
        #[arg(long, allow_negative_numbers = true)]
        previous: i64,
    },
}

/// The value to store: JSON by default, or a literal string or base64 bytes
#[derive(Args, Debug)]
pub struct ValueInput {
    /// Value as JSON, e.g. '{"port": 8080}' or '"text"'
    #[arg(required_unless_present_any = ["string", "base64"], conflicts_with_all = ["string", "base64"])]
    pub value: Option<String>,

    /// Value as a literal string
    #[arg(long, conflicts_with = "base64")]
    pub string: Option<String>,

    /// Value as base64-encoded bytes
    #[arg(long)]
    pub base64: Option<String>,

    /// Metadata as a JSON object
    #[arg(long)]
    pub metadata: Option<String>,
}

impl ValueInput {
    pub fn value(&self) -> Result<Value, String> {
        if let Some(text) = &self.string {
            return Ok(Value::String(text.clone()));
        }
        if let Some(encoded) = &self.base64 {
            let bytes = STANDARD
                .decode(encoded.trim())
                .map_err(|e| format!("--base64 is not valid base64: {}", e))?;
            return Ok(Value::Binary(bytes));
        }
        let json = self.value.as_deref().ok_or("no value given")?;
        let parsed: serde_json::Value =
            serde_json::from_str(json).map_err(|e| format!("value is not valid JSON: {}", e))?;
        Value::from_json(parsed).map_err(|e| format!("value cannot be stored: {}", e))
    }

    pub fn metadata(&self) -> Result<Metadata, String> {
        match &self.metadata {
            Some(json) => serde_json::from_str(json).map_err(|e| format!("--metadata must be a JSON object: {}", e)),
            None => Ok(Metadata::new()),
        }
    }
}

impl CliArgs {
    /// Per-call options from the global flags
    pub fn call_options(&self) -> Options {
        let mut options = Options::new();
        if let Some(backend) = &self.backend {
            options = options.with_backend(backend);
        }
        if let Some(app_id) = &self.app_id {
            options = options.with_app_id(app_id);
        }
        if let Some(environment) = &self.environment {
            options = options.with_environment(environment);
        }
        if self.global {
            options = options.with_global(true);
        }
        if self.softfail {
            options = options.with_softfail(true);
        }
        options
    }
}

/// JSON form of a stored value. Binary values are base64 with an
/// `encoding` marker.
pub fn stored_json(stored: &StoredValue) -> Result<serde_json::Value, SerializationError> {
    let mut object = serde_json::Map::new();
    match &stored.value {
        Value::Binary(bytes) => {
            object.insert("value".to_string(), serde_json::Value::String(STANDARD.encode(bytes)));
            object.insert("encoding".to_string(), serde_json::Value::String("base64".to_string()));
        }
        value => {
            object.insert("value".to_string(), value.to_json()?);
        }
    }
    object.insert(
        "metadata".to_string(),
        serde_json::Value::Object(stored.metadata.clone().into_iter().collect()),
    );
    Ok(serde_json::Value::Object(object))
}

pub fn atomic_json(atomic: &AtomicValue) -> Result<serde_json::Value, SerializationError> {
    let mut json = match &atomic.value {
        Some(stored) => stored_json(stored)?,
        None => serde_json::json!({ "value": null, "metadata": {} }),
    };
    if let serde_json::Value::Object(object) = &mut json {
        object.insert("version".to_string(), serde_json::Value::from(atomic.version.value()));
    }
    Ok(json)
}

pub fn listing_json(listing: &KeyListing) -> Result<serde_json::Value, SerializationError> {
    let mut keys = serde_json::Map::new();
    for (name, stored) in &listing.keys {
        keys.insert(name.clone(), stored_json(stored)?);
    }
    Ok(serde_json::json!({
        "folder": listing.folder,
        "keys": keys,
        "folders": listing.folders,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use kvault_core::Version;

    fn input(value: Option<&str>, string: Option<&str>, base64: Option<&str>) -> ValueInput {
        ValueInput {
            value: value.map(str::to_string),
            string: string.map(str::to_string),
            base64: base64.map(str::to_string),
            metadata: None,
        }
    }

    #[test]
    fn test_cli_definition_is_valid() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_value_input_forms() {
        assert_eq!(input(Some("42"), None, None).value().unwrap(), Value::Integer(42));
        assert_eq!(input(Some("\"hi\""), None, None).value().unwrap(), Value::from("hi"));
        assert_eq!(input(None, Some("42"), None).value().unwrap(), Value::from("42"));
        assert_eq!(input(None, None, Some("AP8=")).value().unwrap(), Value::Binary(vec![0, 255]));

        assert!(input(Some("{bad"), None, None).value().is_err());
        assert!(input(Some("null"), None, None).value().is_err());
        assert!(input(None, None, Some("***")).value().is_err());
    }

    #[test]
    fn test_metadata_must_be_an_object() {
        let mut with_metadata = input(Some("1"), None, None);
        with_metadata.metadata = Some(r#"{"owner":"ops"}"#.to_string());
        assert_eq!(with_metadata.metadata().unwrap()["owner"], "ops");

        with_metadata.metadata = Some("[1]".to_string());
        assert!(with_metadata.metadata().is_err());
    }

    #[test]
    fn test_flags_become_call_options() {
        let args = CliArgs::try_parse_from([
            "kvault", "--app-id", "myapp", "--global", "--softfail", "get", "a/b",
        ])
        .unwrap();
        let options = args.call_options();
        assert_eq!(options.app_id.as_deref(), Some("myapp"));
        assert_eq!(options.global, Some(true));
        assert_eq!(options.softfail, Some(true));
        assert_eq!(options.backend, None);
        assert_eq!(options.environment, None);
    }

    #[test]
    fn test_negative_previous_version_parses() {
        let args = CliArgs::try_parse_from(["kvault", "atomic-put", "k", "1", "--previous", "-1"]).unwrap();
        assert!(matches!(args.command, Command::AtomicPut { previous: -1, .. }));
    }

    #[test]
    fn test_value_sources_are_exclusive() {
        assert!(CliArgs::try_parse_from(["kvault", "put", "k", "1", "--string", "x"]).is_err());
        assert!(CliArgs::try_parse_from(["kvault", "put", "k"]).is_err());
    }

    #[test]
    fn test_json_rendering() {
        let binary = StoredValue::new(Value::Binary(vec![0, 255]), Metadata::new());
        let json = stored_json(&binary).unwrap();
        assert_eq!(json["value"], "AP8=");
        assert_eq!(json["encoding"], "base64");

        let absent = AtomicValue { value: None, version: Version::ABSENT };
        let json = atomic_json(&absent).unwrap();
        assert!(json["value"].is_null());
        assert_eq!(json["version"], -1);
    }
}
