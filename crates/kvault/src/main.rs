mod cli; // Declare the cli module

use std::process::ExitCode;
use std::sync::Arc;

use backend_consul::ConsulBackendFactory;
use backend_ldap::LdapBackendFactory;
use clap::Parser;
use core_logging::LoggingConfig;
use kvault_core::{BackendFactory, CallerContext, KvAdapter, KvError, Options, PluginCatalog, Version};
use log::debug;

use cli::{CliArgs, Command};

/// Failure of one invocation, printed as `error: [<category>] <message>`
struct Failure {
    category: String,
    message: String,
}

impl From<KvError> for Failure {
    fn from(e: KvError) -> Self {
        Failure {
            category: e.category().to_string(),
            message: e.to_string(),
        }
    }
}

impl Failure {
    fn usage(message: impl Into<String>) -> Self {
        Failure {
            category: "UsageError".to_string(),
            message: message.into(),
        }
    }
}

/// Builtin backends plus the statically linked plugins
fn build_catalog() -> Result<PluginCatalog, Failure> {
    let mut catalog = PluginCatalog::with_builtin_backends();
    let plugins: [Arc<dyn BackendFactory>; 2] =
        [Arc::new(LdapBackendFactory::new()), Arc::new(ConsulBackendFactory::new())];
    for factory in plugins {
        catalog.register(factory).map_err(|e| Failure {
            category: "ConstructionError".to_string(),
            message: e.to_string(),
        })?;
    }
    debug!("Backend types available: {}", catalog.backend_types().join(", "));
    Ok(catalog)
}

fn load_defaults(args: &CliArgs) -> Result<Options, Failure> {
    match &args.config {
        Some(path) => Options::load(path).map_err(|e| Failure {
            category: "ConfigError".to_string(),
            message: e.to_string(),
        }),
        None => Ok(Options::new()),
    }
}

fn render(json: Result<serde_json::Value, kvault_core::SerializationError>) -> Result<String, Failure> {
    let json = json.map_err(|e| Failure {
        category: "SerializationError".to_string(),
        message: e.to_string(),
    })?;
    serde_json::to_string_pretty(&json).map_err(|e| Failure::usage(e.to_string()))
}

fn run(args: &CliArgs) -> Result<String, Failure> {
    let catalog = Arc::new(build_catalog()?);
    let defaults = load_defaults(args)?;
    let mut context = CallerContext::default();
    if let Some(caller) = &args.caller {
        context = context.with_caller(caller);
    }

    // One invocation is one unit of work
    let adapter = KvAdapter::new(catalog, defaults, context);
    let options = args.call_options();

    let output = match &args.command {
        Command::Get { key } => match adapter.get(key, &options)? {
            Some(stored) => render(cli::stored_json(&stored))?,
            None => "null".to_string(),
        },
        Command::Put { key, input } => {
            let value = input.value().map_err(Failure::usage)?;
            let metadata = input.metadata().map_err(Failure::usage)?;
            adapter.put(key, &value, &metadata, &options)?.to_string()
        }
        Command::Delete { key } => adapter.delete(key, &options)?.to_string(),
        Command::Deletetree { keydir } => adapter.deletetree(keydir, &options)?.to_string(),
        Command::Exists { key } => match adapter.exists(key, &options)? {
            Some(found) => found.to_string(),
            None => "null".to_string(),
        },
        Command::List { keydir } => match adapter.list(keydir, &options)? {
            Some(listing) => render(cli::listing_json(&listing))?,
            None => "null".to_string(),
        },
        Command::AtomicGet { key } => match adapter.atomic_get(key, &options)? {
            Some(atomic) => render(cli::atomic_json(&atomic))?,
            None => "null".to_string(),
        },
        Command::AtomicPut { key, input, previous } => {
            let value = input.value().map_err(Failure::usage)?;
            let metadata = input.metadata().map_err(Failure::usage)?;
            adapter
                .atomic_put(key, &value, &metadata, Version::new(*previous), &options)?
                .to_string()
        }
        Command::AtomicCreate { key, input } => {
            let value = input.value().map_err(Failure::usage)?;
            let metadata = input.metadata().map_err(Failure::usage)?;
            adapter.atomic_create(key, &value, &metadata, &options)?.to_string()
        }
        Command::AtomicDelete { key, previous } => {
            adapter.atomic_delete(key, Version::new(*previous), &options)?.to_string()
        }
    };
    Ok(output)
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let logging = LoggingConfig::new(&args.log_level).with_json(args.json_logs);
    if let Err(e) = core_logging::init(&logging) {
        eprintln!("warning: {}", e);
    }

    match run(&args) {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(failure) => {
            eprintln!("error: [{}] {}", failure.category, failure.message);
            ExitCode::FAILURE
        }
    }
}
