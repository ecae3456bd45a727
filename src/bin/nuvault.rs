//! nuvault - registry administration CLI
//!
//! Operates directly on a registry's data directory, with the same
//! authentication and lifecycle rules a server applies.
//!
//! ## Usage
//!
//! ```sh
//! nuvault [--config <file>] push <package.nupkg> --key <api-key>
//! nuvault [--config <file>] push-symbols <package.snupkg> --key <api-key>
//! nuvault [--config <file>] versions <id> [--all]
//! nuvault [--config <file>] delete|unlist|relist <id> <version> --key <api-key>
//! nuvault signature <file.pdb>
//! ```
//!
//! ## Logging
//!
//! Log level comes from `NUVAULT_LOG` (`error`, `warn`, `info`, `debug`,
//! `trace`); the default is `info`.

use nuvault::{AuthOutcome, LifecycleOutcome, Principal, PublishOutcome, Registry, ServerConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

// =============================================================================
// Constants
// =============================================================================

/// Environment variable holding the log level.
const LOG_ENV: &str = "NUVAULT_LOG";

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Lifecycle {
    Delete,
    Unlist,
    Relist,
}

#[derive(Debug)]
enum Command {
    Push {
        file: PathBuf,
        key: String,
        symbols: bool,
    },
    Versions {
        id: String,
        all: bool,
    },
    Lifecycle {
        operation: Lifecycle,
        id: String,
        version: String,
        key: String,
    },
    Signature {
        file: PathBuf,
    },
    Version,
    Help,
}

#[derive(Debug)]
struct Invocation {
    config: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Result<Invocation, String> {
    let mut config = None;
    let mut key = None;
    let mut all = false;
    let mut positional = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config = Some(PathBuf::from(
                    args.next().ok_or("--config requires a path")?,
                ));
            }
            "--key" | "-k" => {
                key = Some(args.next().ok_or("--key requires a value")?);
            }
            "--all" | "-a" => all = true,
            _ => positional.push(arg),
        }
    }

    let Some(name) = positional.first() else {
        return Ok(Invocation {
            config,
            command: Command::Help,
        });
    };
    let require_key = |command: &str| key.clone().ok_or(format!("{} requires --key", command));

    let command = match name.as_str() {
        "push" | "push-symbols" => {
            let file = positional
                .get(1)
                .ok_or(format!("{} requires <file>", name))?;
            Command::Push {
                file: PathBuf::from(file),
                key: require_key(name)?,
                symbols: name == "push-symbols",
            }
        }
        "versions" => Command::Versions {
            id: positional.get(1).ok_or("versions requires <id>")?.clone(),
            all,
        },
        "delete" | "unlist" | "relist" => {
            let operation = match name.as_str() {
                "delete" => Lifecycle::Delete,
                "unlist" => Lifecycle::Unlist,
                _ => Lifecycle::Relist,
            };
            let (Some(id), Some(version)) = (positional.get(1), positional.get(2)) else {
                return Err(format!("{} requires <id> <version>", name));
            };
            Command::Lifecycle {
                operation,
                id: id.clone(),
                version: version.clone(),
                key: require_key(name)?,
            }
        }
        "signature" => Command::Signature {
            file: PathBuf::from(positional.get(1).ok_or("signature requires <file>")?),
        },
        "version" | "--version" | "-v" => Command::Version,
        "help" | "--help" | "-h" => Command::Help,
        unknown => return Err(format!("unknown command: {}", unknown)),
    };

    Ok(Invocation { config, command })
}

// =============================================================================
// Command Implementations
// =============================================================================

fn open_registry(config: Option<PathBuf>) -> Result<Registry, String> {
    let config = match config {
        Some(path) => ServerConfig::from_file(&path).map_err(|e| e.to_string())?,
        None => ServerConfig::default(),
    };
    Registry::from_config(config).map_err(|e| e.to_string())
}

async fn authenticate(registry: &Registry, key: &str) -> Result<Principal, String> {
    match registry.authenticate(&[key], chrono::Utc::now()).await {
        AuthOutcome::Success(principal) => Ok(principal),
        AuthOutcome::Fail(failure) => Err(failure.to_string()),
        AuthOutcome::NoResult => Err("no API key given".to_string()),
    }
}

async fn cmd_push(
    registry: &Registry,
    file: PathBuf,
    key: String,
    symbols: bool,
) -> Result<(), String> {
    let principal = authenticate(registry, &key).await?;
    let upload = tokio::fs::File::open(&file)
        .await
        .map_err(|e| format!("cannot open {}: {}", file.display(), e))?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let outcome = if symbols {
        registry.publish_symbols(&principal, upload, &cancel).await
    } else {
        registry.publish_package(&principal, upload, &cancel).await
    };
    watcher.abort();

    match outcome.map_err(|e| e.to_string())? {
        PublishOutcome::Created(identity) => {
            println!("Published {}", identity);
            Ok(())
        }
        PublishOutcome::Invalid(reason)
        | PublishOutcome::Conflict(reason)
        | PublishOutcome::NotFound(reason)
        | PublishOutcome::Unauthorized(reason) => Err(reason),
    }
}

async fn cmd_versions(registry: &Registry, id: String, all: bool) -> Result<(), String> {
    let versions = registry
        .package_versions(&id, !all)
        .await
        .map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(&versions).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

async fn cmd_lifecycle(
    registry: &Registry,
    operation: Lifecycle,
    id: String,
    version: String,
    key: String,
) -> Result<(), String> {
    let principal = authenticate(registry, &key).await?;
    let outcome = match operation {
        Lifecycle::Delete => registry.delete_package(&principal, &id, &version).await,
        Lifecycle::Unlist => registry.unlist_package(&principal, &id, &version).await,
        Lifecycle::Relist => registry.relist_package(&principal, &id, &version).await,
    };
    match outcome.map_err(|e| e.to_string())? {
        LifecycleOutcome::Done => {
            println!("{:?} {} {}: done", operation, id, version);
            Ok(())
        }
        LifecycleOutcome::NotFound => Err(format!("package {} {} not found", id, version)),
        LifecycleOutcome::Unauthorized(reason) => Err(reason),
    }
}

fn cmd_signature(file: PathBuf) -> Result<(), String> {
    let signature = nuvault::pdb::signature_of_file(&file).map_err(|e| e.to_string())?;
    println!("{}", signature);
    Ok(())
}

fn cmd_version() {
    println!("nuvault {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_help() {
    println!(
        "nuvault - NuGet package registry administration

USAGE:
    nuvault [--config <file>] <command> [args]

COMMANDS:
    push <file.nupkg> --key <key>           Publish a package
    push-symbols <file.snupkg> --key <key>  Publish a symbols package
    versions <id> [--all]                   List versions (listed only unless --all)
    delete <id> <version> --key <key>       Delete a version
    unlist <id> <version> --key <key>       Hide a version from listings
    relist <id> <version> --key <key>       Show a version in listings again
    signature <file.pdb>                    Print the symbol server signature
    version                                 Print version
    help                                    Print this help

ENVIRONMENT:
    {}    Log level (default: info)",
        LOG_ENV
    );
}

// =============================================================================
// Main
// =============================================================================

fn init_logging() {
    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|value| value.parse::<Level>().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
    }
}

async fn run(invocation: Invocation) -> Result<(), String> {
    match invocation.command {
        Command::Version => {
            cmd_version();
            Ok(())
        }
        Command::Help => {
            cmd_help();
            Ok(())
        }
        Command::Signature { file } => cmd_signature(file),
        Command::Push { file, key, symbols } => {
            let registry = open_registry(invocation.config)?;
            cmd_push(&registry, file, key, symbols).await
        }
        Command::Versions { id, all } => {
            let registry = open_registry(invocation.config)?;
            cmd_versions(&registry, id, all).await
        }
        Command::Lifecycle {
            operation,
            id,
            version,
            key,
        } => {
            let registry = open_registry(invocation.config)?;
            cmd_lifecycle(&registry, operation, id, version, key).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    match parse_args() {
        Ok(invocation) => match run(invocation).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("error: {}", e);
            cmd_help();
            ExitCode::FAILURE
        }
    }
}
