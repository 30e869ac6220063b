//! Stanza CTL - command-line driver
//!
//! ```text
//! stanza-ctl validate -f mysql.yaml
//! stanza-ctl run -f mysql.yaml --action backup --option hostName=db-1
//! stanza-ctl repo-init --storage /var/lib/stanza --password secret
//! ```

#![warn(unreachable_pub)]

use anyhow::{anyhow, bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use stanza_core::config::PHASE_TIMEOUT_ENV;
use stanza_core::validate::validate;
use stanza_core::{Blueprint, EngineConfig, ExecutionEngine, PhaseOutputs, Services, TemplateParams};
use stanza_repo::{persist_password, ClientOptions, LocalRepository, Repository};
use stanza_snapshot::{open_repository, STREAM_PURPOSE};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line definition
#[must_use]
pub fn cli() -> Command {
    let file = Arg::new("file")
        .short('f')
        .long("file")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Blueprint file (YAML or JSON)");

    Command::new("stanza-ctl")
        .version(stanza_core::VERSION)
        .about("Validate and run Stanza blueprints")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Engine configuration file (TOML)"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("validate")
                .about("Check that every phase names a registered function with its required args")
                .arg(file.clone()),
        )
        .subcommand(
            Command::new("run")
                .about("Run one action of a blueprint")
                .arg(file)
                .arg(
                    Arg::new("action")
                        .long("action")
                        .required(true)
                        .help("Action to run"),
                )
                .arg(
                    Arg::new("option")
                        .long("option")
                        .action(ArgAction::Append)
                        .help("Run option as key=value (e.g. hostName=db-1)"),
                )
                .arg(
                    Arg::new("phase-timeout")
                        .long("phase-timeout")
                        .value_parser(value_parser!(u64))
                        .help("Per-phase timeout in seconds"),
                ),
        )
        .subcommand(
            Command::new("repo-init")
                .about("Create a content repository and persist its password")
                .arg(
                    Arg::new("storage")
                        .long("storage")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory holding repository data"),
                )
                .arg(
                    Arg::new("password")
                        .long("password")
                        .required(true)
                        .help("Repository password"),
                )
                .arg(Arg::new("username").long("username").default_value("stanza"))
                .arg(Arg::new("hostname").long("hostname").default_value("localhost")),
        )
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` selects the filter, `info` otherwise.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Engine configuration from an optional file plus environment overrides
///
/// # Errors
/// Unreadable or malformed configuration
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    config
        .apply_env()
        .with_context(|| format!("Failed to apply {PHASE_TIMEOUT_ENV}"))
}

/// Parse `key=value` run options
///
/// # Errors
/// An option without `=` or with an empty key
pub fn parse_options<'a>(raw: impl IntoIterator<Item = &'a str>) -> anyhow::Result<BTreeMap<String, String>> {
    raw.into_iter()
        .map(|item| match item.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(anyhow!("invalid option {item:?}, expected key=value")),
        })
        .collect()
}

fn read_blueprint(path: &Path) -> anyhow::Result<Blueprint> {
    Blueprint::read_from_file(path).with_context(|| format!("Failed to read blueprint {}", path.display()))
}

/// Validate a blueprint file against the built-in functions
///
/// # Errors
/// Unreadable blueprint or the first validation failure
pub fn validate_file(path: &Path) -> anyhow::Result<()> {
    let blueprint = read_blueprint(path)?;
    let registry = stanza_functions::init()?;
    validate(registry, &blueprint)?;
    info!(file = %path.display(), actions = blueprint.actions.len(), "Blueprint is valid");
    Ok(())
}

/// Collaborators for a run
///
/// The content repository is opened when its config file exists.
///
/// # Errors
/// A repository config that exists but cannot be opened
pub fn services(config: &EngineConfig) -> anyhow::Result<Services> {
    let mut services = Services::new();
    if config.repository_config.is_file() {
        let repo = open_repository(&config.repository_config, STREAM_PURPOSE)
            .context("Failed to open content repository")?;
        let repo: Arc<dyn Repository> = Arc::new(repo);
        services.insert(repo);
    } else {
        debug!(
            config = %config.repository_config.display(),
            "No repository configured; content snapshot functions are unavailable"
        );
    }
    Ok(services)
}

/// Run one action of a blueprint file
///
/// Executes with the process-wide registry that [`validate_file`] checks
/// against. Ctrl-C cancels the run.
///
/// # Errors
/// Unreadable blueprint, unavailable collaborators or a failed phase
pub async fn run_file(
    path: &Path,
    action: &str,
    config: EngineConfig,
    params: TemplateParams,
) -> anyhow::Result<PhaseOutputs> {
    let blueprint = read_blueprint(path)?;
    let engine = ExecutionEngine::new(stanza_functions::init()?.clone())
        .with_services(services(&config)?)
        .with_config(config);

    let token = engine.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            token.cancel();
        }
    });

    let result = engine.run_blueprint(&blueprint, action, params).await;
    interrupt.abort();

    match result {
        Ok(outputs) => Ok(outputs),
        Err(failure) => {
            if !failure.completed.is_empty() {
                warn!(
                    completed = ?failure.completed.keys().collect::<Vec<_>>(),
                    "Completed phases are not rolled back"
                );
            }
            Err(failure.into())
        }
    }
}

/// Create a repository and persist its password beside the config
///
/// # Errors
/// Repository creation or password persistence failures
pub fn init_repository(config_path: &Path, storage: &Path, client: ClientOptions, password: &str) -> anyhow::Result<()> {
    if config_path.exists() {
        bail!("repository config {} already exists", config_path.display());
    }
    LocalRepository::create(config_path, storage, client, password)?;
    persist_password(config_path, password)?;
    info!(config = %config_path.display(), "Repository ready");
    Ok(())
}

fn required<'a, T: Clone + Send + Sync + 'static>(args: &'a ArgMatches, name: &str) -> anyhow::Result<&'a T> {
    args.get_one::<T>(name).ok_or_else(|| anyhow!("missing --{name}"))
}

/// Execute parsed command-line arguments
///
/// # Errors
/// Whatever the selected subcommand fails with
pub async fn dispatch(matches: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;

    match matches.subcommand() {
        Some(("validate", args)) => validate_file(required::<PathBuf>(args, "file")?),
        Some(("run", args)) => {
            let file = required::<PathBuf>(args, "file")?;
            let action = required::<String>(args, "action")?;
            let options = parse_options(
                args.get_many::<String>("option")
                    .into_iter()
                    .flatten()
                    .map(String::as_str),
            )?;
            let config = match args.get_one::<u64>("phase-timeout") {
                Some(secs) => config.with_phase_timeout(Duration::from_secs(*secs)),
                None => config,
            };
            let params = TemplateParams {
                options,
                ..TemplateParams::default()
            };

            let outputs = run_file(file, action, config, params).await?;
            println!("{}", serde_json::to_string_pretty(&outputs)?);
            Ok(())
        }
        Some(("repo-init", args)) => {
            let client = ClientOptions::new(
                required::<String>(args, "username")?.as_str(),
                required::<String>(args, "hostname")?.as_str(),
            );
            init_repository(
                &config.repository_config,
                required::<PathBuf>(args, "storage")?,
                client,
                required::<String>(args, "password")?,
            )
        }
        _ => bail!("unknown command"),
    }
}
