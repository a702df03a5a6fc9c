//! stackplan CLI entrypoint.
//!
//! This is the main entrypoint for the stackplan command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use serde::Deserialize;
use stackplan::cli::{Cli, Commands, LogFormat, OutputFormatter, StateCommands};
use stackplan::config::{Capabilities, ConfigParser, ProjectConfig, find_project_file};
use stackplan::deployable::DeployableSet;
use stackplan::error::{ConfigError, Result, StackplanError};
use stackplan::planner::{ChangeCategory, EntrySet};
use stackplan::reconciler::Reconciler;
use stackplan::state::{Facts, LocalStateStore, ResourcePatch, STATE_DIR, State, StateStore};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            if e.is_user_error() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over the verbosity flag.
fn init_logging(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Facts file content: one group or several.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FactsFile {
    Many(Vec<Facts>),
    One(Facts),
}

impl FactsFile {
    fn into_facts(self) -> Vec<Facts> {
        match self {
            Self::Many(facts) => facts,
            Self::One(facts) => vec![facts],
        }
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match &cli.command {
        Commands::Validate => cmd_validate(&cli, &formatter),
        Commands::Plan {
            group,
            entries,
            detailed,
        } => cmd_plan(&cli, group, entries, *detailed, &formatter).await,
        Commands::ApplyFacts { file } => cmd_apply_facts(&cli, file, &formatter).await,
        Commands::Touch { group } => cmd_flag(&cli, group, "touched", &ResourcePatch::touch(), &formatter).await,
        Commands::Taint { group } => cmd_flag(&cli, group, "tainted", &ResourcePatch::taint(), &formatter).await,
        Commands::State { command } => cmd_state(&cli, command, &formatter).await,
    }
}

/// Validate the project file and collect its deployables.
fn cmd_validate(cli: &Cli, formatter: &OutputFormatter) -> Result<()> {
    let (capabilities, project) = load_project(cli)?;
    let set = DeployableSet::collect(&project, &capabilities)?;

    for deployable in set.iter() {
        deployable.validate()?;
    }

    emit(&formatter.format_validation(&project, &set))
}

/// Show the changeset of every group.
async fn cmd_plan(
    cli: &Cli,
    groups: &[String],
    entries: &[ChangeCategory],
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (capabilities, project) = load_project(cli)?;
    let set = DeployableSet::collect(&project, &capabilities)?;
    let store = resolve_store(cli, project.root.as_deref())?;

    let mut reconciler = Reconciler::new(&capabilities, &store, &cli.stage)
        .with_entries(entries.iter().copied().collect::<EntrySet>());
    if !groups.is_empty() {
        reconciler = reconciler.with_groups(groups.iter().cloned());
    }

    info!("Planning stage '{}' with {} deployables", cli.stage, set.len());
    let result = reconciler.plan(&set).await?;

    emit(&formatter.format_plan(&result, detailed))
}

/// Record executor facts into the state.
async fn cmd_apply_facts(cli: &Cli, file: &Path, formatter: &OutputFormatter) -> Result<()> {
    let content = tokio::fs::read_to_string(file).await?;
    let facts: FactsFile = serde_json::from_str(&content).map_err(|e| {
        ConfigError::parse(
            format!("Invalid facts file: {e}"),
            Some(file.display().to_string()),
        )
    })?;

    let capabilities = load_capabilities(cli)?;
    let store = resolve_store(cli, project_root(cli).as_deref())?;
    let mut state = State::load(&store, &cli.stage)
        .await?
        .with_preserved_keys(capabilities.preserved_output_keys.iter().cloned());

    let mut groups = Vec::new();
    for facts in facts.into_facts() {
        debug!("Recording {} resources for group '{}'", facts.resources.len(), facts.group);
        groups.push(facts.group.clone());
        state.apply_facts(facts);
    }
    state.save(&store).await?;

    emit(&formatter.format_facts(&groups))
}

/// Flag every resource of a group.
async fn cmd_flag(
    cli: &Cli,
    group: &str,
    flag: &str,
    patch: &ResourcePatch,
    formatter: &OutputFormatter,
) -> Result<()> {
    let store = resolve_store(cli, project_root(cli).as_deref())?;
    let mut state = State::load(&store, &cli.stage).await?;

    let count = state.merge_group_resource_attributes(group, patch);
    if count > 0 {
        state.save(&store).await?;
        info!("Marked {count} resources of '{group}' as {flag}");
    }

    emit(&formatter.format_flagged(group, flag, count))
}

/// Inspect the recorded state.
async fn cmd_state(cli: &Cli, command: &StateCommands, formatter: &OutputFormatter) -> Result<()> {
    let store = resolve_store(cli, project_root(cli).as_deref())?;
    if !store.exists().await? {
        info!("No state recorded at {}", store.state_path().display());
    }
    let state = State::load(&store, &cli.stage).await?;

    match command {
        StateCommands::Show { group } => emit(&formatter.format_state(&state, group.as_deref())),
        StateCommands::Groups => emit(&formatter.format_groups(&state)),
    }
}

/// Writes command output to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    if !output.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    Ok(())
}

/// Capability tables are resolved against the current directory.
fn load_capabilities(cli: &Cli) -> Result<Capabilities> {
    ConfigParser::new().load_capabilities(cli.capabilities.as_deref())
}

/// Loads the capability tables and the project stage.
fn load_project(cli: &Cli) -> Result<(Capabilities, ProjectConfig)> {
    let project_file = resolve_project_path(cli)?;
    let parser = ConfigParser::new().with_base_path(
        project_file
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
    );
    parser.load_dotenv()?;

    let capabilities = load_capabilities(cli)?;
    let project = parser.load_with_env(&project_file, &cli.stage)?;
    Ok((capabilities, project))
}

/// Resolves the project file path.
fn resolve_project_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(path) = &cli.project {
        return Ok(path.clone());
    }

    let cwd = std::env::current_dir()
        .map_err(|e| StackplanError::internal(format!("Cannot determine current directory: {e}")))?;
    find_project_file(cwd)
}

/// Directory of the project file, when one can be found.
fn project_root(cli: &Cli) -> Option<PathBuf> {
    resolve_project_path(cli)
        .ok()
        .and_then(|path| path.parent().map(Path::to_path_buf))
}

/// Picks the state store: `--state`, then the project directory, then the
/// current directory.
fn resolve_store(cli: &Cli, root: Option<&Path>) -> Result<LocalStateStore> {
    if let Some(path) = &cli.state {
        return Ok(LocalStateStore::with_state_path(path));
    }

    match root {
        Some(root) => Ok(LocalStateStore::with_base_dir(root.join(STATE_DIR))),
        None => LocalStateStore::new(),
    }
}
