//! Terrace CLI entrypoint.
//!
//! This is the main entrypoint for the terrace command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use terrace::cli::{Cli, Commands, OutputFormatter, StateCommands};
use terrace::config::{ConfigParser, ConfigValidator, TerraceConfig, find_config_file};
use terrace::error::{Result, TerraceError};
use terrace::reconciler::{Reconciler, open_provider, open_state_store};
use terrace::state::{StateStore, generate_holder_id};

use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code for configuration, planning and state errors.
const EXIT_ERROR: u8 = 1;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Initializes the logging system. Logs go to stderr so stdout stays parseable.
fn init_logging(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<u8> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force).map(|()| 0),
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(config_path, detailed, &formatter).await,
        Commands::Apply { yes, parallelism } => {
            cmd_apply(config_path, yes, parallelism, &formatter).await
        }
        Commands::Destroy { yes } => cmd_destroy(config_path, yes, &formatter).await,
        Commands::Outputs => cmd_outputs(config_path, &formatter).await,
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new Terrace project in: {}", path.display());

    let config_path = path.join("terrace.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/terrace.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".env") || !existing.contains(".terrace") {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Terrace")?;
            if !existing.contains(".env") {
                writeln!(file, ".env")?;
            }
            if !existing.contains(".terrace") {
                writeln!(file, ".terrace/")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, ".env\n.terrace/\n")?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Edit terrace.yaml to declare your resources");
    eprintln!("  2. Run 'terrace validate' to check your configuration");
    eprintln!("  3. Run 'terrace plan' to see what will change");
    eprintln!("  4. Run 'terrace apply' to provision");

    Ok(())
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(base_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().check(&config);
    emit(&formatter.format_validation(&result, show_warnings || formatter.is_json()))?;

    if !formatter.is_json() && result.is_valid() {
        eprintln!("\nConfiguration summary:");
        eprintln!("  Project: {}", config.project.name);
        eprintln!("  Environment: {}", config.project.environment);
        eprintln!("  Resources: {}", config.resources.len());
        eprintln!("  Outputs: {}", config.outputs.len());
    }

    Ok(if result.is_valid() { 0 } else { EXIT_ERROR })
}

/// Show the plan.
async fn cmd_plan(config_path: Option<&Path>, detailed: bool, formatter: &OutputFormatter) -> Result<u8> {
    let (config, dir) = load_config(config_path)?;
    let store = open_state_store(&config, &dir).await?;
    let provider = open_provider(&config, &dir).await?;

    let plan = Reconciler::new(&config, store.as_ref(), provider).plan().await?;
    emit(&formatter.format_plan(&plan, detailed))?;
    Ok(0)
}

/// Apply the plan.
async fn cmd_apply(
    config_path: Option<&Path>,
    auto_approve: bool,
    parallelism: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let (config, dir) = load_config(config_path)?;
    let store = open_state_store(&config, &dir).await?;
    let provider = open_provider(&config, &dir).await?;

    let mut reconciler = Reconciler::new(&config, store.as_ref(), provider)
        .with_cancellation(cancel_on_ctrl_c());
    if let Some(n) = parallelism {
        reconciler = reconciler.with_parallelism(n.max(1));
    }

    let plan = reconciler.plan().await?;
    if plan.has_changes() {
        if !formatter.is_json() {
            eprintln!("{}", formatter.format_plan(&plan, false));
        }
        if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
            eprintln!("Apply cancelled.");
            return Ok(0);
        }
    } else {
        debug!("Nothing to change, refreshing outputs");
    }

    let report = reconciler.apply().await?;
    emit(&formatter.format_run(&report))?;
    Ok(report.exit_code())
}

/// Destroy every recorded resource.
async fn cmd_destroy(config_path: Option<&Path>, auto_approve: bool, formatter: &OutputFormatter) -> Result<u8> {
    let (config, dir) = load_config(config_path)?;
    let store = open_state_store(&config, &dir).await?;
    let provider = open_provider(&config, &dir).await?;

    let reconciler = Reconciler::new(&config, store.as_ref(), provider)
        .with_cancellation(cancel_on_ctrl_c());

    let plan = reconciler.plan_destroy().await?;
    if plan.is_empty() {
        eprintln!("No resources to destroy.");
        return Ok(0);
    }

    eprintln!("The following resources will be destroyed:");
    for op in &plan.operations {
        eprintln!("  - {} ({})", op.resource_id, op.provider_id.as_deref().unwrap_or("unknown"));
    }

    if !auto_approve && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")? {
        eprintln!("Destruction cancelled.");
        return Ok(0);
    }

    let report = reconciler.destroy().await?;
    emit(&formatter.format_run(&report))?;
    Ok(report.exit_code())
}

/// Show recorded outputs.
async fn cmd_outputs(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<u8> {
    let (config, dir) = load_config(config_path)?;
    let store = open_state_store(&config, &dir).await?;

    let outputs = store.load().await?.map(|s| s.outputs).unwrap_or_default();
    emit(&formatter.format_outputs(&outputs))?;
    Ok(0)
}

/// State management commands.
async fn cmd_state(config_path: Option<&Path>, command: StateCommands, formatter: &OutputFormatter) -> Result<u8> {
    let (config, dir) = load_config(config_path)?;
    let store = open_state_store(&config, &dir).await?;

    match command {
        StateCommands::Show => {
            if let Some(snapshot) = store.load().await? {
                emit(&formatter.format_state(&snapshot))?;
            } else {
                eprintln!("No state found.");
            }
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder, "manual").await?;
            emit(&formatter.format_lock(Some(&lock)))?;
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if let Some(lock) = store.get_lock_info().await? {
                    warn!("Force-releasing lock held by {}", lock.holder);
                    store.release_lock(&lock.lock_id).await?;
                    eprintln!("State forcefully unlocked.");
                } else {
                    eprintln!("State is not locked.");
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                emit(&formatter.format_lock(store.get_lock_info().await?.as_ref()))?;
                eprintln!("Please provide --lock-id or use --force");
                return Ok(EXIT_ERROR);
            }
        }
    }

    Ok(0)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.to_path_buf()))
}

/// Directory relative paths in the configuration are resolved against.
fn base_dir(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Loads, overrides and validates the configuration.
fn load_config(config_path: Option<&Path>) -> Result<(TerraceConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let dir = base_dir(&config_file);
    let parser = ConfigParser::new().with_base_path(&dir);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    Ok((config, dir))
}

/// Turns the first Ctrl-C into a cancellation signal.
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight operations");
            let _ = tx.send(true);
        }
    });
    rx
}

/// Asks for confirmation on stderr; true if the answer matches `expected`.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Writes command output to stdout.
fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", text.trim_end()).map_err(TerraceError::from)
}
