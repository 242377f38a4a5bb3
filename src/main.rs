use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repoget::settings::apply_local_settings;
use repoget::{resolve, CancelFlag, Config, SyncAction, SyncEngine, SyncReport};

#[derive(Parser)]
#[command(name = "repoget")]
#[command(about = "Mirror GitHub repositories and select their documentation directories")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync repositories and print the selected directories
    Sync {
        /// Report the planned action per repository without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Extra directory appended after the selected ones (repeatable)
        #[arg(long = "extra-dir", value_name = "PATH")]
        extra_dirs: Vec<PathBuf>,

        /// Extra ignore path appended after the selected ones (repeatable)
        #[arg(long = "extra-ignore", value_name = "PATH")]
        extra_ignores: Vec<PathBuf>,

        /// Exit with an error if any owner or repository failed
        #[arg(long)]
        strict: bool,
    },

    /// List repositories that would be synced
    List,

    /// Show the resolved settings of one repository
    Settings {
        /// Repository as owner/name
        repository: String,

        /// Working copy whose local settings file should be merged too
        #[arg(long)]
        working_copy: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config)?;
    init_logging(cli.verbose, &config.logging.level)?;
    info!("Starting repoget v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Sync {
            dry_run,
            json,
            extra_dirs,
            extra_ignores,
            strict,
        } => {
            if dry_run {
                cmd_plan(config).await
            } else {
                cmd_sync(config, json, &extra_dirs, &extra_ignores, strict).await
            }
        }
        Commands::List => cmd_list(config).await,
        Commands::Settings {
            repository,
            working_copy,
        } => cmd_settings(&config, &repository, working_copy),
    }
}

/// Initialize logging on stderr. `RUST_LOG` wins over `--verbose`, which wins over the config.
fn init_logging(verbose: bool, configured_level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if verbose => EnvFilter::new("debug"),
        Err(_) => EnvFilter::try_new(configured_level)
            .with_context(|| format!("Invalid logging.level {:?}", configured_level))?,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_config_path()
            .ok_or_else(|| anyhow!("Could not determine the configuration directory"))?,
    };

    Config::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Set the cancel flag on Ctrl-C so in-flight work winds down cleanly
fn cancel_on_ctrl_c() -> CancelFlag {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight work");
            flag.cancel();
        }
    });
    cancel
}

async fn cmd_sync(
    config: Config,
    json: bool,
    extra_dirs: &[PathBuf],
    extra_ignores: &[PathBuf],
    strict: bool,
) -> Result<()> {
    let engine = SyncEngine::new(config).context("Failed to create sync engine")?;
    let cancel = cancel_on_ctrl_c();

    let report = engine.run(&cancel).await;
    let selection = report.merge_with(extra_dirs, extra_ignores);

    if json {
        let failures: Vec<serde_json::Value> = failure_lines(&report)
            .into_iter()
            .map(|(subject, error)| serde_json::json!({ "subject": subject, "error": error }))
            .collect();
        let output = serde_json::json!({
            "directories": selection.directories,
            "ignore_directories": selection.ignored,
            "failures": failures,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("# directories");
        for dir in &selection.directories {
            println!("{}", dir.display());
        }
        println!("# ignore");
        for dir in &selection.ignored {
            println!("{}", dir.display());
        }
        for (subject, error) in failure_lines(&report) {
            eprintln!("failed: {}: {}", subject, error);
        }
    }

    if cancel.is_cancelled() {
        bail!("Sync interrupted");
    }
    if strict && !report.is_clean() {
        bail!(
            "{} repositories and {} owners failed",
            report.failures().count(),
            report.catalog_failures.len()
        );
    }

    Ok(())
}

/// Owner and repository failures as (subject, message) pairs
fn failure_lines(report: &SyncReport) -> Vec<(String, String)> {
    let owners = report.catalog_failures.iter().map(|f| {
        let subject = match &f.repository {
            Some(repo) => format!("{}/{}", f.owner, repo),
            None => f.owner.clone(),
        };
        (subject, f.error.to_string())
    });

    let repositories = report.failures().map(|r| {
        let message = r
            .error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        (r.full_name.clone(), message)
    });

    owners.chain(repositories).collect()
}

async fn cmd_plan(config: Config) -> Result<()> {
    let engine = SyncEngine::new(config).context("Failed to create sync engine")?;
    let report = engine.plan().await;

    for result in &report.results {
        let action = match (&result.error, result.action) {
            (Some(_), _) => "error",
            (None, SyncAction::None) => "up-to-date",
            (None, SyncAction::FastForward) => "fast-forward",
            (None, SyncAction::FreshClone) => "clone",
            (None, SyncAction::DiscardAndClone) => "re-clone",
        };
        println!("{:<12} {} -> {}", action, result.full_name, result.local_path.display());
    }

    for (subject, error) in failure_lines(&report) {
        eprintln!("failed: {}: {}", subject, error);
    }

    Ok(())
}

async fn cmd_list(config: Config) -> Result<()> {
    let engine = SyncEngine::new(config).context("Failed to create sync engine")?;
    let (repositories, failures) = engine.list().await;

    for repo in &repositories {
        println!(
            "{} ({} @ {})",
            repo.full_name,
            repo.default_branch,
            repo.head_commit.get(..12).unwrap_or(&repo.head_commit)
        );
    }
    for failure in &failures {
        eprintln!("failed: {}: {}", failure.owner, failure.error);
    }

    Ok(())
}

fn cmd_settings(config: &Config, repository: &str, working_copy: Option<PathBuf>) -> Result<()> {
    let (owner, name) = repository
        .split_once('/')
        .filter(|(owner, name)| !owner.is_empty() && !name.is_empty())
        .ok_or_else(|| anyhow!("Expected owner/name, got {:?}", repository))?;

    let mut settings = resolve(owner, name, config.default_settings(), config.override_rules());
    if let Some(path) = working_copy {
        apply_local_settings(&mut settings, &path)
            .with_context(|| format!("Failed to merge local settings from {}", path.display()))?;
    }

    print!("{}", serde_yaml::to_string(&settings)?);
    Ok(())
}
