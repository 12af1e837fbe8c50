//! rsbackup - command line entry point.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rsbackup::{
    config, shutdown::ShutdownCoordinator, utils, BackupEngine, Config, ConsoleReporter,
    GenerationStore, RunMode,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config-file", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available backup configurations
    #[command(visible_alias = "ls")]
    List,

    /// Create a new backup generation for a configuration
    #[command(visible_alias = "c")]
    Create {
        /// Do not touch any files; print the commands instead
        #[arg(short = 'm', long)]
        dry_run: bool,

        /// Do not hardlink unchanged files against _latest, and leave it as is
        #[arg(long)]
        no_link_latest: bool,

        /// Name of the configuration to run
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let config_path = match args.config {
        Some(path) => path,
        None => config::default_config_path()
            .context("cannot determine the user configuration directory; pass --config-file")?,
    };
    let config = Config::from_file(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    banner();

    match args.command {
        Command::List => {
            list(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Create {
            dry_run,
            no_link_latest,
            name,
        } => {
            let mode = if dry_run { RunMode::DryRun } else { RunMode::Apply };
            Ok(create(&config, &name, mode, !no_link_latest).await)
        }
    }
}

fn banner() {
    println!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    println!();
}

/// Run one generation for the named definition.
async fn create(config: &Config, name: &str, mode: RunMode, link_latest: bool) -> ExitCode {
    let definition = match config.definition(name) {
        Ok(definition) => definition,
        Err(e) => {
            eprintln!("{}: {}", env!("CARGO_PKG_NAME"), e);
            return ExitCode::FAILURE;
        }
    };

    let coordinator = ShutdownCoordinator::new();
    let engine = BackupEngine::with_cancel(coordinator.token())
        .binary(config.rsync.binary.clone())
        .link_latest(link_latest);
    let signals = tokio::spawn(async move { coordinator.wait_for_signal().await });

    let reporter = ConsoleReporter::new();
    let result = engine.run(&definition, mode, &reporter).await;
    signals.abort();

    match result {
        Ok(summary) => {
            tracing::info!(
                "Generation {} finished in {:?}",
                summary.generation.display(),
                summary.duration
            );
            ExitCode::SUCCESS
        }
        // Already reported to the user by the engine
        Err(e) => {
            if let Some(code) = e.exit_code() {
                tracing::debug!("rsync exit code {} for '{}'", code, definition.name);
            }
            ExitCode::FAILURE
        }
    }
}

/// Print every definition with its current `_latest` generation.
fn list(config: &Config) -> Result<()> {
    for definition in config.definitions() {
        match &definition.description {
            Some(description) => println!("{} - {}", definition.name, description),
            None => println!("{}", definition.name),
        }
        println!("  Source: {}", definition.source.display());
        println!("  Target: {}", definition.target.display());
        println!("  Excludes:");
        for exclude in &definition.excludes {
            println!("    - {}", exclude);
        }

        let store = GenerationStore::new(&definition.target);
        let generations = store.generations()?;
        if let Some(latest) = store.resolve_previous()? {
            println!(
                "  Latest: {} ({} generations)",
                latest.display(),
                generations.len()
            );
        }
    }
    Ok(())
}
