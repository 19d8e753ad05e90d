//! Version-gated APK mirror.
//!
//! Fetches the newest build of one package, decompiles it, and publishes the
//! sources to a git mirror only when the build is strictly newer than the last
//! one published. Meant to be run from a scheduler.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};

use apk_mirror::core::types::SyncOutcome;
use apk_mirror::exit_codes;
use apk_mirror::io::config::{DEFAULT_CONFIG_PATH, MirrorConfig, load_config, write_config};
use apk_mirror::logging;
use apk_mirror::sync::sync_with_config;

#[derive(Parser)]
#[command(
    name = "apk-mirror",
    version,
    about = "Version-gated mirror of a decompiled Android package"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter config file.
    Init {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Load and validate the config without touching anything else.
    Validate {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Run the mirror pipeline once.
    Sync {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Print the outcome as JSON instead of a summary line.
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(exit_codes::for_error(&err));
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { config, force } => cmd_init(&config, force),
        Command::Validate { config } => cmd_validate(&config),
        Command::Sync { config, json } => cmd_sync(&config, json),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &MirrorConfig::template())?;
    println!("wrote {}", path.display());
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    let cfg = load_config(path)?;
    println!("{} ok (package {})", path.display(), cfg.package_name);
    Ok(())
}

fn cmd_sync(path: &Path, json: bool) -> Result<()> {
    let cfg = load_config(path)?;
    let outcome = sync_with_config(&cfg)?;
    print_outcome(&outcome, json)
}

fn print_outcome(outcome: &SyncOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(outcome)?);
    } else {
        println!("{}", outcome.summary());
    }
    Ok(())
}
