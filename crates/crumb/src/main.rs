//! crumb - session token tooling
//!
//! Main entry point for the crumb CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{check, inspect, keygen};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// crumb - encrypted cookie session tooling
#[derive(Parser)]
#[command(name = "crumb")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Session config file (TOML)
    #[arg(short, long, global = true, env = "CRUMB_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a random encryption key
    Keygen(keygen::KeygenArgs),

    /// Decrypt a session token and show its contents
    Inspect(inspect::InspectArgs),

    /// Validate a session config, including the encryption key
    Check(check::CheckArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "crumb=debug,crumb_session=debug,warn"
    } else {
        "crumb=info,crumb_session=info,warn"
    };

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let ctx = commands::Context {
        config_path: cli.config,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Keygen(args) => keygen::run(args, &ctx),
        Commands::Inspect(args) => inspect::run(args, &ctx),
        Commands::Check(args) => check::run(args, &ctx),
    }
}
