//! Check command - validate a session configuration.

use anyhow::{Context as _, Result};
use clap::Args;
use serde::Serialize;

use crumb_session::SessionCoordinator;

use super::Context;

/// Arguments for the check command.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Also print the resolved configuration as TOML
    #[arg(long)]
    pub show: bool,
}

#[derive(Serialize)]
struct CheckReport {
    valid: bool,
    algorithm: String,
    cookie_name: String,
    caching_enabled: bool,
    max_in_memory_sessions: i64,
    background_purge: bool,
    session_timeout_minutes: i64,
    inactivity_timeout_seconds: i64,
}

/// Run the check command.
///
/// Building a coordinator runs every startup check: value ranges, path
/// patterns, key resolution and a probe encryption.
pub fn run(args: CheckArgs, ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let sessions =
        SessionCoordinator::new(config.clone()).context("session configuration rejected")?;

    let report = CheckReport {
        valid: true,
        algorithm: sessions.cipher().algorithm().to_string(),
        cookie_name: config.cookie_name.clone(),
        caching_enabled: config.caching_enabled(),
        max_in_memory_sessions: config.max_in_memory_sessions,
        background_purge: config.purge_with_background_thread,
        session_timeout_minutes: config.session_timeout_minutes,
        inactivity_timeout_seconds: config.inactivity_timeout_seconds,
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Configuration OK");
    println!("  Algorithm:   {}", report.algorithm);
    println!("  Cookie:      {}", report.cookie_name);
    if report.caching_enabled {
        println!(
            "  Cache:       {} sessions, {} purge",
            report.max_in_memory_sessions,
            if report.background_purge { "background" } else { "inline" }
        );
    } else {
        println!("  Cache:       disabled");
    }
    if report.session_timeout_minutes >= 0 {
        println!("  Max age:     {} min", report.session_timeout_minutes);
    } else {
        println!("  Max age:     none");
    }

    if args.show {
        // Never echo the key back.
        let mut shown = config;
        shown.encryption_key = None;
        println!("\n{}", shown.to_toml_string()?);
    }
    Ok(())
}
