//! Inspect command - decrypt a token and show what it carries.

use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::Args;
use serde::Serialize;

use crumb_session::{AttributeMap, SessionCoordinator};

use super::Context;

/// Arguments for the inspect command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Token value (the cookie value, without the name)
    pub token: String,
}

#[derive(Serialize)]
struct TokenContents {
    session_id: String,
    created_at: String,
    last_accessed_at: String,
    inactivity_timeout_seconds: i64,
    expired: bool,
    attributes: AttributeMap,
}

/// Run the inspect command.
pub fn run(args: InspectArgs, ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let max_age = config.session_timeout_minutes;
    let sessions = SessionCoordinator::new(config).context("cannot set up the session cipher")?;

    let record = sessions
        .decode_token(&args.token)
        .context("token could not be decoded with this configuration")?;

    let contents = TokenContents {
        session_id: record.id().to_string(),
        created_at: record.created_at().to_rfc3339(),
        last_accessed_at: record.last_accessed_at().to_rfc3339(),
        inactivity_timeout_seconds: record.inactivity_timeout_seconds(),
        expired: record.has_expired(Utc::now(), max_age),
        attributes: record.attributes()?,
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&contents)?);
        return Ok(());
    }

    println!("Session:          {}", contents.session_id);
    println!("Created:          {}", contents.created_at);
    println!("Last accessed:    {}", contents.last_accessed_at);
    if contents.inactivity_timeout_seconds >= 0 {
        println!("Inactivity limit: {}s", contents.inactivity_timeout_seconds);
    } else {
        println!("Inactivity limit: none");
    }
    println!(
        "Status:           {}",
        if contents.expired { "expired" } else { "live" }
    );

    if contents.attributes.is_empty() {
        println!("\nNo attributes");
    } else {
        println!("\nAttributes:");
        for (key, value) in &contents.attributes {
            println!("  {} = {}", key, value);
        }
    }
    Ok(())
}
