//! CLI command handlers.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use crumb_session::SessionConfig;
use tracing::debug;

pub mod check;
pub mod inspect;
pub mod keygen;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Config file given on the command line, if any.
    pub config_path: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Load the session config, or the defaults when no file was given.
    pub fn load_config(&self) -> Result<SessionConfig> {
        match &self.config_path {
            Some(path) => {
                debug!(path = %path.display(), "Loading session config");
                SessionConfig::load(path)
                    .with_context(|| format!("invalid session config {}", path.display()))
            }
            None => {
                debug!("No config file given, using defaults");
                Ok(SessionConfig::default())
            }
        }
    }
}
