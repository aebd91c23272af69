//! cli
//!
//! Command-line interface layer for gitward.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Resolve configuration (config file, then flag overrides)
//! - Delegate to command handlers
//! - Map failures to exit codes
//!
//! # Architecture
//!
//! The CLI layer is thin. It parses arguments via clap and dispatches to the
//! [`crate::engine`]. It carries no access-control semantics of its own.
//!
//! # Exit Codes
//!
//! - `0` success
//! - `2` the request was at fault (duplicate, not found, invalid argument,
//!   or a usage error reported by clap)
//! - `1` anything else

pub mod args;
pub mod commands;

pub use args::Cli;

use anyhow::{Context as _, Result};

use crate::control::{GitControlRepo, GitControlSettings};
use crate::core::config::Config;
use crate::engine::{ApplyEngine, EngineError, RetryPolicy};

/// Exit code for errors caused by the request.
pub const EXIT_CLIENT_ERROR: u8 = 2;
/// Exit code for every other failure.
pub const EXIT_FAILURE: u8 = 1;

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;
    match config.loaded_from() {
        Some(path) => tracing::debug!(path = %path.display(), "loaded config file"),
        None => tracing::debug!("no config file found, using defaults"),
    }
    let settings = GitControlSettings::from_config(&config)?;
    tracing::debug!(
        remote = %settings.remote.url,
        branch = %settings.branch,
        mirror = %settings.mirror_dir.display(),
        "using control repository"
    );

    let engine = ApplyEngine::new(GitControlRepo::new(settings))
        .with_policy(RetryPolicy::from_config(&config));
    commands::dispatch(cli.command, &engine, &mut std::io::stdout()).await
}

/// Load the config file and apply flag overrides.
fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };
    if let Some(url) = &cli.remote {
        config.set_url(url.clone());
    }
    if let Some(branch) = &cli.branch {
        config.set_branch(branch.clone())?;
    }
    if let Some(dir) = &cli.mirror {
        config.set_mirror_dir(dir.clone());
    }
    Ok(config)
}

/// Exit code for a failed run.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<EngineError>() {
        Some(engine_err) if engine_err.is_client_error() => EXIT_CLIENT_ERROR,
        _ => EXIT_FAILURE,
    }
}
