//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each handler turns its arguments into a [`Mutation`] or a query, hands it
//! to the [`ApplyEngine`] and prints the result. Handlers hold no state and
//! never touch the control repository directly.
//!
//! Query results are printed as JSON; mutations print one summary line.

mod groups;
mod keys;
mod perms;
mod repos;
mod users;

use std::io::Write;
use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Serialize;

use crate::cli::args::Command;
use crate::control::ControlRepo;
use crate::core::model::{ModelError, SshKey};
use crate::engine::{Applied, ApplyEngine, EngineError, Mutation};

/// Dispatch a command to its handler, writing results to `out`.
pub async fn dispatch<C: ControlRepo>(
    command: Command,
    engine: &ApplyEngine<C>,
    out: &mut dyn Write,
) -> Result<()> {
    match command {
        Command::Repos { action } => repos::run(action, engine, out).await,
        Command::Users { action } => users::run(action, engine, out).await,
        Command::Keys { action } => keys::run(action, engine, out).await,
        Command::Groups { action } => groups::run(action, engine, out).await,
        Command::Perms { action } => perms::run(action, engine, out).await,
    }
}

/// Apply a mutation and report what happened.
async fn apply<C: ControlRepo>(
    engine: &ApplyEngine<C>,
    mutation: Mutation,
    out: &mut dyn Write,
) -> Result<()> {
    let applied = engine.apply(&mutation).await?;
    report(&mutation, &applied, out)
}

fn report(mutation: &Mutation, applied: &Applied, out: &mut dyn Write) -> Result<()> {
    match (&applied.revision, applied.changed) {
        (Some(revision), true) => writeln!(out, "{mutation} ({})", revision.short(12))?,
        _ => writeln!(out, "{mutation}: already up to date")?,
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).context("Failed to write output")?;
    writeln!(out)?;
    Ok(())
}

/// Read a key argument: literal key text, or `@FILE`.
///
/// Problems with the argument are reported as invalid arguments.
fn read_key(arg: &str) -> Result<SshKey, EngineError> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(Path::new(path)).map_err(|e| {
            ModelError::InvalidArgument(format!("cannot read key file {path}: {e}"))
        })?,
        None => arg.to_string(),
    };
    Ok(SshKey::new(text).map_err(ModelError::from)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::Cli;
    use crate::control::MemoryControlRepo;
    use crate::engine::ErrorKind;
    use clap::Parser;

    async fn run(engine: &ApplyEngine<MemoryControlRepo>, args: &[&str]) -> Result<String> {
        let cli = Cli::try_parse_from(std::iter::once("gitward").chain(args.iter().copied()))?;
        let mut out = Vec::new();
        dispatch(cli.command, engine, &mut out).await?;
        Ok(String::from_utf8(out)?)
    }

    fn engine() -> ApplyEngine<MemoryControlRepo> {
        ApplyEngine::new(MemoryControlRepo::new())
    }

    #[test]
    fn key_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice.pub");
        std::fs::write(&path, "ssh-ed25519 AAAA alice@host\n").unwrap();

        let key = read_key(&format!("@{}", path.display())).unwrap();
        assert_eq!(key.key(), "ssh-ed25519 AAAA alice@host");
    }

    #[test]
    fn unreadable_key_file_is_client_error() {
        let err = read_key("@/nonexistent/gitward/key.pub").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn mutation_then_query() {
        let engine = engine();
        let line = run(&engine, &["repos", "add", "svc"]).await.unwrap();
        assert!(line.starts_with("add repository svc ("));

        let listed = run(&engine, &["repos", "list"]).await.unwrap();
        let repos: Vec<String> = serde_json::from_str(&listed).unwrap();
        assert_eq!(repos, vec!["svc"]);
    }

    #[tokio::test]
    async fn unchanged_is_reported() {
        let engine = engine();
        run(&engine, &["users", "add", "alice", "ssh-rsa AAAA"])
            .await
            .unwrap();
        run(&engine, &["groups", "add", "devs", "alice"])
            .await
            .unwrap();
        let line = run(&engine, &["groups", "add-members", "devs", "alice"])
            .await
            .unwrap();
        assert_eq!(line, "add alice to @devs: already up to date\n");
    }

    #[tokio::test]
    async fn engine_errors_pass_through() {
        let engine = engine();
        let err = run(&engine, &["repos", "remove", "ghost"]).await.unwrap_err();
        let engine_err = err.downcast_ref::<EngineError>().unwrap();
        assert_eq!(engine_err.kind(), ErrorKind::NotFound);
    }
}
