//! repos command - list, add, remove and inspect repositories

use std::io::Write;

use anyhow::Result;

use super::{apply, print_json};
use crate::cli::args::RepoAction;
use crate::control::ControlRepo;
use crate::engine::{ApplyEngine, Mutation};

pub(super) async fn run<C: ControlRepo>(
    action: RepoAction,
    engine: &ApplyEngine<C>,
    out: &mut dyn Write,
) -> Result<()> {
    match action {
        RepoAction::List => print_json(out, &engine.list_repositories().await?),
        RepoAction::Add { name } => apply(engine, Mutation::AddRepository { name }, out).await,
        RepoAction::Remove { name } => {
            apply(engine, Mutation::RemoveRepository { name }, out).await
        }
        RepoAction::Perms { name } => print_json(out, &engine.permissions(&name).await?),
    }
}
