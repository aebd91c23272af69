//! groups command - manage groups and their members

use std::io::Write;

use anyhow::Result;

use super::{apply, print_json};
use crate::cli::args::GroupAction;
use crate::control::ControlRepo;
use crate::engine::{ApplyEngine, Mutation};

pub(super) async fn run<C: ControlRepo>(
    action: GroupAction,
    engine: &ApplyEngine<C>,
    out: &mut dyn Write,
) -> Result<()> {
    let mutation = match action {
        GroupAction::List => return print_json(out, &engine.list_groups().await?),
        GroupAction::Has { group, user } => {
            return print_json(out, &engine.group_has_user(&group, &user).await?)
        }
        GroupAction::Add { name, members } => Mutation::AddGroup { name, members },
        GroupAction::Remove { name } => Mutation::RemoveGroup { name },
        GroupAction::AddMembers { group, users } => Mutation::AddToGroup { users, group },
        GroupAction::RemoveMembers { group, users } => Mutation::RemoveFromGroup { users, group },
    };
    apply(engine, mutation, out).await
}
