//! perms command - grant and revoke permission levels

use std::io::Write;

use anyhow::Result;

use super::apply;
use crate::cli::args::PermAction;
use crate::control::ControlRepo;
use crate::core::model::Grantee;
use crate::engine::{ApplyEngine, Mutation};

pub(super) async fn run<C: ControlRepo>(
    action: PermAction,
    engine: &ApplyEngine<C>,
    out: &mut dyn Write,
) -> Result<()> {
    let mutation = match action {
        PermAction::Set {
            repo,
            level,
            users,
            group,
        } => {
            let grantee = match group {
                Some(group) => Grantee::Group(group),
                None => Grantee::Users(users),
            };
            Mutation::SetPermission {
                repo,
                level,
                grantee,
            }
        }
        PermAction::Revoke { repo, level } => Mutation::RevokePermission { repo, level },
    };
    apply(engine, mutation, out).await
}
