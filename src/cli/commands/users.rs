//! users command - list, add, remove users and show their keys

use std::io::Write;

use anyhow::Result;

use super::{apply, print_json, read_key};
use crate::cli::args::UserAction;
use crate::control::ControlRepo;
use crate::engine::{ApplyEngine, Mutation};

pub(super) async fn run<C: ControlRepo>(
    action: UserAction,
    engine: &ApplyEngine<C>,
    out: &mut dyn Write,
) -> Result<()> {
    match action {
        UserAction::List => print_json(out, &engine.list_users().await?),
        UserAction::Add { name, key } => {
            let mut ssh_key = read_key(&key.key)?;
            if let Some(label) = key.label {
                ssh_key = ssh_key.with_label(label);
            }
            apply(
                engine,
                Mutation::AddUser {
                    user: name,
                    key: ssh_key,
                },
                out,
            )
            .await
        }
        UserAction::Remove { name } => apply(engine, Mutation::RemoveUser { user: name }, out).await,
        UserAction::Keys { name } => print_json(out, &engine.user_keys(&name).await?),
    }
}
