//! keys command - add and remove individual SSH keys

use std::io::Write;

use anyhow::Result;

use super::{apply, read_key};
use crate::cli::args::KeyAction;
use crate::control::ControlRepo;
use crate::engine::{ApplyEngine, Mutation};

pub(super) async fn run<C: ControlRepo>(
    action: KeyAction,
    engine: &ApplyEngine<C>,
    out: &mut dyn Write,
) -> Result<()> {
    let mutation = match action {
        KeyAction::Add { user, key } => {
            let mut ssh_key = read_key(&key.key)?;
            if let Some(label) = key.label {
                ssh_key = ssh_key.with_label(label);
            }
            Mutation::AddKey { user, key: ssh_key }
        }
        KeyAction::Remove { user, label } => Mutation::RemoveKey { user, label },
    };
    apply(engine, mutation, out).await
}
