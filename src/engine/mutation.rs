//! engine::mutation
//!
//! Replayable mutation intents.
//!
//! A [`Mutation`] records what the caller asked for, not the model it was
//! computed against. The apply cycle replays it on the freshly loaded model
//! after every lost race, so a retry never clobbers a concurrent change.

use crate::core::model::{AccessModel, Grantee, ModelError, SshKey};
use crate::core::permission::PermissionLevel;
use crate::core::types::{GroupName, KeyLabel, RepoName, Username};

/// One logical change to the access model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    AddRepository {
        name: RepoName,
    },
    RemoveRepository {
        name: RepoName,
    },
    AddUser {
        user: Username,
        key: SshKey,
    },
    RemoveUser {
        user: Username,
    },
    AddKey {
        user: Username,
        key: SshKey,
    },
    RemoveKey {
        user: Username,
        label: Option<KeyLabel>,
    },
    AddGroup {
        name: GroupName,
        members: Vec<Username>,
    },
    RemoveGroup {
        name: GroupName,
    },
    AddToGroup {
        users: Vec<Username>,
        group: GroupName,
    },
    RemoveFromGroup {
        users: Vec<Username>,
        group: GroupName,
    },
    SetPermission {
        repo: RepoName,
        level: PermissionLevel,
        grantee: Grantee,
    },
    RevokePermission {
        repo: RepoName,
        level: PermissionLevel,
    },
}

impl Mutation {
    /// Apply this change to `model`.
    ///
    /// On error the model is unchanged.
    pub fn apply(&self, model: &mut AccessModel) -> Result<(), ModelError> {
        match self {
            Mutation::AddRepository { name } => model.add_repository(name.clone()),
            Mutation::RemoveRepository { name } => model.remove_repository(name),
            Mutation::AddUser { user, key } => model.add_user(user.clone(), key.clone()),
            Mutation::RemoveUser { user } => model.remove_user(user),
            Mutation::AddKey { user, key } => model.add_key(user, key.clone()),
            Mutation::RemoveKey { user, label } => model.remove_key(user, label.as_ref()),
            Mutation::AddGroup { name, members } => model.add_group(name.clone(), members),
            Mutation::RemoveGroup { name } => model.remove_group(name),
            Mutation::AddToGroup { users, group } => model.add_to_group(users, group),
            Mutation::RemoveFromGroup { users, group } => model.remove_from_group(users, group),
            Mutation::SetPermission {
                repo,
                level,
                grantee,
            } => model.set_permission(repo, *level, grantee),
            Mutation::RevokePermission { repo, level } => model.revoke_permission(repo, *level),
        }
    }
}

fn join(users: &[Username]) -> String {
    users
        .iter()
        .map(Username::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// One-line description, used as the commit subject.
impl std::fmt::Display for Mutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mutation::AddRepository { name } => write!(f, "add repository {name}"),
            Mutation::RemoveRepository { name } => write!(f, "remove repository {name}"),
            Mutation::AddUser { user, .. } => write!(f, "add user {user}"),
            Mutation::RemoveUser { user } => write!(f, "remove user {user}"),
            Mutation::AddKey { user, key } => match key.label() {
                Some(label) => write!(f, "add key {label} for {user}"),
                None => write!(f, "add key for {user}"),
            },
            Mutation::RemoveKey { user, label } => match label {
                Some(label) => write!(f, "remove key {label} of {user}"),
                None => write!(f, "remove key of {user}"),
            },
            Mutation::AddGroup { name, members } if members.is_empty() => {
                write!(f, "add group @{name}")
            }
            Mutation::AddGroup { name, members } => {
                write!(f, "add group @{name} with {}", join(members))
            }
            Mutation::RemoveGroup { name } => write!(f, "remove group @{name}"),
            Mutation::AddToGroup { users, group } => {
                write!(f, "add {} to @{group}", join(users))
            }
            Mutation::RemoveFromGroup { users, group } => {
                write!(f, "remove {} from @{group}", join(users))
            }
            Mutation::SetPermission {
                repo,
                level,
                grantee: Grantee::Users(users),
            } => write!(f, "grant {level} on {repo} to {}", join(users)),
            Mutation::SetPermission {
                repo,
                level,
                grantee: Grantee::Group(group),
            } => write!(f, "grant {level} on {repo} to members of @{group}"),
            Mutation::RevokePermission { repo, level } => {
                write!(f, "revoke {level} on {repo}")
            }
        }
    }
}
