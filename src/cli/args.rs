//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands and override the config file:
//! - `--config <path>`: Read this config file instead of searching
//! - `--remote <url>`: Control repository URL
//! - `--branch <name>`: Control branch
//! - `--mirror <dir>`: Local mirror directory
//! - `--debug`: Enable debug logging

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::core::permission::PermissionLevel;
use crate::core::types::{GroupName, KeyLabel, RepoName, Username};

/// gitward - declarative gitolite access control
#[derive(Parser, Debug)]
#[command(name = "gitward")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file to use
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Control repository URL
    #[arg(long, global = true, value_name = "URL")]
    pub remote: Option<String>,

    /// Control branch
    #[arg(long, global = true, value_name = "NAME")]
    pub branch: Option<String>,

    /// Local mirror directory
    #[arg(long, global = true, value_name = "DIR")]
    pub mirror: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage repositories
    #[command(
        after_help = "\
EXAMPLES:
    gitward repos add svc
    gitward repos perms svc"
    )]
    Repos {
        #[command(subcommand)]
        action: RepoAction,
    },

    /// Manage users
    #[command(
        after_help = "\
EXAMPLES:
    gitward users add alice 'ssh-ed25519 AAAA... alice@laptop'
    gitward users add bob @bob.pub --label work
    gitward users remove alice"
    )]
    Users {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Manage additional SSH keys of existing users
    Keys {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Manage groups
    #[command(
        after_help = "\
EXAMPLES:
    gitward groups add devs alice bob
    gitward groups add-members devs carol
    gitward groups has devs carol"
    )]
    Groups {
        #[command(subcommand)]
        action: GroupAction,
    },

    /// Grant and revoke permissions
    #[command(
        long_about = "Grant and revoke permissions.\n\n\
            Granting to a group adds the group's current members. Users who join \
            the group later are not covered by the grant.",
        after_help = "\
EXAMPLES:
    gitward perms set svc RW+ --user alice --user bob
    gitward perms set svc R --group devs
    gitward perms revoke svc R

LEVELS:
    -  R  RW  RW+  RWC  RW+C  RWD  RW+D  RWCD  RW+CD"
    )]
    Perms {
        #[command(subcommand)]
        action: PermAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum RepoAction {
    /// List repositories
    List,
    /// Add a repository
    Add { name: RepoName },
    /// Remove a repository and its grants
    Remove { name: RepoName },
    /// Show the grants of a repository
    Perms { name: RepoName },
}

/// An SSH public key, given inline or as `@FILE`.
#[derive(Args, Debug)]
pub struct KeyArgs {
    /// Public key text, or @FILE to read it from a file
    #[arg(value_name = "KEY_OR_@FILE")]
    pub key: String,

    /// Label distinguishing this key from the user's other keys
    #[arg(long)]
    pub label: Option<KeyLabel>,
}

#[derive(Subcommand, Debug)]
pub enum UserAction {
    /// List users
    List,
    /// Add a user with their first key
    Add {
        name: Username,
        #[command(flatten)]
        key: KeyArgs,
    },
    /// Remove a user, their group memberships and grants
    Remove { name: Username },
    /// Show a user's keys
    Keys { name: Username },
}

#[derive(Subcommand, Debug)]
pub enum KeyAction {
    /// Add a key to an existing user
    Add {
        user: Username,
        #[command(flatten)]
        key: KeyArgs,
    },
    /// Remove one of a user's keys; removing the last one removes the user
    Remove {
        user: Username,
        /// Label of the key (omit for the unlabeled key)
        #[arg(long)]
        label: Option<KeyLabel>,
    },
}

#[derive(Subcommand, Debug)]
pub enum GroupAction {
    /// List groups and their members
    List,
    /// Create a group
    Add {
        name: GroupName,
        members: Vec<Username>,
    },
    /// Remove a group
    Remove { name: GroupName },
    /// Add users to a group
    AddMembers {
        group: GroupName,
        #[arg(required = true)]
        users: Vec<Username>,
    },
    /// Remove users from a group
    RemoveMembers {
        group: GroupName,
        #[arg(required = true)]
        users: Vec<Username>,
    },
    /// Check whether a user is a member of a group
    Has { group: GroupName, user: Username },
}

#[derive(Subcommand, Debug)]
pub enum PermAction {
    /// Grant a permission level to users or to a group's current members
    Set {
        repo: RepoName,
        level: PermissionLevel,
        /// User to grant (repeatable)
        #[arg(long = "user", value_name = "USER", required_unless_present = "group")]
        users: Vec<Username>,
        /// Group whose members to grant
        #[arg(long, conflicts_with = "users")]
        group: Option<GroupName>,
    },
    /// Remove every grant of a level
    Revoke {
        repo: RepoName,
        level: PermissionLevel,
    },
}
