//! git
//!
//! Single interface for all Git operations.
//!
//! # Architecture
//!
//! This module is the **only doorway** to Git. No other module imports
//! `git2`; the control repository adapter reaches git exclusively through
//! [`Git`].
//!
//! # Responsibilities
//!
//! - Opening (or creating) the bare local mirror
//! - Fetching the control branch with pruning
//! - Reading a commit's tree as a flat list of files
//! - Writing nested trees and commits
//! - Pushing without force and reporting rejections as typed errors
//!
//! # Invariants
//!
//! - Pushes never force; a remote that moved is reported, not overwritten
//! - All operations return strong types ([`Oid`](crate::core::types::Oid))

mod interface;

pub use interface::{BlobEntry, Git, GitError, Identity, RemoteSpec};
