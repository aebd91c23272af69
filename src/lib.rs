//! gitward - declarative access control for gitolite
//!
//! gitward keeps the access-control configuration of a gitolite server
//! (repositories, users and their SSH keys, groups, permission grants) in
//! its control repository and changes it one atomic commit at a time.
//!
//! # Architecture
//!
//! The codebase follows a strict layered architecture:
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates to engine)
//! - [`engine`] - Load -> Mutate -> Commit -> Push cycle with retries
//! - [`control`] - Control repository adapter (git-backed and in-memory)
//! - [`format`] - Serialization of the model to gitolite files and back
//! - [`core`] - Domain types, the access model, config and locking
//! - [`git`] - Single interface for all Git operations
//!
//! # Correctness Invariants
//!
//! gitward maintains the following invariants:
//!
//! 1. A mutation is either published as exactly one commit or has no effect
//! 2. Every mutation starts from the latest published revision
//! 3. The control branch is never force-pushed
//! 4. A control repository that cannot be read faithfully is never rewritten

pub mod cli;
pub mod control;
pub mod core;
pub mod engine;
pub mod format;
pub mod git;
