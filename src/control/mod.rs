//! control
//!
//! The control repository adapter.
//!
//! # Design
//!
//! The control repository is the administrative git repository whose
//! contents the enforcement layer reads. [`ControlRepo`] offers exactly two
//! operations: load the latest revision as an [`AccessModel`], and publish
//! a new model on top of a known revision.
//!
//! Publishing is optimistic: [`ControlRepo::commit_and_push`] names the
//! revision the model was derived from and fails with
//! [`ControlError::Conflict`] if the remote has moved since. Nothing is
//! ever force-pushed.
//!
//! The trait is async because both operations involve network I/O.
//!
//! # Implementations
//!
//! - [`GitControlRepo`] - a real remote, through a local bare mirror
//! - [`MemoryControlRepo`] - in-process, with fault injection for tests

pub mod git;
pub mod memory;

pub use self::git::{GitControlRepo, GitControlSettings};
pub use memory::MemoryControlRepo;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::model::AccessModel;
use crate::core::types::Oid;
use crate::format::FormatError;

/// Errors from control repository operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    /// The control branch moved past the base revision.
    #[error("control repository moved: expected {}, found {}", show(.expected), show(.actual))]
    Conflict {
        expected: Option<Oid>,
        actual: Option<Oid>,
    },

    /// The latest revision cannot be read as a model.
    #[error("malformed control repository: {0}")]
    Malformed(#[from] FormatError),

    /// Fetch, push, local storage or any other infrastructure failure.
    #[error("control repository unavailable: {0}")]
    Transport(String),
}

fn show(oid: &Option<Oid>) -> String {
    match oid {
        Some(oid) => oid.short(12).to_string(),
        None => "<empty>".to_string(),
    }
}

impl ControlError {
    /// Whether this is a lost race against another writer.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControlError::Conflict { .. })
    }
}

/// The latest revision of the control repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub model: AccessModel,
    /// `None` when the control branch has no commits yet
    pub base: Option<Oid>,
}

/// Access to a control repository.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow use across async tasks.
#[async_trait]
pub trait ControlRepo: Send + Sync {
    /// Load the model at the tip of the control branch.
    async fn load_latest(&self) -> Result<Snapshot, ControlError>;

    /// Publish `model` as a child of `base` and return the new revision.
    ///
    /// # Errors
    ///
    /// - [`ControlError::Conflict`] if the branch tip is no longer `base`
    async fn commit_and_push(
        &self,
        model: &AccessModel,
        base: Option<&Oid>,
        message: &str,
    ) -> Result<Oid, ControlError>;
}
