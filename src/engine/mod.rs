//! engine
//!
//! The apply engine: turns a requested change into exactly one new revision
//! of the control repository, or into no visible effect at all.
//!
//! # Apply Cycle
//!
//! ```text
//! Load latest -> Apply mutation -> Serialize + commit + push -> Applied
//!      ^                                    |
//!      +--------- remote moved (retry) -----+
//! ```
//!
//! Every cycle starts from a freshly loaded snapshot and replays the
//! [`Mutation`] on it, so a lost race is resolved by redoing the logical
//! change on top of whatever the other writer published. See [`cycle`] for
//! the state machine.
//!
//! # Invariants
//!
//! - A failed mutation never reaches the control repository
//! - A changing cycle produces exactly one commit with the full model
//! - A cycle that changes nothing produces no commit
//! - Every adapter call is bounded by [`RetryPolicy::timeout`]
//!
//! # Example
//!
//! ```
//! use gitward::control::MemoryControlRepo;
//! use gitward::core::types::RepoName;
//! use gitward::engine::{ApplyEngine, Mutation};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let engine = ApplyEngine::new(MemoryControlRepo::new());
//! let applied = engine
//!     .apply(&Mutation::AddRepository { name: RepoName::new("svc").unwrap() })
//!     .await
//!     .unwrap();
//! assert!(applied.changed);
//! assert_eq!(engine.list_repositories().await.unwrap().len(), 1);
//! # });
//! ```

pub mod cycle;
pub mod mutation;

pub use cycle::{Cycle, CycleState, InvalidTransition};
pub use mutation::Mutation;

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::control::{ControlError, ControlRepo, Snapshot};
use crate::core::config::Config;
use crate::core::model::{Grants, ModelError, SshKey};
use crate::core::types::{GroupName, Oid, RepoName, Username};

/// Upper bound for the backoff between attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

// =============================================================================
// Retry policy
// =============================================================================

/// How hard the engine tries before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Bound on each individual adapter call.
    pub timeout: Duration,
    /// Delay before the second attempt; doubles for every further one.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(30),
            retry_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts(),
            timeout: config.timeout(),
            retry_delay: config.retry_delay(),
        }
    }

    /// Backoff after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_delay
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY.max(self.retry_delay))
    }
}

// =============================================================================
// Errors
// =============================================================================

/// The error taxonomy callers see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DuplicateEntity,
    NotFound,
    InvalidArgument,
    MalformedConfig,
    ApplyConflict,
    ApplyFailure,
}

/// Errors from the apply engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The mutation was rejected by the model.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The control repository cannot be read as a model.
    #[error("malformed control repository: {0}")]
    MalformedConfig(String),

    /// Every attempt lost the race against another writer.
    #[error("control repository kept changing; gave up after {attempts} attempts")]
    ApplyConflict { attempts: u32 },

    /// Transport, storage or timeout failure.
    #[error("apply failed: {0}")]
    ApplyFailure(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Model(ModelError::DuplicateEntity { .. }) => ErrorKind::DuplicateEntity,
            EngineError::Model(ModelError::NotFound { .. }) => ErrorKind::NotFound,
            EngineError::Model(ModelError::InvalidArgument(_)) => ErrorKind::InvalidArgument,
            EngineError::MalformedConfig(_) => ErrorKind::MalformedConfig,
            EngineError::ApplyConflict { .. } => ErrorKind::ApplyConflict,
            EngineError::ApplyFailure(_) => ErrorKind::ApplyFailure,
        }
    }

    /// Whether the caller's request was at fault (as opposed to the system).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::DuplicateEntity | ErrorKind::NotFound | ErrorKind::InvalidArgument
        )
    }
}

impl From<ControlError> for EngineError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::Malformed(e) => EngineError::MalformedConfig(e.to_string()),
            other => EngineError::ApplyFailure(other.to_string()),
        }
    }
}

impl From<InvalidTransition> for EngineError {
    fn from(err: InvalidTransition) -> Self {
        EngineError::ApplyFailure(format!("internal error: {err}"))
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Outcome of a successful apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Applied {
    /// The revision the model now lives at; `None` only for a no-op on an
    /// empty control repository.
    pub revision: Option<Oid>,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    /// `false` when the mutation left the model as it was.
    pub changed: bool,
}

/// Applies mutations to a control repository.
///
/// Holds no model state between calls; every operation starts from the
/// latest revision.
#[derive(Debug)]
pub struct ApplyEngine<C> {
    control: C,
    policy: RetryPolicy,
}

impl<C: ControlRepo> ApplyEngine<C> {
    pub fn new(control: C) -> Self {
        Self {
            control,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Apply `mutation` and publish the result.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Model`] if the mutation is invalid against the
    ///   latest model; nothing is committed
    /// - [`EngineError::ApplyConflict`] if every attempt lost the race
    /// - [`EngineError::MalformedConfig`] if the latest revision is unreadable
    /// - [`EngineError::ApplyFailure`] on transport failure or timeout
    pub async fn apply(&self, mutation: &Mutation) -> Result<Applied, EngineError> {
        let mut cycle = Cycle::new();
        let result = self.run_cycle(&mut cycle, mutation).await;
        if result.is_err() {
            cycle.abort();
        }
        result
    }

    async fn run_cycle(&self, cycle: &mut Cycle, mutation: &Mutation) -> Result<Applied, EngineError> {
        let message = format!("gitward: {mutation}");
        loop {
            let snapshot = self.bounded("load", self.control.load_latest()).await?;
            cycle.advance(CycleState::Loaded)?;

            let mut model = snapshot.model.clone();
            mutation.apply(&mut model)?;
            cycle.advance(CycleState::Mutated)?;

            if model == snapshot.model {
                cycle.advance(CycleState::Applied)?;
                info!(%mutation, "mutation changed nothing; no commit");
                return Ok(Applied {
                    revision: snapshot.base,
                    attempts: cycle.attempt(),
                    changed: false,
                });
            }

            cycle.advance(CycleState::Committing)?;
            let pushed = self
                .bounded(
                    "commit",
                    self.control
                        .commit_and_push(&model, snapshot.base.as_ref(), &message),
                )
                .await;
            match pushed {
                Ok(revision) => {
                    cycle.advance(CycleState::Applied)?;
                    info!(
                        %mutation,
                        revision = revision.short(12),
                        attempts = cycle.attempt(),
                        "applied"
                    );
                    return Ok(Applied {
                        revision: Some(revision),
                        attempts: cycle.attempt(),
                        changed: true,
                    });
                }
                Err(err @ ControlError::Conflict { .. }) => {
                    let attempt = cycle.attempt();
                    if attempt >= self.policy.max_attempts {
                        warn!(%mutation, attempts = attempt, "giving up: {err}");
                        return Err(EngineError::ApplyConflict { attempts: attempt });
                    }
                    let delay = self.policy.delay_after(attempt);
                    warn!(%mutation, attempt, ?delay, "retrying: {err}");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Run one adapter call under the policy's timeout.
    async fn bounded<T, F>(&self, op: &str, call: F) -> Result<T, ControlError>
    where
        F: Future<Output = Result<T, ControlError>>,
    {
        tokio::time::timeout(self.policy.timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(ControlError::Transport(format!(
                    "{op} timed out after {:?}",
                    self.policy.timeout
                )))
            })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The latest model together with its revision.
    pub async fn snapshot(&self) -> Result<Snapshot, EngineError> {
        Ok(self.bounded("load", self.control.load_latest()).await?)
    }

    pub async fn list_repositories(&self) -> Result<Vec<RepoName>, EngineError> {
        Ok(self.snapshot().await?.model.list_repositories())
    }

    pub async fn list_users(&self) -> Result<Vec<Username>, EngineError> {
        Ok(self.snapshot().await?.model.list_users())
    }

    pub async fn list_groups(
        &self,
    ) -> Result<BTreeMap<GroupName, BTreeSet<Username>>, EngineError> {
        Ok(self.snapshot().await?.model.list_groups())
    }

    pub async fn group_has_user(
        &self,
        group: &GroupName,
        user: &Username,
    ) -> Result<bool, EngineError> {
        Ok(self.snapshot().await?.model.group_has_user(group, user)?)
    }

    pub async fn permissions(&self, repo: &RepoName) -> Result<Grants, EngineError> {
        Ok(self.snapshot().await?.model.permissions(repo)?)
    }

    pub async fn user_keys(&self, user: &Username) -> Result<Vec<SshKey>, EngineError> {
        Ok(self.snapshot().await?.model.user_keys(user)?)
    }
}
