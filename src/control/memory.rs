//! control::memory
//!
//! In-process control repository for deterministic testing.
//!
//! # Design
//!
//! Revisions are serialized [`ConfigTree`]s chained into a linear history,
//! identified by a SHA-256 over parent, message and files. Loading and
//! committing go through the same [`ConfigFormat`] as the git-backed
//! repository, so the round trip is exercised on every cycle.
//!
//! Failure scenarios can be injected:
//! - a transport failure on the next load or commit
//! - a concurrent writer that commits right before the next commit attempt
//! - a stall before every commit (for timeout tests)
//!
//! # Example
//!
//! ```
//! use gitward::control::{ControlRepo, MemoryControlRepo};
//! use gitward::core::model::AccessModel;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let repo = MemoryControlRepo::new();
//! let snapshot = repo.load_latest().await.unwrap();
//! assert!(snapshot.base.is_none());
//!
//! let revision = repo
//!     .commit_and_push(&AccessModel::new(), None, "gitward: init")
//!     .await
//!     .unwrap();
//! assert_eq!(repo.tip(), Some(revision));
//! # });
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{ControlError, ControlRepo, Snapshot};
use crate::core::model::AccessModel;
use crate::core::types::Oid;
use crate::format::{ConfigFormat, ConfigTree, GitoliteFormat};

/// A change made by a simulated concurrent writer.
type Writer = Box<dyn FnOnce(&mut AccessModel) + Send>;

/// One revision of the in-memory history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCommit {
    pub revision: Oid,
    pub parent: Option<Oid>,
    pub message: String,
    pub tree: ConfigTree,
}

/// In-memory control repository.
///
/// Thread-safe via internal `Arc<Mutex<...>>`; clones share state.
#[derive(Clone)]
pub struct MemoryControlRepo {
    inner: Arc<Mutex<Inner>>,
    format: Arc<dyn ConfigFormat>,
}

#[derive(Default)]
struct Inner {
    history: Vec<MemoryCommit>,
    fail_next_load: Option<String>,
    fail_next_commit: Option<String>,
    writers: VecDeque<Writer>,
    commit_delay: Option<Duration>,
    load_calls: u32,
    commit_calls: u32,
}

impl std::fmt::Debug for MemoryControlRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryControlRepo")
            .field("revisions", &inner.history.len())
            .field("pending_writers", &inner.writers.len())
            .finish()
    }
}

impl Default for MemoryControlRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryControlRepo {
    /// An empty control repository (no revisions yet).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            format: Arc::new(GitoliteFormat::new()),
        }
    }

    /// A control repository whose first revision holds `model`.
    pub fn with_model(model: &AccessModel) -> Self {
        let repo = Self::new();
        let tree = repo.format.serialize(model);
        repo.lock().record(tree, "seed");
        repo
    }

    /// A control repository whose first revision holds raw files.
    pub fn with_tree(tree: ConfigTree) -> Self {
        let repo = Self::new();
        repo.lock().record(tree, "seed");
        repo
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Make the next `load_latest` fail with a transport error.
    pub fn fail_next_load(&self, message: impl Into<String>) {
        self.lock().fail_next_load = Some(message.into());
    }

    /// Make the next `commit_and_push` fail with a transport error.
    pub fn fail_next_commit(&self, message: impl Into<String>) {
        self.lock().fail_next_commit = Some(message.into());
    }

    /// Queue a writer that commits its change right before the next
    /// `commit_and_push` attempt. One queued writer runs per attempt.
    pub fn queue_concurrent_write<F>(&self, change: F)
    where
        F: FnOnce(&mut AccessModel) + Send + 'static,
    {
        self.lock().writers.push_back(Box::new(change));
    }

    /// Sleep this long before every commit.
    pub fn stall_commits(&self, delay: Duration) {
        self.lock().commit_delay = Some(delay);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Current tip revision.
    pub fn tip(&self) -> Option<Oid> {
        self.lock().tip().map(|c| c.revision.clone())
    }

    /// All revisions, oldest first.
    pub fn history(&self) -> Vec<MemoryCommit> {
        self.lock().history.clone()
    }

    /// Files at the tip.
    pub fn tip_tree(&self) -> ConfigTree {
        self.lock().tip_tree()
    }

    /// Number of `load_latest` calls so far.
    pub fn load_calls(&self) -> u32 {
        self.lock().load_calls
    }

    /// Number of `commit_and_push` calls so far.
    pub fn commit_calls(&self) -> u32 {
        self.lock().commit_calls
    }
}

impl Inner {
    fn tip(&self) -> Option<&MemoryCommit> {
        self.history.last()
    }

    fn tip_tree(&self) -> ConfigTree {
        self.tip().map(|c| c.tree.clone()).unwrap_or_default()
    }

    /// Append a revision on top of the tip.
    fn record(&mut self, tree: ConfigTree, message: &str) -> Oid {
        let parent = self.tip().map(|c| c.revision.clone());
        let revision = revision_id(parent.as_ref(), message, &tree);
        self.history.push(MemoryCommit {
            revision: revision.clone(),
            parent,
            message: message.to_string(),
            tree,
        });
        revision
    }

    fn run_writer(&mut self, writer: Writer, format: &dyn ConfigFormat) -> Result<(), ControlError> {
        let tip_tree = self.tip_tree();
        let mut model = format.deserialize(&tip_tree)?;
        writer(&mut model);
        let tree = format.render_over(&model, &tip_tree);
        self.record(tree, "concurrent writer");
        Ok(())
    }
}

/// Content address of a revision.
fn revision_id(parent: Option<&Oid>, message: &str, tree: &ConfigTree) -> Oid {
    let mut hasher = Sha256::new();
    hasher.update(parent.map(Oid::as_str).unwrap_or_default());
    hasher.update([0u8]);
    hasher.update(message);
    for (path, contents) in tree.iter() {
        hasher.update([0u8]);
        hasher.update(path);
        hasher.update([0u8]);
        hasher.update(contents);
    }
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    Oid::from_sha256(digest)
}

#[async_trait]
impl ControlRepo for MemoryControlRepo {
    async fn load_latest(&self) -> Result<Snapshot, ControlError> {
        let mut inner = self.lock();
        inner.load_calls += 1;
        if let Some(message) = inner.fail_next_load.take() {
            return Err(ControlError::Transport(message));
        }
        let Some(tip) = inner.tip() else {
            return Ok(Snapshot {
                model: AccessModel::new(),
                base: None,
            });
        };
        Ok(Snapshot {
            model: self.format.deserialize(&tip.tree)?,
            base: Some(tip.revision.clone()),
        })
    }

    async fn commit_and_push(
        &self,
        model: &AccessModel,
        base: Option<&Oid>,
        message: &str,
    ) -> Result<Oid, ControlError> {
        let delay = self.lock().commit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        inner.commit_calls += 1;
        if let Some(message) = inner.fail_next_commit.take() {
            return Err(ControlError::Transport(message));
        }
        if let Some(writer) = inner.writers.pop_front() {
            inner.run_writer(writer, self.format.as_ref())?;
        }

        let tip = inner.tip().map(|c| c.revision.clone());
        if tip.as_ref() != base {
            return Err(ControlError::Conflict {
                expected: base.cloned(),
                actual: tip,
            });
        }
        let tree = self.format.render_over(model, &inner.tip_tree());
        Ok(inner.record(tree, message))
    }
}
