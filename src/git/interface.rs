//! git::interface
//!
//! Git interface implementation using git2.
//!
//! # Architecture
//!
//! The [`Git`] struct wraps one bare repository (the local mirror of the
//! control repository). No other module imports `git2`, so every git
//! failure reaches the rest of the crate as a [`GitError`].
//!
//! Files cross this boundary as [`BlobEntry`] values: a slash-separated
//! path, a file mode and raw bytes. Interpreting their contents is the
//! caller's job.
//!
//! # Error Handling
//!
//! - [`GitError::RefNotFound`] / [`GitError::ObjectNotFound`]: missing data
//! - [`GitError::NonFastForward`] / [`GitError::PushRejected`]: the remote
//!   refused a push
//! - [`GitError::Transport`]: fetch or push could not talk to the remote
//!
//! # Example
//!
//! ```ignore
//! use gitward::git::{BlobEntry, Git, Identity, RemoteSpec};
//!
//! let git = Git::open_or_init_bare(mirror_dir)?;
//! let remote = RemoteSpec::new("git@host:gitolite-admin");
//! git.fetch(&remote, &["+refs/heads/master:refs/gitward/remote/master"])?;
//! let tip = git.try_resolve_ref("refs/gitward/remote/master")?;
//! ```

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::types::{Oid, TypeError};

/// Errors from Git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The mirror could not be opened or created.
    #[error("cannot open repository at {path}: {message}")]
    OpenFailed { path: PathBuf, message: String },

    /// Requested ref does not exist.
    #[error("ref not found: {refname}")]
    RefNotFound { refname: String },

    /// Object not found in repository.
    #[error("object not found: {oid}")]
    ObjectNotFound { oid: String },

    /// Invalid object id format.
    #[error("invalid object id: {oid}")]
    InvalidOid { oid: String },

    /// A tree path that git cannot store.
    #[error("invalid tree path: {path}")]
    InvalidPath { path: String },

    /// A tree entry other than a file, symlink or directory.
    #[error("unsupported tree entry: {path}")]
    UnsupportedEntry { path: String },

    /// The remote refused a push because it would not fast-forward.
    #[error("push to {refname} rejected: not a fast-forward")]
    NonFastForward { refname: String },

    /// The remote refused a ref update for another reason.
    #[error("push to {refname} rejected: {message}")]
    PushRejected { refname: String, message: String },

    /// Network, authentication or remote-side failure.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Internal git2 error.
    #[error("git error: {message}")]
    Internal { message: String },
}

impl GitError {
    /// Create a GitError from a git2::Error with richer context.
    fn from_git2(err: git2::Error, context: &str) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => {
                if context.starts_with("refs/") {
                    GitError::RefNotFound {
                        refname: context.to_string(),
                    }
                } else {
                    GitError::ObjectNotFound {
                        oid: context.to_string(),
                    }
                }
            }
            git2::ErrorCode::InvalidSpec => GitError::InvalidOid {
                oid: context.to_string(),
            },
            _ => GitError::Internal {
                message: format!("{}: {}", context, err.message()),
            },
        }
    }

    /// Map a fetch or push failure.
    fn from_transport(err: git2::Error, refname: &str) -> Self {
        match err.code() {
            git2::ErrorCode::NotFastForward => GitError::NonFastForward {
                refname: refname.to_string(),
            },
            _ => GitError::Transport {
                message: err.message().to_string(),
            },
        }
    }
}

impl From<TypeError> for GitError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidOid(msg) => GitError::InvalidOid { oid: msg },
            other => GitError::Internal {
                message: other.to_string(),
            },
        }
    }
}

/// One file of a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    /// Slash-separated path relative to the tree root
    pub path: String,
    /// Git file mode (see the `MODE_*` constants)
    pub mode: i32,
    pub data: Vec<u8>,
}

impl BlobEntry {
    pub const MODE_FILE: i32 = 0o100644;
    pub const MODE_EXECUTABLE: i32 = 0o100755;
    pub const MODE_SYMLINK: i32 = 0o120000;
    const MODE_TREE: i32 = 0o040000;

    /// A regular, non-executable file.
    pub fn file(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            mode: Self::MODE_FILE,
            data: data.into(),
        }
    }
}

/// Where to fetch from and push to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSpec {
    /// URL or local path of the remote repository
    pub url: String,
    /// Private key for SSH; the SSH agent is asked when `None`
    pub ssh_key: Option<PathBuf>,
}

impl RemoteSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ssh_key: None,
        }
    }

    pub fn with_ssh_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.ssh_key = Some(key.into());
        self
    }
}

/// Author and committer of new commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

/// Credential attempts before giving up; libgit2 re-asks on every failure.
const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

/// The Git interface over one bare repository.
pub struct Git {
    repo: git2::Repository,
}

impl std::fmt::Debug for Git {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Git")
            .field("path", &self.repo.path())
            .finish()
    }
}

impl Git {
    // =========================================================================
    // Repository Opening
    // =========================================================================

    /// Open the bare repository at `path`, creating it if needed.
    ///
    /// # Errors
    ///
    /// - [`GitError::OpenFailed`] if `path` holds something that is not a
    ///   bare repository, or cannot be created
    pub fn open_or_init_bare(path: &Path) -> Result<Self, GitError> {
        let open_failed = |e: git2::Error| GitError::OpenFailed {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        };
        let repo = match git2::Repository::open_bare(path) {
            Ok(repo) => repo,
            Err(e) if e.code() == git2::ErrorCode::NotFound => {
                git2::Repository::init_bare(path).map_err(open_failed)?
            }
            Err(e) => return Err(open_failed(e)),
        };
        Ok(Self { repo })
    }

    /// Path of the repository directory.
    pub fn path(&self) -> &Path {
        self.repo.path()
    }

    // =========================================================================
    // Ref Operations
    // =========================================================================

    /// Resolve a ref to the commit it points at, or `None` if it is absent.
    pub fn try_resolve_ref(&self, refname: &str) -> Result<Option<Oid>, GitError> {
        let reference = match self.repo.find_reference(refname) {
            Ok(reference) => reference,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(GitError::from_git2(e, refname)),
        };
        let commit = reference
            .peel_to_commit()
            .map_err(|e| GitError::from_git2(e, refname))?;
        Ok(Some(to_oid(commit.id())?))
    }

    /// Point `refname` at `target`, creating or overwriting it.
    ///
    /// Only used for refs private to the mirror.
    pub fn set_ref(&self, refname: &str, target: &Oid, message: &str) -> Result<(), GitError> {
        self.repo
            .reference(refname, from_oid(target)?, true, message)
            .map_err(|e| GitError::from_git2(e, refname))?;
        Ok(())
    }

    /// Delete a ref; a missing ref is not an error.
    pub fn delete_ref(&self, refname: &str) -> Result<(), GitError> {
        match self.repo.find_reference(refname) {
            Ok(mut reference) => reference
                .delete()
                .map_err(|e| GitError::from_git2(e, refname)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(()),
            Err(e) => Err(GitError::from_git2(e, refname)),
        }
    }

    // =========================================================================
    // Trees and Commits
    // =========================================================================

    /// Every file reachable from the tree of `commit`, in path order.
    ///
    /// # Errors
    ///
    /// - [`GitError::UnsupportedEntry`] for submodules and non-UTF-8 names
    pub fn read_tree(&self, commit: &Oid) -> Result<Vec<BlobEntry>, GitError> {
        let commit = self
            .repo
            .find_commit(from_oid(commit)?)
            .map_err(|e| GitError::from_git2(e, commit.as_str()))?;
        let tree = commit
            .tree()
            .map_err(|e| GitError::from_git2(e, "commit tree"))?;

        let mut entries = Vec::new();
        let mut failure: Option<GitError> = None;
        let walked = tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
            let path = match entry.name() {
                Some(name) => format!("{root}{name}"),
                None => {
                    failure = Some(GitError::UnsupportedEntry {
                        path: format!("{root}<non-utf8 name>"),
                    });
                    return git2::TreeWalkResult::Abort;
                }
            };
            match entry.kind() {
                Some(git2::ObjectType::Tree) => git2::TreeWalkResult::Ok,
                Some(git2::ObjectType::Blob) => match self.repo.find_blob(entry.id()) {
                    Ok(blob) => {
                        entries.push(BlobEntry {
                            path,
                            mode: entry.filemode(),
                            data: blob.content().to_vec(),
                        });
                        git2::TreeWalkResult::Ok
                    }
                    Err(e) => {
                        failure = Some(GitError::from_git2(e, &path));
                        git2::TreeWalkResult::Abort
                    }
                },
                _ => {
                    failure = Some(GitError::UnsupportedEntry { path });
                    git2::TreeWalkResult::Abort
                }
            }
        });

        // An aborted walk reports a generic error; the recorded one is better
        if let Some(err) = failure {
            return Err(err);
        }
        walked.map_err(|e| GitError::from_git2(e, "tree walk"))?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Write `entries` as a tree, creating subtrees for nested paths.
    ///
    /// # Errors
    ///
    /// - [`GitError::InvalidPath`] for empty, `.`/`..` or duplicate paths, or
    ///   a path used both as a file and as a directory
    pub fn write_tree(&self, entries: &[BlobEntry]) -> Result<Oid, GitError> {
        let relative: Vec<(&str, &BlobEntry)> =
            entries.iter().map(|e| (e.path.as_str(), e)).collect();
        to_oid(self.build_tree(&relative)?)
    }

    fn build_tree(&self, entries: &[(&str, &BlobEntry)]) -> Result<git2::Oid, GitError> {
        let mut builder = self
            .repo
            .treebuilder(None)
            .map_err(|e| GitError::from_git2(e, "treebuilder"))?;
        let mut subdirs: BTreeMap<&str, Vec<(&str, &BlobEntry)>> = BTreeMap::new();
        let mut files: Vec<&str> = Vec::new();

        for (relative, entry) in entries {
            let invalid = || GitError::InvalidPath {
                path: entry.path.clone(),
            };
            let (name, rest) = match relative.split_once('/') {
                Some((dir, rest)) => (dir, Some(rest)),
                None => (*relative, None),
            };
            if name.is_empty() || name == "." || name == ".." {
                return Err(invalid());
            }
            match rest {
                Some(rest) => subdirs.entry(name).or_default().push((rest, entry)),
                None => {
                    if files.contains(&name) {
                        return Err(invalid());
                    }
                    files.push(name);
                    let blob = self
                        .repo
                        .blob(&entry.data)
                        .map_err(|e| GitError::from_git2(e, &entry.path))?;
                    builder
                        .insert(name, blob, entry.mode)
                        .map_err(|e| GitError::from_git2(e, &entry.path))?;
                }
            }
        }

        for (dir, children) in subdirs {
            if files.contains(&dir) {
                return Err(GitError::InvalidPath {
                    path: dir.to_string(),
                });
            }
            let subtree = self.build_tree(&children)?;
            builder
                .insert(dir, subtree, BlobEntry::MODE_TREE)
                .map_err(|e| GitError::from_git2(e, dir))?;
        }

        builder
            .write()
            .map_err(|e| GitError::from_git2(e, "write tree"))
    }

    /// Create a commit of `tree`, not attached to any ref.
    ///
    /// `parent` is `None` for a root commit.
    pub fn create_commit(
        &self,
        tree: &Oid,
        parent: Option<&Oid>,
        message: &str,
        author: &Identity,
    ) -> Result<Oid, GitError> {
        let tree = self
            .repo
            .find_tree(from_oid(tree)?)
            .map_err(|e| GitError::from_git2(e, tree.as_str()))?;
        let parent = parent
            .map(|p| {
                self.repo
                    .find_commit(from_oid(p)?)
                    .map_err(|e| GitError::from_git2(e, p.as_str()))
            })
            .transpose()?;
        let signature = git2::Signature::now(&author.name, &author.email)
            .map_err(|e| GitError::from_git2(e, "signature"))?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let oid = self
            .repo
            .commit(None, &signature, &signature, message, &tree, &parents)
            .map_err(|e| GitError::from_git2(e, "commit"))?;
        to_oid(oid)
    }

    /// Full message of a commit.
    pub fn commit_message(&self, commit: &Oid) -> Result<String, GitError> {
        let commit = self
            .repo
            .find_commit(from_oid(commit)?)
            .map_err(|e| GitError::from_git2(e, commit.as_str()))?;
        Ok(String::from_utf8_lossy(commit.message_bytes()).into_owned())
    }

    // =========================================================================
    // Remote Operations
    // =========================================================================

    /// Fetch `refspecs` from the remote, pruning stale destination refs.
    pub fn fetch(&self, remote: &RemoteSpec, refspecs: &[&str]) -> Result<(), GitError> {
        let mut handle = self
            .repo
            .remote_anonymous(&remote.url)
            .map_err(|e| GitError::from_transport(e, &remote.url))?;
        let attempts = Cell::new(0);
        let mut options = git2::FetchOptions::new();
        options
            .remote_callbacks(callbacks(remote, &attempts))
            .prune(git2::FetchPrune::On)
            .download_tags(git2::AutotagOption::None);

        handle
            .fetch(refspecs, Some(&mut options), None)
            .map_err(|e| GitError::from_transport(e, &remote.url))
    }

    /// Push local ref `src` to remote ref `dst` without force.
    ///
    /// # Errors
    ///
    /// - [`GitError::NonFastForward`] if `dst` moved on the remote
    /// - [`GitError::PushRejected`] for other refusals (hooks, permissions)
    /// - [`GitError::Transport`] if the remote cannot be reached
    pub fn push(&self, remote: &RemoteSpec, src: &str, dst: &str) -> Result<(), GitError> {
        let mut handle = self
            .repo
            .remote_anonymous(&remote.url)
            .map_err(|e| GitError::from_transport(e, dst))?;
        let attempts = Cell::new(0);
        let rejection: RefCell<Option<String>> = RefCell::new(None);

        let mut cbs = callbacks(remote, &attempts);
        cbs.push_update_reference(|_refname, status| {
            if let Some(status) = status {
                *rejection.borrow_mut() = Some(status.to_string());
            }
            Ok(())
        });
        let mut options = git2::PushOptions::new();
        options.remote_callbacks(cbs);

        handle
            .push(&[format!("{src}:{dst}")], Some(&mut options))
            .map_err(|e| GitError::from_transport(e, dst))?;
        drop(options);

        match rejection.into_inner() {
            None => Ok(()),
            Some(status) if is_non_fast_forward(&status) => Err(GitError::NonFastForward {
                refname: dst.to_string(),
            }),
            Some(status) => Err(GitError::PushRejected {
                refname: dst.to_string(),
                message: status,
            }),
        }
    }
}

/// Callbacks answering credential requests from `remote`'s settings.
fn callbacks<'a>(remote: &'a RemoteSpec, attempts: &'a Cell<u32>) -> git2::RemoteCallbacks<'a> {
    let mut cbs = git2::RemoteCallbacks::new();
    cbs.credentials(move |_url, username, allowed| {
        attempts.set(attempts.get() + 1);
        if attempts.get() > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::from_str("authentication failed"));
        }
        let user = username.unwrap_or("git");
        if allowed.contains(git2::CredentialType::SSH_KEY) {
            match &remote.ssh_key {
                Some(key) => git2::Cred::ssh_key(user, None, key, None),
                None => git2::Cred::ssh_key_from_agent(user),
            }
        } else if allowed.contains(git2::CredentialType::USERNAME) {
            git2::Cred::username(user)
        } else {
            git2::Cred::default()
        }
    });
    cbs
}

fn is_non_fast_forward(status: &str) -> bool {
    let status = status.to_ascii_lowercase();
    status.contains("non-fast-forward")
        || status.contains("fast forward")
        || status.contains("fastforward")
        || status.contains("fetch first")
}

fn to_oid(oid: git2::Oid) -> Result<Oid, GitError> {
    Oid::new(oid.to_string()).map_err(GitError::from)
}

fn from_oid(oid: &Oid) -> Result<git2::Oid, GitError> {
    git2::Oid::from_str(oid.as_str()).map_err(|e| GitError::from_git2(e, oid.as_str()))
}
