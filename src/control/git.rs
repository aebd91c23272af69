//! control::git
//!
//! Control repository backed by a real git remote.
//!
//! # Architecture
//!
//! Every call runs on the tokio blocking pool and, while holding the
//! [`MirrorLock`], works against a bare local mirror:
//!
//! 1. fetch `refs/heads/<branch>` into `refs/gitward/remote/<branch>`
//!    (with pruning, so a deleted branch reads as empty)
//! 2. load: read the tree at the fetched tip and deserialize the files the
//!    format owns
//! 3. commit: compare the fetched tip with the caller's base, write the
//!    serialized model over the base tree's foreign files, commit with
//!    `base` as the only parent, push through a temporary ref
//!
//! The push never forces. A remote that moved between the fetch and the
//! push rejects it as a non-fast-forward, which is reported as
//! [`ControlError::Conflict`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ControlError, ControlRepo, Snapshot};
use crate::core::config::{Config, ConfigError};
use crate::core::lock::MirrorLock;
use crate::core::model::AccessModel;
use crate::core::types::Oid;
use crate::format::{
    merge_entries, ConfigFormat, ConfigTree, FormatError, GitoliteFormat, TreeEntry,
};
use crate::git::{BlobEntry, Git, GitError, Identity, RemoteSpec};

/// Where the control repository lives and how to write to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitControlSettings {
    pub remote: RemoteSpec,
    /// Branch the enforcement layer reads
    pub branch: String,
    /// Local bare mirror
    pub mirror_dir: PathBuf,
    /// Author and committer of published revisions
    pub author: Identity,
}

impl GitControlSettings {
    /// Build settings from the resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if no control URL is configured
    /// or no mirror directory can be determined.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let url = config.url().ok_or_else(|| {
            ConfigError::InvalidValue(
                "control.url is not set (use --remote or the config file)".to_string(),
            )
        })?;
        let mirror_dir = config.mirror_dir().ok_or_else(|| {
            ConfigError::InvalidValue(
                "no cache directory found; set control.mirror_dir".to_string(),
            )
        })?;
        let mut remote = RemoteSpec::new(url);
        if let Some(key) = config.ssh_key() {
            remote = remote.with_ssh_key(key);
        }
        Ok(Self {
            remote,
            branch: config.branch().to_string(),
            mirror_dir,
            author: Identity {
                name: config.author_name().to_string(),
                email: config.author_email().to_string(),
            },
        })
    }

    fn tracking_ref(&self) -> String {
        format!("refs/gitward/remote/{}", self.branch)
    }

    fn branch_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    /// Lock and open the mirror.
    fn open_mirror(&self) -> Result<(MirrorLock, Git), ControlError> {
        let lock = MirrorLock::acquire(&self.mirror_dir)
            .map_err(|e| ControlError::Transport(e.to_string()))?;
        let git = Git::open_or_init_bare(&self.mirror_dir).map_err(transport)?;
        Ok((lock, git))
    }

    /// Fetch the control branch and return its tip.
    fn fetch_tip(&self, git: &Git) -> Result<Option<Oid>, ControlError> {
        let refspec = format!("+{}:{}", self.branch_ref(), self.tracking_ref());
        git.fetch(&self.remote, &[refspec.as_str()])
            .map_err(transport)?;
        let tip = git.try_resolve_ref(&self.tracking_ref()).map_err(transport)?;
        debug!(branch = %self.branch, tip = ?tip.as_ref().map(|t| t.short(12)), "fetched control branch");
        Ok(tip)
    }
}

/// Control repository behind a git remote.
#[derive(Clone)]
pub struct GitControlRepo {
    settings: Arc<GitControlSettings>,
    format: Arc<dyn ConfigFormat>,
}

impl std::fmt::Debug for GitControlRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitControlRepo")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl GitControlRepo {
    /// A control repository in the gitolite layout.
    pub fn new(settings: GitControlSettings) -> Self {
        Self::with_format(settings, Arc::new(GitoliteFormat::new()))
    }

    pub fn with_format(settings: GitControlSettings, format: Arc<dyn ConfigFormat>) -> Self {
        Self {
            settings: Arc::new(settings),
            format,
        }
    }

    pub fn settings(&self) -> &GitControlSettings {
        &self.settings
    }
}

#[async_trait]
impl ControlRepo for GitControlRepo {
    async fn load_latest(&self) -> Result<Snapshot, ControlError> {
        let settings = Arc::clone(&self.settings);
        let format = Arc::clone(&self.format);

        run_blocking(move || {
            let (_lock, git) = settings.open_mirror()?;
            let Some(tip) = settings.fetch_tip(&git)? else {
                return Ok(Snapshot {
                    model: AccessModel::new(),
                    base: None,
                });
            };
            let files = git.read_tree(&tip).map_err(transport)?;
            let tree = owned_tree(format.as_ref(), &files)?;
            let model = format.deserialize(&tree)?;
            Ok(Snapshot {
                model,
                base: Some(tip),
            })
        })
        .await
    }

    async fn commit_and_push(
        &self,
        model: &AccessModel,
        base: Option<&Oid>,
        message: &str,
    ) -> Result<Oid, ControlError> {
        let settings = Arc::clone(&self.settings);
        let format = Arc::clone(&self.format);
        let model = model.clone();
        let base = base.cloned();
        let message = message.to_string();

        run_blocking(move || {
            let (_lock, git) = settings.open_mirror()?;

            let tip = settings.fetch_tip(&git)?;
            if tip != base {
                return Err(ControlError::Conflict {
                    expected: base,
                    actual: tip,
                });
            }

            let base_entries = match &base {
                Some(base) => git.read_tree(base).map_err(transport)?,
                None => Vec::new(),
            };
            let entries = merge_entries(format.as_ref(), &model, base_entries);

            let tree = git.write_tree(&entries).map_err(transport)?;
            let commit = git
                .create_commit(&tree, base.as_ref(), &message, &settings.author)
                .map_err(transport)?;

            let outgoing = format!("refs/gitward/outgoing/{}", Uuid::new_v4());
            git.set_ref(&outgoing, &commit, &message).map_err(transport)?;
            let pushed = git.push(&settings.remote, &outgoing, &settings.branch_ref());
            if let Err(e) = git.delete_ref(&outgoing) {
                warn!(refname = %outgoing, error = %e, "failed to delete temporary ref");
            }

            match pushed {
                Ok(()) => {
                    if let Err(e) = git.set_ref(&settings.tracking_ref(), &commit, &message) {
                        warn!(error = %e, "failed to record pushed revision locally");
                    }
                    info!(branch = %settings.branch, revision = %commit.short(12), "pushed control revision");
                    Ok(commit)
                }
                Err(GitError::NonFastForward { .. }) => {
                    let actual = settings.fetch_tip(&git).ok().flatten();
                    Err(ControlError::Conflict {
                        expected: base,
                        actual,
                    })
                }
                Err(e) => Err(transport(e)),
            }
        })
        .await
    }
}

/// Run mirror work on the blocking pool.
async fn run_blocking<T, F>(work: F) -> Result<T, ControlError>
where
    F: FnOnce() -> Result<T, ControlError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ControlError::Transport(format!("mirror task failed: {e}")))?
}

fn transport(err: GitError) -> ControlError {
    ControlError::Transport(err.to_string())
}

impl TreeEntry for BlobEntry {
    fn path(&self) -> &str {
        &self.path
    }

    fn text(path: &str, contents: &str) -> Self {
        BlobEntry::file(path, contents)
    }
}

/// The files `format` owns, decoded as text.
fn owned_tree(format: &dyn ConfigFormat, files: &[BlobEntry]) -> Result<ConfigTree, FormatError> {
    files
        .iter()
        .filter(|entry| format.owns(&entry.path))
        .map(|entry| {
            String::from_utf8(entry.data.clone())
                .map(|text| (entry.path.clone(), text))
                .map_err(|_| FormatError::NotUtf8 {
                    path: entry.path.clone(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::SshKey;
    use crate::core::types::{RepoName, Username};
    use tempfile::TempDir;

    fn settings(temp: &TempDir, mirror: &str) -> GitControlSettings {
        let remote = temp.path().join("remote.git");
        Git::open_or_init_bare(&remote).unwrap();
        GitControlSettings {
            remote: RemoteSpec::new(remote.to_string_lossy()),
            branch: "master".into(),
            mirror_dir: temp.path().join(mirror),
            author: Identity {
                name: "gitward".into(),
                email: "gitward@localhost".into(),
            },
        }
    }

    fn sample() -> AccessModel {
        let mut model = AccessModel::new();
        model
            .add_user(
                Username::new("alice").unwrap(),
                SshKey::new("ssh-ed25519 AAAA").unwrap(),
            )
            .unwrap();
        model.add_repository(RepoName::new("svc").unwrap()).unwrap();
        model
    }

    #[tokio::test]
    async fn empty_remote_loads_empty() {
        let temp = TempDir::new().unwrap();
        let repo = GitControlRepo::new(settings(&temp, "mirror"));
        let snapshot = repo.load_latest().await.unwrap();
        assert_eq!(snapshot.base, None);
        assert_eq!(snapshot.model, AccessModel::new());
    }

    #[tokio::test]
    async fn commit_then_load() {
        let temp = TempDir::new().unwrap();
        let repo = GitControlRepo::new(settings(&temp, "mirror"));

        let revision = repo
            .commit_and_push(&sample(), None, "gitward: seed")
            .await
            .unwrap();
        let snapshot = repo.load_latest().await.unwrap();

        assert_eq!(snapshot.base, Some(revision));
        assert_eq!(snapshot.model, sample());
    }

    #[tokio::test]
    async fn stale_base_conflicts() {
        let temp = TempDir::new().unwrap();
        let repo = GitControlRepo::new(settings(&temp, "mirror"));
        let first = repo
            .commit_and_push(&sample(), None, "gitward: seed")
            .await
            .unwrap();

        let err = repo
            .commit_and_push(&AccessModel::new(), None, "gitward: stale")
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ControlError::Conflict {
                expected: None,
                actual: Some(first),
            }
        );
    }

    #[tokio::test]
    async fn unreachable_remote_is_transport() {
        let temp = TempDir::new().unwrap();
        let mut settings = settings(&temp, "mirror");
        settings.remote = RemoteSpec::new(temp.path().join("missing.git").to_string_lossy());
        let repo = GitControlRepo::new(settings);
        assert!(matches!(
            repo.load_latest().await,
            Err(ControlError::Transport(_))
        ));
    }

    #[test]
    fn settings_need_url() {
        let config = Config::default();
        assert!(GitControlSettings::from_config(&config).is_err());

        let mut config = Config::default();
        config.set_url("/srv/admin.git");
        config.set_mirror_dir("/tmp/gitward-mirror");
        let settings = GitControlSettings::from_config(&config).unwrap();
        assert_eq!(settings.branch, "master");
        assert_eq!(settings.remote.url, "/srv/admin.git");
        assert_eq!(settings.author.name, "gitward");
    }

    #[test]
    fn non_utf8_owned_file_is_malformed() {
        let files = vec![BlobEntry::file("keydir/a.pub", vec![0xff, 0xfe])];
        let err = owned_tree(&GitoliteFormat::new(), &files).unwrap_err();
        assert_eq!(
            err,
            FormatError::NotUtf8 {
                path: "keydir/a.pub".into()
            }
        );
    }

    #[test]
    fn foreign_binary_files_are_not_decoded() {
        let files = vec![BlobEntry::file("logo.png", vec![0xff, 0xfe])];
        assert!(owned_tree(&GitoliteFormat::new(), &files).unwrap().is_empty());
    }

    #[test]
    fn next_revision_matches_in_memory_rendering() {
        let hook = BlobEntry {
            path: "local/hooks/post-update".into(),
            mode: BlobEntry::MODE_EXECUTABLE,
            data: b"#!/bin/sh\n".to_vec(),
        };
        let logo = BlobEntry::file("logo.png", vec![0xff, 0xfe]);
        let readme = BlobEntry::file("README", "admin\n");
        let stale = BlobEntry::file("keydir/ghost.pub", "ssh-rsa OLD\n");

        let mut model = AccessModel::new();
        model
            .add_user(
                Username::new("alice").unwrap(),
                SshKey::new("ssh-ed25519 AAAA").unwrap(),
            )
            .unwrap();
        let format = GitoliteFormat::new();
        let entries = merge_entries(
            &format,
            &model,
            vec![hook.clone(), logo.clone(), readme, stale],
        );

        assert!(entries.contains(&hook));
        assert!(entries.contains(&logo));
        assert!(!entries.iter().any(|e| e.path == "keydir/ghost.pub"));

        let text_base: ConfigTree = [
            ("README", "admin\n"),
            ("keydir/ghost.pub", "ssh-rsa OLD\n"),
        ]
        .into_iter()
        .collect();
        let rendered = format.render_over(&model, &text_base);
        for (path, contents) in rendered.iter() {
            let entry = entries.iter().find(|e| e.path == path).unwrap();
            assert_eq!(entry.data, contents.as_bytes());
        }
        assert_eq!(entries.len(), rendered.len() + 2);
    }
}
