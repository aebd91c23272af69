//! Integration tests for the git-backed control repository.
//!
//! These tests use real repositories created via tempfile: a bare "remote"
//! playing the gitolite server's admin repository, populated and inspected
//! with the git CLI, and one or more local mirrors driven by gitward.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tempfile::TempDir;

use gitward::control::{ControlError, ControlRepo, GitControlRepo, GitControlSettings};
use gitward::core::model::{AccessModel, Grantee, SshKey};
use gitward::core::permission::PermissionLevel;
use gitward::core::types::{GroupName, RepoName, Username};
use gitward::engine::{ApplyEngine, ErrorKind, Mutation, RetryPolicy};
use gitward::git::{Identity, RemoteSpec};

const CONF: &str = "\
# hand-maintained
@admins = root
@devs   = alice bob

repo gitolite-admin
    RW+     =   @admins

repo svc lib/core
    RW      =   @devs
    R       =   @all
";

/// Run a git command, panicking with its stderr on failure.
fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=Test User", "-c", "user.email=test@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// A bare remote plus scratch space for mirrors and clones.
struct Server {
    dir: TempDir,
}

impl Server {
    /// An empty bare remote.
    fn empty() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        run_git(dir.path(), &["init", "--bare", "admin.git"]);
        Self { dir }
    }

    /// A remote holding a hand-written admin repository with extra files.
    fn seeded() -> Self {
        let server = Self::empty();
        let work = server.dir.path().join("seed");
        std::fs::create_dir_all(work.join("conf")).unwrap();
        std::fs::create_dir_all(work.join("keydir/laptop")).unwrap();
        std::fs::create_dir_all(work.join("local/hooks")).unwrap();
        std::fs::write(work.join("conf/gitolite.conf"), CONF).unwrap();
        for (path, key) in [
            ("keydir/root.pub", "ssh-ed25519 ROOT root@admin"),
            ("keydir/alice.pub", "ssh-ed25519 ALICE alice@desk"),
            ("keydir/laptop/alice.pub", "ssh-ed25519 ALICE2 alice@laptop"),
            ("keydir/bob.pub", "ssh-rsa BOB bob@desk"),
        ] {
            std::fs::write(work.join(path), format!("{key}\n")).unwrap();
        }
        std::fs::write(work.join("README"), "managed by ops\n").unwrap();
        std::fs::write(work.join("local/hooks/post-update"), "#!/bin/sh\nexit 0\n").unwrap();

        run_git(&work, &["init"]);
        run_git(&work, &["add", "."]);
        run_git(&work, &["commit", "-m", "initial admin repository"]);
        let remote = server.remote_path();
        run_git(
            &work,
            &["push", remote.to_str().unwrap(), "HEAD:refs/heads/master"],
        );
        server
    }

    fn remote_path(&self) -> PathBuf {
        self.dir.path().join("admin.git")
    }

    fn control(&self, mirror: &str) -> GitControlRepo {
        GitControlRepo::new(GitControlSettings {
            remote: RemoteSpec::new(self.remote_path().to_string_lossy()),
            branch: "master".into(),
            mirror_dir: self.dir.path().join(mirror),
            author: Identity {
                name: "gitward".into(),
                email: "gitward@localhost".into(),
            },
        })
    }

    fn engine(&self, mirror: &str) -> ApplyEngine<GitControlRepo> {
        ApplyEngine::new(self.control(mirror)).with_policy(RetryPolicy {
            max_attempts: 5,
            timeout: Duration::from_secs(30),
            retry_delay: Duration::from_millis(5),
        })
    }

    /// Contents of `path` at the tip of the remote branch.
    fn show(&self, path: &str) -> String {
        run_git(
            &self.remote_path(),
            &["show", &format!("refs/heads/master:{path}")],
        )
    }

    fn commit_count(&self) -> usize {
        run_git(&self.remote_path(), &["rev-list", "--count", "refs/heads/master"])
            .trim()
            .parse()
            .unwrap()
    }
}

fn user(name: &str) -> Username {
    Username::new(name).unwrap()
}

fn repo(name: &str) -> RepoName {
    RepoName::new(name).unwrap()
}

mod loading {
    use super::*;

    #[tokio::test]
    async fn hand_written_repository() {
        let server = Server::seeded();
        let snapshot = server.control("mirror").load_latest().await.unwrap();
        let model = snapshot.model;

        assert!(snapshot.base.is_some());
        assert_eq!(
            model.list_repositories(),
            vec![repo("gitolite-admin"), repo("lib/core"), repo("svc")]
        );
        assert_eq!(model.list_users(), vec![user("alice"), user("bob"), user("root")]);
        assert_eq!(model.user_keys(&user("alice")).unwrap().len(), 2);
        assert!(model
            .group_has_user(&GroupName::new("devs").unwrap(), &user("bob"))
            .unwrap());
        let grants = model.permissions(&repo("lib/core")).unwrap();
        assert_eq!(
            grants.keys().copied().collect::<Vec<_>>(),
            vec![PermissionLevel::Read, PermissionLevel::ReadWrite]
        );
    }

    #[tokio::test]
    async fn unsupported_directive_is_malformed() {
        let server = Server::empty();
        let work = server.dir.path().join("work");
        std::fs::create_dir_all(work.join("conf")).unwrap();
        std::fs::write(work.join("conf/gitolite.conf"), "include \"more.conf\"\n").unwrap();
        run_git(&work, &["init"]);
        run_git(&work, &["add", "."]);
        run_git(&work, &["commit", "-m", "include"]);
        run_git(
            &work,
            &[
                "push",
                server.remote_path().to_str().unwrap(),
                "HEAD:refs/heads/master",
            ],
        );

        let err = server.control("mirror").load_latest().await.unwrap_err();
        assert!(matches!(err, ControlError::Malformed(_)), "{err}");
    }
}

mod publishing {
    use super::*;

    #[tokio::test]
    async fn first_commit_on_empty_remote() {
        let server = Server::empty();
        let engine = server.engine("mirror");
        engine
            .apply(&Mutation::AddUser {
                user: user("alice"),
                key: SshKey::new("ssh-ed25519 ALICE").unwrap(),
            })
            .await
            .unwrap();

        assert_eq!(server.commit_count(), 1);
        assert_eq!(server.show("keydir/alice.pub"), "ssh-ed25519 ALICE\n");
        let message = run_git(
            &server.remote_path(),
            &["log", "-1", "--format=%s%n%an", "refs/heads/master"],
        );
        assert_eq!(message, "gitward: add user alice\ngitward\n");
    }

    #[tokio::test]
    async fn foreign_files_survive() {
        let server = Server::seeded();
        let engine = server.engine("mirror");
        engine
            .apply(&Mutation::RemoveUser { user: user("bob") })
            .await
            .unwrap();

        assert_eq!(server.commit_count(), 2);
        assert_eq!(server.show("README"), "managed by ops\n");
        assert_eq!(server.show("local/hooks/post-update"), "#!/bin/sh\nexit 0\n");
        let conf = server.show("conf/gitolite.conf");
        assert!(conf.contains("@devs = alice\n"), "{conf}");
        assert!(!conf.contains("bob"));
        let keys = run_git(
            &server.remote_path(),
            &["ls-tree", "-r", "--name-only", "refs/heads/master", "keydir"],
        );
        assert_eq!(keys, "keydir/alice.pub\nkeydir/laptop/alice.pub\nkeydir/root.pub\n");
    }

    #[tokio::test]
    async fn no_op_does_not_push() {
        let server = Server::seeded();
        let engine = server.engine("mirror");
        let applied = engine
            .apply(&Mutation::AddToGroup {
                users: vec![user("alice")],
                group: GroupName::new("devs").unwrap(),
            })
            .await
            .unwrap();
        assert!(!applied.changed);
        assert_eq!(server.commit_count(), 1);
    }

    #[tokio::test]
    async fn rejected_mutation_does_not_push() {
        let server = Server::seeded();
        let engine = server.engine("mirror");
        let err = engine
            .apply(&Mutation::AddRepository { name: repo("svc") })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateEntity);
        assert_eq!(server.commit_count(), 1);
    }
}

mod races {
    use super::*;

    #[tokio::test]
    async fn stale_base_from_other_mirror() {
        let server = Server::seeded();
        let a = server.control("mirror-a");
        let b = server.control("mirror-b");

        let seen_by_a = a.load_latest().await.unwrap();
        let seen_by_b = b.load_latest().await.unwrap();
        assert_eq!(seen_by_a.base, seen_by_b.base);

        let mut model_a = seen_by_a.model.clone();
        model_a.add_repository(repo("from-a")).unwrap();
        let r1 = a
            .commit_and_push(&model_a, seen_by_a.base.as_ref(), "gitward: a")
            .await
            .unwrap();

        let mut model_b = seen_by_b.model.clone();
        model_b.add_repository(repo("from-b")).unwrap();
        let err = b
            .commit_and_push(&model_b, seen_by_b.base.as_ref(), "gitward: b")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ControlError::Conflict {
                expected: seen_by_b.base.clone(),
                actual: Some(r1),
            }
        );
        assert_eq!(server.commit_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_engines_both_land() {
        let server = Server::seeded();
        let a = server.engine("mirror-a");
        let b = server.engine("mirror-b");

        let grant = Mutation::SetPermission {
            repo: repo("svc"),
            level: PermissionLevel::ReadWriteForce,
            grantee: Grantee::Users(vec![user("root")]),
        };
        let add = Mutation::AddRepository {
            name: repo("tools"),
        };
        let (ra, rb) = tokio::join!(a.apply(&grant), b.apply(&add));
        ra.unwrap();
        rb.unwrap();

        let model: AccessModel = server.control("mirror-c").load_latest().await.unwrap().model;
        assert!(model.has_repository(&repo("tools")));
        assert!(model.permissions(&repo("svc")).unwrap()[&PermissionLevel::ReadWriteForce]
            .iter()
            .any(|p| p.to_string() == "root"));
        assert_eq!(server.commit_count(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shared_mirror_is_serialized() {
        let server = Server::seeded();
        let a = server.engine("mirror");
        let b = server.engine("mirror");

        let one = Mutation::AddRepository { name: repo("one") };
        let two = Mutation::AddRepository { name: repo("two") };
        let (ra, rb) = tokio::join!(a.apply(&one), b.apply(&two));
        ra.unwrap();
        rb.unwrap();

        let repos = a.list_repositories().await.unwrap();
        assert!(repos.contains(&repo("one")) && repos.contains(&repo("two")));
    }
}
