//! core::model
//!
//! The in-memory access control model.
//!
//! # Overview
//!
//! An [`AccessModel`] holds every repository, user (with SSH keys), group
//! and permission grant of one control repository revision. It is built
//! fresh for each mutation cycle and discarded afterwards.
//!
//! # Invariants
//!
//! After every successful operation:
//!
//! - repository, user and group names are unique (map keys)
//! - every user has at least one key
//! - group members and grant principals reference existing users/groups
//! - no grant has an empty principal set
//!
//! Every operation checks all of its preconditions before changing
//! anything, so a failed operation leaves the model untouched.
//!
//! # Cascading removal
//!
//! Removing a user strips it from every group and grant; removing a group
//! strips it from every grant. Grants left without principals are deleted.
//! Groups are allowed to become empty.
//!
//! # Example
//!
//! ```
//! use gitward::core::model::{AccessModel, Grantee, SshKey};
//! use gitward::core::permission::PermissionLevel;
//! use gitward::core::types::{GroupName, RepoName, Username};
//!
//! let alice = Username::new("alice").unwrap();
//! let devs = GroupName::new("devs").unwrap();
//! let svc = RepoName::new("svc").unwrap();
//!
//! let mut model = AccessModel::new();
//! model.add_user(alice.clone(), SshKey::new("ssh-ed25519 AAAA alice").unwrap()).unwrap();
//! model.add_group(devs.clone(), &[alice.clone()]).unwrap();
//! model.add_repository(svc.clone()).unwrap();
//! model.set_permission(&svc, PermissionLevel::ReadWrite, &Grantee::Group(devs.clone())).unwrap();
//!
//! assert!(model.group_has_user(&devs, &alice).unwrap());
//!
//! model.remove_user(&alice).unwrap();
//! assert!(model.permissions(&svc).unwrap().is_empty());
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Serialize, Serializer};
use thiserror::Error;

use super::permission::PermissionLevel;
use super::types::{GroupName, KeyLabel, RepoName, TypeError, Username};

/// Kind of entity named in a model error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Repository,
    User,
    Group,
    Key,
    Grant,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EntityKind::Repository => "repository",
            EntityKind::User => "user",
            EntityKind::Group => "group",
            EntityKind::Key => "key",
            EntityKind::Grant => "grant",
        })
    }
}

/// Errors from model operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    /// Creation of something that already exists.
    #[error("{kind} already exists: {name}")]
    DuplicateEntity { kind: EntityKind, name: String },

    /// Reference to something that does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: EntityKind, name: String },

    /// Structurally invalid input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ModelError {
    fn duplicate(kind: EntityKind, name: impl std::fmt::Display) -> Self {
        ModelError::DuplicateEntity {
            kind,
            name: name.to_string(),
        }
    }

    fn not_found(kind: EntityKind, name: impl std::fmt::Display) -> Self {
        ModelError::NotFound {
            kind,
            name: name.to_string(),
        }
    }
}

impl From<TypeError> for ModelError {
    fn from(err: TypeError) -> Self {
        ModelError::InvalidArgument(err.to_string())
    }
}

/// One SSH public key of a user.
///
/// The key text is opaque; it is only required to be a single non-empty
/// line.
///
/// # Example
///
/// ```
/// use gitward::core::model::SshKey;
/// use gitward::core::types::KeyLabel;
///
/// let key = SshKey::new("  ssh-ed25519 AAAAC3Nza bob@laptop\n").unwrap()
///     .with_label(KeyLabel::new("laptop").unwrap());
/// assert_eq!(key.key(), "ssh-ed25519 AAAAC3Nza bob@laptop");
/// assert_eq!(key.label().map(|l| l.as_str()), Some("laptop"));
///
/// assert!(SshKey::new("").is_err());
/// assert!(SshKey::new("one\ntwo").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshKey {
    label: Option<KeyLabel>,
    key: String,
}

impl SshKey {
    /// Create an unlabeled key from its text.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidSshKey` for empty or multi-line input.
    pub fn new(key: impl AsRef<str>) -> Result<Self, TypeError> {
        let key = key.as_ref().trim();
        if key.is_empty() {
            return Err(TypeError::InvalidSshKey("key cannot be empty".into()));
        }
        if key.contains(['\n', '\r', '\0']) {
            return Err(TypeError::InvalidSshKey(
                "key must be a single line".into(),
            ));
        }
        Ok(Self {
            label: None,
            key: key.to_string(),
        })
    }

    /// Attach a label to this key.
    pub fn with_label(mut self, label: KeyLabel) -> Self {
        self.label = Some(label);
        self
    }

    /// The key's label, if any.
    pub fn label(&self) -> Option<&KeyLabel> {
        self.label.as_ref()
    }

    /// The key text.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Subject of a permission grant.
///
/// Ordering puts users first, then groups, then the built-in `@all`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Principal {
    User(Username),
    Group(GroupName),
    All,
}

impl Principal {
    /// Parse a principal token from the config grammar.
    ///
    /// # Example
    ///
    /// ```
    /// use gitward::core::model::Principal;
    ///
    /// assert_eq!(Principal::parse("@all").unwrap(), Principal::All);
    /// assert!(matches!(Principal::parse("@devs").unwrap(), Principal::Group(_)));
    /// assert!(matches!(Principal::parse("alice").unwrap(), Principal::User(_)));
    /// ```
    pub fn parse(token: &str) -> Result<Self, TypeError> {
        match token.strip_prefix('@') {
            Some(GroupName::ALL) => Ok(Principal::All),
            Some(group) => Ok(Principal::Group(GroupName::new(group)?)),
            None => Ok(Principal::User(Username::new(token)?)),
        }
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Principal::User(user) => write!(f, "{user}"),
            Principal::Group(group) => write!(f, "@{group}"),
            Principal::All => write!(f, "@{}", GroupName::ALL),
        }
    }
}

impl Serialize for Principal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Who a [`AccessModel::set_permission`] call grants access to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grantee {
    /// An explicit list of users.
    Users(Vec<Username>),
    /// The current members of a group, captured at grant time.
    Group(GroupName),
}

/// Grants of one repository: level → principals.
pub type Grants = BTreeMap<PermissionLevel, BTreeSet<Principal>>;

/// The access control model of one control repository revision.
///
/// Equality is observational: two models are equal when they hold the same
/// repositories, keys, groups and grants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessModel {
    repos: BTreeMap<RepoName, Grants>,
    users: BTreeMap<Username, BTreeMap<Option<KeyLabel>, SshKey>>,
    groups: BTreeMap<GroupName, BTreeSet<Username>>,
}

impl AccessModel {
    /// Create an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Repository names, sorted.
    pub fn list_repositories(&self) -> Vec<RepoName> {
        self.repos.keys().cloned().collect()
    }

    /// Usernames, sorted.
    pub fn list_users(&self) -> Vec<Username> {
        self.users.keys().cloned().collect()
    }

    /// Group name → members.
    pub fn list_groups(&self) -> BTreeMap<GroupName, BTreeSet<Username>> {
        self.groups.clone()
    }

    /// Whether `user` is a member of `group`.
    ///
    /// # Errors
    ///
    /// - [`ModelError::NotFound`] if the group does not exist
    pub fn group_has_user(&self, group: &GroupName, user: &Username) -> Result<bool, ModelError> {
        let members = self
            .groups
            .get(group)
            .ok_or_else(|| ModelError::not_found(EntityKind::Group, group))?;
        Ok(members.contains(user))
    }

    /// Keys of a user, unlabeled key first, then by label.
    pub fn user_keys(&self, user: &Username) -> Result<Vec<SshKey>, ModelError> {
        let keys = self
            .users
            .get(user)
            .ok_or_else(|| ModelError::not_found(EntityKind::User, user))?;
        Ok(keys.values().cloned().collect())
    }

    /// Grants of a repository.
    pub fn permissions(&self, repo: &RepoName) -> Result<Grants, ModelError> {
        self.repos
            .get(repo)
            .cloned()
            .ok_or_else(|| ModelError::not_found(EntityKind::Repository, repo))
    }

    pub fn has_repository(&self, repo: &RepoName) -> bool {
        self.repos.contains_key(repo)
    }

    pub fn has_user(&self, user: &Username) -> bool {
        self.users.contains_key(user)
    }

    pub fn has_group(&self, group: &GroupName) -> bool {
        self.groups.contains_key(group)
    }

    /// Iterate repositories with their grants, in name order.
    pub fn repositories(&self) -> impl Iterator<Item = (&RepoName, &Grants)> {
        self.repos.iter()
    }

    /// Iterate every key of every user, in user then label order.
    pub fn keys(&self) -> impl Iterator<Item = (&Username, &SshKey)> {
        self.users
            .iter()
            .flat_map(|(user, keys)| keys.values().map(move |key| (user, key)))
    }

    /// Iterate groups with their members, in name order.
    pub fn groups(&self) -> impl Iterator<Item = (&GroupName, &BTreeSet<Username>)> {
        self.groups.iter()
    }

    /// Check the referential invariants.
    ///
    /// Models built through the operations below always pass; this exists
    /// for loaders and tests.
    pub fn validate(&self) -> Result<(), ModelError> {
        for (user, keys) in &self.users {
            if keys.is_empty() {
                return Err(ModelError::InvalidArgument(format!(
                    "user {user} has no keys"
                )));
            }
        }
        for (group, members) in &self.groups {
            if let Some(missing) = members.iter().find(|m| !self.has_user(m)) {
                return Err(ModelError::not_found(
                    EntityKind::User,
                    format!("{missing} (member of @{group})"),
                ));
            }
        }
        for (repo, grants) in &self.repos {
            for (level, principals) in grants {
                if principals.is_empty() {
                    return Err(ModelError::InvalidArgument(format!(
                        "grant {level} on {repo} has no principals"
                    )));
                }
                for principal in principals {
                    self.check_principal(principal)?;
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Repositories
    // =========================================================================

    /// Create an empty repository.
    ///
    /// # Errors
    ///
    /// - [`ModelError::DuplicateEntity`] if the repository exists
    pub fn add_repository(&mut self, name: RepoName) -> Result<(), ModelError> {
        if self.repos.contains_key(&name) {
            return Err(ModelError::duplicate(EntityKind::Repository, name));
        }
        self.repos.insert(name, Grants::new());
        Ok(())
    }

    /// Remove a repository and all of its grants.
    ///
    /// # Errors
    ///
    /// - [`ModelError::NotFound`] if the repository does not exist
    pub fn remove_repository(&mut self, name: &RepoName) -> Result<(), ModelError> {
        self.repos
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ModelError::not_found(EntityKind::Repository, name))
    }

    // =========================================================================
    // Users and keys
    // =========================================================================

    /// Create a user with one key.
    ///
    /// # Errors
    ///
    /// - [`ModelError::DuplicateEntity`] if the username exists
    pub fn add_user(&mut self, user: Username, key: SshKey) -> Result<(), ModelError> {
        if self.users.contains_key(&user) {
            return Err(ModelError::duplicate(EntityKind::User, user));
        }
        let mut keys = BTreeMap::new();
        keys.insert(key.label.clone(), key);
        self.users.insert(user, keys);
        Ok(())
    }

    /// Add another key to an existing user.
    ///
    /// # Errors
    ///
    /// - [`ModelError::NotFound`] if the user does not exist
    /// - [`ModelError::DuplicateEntity`] if the user already has a key with
    ///   the same label (or already has an unlabeled key)
    pub fn add_key(&mut self, user: &Username, key: SshKey) -> Result<(), ModelError> {
        let keys = self
            .users
            .get_mut(user)
            .ok_or_else(|| ModelError::not_found(EntityKind::User, user))?;
        if keys.contains_key(&key.label) {
            return Err(ModelError::duplicate(
                EntityKind::Key,
                key_display(user, key.label.as_ref()),
            ));
        }
        keys.insert(key.label.clone(), key);
        Ok(())
    }

    /// Remove one key of a user.
    ///
    /// Removing the last key removes the user, with the same cascade as
    /// [`AccessModel::remove_user`].
    ///
    /// # Errors
    ///
    /// - [`ModelError::NotFound`] if the user or the key does not exist
    pub fn remove_key(
        &mut self,
        user: &Username,
        label: Option<&KeyLabel>,
    ) -> Result<(), ModelError> {
        let keys = self
            .users
            .get_mut(user)
            .ok_or_else(|| ModelError::not_found(EntityKind::User, user))?;
        let slot = label.cloned();
        if keys.remove(&slot).is_none() {
            return Err(ModelError::not_found(
                EntityKind::Key,
                key_display(user, label),
            ));
        }
        if keys.is_empty() {
            self.remove_user(user)?;
        }
        Ok(())
    }

    /// Remove a user, all of its keys, and every reference to it.
    ///
    /// # Errors
    ///
    /// - [`ModelError::NotFound`] if the user does not exist
    pub fn remove_user(&mut self, user: &Username) -> Result<(), ModelError> {
        if self.users.remove(user).is_none() {
            return Err(ModelError::not_found(EntityKind::User, user));
        }
        for members in self.groups.values_mut() {
            members.remove(user);
        }
        self.strip_principal(&Principal::User(user.clone()));
        Ok(())
    }

    // =========================================================================
    // Groups
    // =========================================================================

    /// Create a group with optional initial members.
    ///
    /// # Errors
    ///
    /// - [`ModelError::DuplicateEntity`] if the group exists
    /// - [`ModelError::NotFound`] if any member is not a known user
    pub fn add_group(&mut self, name: GroupName, members: &[Username]) -> Result<(), ModelError> {
        if self.groups.contains_key(&name) {
            return Err(ModelError::duplicate(EntityKind::Group, name));
        }
        self.check_users(members)?;
        self.groups.insert(name, members.iter().cloned().collect());
        Ok(())
    }

    /// Remove a group and strip it from every grant.
    ///
    /// # Errors
    ///
    /// - [`ModelError::NotFound`] if the group does not exist
    pub fn remove_group(&mut self, name: &GroupName) -> Result<(), ModelError> {
        if self.groups.remove(name).is_none() {
            return Err(ModelError::not_found(EntityKind::Group, name));
        }
        self.strip_principal(&Principal::Group(name.clone()));
        Ok(())
    }

    /// Add users to a group. Already-present members are a no-op.
    ///
    /// # Errors
    ///
    /// - [`ModelError::NotFound`] if the group or any user is unknown
    pub fn add_to_group(&mut self, users: &[Username], group: &GroupName) -> Result<(), ModelError> {
        if !self.groups.contains_key(group) {
            return Err(ModelError::not_found(EntityKind::Group, group));
        }
        self.check_users(users)?;
        if let Some(members) = self.groups.get_mut(group) {
            members.extend(users.iter().cloned());
        }
        Ok(())
    }

    /// Remove users from a group. Non-members are a no-op.
    ///
    /// # Errors
    ///
    /// - [`ModelError::NotFound`] if the group is unknown
    pub fn remove_from_group(
        &mut self,
        users: &[Username],
        group: &GroupName,
    ) -> Result<(), ModelError> {
        let members = self
            .groups
            .get_mut(group)
            .ok_or_else(|| ModelError::not_found(EntityKind::Group, group))?;
        for user in users {
            members.remove(user);
        }
        Ok(())
    }

    // =========================================================================
    // Permissions
    // =========================================================================

    /// Grant `level` on `repo` to the given grantee.
    ///
    /// A group grantee is expanded to its members at call time; later
    /// membership changes do not affect the grant. Principals merge into an
    /// existing grant of the same level.
    ///
    /// # Errors
    ///
    /// - [`ModelError::NotFound`] if the repository, a user, or the group is unknown
    /// - [`ModelError::InvalidArgument`] if no principal remains after expansion
    pub fn set_permission(
        &mut self,
        repo: &RepoName,
        level: PermissionLevel,
        grantee: &Grantee,
    ) -> Result<(), ModelError> {
        if !self.repos.contains_key(repo) {
            return Err(ModelError::not_found(EntityKind::Repository, repo));
        }
        let users: Vec<Username> = match grantee {
            Grantee::Users(users) => {
                self.check_users(users)?;
                users.clone()
            }
            Grantee::Group(group) => self
                .groups
                .get(group)
                .ok_or_else(|| ModelError::not_found(EntityKind::Group, group))?
                .iter()
                .cloned()
                .collect(),
        };
        if users.is_empty() {
            return Err(ModelError::InvalidArgument(format!(
                "permission {level} on {repo} needs at least one principal"
            )));
        }
        self.grant(repo, level, users.into_iter().map(Principal::User))
    }

    /// Merge principals into the (repo, level) grant without expansion.
    ///
    /// This is the loader's path for grants that name groups or `@all`.
    ///
    /// # Errors
    ///
    /// - [`ModelError::NotFound`] if the repository or a principal is unknown
    /// - [`ModelError::InvalidArgument`] if `principals` is empty
    pub fn grant(
        &mut self,
        repo: &RepoName,
        level: PermissionLevel,
        principals: impl IntoIterator<Item = Principal>,
    ) -> Result<(), ModelError> {
        if !self.repos.contains_key(repo) {
            return Err(ModelError::not_found(EntityKind::Repository, repo));
        }
        let principals: BTreeSet<Principal> = principals.into_iter().collect();
        if principals.is_empty() {
            return Err(ModelError::InvalidArgument(format!(
                "permission {level} on {repo} needs at least one principal"
            )));
        }
        for principal in &principals {
            self.check_principal(principal)?;
        }
        if let Some(grants) = self.repos.get_mut(repo) {
            grants.entry(level).or_default().extend(principals);
        }
        Ok(())
    }

    /// Remove the whole (repo, level) grant.
    ///
    /// # Errors
    ///
    /// - [`ModelError::NotFound`] if the repository or the grant does not exist
    pub fn revoke_permission(
        &mut self,
        repo: &RepoName,
        level: PermissionLevel,
    ) -> Result<(), ModelError> {
        let grants = self
            .repos
            .get_mut(repo)
            .ok_or_else(|| ModelError::not_found(EntityKind::Repository, repo))?;
        grants
            .remove(&level)
            .map(|_| ())
            .ok_or_else(|| ModelError::not_found(EntityKind::Grant, format!("{level} on {repo}")))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn check_users(&self, users: &[Username]) -> Result<(), ModelError> {
        match users.iter().find(|u| !self.users.contains_key(*u)) {
            Some(missing) => Err(ModelError::not_found(EntityKind::User, missing)),
            None => Ok(()),
        }
    }

    fn check_principal(&self, principal: &Principal) -> Result<(), ModelError> {
        match principal {
            Principal::User(user) if !self.has_user(user) => {
                Err(ModelError::not_found(EntityKind::User, user))
            }
            Principal::Group(group) if !self.has_group(group) => {
                Err(ModelError::not_found(EntityKind::Group, group))
            }
            _ => Ok(()),
        }
    }

    /// Remove `principal` from every grant, dropping grants left empty.
    fn strip_principal(&mut self, principal: &Principal) {
        for grants in self.repos.values_mut() {
            for principals in grants.values_mut() {
                principals.remove(principal);
            }
            grants.retain(|_, principals| !principals.is_empty());
        }
    }
}

fn key_display(user: &Username, label: Option<&KeyLabel>) -> String {
    match label {
        Some(label) => format!("{user} ({label})"),
        None => format!("{user} (unlabeled)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> Username {
        Username::new(name).unwrap()
    }

    fn group(name: &str) -> GroupName {
        GroupName::new(name).unwrap()
    }

    fn repo(name: &str) -> RepoName {
        RepoName::new(name).unwrap()
    }

    fn key(text: &str) -> SshKey {
        SshKey::new(text).unwrap()
    }

    fn model_with_users(names: &[&str]) -> AccessModel {
        let mut model = AccessModel::new();
        for name in names {
            model
                .add_user(user(name), key(&format!("ssh-ed25519 AAAA {name}")))
                .unwrap();
        }
        model
    }

    mod repositories {
        use super::*;

        #[test]
        fn add_and_list_sorted() {
            let mut model = AccessModel::new();
            model.add_repository(repo("zeta")).unwrap();
            model.add_repository(repo("alpha")).unwrap();
            assert_eq!(model.list_repositories(), vec![repo("alpha"), repo("zeta")]);
        }

        #[test]
        fn duplicate_rejected() {
            let mut model = AccessModel::new();
            model.add_repository(repo("svc")).unwrap();
            let err = model.add_repository(repo("svc")).unwrap_err();
            assert!(matches!(
                err,
                ModelError::DuplicateEntity {
                    kind: EntityKind::Repository,
                    ..
                }
            ));
        }

        #[test]
        fn remove_missing_is_not_found() {
            let mut model = AccessModel::new();
            let err = model.remove_repository(&repo("svc")).unwrap_err();
            assert_eq!(err.to_string(), "repository not found: svc");
        }

        #[test]
        fn remove_drops_grants() {
            let mut model = model_with_users(&["alice"]);
            model.add_repository(repo("svc")).unwrap();
            model
                .set_permission(
                    &repo("svc"),
                    PermissionLevel::Read,
                    &Grantee::Users(vec![user("alice")]),
                )
                .unwrap();
            model.remove_repository(&repo("svc")).unwrap();
            model.add_repository(repo("svc")).unwrap();
            assert!(model.permissions(&repo("svc")).unwrap().is_empty());
        }
    }

    mod users {
        use super::*;

        #[test]
        fn duplicate_user_rejected_without_change() {
            let mut model = model_with_users(&["alice"]);
            let before = model.clone();
            assert!(model.add_user(user("alice"), key("ssh-rsa BBBB")).is_err());
            assert_eq!(model, before);
        }

        #[test]
        fn remove_unknown_user() {
            let mut model = AccessModel::new();
            assert!(matches!(
                model.remove_user(&user("ghost")),
                Err(ModelError::NotFound {
                    kind: EntityKind::User,
                    ..
                })
            ));
        }

        #[test]
        fn remove_cascades_through_groups_and_grants() {
            let mut model = model_with_users(&["alice", "bob"]);
            model
                .add_group(group("devs"), &[user("alice"), user("bob")])
                .unwrap();
            model.add_repository(repo("svc")).unwrap();
            model
                .set_permission(
                    &repo("svc"),
                    PermissionLevel::ReadWrite,
                    &Grantee::Users(vec![user("alice"), user("bob")]),
                )
                .unwrap();
            model
                .set_permission(
                    &repo("svc"),
                    PermissionLevel::Read,
                    &Grantee::Users(vec![user("alice")]),
                )
                .unwrap();

            model.remove_user(&user("alice")).unwrap();

            assert_eq!(model.list_users(), vec![user("bob")]);
            assert!(!model.group_has_user(&group("devs"), &user("alice")).unwrap());
            let grants = model.permissions(&repo("svc")).unwrap();
            assert!(!grants.contains_key(&PermissionLevel::Read));
            assert_eq!(
                grants[&PermissionLevel::ReadWrite],
                BTreeSet::from([Principal::User(user("bob"))])
            );
            model.validate().unwrap();
        }
    }

    mod keys {
        use super::*;

        #[test]
        fn labeled_keys_accumulate() {
            let mut model = model_with_users(&["bob"]);
            let laptop = key("ssh-ed25519 LLLL").with_label(KeyLabel::new("laptop").unwrap());
            model.add_key(&user("bob"), laptop.clone()).unwrap();
            let keys = model.user_keys(&user("bob")).unwrap();
            assert_eq!(keys.len(), 2);
            assert_eq!(keys[1], laptop);
        }

        #[test]
        fn same_label_is_duplicate() {
            let mut model = model_with_users(&["bob"]);
            let err = model.add_key(&user("bob"), key("ssh-rsa X")).unwrap_err();
            assert!(matches!(
                err,
                ModelError::DuplicateEntity {
                    kind: EntityKind::Key,
                    ..
                }
            ));
        }

        #[test]
        fn removing_last_key_removes_user() {
            let mut model = model_with_users(&["bob"]);
            model.add_group(group("ops"), &[user("bob")]).unwrap();
            model.remove_key(&user("bob"), None).unwrap();
            assert!(model.list_users().is_empty());
            assert!(model.list_groups()[&group("ops")].is_empty());
        }

        #[test]
        fn removing_one_of_many_keeps_user() {
            let mut model = model_with_users(&["bob"]);
            let label = KeyLabel::new("desk").unwrap();
            model
                .add_key(&user("bob"), key("ssh-rsa D").with_label(label.clone()))
                .unwrap();
            model.remove_key(&user("bob"), Some(&label)).unwrap();
            assert_eq!(model.user_keys(&user("bob")).unwrap().len(), 1);
        }

        #[test]
        fn removing_missing_label_is_not_found() {
            let mut model = model_with_users(&["bob"]);
            let label = KeyLabel::new("desk").unwrap();
            let err = model.remove_key(&user("bob"), Some(&label)).unwrap_err();
            assert_eq!(err.to_string(), "key not found: bob (desk)");
        }
    }

    mod groups {
        use super::*;

        #[test]
        fn add_group_with_unknown_member_fails_atomically() {
            let mut model = model_with_users(&["alice"]);
            let err = model
                .add_group(group("devs"), &[user("alice"), user("ghost")])
                .unwrap_err();
            assert_eq!(err.to_string(), "user not found: ghost");
            assert!(model.list_groups().is_empty());
        }

        #[test]
        fn add_to_group_is_idempotent() {
            let mut model = model_with_users(&["alice"]);
            model.add_group(group("devs"), &[]).unwrap();
            model.add_to_group(&[user("alice")], &group("devs")).unwrap();
            let once = model.clone();
            model.add_to_group(&[user("alice")], &group("devs")).unwrap();
            assert_eq!(model, once);
        }

        #[test]
        fn add_to_unknown_group() {
            let mut model = model_with_users(&["alice"]);
            assert!(matches!(
                model.add_to_group(&[user("alice")], &group("devs")),
                Err(ModelError::NotFound {
                    kind: EntityKind::Group,
                    ..
                })
            ));
        }

        #[test]
        fn remove_from_group_ignores_non_members() {
            let mut model = model_with_users(&["alice", "bob"]);
            model.add_group(group("devs"), &[user("alice")]).unwrap();
            model
                .remove_from_group(&[user("alice"), user("bob")], &group("devs"))
                .unwrap();
            assert!(model.list_groups()[&group("devs")].is_empty());
        }

        #[test]
        fn group_has_user_on_unknown_group() {
            let model = model_with_users(&["alice"]);
            assert!(model.group_has_user(&group("devs"), &user("alice")).is_err());
        }

        #[test]
        fn remove_group_strips_group_principals() {
            let mut model = model_with_users(&["alice"]);
            model.add_group(group("devs"), &[user("alice")]).unwrap();
            model.add_repository(repo("svc")).unwrap();
            model
                .grant(
                    &repo("svc"),
                    PermissionLevel::Read,
                    [Principal::Group(group("devs"))],
                )
                .unwrap();
            model
                .grant(
                    &repo("svc"),
                    PermissionLevel::ReadWrite,
                    [Principal::Group(group("devs")), Principal::All],
                )
                .unwrap();

            model.remove_group(&group("devs")).unwrap();

            let grants = model.permissions(&repo("svc")).unwrap();
            assert!(!grants.contains_key(&PermissionLevel::Read));
            assert_eq!(
                grants[&PermissionLevel::ReadWrite],
                BTreeSet::from([Principal::All])
            );
        }
    }

    mod permissions {
        use super::*;

        #[test]
        fn group_grant_is_snapshot_of_members() {
            let mut model = model_with_users(&["alice", "bob"]);
            model.add_group(group("devs"), &[user("alice")]).unwrap();
            model.add_repository(repo("svc")).unwrap();
            model
                .set_permission(
                    &repo("svc"),
                    PermissionLevel::ReadWrite,
                    &Grantee::Group(group("devs")),
                )
                .unwrap();

            model.add_to_group(&[user("bob")], &group("devs")).unwrap();

            let grants = model.permissions(&repo("svc")).unwrap();
            assert_eq!(
                grants[&PermissionLevel::ReadWrite],
                BTreeSet::from([Principal::User(user("alice"))])
            );
        }

        #[test]
        fn empty_group_expansion_is_invalid() {
            let mut model = AccessModel::new();
            model.add_group(group("empty"), &[]).unwrap();
            model.add_repository(repo("svc")).unwrap();
            let err = model
                .set_permission(
                    &repo("svc"),
                    PermissionLevel::Read,
                    &Grantee::Group(group("empty")),
                )
                .unwrap_err();
            assert!(matches!(err, ModelError::InvalidArgument(_)));
        }

        #[test]
        fn empty_user_list_is_invalid() {
            let mut model = AccessModel::new();
            model.add_repository(repo("svc")).unwrap();
            assert!(matches!(
                model.set_permission(&repo("svc"), PermissionLevel::Read, &Grantee::Users(vec![])),
                Err(ModelError::InvalidArgument(_))
            ));
        }

        #[test]
        fn unknown_repo_checked_first() {
            let mut model = AccessModel::new();
            let err = model
                .set_permission(
                    &repo("svc"),
                    PermissionLevel::Read,
                    &Grantee::Users(vec![user("ghost")]),
                )
                .unwrap_err();
            assert_eq!(err.to_string(), "repository not found: svc");
        }

        #[test]
        fn same_level_merges_principals() {
            let mut model = model_with_users(&["alice", "bob"]);
            model.add_repository(repo("svc")).unwrap();
            for name in ["alice", "bob", "alice"] {
                model
                    .set_permission(
                        &repo("svc"),
                        PermissionLevel::ReadWriteForce,
                        &Grantee::Users(vec![user(name)]),
                    )
                    .unwrap();
            }
            let grants = model.permissions(&repo("svc")).unwrap();
            assert_eq!(grants.len(), 1);
            assert_eq!(grants[&PermissionLevel::ReadWriteForce].len(), 2);
        }

        #[test]
        fn revoke_removes_whole_grant() {
            let mut model = model_with_users(&["alice"]);
            model.add_repository(repo("svc")).unwrap();
            model
                .set_permission(
                    &repo("svc"),
                    PermissionLevel::Read,
                    &Grantee::Users(vec![user("alice")]),
                )
                .unwrap();
            model.revoke_permission(&repo("svc"), PermissionLevel::Read).unwrap();
            assert!(model.permissions(&repo("svc")).unwrap().is_empty());
            assert!(matches!(
                model.revoke_permission(&repo("svc"), PermissionLevel::Read),
                Err(ModelError::NotFound {
                    kind: EntityKind::Grant,
                    ..
                })
            ));
        }
    }

    #[test]
    fn principal_display_and_ordering() {
        let mut principals = vec![
            Principal::All,
            Principal::Group(group("devs")),
            Principal::User(user("zed")),
        ];
        principals.sort();
        let shown: Vec<String> = principals.iter().map(ToString::to_string).collect();
        assert_eq!(shown, ["zed", "@devs", "@all"]);
    }
}
