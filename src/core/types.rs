//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`RepoName`] - Validated repository name
//! - [`Username`] - Validated user name (one keydir identity)
//! - [`GroupName`] - Validated group name (stored without the `@` sigil)
//! - [`KeyLabel`] - Label distinguishing one user's keys ("laptop", "desktop")
//! - [`Oid`] - Git object identifier, used as the control repository revision
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, so the access model and the serializer never
//! have to re-check names.
//!
//! # Examples
//!
//! ```
//! use gitward::core::types::{GroupName, RepoName, Username};
//!
//! let repo = RepoName::new("platform/api").unwrap();
//! let user = Username::new("alice").unwrap();
//! let group = GroupName::new("devs").unwrap();
//!
//! assert!(RepoName::new("../escape").is_err());
//! assert!(Username::new("@alice").is_err());
//! assert!(GroupName::new("all").is_err());
//! # let _ = (repo, user, group);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid repository name: {0}")]
    InvalidRepoName(String),

    #[error("invalid username: {0}")]
    InvalidUsername(String),

    #[error("invalid group name: {0}")]
    InvalidGroupName(String),

    #[error("invalid key label: {0}")]
    InvalidKeyLabel(String),

    #[error("invalid ssh key: {0}")]
    InvalidSshKey(String),

    #[error("invalid object id: {0}")]
    InvalidOid(String),
}

/// Implements the string plumbing shared by every validated name type.
macro_rules! validated_name {
    ($ty:ident) => {
        impl $ty {
            /// Get the name as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $ty {
            type Error = TypeError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$ty> for String {
            fn from(name: $ty) -> Self {
                name.0
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $ty {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

/// First character of `name` that is neither ASCII alphanumeric nor in `extra`.
fn first_disallowed_char(name: &str, extra: &[char]) -> Option<char> {
    name.chars()
        .find(|c| !(c.is_ascii_alphanumeric() || extra.contains(c)))
}

/// A validated repository name.
///
/// Repository names follow the enforcement layer's grammar:
/// - Cannot be empty
/// - Only `A-Z a-z 0-9 . _ + / -`
/// - Cannot start with `/`, `-` or `@` (`@` introduces a group)
/// - Cannot end with `/` or `.git`
/// - Cannot contain `..` or `//`
///
/// # Example
///
/// ```
/// use gitward::core::types::RepoName;
///
/// let name = RepoName::new("team/service").unwrap();
/// assert_eq!(name.as_str(), "team/service");
///
/// assert!(RepoName::new("").is_err());
/// assert!(RepoName::new("has space").is_err());
/// assert!(RepoName::new("svc.git").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoName(String);

impl RepoName {
    /// Create a new validated repository name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidRepoName` if the name violates the grammar.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), TypeError> {
        if name.is_empty() {
            return Err(TypeError::InvalidRepoName(
                "repository name cannot be empty".into(),
            ));
        }
        if let Some(c) = first_disallowed_char(name, &['.', '_', '+', '/', '-']) {
            return Err(TypeError::InvalidRepoName(format!(
                "repository name cannot contain '{}'",
                c.escape_default()
            )));
        }
        for prefix in ['/', '-', '@'] {
            if name.starts_with(prefix) {
                return Err(TypeError::InvalidRepoName(format!(
                    "repository name cannot start with '{prefix}'"
                )));
            }
        }
        if name.ends_with('/') {
            return Err(TypeError::InvalidRepoName(
                "repository name cannot end with '/'".into(),
            ));
        }
        if name.ends_with(".git") {
            return Err(TypeError::InvalidRepoName(
                "repository name must not include the '.git' suffix".into(),
            ));
        }
        if name.contains("..") {
            return Err(TypeError::InvalidRepoName(
                "repository name cannot contain '..'".into(),
            ));
        }
        if name.contains("//") {
            return Err(TypeError::InvalidRepoName(
                "repository name cannot contain '//'".into(),
            ));
        }
        Ok(())
    }
}

validated_name!(RepoName);

/// A validated username.
///
/// A username is also the file stem of the user's keys in `keydir/`, so it
/// cannot contain path separators.
///
/// - Cannot be empty
/// - Only `A-Z a-z 0-9 . _ @ + -`
/// - Cannot start with `@` (group sigil), `.` or `-`
/// - If it contains `@`, the part after the last `@` must contain a `.`
///
/// # Example
///
/// ```
/// use gitward::core::types::Username;
///
/// assert!(Username::new("alice").is_ok());
/// assert!(Username::new("alice@example.com").is_ok());
/// assert!(Username::new("a/b").is_err());
/// assert!(Username::new("-x").is_err());
/// assert!(Username::new("alice@laptop").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Create a new validated username.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidUsername` if the name is not a valid identity.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), TypeError> {
        if name.is_empty() {
            return Err(TypeError::InvalidUsername("username cannot be empty".into()));
        }
        if let Some(c) = first_disallowed_char(name, &['.', '_', '@', '+', '-']) {
            return Err(TypeError::InvalidUsername(format!(
                "username cannot contain '{}'",
                c.escape_default()
            )));
        }
        for prefix in ['@', '.', '-'] {
            if name.starts_with(prefix) {
                return Err(TypeError::InvalidUsername(format!(
                    "username cannot start with '{prefix}'"
                )));
            }
        }
        // gitolite reads `user@host.pub` without a dot in `host` as a key label
        if let Some((_, domain)) = name.rsplit_once('@') {
            if !domain.contains('.') {
                return Err(TypeError::InvalidUsername(
                    "username with '@' must be an email address".into(),
                ));
            }
        }
        Ok(())
    }
}

validated_name!(Username);

/// A validated group name, stored without the leading `@`.
///
/// The name `all` is reserved for the enforcement layer's built-in
/// everyone group.
///
/// # Example
///
/// ```
/// use gitward::core::types::GroupName;
///
/// let group = GroupName::new("devs").unwrap();
/// assert_eq!(group.as_str(), "devs");
/// assert_eq!(group.sigil(), "@devs");
///
/// assert!(GroupName::new("@devs").is_err());
/// assert!(GroupName::new("all").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupName(String);

impl GroupName {
    /// Name of the built-in everyone group.
    pub const ALL: &'static str = "all";

    /// Create a new validated group name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidGroupName` for empty, reserved or
    /// malformed names.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// The name as it appears in the config grammar (`@name`).
    pub fn sigil(&self) -> String {
        format!("@{}", self.0)
    }

    fn validate(name: &str) -> Result<(), TypeError> {
        if name.is_empty() {
            return Err(TypeError::InvalidGroupName(
                "group name cannot be empty".into(),
            ));
        }
        if name == Self::ALL {
            return Err(TypeError::InvalidGroupName(
                "group name 'all' is reserved".into(),
            ));
        }
        if let Some(c) = first_disallowed_char(name, &['.', '_', '-']) {
            return Err(TypeError::InvalidGroupName(format!(
                "group name cannot contain '{}'",
                c.escape_default()
            )));
        }
        if name.starts_with('.') || name.starts_with('-') {
            return Err(TypeError::InvalidGroupName(
                "group name cannot start with '.' or '-'".into(),
            ));
        }
        Ok(())
    }
}

validated_name!(GroupName);

/// A label telling apart the keys of one user.
///
/// Labels become directory names under `keydir/`.
///
/// # Example
///
/// ```
/// use gitward::core::types::KeyLabel;
///
/// assert!(KeyLabel::new("laptop").is_ok());
/// assert!(KeyLabel::new("work-2024").is_ok());
/// assert!(KeyLabel::new(".hidden").is_err());
/// assert!(KeyLabel::new("a/b").is_err());
/// assert!(KeyLabel::new("bob.pub").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyLabel(String);

impl KeyLabel {
    /// Create a new validated key label.
    pub fn new(label: impl Into<String>) -> Result<Self, TypeError> {
        let label = label.into();
        if label.is_empty() {
            return Err(TypeError::InvalidKeyLabel("key label cannot be empty".into()));
        }
        if let Some(c) = first_disallowed_char(&label, &['.', '_', '-']) {
            return Err(TypeError::InvalidKeyLabel(format!(
                "key label cannot contain '{}'",
                c.escape_default()
            )));
        }
        if label.starts_with('.') {
            return Err(TypeError::InvalidKeyLabel(
                "key label cannot start with '.'".into(),
            ));
        }
        // keydir/<label>/ would collide with a keydir/<user>.pub file
        if label.ends_with(".pub") {
            return Err(TypeError::InvalidKeyLabel(
                "key label cannot end with '.pub'".into(),
            ));
        }
        Ok(Self(label))
    }
}

validated_name!(KeyLabel);

/// A Git object identifier (SHA-1 or SHA-256).
///
/// OIDs are normalized to lowercase. Revisions of the control repository
/// are commit OIDs.
///
/// # Example
///
/// ```
/// use gitward::core::types::Oid;
///
/// let oid = Oid::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
/// assert_eq!(oid.as_str(), "abc123def4567890abc123def4567890abc12345");
/// assert_eq!(oid.short(7), "abc123d");
/// assert!(Oid::new("not-a-sha").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(String);

impl Oid {
    /// Create a new validated object id.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidOid` if the string is not a 40 or 64
    /// character hex OID.
    pub fn new(oid: impl Into<String>) -> Result<Self, TypeError> {
        let oid = oid.into().to_ascii_lowercase();
        if oid.len() != 40 && oid.len() != 64 {
            return Err(TypeError::InvalidOid(format!(
                "expected 40 or 64 hex characters, got {}",
                oid.len()
            )));
        }
        if !oid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidOid(
                "object id must be hexadecimal".into(),
            ));
        }
        Ok(Self(oid))
    }

    /// The OID of a SHA-256 digest.
    pub fn from_sha256(digest: [u8; 32]) -> Self {
        Self(hex::encode(digest))
    }

    /// Get an abbreviated form of the OID.
    pub fn short(&self, len: usize) -> &str {
        let end = len.min(self.0.len());
        &self.0[..end]
    }

    /// Get the object id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Oid {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> Self {
        oid.0
    }
}

impl AsRef<str> for Oid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
