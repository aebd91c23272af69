//! core::permission
//!
//! Permission levels understood by the enforcement layer.
//!
//! Levels are totally ordered. The order is the emission order used by the
//! serializer, with the deny level first so that deny rules are evaluated
//! before any allow rule of the same repository.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unknown permission string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown permission level '{0}' (expected one of: {levels})", levels = PermissionLevel::vocabulary())]
pub struct UnknownPermission(pub String);

/// A permission level from the gitolite vocabulary.
///
/// # Example
///
/// ```
/// use gitward::core::permission::PermissionLevel;
///
/// let level: PermissionLevel = "RW+".parse().unwrap();
/// assert_eq!(level, PermissionLevel::ReadWriteForce);
/// assert_eq!(level.to_string(), "RW+");
/// assert!(PermissionLevel::Read < PermissionLevel::ReadWrite);
/// assert!("RX".parse::<PermissionLevel>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PermissionLevel {
    /// `-`: explicit deny
    Deny,
    /// `R`: read-only
    Read,
    /// `RW`: read and fast-forward push
    ReadWrite,
    /// `RW+`: read, push, force-push (rewind)
    ReadWriteForce,
    /// `RWC`: read, push, create refs
    ReadWriteCreate,
    /// `RW+C`
    ReadWriteForceCreate,
    /// `RWD`: read, push, delete refs
    ReadWriteDelete,
    /// `RW+D`
    ReadWriteForceDelete,
    /// `RWCD`
    ReadWriteCreateDelete,
    /// `RW+CD`
    ReadWriteForceCreateDelete,
}

impl PermissionLevel {
    /// Every level, in order.
    pub const ALL: [PermissionLevel; 10] = [
        PermissionLevel::Deny,
        PermissionLevel::Read,
        PermissionLevel::ReadWrite,
        PermissionLevel::ReadWriteForce,
        PermissionLevel::ReadWriteCreate,
        PermissionLevel::ReadWriteForceCreate,
        PermissionLevel::ReadWriteDelete,
        PermissionLevel::ReadWriteForceDelete,
        PermissionLevel::ReadWriteCreateDelete,
        PermissionLevel::ReadWriteForceCreateDelete,
    ];

    /// The token used in the config grammar.
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::Deny => "-",
            PermissionLevel::Read => "R",
            PermissionLevel::ReadWrite => "RW",
            PermissionLevel::ReadWriteForce => "RW+",
            PermissionLevel::ReadWriteCreate => "RWC",
            PermissionLevel::ReadWriteForceCreate => "RW+C",
            PermissionLevel::ReadWriteDelete => "RWD",
            PermissionLevel::ReadWriteForceDelete => "RW+D",
            PermissionLevel::ReadWriteCreateDelete => "RWCD",
            PermissionLevel::ReadWriteForceCreateDelete => "RW+CD",
        }
    }

    fn vocabulary() -> String {
        Self::ALL
            .iter()
            .map(|l| l.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::str::FromStr for PermissionLevel {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| UnknownPermission(s.to_string()))
    }
}

impl TryFrom<String> for PermissionLevel {
    type Error = UnknownPermission;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PermissionLevel> for String {
    fn from(level: PermissionLevel) -> Self {
        level.as_str().to_string()
    }
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
