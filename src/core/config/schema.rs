//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Location
//!
//! Searched in order:
//! 1. `$GITWARD_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/gitward/config.toml`
//! 3. `~/.gitward/config.toml` (canonical write location)
//!
//! # Validation
//!
//! Config values are validated after parsing (branch names, non-zero retry
//! limits, non-empty author identity).

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// The whole config file.
///
/// # Example
///
/// ```toml
/// [control]
/// url = "git@git.example.com:gitolite-admin"
/// branch = "master"
/// mirror_dir = "/var/cache/gitward/mirror"
/// ssh_key = "/etc/gitward/id_ed25519"
///
/// [apply]
/// max_attempts = 3
/// timeout_secs = 30
/// retry_delay_ms = 50
///
/// [commit]
/// author_name = "gitward"
/// author_email = "gitward@localhost"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Where the control repository lives
    pub control: Option<ControlSection>,

    /// Apply cycle tuning
    pub apply: Option<ApplySection>,

    /// Identity recorded on control repository commits
    pub commit: Option<CommitSection>,
}

impl FileConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(control) = &self.control {
            control.validate()?;
        }
        if let Some(apply) = &self.apply {
            apply.validate()?;
        }
        if let Some(commit) = &self.commit {
            commit.validate()?;
        }
        Ok(())
    }
}

/// `[control]`: the control repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ControlSection {
    /// Remote URL (or local path) of the control repository
    pub url: Option<String>,

    /// Branch holding the configuration (default: "master")
    pub branch: Option<String>,

    /// Local bare mirror directory
    pub mirror_dir: Option<std::path::PathBuf>,

    /// Private key for SSH transport; the SSH agent is used when unset
    pub ssh_key: Option<std::path::PathBuf>,
}

impl ControlSection {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.url {
            if url.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "control.url cannot be empty".to_string(),
                ));
            }
        }
        if let Some(branch) = &self.branch {
            validate_branch(branch)?;
        }
        Ok(())
    }
}

/// `[apply]`: retry policy of the apply cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ApplySection {
    /// Attempts before giving up with a conflict (default: 3)
    pub max_attempts: Option<u32>,

    /// Per-call timeout against the control repository (default: 30)
    pub timeout_secs: Option<u64>,

    /// Base delay between attempts, doubled each retry (default: 50)
    pub retry_delay_ms: Option<u64>,
}

impl ApplySection {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == Some(0) {
            return Err(ConfigError::InvalidValue(
                "apply.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue(
                "apply.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// `[commit]`: author of control repository commits.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CommitSection {
    pub author_name: Option<String>,
    pub author_email: Option<String>,
}

impl CommitSection {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("author_name", &self.author_name),
            ("author_email", &self.author_email),
        ] {
            if let Some(value) = value {
                if value.trim().is_empty() || value.contains(['<', '>', '\n']) {
                    return Err(ConfigError::InvalidValue(format!(
                        "commit.{field} is not a valid identity: '{value}'"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Branch names follow git's ref rules, restricted to what a config
/// branch plausibly needs.
fn validate_branch(branch: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| {
        Err(ConfigError::InvalidValue(format!(
            "invalid control.branch '{branch}': {reason}"
        )))
    };
    if branch.is_empty() {
        return invalid("cannot be empty");
    }
    if branch.starts_with('-') || branch.starts_with('/') || branch.ends_with('/') {
        return invalid("cannot start with '-' or '/', or end with '/'");
    }
    if branch.contains("..") || branch.contains("//") || branch.contains("@{") {
        return invalid("cannot contain '..', '//' or '@{'");
    }
    if branch.ends_with(".lock") || branch.ends_with('.') {
        return invalid("cannot end with '.lock' or '.'");
    }
    if let Some(c) = branch
        .chars()
        .find(|c| c.is_control() || c.is_whitespace() || "~^:?*[\\".contains(*c))
    {
        return invalid(&format!("cannot contain '{}'", c.escape_default()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_file() {
        let toml = r#"
            [control]
            url = "git@example.com:gitolite-admin"
            branch = "main"

            [apply]
            max_attempts = 5

            [commit]
            author_name = "ops bot"
        "#;
        let config: FileConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        let control = config.control.unwrap();
        assert_eq!(control.branch.as_deref(), Some("main"));
        assert_eq!(config.apply.unwrap().max_attempts, Some(5));
    }

    #[test]
    fn empty_file_is_default() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config, FileConfig::default());
    }

    #[test]
    fn unknown_section_rejected() {
        assert!(toml::from_str::<FileConfig>("[forge]\nname = \"x\"").is_err());
    }

    #[test]
    fn unknown_key_in_section_rejected() {
        assert!(toml::from_str::<FileConfig>("[apply]\nretries = 2").is_err());
    }

    #[test]
    fn zero_attempts_rejected() {
        let config: FileConfig = toml::from_str("[apply]\nmax_attempts = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_branch_names_rejected() {
        for branch in ["", "a..b", "-x", "x.lock", "has space", "a:b", "trailing/"] {
            assert!(validate_branch(branch).is_err(), "accepted {branch:?}");
        }
        for branch in ["master", "main", "admin/config", "v1.2"] {
            assert!(validate_branch(branch).is_ok(), "rejected {branch:?}");
        }
    }

    #[test]
    fn author_with_angle_brackets_rejected() {
        let section = CommitSection {
            author_email: Some("<bot@example.com>".into()),
            ..Default::default()
        };
        assert!(section.validate().is_err());
    }
}
