//! core::config
//!
//! Configuration schema and loading.
//!
//! # Precedence
//!
//! Configuration values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Config file
//! 3. CLI flags (applied by the caller through the `set_*` methods)
//!
//! # Locations
//!
//! Searched in order:
//! 1. `$GITWARD_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/gitward/config.toml`
//! 3. `~/.gitward/config.toml`
//!
//! # Example
//!
//! ```no_run
//! use gitward::core::config::Config;
//!
//! let config = Config::load().unwrap();
//! println!("branch: {}", config.branch());
//! println!("attempts: {}", config.max_attempts());
//! ```

pub mod schema;

pub use schema::{ApplySection, CommitSection, ControlSection, FileConfig};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "GITWARD_CONFIG";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Resolved configuration.
///
/// Accessors apply defaults for anything the file leaves out.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Parsed file contents (default when no file was found)
    pub file: FileConfig,
    /// Path the file was loaded from
    path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default locations.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed or
    /// fails validation. A missing config file is not an error.
    pub fn load() -> Result<Config, ConfigError> {
        match Self::find()? {
            Some(path) => Self::load_from(&path),
            None => Ok(Config::default()),
        }
    }

    /// Load configuration from an explicit file.
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file: FileConfig = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        file.validate()?;
        Ok(Config {
            file,
            path: Some(path.to_path_buf()),
        })
    }

    /// Locate the first existing config file.
    fn find() -> Result<Option<PathBuf>, ConfigError> {
        // 1. Check $GITWARD_CONFIG; an explicit path must exist
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(ConfigError::ReadError {
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("named by ${CONFIG_ENV}"),
                    ),
                    path,
                });
            }
            return Ok(Some(path));
        }

        // 2. Check $XDG_CONFIG_HOME/gitward/config.toml
        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("gitward/config.toml");
            if path.exists() {
                return Ok(Some(path));
            }
        }

        // 3. Check ~/.gitward/config.toml
        if let Some(home) = dirs::home_dir() {
            let path = home.join(".gitward/config.toml");
            if path.exists() {
                return Ok(Some(path));
            }
        }

        Ok(None)
    }

    // =========================================================================
    // CLI overrides
    // =========================================================================

    fn control_mut(&mut self) -> &mut ControlSection {
        self.file.control.get_or_insert_with(ControlSection::default)
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.control_mut().url = Some(url.into());
    }

    pub fn set_branch(&mut self, branch: impl Into<String>) -> Result<(), ConfigError> {
        let section = ControlSection {
            branch: Some(branch.into()),
            ..Default::default()
        };
        section.validate()?;
        self.control_mut().branch = section.branch;
        Ok(())
    }

    pub fn set_mirror_dir(&mut self, dir: impl Into<PathBuf>) {
        self.control_mut().mirror_dir = Some(dir.into());
    }

    // =========================================================================
    // Accessor methods with defaults
    // =========================================================================

    /// Control repository URL, if configured.
    pub fn url(&self) -> Option<&str> {
        self.file.control.as_ref().and_then(|c| c.url.as_deref())
    }

    /// Control branch.
    ///
    /// Defaults to "master", the branch gitolite's admin repository uses.
    pub fn branch(&self) -> &str {
        self.file
            .control
            .as_ref()
            .and_then(|c| c.branch.as_deref())
            .unwrap_or("master")
    }

    /// Local mirror directory.
    ///
    /// Defaults to `<cache dir>/gitward/mirror`; `None` only when no cache
    /// directory can be determined.
    pub fn mirror_dir(&self) -> Option<PathBuf> {
        self.file
            .control
            .as_ref()
            .and_then(|c| c.mirror_dir.clone())
            .or_else(|| dirs::cache_dir().map(|d| d.join("gitward/mirror")))
    }

    /// SSH private key, if configured.
    pub fn ssh_key(&self) -> Option<&Path> {
        self.file
            .control
            .as_ref()
            .and_then(|c| c.ssh_key.as_deref())
    }

    /// Apply attempts before reporting a conflict. Defaults to 3.
    pub fn max_attempts(&self) -> u32 {
        self.file
            .apply
            .as_ref()
            .and_then(|a| a.max_attempts)
            .unwrap_or(3)
    }

    /// Per-call timeout. Defaults to 30 seconds.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.file
                .apply
                .as_ref()
                .and_then(|a| a.timeout_secs)
                .unwrap_or(30),
        )
    }

    /// Base retry delay. Defaults to 50 milliseconds.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(
            self.file
                .apply
                .as_ref()
                .and_then(|a| a.retry_delay_ms)
                .unwrap_or(50),
        )
    }

    /// Commit author name. Defaults to "gitward".
    pub fn author_name(&self) -> &str {
        self.file
            .commit
            .as_ref()
            .and_then(|c| c.author_name.as_deref())
            .unwrap_or("gitward")
    }

    /// Commit author email. Defaults to "gitward@localhost".
    pub fn author_email(&self) -> &str {
        self.file
            .commit
            .as_ref()
            .and_then(|c| c.author_email.as_deref())
            .unwrap_or("gitward@localhost")
    }

    /// Get the path the config was loaded from.
    pub fn loaded_from(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_without_file() {
        let config = Config::default();
        assert_eq!(config.url(), None);
        assert_eq!(config.branch(), "master");
        assert_eq!(config.max_attempts(), 3);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.retry_delay(), Duration::from_millis(50));
        assert_eq!(config.author_name(), "gitward");
        assert!(config.loaded_from().is_none());
    }

    #[test]
    fn load_from_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
            [control]
            url = "/srv/gitolite-admin.git"
            branch = "main"
            mirror_dir = "/tmp/mirror"

            [apply]
            timeout_secs = 5
            "#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.url(), Some("/srv/gitolite-admin.git"));
        assert_eq!(config.branch(), "main");
        assert_eq!(config.mirror_dir(), Some(PathBuf::from("/tmp/mirror")));
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.max_attempts(), 3);
        assert_eq!(config.loaded_from(), Some(path.as_path()));
    }

    #[test]
    fn invalid_values_rejected_on_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[control]\nbranch = \"bad..name\"").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn parse_error_names_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[control\n").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = Config::default();
        config.set_url("/tmp/remote.git");
        config.set_branch("main").unwrap();
        config.set_mirror_dir("/tmp/m");
        assert_eq!(config.url(), Some("/tmp/remote.git"));
        assert_eq!(config.branch(), "main");
        assert_eq!(config.mirror_dir(), Some(PathBuf::from("/tmp/m")));
        assert!(config.set_branch("a b").is_err());
        assert_eq!(config.branch(), "main");
    }
}
