//! format
//!
//! Conversion between an [`AccessModel`] and the files of a control
//! repository.
//!
//! # Architecture
//!
//! A [`ConfigFormat`] maps a model to a [`ConfigTree`] (repository-relative
//! path → file text) and back. The control repository adapter only moves
//! trees in and out of git; it never interprets file contents.
//!
//! A format declares which paths it [owns](ConfigFormat::owns). Files
//! outside that set are not part of the model and survive every commit
//! untouched.
//!
//! # Laws
//!
//! - `serialize` is deterministic: equal models produce identical trees
//! - `deserialize(serialize(m)) == m` for every valid model
//! - `deserialize` never drops data it does not understand; it fails with
//!   [`FormatError`] instead
//!
//! # Implementations
//!
//! - [`GitoliteFormat`] - `conf/gitolite.conf` plus `keydir/`

pub mod gitolite;

pub use gitolite::GitoliteFormat;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::model::AccessModel;

/// Errors from reading a control repository's files.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormatError {
    /// A line the grammar does not accept.
    #[error("{path}:{line}: {message}")]
    Syntax {
        path: String,
        line: usize,
        message: String,
    },

    /// A file that cannot be part of the configuration.
    #[error("{path}: {message}")]
    InvalidFile { path: String, message: String },

    /// A file whose contents are not UTF-8 text.
    #[error("{path}: not valid UTF-8")]
    NotUtf8 { path: String },
}

/// Files of a control repository revision, keyed by path.
///
/// Paths use `/` separators and are relative to the repository root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigTree {
    files: BTreeMap<String, String>,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file.
    pub fn insert(&mut self, path: impl Into<String>, contents: impl Into<String>) {
        self.files.insert(path.into(), contents.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.files.remove(path)
    }

    /// Iterate files in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl<P: Into<String>, C: Into<String>> FromIterator<(P, C)> for ConfigTree {
    fn from_iter<I: IntoIterator<Item = (P, C)>>(iter: I) -> Self {
        Self {
            files: iter
                .into_iter()
                .map(|(p, c)| (p.into(), c.into()))
                .collect(),
        }
    }
}

/// A textual representation of the access model.
pub trait ConfigFormat: Send + Sync {
    /// Render the model as files.
    fn serialize(&self, model: &AccessModel) -> ConfigTree;

    /// Rebuild a model from files. Files the format does not own are
    /// ignored.
    fn deserialize(&self, tree: &ConfigTree) -> Result<AccessModel, FormatError>;

    /// Whether `path` is produced by this format.
    fn owns(&self, path: &str) -> bool;

    /// Merge the serialized model over the files of `base` this format does
    /// not own.
    fn render_over(&self, model: &AccessModel, base: &ConfigTree) -> ConfigTree {
        let base = base
            .iter()
            .map(|(path, contents)| (path.to_string(), contents.to_string()));
        merge_entries(self, model, base).into_iter().collect()
    }
}

/// A file as a control repository adapter stores it.
pub trait TreeEntry {
    fn path(&self) -> &str;

    /// A text file produced by a format.
    fn text(path: &str, contents: &str) -> Self;
}

impl TreeEntry for (String, String) {
    fn path(&self) -> &str {
        &self.0
    }

    fn text(path: &str, contents: &str) -> Self {
        (path.to_string(), contents.to_string())
    }
}

/// The entries of `base` that `format` does not own, followed by the
/// serialized model.
///
/// Every adapter builds its next revision through this function, so foreign
/// files are carried over the same way regardless of storage.
pub fn merge_entries<F, E>(
    format: &F,
    model: &AccessModel,
    base: impl IntoIterator<Item = E>,
) -> Vec<E>
where
    F: ConfigFormat + ?Sized,
    E: TreeEntry,
{
    let mut entries: Vec<E> = base
        .into_iter()
        .filter(|entry| !format.owns(entry.path()))
        .collect();
    entries.extend(
        format
            .serialize(model)
            .iter()
            .map(|(path, contents)| E::text(path, contents)),
    );
    entries
}
