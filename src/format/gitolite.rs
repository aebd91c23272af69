//! format::gitolite
//!
//! The gitolite admin repository layout.
//!
//! # Files
//!
//! - `conf/gitolite.conf` - group definitions and repository rules
//! - `keydir/<user>.pub` - the user's unlabeled key
//! - `keydir/<label>/<user>.pub` - a labeled key
//!
//! # Rendered form
//!
//! ```text
//! # This file is managed by gitward.
//!
//! @devs = alice bob
//! @ops =
//!
//! repo svc
//!     -  = mallory
//!     RW = alice @devs
//!
//! repo tools
//! ```
//!
//! Groups and repositories are sorted by name, levels in
//! [`PermissionLevel`] order, principals users first, then groups, then
//! `@all`.
//!
//! # Accepted input
//!
//! The parser also takes what people write by hand: comments, blank lines,
//! any indentation, one `repo` header naming several repositories, group
//! definitions and rules split over several lines (they accumulate). It
//! rejects anything it cannot represent (refexes, `include`, `option`,
//! `config`, nested groups, `repo @group`) rather than dropping it.

use std::collections::BTreeMap;

use super::{ConfigFormat, ConfigTree, FormatError};
use crate::core::model::{AccessModel, Principal, SshKey};
use crate::core::permission::PermissionLevel;
use crate::core::types::{GroupName, KeyLabel, RepoName, Username};

/// Path of the main config file.
pub const CONF_PATH: &str = "conf/gitolite.conf";

/// Directory holding public keys.
pub const KEYDIR: &str = "keydir/";

const HEADER: &str = "# This file is managed by gitward.\n";

/// Directives with semantics the model cannot hold.
const UNSUPPORTED_DIRECTIVES: &[&str] = &["include", "subconf", "option", "config"];

/// The gitolite configuration format.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitoliteFormat;

impl GitoliteFormat {
    pub fn new() -> Self {
        Self
    }
}

impl ConfigFormat for GitoliteFormat {
    fn serialize(&self, model: &AccessModel) -> ConfigTree {
        let mut tree = ConfigTree::new();
        tree.insert(CONF_PATH, render_conf(model));
        for (user, key) in model.keys() {
            tree.insert(key_path(user, key.label()), format!("{}\n", key.key()));
        }
        tree
    }

    fn deserialize(&self, tree: &ConfigTree) -> Result<AccessModel, FormatError> {
        let mut model = AccessModel::new();
        load_keys(&mut model, tree)?;
        if let Some(text) = tree.get(CONF_PATH) {
            let conf = parse_conf(text)?;
            conf.apply(&mut model)?;
        }
        model.validate().map_err(|e| FormatError::InvalidFile {
            path: CONF_PATH.to_string(),
            message: e.to_string(),
        })?;
        Ok(model)
    }

    fn owns(&self, path: &str) -> bool {
        path == CONF_PATH || path.starts_with(KEYDIR)
    }
}

/// Path of a key file.
pub fn key_path(user: &Username, label: Option<&KeyLabel>) -> String {
    match label {
        Some(label) => format!("{KEYDIR}{label}/{user}.pub"),
        None => format!("{KEYDIR}{user}.pub"),
    }
}

// =============================================================================
// Rendering
// =============================================================================

fn render_conf(model: &AccessModel) -> String {
    let mut sections = vec![HEADER.to_string()];

    let groups: String = model
        .groups()
        .map(|(group, members)| {
            let mut line = format!("@{group} =");
            for member in members {
                line.push(' ');
                line.push_str(member.as_str());
            }
            line.push('\n');
            line
        })
        .collect();
    if !groups.is_empty() {
        sections.push(groups);
    }

    for (repo, grants) in model.repositories() {
        let mut block = format!("repo {repo}\n");
        let width = grants.keys().map(|l| l.as_str().len()).max().unwrap_or(0);
        for (level, principals) in grants {
            let names: Vec<String> = principals.iter().map(ToString::to_string).collect();
            block.push_str(&format!(
                "    {:<width$} = {}\n",
                level.as_str(),
                names.join(" ")
            ));
        }
        sections.push(block);
    }

    sections.join("\n")
}

// =============================================================================
// Parsing
// =============================================================================

fn load_keys(model: &mut AccessModel, tree: &ConfigTree) -> Result<(), FormatError> {
    let mut keys: BTreeMap<Username, Vec<SshKey>> = BTreeMap::new();

    for (path, contents) in tree.iter().filter(|(p, _)| p.starts_with(KEYDIR)) {
        let invalid = |message: String| FormatError::InvalidFile {
            path: path.to_string(),
            message,
        };

        let relative = &path[KEYDIR.len()..];
        let (label, file) = match relative.split('/').collect::<Vec<_>>().as_slice() {
            [file] => (None, *file),
            [label, file] => (
                Some(KeyLabel::new(*label).map_err(|e| invalid(e.to_string()))?),
                *file,
            ),
            _ => return Err(invalid("keydir nesting deeper than one label".into())),
        };
        let stem = file
            .strip_suffix(".pub")
            .ok_or_else(|| invalid("keydir may only contain .pub files".into()))?;
        let user = Username::new(stem).map_err(|e| invalid(e.to_string()))?;

        let mut lines = contents.lines().filter(|l| !l.trim().is_empty());
        let first = lines
            .next()
            .ok_or_else(|| invalid("key file is empty".into()))?;
        if lines.next().is_some() {
            return Err(invalid("key file holds more than one key".into()));
        }
        let mut key = SshKey::new(first).map_err(|e| invalid(e.to_string()))?;
        if let Some(label) = label {
            key = key.with_label(label);
        }
        keys.entry(user).or_default().push(key);
    }

    for (user, user_keys) in keys {
        let mut user_keys = user_keys.into_iter();
        if let Some(first) = user_keys.next() {
            model
                .add_user(user.clone(), first)
                .and_then(|()| user_keys.try_for_each(|k| model.add_key(&user, k)))
                .map_err(|e| FormatError::InvalidFile {
                    path: key_path(&user, None),
                    message: e.to_string(),
                })?;
        }
    }
    Ok(())
}

/// Parsed `gitolite.conf`, before name resolution.
#[derive(Debug, Default)]
struct Conf {
    groups: Vec<GroupDef>,
    /// Declared repositories with the line first naming them
    repos: Vec<(usize, RepoName)>,
    rules: Vec<Rule>,
}

#[derive(Debug)]
struct GroupDef {
    line: usize,
    name: GroupName,
    members: Vec<Username>,
}

#[derive(Debug)]
struct Rule {
    line: usize,
    repos: Vec<RepoName>,
    level: PermissionLevel,
    principals: Vec<Principal>,
}

impl Conf {
    /// Resolve the parsed config against a model that already holds users.
    fn apply(self, model: &mut AccessModel) -> Result<(), FormatError> {
        for def in self.groups {
            if !model.has_group(&def.name) {
                model
                    .add_group(def.name.clone(), &[])
                    .map_err(|e| syntax(def.line, e))?;
            }
            model
                .add_to_group(&def.members, &def.name)
                .map_err(|e| syntax(def.line, e))?;
        }
        for (line, repo) in self.repos {
            model.add_repository(repo).map_err(|e| syntax(line, e))?;
        }
        for rule in self.rules {
            for repo in &rule.repos {
                model
                    .grant(repo, rule.level, rule.principals.iter().cloned())
                    .map_err(|e| syntax(rule.line, e))?;
            }
        }
        Ok(())
    }
}

fn syntax(line: usize, message: impl ToString) -> FormatError {
    FormatError::Syntax {
        path: CONF_PATH.to_string(),
        line,
        message: message.to_string(),
    }
}

fn parse_conf(text: &str) -> Result<Conf, FormatError> {
    let mut conf = Conf::default();
    let mut current: Option<Vec<RepoName>> = None;

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let content = raw.split('#').next().unwrap_or_default().trim();
        if content.is_empty() {
            continue;
        }
        let first = content.split_whitespace().next().unwrap_or_default();

        if UNSUPPORTED_DIRECTIVES.contains(&first) {
            return Err(syntax(line, format!("'{first}' is not supported")));
        }

        if first == "repo" {
            let names: Vec<&str> = content.split_whitespace().skip(1).collect();
            if names.is_empty() {
                return Err(syntax(line, "repo line names no repository"));
            }
            let mut repos = Vec::with_capacity(names.len());
            for name in names {
                if name.starts_with('@') {
                    return Err(syntax(line, format!("repo groups are not supported: {name}")));
                }
                let repo = RepoName::new(name).map_err(|e| syntax(line, e))?;
                if !conf.repos.iter().any(|(_, known)| *known == repo) {
                    conf.repos.push((line, repo.clone()));
                }
                repos.push(repo);
            }
            current = Some(repos);
            continue;
        }

        let Some((lhs, rhs)) = content.split_once('=') else {
            return Err(syntax(line, format!("unrecognized line: {content}")));
        };
        let lhs: Vec<&str> = lhs.split_whitespace().collect();
        let rhs: Vec<&str> = rhs.split_whitespace().collect();

        if first.starts_with('@') {
            conf.groups.push(parse_group_def(line, &lhs, &rhs)?);
            continue;
        }

        let repos = current
            .as_ref()
            .ok_or_else(|| syntax(line, "rule outside of a repo block"))?;
        let level = match lhs.as_slice() {
            [level] => level
                .parse::<PermissionLevel>()
                .map_err(|e| syntax(line, e))?,
            [level, ..] => {
                level
                    .parse::<PermissionLevel>()
                    .map_err(|e| syntax(line, e))?;
                return Err(syntax(line, "refex rules are not supported"));
            }
            [] => return Err(syntax(line, "rule has no permission")),
        };
        if rhs.is_empty() {
            return Err(syntax(line, "rule names no principal"));
        }
        let principals = rhs
            .iter()
            .map(|token| Principal::parse(token).map_err(|e| syntax(line, e)))
            .collect::<Result<Vec<_>, _>>()?;
        conf.rules.push(Rule {
            line,
            repos: repos.clone(),
            level,
            principals,
        });
    }

    Ok(conf)
}

fn parse_group_def(line: usize, lhs: &[&str], rhs: &[&str]) -> Result<GroupDef, FormatError> {
    let name = match lhs {
        [sigil] => sigil.strip_prefix('@').unwrap_or(sigil),
        _ => return Err(syntax(line, "group definition needs a single @name")),
    };
    let name = GroupName::new(name).map_err(|e| syntax(line, e))?;
    let members = rhs
        .iter()
        .map(|token| {
            if token.starts_with('@') {
                Err(syntax(line, format!("nested groups are not supported: {token}")))
            } else {
                Username::new(*token).map_err(|e| syntax(line, e))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(GroupDef {
        line,
        name,
        members,
    })
}
