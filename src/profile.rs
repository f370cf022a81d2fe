// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Settings profiles.
//!
//! A __profile__ is a named set of settings overrides, e.g., "work" may pin a
//! different model and extra environment variables than "personal". Profiles
//! can build on each other through `extends`:
//!
//! ```yaml
//! name: work
//! description: Settings for the day job
//! extends: base
//! settings_overrides:
//!   claude:
//!     model: opus
//! ```
//!
//! # Lookup
//!
//! Built-in profiles ship with the repository under `config/profiles/`, user
//! profiles live in `~/.ai-rules/profiles/`. Both share one namespace, and the
//! user directory is searched first, so a user profile shadows a built-in
//! profile of the same name.
//!
//! # Resolution
//!
//! Resolving a profile walks its `extends` chain up to the root, then merges
//! the overrides of each profile from the root downward. Children therefore
//! win over their ancestors. A chain that revisits a profile is a cycle, and
//! is rejected.

use crate::merge::{merge_into, Document};

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs::{read_dir, read_to_string},
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, instrument, warn};

/// Profile file layout.
#[derive(Default, Debug, PartialEq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProfileDefinition {
    pub name: String,
    pub description: String,

    /// Parent profile whose overrides apply first.
    pub extends: Option<String>,

    /// Nested settings overrides keyed by agent identifier.
    pub settings_overrides: BTreeMap<String, Document>,
}

impl FromStr for ProfileDefinition {
    type Err = serde_yaml::Error;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(data)
    }
}

/// Where a profile was defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOrigin {
    /// Shipped with the repository, read-only.
    Builtin,

    /// Defined by the user.
    User,
}

/// Profile definition together with its source file.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedProfile {
    pub definition: ProfileDefinition,
    pub origin: ProfileOrigin,
    pub path: PathBuf,
}

/// Listing entry of an available profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSummary {
    pub name: String,
    pub description: String,
    pub origin: ProfileOrigin,

    /// User profile hides built-in profile of same name.
    pub shadows_builtin: bool,
}

/// Layer of indirection for profile access.
pub trait ProfileLookup {
    /// Find profile by name.
    ///
    /// Return `Ok(None)` if no profile has that name.
    fn lookup(&self, name: &str) -> Result<Option<LoadedProfile>>;
}

/// Profile lookup through user and built-in profile directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDirs {
    user: PathBuf,
    builtin: PathBuf,
}

impl ProfileDirs {
    /// Construct new profile directory lookup.
    pub fn new(user: impl Into<PathBuf>, builtin: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            builtin: builtin.into(),
        }
    }

    /// List every available profile, sorted by name.
    ///
    /// Unreadable profile files are listed with an empty description.
    ///
    /// # Errors
    ///
    /// - Return [`ResolveError::Read`] if a profile directory cannot be read.
    pub fn list(&self) -> Result<Vec<ProfileSummary>> {
        let builtin = profile_names(&self.builtin)?;
        let user = profile_names(&self.user)?;

        let mut summaries = BTreeMap::new();
        for (origin, dir, names) in [
            (ProfileOrigin::Builtin, &self.builtin, &builtin),
            (ProfileOrigin::User, &self.user, &user),
        ] {
            for (name, path) in names {
                let description = load_profile(path, origin)
                    .map(|loaded| loaded.definition.description)
                    .unwrap_or_default();
                debug!("found {origin:?} profile {name} in {}", dir.display());
                summaries.insert(
                    name.clone(),
                    ProfileSummary {
                        name: name.clone(),
                        description,
                        origin,
                        shadows_builtin: origin == ProfileOrigin::User
                            && builtin.contains_key(name),
                    },
                );
            }
        }

        Ok(summaries.into_values().collect())
    }
}

impl ProfileLookup for ProfileDirs {
    fn lookup(&self, name: &str) -> Result<Option<LoadedProfile>> {
        validate_name(name)?;
        for (origin, dir) in [
            (ProfileOrigin::User, &self.user),
            (ProfileOrigin::Builtin, &self.builtin),
        ] {
            for extension in ["yaml", "yml"] {
                let path = dir.join(format!("{name}.{extension}"));
                if path.is_file() {
                    return load_profile(&path, origin).map(Some);
                }
            }
        }

        Ok(None)
    }
}

impl ProfileLookup for HashMap<String, ProfileDefinition> {
    fn lookup(&self, name: &str) -> Result<Option<LoadedProfile>> {
        Ok(self.get(name).map(|definition| LoadedProfile {
            definition: definition.clone(),
            origin: ProfileOrigin::User,
            path: PathBuf::from(format!("{name}.yaml")),
        }))
    }
}

/// Fully resolved profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProfile {
    pub name: String,

    /// Profile names from root ancestor down to the resolved profile.
    pub chain: Vec<String>,

    /// Profile files of the chain, same order as `chain`.
    pub sources: Vec<PathBuf>,

    /// Merged overrides keyed by agent identifier.
    pub overrides: BTreeMap<String, Document>,
}

impl ResolvedProfile {
    /// Merged overrides of one agent.
    pub fn overrides_for(&self, agent: &str) -> Option<&Document> {
        self.overrides.get(agent)
    }
}

/// Resolve profile by walking its `extends` chain.
///
/// # Errors
///
/// - Return [`ResolveError::NotFound`] if a profile in the chain is missing.
/// - Return [`ResolveError::Cycle`] if the chain revisits a profile.
/// - Return [`ResolveError::Read`] or [`ResolveError::Parse`] if a profile
///   file is broken.
#[instrument(skip(lookup), level = "debug")]
pub fn resolve(name: &str, lookup: &impl ProfileLookup) -> Result<ResolvedProfile> {
    let mut walk: Vec<LoadedProfile> = Vec::new();
    let mut visited: Vec<String> = Vec::new();
    let mut next = Some(name.to_string());

    while let Some(current) = next {
        if visited.contains(&current) {
            visited.push(current);
            return Err(ResolveError::Cycle { chain: visited });
        }

        let loaded = lookup
            .lookup(&current)?
            .ok_or_else(|| ResolveError::NotFound {
                name: current.clone(),
                required_by: visited.last().cloned(),
            })?;

        if !loaded.definition.name.is_empty() && loaded.definition.name != current {
            warn!(
                "profile {current:?} at {} calls itself {:?}",
                loaded.path.display(),
                loaded.definition.name
            );
        }

        next = loaded.definition.extends.clone();
        visited.push(current);
        walk.push(loaded);
    }

    walk.reverse();
    visited.reverse();

    let mut overrides: BTreeMap<String, Document> = BTreeMap::new();
    for loaded in &walk {
        for (agent, layer) in &loaded.definition.settings_overrides {
            match overrides.get_mut(agent) {
                Some(merged) => merge_into(merged, layer),
                None => {
                    overrides.insert(agent.clone(), layer.clone());
                }
            }
        }
    }
    debug!("resolved profile chain {}", visited.join(" -> "));

    Ok(ResolvedProfile {
        name: name.to_string(),
        chain: visited,
        sources: walk.into_iter().map(|loaded| loaded.path).collect(),
        overrides,
    })
}

fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_whitespace);

    match invalid {
        true => Err(ResolveError::InvalidName(name.to_string())),
        false => Ok(()),
    }
}

fn load_profile(path: &Path, origin: ProfileOrigin) -> Result<LoadedProfile> {
    let content = read_to_string(path).map_err(|source| ResolveError::Read {
        source,
        path: path.to_path_buf(),
    })?;
    let definition = content
        .parse::<ProfileDefinition>()
        .map_err(|source| ResolveError::Parse {
            source,
            path: path.to_path_buf(),
        })?;

    Ok(LoadedProfile {
        definition,
        origin,
        path: path.to_path_buf(),
    })
}

fn profile_names(dir: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let entries = match read_dir(dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(source) => {
            return Err(ResolveError::Read {
                source,
                path: dir.to_path_buf(),
            })
        }
    };

    let mut names = BTreeMap::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_profile = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml")
        );
        if !is_profile || !path.is_file() {
            continue;
        }

        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            names.insert(stem.to_string(), path.clone());
        }
    }

    Ok(names)
}

/// Profile resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Profile chain revisits a profile.
    #[error("profile inheritance cycle: {}", chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    /// Named profile does not exist.
    #[error("profile {name:?} not found{}", required_by.as_ref().map(|by| format!(" (extended by {by:?})")).unwrap_or_default())]
    NotFound {
        name: String,
        required_by: Option<String>,
    },

    /// Profile name cannot name a file.
    #[error("invalid profile name {0:?}")]
    InvalidName(String),

    /// Profile file cannot be read.
    #[error("failed to read profile at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Profile file is malformed.
    #[error("failed to parse profile at {:?}", path.display())]
    Parse {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ResolveError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn profile(extends: Option<&str>, overrides: Document) -> ProfileDefinition {
        let overrides = match overrides {
            Document::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };

        ProfileDefinition {
            name: String::new(),
            description: String::new(),
            extends: extends.map(Into::into),
            settings_overrides: overrides,
        }
    }

    #[test]
    fn child_overrides_win_over_ancestors() -> anyhow::Result<()> {
        let profiles = HashMap::from([
            (
                "base".to_string(),
                profile(None, json!({"claude": {"model": "a", "env": {"A": "1"}}})),
            ),
            (
                "team".to_string(),
                profile(Some("base"), json!({"claude": {"env": {"B": "2"}}, "codex": {"model": "o3"}})),
            ),
            (
                "work".to_string(),
                profile(Some("team"), json!({"claude": {"model": "b"}})),
            ),
        ]);

        let result = resolve("work", &profiles)?;
        assert_eq!(result.chain, vec!["base", "team", "work"]);
        assert_eq!(
            result.overrides_for("claude"),
            Some(&json!({"model": "b", "env": {"A": "1", "B": "2"}}))
        );
        assert_eq!(result.overrides_for("codex"), Some(&json!({"model": "o3"})));
        assert_eq!(result.sources.len(), 3);

        Ok(())
    }

    #[test]
    fn mutual_extends_is_cycle() {
        let profiles = HashMap::from([
            ("a".to_string(), profile(Some("b"), json!({}))),
            ("b".to_string(), profile(Some("a"), json!({}))),
        ]);

        let result = resolve("a", &profiles).unwrap_err();
        match result {
            ResolveError::Cycle { chain } => assert_eq!(chain, vec!["a", "b", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_extends_is_cycle() {
        let profiles = HashMap::from([("a".to_string(), profile(Some("a"), json!({})))]);
        assert!(matches!(resolve("a", &profiles), Err(ResolveError::Cycle { .. })));
    }

    #[test]
    fn missing_parent_is_not_found() {
        let profiles = HashMap::from([("a".to_string(), profile(Some("ghost"), json!({})))]);
        let result = resolve("a", &profiles).unwrap_err();
        assert_eq!(
            result.to_string(),
            r#"profile "ghost" not found (extended by "a")"#
        );
    }

    #[test]
    fn user_profile_shadows_builtin() -> anyhow::Result<()> {
        let user = tempfile::tempdir()?;
        let builtin = tempfile::tempdir()?;
        std::fs::write(
            builtin.path().join("work.yaml"),
            indoc! {r#"
                name: work
                description: built-in work
                settings_overrides:
                  claude:
                    model: a
            "#},
        )?;
        std::fs::write(
            builtin.path().join("personal.yaml"),
            "name: personal\ndescription: fun\n",
        )?;
        std::fs::write(
            user.path().join("work.yaml"),
            indoc! {r#"
                name: work
                description: my work
                settings_overrides:
                  claude:
                    model: b
            "#},
        )?;

        let dirs = ProfileDirs::new(user.path(), builtin.path());
        let result = resolve("work", &dirs)?;
        assert_eq!(result.overrides_for("claude"), Some(&json!({"model": "b"})));
        assert_eq!(result.sources, vec![user.path().join("work.yaml")]);

        let listing = dirs.list()?;
        assert_eq!(
            listing,
            vec![
                ProfileSummary {
                    name: "personal".into(),
                    description: "fun".into(),
                    origin: ProfileOrigin::Builtin,
                    shadows_builtin: false,
                },
                ProfileSummary {
                    name: "work".into(),
                    description: "my work".into(),
                    origin: ProfileOrigin::User,
                    shadows_builtin: true,
                },
            ]
        );

        Ok(())
    }

    #[test]
    fn reject_path_like_names() {
        let dirs = ProfileDirs::new("/nonexistent/user", "/nonexistent/builtin");
        assert!(matches!(
            resolve("../etc/passwd", &dirs),
            Err(ResolveError::InvalidName(_))
        ));
        assert!(matches!(resolve("nope", &dirs), Err(ResolveError::NotFound { .. })));
    }
}
