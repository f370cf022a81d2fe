// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for the configuration files that ai-rules reads to
//! simplify the process of serialization and deserialization.
//!
//! # User Configuration
//!
//! The user configuration at `~/.ai-rules-config.yaml` holds per-machine
//! tweaks that should never be committed to the shared repository:
//!
//! ```yaml
//! version: 1
//! exclude_symlinks:
//!   - ~/.claude/commands/experimental/**
//! settings_overrides:
//!   claude:
//!     model: opus
//!     env:
//!       MY_VAR: "1"
//! ```
//!
//! Settings overrides are stored as nested documents. Only the `config set`
//! and `config unset` commands speak key path notation.
//!
//! # Project Configuration
//!
//! The repository may carry `ai-rules-project.yaml` at its top-level with
//! additional `exclude_symlinks` patterns shared by everyone using it.

use crate::{
    keypath::KeyPath,
    merge::Document,
    overrides::{forget, record, OverrideError},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::{read_to_string, rename, write},
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, warn};

/// Current user configuration version.
pub const CONFIG_VERSION: u32 = 1;

/// File name of project configuration at repository top-level.
pub const PROJECT_CONFIG_FILE: &str = "ai-rules-project.yaml";

/// User configuration layout.
#[derive(Debug, PartialEq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UserConfig {
    /// Layout version.
    pub version: u32,

    /// Glob patterns of target paths that must never be linked.
    pub exclude_symlinks: Vec<String>,

    /// Nested settings overrides keyed by agent identifier.
    pub settings_overrides: BTreeMap<String, Document>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            exclude_symlinks: Vec::new(),
            settings_overrides: BTreeMap::new(),
        }
    }
}

impl UserConfig {
    /// Load user configuration strictly.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        match read_optional(path.as_ref())? {
            Some(content) => content.parse(),
            None => Ok(Self::default()),
        }
    }

    /// Load user configuration leniently.
    ///
    /// Broken pieces are dropped one by one, so a bad override for one agent
    /// does not take away the overrides of every other agent. Each dropped
    /// piece is reported as a warning.
    pub fn load_lenient(path: impl AsRef<Path>) -> (Self, Vec<String>) {
        let path = path.as_ref();
        let mut warnings = Vec::new();
        let raw = match read_optional(path) {
            Ok(Some(content)) => content,
            Ok(None) => return (Self::default(), warnings),
            Err(error) => {
                warnings.push(format!("ignore user configuration: {error}"));
                return (Self::default(), warnings);
            }
        };

        let document = match serde_yaml::from_str::<Document>(&raw) {
            Ok(Value::Null) => return (Self::default(), warnings),
            Ok(document @ Value::Object(_)) => document,
            Ok(_) => {
                let warning = format!("ignore user configuration at {}: expected mapping", path.display());
                warn!("{warning}");
                warnings.push(warning);
                return (Self::default(), warnings);
            }
            Err(error) => {
                warnings.push(format!(
                    "ignore malformed user configuration at {}: {error}",
                    path.display()
                ));
                return (Self::default(), warnings);
            }
        };

        let mut config = Self::default();
        if let Some(version) = document.get("version") {
            match version.as_u64().and_then(|version| u32::try_from(version).ok()) {
                Some(version) => config.version = version,
                None => warnings.push(format!("ignore invalid version {version}")),
            }
        }

        if let Some(patterns) = document.get("exclude_symlinks") {
            match serde_json::from_value::<Vec<String>>(patterns.clone()) {
                Ok(patterns) => config.exclude_symlinks = patterns,
                Err(_) => warnings.push("ignore exclude_symlinks: expected list of strings".into()),
            }
        }

        match document.get("settings_overrides") {
            None | Some(Value::Null) => {}
            Some(Value::Object(agents)) => {
                for (agent, overrides) in agents {
                    match overrides {
                        Value::Object(_) => {
                            config
                                .settings_overrides
                                .insert(agent.clone(), overrides.clone());
                        }
                        Value::Null => {}
                        _ => warnings.push(format!(
                            "ignore settings_overrides.{agent}: expected mapping"
                        )),
                    }
                }
            }
            Some(_) => warnings.push("ignore settings_overrides: expected mapping".into()),
        }

        for warning in &warnings {
            warn!("{warning}");
        }

        (config, warnings)
    }

    /// Write user configuration.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Serialize`] if configuration cannot be serialized.
    /// - Return [`ConfigError::Write`] if file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml::to_string(self).map_err(ConfigError::Serialize)?;
        write_atomic(path, content)
    }

    /// Settings overrides of one agent.
    pub fn overrides_for(&self, agent: &str) -> Option<&Document> {
        self.settings_overrides.get(agent)
    }

    /// Record key path override of agent.
    ///
    /// The path is validated against `reference`, the document user
    /// overrides of the agent are merged onto.
    ///
    /// # Errors
    ///
    /// - Return [`OverrideError`] if the path does not fit.
    pub fn set_override(
        &mut self,
        agent: &str,
        path: &KeyPath,
        value: Document,
        reference: &Document,
    ) -> Result<(), OverrideError> {
        let overlay = self
            .settings_overrides
            .get(agent)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let recorded = record(&overlay, reference, path, value)?;
        self.settings_overrides.insert(agent.into(), recorded);

        Ok(())
    }

    /// Remove key path override of agent.
    ///
    /// Agents left without any override are dropped entirely.
    ///
    /// # Errors
    ///
    /// - Return [`OverrideError`] if no override exists at path.
    pub fn unset_override(&mut self, agent: &str, path: &KeyPath) -> Result<(), OverrideError> {
        let overlay = self.settings_overrides.get(agent).ok_or_else(|| OverrideError::NotFound {
            path: agent.into(),
            available: self.settings_overrides.keys().cloned().collect(),
        })?;

        let remaining = forget(overlay, path)?;
        match remaining.as_object().is_some_and(Map::is_empty) {
            true => self.settings_overrides.remove(agent),
            false => self.settings_overrides.insert(agent.into(), remaining),
        };

        Ok(())
    }
}

impl FromStr for UserConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: UserConfig = serde_yaml::from_str(data).map_err(ConfigError::Deserialize)?;
        Ok(config)
    }
}

impl Display for UserConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            serde_yaml::to_string(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Project configuration layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Glob patterns of target paths that must never be linked.
    pub exclude_symlinks: Vec<String>,
}

impl ProjectConfig {
    /// Load project configuration from repository top-level.
    ///
    /// Malformed configuration is ignored with a warning.
    pub fn load_lenient(repo_root: impl AsRef<Path>) -> Self {
        let path = repo_root.as_ref().join(PROJECT_CONFIG_FILE);
        let result = read_optional(&path).and_then(|content| match content {
            Some(content) if !content.trim().is_empty() => {
                serde_yaml::from_str::<ProjectConfig>(&content).map_err(ConfigError::Deserialize)
            }
            _ => Ok(Self::default()),
        });

        result.unwrap_or_else(|error| {
            warn!("ignore project configuration at {}: {error}", path.display());
            Self::default()
        })
    }
}

/// Read file that may not exist.
pub(crate) fn read_optional(path: &Path) -> Result<Option<String>> {
    match read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(ConfigError::Read {
            source: error,
            path: path.to_path_buf(),
        }),
    }
}

/// Write file by writing a sibling temporary file, then renaming it.
///
/// Readers either see the old content or the new content, never a partial
/// write. Parent directories are created as needed.
pub(crate) fn write_atomic(path: impl AsRef<Path>, content: impl AsRef<[u8]>) -> Result<()> {
    let path = path.as_ref();
    let write_error = |source| ConfigError::Write {
        source,
        path: path.to_path_buf(),
    };

    if let Some(parent) = path.parent() {
        mkdirp::mkdirp(parent).map_err(write_error)?;
    }

    let mut temp = path.as_os_str().to_owned();
    temp.push(format!(".tmp.{}", std::process::id()));
    let temp = PathBuf::from(temp);
    write(&temp, content).map_err(write_error)?;
    rename(&temp, path).map_err(write_error)?;
    debug!("wrote {}", path.display());

    Ok(())
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to write configuration file.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(serde_yaml::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(serde_yaml::Error),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
pub type Result<T, E = ConfigError> = std::result::Result<T, E>;
