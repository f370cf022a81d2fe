// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Settings merge engine.
//!
//! The settings file an agent reads is never the raw file from the
//! repository. Instead, it is the product of three layers merged from lowest
//! to highest precedence:
//!
//! 1. Base settings file at `<repo>/<agent>/<settings-file>`.
//! 2. Overrides of the active profile, if any.
//! 3. Overrides of the user configuration.
//!
//! After merging, __managed fields__ are copied verbatim out of the
//! previously merged artifact, because the agent itself owns them. The
//! result is stored in the settings [cache], and the agent's settings file
//! is linked to it.
//!
//! Broken layers are isolated. A malformed base settings file fails that
//! agent alone. A malformed override layer is dropped with a warning, and
//! the remaining layers still produce a usable artifact.

pub mod cache;
pub mod format;

use crate::{
    agent::AgentDefinition,
    config::UserConfig,
    keypath::KeyPath,
    merge::{merge_layers, Document},
    overrides::{get, graft},
    profile::ResolvedProfile,
    settings::{
        cache::{CacheError, CacheState, Fingerprint, SettingsCache},
        format::{FormatError, SettingsFormat},
    },
};

use serde_json::Value;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Build merged settings.
///
/// Layers are merged on top of `base` in order, then every managed field
/// found in `previous` overwrites whatever the layers produced at its path.
/// Managed fields absent from `previous` are left untouched.
///
/// Feeding the result back in as `previous` with unchanged layers yields
/// the same document again.
pub fn build(
    base: &Document,
    profile: Option<&Document>,
    user: Option<&Document>,
    previous: Option<&Document>,
    managed: &[KeyPath],
) -> Document {
    let mut merged = merge_layers(base, profile.into_iter().chain(user));
    let Some(previous) = previous else {
        return merged;
    };

    for path in managed {
        let Ok(value) = get(previous, path) else {
            continue;
        };

        match graft(&merged, path, value.clone()) {
            Ok(patched) => merged = patched,
            Err(error) => warn!("cannot carry managed field {path} forward: {error}"),
        }
    }

    merged
}

/// Kind of difference between two settings documents at one path.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    Added(Document),
    Removed(Document),
    Changed { from: Document, to: Document },
}

/// Single difference between two settings documents.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingChange {
    /// Dotted path of changed value.
    pub path: String,
    pub kind: ChangeKind,
}

impl Display for SettingChange {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ChangeKind::Added(value) => write!(fmt, "+ {}: {value}", self.path),
            ChangeKind::Removed(value) => write!(fmt, "- {}: {value}", self.path),
            ChangeKind::Changed { from, to } => write!(fmt, "~ {}: {from} -> {to}", self.path),
        }
    }
}

/// List differences from `before` to `after`.
///
/// Mappings are compared key by key. Sequences and scalars are compared
/// as a whole, the same way merging replaces them. Changes are sorted by
/// path.
pub fn changes(before: &Document, after: &Document) -> Vec<SettingChange> {
    let mut found = Vec::new();
    collect_changes("", before, after, &mut found);
    found
}

fn collect_changes(prefix: &str, before: &Document, after: &Document, found: &mut Vec<SettingChange>) {
    let (Value::Object(old), Value::Object(new)) = (before, after) else {
        if before != after {
            found.push(SettingChange {
                path: prefix.to_string(),
                kind: ChangeKind::Changed {
                    from: before.clone(),
                    to: after.clone(),
                },
            });
        }
        return;
    };

    let mut keys = old.keys().chain(new.keys()).collect::<Vec<_>>();
    keys.sort();
    keys.dedup();

    for key in keys {
        let path = match prefix.is_empty() {
            true => key.clone(),
            false => format!("{prefix}.{key}"),
        };

        match (old.get(key), new.get(key)) {
            (Some(old), Some(new)) => collect_changes(&path, old, new, found),
            (Some(old), None) => found.push(SettingChange {
                path,
                kind: ChangeKind::Removed(old.clone()),
            }),
            (None, Some(new)) => found.push(SettingChange {
                path,
                kind: ChangeKind::Added(new.clone()),
            }),
            (None, None) => {}
        }
    }
}

/// Override layers shared by every agent during one command.
#[derive(Debug, Clone, Copy)]
pub struct Layers<'a> {
    /// Leniently loaded user configuration.
    pub user: &'a UserConfig,

    /// Where the user configuration was loaded from.
    pub user_path: &'a Path,

    /// Resolved active profile, if any.
    pub profile: Option<&'a ResolvedProfile>,
}

/// Loaded inputs of one merge.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsInputs {
    pub base: Document,
    pub profile: Option<Document>,
    pub user: Option<Document>,

    /// Every file that contributed, in merge order.
    pub sources: Vec<PathBuf>,

    /// Name of applied profile.
    pub profile_name: Option<String>,

    /// Layers that were dropped, and why.
    pub warnings: Vec<String>,
}

/// Merge engine of one agent's settings.
#[derive(Debug, Clone)]
pub struct SettingsEngine<'a> {
    agent: &'static AgentDefinition,
    base_path: PathBuf,
    format: SettingsFormat,
    cache: SettingsCache,
    layers: Layers<'a>,
}

impl<'a> SettingsEngine<'a> {
    /// Construct new settings engine for agent.
    ///
    /// Returns `None` if agent keeps no settings file.
    pub fn new(
        agent: &'static AgentDefinition,
        repo_root: impl AsRef<Path>,
        cache_root: impl AsRef<Path>,
        layers: Layers<'a>,
    ) -> Option<Self> {
        let (link, format) = agent.settings()?;
        let repo_root = repo_root.as_ref();
        let base_path = repo_root.join(agent.id).join(link.source);
        let artifact_name = Path::new(link.source)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| link.source.to_string());
        let cache = SettingsCache::new(
            cache_root,
            agent.id,
            &cache::repo_hash(repo_root),
            artifact_name,
            format,
        );

        Some(Self {
            agent,
            base_path,
            format,
            cache,
            layers,
        })
    }

    /// Path of base settings file in repository.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn cache(&self) -> &SettingsCache {
        &self.cache
    }

    /// Contributing source files in merge order.
    pub fn sources(&self) -> Vec<PathBuf> {
        let mut sources = vec![self.base_path.clone()];
        if let Some(profile) = self.layers.profile {
            sources.extend(profile.sources.iter().cloned());
        }
        sources.push(self.layers.user_path.to_path_buf());
        sources
    }

    fn profile_name(&self) -> Option<&str> {
        self.layers.profile.map(|profile| profile.name.as_str())
    }

    /// Load base settings file.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::MissingBase`] if base settings file is absent.
    /// - Return [`SettingsError::BaseRead`] if base settings file cannot be read.
    /// - Return [`SettingsError::BaseParse`] if base settings file is malformed.
    pub fn load_base(&self) -> Result<Document> {
        let path = &self.base_path;
        let text = read_to_string(path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => SettingsError::MissingBase {
                agent: self.agent.id.into(),
                path: path.clone(),
            },
            _ => SettingsError::BaseRead {
                source,
                agent: self.agent.id.into(),
                path: path.clone(),
            },
        })?;

        self.format
            .parse(&text)
            .map_err(|source| SettingsError::BaseParse {
                source,
                agent: self.agent.id.into(),
                path: path.clone(),
            })
    }

    /// Load every merge input.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError`] if base settings cannot be loaded. Broken
    ///   override layers are dropped into [`SettingsInputs::warnings`].
    #[instrument(skip(self), fields(agent = self.agent.id), level = "debug")]
    pub fn inputs(&self) -> Result<SettingsInputs> {
        let base = self.load_base()?;
        let mut warnings = Vec::new();

        let profile = self
            .layers
            .profile
            .and_then(|profile| profile.overrides_for(self.agent.id))
            .and_then(|layer| mapping_layer(layer, "profile", self.agent.id, &mut warnings));
        let user = self
            .layers
            .user
            .overrides_for(self.agent.id)
            .and_then(|layer| mapping_layer(layer, "user", self.agent.id, &mut warnings));

        Ok(SettingsInputs {
            base,
            profile,
            user,
            sources: self.sources(),
            profile_name: self.profile_name().map(Into::into),
            warnings,
        })
    }

    /// Cache state against current inputs.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::Cache`] if fingerprint cannot be read.
    pub fn state(&self) -> Result<CacheState> {
        Ok(self.cache.state(self.profile_name(), &self.sources())?)
    }

    /// Merge settings in memory without writing anything.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError`] if base settings cannot be loaded.
    pub fn preview(&self) -> Result<Document> {
        let inputs = self.inputs()?;
        let previous = self.cache.load_artifact();
        Ok(self.merge_inputs(&inputs, previous.as_ref()))
    }

    /// Merge settings and store them in the cache.
    ///
    /// Returns path of the stored artifact.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError`] if base settings cannot be loaded, or cache
    ///   cannot be written. No partial artifact is left to link against.
    #[instrument(skip(self), fields(agent = self.agent.id), level = "debug")]
    pub fn rebuild(&self) -> Result<PathBuf> {
        let inputs = self.inputs()?;
        let previous = self.cache.load_artifact();
        let merged = self.merge_inputs(&inputs, previous.as_ref());
        let fingerprint = Fingerprint::compute(inputs.profile_name.as_deref(), &inputs.sources)?;
        let path = self.cache.store(&merged, &fingerprint)?;
        info!("rebuilt {} settings", self.agent.id);

        Ok(path)
    }

    fn merge_inputs(&self, inputs: &SettingsInputs, previous: Option<&Document>) -> Document {
        debug!(
            "merge {} settings with profile {:?}",
            self.agent.id, inputs.profile_name
        );
        build(
            &inputs.base,
            inputs.profile.as_ref(),
            inputs.user.as_ref(),
            previous,
            &self.agent.managed_paths(),
        )
    }
}

fn mapping_layer(
    layer: &Document,
    origin: &str,
    agent: &str,
    warnings: &mut Vec<String>,
) -> Option<Document> {
    match layer {
        Value::Object(_) => Some(layer.clone()),
        Value::Null => None,
        _ => {
            let warning = format!("ignore {origin} overrides of {agent}: expected mapping");
            warn!("{warning}");
            warnings.push(warning);
            None
        }
    }
}

/// Settings merge error types.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Agent has no base settings file in repository.
    #[error("{agent}: missing base settings at {:?}", path.display())]
    MissingBase { agent: String, path: PathBuf },

    /// Base settings file cannot be read.
    #[error("{agent}: failed to read base settings at {:?}", path.display())]
    BaseRead {
        #[source]
        source: std::io::Error,
        agent: String,
        path: PathBuf,
    },

    /// Base settings file is malformed.
    #[error("{agent}: malformed base settings at {:?}", path.display())]
    BaseParse {
        #[source]
        source: FormatError,
        agent: String,
        path: PathBuf,
    },

    /// Settings cache cannot be read or written.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Friendly result alias :3
pub type Result<T, E = SettingsError> = std::result::Result<T, E>;
