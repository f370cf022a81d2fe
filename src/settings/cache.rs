// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Merged settings cache.
//!
//! Merged settings are written to `~/.ai-rules/cache/<agent>/<repo-hash>/`,
//! and the agent's settings file is linked to the cached artifact. Each cache
//! entry is made of two files:
//!
//! - The merged __artifact__, named like the agent's settings file.
//! - A __fingerprint__ of every source file that fed the merge.
//!
//! The repository hash keeps independent checkouts on the same machine from
//! clobbering each other's cache entries.
//!
//! # Staleness
//!
//! A cache entry is fresh when the recorded sources are exactly the sources
//! of the current merge, and none of their contents changed. Content is
//! compared by SHA-256, so edits within the timestamp granularity of the
//! file system are caught too. A differing file size marks a source as
//! changed without hashing it.
//!
//! Only an explicit rebuild writes the cache. Checking staleness never does.

use crate::{
    config::{read_optional, write_atomic, ConfigError},
    merge::Document,
    settings::format::SettingsFormat,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fs::{canonicalize, metadata, read},
    io::ErrorKind,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};
use tracing::{debug, instrument, warn};

/// File name of fingerprint inside a cache entry directory.
pub const FINGERPRINT_FILE: &str = "fingerprint.json";

/// Recorded state of one source file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SourceStamp {
    pub path: PathBuf,
    pub exists: bool,
    pub size: u64,

    /// Modification time in nanoseconds since the Unix epoch.
    pub modified: u64,

    /// Hex encoded SHA-256 of file content.
    pub sha256: String,
}

impl SourceStamp {
    /// Record current state of file.
    ///
    /// A missing file is recorded as such, not treated as an error.
    ///
    /// # Errors
    ///
    /// - Return [`CacheError::Source`] if file exists but cannot be read.
    pub fn capture(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source_error = |source| CacheError::Source {
            source,
            path: path.to_path_buf(),
        };

        let meta = match metadata(path) {
            Ok(meta) => meta,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Ok(Self {
                    path: path.to_path_buf(),
                    exists: false,
                    size: 0,
                    modified: 0,
                    sha256: String::new(),
                })
            }
            Err(error) => return Err(source_error(error)),
        };

        let content = read(path).map_err(source_error)?;
        Ok(Self {
            path: path.to_path_buf(),
            exists: true,
            size: meta.len(),
            modified: modified_nanos(&meta),
            sha256: hex_digest(&content),
        })
    }

    /// Check if file no longer matches this stamp.
    ///
    /// Unreadable files count as changed.
    pub fn is_stale(&self) -> bool {
        let meta = match metadata(&self.path) {
            Ok(meta) => meta,
            Err(_) => return self.exists,
        };

        if !self.exists || meta.len() != self.size {
            return true;
        }

        match read(&self.path) {
            Ok(content) => hex_digest(&content) != self.sha256,
            Err(_) => true,
        }
    }
}

/// Identity of every input that went into a merged artifact.
#[derive(Default, Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Fingerprint {
    /// Profile that was applied, if any.
    pub profile: Option<String>,

    /// Contributing source files in merge order.
    pub sources: Vec<SourceStamp>,
}

impl Fingerprint {
    /// Fingerprint current state of sources.
    ///
    /// # Errors
    ///
    /// - Return [`CacheError::Source`] if a source exists but cannot be read.
    pub fn compute(profile: Option<&str>, sources: &[PathBuf]) -> Result<Self> {
        Ok(Self {
            profile: profile.map(Into::into),
            sources: sources
                .iter()
                .map(SourceStamp::capture)
                .collect::<Result<Vec<_>>>()?,
        })
    }

    /// Check if fingerprint still describes the given merge inputs.
    pub fn is_current(&self, profile: Option<&str>, sources: &[PathBuf]) -> bool {
        if self.profile.as_deref() != profile {
            return false;
        }

        let recorded = self.sources.iter().map(|stamp| &stamp.path);
        if !recorded.eq(sources.iter()) {
            return false;
        }

        self.sources.iter().all(|stamp| !stamp.is_stale())
    }
}

/// Cache state of one agent's merged settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// No cache entry exists.
    Uninitialized,

    /// Cache entry matches every source.
    Fresh,

    /// Cache entry exists, but some source changed.
    Stale,
}

/// Cache entry directory of one agent and repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsCache {
    dir: PathBuf,
    artifact_name: String,
    format: SettingsFormat,
}

impl SettingsCache {
    /// Construct new settings cache handle.
    ///
    /// Nothing is touched on disk until [`Self::store`] is called.
    pub fn new(
        cache_root: impl AsRef<Path>,
        agent: &str,
        repo_hash: &str,
        artifact_name: impl Into<String>,
        format: SettingsFormat,
    ) -> Self {
        Self {
            dir: cache_root.as_ref().join(agent).join(repo_hash),
            artifact_name: artifact_name.into(),
            format,
        }
    }

    /// Directory of cache entry.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of merged artifact.
    pub fn artifact_path(&self) -> PathBuf {
        self.dir.join(&self.artifact_name)
    }

    /// Path of fingerprint.
    pub fn fingerprint_path(&self) -> PathBuf {
        self.dir.join(FINGERPRINT_FILE)
    }

    /// Load stored fingerprint.
    ///
    /// Malformed fingerprints are treated as absent.
    ///
    /// # Errors
    ///
    /// - Return [`CacheError::Io`] if fingerprint exists but cannot be read.
    pub fn load_fingerprint(&self) -> Result<Option<Fingerprint>> {
        let Some(content) = read_optional(&self.fingerprint_path())? else {
            return Ok(None);
        };

        match serde_json::from_str(&content) {
            Ok(fingerprint) => Ok(Some(fingerprint)),
            Err(error) => {
                warn!("ignore malformed fingerprint in {}: {error}", self.dir.display());
                Ok(None)
            }
        }
    }

    /// Load previously merged artifact.
    ///
    /// The artifact may have been edited by the agent itself since it was
    /// written, which is exactly what managed fields rely on. Missing or
    /// unparseable artifacts yield `None`.
    pub fn load_artifact(&self) -> Option<Document> {
        let path = self.artifact_path();
        let content = match read_optional(&path) {
            Ok(content) => content?,
            Err(error) => {
                warn!("ignore previous artifact: {error}");
                return None;
            }
        };

        match self.format.parse(&content) {
            Ok(document) => Some(document),
            Err(error) => {
                warn!("ignore malformed previous artifact {}: {error}", path.display());
                None
            }
        }
    }

    /// Determine cache state against current merge inputs.
    ///
    /// Never writes to disk.
    ///
    /// # Errors
    ///
    /// - Return [`CacheError::Io`] if fingerprint cannot be read.
    #[instrument(skip(self, sources), level = "debug")]
    pub fn state(&self, profile: Option<&str>, sources: &[PathBuf]) -> Result<CacheState> {
        let Some(fingerprint) = self.load_fingerprint()? else {
            return Ok(CacheState::Uninitialized);
        };

        if !self.artifact_path().is_file() {
            return Ok(CacheState::Uninitialized);
        }

        match fingerprint.is_current(profile, sources) {
            true => Ok(CacheState::Fresh),
            false => Ok(CacheState::Stale),
        }
    }

    /// Write merged artifact and its fingerprint.
    ///
    /// Artifact is written first, so an interrupted store leaves a stale
    /// entry behind rather than a fresh-looking one.
    ///
    /// # Errors
    ///
    /// - Return [`CacheError::Render`] if artifact cannot be rendered.
    /// - Return [`CacheError::Io`] if either file cannot be written.
    #[instrument(skip(self, artifact, fingerprint), level = "debug")]
    pub fn store(&self, artifact: &Document, fingerprint: &Fingerprint) -> Result<PathBuf> {
        let path = self.artifact_path();
        let text = self.format.render(artifact)?;
        let stamp = serde_json::to_string_pretty(fingerprint).map_err(CacheError::Encode)?;

        write_atomic(&path, text)?;
        write_atomic(self.fingerprint_path(), stamp)?;
        debug!("stored merged settings at {}", path.display());

        Ok(path)
    }
}

/// Identity of a repository checkout.
///
/// First 16 hex digits of the SHA-256 of the canonical repository root.
pub fn repo_hash(repo_root: impl AsRef<Path>) -> String {
    let root = repo_root.as_ref();
    let root = canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let mut digest = hex_digest(root.to_string_lossy().as_bytes());
    digest.truncate(16);
    digest
}

fn hex_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

fn modified_nanos(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .and_then(|elapsed| u64::try_from(elapsed.as_nanos()).ok())
        .unwrap_or_default()
}

/// Settings cache error types.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Source file cannot be read for fingerprinting.
    #[error("failed to fingerprint {:?}", path.display())]
    Source {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Artifact cannot be rendered into the agent's format.
    #[error("failed to render merged settings")]
    Render(#[from] crate::settings::format::FormatError),

    /// Fingerprint cannot be encoded.
    #[error("failed to encode fingerprint")]
    Encode(#[source] serde_json::Error),

    /// Cache files cannot be read or written.
    #[error(transparent)]
    Io(#[from] ConfigError),
}

/// Friendly result alias :3
pub type Result<T, E = CacheError> = std::result::Result<T, E>;
