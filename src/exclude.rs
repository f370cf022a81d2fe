// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Symlink exclusion patterns.
//!
//! Users can keep ai-rules from linking certain targets through the
//! `exclude_symlinks` list of their user configuration, and repositories
//! can do the same through their project configuration. Both lists are
//! additive: a target is excluded if it matches a pattern from __either__
//! list.
//!
//! # Pattern Syntax
//!
//! - `*` matches any run of characters within one path component.
//! - `**` as a whole component matches any number of components.
//! - `~` and `$VAR` are expanded before matching.
//! - Relative patterns are anchored at the home directory, so
//!   `.claude/agents/*` is the same as `~/.claude/agents/*`.
//! - A pattern matching a directory excludes everything below it, so
//!   `~/.claude/commands` is the same as `~/.claude/commands/**`.

use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use tracing::debug;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiled exclusion pattern with the text it came from.
#[derive(Debug, Clone)]
struct Exclusion {
    source: String,
    pattern: Pattern,
}

/// Match symlink targets against global and project exclusion patterns.
#[derive(Debug, Clone, Default)]
pub struct ExclusionMatcher {
    global: Vec<Exclusion>,
    project: Vec<Exclusion>,
}

impl ExclusionMatcher {
    /// Compile global and project exclusion patterns.
    ///
    /// # Errors
    ///
    /// - Return [`ExcludeError::Expand`] if a pattern names an unset variable.
    /// - Return [`ExcludeError::Pattern`] if a pattern is not a valid glob.
    pub fn new<G, P>(home: impl AsRef<Path>, global: G, project: P) -> Result<Self>
    where
        G: IntoIterator,
        G::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let home = home.as_ref();
        Ok(Self {
            global: compile(home, global)?,
            project: compile(home, project)?,
        })
    }

    /// Check if target, or any directory containing it, is excluded by any
    /// pattern.
    pub fn is_excluded(&self, target: impl AsRef<Path>) -> bool {
        let target = target.as_ref();
        let hit = target.ancestors().find_map(|path| {
            self.global
                .iter()
                .chain(self.project.iter())
                .find(|exclusion| exclusion.pattern.matches_path_with(path, MATCH_OPTIONS))
        });

        match hit {
            Some(exclusion) => {
                debug!("exclude {} by {:?}", target.display(), exclusion.source);
                true
            }
            None => false,
        }
    }
}

/// Check target against global and project patterns in one go.
///
/// Target is tilde expanded like the patterns are.
///
/// # Errors
///
/// - Return [`ExcludeError`] if a pattern cannot be compiled.
pub fn is_excluded(
    home: impl AsRef<Path>,
    target: &str,
    global: &[String],
    project: &[String],
) -> Result<bool> {
    let home = home.as_ref();
    let target = anchor(home, target)?;
    Ok(ExclusionMatcher::new(home, global, project)?.is_excluded(target))
}

fn compile<I>(home: &Path, patterns: I) -> Result<Vec<Exclusion>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|source| {
            let source = source.as_ref();
            let anchored = anchor(home, source)?;
            let pattern = Pattern::new(&anchored.to_string_lossy()).map_err(|error| {
                ExcludeError::Pattern {
                    source: error,
                    pattern: source.to_string(),
                }
            })?;

            Ok(Exclusion {
                source: source.to_string(),
                pattern,
            })
        })
        .collect()
}

fn anchor(home: &Path, text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full_with_context(
        text,
        || home.to_str(),
        |var| std::env::var(var).map(Some),
    )
    .map_err(|error| ExcludeError::Expand {
        source: error,
        pattern: text.to_string(),
    })?;

    let path = PathBuf::from(expanded.as_ref());
    match path.is_absolute() {
        true => Ok(path),
        false => Ok(home.join(path)),
    }
}

/// Exclusion pattern error types.
#[derive(Debug, thiserror::Error)]
pub enum ExcludeError {
    /// Pattern refers to something that cannot be expanded.
    #[error("failed to expand exclusion pattern {pattern:?}")]
    Expand {
        #[source]
        source: shellexpand::LookupError<std::env::VarError>,
        pattern: String,
    },

    /// Pattern is not a valid glob.
    #[error("invalid exclusion pattern {pattern:?}")]
    Pattern {
        #[source]
        source: glob::PatternError,
        pattern: String,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ExcludeError> = std::result::Result<T, E>;
