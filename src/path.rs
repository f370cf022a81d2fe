// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.
//!
//! # Layout
//!
//! ```text
//! ~/.ai-rules-config.yaml                  user configuration
//! ~/.ai-rules/state.yaml                   active profile, last install
//! ~/.ai-rules/profiles/<name>.yaml         user profiles
//! ~/.ai-rules/cache/<agent>/<repo-hash>/   merged settings cache
//! ```

use git2::Repository;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Absolute paths of every file ai-rules keeps outside the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub home: PathBuf,
    pub user_config: PathBuf,
    pub state_dir: PathBuf,
    pub state: PathBuf,
    pub cache: PathBuf,
    pub user_profiles: PathBuf,
}

impl Layout {
    /// Construct layout rooted at given home directory.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let state_dir = home.join(".ai-rules");
        Self {
            user_config: home.join(".ai-rules-config.yaml"),
            state: state_dir.join("state.yaml"),
            cache: state_dir.join("cache"),
            user_profiles: state_dir.join("profiles"),
            state_dir,
            home,
        }
    }

    /// Construct layout rooted at user's home directory.
    ///
    /// # Errors
    ///
    /// - Return [`NoWayHome`] if home directory path cannot be determined.
    pub fn discover() -> Result<Self> {
        home_dir().map(Self::new)
    }
}

/// Determine absolute path to user configuration file.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn user_config_path() -> Result<PathBuf> {
    Layout::discover().map(|layout| layout.user_config)
}

/// Determine absolute path to state file.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn state_path() -> Result<PathBuf> {
    Layout::discover().map(|layout| layout.state)
}

/// Determine absolute path to merged settings cache directory.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn cache_dir() -> Result<PathBuf> {
    Layout::discover().map(|layout| layout.cache)
}

/// Determine absolute path to user profile directory.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn user_profiles_dir() -> Result<PathBuf> {
    Layout::discover().map(|layout| layout.user_profiles)
}

/// Determine repository of agent files from a starting directory.
///
/// Walks up from `start` to the work tree of the enclosing git repository.
/// Falls back to `start` itself if it is not inside a git repository, or
/// the repository is bare.
pub fn discover_repo_root(start: impl AsRef<Path>) -> PathBuf {
    let start = start.as_ref();
    match Repository::discover(start) {
        Ok(repo) => match repo.workdir() {
            Some(workdir) => workdir.to_path_buf(),
            None => start.to_path_buf(),
        },
        Err(error) => {
            debug!("no git repository above {}: {}", start.display(), error.message());
            start.to_path_buf()
        }
    }
}

/// Determine path of built-in profile directory inside repository.
pub fn builtin_profiles_dir(repo_root: impl AsRef<Path>) -> PathBuf {
    repo_root.as_ref().join("config").join("profiles")
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("HOME", "/home/blah")])]
    fn layout_follows_home() -> anyhow::Result<()> {
        assert_eq!(user_config_path()?, PathBuf::from("/home/blah/.ai-rules-config.yaml"));
        assert_eq!(state_path()?, PathBuf::from("/home/blah/.ai-rules/state.yaml"));
        assert_eq!(cache_dir()?, PathBuf::from("/home/blah/.ai-rules/cache"));
        assert_eq!(user_profiles_dir()?, PathBuf::from("/home/blah/.ai-rules/profiles"));
        assert_eq!(Layout::discover()?, Layout::new("/home/blah"));

        Ok(())
    }
}
