// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

mod integration;

use ai_rules::path::Layout;

use anyhow::Result;
use git2::{Repository, RepositoryInitOptions};
use std::{
    fs::{canonicalize, create_dir_all, write},
    path::{Path, PathBuf},
};
use tempfile::TempDir;

/// Repository of agent files next to a fake home directory.
pub(crate) struct RepoFixture {
    _root: TempDir,
    repo: PathBuf,
    layout: Layout,
}

impl RepoFixture {
    pub(crate) fn new() -> Result<Self> {
        let root = tempfile::tempdir()?;
        let base = canonicalize(root.path())?;
        let repo = base.join("rules");
        let home = base.join("home");
        create_dir_all(&home)?;

        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        Repository::init_opts(&repo, &opts)?;

        Ok(Self {
            _root: root,
            repo,
            layout: Layout::new(home),
        })
    }

    pub(crate) fn repo(&self) -> &Path {
        &self.repo
    }

    pub(crate) fn home(&self) -> &Path {
        &self.layout.home
    }

    pub(crate) fn layout(&self) -> Layout {
        self.layout.clone()
    }

    /// Write file relative to repository, creating parents.
    pub(crate) fn with_file(self, path: impl AsRef<Path>, contents: impl AsRef<str>) -> Result<Self> {
        let path = self.repo.join(path);
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        write(path, contents.as_ref())?;

        Ok(self)
    }

    /// Write file relative to home directory, creating parents.
    pub(crate) fn with_home_file(
        self,
        path: impl AsRef<Path>,
        contents: impl AsRef<str>,
    ) -> Result<Self> {
        let path = self.layout.home.join(path);
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        write(path, contents.as_ref())?;

        Ok(self)
    }
}
