// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Workspace of one repository checkout.
//!
//! A __workspace__ binds a repository holding agent files to the home
//! directory those files get linked into. Opening a workspace loads every
//! input that is shared between agents once:
//!
//! - User configuration, leniently.
//! - Project configuration, leniently.
//! - Session state, and through it the active profile.
//! - Exclusion patterns of both configurations.
//!
//! Each agent is then handled on its own. Batch operations report one
//! outcome per agent, so one broken agent never blocks the others.
//!
//! # Repository Layout
//!
//! ```text
//! <repo>/ai-rules-project.yaml        project configuration
//! <repo>/config/profiles/<name>.yaml  built-in profiles
//! <repo>/<agent>/...                  agent files, see [`crate::agent`]
//! ```

use crate::{
    agent::AgentDefinition,
    config::{ProjectConfig, UserConfig},
    exclude::{ExcludeError, ExclusionMatcher},
    link::{ApplyReport, LinkError, LinkPlan},
    merge::Document,
    path::{builtin_profiles_dir, Layout},
    profile::{resolve, ProfileDirs, ResolveError, ResolvedProfile},
    settings::{
        build, cache::CacheState, changes, Layers, SettingChange, SettingsEngine, SettingsError,
    },
    state::SessionContext,
};

use indicatif::ProgressBar;
use serde_json::{Map, Value};
use std::{
    fs::canonicalize,
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};

/// Result of one agent within a batch operation.
#[derive(Debug)]
pub struct AgentOutcome<T> {
    pub agent: &'static str,
    pub result: Result<T>,
}

/// Read-only status of one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentStatus {
    pub agent: &'static str,

    /// Cache state of merged settings, if agent has base settings.
    pub cache: Option<CacheState>,

    pub plan: LinkPlan,
}

/// Repository checkout bound to a home directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    repo_root: PathBuf,
    layout: Layout,
    user: UserConfig,
    warnings: Vec<String>,
    session: SessionContext,
    profile: Option<ResolvedProfile>,
    matcher: ExclusionMatcher,
}

impl Workspace {
    /// Open workspace.
    ///
    /// The profile to apply is `profile` if given, or else the active
    /// profile of the session state. The repository root is made absolute,
    /// since symlinks resolve relative paths from their own directory.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::Repo`] if repository root cannot be resolved.
    /// - Return [`WorkspaceError::Resolve`] if profile cannot be resolved.
    /// - Return [`WorkspaceError::Exclude`] if an exclusion pattern is invalid.
    #[instrument(skip(repo_root, layout), level = "debug")]
    pub fn open(
        repo_root: impl Into<PathBuf>,
        layout: Layout,
        profile: Option<&str>,
    ) -> Result<Self> {
        let repo_root = repo_root.into();
        let repo_root = canonicalize(&repo_root).map_err(|source| WorkspaceError::Repo {
            source,
            path: repo_root.clone(),
        })?;
        let (user, warnings) = UserConfig::load_lenient(&layout.user_config);
        let project = ProjectConfig::load_lenient(&repo_root);
        let session = SessionContext::load(&layout.state);

        let name = profile.map(Into::into).or_else(|| session.active_profile.clone());
        let profile = match name {
            Some(name) => {
                let dirs = ProfileDirs::new(&layout.user_profiles, builtin_profiles_dir(&repo_root));
                Some(resolve(&name, &dirs)?)
            }
            None => None,
        };

        let matcher = ExclusionMatcher::new(
            &layout.home,
            &user.exclude_symlinks,
            &project.exclude_symlinks,
        )?;

        Ok(Self {
            repo_root,
            layout,
            user,
            warnings,
            session,
            profile,
            matcher,
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Profile applied to every agent, if any.
    pub fn profile(&self) -> Option<&ResolvedProfile> {
        self.profile.as_ref()
    }

    /// Pieces of user configuration that were dropped while loading.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn layers(&self) -> Layers<'_> {
        Layers {
            user: &self.user,
            user_path: &self.layout.user_config,
            profile: self.profile.as_ref(),
        }
    }

    /// Settings engine of agent.
    ///
    /// Returns `None` if agent keeps no settings file, or the repository has
    /// no base settings for it.
    pub fn engine(&self, agent: &'static AgentDefinition) -> Option<SettingsEngine<'_>> {
        let engine = SettingsEngine::new(agent, &self.repo_root, &self.layout.cache, self.layers())?;
        engine.base_path().is_file().then_some(engine)
    }

    /// Plan links of agent without changing anything.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::Link`] if plan cannot be built.
    pub fn plan(&self, agent: &'static AgentDefinition) -> Result<LinkPlan> {
        let artifact = self.engine(agent).map(|engine| engine.cache().artifact_path());
        Ok(LinkPlan::build(
            agent,
            &self.repo_root,
            &self.layout.home,
            &self.matcher,
            artifact.as_deref(),
        )?)
    }

    /// Read-only status of agent.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError`] if cache or targets cannot be inspected.
    pub fn status(&self, agent: &'static AgentDefinition) -> Result<AgentStatus> {
        let cache = self.engine(agent).map(|engine| engine.state()).transpose()?;
        Ok(AgentStatus {
            agent: agent.id,
            cache,
            plan: self.plan(agent)?,
        })
    }

    /// Merged settings of agent as an install would produce them.
    ///
    /// Computed in memory, nothing is written.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NoSettings`] if agent has no base settings.
    /// - Return [`WorkspaceError::Settings`] if merge fails.
    pub fn merged(&self, agent: &'static AgentDefinition) -> Result<Document> {
        let engine = self
            .engine(agent)
            .ok_or_else(|| WorkspaceError::NoSettings { agent: agent.id })?;
        Ok(engine.preview()?)
    }

    /// Document user overrides of agent are merged onto.
    ///
    /// This is the base settings with the profile layer applied.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NoSettings`] if agent has no base settings.
    /// - Return [`WorkspaceError::Settings`] if base settings cannot be loaded.
    pub fn reference(&self, agent: &'static AgentDefinition) -> Result<Document> {
        let engine = self
            .engine(agent)
            .ok_or_else(|| WorkspaceError::NoSettings { agent: agent.id })?;
        let inputs = engine.inputs()?;
        Ok(build(&inputs.base, inputs.profile.as_ref(), None, None, &[]))
    }

    /// Settings changes an install would make over the cached artifact.
    ///
    /// Agents without base settings have no changes.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::Settings`] if merge fails.
    pub fn diff(&self, agent: &'static AgentDefinition) -> Result<Vec<SettingChange>> {
        let Some(engine) = self.engine(agent) else {
            return Ok(Vec::new());
        };

        let before = engine
            .cache()
            .load_artifact()
            .unwrap_or_else(|| Value::Object(Map::new()));
        Ok(changes(&before, &engine.preview()?))
    }

    /// Rebuild merged settings, then link every file of agent.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError`] if settings cannot be rebuilt, or links
    ///   cannot be made. Nothing links to settings that failed to rebuild.
    #[instrument(skip_all, fields(agent = agent.id), level = "debug")]
    pub fn install_agent(
        &self,
        agent: &'static AgentDefinition,
        bar: &ProgressBar,
    ) -> Result<ApplyReport> {
        let artifact = match self.engine(agent) {
            Some(engine) => Some(engine.rebuild()?),
            None => None,
        };

        let plan = LinkPlan::build(
            agent,
            &self.repo_root,
            &self.layout.home,
            &self.matcher,
            artifact.as_deref(),
        )?;
        let report = plan.apply(bar)?;
        info!("installed {} with {} new links", agent.id, report.linked);

        Ok(report)
    }

    /// Install every given agent, continuing past failures.
    pub fn install(
        &self,
        agents: &[&'static AgentDefinition],
        bar: &ProgressBar,
    ) -> Vec<AgentOutcome<ApplyReport>> {
        batch(agents, |agent| self.install_agent(agent, bar))
    }

    /// Remove links of agent that point into the repository or the cache.
    ///
    /// Returns number of removed links.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::Link`] if a link cannot be removed.
    pub fn uninstall_agent(&self, agent: &'static AgentDefinition) -> Result<usize> {
        let plan = self.plan(agent)?;
        let removed = plan.unlink(&[self.repo_root.as_path(), self.layout.cache.as_path()])?;
        info!("uninstalled {} by removing {removed} links", agent.id);

        Ok(removed)
    }

    /// Uninstall every given agent, continuing past failures.
    pub fn uninstall(&self, agents: &[&'static AgentDefinition]) -> Vec<AgentOutcome<usize>> {
        batch(agents, |agent| self.uninstall_agent(agent))
    }

    /// Rebuild merged settings of every given agent, continuing past failures.
    pub fn rebuild(&self, agents: &[&'static AgentDefinition]) -> Vec<AgentOutcome<Option<PathBuf>>> {
        batch(agents, |agent| match self.engine(agent) {
            Some(engine) => Ok(Some(engine.rebuild()?)),
            None => Ok(None),
        })
    }
}

fn batch<T>(
    agents: &[&'static AgentDefinition],
    mut run: impl FnMut(&'static AgentDefinition) -> Result<T>,
) -> Vec<AgentOutcome<T>> {
    agents
        .iter()
        .map(|&agent| {
            let result = run(agent);
            if let Err(error) = &result {
                warn!("{}: {error}", agent.id);
            }

            AgentOutcome {
                agent: agent.id,
                result,
            }
        })
        .collect()
}

/// Workspace error types.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// Repository root does not exist or cannot be resolved.
    #[error("failed to resolve repository root {:?}", path.display())]
    Repo {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Agent has no base settings to merge.
    #[error("{agent} has no base settings in repository")]
    NoSettings { agent: &'static str },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Exclude(#[from] ExcludeError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Friendly result alias :3
pub type Result<T, E = WorkspaceError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{agent, link::TargetState};
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{
        env::current_dir,
        fs::{create_dir_all, metadata, read_to_string, write},
    };

    fn repo_with_claude(root: &Path) -> anyhow::Result<()> {
        create_dir_all(root.join("claude/commands"))?;
        write(root.join("claude/settings.json"), r#"{"model": "a"}"#)?;
        write(root.join("claude/CLAUDE.md"), "rules")?;
        write(root.join("claude/commands/review.md"), "review")?;
        Ok(())
    }

    #[test]
    fn status_never_writes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let repo = dir.path().join("repo");
        repo_with_claude(&repo)?;
        let layout = Layout::new(dir.path().join("home"));
        let workspace = Workspace::open(&repo, layout.clone(), None)?;

        let claude = agent::find("claude").unwrap();
        let status = workspace.status(claude)?;
        assert_eq!(status.cache, Some(CacheState::Uninitialized));
        assert_eq!(status.plan.pending().count(), 3);
        assert_eq!(workspace.merged(claude)?, serde_json::json!({"model": "a"}));
        assert_eq!(workspace.diff(claude)?.len(), 1);
        assert!(!layout.state_dir.exists());
        assert!(!layout.home.exists());

        Ok(())
    }

    #[test]
    fn install_links_settings_to_cache() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let repo = dir.path().join("repo");
        repo_with_claude(&repo)?;
        let layout = Layout::new(dir.path().join("home"));
        let workspace = Workspace::open(&repo, layout.clone(), None)?;

        let claude = agent::find("claude").unwrap();
        let report = workspace.install_agent(claude, &ProgressBar::hidden())?;
        assert_eq!(report.linked, 3);

        let TargetState::SymlinkTo(settings) =
            crate::link::current_target_state(layout.home.join(".claude/settings.json"))?
        else {
            panic!("settings are not linked");
        };
        assert!(settings.starts_with(&layout.cache));
        assert_eq!(workspace.status(claude)?.cache, Some(CacheState::Fresh));
        assert!(workspace.diff(claude)?.is_empty());

        assert_eq!(workspace.uninstall_agent(claude)?, 3);
        assert_eq!(workspace.status(claude)?.plan.pending().count(), 3);

        Ok(())
    }

    #[sealed_test]
    fn relative_repo_root_links_resolve() -> anyhow::Result<()> {
        repo_with_claude(Path::new("rules"))?;
        let layout = Layout::new(current_dir()?.join("home"));
        let workspace = Workspace::open("rules", layout.clone(), None)?;
        assert!(workspace.repo_root().is_absolute());

        let claude = agent::find("claude").unwrap();
        workspace.install_agent(claude, &ProgressBar::hidden())?;

        let target = layout.home.join(".claude/CLAUDE.md");
        assert_eq!(
            crate::link::current_target_state(&target)?,
            TargetState::SymlinkTo(canonicalize("rules")?.join("claude/CLAUDE.md"))
        );
        assert!(metadata(&target)?.is_file());
        assert_eq!(read_to_string(&target)?, "rules");
        assert_eq!(workspace.uninstall_agent(claude)?, 3);

        Ok(())
    }

    #[test]
    fn missing_repo_root_fails_open() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = Layout::new(dir.path().join("home"));
        let result = Workspace::open(dir.path().join("nope"), layout, None);
        assert!(matches!(result, Err(WorkspaceError::Repo { .. })));

        Ok(())
    }

    #[test]
    fn missing_profile_fails_open() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = Layout::new(dir.path().join("home"));
        let result = Workspace::open(dir.path(), layout, Some("nope"));
        assert!(matches!(
            result,
            Err(WorkspaceError::Resolve(ResolveError::NotFound { .. }))
        ));

        Ok(())
    }
}
