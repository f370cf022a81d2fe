// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Symlink planning and application.
//!
//! Installing an agent means linking every file it wants from the
//! repository into the home directory. This happens in two phases:
//!
//! 1. A [`LinkPlan`] is built by comparing what the agent wants against
//!    what currently sits at each target. Building a plan never touches the
//!    file system beyond reading it, so plans double as status and dry-run
//!    reports.
//! 2. The plan is applied. Regular files in the way are renamed to
//!    `<file>.backup.<YYYYmmddTHHMMSS>` before they are replaced.
//!
//! Settings links do not point into the repository. They point at the
//! merged settings artifact in the settings cache instead.

use crate::{
    agent::{AgentDefinition, LinkKind},
    exclude::ExclusionMatcher,
};

use chrono::{DateTime, Local};
use ignore::WalkBuilder;
use indicatif::ProgressBar;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_link, remove_file, rename, symlink_metadata},
    io::ErrorKind,
    os::unix::fs::symlink,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// What currently occupies a target path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetState {
    Missing,
    SymlinkTo(PathBuf),

    /// Anything that is not a symlink, directories included.
    RegularFile,
}

/// Inspect target path without following symlinks.
///
/// # Errors
///
/// - Return [`LinkError::Inspect`] if target cannot be inspected.
pub fn current_target_state(path: impl AsRef<Path>) -> Result<TargetState> {
    let path = path.as_ref();
    let inspect_error = |source| LinkError::Inspect {
        source,
        path: path.to_path_buf(),
    };

    let meta = match symlink_metadata(path) {
        Ok(meta) => meta,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(TargetState::Missing),
        Err(error) => return Err(inspect_error(error)),
    };

    if meta.file_type().is_symlink() {
        return Ok(TargetState::SymlinkTo(read_link(path).map_err(inspect_error)?));
    }

    Ok(TargetState::RegularFile)
}

/// Action needed to bring one target in line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    /// Nothing at target yet.
    Create,

    /// Target links somewhere else.
    Retarget { from: PathBuf },

    /// Regular file at target must be backed up first.
    Backup,

    /// Target already links to source.
    Unchanged,

    /// Target is excluded.
    Skip,
}

impl Display for LinkAction {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Create => write!(fmt, "create"),
            Self::Retarget { from } => write!(fmt, "retarget (was {})", from.display()),
            Self::Backup => write!(fmt, "backup and replace"),
            Self::Unchanged => write!(fmt, "unchanged"),
            Self::Skip => write!(fmt, "excluded"),
        }
    }
}

/// Single planned link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLink {
    pub source: PathBuf,
    pub target: PathBuf,
    pub action: LinkAction,
}

impl PlannedLink {
    pub fn is_pending(&self) -> bool {
        !matches!(self.action, LinkAction::Unchanged | LinkAction::Skip)
    }
}

impl Display for PlannedLink {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{} -> {} [{}]",
            self.target.display(),
            self.source.display(),
            self.action
        )
    }
}

/// Outcome of applying a plan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// Number of links created or retargeted.
    pub linked: usize,

    /// Backups made of files that were in the way.
    pub backups: Vec<PathBuf>,
}

/// Links one agent wants, with the action each one needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPlan {
    agent: &'static str,
    links: Vec<PlannedLink>,
}

impl LinkPlan {
    /// Plan links of an agent.
    ///
    /// Directory sources are walked file by file, honoring ignore files of
    /// the repository. Sources missing from the repository are left out of
    /// the plan. The settings link is only planned if `settings_artifact` is
    /// given.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::Walk`] if a directory source cannot be walked.
    /// - Return [`LinkError::Inspect`] if a target cannot be inspected.
    #[instrument(skip_all, fields(agent = agent.id), level = "debug")]
    pub fn build(
        agent: &'static AgentDefinition,
        repo_root: impl AsRef<Path>,
        home: impl AsRef<Path>,
        matcher: &ExclusionMatcher,
        settings_artifact: Option<&Path>,
    ) -> Result<Self> {
        let agent_dir = repo_root.as_ref().join(agent.id);
        let home = home.as_ref();
        let mut pairs = Vec::new();

        for wanted in agent.links {
            let source = agent_dir.join(wanted.source);
            let target = home.join(wanted.target);
            match wanted.kind {
                LinkKind::Settings(_) => match settings_artifact {
                    Some(artifact) => pairs.push((artifact.to_path_buf(), target)),
                    None => debug!("no settings to link for {}", agent.id),
                },
                LinkKind::File if source.is_file() => pairs.push((source, target)),
                LinkKind::Directory if source.is_dir() => {
                    for entry in WalkBuilder::new(&source).require_git(false).build() {
                        let entry = entry?;
                        if !entry.file_type().is_some_and(|kind| kind.is_file()) {
                            continue;
                        }

                        let relative = entry.path().strip_prefix(&source).unwrap_or(entry.path());
                        pairs.push((entry.path().to_path_buf(), target.join(relative)));
                    }
                }
                _ => debug!("skip missing source {}", source.display()),
            }
        }

        let links = pairs
            .into_iter()
            .map(|(source, target)| {
                let action = match matcher.is_excluded(&target) {
                    true => LinkAction::Skip,
                    false => match current_target_state(&target)? {
                        TargetState::Missing => LinkAction::Create,
                        TargetState::SymlinkTo(current) if current == source => LinkAction::Unchanged,
                        TargetState::SymlinkTo(current) => LinkAction::Retarget { from: current },
                        TargetState::RegularFile => LinkAction::Backup,
                    },
                };

                Ok(PlannedLink {
                    source,
                    target,
                    action,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            agent: agent.id,
            links,
        })
    }

    pub fn agent(&self) -> &'static str {
        self.agent
    }

    pub fn links(&self) -> &[PlannedLink] {
        &self.links
    }

    /// Links that apply would change.
    pub fn pending(&self) -> impl Iterator<Item = &PlannedLink> {
        self.links.iter().filter(|link| link.is_pending())
    }

    /// Perform every pending action.
    ///
    /// Stops at the first failure. Links done up to that point stay in
    /// place.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::MissingSource`] if a source vanished, so no
    ///   link ever points at nothing.
    /// - Return [`LinkError`] if any file system operation fails.
    #[instrument(skip_all, fields(agent = self.agent), level = "debug")]
    pub fn apply(&self, bar: &ProgressBar) -> Result<ApplyReport> {
        self.apply_at(Local::now(), bar)
    }

    fn apply_at(&self, now: DateTime<Local>, bar: &ProgressBar) -> Result<ApplyReport> {
        let stamp = now.format("%Y%m%dT%H%M%S").to_string();
        let mut report = ApplyReport::default();

        for link in self.pending() {
            bar.set_message(link.target.display().to_string());
            if !link.source.exists() {
                return Err(LinkError::MissingSource {
                    path: link.source.clone(),
                });
            }

            match &link.action {
                LinkAction::Retarget { .. } => {
                    remove_file(&link.target).map_err(|source| LinkError::Remove {
                        source,
                        path: link.target.clone(),
                    })?;
                }
                LinkAction::Backup => {
                    let backup = backup_path(&link.target, &stamp);
                    rename(&link.target, &backup).map_err(|source| LinkError::Backup {
                        source,
                        path: link.target.clone(),
                    })?;
                    info!("backed up {} to {}", link.target.display(), backup.display());
                    report.backups.push(backup);
                }
                _ => {}
            }

            make_link(&link.source, &link.target)?;
            report.linked += 1;
            bar.inc(1);
        }

        Ok(report)
    }

    /// Remove links that point into any of the owned roots.
    ///
    /// Targets linking elsewhere, and regular files, are left alone.
    /// Returns number of removed links.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError`] if a target cannot be inspected or removed.
    #[instrument(skip_all, fields(agent = self.agent), level = "debug")]
    pub fn unlink(&self, owned_roots: &[&Path]) -> Result<usize> {
        let mut removed = 0;
        for link in &self.links {
            let TargetState::SymlinkTo(current) = current_target_state(&link.target)? else {
                continue;
            };

            if !owned_roots.iter().any(|root| current.starts_with(root)) {
                debug!("leave foreign link {}", link.target.display());
                continue;
            }

            remove_file(&link.target).map_err(|source| LinkError::Remove {
                source,
                path: link.target.clone(),
            })?;
            removed += 1;
        }

        Ok(removed)
    }
}

/// Pick backup path for target that no earlier backup occupies.
///
/// Backups made within the same second get a numeric suffix.
fn backup_path(target: &Path, stamp: &str) -> PathBuf {
    let name = target.file_name().unwrap_or_default();
    let mut count = 0;
    loop {
        let mut backup = name.to_os_string();
        match count {
            0 => backup.push(format!(".backup.{stamp}")),
            _ => backup.push(format!(".backup.{stamp}.{count}")),
        }

        let backup = target.with_file_name(backup);
        match current_target_state(&backup) {
            Ok(TargetState::Missing) | Err(_) => return backup,
            Ok(_) => count += 1,
        }
    }
}

fn make_link(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        mkdirp::mkdirp(parent).map_err(|error| LinkError::CreateDir {
            source: error,
            path: parent.to_path_buf(),
        })?;
    }

    symlink(source, target).map_err(|error| LinkError::Symlink {
        source: error,
        target: target.to_path_buf(),
    })?;
    debug!("linked {} -> {}", target.display(), source.display());

    Ok(())
}

/// Symlink error types.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("failed to inspect {:?}", path.display())]
    Inspect {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("refusing to link to missing source {:?}", path.display())]
    MissingSource { path: PathBuf },

    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("failed to back up {:?}", path.display())]
    Backup {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("failed to remove {:?}", path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("failed to create symlink at {:?}", target.display())]
    Symlink {
        #[source]
        source: std::io::Error,
        target: PathBuf,
    },

    #[error(transparent)]
    Walk(#[from] ignore::Error),
}

/// Friendly result alias :3
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, read_to_string, write};

    struct Fixture {
        _dir: tempfile::TempDir,
        repo: PathBuf,
        home: PathBuf,
    }

    fn fixture() -> anyhow::Result<Fixture> {
        let dir = tempfile::tempdir()?;
        let repo = dir.path().join("repo");
        let home = dir.path().join("home");
        create_dir_all(repo.join("claude/commands/nested"))?;
        create_dir_all(&home)?;
        write(repo.join("claude/CLAUDE.md"), "rules")?;
        write(repo.join("claude/commands/review.md"), "review")?;
        write(repo.join("claude/commands/nested/deep.md"), "deep")?;

        Ok(Fixture {
            _dir: dir,
            repo,
            home,
        })
    }

    fn actions(plan: &LinkPlan) -> Vec<(String, LinkAction)> {
        plan.links()
            .iter()
            .map(|link| {
                let target = link.target.to_string_lossy().into_owned();
                (target, link.action.clone())
            })
            .collect()
    }

    #[test]
    fn plan_walks_directories() -> anyhow::Result<()> {
        let fx = fixture()?;
        let claude = agent::find("claude").unwrap();
        let plan = LinkPlan::build(claude, &fx.repo, &fx.home, &ExclusionMatcher::default(), None)?;

        let mut targets = plan
            .links()
            .iter()
            .map(|link| link.target.strip_prefix(&fx.home).unwrap().to_path_buf())
            .collect::<Vec<_>>();
        targets.sort();
        let expect: Vec<PathBuf> = vec![
            ".claude/CLAUDE.md".into(),
            ".claude/commands/nested/deep.md".into(),
            ".claude/commands/review.md".into(),
        ];
        assert_eq!(targets, expect);
        assert!(plan.links().iter().all(|link| link.action == LinkAction::Create));

        Ok(())
    }

    #[test]
    fn plan_detects_target_states() -> anyhow::Result<()> {
        let fx = fixture()?;
        let claude = agent::find("claude").unwrap();
        create_dir_all(fx.home.join(".claude/commands"))?;
        write(fx.home.join(".claude/CLAUDE.md"), "mine")?;
        symlink(fx.repo.join("claude/commands/review.md"), fx.home.join(".claude/commands/review.md"))?;
        create_dir_all(fx.home.join(".claude/commands/nested"))?;
        symlink("/elsewhere", fx.home.join(".claude/commands/nested/deep.md"))?;

        let matcher = ExclusionMatcher::default();
        let plan = LinkPlan::build(claude, &fx.repo, &fx.home, &matcher, None)?;
        let mut result = actions(&plan);
        result.sort_by(|a, b| a.0.cmp(&b.0));
        let home = fx.home.to_string_lossy();
        let expect = vec![
            (format!("{home}/.claude/CLAUDE.md"), LinkAction::Backup),
            (
                format!("{home}/.claude/commands/nested/deep.md"),
                LinkAction::Retarget {
                    from: "/elsewhere".into(),
                },
            ),
            (format!("{home}/.claude/commands/review.md"), LinkAction::Unchanged),
        ];
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn plan_skips_excluded_targets() -> anyhow::Result<()> {
        let fx = fixture()?;
        let claude = agent::find("claude").unwrap();
        let matcher = ExclusionMatcher::new(&fx.home, ["~/.claude/commands/**"], Vec::<String>::new())?;
        let plan = LinkPlan::build(claude, &fx.repo, &fx.home, &matcher, None)?;

        assert_eq!(plan.pending().count(), 1);
        assert_eq!(plan.links().iter().filter(|link| link.action == LinkAction::Skip).count(), 2);

        Ok(())
    }

    #[test]
    fn apply_backs_up_and_links() -> anyhow::Result<()> {
        let fx = fixture()?;
        let claude = agent::find("claude").unwrap();
        create_dir_all(fx.home.join(".claude"))?;
        write(fx.home.join(".claude/CLAUDE.md"), "mine")?;

        let matcher = ExclusionMatcher::default();
        let plan = LinkPlan::build(claude, &fx.repo, &fx.home, &matcher, None)?;
        let now = Local.with_ymd_and_hms(2025, 3, 1, 12, 30, 5).unwrap();
        let report = plan.apply_at(now, &ProgressBar::hidden())?;

        assert_eq!(report.linked, 3);
        let backup = fx.home.join(".claude/CLAUDE.md.backup.20250301T123005");
        assert_eq!(report.backups, vec![backup.clone()]);
        assert_eq!(read_to_string(backup)?, "mine");
        assert_eq!(
            current_target_state(fx.home.join(".claude/CLAUDE.md"))?,
            TargetState::SymlinkTo(fx.repo.join("claude/CLAUDE.md"))
        );

        let again = LinkPlan::build(claude, &fx.repo, &fx.home, &matcher, None)?;
        assert_eq!(again.pending().count(), 0);

        Ok(())
    }

    #[test]
    fn backups_within_same_second_are_kept() -> anyhow::Result<()> {
        let fx = fixture()?;
        let claude = agent::find("claude").unwrap();
        let matcher = ExclusionMatcher::default();
        let now = Local.with_ymd_and_hms(2025, 3, 1, 12, 30, 5).unwrap();
        let target = fx.home.join(".claude/CLAUDE.md");
        create_dir_all(fx.home.join(".claude"))?;

        write(&target, "first")?;
        LinkPlan::build(claude, &fx.repo, &fx.home, &matcher, None)?
            .apply_at(now, &ProgressBar::hidden())?;

        remove_file(&target)?;
        write(&target, "second")?;
        let report = LinkPlan::build(claude, &fx.repo, &fx.home, &matcher, None)?
            .apply_at(now, &ProgressBar::hidden())?;

        let second = fx.home.join(".claude/CLAUDE.md.backup.20250301T123005.1");
        assert_eq!(report.backups, vec![second.clone()]);
        assert_eq!(read_to_string(second)?, "second");
        assert_eq!(
            read_to_string(fx.home.join(".claude/CLAUDE.md.backup.20250301T123005"))?,
            "first"
        );

        Ok(())
    }

    #[test]
    fn apply_refuses_missing_source() -> anyhow::Result<()> {
        let fx = fixture()?;
        let claude = agent::find("claude").unwrap();
        let artifact = fx.home.join("cache/settings.json");
        let matcher = ExclusionMatcher::default();
        let plan = LinkPlan::build(claude, &fx.repo, &fx.home, &matcher, Some(&artifact))?;

        let result = plan.apply(&ProgressBar::hidden());
        assert!(matches!(result, Err(LinkError::MissingSource { .. })));
        assert_eq!(
            current_target_state(fx.home.join(".claude/settings.json"))?,
            TargetState::Missing
        );

        Ok(())
    }

    #[test]
    fn unlink_only_removes_owned_links() -> anyhow::Result<()> {
        let fx = fixture()?;
        let claude = agent::find("claude").unwrap();
        let matcher = ExclusionMatcher::default();
        LinkPlan::build(claude, &fx.repo, &fx.home, &matcher, None)?.apply(&ProgressBar::hidden())?;

        let foreign = fx.home.join(".claude/commands/review.md");
        remove_file(&foreign)?;
        symlink("/elsewhere", &foreign)?;

        let plan = LinkPlan::build(claude, &fx.repo, &fx.home, &matcher, None)?;
        assert_eq!(plan.unlink(&[fx.repo.as_path()])?, 2);
        assert_eq!(current_target_state(&foreign)?, TargetState::SymlinkTo("/elsewhere".into()));
        assert_eq!(
            current_target_state(fx.home.join(".claude/CLAUDE.md"))?,
            TargetState::Missing
        );

        Ok(())
    }
}
