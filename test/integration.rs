// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::RepoFixture;

use ai_rules::{
    agent,
    link::{current_target_state, LinkAction, TargetState},
    path::discover_repo_root,
    settings::cache::CacheState,
    workspace::Workspace,
};

use anyhow::Result;
use indicatif::ProgressBar;
use indoc::indoc;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs::{read_dir, read_to_string, write};

fn claude_repo() -> Result<RepoFixture> {
    RepoFixture::new()?
        .with_file("claude/settings.json", r#"{"model": "a", "hooks": {"Stop": []}}"#)?
        .with_file("claude/CLAUDE.md", "Be nice.")?
        .with_file("claude/commands/review.md", "Review this.")?
        .with_file("claude/commands/git/commit.md", "Commit this.")
}

#[test]
fn install_then_status_is_fresh() -> Result<()> {
    let fx = claude_repo()?
        .with_file("codex/config.toml", "model = \"o3\"\napproval_policy = \"never\"\n")?
        .with_file("codex/AGENTS.md", "Be brief.")?;
    let workspace = Workspace::open(fx.repo(), fx.layout(), None)?;
    let agents = agent::select(&[])?;

    let outcomes = workspace.install(&agents, &ProgressBar::hidden());
    assert!(outcomes.iter().all(|outcome| outcome.result.is_ok()));

    let claude = agent::find("claude").unwrap();
    let codex = agent::find("codex").unwrap();
    for agent in [claude, codex] {
        let status = workspace.status(agent)?;
        assert_eq!(status.cache, Some(CacheState::Fresh));
        assert_eq!(status.plan.pending().count(), 0);
    }

    assert_eq!(
        current_target_state(fx.home().join(".claude/commands/git/commit.md"))?,
        TargetState::SymlinkTo(fx.repo().join("claude/commands/git/commit.md"))
    );
    let config = read_to_string(fx.home().join(".codex/config.toml"))?;
    assert!(config.contains("model = \"o3\""));

    let gemini = agent::find("gemini").unwrap();
    assert_eq!(workspace.status(gemini)?.cache, None);

    Ok(())
}

#[test]
fn managed_fields_survive_rebuild() -> Result<()> {
    let fx = claude_repo()?;
    let claude = agent::find("claude").unwrap();
    let workspace = Workspace::open(fx.repo(), fx.layout(), None)?;
    workspace.install_agent(claude, &ProgressBar::hidden())?;

    // Agent writes through the link into the cached artifact.
    let live = fx.home().join(".claude/settings.json");
    write(&live, r#"{"model": "a", "hooks": {"Stop": []}, "enabledPlugins": {"lint@market": true}}"#)?;
    assert_eq!(workspace.status(claude)?.cache, Some(CacheState::Fresh));

    write(fx.repo().join("claude/settings.json"), r#"{"model": "b", "hooks": {"Stop": []}}"#)?;
    assert_eq!(workspace.status(claude)?.cache, Some(CacheState::Stale));

    let report = workspace.install_agent(claude, &ProgressBar::hidden())?;
    assert_eq!(report.linked, 0);
    assert_eq!(workspace.status(claude)?.cache, Some(CacheState::Fresh));

    let merged: serde_json::Value = serde_json::from_str(&read_to_string(&live)?)?;
    assert_eq!(
        merged,
        json!({"model": "b", "hooks": {"Stop": []}, "enabledPlugins": {"lint@market": true}})
    );

    Ok(())
}

#[test]
fn broken_agent_does_not_block_others() -> Result<()> {
    let fx = RepoFixture::new()?
        .with_file("claude/settings.json", "{ \"model\": ")?
        .with_file("claude/CLAUDE.md", "Be nice.")?
        .with_file("codex/config.toml", "model = \"o3\"\n")?
        .with_file("codex/AGENTS.md", "Be brief.")?;
    let workspace = Workspace::open(fx.repo(), fx.layout(), None)?;
    let outcomes = workspace.install(&agent::select(&[])?, &ProgressBar::hidden());

    let failed = outcomes
        .iter()
        .filter(|outcome| outcome.result.is_err())
        .map(|outcome| outcome.agent)
        .collect::<Vec<_>>();
    assert_eq!(failed, vec!["claude"]);

    assert_eq!(
        current_target_state(fx.home().join(".claude/settings.json"))?,
        TargetState::Missing
    );
    assert!(matches!(
        current_target_state(fx.home().join(".codex/AGENTS.md"))?,
        TargetState::SymlinkTo(_)
    ));

    Ok(())
}

#[test]
fn profile_and_user_layers_apply_in_order() -> Result<()> {
    let fx = RepoFixture::new()?
        .with_file("claude/settings.json", r#"{"model": "a", "theme": "dark", "level": 0}"#)?
        .with_file(
            "config/profiles/base.yaml",
            indoc! {r#"
                name: base
                description: Shared defaults
                settings_overrides:
                  claude:
                    model: b
                    level: 1
            "#},
        )?
        .with_file(
            "config/profiles/work.yaml",
            indoc! {r#"
                name: work
                description: Day job
                extends: base
                settings_overrides:
                  claude:
                    model: c
            "#},
        )?;
    let layout = fx.layout();
    write(
        &layout.user_config,
        indoc! {r#"
            version: 1
            settings_overrides:
              claude:
                theme: light
        "#},
    )?;

    let claude = agent::find("claude").unwrap();
    let workspace = Workspace::open(fx.repo(), fx.layout(), Some("work"))?;
    let chain = workspace.profile().map(|profile| profile.chain.clone());
    assert_eq!(chain, Some(vec!["base".to_string(), "work".to_string()]));
    assert_eq!(
        workspace.merged(claude)?,
        json!({"model": "c", "theme": "light", "level": 1})
    );
    workspace.install_agent(claude, &ProgressBar::hidden())?;
    assert_eq!(workspace.status(claude)?.cache, Some(CacheState::Fresh));

    // Same cache, different profile.
    let plain = Workspace::open(fx.repo(), fx.layout(), None)?;
    assert_eq!(plain.status(claude)?.cache, Some(CacheState::Stale));
    assert_eq!(plain.merged(claude)?, json!({"model": "a", "theme": "light", "level": 0}));

    // Editing a profile in the chain is a change too.
    write(
        fx.repo().join("config/profiles/base.yaml"),
        "name: base\nsettings_overrides:\n  claude:\n    level: 2\n",
    )?;
    assert_eq!(workspace.status(claude)?.cache, Some(CacheState::Stale));

    Ok(())
}

#[test]
fn global_and_project_exclusions_add_up() -> Result<()> {
    let fx = claude_repo()?
        .with_file("codex/AGENTS.md", "Be brief.")?
        .with_file("ai-rules-project.yaml", "exclude_symlinks:\n  - ~/.claude/commands/**\n")?;
    write(&fx.layout().user_config, "exclude_symlinks:\n  - .codex/AGENTS.md\n")?;

    let workspace = Workspace::open(fx.repo(), fx.layout(), None)?;
    let claude = workspace.plan(agent::find("claude").unwrap())?;
    let codex = workspace.plan(agent::find("codex").unwrap())?;

    let skipped = claude
        .links()
        .iter()
        .chain(codex.links())
        .filter(|link| link.action == LinkAction::Skip)
        .count();
    assert_eq!(skipped, 3);
    assert_eq!(codex.pending().count(), 0);

    Ok(())
}

#[test]
fn uninstall_keeps_backups() -> Result<()> {
    let fx = claude_repo()?.with_home_file(".claude/CLAUDE.md", "My own rules.")?;
    let claude = agent::find("claude").unwrap();
    let workspace = Workspace::open(fx.repo(), fx.layout(), None)?;

    let report = workspace.install_agent(claude, &ProgressBar::hidden())?;
    assert_eq!(report.backups.len(), 1);
    assert_eq!(workspace.uninstall_agent(claude)?, 4);

    let names = read_dir(fx.home().join(".claude"))?
        .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().into_owned()))
        .collect::<Result<Vec<_>, _>>()?;
    assert!(names.iter().any(|name| name.starts_with("CLAUDE.md.backup.")));
    assert_eq!(
        current_target_state(fx.home().join(".claude/CLAUDE.md"))?,
        TargetState::Missing
    );

    Ok(())
}

#[test]
fn repo_root_is_discovered_from_subdirectory() -> Result<()> {
    let fx = claude_repo()?;
    let nested = fx.repo().join("claude/commands/git");
    assert_eq!(discover_repo_root(&nested), fx.repo());
    assert_eq!(discover_repo_root(fx.repo()), fx.repo());

    let outside = tempfile::tempdir()?;
    assert_eq!(discover_repo_root(outside.path()), outside.path());

    Ok(())
}

#[test]
fn cache_write_failure_never_links_settings() -> Result<()> {
    let fx = claude_repo()?.with_file("gemini/GEMINI.md", "Be thorough.")?;
    let layout = fx.layout();
    std::fs::create_dir_all(&layout.state_dir)?;
    write(&layout.cache, "not a directory")?;

    let workspace = Workspace::open(fx.repo(), fx.layout(), None)?;
    let claude = agent::find("claude").unwrap();
    let gemini = agent::find("gemini").unwrap();
    let outcomes = workspace.install(&[claude, gemini], &ProgressBar::hidden());

    assert!(outcomes[0].result.is_err());
    assert!(outcomes[1].result.is_ok());
    assert_eq!(
        current_target_state(fx.home().join(".claude/settings.json"))?,
        TargetState::Missing
    );
    assert_eq!(
        current_target_state(fx.home().join(".claude/CLAUDE.md"))?,
        TargetState::Missing
    );
    assert_eq!(
        current_target_state(fx.home().join(".gemini/GEMINI.md"))?,
        TargetState::SymlinkTo(fx.repo().join("gemini/GEMINI.md"))
    );

    Ok(())
}
