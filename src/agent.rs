// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Agent definitions.
//!
//! Each supported coding agent is a static record naming the files it reads
//! and where it expects to find them. Sources live in the repository under
//! `<repo>/<agent>/`, targets are relative to the user's home directory.
//!
//! # Managed Fields
//!
//! Some settings are written by the agent itself, e.g., Claude records which
//! plugins the user enabled. These __managed fields__ are owned by the agent,
//! not by the repository, and are carried forward verbatim whenever merged
//! settings get rebuilt.

use crate::{keypath::KeyPath, settings::format::SettingsFormat};

/// Kind of file an agent link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Single file linked as-is.
    File,

    /// Directory whose files are linked one by one.
    Directory,

    /// Settings file replaced by merged settings.
    Settings(SettingsFormat),
}

/// Source to target mapping of one agent file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSpec {
    /// Path relative to agent directory in repository.
    pub source: &'static str,

    /// Path relative to home directory.
    pub target: &'static str,

    pub kind: LinkKind,
}

/// Static definition of a coding agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentDefinition {
    /// Identifier used on the command line and in configuration files.
    pub id: &'static str,

    /// Human readable name.
    pub name: &'static str,

    pub links: &'static [LinkSpec],

    /// Key paths inside settings that the agent owns.
    pub managed_fields: &'static [&'static str],
}

impl AgentDefinition {
    /// Settings link of agent, if it has one.
    pub fn settings(&self) -> Option<(&LinkSpec, SettingsFormat)> {
        self.links.iter().find_map(|link| match link.kind {
            LinkKind::Settings(format) => Some((link, format)),
            _ => None,
        })
    }

    /// Managed fields as parsed key paths.
    pub fn managed_paths(&self) -> Vec<KeyPath> {
        self.managed_fields
            .iter()
            .filter_map(|field| field.parse().ok())
            .collect()
    }
}

const fn file(source: &'static str, target: &'static str) -> LinkSpec {
    LinkSpec {
        source,
        target,
        kind: LinkKind::File,
    }
}

const fn directory(source: &'static str, target: &'static str) -> LinkSpec {
    LinkSpec {
        source,
        target,
        kind: LinkKind::Directory,
    }
}

const fn settings(source: &'static str, target: &'static str, format: SettingsFormat) -> LinkSpec {
    LinkSpec {
        source,
        target,
        kind: LinkKind::Settings(format),
    }
}

/// All supported agents.
pub const AGENTS: &[AgentDefinition] = &[
    AgentDefinition {
        id: "claude",
        name: "Claude Code",
        links: &[
            settings("settings.json", ".claude/settings.json", SettingsFormat::Json),
            file("CLAUDE.md", ".claude/CLAUDE.md"),
            directory("commands", ".claude/commands"),
            directory("agents", ".claude/agents"),
            directory("skills", ".claude/skills"),
        ],
        managed_fields: &["enabledPlugins"],
    },
    AgentDefinition {
        id: "codex",
        name: "Codex CLI",
        links: &[
            settings("config.toml", ".codex/config.toml", SettingsFormat::Toml),
            file("AGENTS.md", ".codex/AGENTS.md"),
            directory("prompts", ".codex/prompts"),
        ],
        managed_fields: &["projects"],
    },
    AgentDefinition {
        id: "gemini",
        name: "Gemini CLI",
        links: &[
            settings("settings.json", ".gemini/settings.json", SettingsFormat::Json),
            file("GEMINI.md", ".gemini/GEMINI.md"),
            directory("commands", ".gemini/commands"),
        ],
        managed_fields: &[],
    },
    AgentDefinition {
        id: "amp",
        name: "Amp",
        links: &[
            settings("settings.json", ".config/amp/settings.json", SettingsFormat::Json),
            file("AGENTS.md", ".config/amp/AGENTS.md"),
        ],
        managed_fields: &[],
    },
];

/// Every supported agent.
pub fn all() -> &'static [AgentDefinition] {
    AGENTS
}

/// Lookup agent by identifier.
pub fn find(id: &str) -> Option<&'static AgentDefinition> {
    AGENTS.iter().find(|agent| agent.id == id)
}

/// Select agents by identifier, or all agents if none are given.
///
/// # Errors
///
/// - Return [`AgentError::Unknown`] if an identifier names no agent.
pub fn select(ids: &[String]) -> Result<Vec<&'static AgentDefinition>> {
    if ids.is_empty() {
        return Ok(all().iter().collect());
    }

    ids.iter()
        .map(|id| {
            find(id).ok_or_else(|| AgentError::Unknown {
                id: id.clone(),
                known: known_ids(),
            })
        })
        .collect()
}

/// Identifiers of all agents.
pub fn known_ids() -> Vec<String> {
    AGENTS.iter().map(|agent| agent.id.to_string()).collect()
}

/// Agent registry error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("unknown agent {id:?}\nAvailable options: {}", known.join(", "))]
    Unknown { id: String, known: Vec<String> },
}

/// Friendly result alias :3
pub type Result<T, E = AgentError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[test]
    fn agent_ids_are_unique() {
        let ids = AGENTS.iter().map(|agent| agent.id).collect::<HashSet<_>>();
        assert_eq!(ids.len(), AGENTS.len());
    }

    #[test]
    fn every_agent_has_one_settings_link() {
        for agent in AGENTS {
            let count = agent
                .links
                .iter()
                .filter(|link| matches!(link.kind, LinkKind::Settings(_)))
                .count();
            assert_eq!(count, 1, "agent {}", agent.id);
        }
    }

    #[test]
    fn settings_format_matches_extension() {
        for agent in AGENTS {
            let (link, format) = agent.settings().unwrap();
            assert_eq!(SettingsFormat::from_path(link.source), Some(format));
            assert_eq!(SettingsFormat::from_path(link.target), Some(format));
        }
    }

    #[test]
    fn managed_fields_parse() {
        for agent in AGENTS {
            assert_eq!(agent.managed_paths().len(), agent.managed_fields.len());
        }
    }

    #[test]
    fn select_rejects_unknown_agent() {
        let result = select(&["claude".into(), "vim".into()]).unwrap_err();
        assert!(result.to_string().contains("claude, codex, gemini, amp"));

        assert_eq!(select(&[]).unwrap().len(), AGENTS.len());
    }
}
