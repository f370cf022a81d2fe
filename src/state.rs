// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Session state.
//!
//! The state file at `~/.ai-rules/state.yaml` remembers which profile is
//! active, and when settings were last installed. It is loaded once per
//! process into a [`SessionContext`]. Changes never edit the context in
//! place. Instead a new context is produced, then written back atomically.

use crate::config::{read_optional, write_atomic, ConfigError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Process-wide session state.
#[derive(Default, Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionContext {
    /// Profile applied implicitly to every command.
    pub active_profile: Option<String>,

    /// Time of last successful install.
    pub last_install_time: Option<DateTime<Utc>>,
}

impl SessionContext {
    /// Load session state.
    ///
    /// Missing or malformed state yields the default state. Malformed state
    /// is reported as a warning.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let result = read_optional(path).and_then(|content| match content {
            Some(content) if !content.trim().is_empty() => {
                serde_yaml::from_str::<SessionContext>(&content).map_err(ConfigError::Deserialize)
            }
            _ => Ok(Self::default()),
        });

        result.unwrap_or_else(|error| {
            warn!("ignore session state at {}: {error}", path.display());
            Self::default()
        })
    }

    /// New context with a different active profile.
    pub fn with_active_profile(self, profile: Option<String>) -> Self {
        Self {
            active_profile: profile,
            ..self
        }
    }

    /// New context with a different install time.
    pub fn with_install_time(self, time: DateTime<Utc>) -> Self {
        Self {
            last_install_time: Some(time),
            ..self
        }
    }

    /// Write session state atomically.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Serialize`] if state cannot be serialized.
    /// - Return [`ConfigError::Write`] if state file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self).map_err(ConfigError::Serialize)?;
        write_atomic(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn state_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("state.yaml");
        assert_eq!(SessionContext::load(&path), SessionContext::default());

        let time = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap();
        let state = SessionContext::default()
            .with_active_profile(Some("work".into()))
            .with_install_time(time);
        state.save(&path)?;

        let result = SessionContext::load(&path);
        assert_eq!(result, state);
        assert_eq!(result.active_profile.as_deref(), Some("work"));

        Ok(())
    }

    #[test]
    fn malformed_state_is_default() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("state.yaml");
        std::fs::write(&path, "active_profile: [")?;
        assert_eq!(SessionContext::load(&path), SessionContext::default());

        Ok(())
    }
}
