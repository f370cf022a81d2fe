// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Settings file formats.
//!
//! Agents keep their settings in different file formats. All of them are
//! read into the same [`Document`] representation, and written back out in
//! the format the agent expects.

use crate::merge::Document;

use serde_json::{Map, Value};
use std::path::Path;

/// File format of a settings document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsFormat {
    Json,
    Yaml,
    Toml,
}

impl SettingsFormat {
    /// Determine format from file extension.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        match path.as_ref().extension()?.to_str()? {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    /// Parse text into a settings document.
    ///
    /// Blank text is treated as an empty mapping.
    ///
    /// # Errors
    ///
    /// - Return [`FormatError`] if text is not valid for the format.
    pub fn parse(&self, text: &str) -> Result<Document> {
        if text.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }

        match self {
            Self::Json => Ok(serde_json::from_str(text)?),
            Self::Yaml => Ok(serde_yaml::from_str(text)?),
            Self::Toml => Ok(toml::from_str(text)?),
        }
    }

    /// Render settings document as text.
    ///
    /// Output only depends on the document, and always ends with a newline.
    ///
    /// # Errors
    ///
    /// - Return [`FormatError`] if document cannot be expressed in the format,
    ///   e.g., null values in TOML.
    pub fn render(&self, document: &Document) -> Result<String> {
        let mut text = match self {
            Self::Json => serde_json::to_string_pretty(document)?,
            Self::Yaml => serde_yaml::to_string(document)?,
            Self::Toml => toml::to_string_pretty(document)?,
        };

        if !text.ends_with('\n') {
            text.push('\n');
        }

        Ok(text)
    }
}

/// Settings format error types.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    TomlDeserialize(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Friendly result alias :3
pub type Result<T, E = FormatError> = std::result::Result<T, E>;
