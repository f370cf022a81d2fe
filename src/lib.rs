// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Shared configuration for AI coding agents.
//!
//! ai-rules keeps the configuration of several coding agents in a single
//! repository, and links each file into the place its agent expects to find
//! it. Settings files get special treatment. Instead of linking them as-is,
//! the base settings of the repository are merged with the overrides of the
//! active profile and the user's own overrides. The merged result is cached
//! per agent and repository checkout, and the agent's settings file links
//! to the cached copy.
//!
//! # Override Layers
//!
//! Layers are applied from lowest to highest precedence:
//!
//! 1. Base settings in the repository.
//! 2. Profile overrides, following the `extends` chain of the profile.
//! 3. User overrides in `~/.ai-rules-config.yaml`.
//!
//! Mappings merge key by key, everything else is replaced wholesale. Fields
//! the agent writes itself are carried forward from the previous merge.
//!
//! # See Also
//!
//! - [`settings`] for the merge and cache engine.
//! - [`workspace`] for per-agent install, status, and uninstall.

pub mod agent;
pub mod config;
pub mod exclude;
pub mod keypath;
pub mod link;
pub mod merge;
pub mod overrides;
pub mod path;
pub mod profile;
pub mod settings;
pub mod state;
pub mod workspace;

#[doc(inline)]
pub use crate::{
    keypath::KeyPath,
    merge::{merge, Document},
    settings::{build, SettingsEngine},
    workspace::Workspace,
};
