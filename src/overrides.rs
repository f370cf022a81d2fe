// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Settings override store.
//!
//! Navigate settings documents through [`KeyPath`]s to read, replace, or
//! remove values. Navigation never creates containers implicitly. Every step
//! must land on an existing container of the matching shape, otherwise the
//! caller gets an error that lists what _is_ available at the point of
//! failure, so the user can correct a typo.
//!
//! # Stored Overrides
//!
//! Overrides are persisted as nested documents, not as key paths. Recording a
//! key path into such an overlay document is done through [`record`], which
//! validates the path against the effective document first. Because sequences
//! replace wholesale when merged, a path that reaches into a sequence stores
//! the entire patched sequence in the overlay.

use crate::{
    keypath::{KeyPath, ParseError, Step},
    merge::{merge, Document},
};

use serde_json::{Map, Value};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};
use tracing::debug;

/// Lookup value at path.
///
/// # Errors
///
/// - Return [`OverrideError::NotFound`] if a field is missing.
/// - Return [`OverrideError::TypeMismatch`] if a step hits the wrong shape.
/// - Return [`OverrideError::IndexOutOfBounds`] if an index is too large.
pub fn get<'a>(document: &'a Document, path: &KeyPath) -> Result<&'a Document> {
    navigate(document, path, path.len())
}

/// Set value at path, returning the updated document.
///
/// The last step replaces an existing value. A field step may also add a
/// new key, but only inside a nested mapping, e.g., `env.MY_VAR`. Top-level
/// keys form the settings schema of an agent, so they must already exist.
/// Index steps never append to a sequence.
///
/// # Errors
///
/// - Return [`OverrideError`] if the path does not fit the document.
pub fn set(document: &Document, path: &KeyPath, value: Document) -> Result<Document> {
    let mut patched = document.clone();
    let depth = path.len() - 1;
    let parent = navigate(document, path, depth)?;
    check_last_step(parent, path)?;

    match (&path.steps()[depth], slot_mut(&mut patched, path, depth)?) {
        (Step::Field(name), Value::Object(map)) => {
            map.insert(name.clone(), value);
        }
        (Step::Index(index), Value::Array(items)) => items[*index] = value,
        _ => return Err(mismatch(parent, path, depth)),
    }

    Ok(patched)
}

/// Place value at path, creating missing mappings along field steps.
///
/// Unlike [`set`], the document shape is not validated for paths made of
/// field steps only. Paths with index steps fall back to [`set`], since a
/// sequence element cannot be conjured out of nothing.
///
/// # Errors
///
/// - Return [`OverrideError`] if an index step does not fit the document.
pub fn graft(document: &Document, path: &KeyPath, value: Document) -> Result<Document> {
    if first_index(path) < path.len() {
        return set(document, path, value);
    }

    let mut patched = document.clone();
    insert_fields(&mut patched, path.steps(), value);
    Ok(patched)
}

/// Remove value at path, returning the updated document.
///
/// Removing a sequence element shifts later elements down by one.
///
/// # Errors
///
/// - Return [`OverrideError`] if nothing exists at the path.
pub fn unset(document: &Document, path: &KeyPath) -> Result<Document> {
    let _ = get(document, path)?;

    let mut patched = document.clone();
    let depth = path.len() - 1;
    match (&path.steps()[depth], slot_mut(&mut patched, path, depth)?) {
        (Step::Field(name), Value::Object(map)) => {
            map.remove(name);
        }
        (Step::Index(index), Value::Array(items)) => {
            items.remove(*index);
        }
        _ => return Err(mismatch(document, path, depth)),
    }

    Ok(patched)
}

/// Record a key path override into a nested overlay document.
///
/// The path is validated against `merge(reference, overlay)`, i.e., the
/// document the overlay will be merged onto, with the overlay's own earlier
/// entries in effect. If the path passes through a sequence, the whole
/// patched sequence is stored in the overlay.
///
/// # Errors
///
/// - Return [`OverrideError`] if the path does not fit the effective document.
pub fn record(
    overlay: &Document,
    reference: &Document,
    path: &KeyPath,
    value: Document,
) -> Result<Document> {
    let effective = merge(reference, overlay);
    let patched = set(&effective, path, value)?;
    let cut = first_index(path);
    let stored = navigate(&patched, path, cut)?.clone();

    let mut out = match overlay {
        Value::Object(_) => overlay.clone(),
        _ => Value::Object(Map::new()),
    };
    insert_fields(&mut out, &path.steps()[..cut], stored);
    debug!("record override {path} at {}", path.prefix_string(cut));

    Ok(out)
}

/// Remove a recorded override from a nested overlay document.
///
/// A path that passes through a sequence drops the entire stored sequence,
/// reverting it to whatever lower layers define. Mappings left empty are
/// pruned.
///
/// # Errors
///
/// - Return [`OverrideError`] if the overlay holds nothing at the path.
pub fn forget(overlay: &Document, path: &KeyPath) -> Result<Document> {
    let cut = first_index(path);
    let fields = KeyPath::from_steps(path.steps()[..cut].iter().cloned())
        .map_err(|_| mismatch(overlay, path, 0))?;
    let mut out = unset(overlay, &fields)?;

    for depth in (1..cut).rev() {
        let is_empty = matches!(
            navigate(&out, &fields, depth),
            Ok(Value::Object(map)) if map.is_empty()
        );
        if !is_empty {
            break;
        }

        let parent = KeyPath::from_steps(fields.steps()[..depth].iter().cloned())
            .map_err(|_| mismatch(overlay, path, 0))?;
        out = unset(&out, &parent)?;
    }

    Ok(out)
}

/// Single key path override.
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideEntry {
    pub path: KeyPath,
    pub value: Document,
}

impl FromStr for OverrideEntry {
    type Err = OverrideError;

    /// Parse `key=value`, typing the value as a YAML scalar or collection.
    ///
    /// Values that are not valid YAML are kept as plain strings.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (key, raw) = input
            .split_once('=')
            .ok_or_else(|| OverrideError::MissingValue(input.to_string()))?;
        let path = key.trim().parse::<KeyPath>()?;
        let value = serde_yaml::from_str::<Document>(raw)
            .unwrap_or_else(|_| Value::String(raw.to_string()));

        Ok(Self { path, value })
    }
}

fn first_index(path: &KeyPath) -> usize {
    path.steps()
        .iter()
        .position(|step| matches!(step, Step::Index(_)))
        .unwrap_or(path.len())
}

fn navigate<'a>(document: &'a Document, path: &KeyPath, depth: usize) -> Result<&'a Document> {
    let mut current = document;
    for (at, step) in path.steps()[..depth].iter().enumerate() {
        current = descend(current, step).ok_or_else(|| mismatch(current, path, at))?;
    }

    Ok(current)
}

fn descend<'a>(value: &'a Document, step: &Step) -> Option<&'a Document> {
    match (step, value) {
        (Step::Field(name), Value::Object(map)) => map.get(name),
        (Step::Index(index), Value::Array(items)) => items.get(*index),
        _ => None,
    }
}

fn check_last_step(parent: &Document, path: &KeyPath) -> Result<()> {
    let depth = path.len() - 1;
    let fits = match (&path.steps()[depth], parent) {
        (Step::Field(name), Value::Object(map)) => depth > 0 || map.contains_key(name),
        (Step::Index(index), Value::Array(items)) => *index < items.len(),
        _ => false,
    };

    match fits {
        true => Ok(()),
        false => Err(mismatch(parent, path, depth)),
    }
}

fn slot_mut<'a>(document: &'a mut Document, path: &KeyPath, depth: usize) -> Result<&'a mut Document> {
    let pointer = path.steps()[..depth]
        .iter()
        .map(|step| match step {
            Step::Field(name) => format!("/{}", name.replace('~', "~0").replace('/', "~1")),
            Step::Index(index) => format!("/{index}"),
        })
        .collect::<String>();

    document
        .pointer_mut(&pointer)
        .ok_or_else(|| OverrideError::NotFound {
            path: path.prefix_string(depth),
            available: Vec::new(),
        })
}

fn insert_fields(document: &mut Document, steps: &[Step], value: Document) {
    let Some((Step::Field(name), rest)) = steps.split_first() else {
        return;
    };

    if !document.is_object() {
        *document = Value::Object(Map::new());
    }
    let Value::Object(map) = document else {
        return;
    };

    if rest.is_empty() {
        map.insert(name.clone(), value);
        return;
    }

    let child = map
        .entry(name.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    insert_fields(child, rest, value);
}

fn mismatch(container: &Document, path: &KeyPath, at: usize) -> OverrideError {
    let location = path.prefix_string(at + 1);
    match (&path.steps()[at], container) {
        (Step::Field(_), Value::Object(map)) => OverrideError::NotFound {
            path: location,
            available: map.keys().cloned().collect(),
        },
        (Step::Index(index), Value::Array(items)) => OverrideError::IndexOutOfBounds {
            path: location,
            index: *index,
            len: items.len(),
        },
        (Step::Field(_), other) => OverrideError::TypeMismatch {
            path: location,
            expected: "mapping",
            found: kind(other),
        },
        (Step::Index(_), other) => OverrideError::TypeMismatch {
            path: location,
            expected: "sequence",
            found: kind(other),
        },
    }
}

fn kind(value: &Document) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

/// Comma separated suggestion list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestions<'a>(pub &'a [String]);

impl Display for Suggestions<'_> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if self.0.is_empty() {
            return fmt.write_str("none");
        }

        fmt.write_str(&self.0.join(", "))
    }
}

/// Override store error types.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OverrideError {
    /// Field does not exist at path.
    #[error("key not found: {path}\nAvailable options: {}", Suggestions(available))]
    NotFound {
        path: String,
        available: Vec<String>,
    },

    /// Step expects a different kind of container.
    #[error("expected {expected} at {path}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Index lies past the end of a sequence.
    #[error("index {index} out of bounds at {path} (length {len})")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    /// Override entry lacks `=value`.
    #[error("override {0:?} must be written as key=value")]
    MissingValue(String),

    /// Key path is malformed.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl OverrideError {
    /// Valid keys at the point of failure.
    pub fn suggestions(&self) -> &[String] {
        match self {
            Self::NotFound { available, .. } => available,
            _ => &[],
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = OverrideError> = std::result::Result<T, E>;
