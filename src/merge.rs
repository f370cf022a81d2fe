// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deep merge of settings documents.
//!
//! Layers of settings are combined by merging an __overlay__ document on top
//! of a __base__ document:
//!
//! - Mapping onto mapping merges key by key. Keys only present in one side
//!   are kept, keys present in both sides are merged recursively.
//! - Any other pairing, sequences included, lets the overlay replace the base
//!   value wholesale. Hook chains and argument lists cannot be merged by
//!   position without surprising the user.
//!
//! Merging is not associative. Callers must apply layers strictly from lowest
//! to highest precedence.

use serde_json::Value;

/// Settings document.
///
/// Arbitrarily nested structure of mappings, sequences, and scalars. Mapping
/// keys are kept sorted, so serialization never depends on source order.
pub type Document = Value;

/// Merge overlay on top of base, returning a new document.
///
/// Neither input is modified, so one base can be merged against many
/// overlays.
pub fn merge(base: &Document, overlay: &Document) -> Document {
    let mut merged = base.clone();
    merge_into(&mut merged, overlay);
    merged
}

/// Merge overlay on top of base in place.
pub fn merge_into(base: &mut Document, overlay: &Document) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

/// Merge a list of layers from lowest to highest precedence.
pub fn merge_layers<'a>(base: &Document, layers: impl IntoIterator<Item = &'a Document>) -> Document {
    let mut merged = base.clone();
    for layer in layers {
        merge_into(&mut merged, layer);
    }

    merged
}
