// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Override key path notation.
//!
//! Settings overrides issued from the command line address a location inside
//! a settings document through a __key path__, e.g.,
//! `claude.hooks.SubagentStop[0].hooks[0].command`. A key path is a sequence
//! of navigation steps. Each step is either a field lookup into a mapping, or
//! an index lookup into a sequence.
//!
//! # Grammar
//!
//! ```text
//! path    := segment ("." segment)*
//! segment := identifier ("[" digits "]")*
//! ```
//!
//! An identifier is any non-empty run of characters that are neither `.` nor
//! `[`. There is no escape mechanism, so field names containing a literal dot
//! cannot be addressed.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Single navigation step of a key path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    /// Lookup of a key inside a mapping.
    Field(String),

    /// Lookup of a position inside a sequence.
    Index(usize),
}

impl Display for Step {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Field(name) => fmt.write_str(name),
            Self::Index(index) => write!(fmt, "[{index}]"),
        }
    }
}

/// Parsed override key path.
///
/// # Invariants
///
/// - Always contains at least one step.
/// - First step is always a [`Step::Field`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPath {
    steps: Vec<Step>,
}

impl KeyPath {
    /// Construct key path from raw steps.
    ///
    /// # Errors
    ///
    /// - Return [`ParseError::Empty`] if no steps are given.
    /// - Return [`ParseError::MissingField`] if the first step is an index.
    pub fn from_steps(steps: impl IntoIterator<Item = Step>) -> Result<Self> {
        let steps = steps.into_iter().collect::<Vec<_>>();
        match steps.first() {
            None => Err(ParseError::Empty),
            Some(Step::Index(_)) => Err(ParseError::MissingField {
                input: Self::render(&steps),
                position: 0,
            }),
            Some(Step::Field(_)) => Ok(Self { steps }),
        }
    }

    /// Navigation steps of the path.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of navigation steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false, kept for API symmetry with [`Self::len`].
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Split a command line key into its agent identifier and settings path.
    ///
    /// The key `claude.env.MY_VAR` becomes `("claude", env.MY_VAR)`.
    ///
    /// # Errors
    ///
    /// - Return [`ParseError::MissingAgent`] if nothing follows the agent.
    pub fn split_agent(&self) -> Result<(String, KeyPath)> {
        let Some(Step::Field(agent)) = self.steps.first() else {
            return Err(ParseError::MissingAgent {
                input: self.to_string(),
            });
        };

        let rest = KeyPath::from_steps(self.steps[1..].iter().cloned()).map_err(|_| {
            ParseError::MissingAgent {
                input: self.to_string(),
            }
        })?;

        Ok((agent.clone(), rest))
    }

    /// Render the first `count` steps as key path notation.
    pub fn prefix_string(&self, count: usize) -> String {
        Self::render(&self.steps[..count.min(self.steps.len())])
    }

    fn render(steps: &[Step]) -> String {
        let mut out = String::new();
        for step in steps {
            if let Step::Field(_) = step {
                if !out.is_empty() {
                    out.push('.');
                }
            }
            out.push_str(&step.to_string());
        }

        out
    }
}

impl FromStr for KeyPath {
    type Err = ParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut steps = Vec::new();
        let mut position = 0;
        for segment in input.split('.') {
            parse_segment(input, segment, position, &mut steps)?;
            position += segment.len() + 1;
        }

        Ok(Self { steps })
    }
}

impl Display for KeyPath {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&Self::render(&self.steps))
    }
}

fn parse_segment(input: &str, segment: &str, offset: usize, steps: &mut Vec<Step>) -> Result<()> {
    let (identifier, mut brackets) = match segment.find('[') {
        Some(at) => segment.split_at(at),
        None => (segment, ""),
    };

    if identifier.is_empty() {
        let error = if brackets.is_empty() {
            ParseError::EmptySegment {
                input: input.to_string(),
                position: offset,
            }
        } else {
            ParseError::MissingField {
                input: input.to_string(),
                position: offset,
            }
        };
        return Err(error);
    }
    steps.push(Step::Field(identifier.to_string()));

    let mut position = offset + identifier.len();
    while !brackets.is_empty() {
        // INVARIANT: Every bracket group starts right where the previous one closed.
        let Some(rest) = brackets.strip_prefix('[') else {
            return Err(ParseError::UnexpectedCharacter {
                input: input.to_string(),
                position,
                found: brackets.chars().next().unwrap_or_default(),
            });
        };

        let Some(close) = rest.find(']') else {
            return Err(ParseError::UnclosedBracket {
                input: input.to_string(),
                position,
            });
        };

        let digits = &rest[..close];
        if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(ParseError::InvalidIndex {
                input: input.to_string(),
                index: digits.to_string(),
            });
        }
        let index = digits.parse::<usize>().map_err(|_| ParseError::InvalidIndex {
            input: input.to_string(),
            index: digits.to_string(),
        })?;
        steps.push(Step::Index(index));

        position += close + 2;
        brackets = &rest[close + 1..];
    }

    Ok(())
}

/// Key path parsing error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Key path has no content.
    #[error("key path cannot be empty")]
    Empty,

    /// Leading, trailing, or doubled dot.
    #[error("empty segment at position {position} in key path {input:?}")]
    EmptySegment { input: String, position: usize },

    /// Bracket group without a field name before it.
    #[error("index without preceding field at position {position} in key path {input:?}")]
    MissingField { input: String, position: usize },

    /// Bracket group never closed.
    #[error("unclosed '[' at position {position} in key path {input:?}")]
    UnclosedBracket { input: String, position: usize },

    /// Bracket content is not a non-negative integer.
    #[error("invalid index {index:?} in key path {input:?}")]
    InvalidIndex { input: String, index: String },

    /// Stray text after a closing bracket.
    #[error("unexpected {found:?} at position {position} in key path {input:?}")]
    UnexpectedCharacter {
        input: String,
        position: usize,
        found: char,
    },

    /// Key names an agent, but no setting inside it.
    #[error("key {input:?} must name an agent followed by a setting, e.g., claude.model")]
    MissingAgent { input: String },
}

/// Friendly result alias :3
pub type Result<T, E = ParseError> = std::result::Result<T, E>;
