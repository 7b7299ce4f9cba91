//! # Label selectors.
//!
//! Selectors are normalized on construction: lower-cased, all whitespace
//! removed. The normalized text is what travels to the API server; the
//! in-memory cluster evaluates it locally with [`LabelSelector::matches`].
//!
//! Supported requirements, comma-separated (all must hold):
//! ```text
//! key=value   key==value   key!=value   key   !key
//! ```

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Selector text that cannot be evaluated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid label selector requirement {0:?}")]
pub struct SelectorError(pub String);

/// One parsed requirement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    /// `key=value` or `key==value`.
    Equals(String, String),
    /// `key!=value`; also matches when the key is absent.
    NotEquals(String, String),
    /// `key`.
    Exists(String),
    /// `!key`.
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::DoesNotExist(k) => !labels.contains_key(k),
        }
    }
}

/// A normalized label selector. Empty selects everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LabelSelector(String);

impl LabelSelector {
    /// Normalizes `raw`.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(
            raw.as_ref()
                .chars()
                .filter(|c| !c.is_whitespace())
                .flat_map(char::to_lowercase)
                .collect(),
        )
    }

    /// Selects everything.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Normalized text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this selects everything.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses the requirements.
    pub fn requirements(&self) -> Result<Vec<Requirement>, SelectorError> {
        self.0
            .split(',')
            .filter(|part| !part.is_empty())
            .map(parse_requirement)
            .collect()
    }

    /// Evaluates the selector against a label set.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool, SelectorError> {
        Ok(self.requirements()?.iter().all(|r| r.matches(labels)))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn parse_requirement(part: &str) -> Result<Requirement, SelectorError> {
    let invalid = || SelectorError(part.to_owned());
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_owned()).ok_or_else(invalid);

    // Set-based forms (`in (..)`, `notin (..)`) are not supported.
    if part.contains(['(', ')']) {
        return Err(invalid());
    }

    if let Some((k, v)) = part.split_once("!=") {
        return Ok(Requirement::NotEquals(non_empty(k)?, v.to_owned()));
    }
    if let Some((k, v)) = part.split_once("==").or_else(|| part.split_once('=')) {
        if v.contains('=') {
            return Err(invalid());
        }
        return Ok(Requirement::Equals(non_empty(k)?, v.to_owned()));
    }
    if let Some(k) = part.strip_prefix('!') {
        return Ok(Requirement::DoesNotExist(non_empty(k)?));
    }
    Ok(Requirement::Exists(non_empty(part)?))
}
