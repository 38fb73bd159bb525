//! # Label Selector
//!
//! Parses a Kubernetes label selector string into a typed predicate.
//!
//! Supported requirement forms, joined by commas (logical AND):
//!
//! - `key=value`, `key==value`, `key!=value`
//! - `key in (a,b)`, `key notin (a,b)`
//! - `key` (exists), `!key` (does not exist)
//!
//! The parsed selector renders back to canonical text via `Display`, which is
//! what gets sent to the API server when listing targets.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Selector parse errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("label selector is empty")]
    Empty,
    #[error("empty requirement at position {0}")]
    EmptyRequirement(usize),
    #[error("invalid label key '{0}'")]
    InvalidKey(String),
    #[error("invalid label value '{value}' for key '{key}'")]
    InvalidValue { key: String, value: String },
    #[error("malformed value set for key '{0}': expected '(v1,v2,...)'")]
    MalformedSet(String),
    #[error("unexpected token in requirement '{0}'")]
    Unexpected(String),
}

/// One requirement of a selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals { key: String, value: String },
    NotEquals { key: String, value: String },
    In { key: String, values: BTreeSet<String> },
    NotIn { key: String, values: BTreeSet<String> },
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    /// Evaluate this requirement against a label set
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals { key, value } => labels.get(key) == Some(value),
            // Absent keys satisfy inequality, as in Kubernetes.
            Self::NotEquals { key, value } => labels.get(key) != Some(value),
            Self::In { key, values } => labels.get(key).is_some_and(|v| values.contains(v)),
            Self::NotIn { key, values } => !labels.get(key).is_some_and(|v| values.contains(v)),
            Self::Exists(key) => labels.contains_key(key),
            Self::DoesNotExist(key) => !labels.contains_key(key),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |values: &BTreeSet<String>| values.iter().cloned().collect::<Vec<_>>().join(",");
        match self {
            Self::Equals { key, value } => write!(f, "{key}={value}"),
            Self::NotEquals { key, value } => write!(f, "{key}!={value}"),
            Self::In { key, values } => write!(f, "{key} in ({})", join(values)),
            Self::NotIn { key, values } => write!(f, "{key} notin ({})", join(values)),
            Self::Exists(key) => write!(f, "{key}"),
            Self::DoesNotExist(key) => write!(f, "!{key}"),
        }
    }
}

/// Conjunction of label requirements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Parse a selector string
    ///
    /// # Errors
    ///
    /// Returns `SelectorError` when the string is empty or any requirement is malformed.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        if input.trim().is_empty() {
            return Err(SelectorError::Empty);
        }

        let requirements = split_requirements(input)?
            .into_iter()
            .enumerate()
            .map(|(index, raw)| parse_requirement(index, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { requirements })
    }

    /// True when every requirement holds for `labels`
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    #[must_use]
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }
}

impl FromStr for LabelSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.requirements.iter().map(ToString::to_string).collect();
        f.write_str(&rendered.join(","))
    }
}

/// Split on commas that are not inside a parenthesised value set
fn split_requirements(input: &str) -> Result<Vec<&str>, SelectorError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| SelectorError::Unexpected(input.trim().to_string()))?;
            }
            ',' if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(SelectorError::Unexpected(input.trim().to_string()));
    }
    parts.push(&input[start..]);
    Ok(parts)
}

fn parse_requirement(index: usize, raw: &str) -> Result<Requirement, SelectorError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SelectorError::EmptyRequirement(index));
    }

    if let Some(key) = raw.strip_prefix('!') {
        let key = key.trim();
        validate_key(key)?;
        return Ok(Requirement::DoesNotExist(key.to_string()));
    }

    // Operator order matters: "!=" and "==" before "=".
    if let Some((key, value)) = raw.split_once("!=") {
        let (key, value) = key_value(key, value)?;
        return Ok(Requirement::NotEquals { key, value });
    }
    if let Some((key, value)) = raw.split_once("==") {
        let (key, value) = key_value(key, value)?;
        return Ok(Requirement::Equals { key, value });
    }
    if let Some((key, value)) = raw.split_once('=') {
        let (key, value) = key_value(key, value)?;
        return Ok(Requirement::Equals { key, value });
    }

    let mut tokens = raw.splitn(2, char::is_whitespace);
    let key = tokens.next().unwrap_or_default();
    let rest = tokens.next().map(str::trim_start);

    match rest {
        None => {
            validate_key(key)?;
            Ok(Requirement::Exists(key.to_string()))
        }
        Some(rest) => {
            validate_key(key)?;
            if let Some(set) = rest.strip_prefix("notin") {
                let values = parse_set(key, set)?;
                Ok(Requirement::NotIn {
                    key: key.to_string(),
                    values,
                })
            } else if let Some(set) = rest.strip_prefix("in") {
                let values = parse_set(key, set)?;
                Ok(Requirement::In {
                    key: key.to_string(),
                    values,
                })
            } else {
                Err(SelectorError::Unexpected(raw.to_string()))
            }
        }
    }
}

fn key_value(key: &str, value: &str) -> Result<(String, String), SelectorError> {
    let key = key.trim();
    let value = value.trim();
    validate_key(key)?;
    validate_value(key, value)?;
    Ok((key.to_string(), value.to_string()))
}

fn parse_set(key: &str, set: &str) -> Result<BTreeSet<String>, SelectorError> {
    let inner = set
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| SelectorError::MalformedSet(key.to_string()))?;

    let mut values = BTreeSet::new();
    for value in inner.split(',') {
        let value = value.trim();
        validate_value(key, value)?;
        values.insert(value.to_string());
    }
    if values.iter().all(String::is_empty) {
        return Err(SelectorError::MalformedSet(key.to_string()));
    }
    Ok(values)
}

/// Label key: optional DNS prefix, '/', then a name of up to 63 characters
fn validate_key(key: &str) -> Result<(), SelectorError> {
    let invalid = || SelectorError::InvalidKey(key.to_string());
    let name = match key.rsplit_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty()
                || prefix.len() > 253
                || !prefix
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
            {
                return Err(invalid());
            }
            name
        }
        None => key,
    };
    if name.is_empty() || !is_label_token(name) {
        return Err(invalid());
    }
    Ok(())
}

/// Label value: empty, or a token like a key name
fn validate_value(key: &str, value: &str) -> Result<(), SelectorError> {
    if value.is_empty() || is_label_token(value) {
        Ok(())
    } else {
        Err(SelectorError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

fn is_label_token(s: &str) -> bool {
    let bytes = s.as_bytes();
    s.len() <= 63
        && bytes.first().is_some_and(u8::is_ascii_alphanumeric)
        && bytes.last().is_some_and(u8::is_ascii_alphanumeric)
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}
