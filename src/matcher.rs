//! Request matching logic.
//!
//! Compiles mock path patterns and evaluates rule conditions against an
//! incoming request.

use crate::config::{ConditionOperator, ConditionSource, RuleCondition};
use crate::error::MockError;
use crate::request::{json_to_text, resolve_json_path, RequestContext};
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

/// A compiled mock path pattern.
///
/// Supported syntax:
/// - `:name` matches one path segment and captures it
/// - trailing `/*` matches the prefix itself or the prefix plus one segment
/// - trailing `/**` matches the prefix itself or anything below it
/// - any other `*` matches any characters, including `/`
///
/// Everything else is literal and the whole path must match.
#[derive(Debug, Clone)]
pub struct PathPattern {
    pattern: String,
    regex: Regex,
    /// `:name` parameters, in capture group order
    params: Vec<String>,
}

impl PathPattern {
    /// Compile a pattern. The same pattern always yields the same matcher.
    pub fn compile(pattern: &str) -> Result<Self, MockError> {
        let (source, params) = pattern_to_regex(pattern);
        let regex = Regex::new(&source).map_err(|source| MockError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            params,
        })
    }

    /// The pattern this matcher was compiled from.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Named parameters of `path`. When the path matches, values come from
    /// the capture groups, so `/:id.json` yields `42` for `/42.json`.
    /// Otherwise `:name` segments are paired positionally.
    pub fn extract_params(&self, path: &str) -> HashMap<String, String> {
        match self.regex.captures(path) {
            Some(caps) => self
                .params
                .iter()
                .zip(caps.iter().skip(1))
                .map(|(name, value)| {
                    let value = value.map(|m| m.as_str()).unwrap_or_default();
                    (name.clone(), value.to_string())
                })
                .collect(),
            None => positional_params(&self.pattern, path),
        }
    }
}

/// Named parameters of `path` under `pattern`; see
/// [`PathPattern::extract_params`].
pub fn extract_path_params(pattern: &str, path: &str) -> HashMap<String, String> {
    match PathPattern::compile(pattern) {
        Ok(compiled) => compiled.extract_params(path),
        Err(_) => positional_params(pattern, path),
    }
}

/// Pair each `:name` segment of `pattern` with the segment at the same
/// position in `path`. Missing segments yield an empty string.
fn positional_params(pattern: &str, path: &str) -> HashMap<String, String> {
    let actual: Vec<&str> = path.split('/').collect();

    pattern
        .split('/')
        .enumerate()
        .filter_map(|(i, segment)| {
            let name = param_name(segment.strip_prefix(':')?);
            if name.is_empty() {
                return None;
            }
            let value = actual.get(i).copied().unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Leading identifier characters of a `:name` token.
fn param_name(rest: &str) -> &str {
    let end = rest.find(|c: char| !is_name_char(c)).unwrap_or(rest.len());
    &rest[..end]
}

fn pattern_to_regex(pattern: &str) -> (String, Vec<String>) {
    let (body, tail) = if let Some(prefix) = pattern.strip_suffix("/**") {
        (prefix, "(?:/.*)?")
    } else if let Some(prefix) = pattern.strip_suffix("/*") {
        (prefix, "(?:/[^/]*)?")
    } else {
        (pattern, "")
    };

    let mut regex = String::from("^");
    let mut params = Vec::new();
    let mut literal = String::new();
    let mut chars = body.char_indices();

    while let Some((idx, ch)) = chars.next() {
        match ch {
            ':' if idx == 0 || body[..idx].ends_with('/') => {
                let name = param_name(&body[idx + 1..]);
                if name.is_empty() {
                    literal.push(ch);
                    continue;
                }
                regex.push_str(&regex::escape(&literal));
                literal.clear();
                regex.push_str("([^/]+)");
                params.push(name.to_string());
                for _ in 0..name.chars().count() {
                    chars.next();
                }
            }
            '*' => {
                regex.push_str(&regex::escape(&literal));
                literal.clear();
                regex.push_str(".*");
            }
            _ => literal.push(ch),
        }
    }

    regex.push_str(&regex::escape(&literal));
    regex.push_str(tail);
    regex.push('$');
    (regex, params)
}

/// Compile the `value` of a regex condition. Patterns come from user input.
pub fn compile_condition_regex(pattern: &str) -> Result<Regex, MockError> {
    Regex::new(pattern).map_err(|source| MockError::InvalidConditionRegex {
        pattern: pattern.to_string(),
        source,
    })
}

impl RuleCondition {
    /// Whether this condition holds for the request. Never fails; anything
    /// malformed or unknown is a non-match.
    pub fn matches(&self, request: &RequestContext) -> bool {
        let actual = match &self.source {
            ConditionSource::Query { key } => request.query(key).unwrap_or_default().to_string(),
            ConditionSource::Header { key } => request.header(key).unwrap_or_default().to_string(),
            ConditionSource::Body { key } => match key.as_deref().filter(|k| !k.is_empty()) {
                Some(key) => request
                    .json()
                    .and_then(|json| resolve_json_path(json, key))
                    .map(json_to_text)
                    .unwrap_or_default(),
                None => match request.body() {
                    Some(body) => body.to_string(),
                    None => return false,
                },
            },
            ConditionSource::Path => request.path().to_string(),
            ConditionSource::Unknown => return false,
        };

        self.operator.apply(&actual, &self.value)
    }
}

impl ConditionOperator {
    /// Compare the actual request value against the expected condition value.
    pub fn apply(self, actual: &str, expected: &str) -> bool {
        match self {
            ConditionOperator::Equals => actual == expected,
            ConditionOperator::Contains => actual.contains(expected),
            ConditionOperator::StartsWith => actual.starts_with(expected),
            ConditionOperator::EndsWith => actual.ends_with(expected),
            ConditionOperator::Regex => match compile_condition_regex(expected) {
                Ok(regex) => regex.is_match(actual),
                Err(e) => {
                    debug!(error = %e, "Condition regex rejected");
                    false
                }
            },
            ConditionOperator::Exists => !actual.is_empty(),
            ConditionOperator::Unknown => false,
        }
    }
}
