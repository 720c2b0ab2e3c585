//! Configuration for the mock engine.
//!
//! Defines mock configurations, conditional rules and engine settings. The
//! serialized shape is camelCase so mocks saved by the host tool load as-is.

use crate::matcher::{compile_condition_regex, PathPattern};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// File-level configuration: the mock catalog plus engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MockServerConfig {
    /// Every known mock configuration
    #[serde(default)]
    pub mocks: Vec<MockConfiguration>,

    /// Id of the mock to activate on startup
    #[serde(default)]
    pub active: Option<String>,

    /// Engine settings
    #[serde(default)]
    pub settings: EngineSettings,
}

impl MockServerConfig {
    /// Load configuration from a YAML or JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for (i, mock) in self.mocks.iter().enumerate() {
            mock.validate()
                .map_err(|e| anyhow::anyhow!("Mock {} ({}): {}", i, mock.id, e))?;
            if !seen.insert(mock.id.as_str()) {
                anyhow::bail!("Duplicate mock id: {}", mock.id);
            }
        }
        if let Some(active) = &self.active {
            if !seen.contains(active.as_str()) {
                anyhow::bail!("Active mock {} is not defined", active);
            }
        }
        if self.settings.log_capacity == 0 {
            anyhow::bail!("logCapacity must be at least 1");
        }
        Ok(())
    }
}

/// A single key/value header pair. Order is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    pub value: String,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A path+method scoped substitute for a real endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockConfiguration {
    /// Unique identifier
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Path pattern, e.g. `/api/users/:id` or `/api/**`
    pub path: String,

    /// HTTP method
    #[serde(default = "default_method")]
    pub method: String,

    /// Default status code
    #[serde(default = "default_status")]
    pub status_code: u16,

    /// Delay before the default response, in milliseconds
    #[serde(default)]
    pub delay: u64,

    /// Default response headers
    #[serde(default)]
    pub headers: Vec<Header>,

    /// Default response body
    #[serde(default)]
    pub body: String,

    /// Conditional overrides, evaluated in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<MockRule>,

    /// Expand `response_template` instead of returning `body`
    #[serde(default)]
    pub dynamic_response: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_template: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_status() -> u16 {
    200
}

impl MockConfiguration {
    /// Starter mock handed to the operator when a new mock is created.
    pub fn new(name: impl Into<String>) -> Self {
        let body = serde_json::json!({ "message": "This is a mock response" });
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            path: "/api/mock".to_string(),
            method: default_method(),
            status_code: default_status(),
            delay: 0,
            headers: vec![Header::new("Content-Type", "application/json")],
            body: serde_json::to_string_pretty(&body).unwrap_or_default(),
            rules: Vec::new(),
            dynamic_response: false,
            response_template: None,
        }
    }

    /// Validate the mock configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id.is_empty() {
            anyhow::bail!("Mock id cannot be empty");
        }
        validate_status(self.status_code)?;
        PathPattern::compile(&self.path)?;
        for rule in &self.rules {
            rule.validate()
                .map_err(|e| anyhow::anyhow!("Rule {}: {}", rule.id, e))?;
        }
        Ok(())
    }
}

fn validate_status(status: u16) -> anyhow::Result<()> {
    if !(100..=599).contains(&status) {
        anyhow::bail!("Invalid status code: {}", status);
    }
    Ok(())
}

/// A conditional override within a mock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockRule {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub condition: RuleCondition,

    pub response: RuleResponse,
}

impl MockRule {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_status(self.response.status_code)?;
        if self.condition.operator == ConditionOperator::Regex {
            compile_condition_regex(&self.condition.value)?;
        }
        Ok(())
    }
}

/// Which part of the request a condition inspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConditionSource {
    /// Query parameter named `key`
    Query {
        #[serde(default)]
        key: String,
    },
    /// Header named `key`, case-insensitive
    Header {
        #[serde(default)]
        key: String,
    },
    /// Dot path into the JSON body, or the raw body when `key` is absent
    Body {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    /// The request path
    Path,
    /// Anything this engine does not understand. Never matches.
    #[serde(other)]
    Unknown,
}

/// Comparison applied between the actual value and `RuleCondition::value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    Exists,
    /// Never matches.
    #[serde(other)]
    Unknown,
}

/// A single rule condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCondition {
    #[serde(flatten)]
    pub source: ConditionSource,

    #[serde(default)]
    pub value: String,

    pub operator: ConditionOperator,
}

/// Response returned when a rule matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResponse {
    #[serde(default = "default_status")]
    pub status_code: u16,

    #[serde(default)]
    pub headers: Vec<Header>,

    #[serde(default)]
    pub body: String,

    /// Delay in milliseconds
    #[serde(default)]
    pub delay: u64,
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineSettings {
    /// Maximum number of retained log entries
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    /// Emit a tracing event for every mocked request
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Emit a tracing event for requests that fall through
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            log_capacity: default_log_capacity(),
            log_matches: true,
            log_unmatched: true,
        }
    }
}

fn default_log_capacity() -> usize {
    100
}

fn default_true() -> bool {
    true
}
