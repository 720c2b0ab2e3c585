//! Incoming request view used by rule conditions and templates.

use crate::config::Header;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use url::Url;

/// Base used to resolve relative URLs such as `/api/users?page=2`.
const RELATIVE_BASE: &str = "http://localhost";

/// A fully resolved outgoing request as built by the host tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Parsed view of a request: path, query parameters, headers and body.
#[derive(Debug, Clone)]
pub struct RequestContext {
    path: String,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    body: Option<String>,
    json: Option<Value>,
}

impl RequestContext {
    pub fn new(url: &str, headers: &[Header], body: Option<&str>) -> Self {
        let (path, query) = split_url(url);

        // Later duplicates win, as with a plain object built from the list.
        let headers = headers
            .iter()
            .map(|h| (h.key.to_lowercase(), h.value.clone()))
            .collect();

        let json = body.and_then(|b| serde_json::from_str(b).ok());

        Self {
            path,
            query,
            headers,
            body: body.map(String::from),
            json,
        }
    }

    /// Request path, without query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// First value of the named query parameter.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Raw body text.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// The body parsed as JSON, if it is valid JSON.
    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }
}

/// Split a URL into its path and first-wins query parameters.
fn split_url(raw: &str) -> (String, HashMap<String, String>) {
    let parsed = Url::parse(raw)
        .or_else(|_| Url::parse(RELATIVE_BASE).and_then(|base| base.join(raw)));

    match parsed {
        Ok(url) => {
            let mut query = HashMap::new();
            for (key, value) in url.query_pairs() {
                query.entry(key.into_owned()).or_insert_with(|| value.into_owned());
            }
            (url.path().to_string(), query)
        }
        Err(_) => {
            let path = raw.split(['?', '#']).next().unwrap_or_default();
            (path.to_string(), HashMap::new())
        }
    }
}

/// Resolve a dot-separated property path (`user.name`, `items.0.id`).
pub fn resolve_json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a JSON value as text. Strings are unquoted; everything else is
/// compact JSON.
pub fn json_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
