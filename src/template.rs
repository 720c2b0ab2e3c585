//! Template engine for dynamic responses.
//!
//! Expands `{{...}}` placeholders against the incoming request. Each
//! placeholder family is substituted in its own pass over the whole string:
//!
//! | Placeholder                    | Expands to                                   |
//! |--------------------------------|----------------------------------------------|
//! | `{{query.NAME}}`               | query parameter, or empty                    |
//! | `{{path.NAME}}`                | `:NAME` path parameter, or empty             |
//! | `{{header.NAME}}`              | header (case-insensitive), or empty          |
//! | `{{body.PATH}}`                | value at dot path in the JSON body, or empty |
//! | `{{random.number(MIN,MAX)}}`   | integer in `[MIN, MAX]`                      |
//! | `{{random.string(LENGTH)}}`    | `LENGTH` characters from `[A-Za-z0-9]`       |
//! | `{{date.now}}`                 | UTC timestamp, ISO-8601                      |
//! | `{{date.format(FORMAT)}}`      | local time with `YYYY MM DD HH mm ss`        |
//!
//! Body values that are strings render unquoted; any other JSON value renders
//! as compact JSON. When the body is not valid JSON the `body` pass is skipped
//! and those placeholders stay as written. A `date.format` FORMAT cannot
//! contain `)`; such a placeholder is left unexpanded.

use crate::error::TemplateError;
use crate::matcher::extract_path_params;
use crate::request::{json_to_text, resolve_json_path, RequestContext};
use chrono::{Datelike, Local, NaiveDateTime, Timelike, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::{Captures, Regex};
use std::collections::HashMap;
use tracing::warn;

/// Upper bound for `random.string` lengths.
pub const MAX_RANDOM_STRING_LENGTH: usize = 65_536;

/// Request data available to a template.
#[derive(Debug)]
pub struct TemplateContext<'a> {
    request: &'a RequestContext,
    path_params: HashMap<String, String>,
}

impl<'a> TemplateContext<'a> {
    /// Build a context, deriving path parameters by pairing `pattern`
    /// with the actual request path.
    pub fn new(request: &'a RequestContext, pattern: &str) -> Self {
        Self {
            path_params: extract_path_params(pattern, request.path()),
            request,
        }
    }
}

/// Template engine for rendering dynamic responses.
pub struct TemplateEngine {
    query: Regex,
    path: Regex,
    header: Regex,
    body: Regex,
    random_number: Regex,
    random_string: Regex,
    date_now: Regex,
    date_format: Regex,
}

fn placeholder(pattern: &str) -> Regex {
    Regex::new(pattern).expect("placeholder pattern is valid")
}

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        Self {
            query: placeholder(r"\{\{query\.([^{}]+?)\}\}"),
            path: placeholder(r"\{\{path\.([^{}]+?)\}\}"),
            header: placeholder(r"\{\{header\.([^{}]+?)\}\}"),
            body: placeholder(r"\{\{body\.([^{}]+?)\}\}"),
            random_number: placeholder(
                r"\{\{random\.number\(\s*(-?\d+)\s*,\s*(-?\d+)\s*\)\}\}",
            ),
            random_string: placeholder(r"\{\{random\.string\(\s*(\d+)\s*\)\}\}"),
            date_now: placeholder(r"\{\{date\.now\}\}"),
            date_format: placeholder(r"\{\{date\.format\(([^)]*)\)\}\}"),
        }
    }

    /// Expand a template. On any internal failure the template is returned
    /// unchanged and the failure is logged.
    pub fn expand(&self, template: &str, ctx: &TemplateContext<'_>) -> String {
        match self.try_expand(template, ctx) {
            Ok(expanded) => expanded,
            Err(e) => {
                warn!(error = %e, "Template expansion failed, using template as-is");
                template.to_string()
            }
        }
    }

    /// Expand a template, reporting internal failures.
    pub fn try_expand(
        &self,
        template: &str,
        ctx: &TemplateContext<'_>,
    ) -> Result<String, TemplateError> {
        let request = ctx.request;

        let mut out = self
            .query
            .replace_all(template, |caps: &Captures| {
                request.query(&caps[1]).unwrap_or_default().to_string()
            })
            .into_owned();

        out = self
            .path
            .replace_all(&out, |caps: &Captures| {
                ctx.path_params.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned();

        out = self
            .header
            .replace_all(&out, |caps: &Captures| {
                request.header(&caps[1]).unwrap_or_default().to_string()
            })
            .into_owned();

        if let Some(json) = request.json() {
            out = self
                .body
                .replace_all(&out, |caps: &Captures| {
                    resolve_json_path(json, &caps[1])
                        .map(json_to_text)
                        .unwrap_or_default()
                })
                .into_owned();
        }

        out = try_replace_all(&self.random_number, &out, |caps| {
            let min = parse_number::<i64>(&caps[1])?;
            let max = parse_number::<i64>(&caps[2])?;
            if min > max {
                return Err(TemplateError::EmptyRange { min, max });
            }
            Ok(rand::thread_rng().gen_range(min..=max).to_string())
        })?;

        out = try_replace_all(&self.random_string, &out, |caps| {
            let length = parse_number::<usize>(&caps[1])?;
            if length > MAX_RANDOM_STRING_LENGTH {
                return Err(TemplateError::LengthTooLarge {
                    length,
                    limit: MAX_RANDOM_STRING_LENGTH,
                });
            }
            Ok(random_string(length))
        })?;

        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        out = self
            .date_now
            .replace_all(&out, regex::NoExpand(&timestamp))
            .into_owned();

        let now = Local::now().naive_local();
        out = self
            .date_format
            .replace_all(&out, |caps: &Captures| format_date(&caps[1], &now))
            .into_owned();

        Ok(out)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// `replace_all` with a replacer that may fail. The first failure wins.
fn try_replace_all<F>(regex: &Regex, input: &str, mut replace: F) -> Result<String, TemplateError>
where
    F: FnMut(&Captures) -> Result<String, TemplateError>,
{
    let mut failure = None;
    let out = regex.replace_all(input, |caps: &Captures| match replace(caps) {
        Ok(value) => value,
        Err(e) => {
            failure.get_or_insert(e);
            String::new()
        }
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(out.into_owned()),
    }
}

fn parse_number<T: std::str::FromStr>(raw: &str) -> Result<T, TemplateError> {
    raw.parse()
        .map_err(|_| TemplateError::InvalidNumber(raw.to_string()))
}

fn random_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Render `now` against a format using `YYYY`, `MM`, `DD`, `HH`, `mm`, `ss`.
/// Each token is substituted at its first occurrence only.
pub fn format_date(format: &str, now: &NaiveDateTime) -> String {
    let fields = [
        ("YYYY", format!("{:04}", now.year())),
        ("MM", format!("{:02}", now.month())),
        ("DD", format!("{:02}", now.day())),
        ("HH", format!("{:02}", now.hour())),
        ("mm", format!("{:02}", now.minute())),
        ("ss", format!("{:02}", now.second())),
    ];

    fields
        .iter()
        .fold(format.to_string(), |acc, (token, value)| acc.replacen(token, value, 1))
}
