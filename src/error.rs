//! Error types for the mock engine.

use thiserror::Error;

/// Errors surfaced by the registry and pattern compilation.
///
/// Request dispatch never returns these; a broken mock degrades to "no match".
#[derive(Debug, Error)]
pub enum MockError {
    #[error("unknown mock: {0}")]
    UnknownMock(String),

    #[error("invalid path pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid condition regex {pattern:?}: {source}")]
    InvalidConditionRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Internal template failures. `TemplateEngine::expand` swallows these and
/// returns the template unchanged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("random.number range is empty: {min} > {max}")]
    EmptyRange { min: i64, max: i64 },

    #[error("not a valid integer: {0:?}")]
    InvalidNumber(String),

    #[error("random.string length {length} exceeds limit {limit}")]
    LengthTooLarge { length: usize, limit: usize },
}
