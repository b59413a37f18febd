//! Error types for the materialization engine

use megamorph_types::ModelIdentity;
use thiserror::Error;

/// Errors raised while reading or writing model attributes
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    /// A registered transform rejected the raw value
    #[error("Transform for {model_type}.{key} failed: {message}")]
    TransformFailure {
        model_type: String,
        key: String,
        message: String,
    },

    /// The model was unloaded
    #[error("Model {identity} has been unloaded")]
    StaleAccess { identity: ModelIdentity },

    /// Aliases are read-only
    #[error("Attribute {key} is an alias of {target} and cannot be written")]
    ReadOnlyAlias { key: String, target: String },

    /// The active schema does not include this type
    #[error("Type {model_type} is not included by the active schema")]
    NotIncluded { model_type: String },
}

/// Errors surfaced by the query result cache
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// The fetcher rejected
    #[error("Fetch failed{}: {message}", key_suffix(.cache_key))]
    Fetch {
        cache_key: Option<String>,
        message: String,
    },
}

fn key_suffix(cache_key: &Option<String>) -> String {
    cache_key
        .as_ref()
        .map(|key| format!(" for {key}"))
        .unwrap_or_default()
}

impl QueryError {
    pub(crate) fn fetch(cache_key: Option<&str>, err: anyhow::Error) -> Self {
        QueryError::Fetch {
            cache_key: cache_key.map(str::to_string),
            message: format!("{err:#}"),
        }
    }
}

/// Errors loading a declarative schema configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read schema config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid reference pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Reference pattern is missing the `{0}` capture group")]
    MissingCapture(&'static str),
}

/// Result type using ModelError
pub type Result<T> = std::result::Result<T, ModelError>;

/// Result type using QueryError
pub type QueryResult<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_message() {
        let keyed = QueryError::fetch(Some("books"), anyhow::anyhow!("connection reset"));
        assert_eq!(keyed.to_string(), "Fetch failed for books: connection reset");

        let unkeyed = QueryError::fetch(None, anyhow::anyhow!("timeout"));
        assert_eq!(unkeyed.to_string(), "Fetch failed: timeout");
    }

    #[test]
    fn test_stale_access_message() {
        let err = ModelError::StaleAccess {
            identity: ModelIdentity::new("1", "book"),
        };
        assert_eq!(err.to_string(), "Model book:1 has been unloaded");
    }
}
