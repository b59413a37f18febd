//! Shared types for megamorph
//!
//! This crate provides the identity and record shapes exchanged between the
//! normalization layer and the materialization engine.

use serde::{Deserialize, Serialize};
use std::fmt;

pub use serde_json::{Map, Value};

/// Attribute mapping of a normalized record
pub type Attributes = Map<String, Value>;

/// Record identity: id plus type tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelIdentity {
    pub id: String,

    #[serde(rename = "type")]
    pub model_type: String,
}

impl ModelIdentity {
    pub fn new(id: impl Into<String>, model_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model_type: model_type.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model_type(&self) -> &str {
        &self.model_type
    }
}

impl fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model_type, self.id)
    }
}

/// Normalized input record
///
/// This is also the descriptor shape returned by nested-model hooks, where
/// `id` and `type` may be synthesized and need not be globally unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,

    #[serde(rename = "type")]
    pub model_type: String,

    #[serde(default)]
    pub attributes: Attributes,
}

impl RawRecord {
    pub fn new(
        id: impl Into<String>,
        model_type: impl Into<String>,
        attributes: Attributes,
    ) -> Self {
        Self {
            id: id.into(),
            model_type: model_type.into(),
            attributes,
        }
    }

    /// Build a record from a JSON document of the form
    /// `{"id": ..., "type": ..., "attributes": {...}}`
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn identity(&self) -> ModelIdentity {
        ModelIdentity::new(self.id.clone(), self.model_type.clone())
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_display() {
        let identity = ModelIdentity::new("isbn:9780099518471", "com.example.bookstore.Book");
        insta::assert_snapshot!(
            identity.to_string(),
            @"com.example.bookstore.Book:isbn:9780099518471"
        );
    }

    #[test]
    fn test_identity_ordering() {
        let a = ModelIdentity::new("1", "author");
        let b = ModelIdentity::new("2", "author");
        let c = ModelIdentity::new("1", "book");

        assert!(a < b);
        assert!(a < c);
        assert_eq!(a, ModelIdentity::new("1", "author"));
    }

    #[test]
    fn test_record_from_json() {
        let record = RawRecord::from_json(json!({
            "id": "1",
            "type": "book",
            "attributes": { "title": "Dune", "author": "author:7" }
        }))
        .unwrap();

        assert_eq!(record.identity(), ModelIdentity::new("1", "book"));
        assert_eq!(record.attribute("title"), Some(&json!("Dune")));
        assert_eq!(record.attribute("missing"), None);
    }

    #[test]
    fn test_record_without_attributes() {
        let record = RawRecord::from_json(json!({ "id": "1", "type": "book" })).unwrap();
        assert!(record.attributes.is_empty());
    }

    #[test]
    fn test_record_requires_type() {
        assert!(RawRecord::from_json(json!({ "id": "1" })).is_err());
    }
}
