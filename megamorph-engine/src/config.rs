//! Declarative schema configuration
//!
//! A YAML document describing which types are materialized, how references
//! are spelled, and per-type metadata. [`SchemaConfig::build`] turns it into
//! a [`DeclarativeSchema`] that can be registered like any other [`Schema`].

use crate::cache::QueryCacheConfig;
use crate::error::ConfigError;
use crate::schema::{Schema, TypeMetadata};
use megamorph_types::{Attributes, ModelIdentity, RawRecord, Value};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Top-level schema configuration, typically loaded from `schema.yml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Exact type names or `prefix*` patterns; empty includes every type
    #[serde(default)]
    pub included_types: Vec<String>,

    /// String values matching this are references; needs `type` and `id`
    /// named groups
    #[serde(default = "default_reference_pattern")]
    pub reference_pattern: String,

    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,

    #[serde(default)]
    pub query_cache: QueryCacheConfig,
}

fn default_reference_pattern() -> String {
    "^urn:(?P<type>[^:]+):(?P<id>.+)$".to_string()
}

/// Per-type settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Readable attributes; omitted means all
    #[serde(default)]
    pub whitelist: Option<Vec<String>>,

    #[serde(default)]
    pub defaults: HashMap<String, Value>,

    /// Alias name -> target attribute
    #[serde(default)]
    pub aliases: HashMap<String, String>,

    /// Attribute name -> nested model type
    #[serde(default)]
    pub nested: HashMap<String, String>,

    /// Attributes holding arrays of references
    #[serde(default)]
    pub array_references: Vec<String>,
}

impl SchemaConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Compile into a schema
    pub fn build(&self) -> Result<DeclarativeSchema, ConfigError> {
        let reference_pattern = Regex::new(&self.reference_pattern)?;
        for group in ["type", "id"] {
            if !reference_pattern.capture_names().flatten().any(|name| name == group) {
                return Err(ConfigError::MissingCapture(group));
            }
        }

        let mut metadata = HashMap::new();
        let mut nested = HashMap::new();
        let mut array_references = HashMap::new();
        for (model_type, model) in &self.models {
            let mut type_metadata = TypeMetadata::new();
            if let Some(whitelist) = &model.whitelist {
                type_metadata = type_metadata.with_whitelist(whitelist.iter().cloned());
            }
            type_metadata.defaults = model.defaults.clone();
            type_metadata.aliases = model.aliases.clone();
            metadata.insert(model_type.clone(), type_metadata);

            if !model.nested.is_empty() {
                nested.insert(model_type.clone(), model.nested.clone());
            }
            if !model.array_references.is_empty() {
                array_references.insert(
                    model_type.clone(),
                    model.array_references.iter().cloned().collect::<HashSet<_>>(),
                );
            }
        }

        Ok(DeclarativeSchema {
            included: self.included_types.clone(),
            reference_pattern,
            metadata,
            nested,
            array_references,
        })
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        SchemaConfig {
            included_types: Vec::new(),
            reference_pattern: default_reference_pattern(),
            models: HashMap::new(),
            query_cache: QueryCacheConfig::default(),
        }
    }
}

/// Schema compiled from a [`SchemaConfig`]
#[derive(Debug)]
pub struct DeclarativeSchema {
    included: Vec<String>,
    reference_pattern: Regex,
    metadata: HashMap<String, TypeMetadata>,
    nested: HashMap<String, HashMap<String, String>>,
    array_references: HashMap<String, HashSet<String>>,
}

impl DeclarativeSchema {
    /// Attach a raw-value transform to `model_type.key`
    pub fn with_transform<F>(mut self, model_type: &str, key: &str, transform: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let metadata = self.metadata.remove(model_type).unwrap_or_default();
        self.metadata
            .insert(model_type.to_string(), metadata.with_transform(key, transform));
        self
    }
}

impl Schema for DeclarativeSchema {
    fn includes_model(&self, model_type: &str) -> bool {
        self.included.is_empty()
            || self.included.iter().any(|pattern| match pattern.strip_suffix('*') {
                Some(prefix) => model_type.starts_with(prefix),
                None => pattern == model_type,
            })
    }

    fn compute_attribute_reference(&self, _key: &str, value: &Value) -> Option<ModelIdentity> {
        let captures = self.reference_pattern.captures(value.as_str()?)?;
        Some(ModelIdentity::new(&captures["id"], &captures["type"]))
    }

    fn is_array_reference(&self, key: &str, _value: &Value, model_type: &str) -> bool {
        self.array_references
            .get(model_type)
            .is_some_and(|keys| keys.contains(key))
    }

    fn compute_nested_model(
        &self,
        key: &str,
        value: &Value,
        model_type: &str,
    ) -> Option<RawRecord> {
        let nested_type = self.nested.get(model_type)?.get(key)?;
        let Value::Object(object) = value else {
            return None;
        };

        let id = match object.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => key.to_string(),
        };
        let attributes: Attributes = object
            .iter()
            .filter(|(name, _)| name.as_str() != "id" && name.as_str() != "type")
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Some(RawRecord::new(id, nested_type.clone(), attributes))
    }

    fn type_metadata(&self, model_type: &str) -> Option<&TypeMetadata> {
        self.metadata.get(model_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const CONFIG: &str = r#"
included_types: ["book", "author", "com.example.*"]
models:
  book:
    whitelist: [title, author, chapters, related, publisher, rating, name]
    defaults:
      rating: 0
    aliases:
      name: title
    nested:
      publisher: publisher
      chapters: chapter
    array_references: [related]
query_cache:
  max_entries: 16
"#;

    fn schema() -> DeclarativeSchema {
        SchemaConfig::from_yaml(CONFIG).unwrap().build().unwrap()
    }

    #[test]
    fn test_parse_config() {
        let config = SchemaConfig::from_yaml(CONFIG).unwrap();

        assert_eq!(config.reference_pattern, default_reference_pattern());
        assert_eq!(config.query_cache.max_entries, 16);
        let book = &config.models["book"];
        assert_eq!(book.defaults["rating"], json!(0));
        assert_eq!(book.aliases["name"], "title");
        assert_eq!(book.array_references, vec!["related".to_string()]);
    }

    #[test]
    fn test_empty_config_includes_everything() {
        let schema = SchemaConfig::from_yaml("{}").unwrap().build().unwrap();
        assert!(schema.includes_model("anything"));
        assert!(schema.type_metadata("book").is_none());
    }

    #[test]
    fn test_included_types() {
        let schema = schema();
        assert!(schema.includes_model("book"));
        assert!(schema.includes_model("com.example.widget"));
        assert!(!schema.includes_model("magazine"));
        assert!(!schema.includes_model("com.other.widget"));
    }

    #[test]
    fn test_reference_pattern() {
        let schema = schema();
        assert_eq!(
            schema.compute_attribute_reference("author", &json!("urn:author:42")),
            Some(ModelIdentity::new("42", "author"))
        );
        assert!(schema.compute_attribute_reference("title", &json!("Dune")).is_none());
        assert!(schema.compute_attribute_reference("year", &json!(1965)).is_none());
    }

    #[test]
    fn test_nested_descriptor() {
        let schema = schema();
        let descriptor = schema
            .compute_nested_model("publisher", &json!({ "id": 7, "name": "Chilton" }), "book")
            .unwrap();

        assert_eq!(descriptor.identity(), ModelIdentity::new("7", "publisher"));
        assert_eq!(descriptor.attribute("name"), Some(&json!("Chilton")));
        assert!(descriptor.attribute("id").is_none());

        assert!(schema.compute_nested_model("publisher", &json!("Chilton"), "book").is_none());
        assert!(schema.compute_nested_model("title", &json!({}), "book").is_none());
    }

    #[test]
    fn test_array_references_are_per_type() {
        let schema = schema();
        assert!(schema.is_array_reference("related", &Value::Null, "book"));
        assert!(!schema.is_array_reference("related", &Value::Null, "author"));
        assert!(!schema.is_array_reference("title", &json!([]), "book"));
    }

    #[test]
    fn test_with_transform() {
        let schema = schema().with_transform("book", "title", |value| {
            Ok(json!(value.as_str().unwrap_or_default().to_uppercase()))
        });

        let metadata = schema.type_metadata("book").unwrap();
        let transform = metadata.transform("title").unwrap();
        assert_eq!(transform(&json!("dune")).unwrap(), json!("DUNE"));
        assert_eq!(metadata.alias_target("name"), Some("title"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let config = SchemaConfig::from_file(file.path()).unwrap();
        assert_eq!(config.included_types.len(), 3);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SchemaConfig::from_file(dir.path().join("schema.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }

    #[test]
    fn test_invalid_patterns() {
        let config = SchemaConfig {
            reference_pattern: "(".to_string(),
            ..SchemaConfig::default()
        };
        assert!(matches!(config.build(), Err(ConfigError::InvalidPattern(_))));

        let config = SchemaConfig {
            reference_pattern: "^(?P<type>[a-z]+)/(.+)$".to_string(),
            ..SchemaConfig::default()
        };
        assert!(matches!(config.build(), Err(ConfigError::MissingCapture("id"))));
    }
}
