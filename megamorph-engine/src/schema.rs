//! Schema hooks and per-type metadata
//!
//! A [`Schema`] answers the classification questions the resolver asks for
//! every attribute read. All hooks are partial: returning `None` or `false`
//! means "not applicable", never an error.
//!
//! The [`SchemaRegistry`] holds the single active schema. Registering a new
//! schema replaces the previous one wholesale and bumps the registry
//! revision, which invalidates memoized attribute resolutions lazily.

use crate::memo::Revision;
use megamorph_types::{ModelIdentity, RawRecord, Value};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Raw-value transform applied before classification
pub type Transform = Arc<dyn Fn(&Value) -> anyhow::Result<Value> + Send + Sync>;

/// Classification hooks for schema-less models
pub trait Schema: Send + Sync {
    /// Whether records of this type are materialized by the engine
    fn includes_model(&self, model_type: &str) -> bool;

    /// Identify `value` as a reference to another record
    fn compute_attribute_reference(&self, _key: &str, _value: &Value) -> Option<ModelIdentity> {
        None
    }

    /// Whether `value` (possibly `null`) is an array of references
    fn is_array_reference(&self, _key: &str, _value: &Value, _model_type: &str) -> bool {
        false
    }

    /// Identify `value` as an embedded record
    fn compute_nested_model(
        &self,
        _key: &str,
        _value: &Value,
        _model_type: &str,
    ) -> Option<RawRecord> {
        None
    }

    /// Metadata overlay for a type; `None` means fully permissive
    fn type_metadata(&self, _model_type: &str) -> Option<&TypeMetadata> {
        None
    }
}

/// Schema that includes every type and classifies every value as a scalar
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughSchema;

impl Schema for PassthroughSchema {
    fn includes_model(&self, _model_type: &str) -> bool {
        true
    }
}

/// Per-type whitelist, defaults, aliases and transforms
#[derive(Clone, Default)]
pub struct TypeMetadata {
    /// Readable attribute names; `None` allows everything
    pub attribute_whitelist: Option<HashSet<String>>,

    /// Values used when the payload omits a key
    pub defaults: HashMap<String, Value>,

    /// Read-only alias name -> target name
    pub aliases: HashMap<String, String>,

    /// Raw-value transforms keyed by attribute name
    pub transforms: HashMap<String, Transform>,
}

impl TypeMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_whitelist<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attribute_whitelist = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(key.into(), value);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), target.into());
        self
    }

    pub fn with_transform<F>(mut self, key: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.transforms.insert(key.into(), Arc::new(transform));
        self
    }

    /// Whether the whitelist (if any) admits `key`
    pub fn allows(&self, key: &str) -> bool {
        self.attribute_whitelist
            .as_ref()
            .map_or(true, |names| names.contains(key))
    }

    pub fn default_for(&self, key: &str) -> Option<&Value> {
        self.defaults.get(key)
    }

    pub fn transform(&self, key: &str) -> Option<&Transform> {
        self.transforms.get(key)
    }

    /// Follow the alias chain starting at `key` to a non-alias name
    ///
    /// Returns `None` when `key` is not an alias or the chain loops.
    pub fn alias_target(&self, key: &str) -> Option<&str> {
        let mut target = self.aliases.get(key)?.as_str();
        let mut seen = HashSet::from([key]);
        while let Some(next) = self.aliases.get(target) {
            if !seen.insert(target) {
                return None;
            }
            target = next.as_str();
        }
        if seen.contains(target) {
            return None;
        }
        Some(target)
    }

    /// Every alias whose chain ends at `target`
    pub fn aliases_of<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.aliases
            .keys()
            .map(String::as_str)
            .filter(move |alias| self.alias_target(alias) == Some(target))
    }
}

impl fmt::Debug for TypeMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut transforms: Vec<_> = self.transforms.keys().collect();
        transforms.sort();
        f.debug_struct("TypeMetadata")
            .field("attribute_whitelist", &self.attribute_whitelist)
            .field("defaults", &self.defaults)
            .field("aliases", &self.aliases)
            .field("transforms", &transforms)
            .finish()
    }
}

/// Holder of the single active schema
pub struct SchemaRegistry {
    active: RwLock<Arc<dyn Schema>>,
    revision: AtomicU64,
}

impl SchemaRegistry {
    /// Create a registry with an initial schema
    pub fn new<S: Schema + 'static>(schema: S) -> Self {
        Self::from_arc(Arc::new(schema))
    }

    pub fn from_arc(schema: Arc<dyn Schema>) -> Self {
        SchemaRegistry {
            active: RwLock::new(schema),
            revision: AtomicU64::new(1),
        }
    }

    /// Replace the active schema (last writer wins)
    pub fn register<S: Schema + 'static>(&self, schema: S) {
        self.register_arc(Arc::new(schema));
    }

    pub fn register_arc(&self, schema: Arc<dyn Schema>) {
        *self.active.write() = schema;
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        info!(revision, "schema registered");
    }

    /// The active schema
    pub fn current(&self) -> Arc<dyn Schema> {
        Arc::clone(&self.active.read())
    }

    /// Revision of the active schema, bumped on every registration
    pub fn revision(&self) -> Revision {
        Revision(self.revision.load(Ordering::SeqCst))
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new(PassthroughSchema)
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}
