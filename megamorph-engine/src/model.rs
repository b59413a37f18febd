//! The megamorphic model
//!
//! One [`MegamorphicModel`] wraps one record, top-level or nested. Reads go
//! through [`MegamorphicModel::get`], which consults the per-model memo
//! before running the resolver. The state lock is never held while another
//! attribute is resolved, so alias forwarding and nested construction can
//! recurse freely.

use crate::context::ModelContext;
use crate::error::{ModelError, Result};
use crate::memo::{AttributeMemo, Revision};
use crate::resolver::{self, ResolvedValue};
use megamorph_types::{Attributes, ModelIdentity, RawRecord, Value};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Model lifecycle; `Unloaded` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Live,
    Unloaded,
}

/// Distinguishes model instances that share an identity
///
/// A nested model and a top-level record may carry the same identity, and a
/// record reloaded after an unload gets a fresh instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        InstanceId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The memo slot a nested model was built for
struct Parent {
    model: Weak<MegamorphicModel>,
    key: String,
}

struct ModelState {
    attributes: Attributes,
    memo: AttributeMemo,
    revision: Revision,
    lifecycle: Lifecycle,
}

pub struct MegamorphicModel {
    identity: ModelIdentity,
    instance: InstanceId,
    parent: Option<Parent>,
    context: Arc<ModelContext>,
    this: Weak<MegamorphicModel>,
    state: Mutex<ModelState>,
}

impl MegamorphicModel {
    /// Wrap a top-level record
    ///
    /// The model is not entered into any index; use
    /// [`Store::materialize`](crate::store::Store::materialize) for that.
    pub fn new(context: Arc<ModelContext>, record: RawRecord) -> Arc<Self> {
        Self::build(context, record, None)
    }

    /// Build a model embedded in this model's `key` attribute
    pub(crate) fn nested_child(&self, key: &str, descriptor: RawRecord) -> Arc<Self> {
        let parent = Parent {
            model: self.this.clone(),
            key: key.to_string(),
        };
        Self::build(Arc::clone(&self.context), descriptor, Some(parent))
    }

    fn build(context: Arc<ModelContext>, record: RawRecord, parent: Option<Parent>) -> Arc<Self> {
        let RawRecord {
            id,
            model_type,
            attributes,
        } = record;

        Arc::new_cyclic(|this| MegamorphicModel {
            identity: ModelIdentity::new(id, model_type),
            instance: InstanceId::next(),
            parent,
            context,
            this: this.clone(),
            state: Mutex::new(ModelState {
                attributes,
                memo: AttributeMemo::new(),
                revision: Revision(1),
                lifecycle: Lifecycle::Live,
            }),
        })
    }

    pub fn identity(&self) -> &ModelIdentity {
        &self.identity
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }

    pub fn model_type(&self) -> &str {
        &self.identity.model_type
    }

    /// Whether this model was embedded in a parent's payload
    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    pub fn context(&self) -> &Arc<ModelContext> {
        &self.context
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle
    }

    pub fn is_unloaded(&self) -> bool {
        self.lifecycle() == Lifecycle::Unloaded
    }

    /// Read an attribute, resolving and memoizing it on first access
    pub fn get(&self, key: &str) -> Result<ResolvedValue> {
        let schema_revision = self.context.schema_revision();
        let (raw, revision) = {
            let state = self.state.lock();
            self.ensure_live(&state)?;
            if let Some(value) = state.memo.get(key, schema_revision) {
                self.context.metrics().record_memo_hit();
                return Ok(value);
            }
            (state.attributes.get(key).cloned(), state.revision)
        };

        let schema = self.context.schema();
        let metadata = schema.type_metadata(self.model_type());
        let alias = metadata.and_then(|m| m.aliases.contains_key(key).then(|| m.alias_target(key)));

        let resolved = match alias {
            Some(Some(target)) => self.get(target)?,
            Some(None) => ResolvedValue::Absent,
            None => resolver::resolve(self, schema.as_ref(), metadata, key, raw).map_err(|err| {
                self.context.metrics().record_transform_failure();
                err
            })?,
        };
        self.context.metrics().record_resolution();
        debug!(model = %self.identity, key, "attribute resolved");

        self.memoize(key, resolved, revision, schema_revision)
    }

    fn memoize(
        &self,
        key: &str,
        resolved: ResolvedValue,
        revision: Revision,
        schema_revision: Revision,
    ) -> Result<ResolvedValue> {
        let value = {
            let mut state = self.state.lock();
            self.ensure_live(&state)?;
            if state.revision != revision {
                // Written while resolving; the result reflects the old raw value
                return Ok(resolved);
            }
            state.memo.insert(key, resolved, revision, schema_revision)
        };

        for identity in value.referenced_identities() {
            self.context.track_reference(identity, &self.this, key);
        }
        Ok(value)
    }

    /// Overwrite a raw attribute
    ///
    /// Invalidates the memoized value for `key` and for every alias that
    /// resolves to it. Aliases themselves are read-only.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let schema = self.context.schema();
        let metadata = schema.type_metadata(self.model_type());

        if let Some(metadata) = metadata {
            if let Some(direct) = metadata.aliases.get(key) {
                let target = metadata.alias_target(key).unwrap_or(direct.as_str());
                return Err(ModelError::ReadOnlyAlias {
                    key: key.to_string(),
                    target: target.to_string(),
                });
            }
        }

        let aliases: Vec<String> = metadata
            .map(|m| m.aliases_of(key).map(str::to_string).collect())
            .unwrap_or_default();

        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        state.attributes.insert(key.to_string(), value);
        state.revision = state.revision.next();
        state.memo.invalidate(key);
        for alias in &aliases {
            state.memo.invalidate(alias);
        }
        debug!(model = %self.identity, key, revision = %state.revision, "attribute written");
        Ok(())
    }

    /// Replace every raw attribute from a fresh payload
    pub fn update(&self, attributes: Attributes) -> Result<()> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        state.attributes = attributes;
        state.revision = state.revision.next();
        state.memo.clear();
        debug!(model = %self.identity, revision = %state.revision, "attributes replaced");
        Ok(())
    }

    /// Forget the memoized value for `key`
    pub fn invalidate(&self, key: &str) {
        self.state.lock().memo.invalidate(key);
    }

    pub fn is_memoized(&self, key: &str) -> bool {
        self.state.lock().memo.get_entry(key).is_some()
    }

    /// Mark the model terminal and notify listeners; idempotent
    ///
    /// A nested model also drops the parent memo entries that hold it, so the
    /// parent rebuilds the value from its raw payload on the next read.
    pub fn unload(&self) {
        {
            let mut state = self.state.lock();
            if state.lifecycle == Lifecycle::Unloaded {
                return;
            }
            state.lifecycle = Lifecycle::Unloaded;
            state.memo.clear();
        }
        debug!(
            model = %self.identity,
            instance = %self.instance,
            nested = self.is_nested(),
            "model unloaded"
        );
        if let Some(parent) = &self.parent {
            if let Some(owner) = parent.model.upgrade() {
                owner.release_nested(&parent.key, self);
            }
        }
        self.context.notify_unloaded(self);
    }

    /// Drop memo entries for `key` and its aliases that still hold `child`
    fn release_nested(&self, key: &str, child: &MegamorphicModel) {
        let schema = self.context.schema();
        let aliases: Vec<String> = schema
            .type_metadata(self.model_type())
            .map(|m| m.aliases_of(key).map(str::to_string).collect())
            .unwrap_or_default();

        let mut state = self.state.lock();
        let mut released = 0;
        for slot in std::iter::once(key).chain(aliases.iter().map(String::as_str)) {
            let holds = state
                .memo
                .get_entry(slot)
                .is_some_and(|entry| entry.value.holds(child));
            if holds {
                state.memo.invalidate(slot);
                released += 1;
            }
        }
        if released > 0 {
            debug!(model = %self.identity, key, released, "nested model released");
        }
    }

    /// Whether the raw payload carries `key`
    pub fn has_attribute(&self, key: &str) -> Result<bool> {
        let state = self.state.lock();
        self.ensure_live(&state)?;
        Ok(state.attributes.contains_key(key))
    }

    /// Raw attribute names, sorted
    pub fn attribute_names(&self) -> Result<Vec<String>> {
        let state = self.state.lock();
        self.ensure_live(&state)?;
        Ok(state.attributes.keys().cloned().collect())
    }

    /// The raw value behind `key`, after alias forwarding and default
    /// fallback but before transforms and classification
    pub fn raw(&self, key: &str) -> Result<Option<Value>> {
        let schema = self.context.schema();
        let metadata = schema.type_metadata(self.model_type());
        let key = metadata.and_then(|m| m.alias_target(key)).unwrap_or(key);

        let state = self.state.lock();
        self.ensure_live(&state)?;
        Ok(state
            .attributes
            .get(key)
            .or_else(|| metadata.and_then(|m| m.default_for(key)))
            .cloned())
    }

    /// Snapshot of the underlying record
    pub fn to_raw(&self) -> Result<RawRecord> {
        let state = self.state.lock();
        self.ensure_live(&state)?;
        Ok(RawRecord::new(
            self.identity.id.clone(),
            self.identity.model_type.clone(),
            state.attributes.clone(),
        ))
    }

    fn ensure_live(&self, state: &ModelState) -> Result<()> {
        match state.lifecycle {
            Lifecycle::Live => Ok(()),
            Lifecycle::Unloaded => Err(ModelError::StaleAccess {
                identity: self.identity.clone(),
            }),
        }
    }
}

impl fmt::Debug for MegamorphicModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MegamorphicModel")
            .field("identity", &self.identity)
            .field("instance", &self.instance)
            .field("nested", &self.is_nested())
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Schema, SchemaRegistry, TypeMetadata};
    use serde_json::json;

    struct AliasSchema {
        metadata: TypeMetadata,
    }

    impl Schema for AliasSchema {
        fn includes_model(&self, _model_type: &str) -> bool {
            true
        }

        fn type_metadata(&self, model_type: &str) -> Option<&TypeMetadata> {
            (model_type == "book").then_some(&self.metadata)
        }
    }

    fn book(attributes: serde_json::Value) -> Arc<MegamorphicModel> {
        let registry = SchemaRegistry::new(AliasSchema {
            metadata: TypeMetadata::new()
                .with_alias("name", "title")
                .with_alias("loop", "loop")
                .with_default("rating", json!(0)),
        });
        let context = ModelContext::new(Arc::new(registry));
        let attributes = attributes.as_object().cloned().unwrap_or_default();
        MegamorphicModel::new(context, RawRecord::new("1", "book", attributes))
    }

    #[test]
    fn test_scalar_read_and_memo() {
        let model = book(json!({ "title": "Dune" }));

        assert!(!model.is_memoized("title"));
        let value = model.get("title").unwrap();
        assert_eq!(value.as_scalar(), Some(&json!("Dune")));
        assert!(model.is_memoized("title"));
    }

    #[test]
    fn test_set_invalidates_alias() {
        let model = book(json!({ "title": "Dune" }));
        assert_eq!(model.get("name").unwrap().as_scalar(), Some(&json!("Dune")));

        model.set("title", json!("Emma")).unwrap();

        assert!(!model.is_memoized("name"));
        assert_eq!(model.get("name").unwrap().as_scalar(), Some(&json!("Emma")));
    }

    #[test]
    fn test_alias_write_rejected() {
        let model = book(json!({ "title": "Dune" }));
        let err = model.set("name", json!("Emma")).unwrap_err();

        assert_eq!(
            err,
            ModelError::ReadOnlyAlias {
                key: "name".to_string(),
                target: "title".to_string()
            }
        );
        assert_eq!(model.get("title").unwrap().as_scalar(), Some(&json!("Dune")));
    }

    #[test]
    fn test_cyclic_alias_reads_absent() {
        let model = book(json!({ "loop": 1 }));
        assert!(model.get("loop").unwrap().is_absent());
    }

    #[test]
    fn test_raw_applies_alias_and_default() {
        let model = book(json!({ "title": "Dune" }));

        assert_eq!(model.raw("name").unwrap(), Some(json!("Dune")));
        assert_eq!(model.raw("rating").unwrap(), Some(json!(0)));
        assert_eq!(model.raw("missing").unwrap(), None);
        assert!(!model.has_attribute("rating").unwrap());
    }

    #[test]
    fn test_update_replaces_attributes() {
        let model = book(json!({ "title": "Dune", "year": 1965 }));
        model.get("title").unwrap();

        let replacement = json!({ "title": "Emma" }).as_object().cloned().unwrap();
        model.update(replacement).unwrap();

        assert_eq!(model.get("title").unwrap().as_scalar(), Some(&json!("Emma")));
        assert!(model.get("year").unwrap().is_absent());
        assert_eq!(model.attribute_names().unwrap(), vec!["title".to_string()]);
    }

    #[test]
    fn test_unload_is_terminal() {
        let model = book(json!({ "title": "Dune" }));
        model.unload();
        model.unload();

        assert_eq!(model.lifecycle(), Lifecycle::Unloaded);
        assert!(matches!(model.get("title"), Err(ModelError::StaleAccess { .. })));
        assert!(matches!(model.set("title", json!("x")), Err(ModelError::StaleAccess { .. })));
        assert!(model.to_raw().is_err());
    }

    #[test]
    fn test_attribute_names_sorted() {
        let model = book(json!({ "year": 1965, "author": "Herbert", "title": "Dune" }));
        assert_eq!(model.attribute_names().unwrap(), vec!["author", "title", "year"]);
    }

    #[test]
    fn test_instances_are_distinct() {
        let first = book(json!({}));
        let second = book(json!({}));

        assert_eq!(first.identity(), second.identity());
        assert_ne!(first.instance(), second.instance());
    }

    #[test]
    fn test_to_raw_roundtrips_identity() {
        let model = book(json!({ "title": "Dune" }));
        let raw = model.to_raw().unwrap();

        assert_eq!(raw.identity(), *model.identity());
        assert_eq!(raw.attribute("title"), Some(&json!("Dune")));
    }
}
