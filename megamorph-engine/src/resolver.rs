//! Attribute resolution
//!
//! Turns one raw attribute value into a [`ResolvedValue`]. The pipeline is:
//!
//! ```text
//! whitelist → raw lookup / default → transform → classify
//! ```
//!
//! Classification precedence is nested model, array reference, scalar
//! reference, mixed array of references, scalar. Alias forwarding happens in
//! the model before this module is reached, so that an alias shares the
//! memoized value of its target.

use crate::collection::RecordCollection;
use crate::error::{ModelError, Result};
use crate::model::MegamorphicModel;
use crate::schema::{Schema, TypeMetadata};
use megamorph_types::{ModelIdentity, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Placeholder for a reference whose target is not loaded
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnresolvedReference {
    identity: ModelIdentity,
}

impl UnresolvedReference {
    pub fn new(identity: ModelIdentity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &ModelIdentity {
        &self.identity
    }
}

/// Outcome of reading one attribute
#[derive(Debug, Clone)]
pub enum ResolvedValue {
    /// Not readable: filtered by the whitelist or missing with no default
    Absent,

    /// Plain (possibly transformed) value
    Scalar(Value),

    /// A loaded referenced model or an embedded nested model
    Model(Arc<MegamorphicModel>),

    /// Reference to a record that is not currently loaded
    Unloaded(Arc<UnresolvedReference>),

    /// Array of references or nested models
    Collection(Arc<RecordCollection>),
}

impl ResolvedValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, ResolvedValue::Absent)
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            ResolvedValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_model(&self) -> Option<&Arc<MegamorphicModel>> {
        match self {
            ResolvedValue::Model(model) => Some(model),
            _ => None,
        }
    }

    pub fn as_unloaded(&self) -> Option<&Arc<UnresolvedReference>> {
        match self {
            ResolvedValue::Unloaded(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Arc<RecordCollection>> {
        match self {
            ResolvedValue::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    /// Identity check: the same instance for models, placeholders and
    /// collections, equal values for scalars
    pub fn same_as(&self, other: &ResolvedValue) -> bool {
        match (self, other) {
            (ResolvedValue::Absent, ResolvedValue::Absent) => true,
            (ResolvedValue::Scalar(a), ResolvedValue::Scalar(b)) => a == b,
            (ResolvedValue::Model(a), ResolvedValue::Model(b)) => Arc::ptr_eq(a, b),
            (ResolvedValue::Unloaded(a), ResolvedValue::Unloaded(b)) => Arc::ptr_eq(a, b),
            (ResolvedValue::Collection(a), ResolvedValue::Collection(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Identities of top-level records this value points at, loaded or not
    ///
    /// Nested models are owned by the value and are not included.
    pub fn referenced_identities(&self) -> Vec<ModelIdentity> {
        match self {
            ResolvedValue::Model(model) if !model.is_nested() => vec![model.identity().clone()],
            ResolvedValue::Unloaded(reference) => vec![reference.identity().clone()],
            ResolvedValue::Collection(collection) => collection
                .iter()
                .flat_map(ResolvedValue::referenced_identities)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether this value is `model` or a collection containing it
    pub fn holds(&self, model: &MegamorphicModel) -> bool {
        let is = |candidate: &Arc<MegamorphicModel>| std::ptr::eq(Arc::as_ptr(candidate), model);
        match self {
            ResolvedValue::Model(candidate) => is(candidate),
            ResolvedValue::Collection(collection) => collection.models().any(is),
            _ => false,
        }
    }
}

/// Resolve `key` on `owner` from its raw value (alias already handled)
pub(crate) fn resolve(
    owner: &MegamorphicModel,
    schema: &dyn Schema,
    metadata: Option<&TypeMetadata>,
    key: &str,
    raw: Option<Value>,
) -> Result<ResolvedValue> {
    if let Some(metadata) = metadata {
        if !metadata.allows(key) {
            debug!(model = %owner.identity(), key, "attribute not whitelisted");
            return Ok(ResolvedValue::Absent);
        }
    }

    let value = raw.or_else(|| metadata.and_then(|m| m.default_for(key)).cloned());

    let value = match (value, metadata.and_then(|m| m.transform(key))) {
        (Some(value), Some(transform)) => Some(transform(&value).map_err(|err| {
            warn!(model = %owner.identity(), key, error = %err, "attribute transform failed");
            ModelError::TransformFailure {
                model_type: owner.model_type().to_string(),
                key: key.to_string(),
                message: format!("{err:#}"),
            }
        })?),
        (value, _) => value,
    };

    Ok(classify(owner, schema, key, value))
}

fn classify(
    owner: &MegamorphicModel,
    schema: &dyn Schema,
    key: &str,
    value: Option<Value>,
) -> ResolvedValue {
    let model_type = owner.model_type();

    let Some(value) = value else {
        if schema.is_array_reference(key, &Value::Null, model_type) {
            return collection(Vec::new());
        }
        return ResolvedValue::Absent;
    };

    if let Some(descriptor) = schema.compute_nested_model(key, &value, model_type) {
        return ResolvedValue::Model(owner.nested_child(key, descriptor));
    }

    if let Value::Array(items) = &value {
        let descriptors: Vec<_> = items
            .iter()
            .map(|item| schema.compute_nested_model(key, item, model_type))
            .collect();

        if descriptors.iter().any(Option::is_some) {
            let elements = items
                .iter()
                .zip(descriptors)
                .map(|(item, descriptor)| match descriptor {
                    Some(descriptor) => ResolvedValue::Model(owner.nested_child(key, descriptor)),
                    None => reference_or_scalar(owner, schema, key, item),
                })
                .collect();
            return collection(elements);
        }
    }

    if schema.is_array_reference(key, &value, model_type) {
        let elements = match &value {
            Value::Null => Vec::new(),
            Value::Array(items) => items
                .iter()
                .map(|item| reference_or_null(owner, schema, key, item))
                .collect(),
            single => vec![reference_or_null(owner, schema, key, single)],
        };
        return collection(elements);
    }

    if let Some(identity) = schema.compute_attribute_reference(key, &value) {
        return lookup(owner, identity);
    }

    if let Value::Array(items) = &value {
        let references: Vec<_> = items
            .iter()
            .map(|item| schema.compute_attribute_reference(key, item))
            .collect();

        if references.iter().any(Option::is_some) {
            let elements = items
                .iter()
                .zip(references)
                .map(|(item, reference)| match reference {
                    Some(identity) => lookup(owner, identity),
                    None => ResolvedValue::Scalar(item.clone()),
                })
                .collect();
            return collection(elements);
        }
    }

    ResolvedValue::Scalar(value)
}

fn reference_or_null(
    owner: &MegamorphicModel,
    schema: &dyn Schema,
    key: &str,
    item: &Value,
) -> ResolvedValue {
    match schema.compute_attribute_reference(key, item) {
        Some(identity) => lookup(owner, identity),
        None => ResolvedValue::Scalar(Value::Null),
    }
}

fn reference_or_scalar(
    owner: &MegamorphicModel,
    schema: &dyn Schema,
    key: &str,
    item: &Value,
) -> ResolvedValue {
    match schema.compute_attribute_reference(key, item) {
        Some(identity) => lookup(owner, identity),
        None => ResolvedValue::Scalar(item.clone()),
    }
}

fn lookup(owner: &MegamorphicModel, identity: ModelIdentity) -> ResolvedValue {
    match owner.context().lookup(&identity) {
        Some(model) => ResolvedValue::Model(model),
        None => ResolvedValue::Unloaded(Arc::new(UnresolvedReference::new(identity))),
    }
}

fn collection(elements: Vec<ResolvedValue>) -> ResolvedValue {
    ResolvedValue::Collection(Arc::new(RecordCollection::new(elements)))
}
