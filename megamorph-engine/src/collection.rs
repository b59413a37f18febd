//! Ordered, identity-stable record collections
//!
//! A [`RecordCollection`] is built once per resolution of an array-valued
//! attribute (or per query result) and shared by `Arc`. Its ordering never
//! changes; a write to the owning attribute discards it and a fresh
//! collection is built on the next read.

use crate::model::MegamorphicModel;
use crate::resolver::ResolvedValue;
use megamorph_types::ModelIdentity;
use std::collections::HashSet;
use std::sync::Arc;

/// Ordered sequence of resolved elements
#[derive(Debug, Default)]
pub struct RecordCollection {
    elements: Vec<ResolvedValue>,
    depends_on: HashSet<ModelIdentity>,
}

impl RecordCollection {
    pub fn new(elements: Vec<ResolvedValue>) -> Self {
        let depends_on = elements
            .iter()
            .filter_map(ResolvedValue::as_model)
            .map(|model| model.identity().clone())
            .collect();

        RecordCollection {
            elements,
            depends_on,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a query-result collection from loaded models
    pub fn from_models<I>(models: I) -> Self
    where
        I: IntoIterator<Item = Arc<MegamorphicModel>>,
    {
        Self::new(models.into_iter().map(ResolvedValue::Model).collect())
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ResolvedValue> {
        self.elements.get(index)
    }

    /// Iterate the elements in source order; restartable
    pub fn iter(&self) -> std::slice::Iter<'_, ResolvedValue> {
        self.elements.iter()
    }

    /// Loaded model elements, in order
    pub fn models(&self) -> impl Iterator<Item = &Arc<MegamorphicModel>> {
        self.elements.iter().filter_map(ResolvedValue::as_model)
    }

    /// Identities of every model element
    pub fn depends_on(&self) -> &HashSet<ModelIdentity> {
        &self.depends_on
    }

    pub fn contains_member(&self, identity: &ModelIdentity) -> bool {
        self.depends_on.contains(identity)
    }
}

impl<'a> IntoIterator for &'a RecordCollection {
    type Item = &'a ResolvedValue;
    type IntoIter = std::slice::Iter<'a, ResolvedValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}
