//! Identity map of loaded top-level models
//!
//! Serves as the [`RecordIndex`] for reference resolution and drops models as
//! they unload.

use crate::context::RecordIndex;
use crate::invalidation::UnloadListener;
use crate::model::MegamorphicModel;
use dashmap::DashMap;
use megamorph_types::ModelIdentity;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct IdentityMap {
    models: DashMap<ModelIdentity, Arc<MegamorphicModel>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a model, returning the one it displaced
    pub fn insert(&self, model: Arc<MegamorphicModel>) -> Option<Arc<MegamorphicModel>> {
        self.models.insert(model.identity().clone(), model)
    }

    pub fn get(&self, identity: &ModelIdentity) -> Option<Arc<MegamorphicModel>> {
        self.models.get(identity).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, identity: &ModelIdentity) -> bool {
        self.models.contains_key(identity)
    }

    /// Snapshot of every loaded identity
    pub fn identities(&self) -> Vec<ModelIdentity> {
        self.models.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl RecordIndex for IdentityMap {
    fn lookup(&self, identity: &ModelIdentity) -> Option<Arc<MegamorphicModel>> {
        self.get(identity)
    }
}

impl UnloadListener for IdentityMap {
    fn on_unload(&self, model: &MegamorphicModel) {
        // A nested model may share an identity with a live top-level record
        let removed = self
            .models
            .remove_if(model.identity(), |_, entry| std::ptr::eq(Arc::as_ptr(entry), model))
            .is_some();
        if removed {
            debug!(identity = %model.identity(), "dropped from identity map");
        }
    }
}
