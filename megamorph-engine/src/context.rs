//! Shared wiring for materialized models
//!
//! Every model holds an `Arc<ModelContext>`. The context gives resolution
//! access to the schema registry and the identity index, and routes
//! load/unload notifications. The index is held weakly: the index owns
//! models, models own the context, so a strong handle here would form a
//! cycle.

use crate::invalidation::{ReferenceTracker, UnloadBus, UnloadListener};
use crate::memo::Revision;
use crate::metrics::EngineMetrics;
use crate::model::MegamorphicModel;
use crate::schema::{Schema, SchemaRegistry};
use megamorph_types::ModelIdentity;
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Global lookup hook used to resolve references
pub trait RecordIndex: Send + Sync {
    /// The live model with this identity, if loaded
    fn lookup(&self, identity: &ModelIdentity) -> Option<Arc<MegamorphicModel>>;
}

pub struct ModelContext {
    registry: Arc<SchemaRegistry>,
    index: RwLock<Option<Weak<dyn RecordIndex>>>,
    unload_bus: UnloadBus,
    references: ReferenceTracker,
    metrics: Arc<EngineMetrics>,
}

impl ModelContext {
    pub fn new(registry: Arc<SchemaRegistry>) -> Arc<Self> {
        Self::with_metrics(registry, Arc::new(EngineMetrics::new()))
    }

    pub fn with_metrics(registry: Arc<SchemaRegistry>, metrics: Arc<EngineMetrics>) -> Arc<Self> {
        Arc::new(ModelContext {
            registry,
            index: RwLock::new(None),
            unload_bus: UnloadBus::new(),
            references: ReferenceTracker::new(),
            metrics,
        })
    }

    /// Attach the index used for reference lookups
    pub fn attach_index(&self, index: Weak<dyn RecordIndex>) {
        *self.index.write() = Some(index);
    }

    /// Subscribe to unload notifications
    pub fn subscribe(&self, listener: Weak<dyn UnloadListener>) {
        self.unload_bus.subscribe(listener);
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn schema(&self) -> Arc<dyn Schema> {
        self.registry.current()
    }

    pub fn schema_revision(&self) -> Revision {
        self.registry.revision()
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Look up a live model through the attached index
    pub fn lookup(&self, identity: &ModelIdentity) -> Option<Arc<MegamorphicModel>> {
        let index = self.index.read().as_ref()?.upgrade()?;
        index.lookup(identity).filter(|model| !model.is_unloaded())
    }

    pub(crate) fn track_reference(
        &self,
        identity: ModelIdentity,
        holder: &Weak<MegamorphicModel>,
        key: &str,
    ) {
        self.references.track(identity, holder, key);
    }

    /// A record with this identity became loaded; cached placeholders
    /// pointing at it are stale
    pub fn notify_loaded(&self, identity: &ModelIdentity) {
        let invalidated = self.references.invalidate(identity);
        if invalidated > 0 {
            debug!(%identity, invalidated, "loaded record replaces placeholders");
        }
    }

    /// A model unloaded
    ///
    /// Holders of a top-level identity forget their references. Listeners
    /// see every unload and decide by instance whether it concerns them.
    pub(crate) fn notify_unloaded(&self, model: &MegamorphicModel) {
        if !model.is_nested() {
            self.references.invalidate(model.identity());
        }
        let swept = self.references.sweep();
        if swept > 0 {
            debug!(swept, "pruned dead reference holders");
        }
        self.unload_bus.publish(model);
    }

    /// Number of identities with tracked holders
    pub fn tracked_references(&self) -> usize {
        self.references.len()
    }
}

impl fmt::Debug for ModelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelContext")
            .field("registry", &self.registry)
            .field("unload_bus", &self.unload_bus)
            .field("tracked_references", &self.references.len())
            .finish_non_exhaustive()
    }
}
