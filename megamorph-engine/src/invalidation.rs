//! Unload notifications and reference invalidation
//!
//! When a model unloads, three parties must react: the identity index drops
//! it, the query cache evicts entries containing it, and every model that
//! memoized a reference to it forgets that attribute. The first two subscribe
//! as [`UnloadListener`]s; the third is handled by the [`ReferenceTracker`],
//! a reverse-dependency table from a referenced identity to the
//! `(holder, attribute)` pairs whose memo entries mention it.
//!
//! Listeners receive the model itself rather than its identity: a nested
//! model may share an identity with a live top-level record, and only the
//! instance tells them apart.

use crate::model::MegamorphicModel;
use dashmap::DashMap;
use megamorph_types::ModelIdentity;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Observer of model unloads
pub trait UnloadListener: Send + Sync {
    fn on_unload(&self, model: &MegamorphicModel);
}

/// A memo entry that mentions some identity
#[derive(Debug, Clone)]
struct Holder {
    model: Weak<MegamorphicModel>,
    key: String,
}

impl Holder {
    fn is(&self, model: &Weak<MegamorphicModel>, key: &str) -> bool {
        self.key == key && Weak::ptr_eq(&self.model, model)
    }

    fn is_live(&self) -> bool {
        self.model.upgrade().is_some_and(|model| !model.is_unloaded())
    }
}

/// Reverse references: identity -> memo entries that resolved to it
#[derive(Debug, Default)]
pub struct ReferenceTracker {
    holders: DashMap<ModelIdentity, Vec<Holder>>,
}

impl ReferenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `holder.key` resolved to (or through) `identity`
    pub fn track(&self, identity: ModelIdentity, holder: &Weak<MegamorphicModel>, key: &str) {
        let mut holders = self.holders.entry(identity).or_default();
        holders.retain(Holder::is_live);
        if !holders.iter().any(|h| h.is(holder, key)) {
            holders.push(Holder {
                model: holder.clone(),
                key: key.to_string(),
            });
        }
    }

    /// Drop every memo entry that mentions `identity`
    ///
    /// Returns the number of attributes invalidated.
    pub fn invalidate(&self, identity: &ModelIdentity) -> usize {
        let Some((_, holders)) = self.holders.remove(identity) else {
            return 0;
        };

        let mut invalidated = 0;
        for holder in holders {
            if let Some(model) = holder.model.upgrade() {
                model.invalidate(&holder.key);
                invalidated += 1;
            }
        }
        debug!(%identity, invalidated, "invalidated references");
        invalidated
    }

    /// Drop holders that were freed or unloaded, and identities left with
    /// none; returns the number of identities removed
    pub fn sweep(&self) -> usize {
        let before = self.holders.len();
        self.holders.retain(|_, holders| {
            holders.retain(Holder::is_live);
            !holders.is_empty()
        });
        before.saturating_sub(self.holders.len())
    }

    /// Number of identities with tracked holders
    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }
}

/// Fan-out list of weakly held unload listeners
#[derive(Default)]
pub struct UnloadBus {
    listeners: parking_lot::RwLock<Vec<Weak<dyn UnloadListener>>>,
}

impl UnloadBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Weak<dyn UnloadListener>) {
        self.listeners.write().push(listener);
    }

    /// Notify live listeners, pruning dropped ones
    pub fn publish(&self, model: &MegamorphicModel) {
        let live: Vec<Arc<dyn UnloadListener>> = {
            let mut listeners = self.listeners.write();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener.on_unload(model);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl std::fmt::Debug for UnloadBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnloadBus")
            .field("listeners", &self.len())
            .finish()
    }
}
