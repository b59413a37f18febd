//! Store facade
//!
//! Wires a schema registry, model context, identity map and query cache
//! together. Most applications only need this type.

use crate::cache::{QueryCache, QueryCacheConfig, QueryOptions, QueryValue};
use crate::collection::RecordCollection;
use crate::config::SchemaConfig;
use crate::context::ModelContext;
use crate::error::{ConfigError, ModelError, QueryResult, Result};
use crate::identity_map::IdentityMap;
use crate::metrics::EngineMetrics;
use crate::model::MegamorphicModel;
use crate::schema::{PassthroughSchema, Schema, SchemaRegistry};
use megamorph_types::{ModelIdentity, RawRecord};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct Store {
    registry: Arc<SchemaRegistry>,
    context: Arc<ModelContext>,
    identity_map: Arc<IdentityMap>,
    query_cache: QueryCache,
    metrics: Arc<EngineMetrics>,
}

impl Store {
    /// Store with a schema that includes every type and has no references
    pub fn new() -> Self {
        Self::with_schema(PassthroughSchema)
    }

    pub fn with_schema<S: Schema + 'static>(schema: S) -> Self {
        Self::with_registry(Arc::new(SchemaRegistry::new(schema)), QueryCacheConfig::default())
    }

    /// Store driven by a declarative schema configuration
    pub fn with_config(config: &SchemaConfig) -> std::result::Result<Self, ConfigError> {
        let schema = config.build()?;
        Ok(Self::with_registry(
            Arc::new(SchemaRegistry::new(schema)),
            config.query_cache.clone(),
        ))
    }

    pub fn with_registry(registry: Arc<SchemaRegistry>, cache_config: QueryCacheConfig) -> Self {
        let metrics = Arc::new(EngineMetrics::new());
        let context = ModelContext::with_metrics(Arc::clone(&registry), Arc::clone(&metrics));
        let identity_map = Arc::new(IdentityMap::new());
        let query_cache = QueryCache::with_metrics(cache_config, Arc::clone(&metrics));

        let index = Arc::downgrade(&identity_map);
        context.attach_index(index.clone());
        context.subscribe(index);
        context.subscribe(query_cache.listener());

        Store {
            registry,
            context,
            identity_map,
            query_cache,
            metrics,
        }
    }

    /// Wrap a record in a model and enter it into the identity map
    ///
    /// A live model with the same identity is updated in place and returned,
    /// so existing references keep pointing at it.
    pub fn materialize(&self, record: RawRecord) -> Result<Arc<MegamorphicModel>> {
        if !self.registry.current().includes_model(&record.model_type) {
            return Err(ModelError::NotIncluded {
                model_type: record.model_type,
            });
        }

        let identity = record.identity();
        if let Some(existing) = self.peek(&identity) {
            existing.update(record.attributes)?;
            debug!(%identity, "record updated in place");
            return Ok(existing);
        }

        let model = MegamorphicModel::new(Arc::clone(&self.context), record);
        self.identity_map.insert(Arc::clone(&model));
        self.context.notify_loaded(&identity);
        debug!(%identity, "record materialized");
        Ok(model)
    }

    /// Materialize a batch, preserving order
    pub fn materialize_all<I>(&self, records: I) -> Result<Arc<RecordCollection>>
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let models = records
            .into_iter()
            .map(|record| self.materialize(record))
            .collect::<Result<Vec<_>>>()?;
        Ok(Arc::new(RecordCollection::from_models(models)))
    }

    /// The live model with this identity, if loaded
    pub fn peek(&self, identity: &ModelIdentity) -> Option<Arc<MegamorphicModel>> {
        self.context.lookup(identity)
    }

    /// Unload a model by identity; returns whether it was loaded
    pub fn unload(&self, identity: &ModelIdentity) -> bool {
        match self.peek(identity) {
            Some(model) => {
                model.unload();
                true
            }
            None => false,
        }
    }

    /// Replace the active schema; memoized resolutions go stale
    pub fn register_schema<S: Schema + 'static>(&self, schema: S) {
        self.registry.register(schema);
    }

    /// See [`QueryCache::query`]
    pub async fn query<F, Fut>(
        &self,
        cache_key: Option<&str>,
        fetcher: F,
        options: QueryOptions,
    ) -> QueryResult<QueryValue>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<QueryValue>> + Send + 'static,
    {
        self.query_cache.query(cache_key, fetcher, options).await
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn context(&self) -> &Arc<ModelContext> {
        &self.context
    }

    pub fn identity_map(&self) -> &Arc<IdentityMap> {
        &self.identity_map
    }

    pub fn query_cache(&self) -> &QueryCache {
        &self.query_cache
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
