//! Megamorph materialization engine
//!
//! Wraps schema-less, normalized records in a single model type whose
//! attributes are resolved lazily through a pluggable [`Schema`]. The same
//! [`MegamorphicModel`] serves every record type; there are no per-type
//! model classes.
//!
//! # Architecture
//!
//! ```text
//! RawRecord → Store::materialize → MegamorphicModel
//!                                       │ get(key)
//!                                       ▼
//!        alias → whitelist → default → transform → classify
//!                                       │
//!               Scalar | Model | Unloaded | Collection  (memoized)
//! ```
//!
//! Classification asks the schema hooks, in order, whether a value is a
//! nested model, an array of references, a single reference, or a mixed
//! array containing references. Everything else is a scalar.
//!
//! ## Key Features
//!
//! - **Lazy resolution**: attributes are resolved on first read and memoized
//!   per model until written or the schema is re-registered
//! - **Reference tracking**: memoized references are invalidated when their
//!   target unloads or becomes loaded
//! - **Query cache**: keyed fetch results with reload, background reload and
//!   in-flight de-duplication, evicted whole when any member unloads
//! - **Declarative schemas**: YAML configuration compiled into a [`Schema`]
//!
//! # Example
//!
//! ```rust,ignore
//! use megamorph_engine::{RawRecord, SchemaConfig, Store};
//! use serde_json::json;
//!
//! let config = SchemaConfig::from_yaml("included_types: [book, author]")?;
//! let store = Store::with_config(&config)?;
//!
//! store.materialize(RawRecord::from_json(json!({
//!     "id": "1", "type": "author", "attributes": { "name": "Herbert" }
//! }))?)?;
//! let book = store.materialize(RawRecord::from_json(json!({
//!     "id": "1", "type": "book", "attributes": { "author": "urn:author:1" }
//! }))?)?;
//!
//! let author = book.get("author")?;
//! assert_eq!(author.as_model().unwrap().id(), "1");
//! ```

#![warn(missing_debug_implementations)]

// Core modules
pub mod error;
pub mod schema;
pub mod memo;
pub mod resolver;
pub mod model;
pub mod collection;
pub mod context;
pub mod invalidation;
pub mod identity_map;
pub mod metrics;

// Query results
pub mod cache;

// Configuration and facade
pub mod config;
pub mod store;

// Re-export main types
pub use cache::{CacheEntry, CacheStats, QueryCache, QueryCacheConfig, QueryOptions, QueryValue};
pub use collection::RecordCollection;
pub use config::{DeclarativeSchema, ModelConfig, SchemaConfig};
pub use context::{ModelContext, RecordIndex};
pub use error::{ConfigError, ModelError, QueryError, QueryResult, Result};
pub use identity_map::IdentityMap;
pub use invalidation::{ReferenceTracker, UnloadBus, UnloadListener};
pub use megamorph_types::{Attributes, ModelIdentity, RawRecord, Value};
pub use memo::{AttributeMemo, MemoEntry, Revision};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use model::{InstanceId, Lifecycle, MegamorphicModel};
pub use resolver::{ResolvedValue, UnresolvedReference};
pub use schema::{PassthroughSchema, Schema, SchemaRegistry, Transform, TypeMetadata};
pub use store::Store;

/// Prelude for common imports
pub mod prelude {
    pub use crate::cache::{QueryOptions, QueryValue};
    pub use crate::collection::RecordCollection;
    pub use crate::config::SchemaConfig;
    pub use crate::model::MegamorphicModel;
    pub use crate::resolver::ResolvedValue;
    pub use crate::schema::{Schema, TypeMetadata};
    pub use crate::store::Store;
    pub use megamorph_types::{ModelIdentity, RawRecord, Value};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_usage() {
        let store = Store::new();
        assert_eq!(store.registry().revision(), Revision(1));

        let record = RawRecord::from_json(json!({
            "id": "1",
            "type": "book",
            "attributes": { "title": "Dune" }
        }))
        .unwrap();
        let book = store.materialize(record).unwrap();
        assert_eq!(book.get("title").unwrap().as_scalar(), Some(&json!("Dune")));
    }
}
