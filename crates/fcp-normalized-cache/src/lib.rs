//! FCP Normalized Cache - client-side record graph for GraphQL responses.
//!
//! This crate provides:
//! - Normalization of response trees into flat, deduplicated records.
//! - A chainable storage contract with an in-memory LRU backend.
//! - Optimistic overlay layers with exact rollback.
//! - Field-level read policies and a batched tree reader.
//! - [`NormalizedStore`], which owns the cache behind one read/write lock and
//!   publishes the field paths each write changed.
//!
//! Selections are consumed as pre-resolved metadata ([`CompiledField`] and
//! friends); the crate never parses GraphQL documents.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::option_if_let_else)]

mod cache_key;
mod compiled;
mod error;
mod headers;
mod memory;
mod normalized_cache;
mod normalizer;
mod optimistic;
mod reader;
mod record;
mod resolver;
mod store;

pub use cache_key::{
    CacheKey, CacheKeyGenerator, CacheKeyGeneratorContext, ChainedCacheKeyGenerator,
    IdCacheKeyGenerator, TypePolicyCacheKeyGenerator, default_cache_key_generator,
};
pub use compiled::{
    ArgumentValue, CompiledArgument, CompiledCondition, CompiledField, CompiledFragment,
    CompiledSelection, CompiledType, Executable, SelectionSet, TypeKind, Variables,
};
pub use error::{
    CacheError, CacheMissError, StorageError, clear_storage_error_hook, set_storage_error_hook,
};
pub use headers::CacheHeaders;
pub use memory::{MemoryCache, MemoryCacheConfig};
pub use normalized_cache::{CacheDump, NormalizedCache};
pub use normalizer::{Normalizer, field_keys};
pub use optimistic::OptimisticCache;
pub use record::{DefaultRecordMerger, ListAppendMerger, Record, RecordMerger, RecordValue};
pub use resolver::{
    CacheResolver, DefaultCacheResolver, FieldPolicyCacheResolver, ResolverContext,
};
pub use store::{
    ChangedKeys, DEFAULT_CHANGED_KEYS_CAPACITY, NormalizedStore, NormalizedStoreBuilder,
};
