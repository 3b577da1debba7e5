//! Hierarchical, category-scoped in-memory cache.
//!
//! Entries live under composite string keys (`category:arg1:arg2:...`) with
//! per-category default TTLs, per-key write serialization, hit/miss/set
//! counters at both global and category granularity, a cascade-invalidation
//! graph, and predictive preloading for hot keys.
//!
//! Cache state is process-local and never persisted; a restart starts cold
//! and the loader rewarms it from the database.

mod accessors;
mod categories;
mod entry;
mod keys;
mod maintenance;
mod store;

pub use categories::{Category, DEFAULT_TTL};
pub use entry::CacheEntry;
pub use keys::{KeyPart, cache_key};
pub use maintenance::maintenance_loop;
pub use store::{
    CacheInfo, CacheMetricsSnapshot, CacheRefresher, CacheStore, CategoryInfo,
    CategoryMetricsSnapshot, EntryInfo, GlobalMetricsSnapshot,
};
