//! The category-scoped cache store.
//!
//! One entry per composite key; every structural mutation of a key happens
//! under that key's async lock, so writes to a given key are totally
//! ordered. Global counters are atomics; per-category size counters are
//! only touched under the owning key's lock to keep them exact.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use super::{
    categories::Category,
    entry::{CacheEntry, PredictionCheck},
    keys::{KeyPart, cache_key},
};

#[derive(Default)]
pub(super) struct GlobalCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub evictions: AtomicU64,
    pub cleanups: AtomicU64,
    pub preloads_successful: AtomicU64,
    pub preloads_wasted: AtomicU64,
    pub predictions_correct: AtomicU64,
    pub predictions_total: AtomicU64,
}

#[derive(Default)]
pub(super) struct CategoryCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub size: AtomicU64,
}

/// Point-in-time global metrics.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GlobalMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub cleanups: u64,
    pub preloads_successful: u64,
    pub preloads_wasted: u64,
    pub predictions_correct: u64,
    pub predictions_total: u64,
    pub hit_rate: f64,
    pub total_entries: usize,
    pub total_requests: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategoryMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheMetricsSnapshot {
    pub global: GlobalMetricsSnapshot,
    pub by_category: HashMap<&'static str, CategoryMetricsSnapshot>,
}

/// Descriptive entry summary used by [`CacheStore::cache_info`].
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub key: String,
    pub age_secs: f64,
    pub category: &'static str,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CategoryInfo {
    pub count: usize,
    pub avg_age_secs: f64,
    pub total_accesses: u64,
    pub avg_accesses: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub total_entries: usize,
    pub categories: HashMap<&'static str, CategoryInfo>,
    pub oldest_entry: Option<EntryInfo>,
    pub newest_entry: Option<EntryInfo>,
}

/// Category-specific refresh hook driven by predictive preloading.
///
/// Registered per key prefix; returns `true` when the refresh actually
/// replaced data, `false` for a no-op (counted as a wasted preload).
#[async_trait::async_trait]
pub trait CacheRefresher: Send + Sync {
    async fn refresh(&self, key: &str) -> bool;
}

/// Centralized cache for every runtime component.
pub struct CacheStore {
    pub(super) entries: DashMap<String, CacheEntry>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    pub(super) global: GlobalCounters,
    per_category: [CategoryCounters; 7],
    invalidation_rules: RwLock<HashMap<Category, HashSet<Category>>>,
    pub(super) hot_keys: RwLock<HashSet<String>>,
    pub(super) preload_tasks: DashMap<String, tokio::task::JoinHandle<()>>,
    pub(super) refreshers: RwLock<Vec<(String, Arc<dyn CacheRefresher>)>>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        let store = Self {
            entries: DashMap::new(),
            locks: DashMap::new(),
            global: GlobalCounters::default(),
            per_category: Default::default(),
            invalidation_rules: RwLock::new(HashMap::new()),
            hot_keys: RwLock::new(HashSet::new()),
            preload_tasks: DashMap::new(),
            refreshers: RwLock::new(Vec::new()),
        };
        store.seed_invalidation_rules();
        info!("Cache store initialized");
        store
    }

    /// Initial cascade rules; additive extensions go through
    /// [`add_invalidation_rule`](Self::add_invalidation_rule).
    fn seed_invalidation_rules(&self) {
        self.add_invalidation_rule(Category::RosterData, &[Category::EventsData]);
        self.add_invalidation_rule(
            Category::GuildData,
            &[Category::RosterData, Category::EventsData],
        );
        self.add_invalidation_rule(Category::UserData, &[Category::RosterData]);
    }

    fn counters(&self, category: Category) -> &CategoryCounters {
        &self.per_category[category.index()]
    }

    pub(super) fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(key) {
            return Arc::clone(&lock);
        }
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Look up a value. Expired entries are evicted on the spot and count
    /// as misses.
    pub async fn get(&self, category: Category, parts: &[KeyPart]) -> Option<Value> {
        let key = cache_key(category, parts);
        self.get_by_key(category, &key).await
    }

    pub(super) async fn get_by_key(&self, category: Category, key: &str) -> Option<Value> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let expired = match self.entries.get(key) {
            None => {
                self.global.misses.fetch_add(1, Ordering::Relaxed);
                self.counters(category).misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => entry.is_expired(),
        };

        if expired {
            self.entries.remove(key);
            self.global.misses.fetch_add(1, Ordering::Relaxed);
            self.global.evictions.fetch_add(1, Ordering::Relaxed);
            let counters = self.counters(category);
            counters.misses.fetch_add(1, Ordering::Relaxed);
            decrement(&counters.size);
            return None;
        }

        let mut entry = self.entries.get_mut(key)?;
        let (value, prediction) = entry.access();
        drop(entry);

        self.global.hits.fetch_add(1, Ordering::Relaxed);
        self.counters(category).hits.fetch_add(1, Ordering::Relaxed);
        if let PredictionCheck::Made { correct } = prediction {
            self.global.predictions_total.fetch_add(1, Ordering::Relaxed);
            if correct {
                self.global
                    .predictions_correct
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
        Some(value)
    }

    /// Insert or replace a value. TTL defaults to the category's TTL.
    pub async fn set(
        &self,
        category: Category,
        value: Value,
        parts: &[KeyPart],
        ttl: Option<Duration>,
    ) {
        let key = cache_key(category, parts);
        self.set_by_key(category, key, value, ttl).await
    }

    pub(super) async fn set_by_key(
        &self,
        category: Category,
        key: String,
        value: Value,
        ttl: Option<Duration>,
    ) {
        let ttl = ttl.unwrap_or_else(|| category.ttl());
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let was_new = self
            .entries
            .insert(key, CacheEntry::new(value, ttl, category))
            .is_none();

        self.global.sets.fetch_add(1, Ordering::Relaxed);
        let counters = self.counters(category);
        counters.sets.fetch_add(1, Ordering::Relaxed);
        if was_new {
            counters.size.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove a single entry. Returns whether it existed.
    pub async fn delete(&self, category: Category, parts: &[KeyPart]) -> bool {
        let key = cache_key(category, parts);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        match self.entries.remove(&key) {
            Some((_, entry)) => {
                decrement(&self.counters(entry.category()).size);
                true
            }
            None => false,
        }
    }

    /// Remove every entry tagged with `category`. Returns the count removed.
    pub async fn invalidate_category(&self, category: Category) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().category() == category)
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for key in &keys {
            let lock = self.key_lock(key);
            let _guard = lock.lock().await;
            if self.entries.remove(key).is_some() {
                removed += 1;
            }
        }

        self.counters(category).size.store(0, Ordering::Relaxed);
        info!(category = %category, removed, "Invalidated cache category");
        removed
    }

    /// Cascade-invalidate the categories downstream of `category`.
    pub async fn invalidate_related(&self, category: Category) -> usize {
        let affected: Vec<Category> = self
            .invalidation_rules
            .read()
            .get(&category)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        let mut total = 0;
        for downstream in affected {
            total += self.invalidate_category(downstream).await;
        }
        total
    }

    /// Union `affected` into the invalidation graph for `trigger`.
    /// The graph is append-only at runtime.
    pub fn add_invalidation_rule(&self, trigger: Category, affected: &[Category]) {
        self.invalidation_rules
            .write()
            .entry(trigger)
            .or_default()
            .extend(affected.iter().copied());
    }

    /// Remove every expired entry. Returns the count removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(String, Category)> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired_at(now))
            .map(|e| (e.key().clone(), e.value().category()))
            .collect();

        let mut removed = 0;
        for (key, category) in &expired {
            let lock = self.key_lock(key);
            let _guard = lock.lock().await;
            if self.entries.remove(key).is_some() {
                decrement(&self.counters(*category).size);
                removed += 1;
            }
        }

        if removed > 0 {
            self.global.cleanups.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(removed, "Cleaned up expired cache entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        let hits = self.global.hits.load(Ordering::Relaxed);
        let misses = self.global.misses.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        let hit_rate = if total_requests > 0 {
            (hits as f64 / total_requests as f64 * 100.0 * 100.0).round() / 100.0
        } else {
            0.0
        };

        let by_category = Category::ALL
            .iter()
            .map(|c| {
                let counters = self.counters(*c);
                (
                    c.as_str(),
                    CategoryMetricsSnapshot {
                        hits: counters.hits.load(Ordering::Relaxed),
                        misses: counters.misses.load(Ordering::Relaxed),
                        sets: counters.sets.load(Ordering::Relaxed),
                        size: counters.size.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        CacheMetricsSnapshot {
            global: GlobalMetricsSnapshot {
                hits,
                misses,
                sets: self.global.sets.load(Ordering::Relaxed),
                evictions: self.global.evictions.load(Ordering::Relaxed),
                cleanups: self.global.cleanups.load(Ordering::Relaxed),
                preloads_successful: self.global.preloads_successful.load(Ordering::Relaxed),
                preloads_wasted: self.global.preloads_wasted.load(Ordering::Relaxed),
                predictions_correct: self.global.predictions_correct.load(Ordering::Relaxed),
                predictions_total: self.global.predictions_total.load(Ordering::Relaxed),
                hit_rate,
                total_entries: self.entries.len(),
                total_requests,
            },
            by_category,
        }
    }

    /// Detailed entry statistics: per-category counts and ages, oldest and
    /// newest entries by creation time.
    pub fn cache_info(&self) -> CacheInfo {
        let mut categories: HashMap<&'static str, CategoryInfo> = HashMap::new();
        let mut oldest: Option<(Instant, EntryInfo)> = None;
        let mut newest: Option<(Instant, EntryInfo)> = None;
        let mut ages: HashMap<&'static str, f64> = HashMap::new();

        for item in self.entries.iter() {
            let entry = item.value();
            let name = entry.category().as_str();
            let info = categories.entry(name).or_default();
            info.count += 1;
            info.total_accesses += entry.access_count();
            *ages.entry(name).or_default() += entry.age().as_secs_f64();

            let summary = EntryInfo {
                key: item.key().clone(),
                age_secs: entry.age().as_secs_f64(),
                category: name,
            };
            let created = entry.created_at();
            if oldest.as_ref().is_none_or(|(t, _)| created < *t) {
                oldest = Some((created, summary.clone()));
            }
            if newest.as_ref().is_none_or(|(t, _)| created > *t) {
                newest = Some((created, summary));
            }
        }

        for (name, info) in categories.iter_mut() {
            if info.count > 0 {
                info.avg_accesses = info.total_accesses as f64 / info.count as f64;
                info.avg_age_secs = ages[name] / info.count as f64;
            }
        }

        CacheInfo {
            total_entries: self.entries.len(),
            categories,
            oldest_entry: oldest.map(|(_, e)| e),
            newest_entry: newest.map(|(_, e)| e),
        }
    }

    /// Register a preload refresher for keys starting with `prefix`.
    pub fn register_refresher(&self, prefix: &str, refresher: Arc<dyn CacheRefresher>) {
        self.refreshers
            .write()
            .push((prefix.to_string(), refresher));
    }

    pub(crate) fn refresher_for(&self, key: &str) -> Option<Arc<dyn CacheRefresher>> {
        self.refreshers
            .read()
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map(|(_, r)| Arc::clone(r))
    }

    pub fn hot_key_count(&self) -> usize {
        self.hot_keys.read().len()
    }

    pub fn active_preload_tasks(&self) -> usize {
        self.preload_tasks.len()
    }
}

fn decrement(counter: &AtomicU64) {
    // Saturating: size never wraps below zero even if an eviction races a
    // category reset.
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
}
