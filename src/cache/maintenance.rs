//! Background cache maintenance: expired-entry cleanup, hot-key tracking
//! and predictive preloading.
//!
//! Maintenance is best-effort. Errors and panics inside a pass are logged
//! and swallowed; a panicking preload refresh counts as a wasted preload.

use std::{
    collections::HashMap,
    sync::{Arc, atomic::Ordering},
    time::{Duration, Instant},
};

use tokio::time::sleep_until;
use tracing::{debug, error};

use super::{keys::guild_id_segment, store::CacheStore};
use crate::config::CacheConfig;

/// Hot-key set capacity: the top entries by access frequency.
const HOT_KEY_LIMIT: usize = 50;

/// Accesses required before a key is even considered for the hot set.
const HOT_CANDIDATE_MIN_ACCESSES: u64 = 3;

/// Window of recent activity used to rank guilds for preloading.
const GUILD_ACTIVITY_WINDOW: Duration = Duration::from_secs(3600);

impl CacheStore {
    /// One maintenance pass: schedule preloads for eligible entries,
    /// recompute the hot-key set, and warm data for the most active guilds.
    pub async fn smart_maintenance(self: &Arc<Self>, config: &CacheConfig) {
        for item in self.entries.iter() {
            let key = item.key().clone();
            let entry = item.value();
            if entry.should_preload() && !self.preload_tasks.contains_key(&key) {
                let fire_at = entry.preload_at();
                drop(item);
                self.schedule_preload(key, fire_at);
                continue;
            }
        }

        self.update_hot_keys();
        self.preload_active_guilds(config.active_guild_preloads)
            .await;
    }

    /// Spawn the preload task for `key`. At most one task per key is ever
    /// in flight; the task unregisters itself on completion. Cancellation
    /// (runtime shutdown aborts the task) is silent.
    fn schedule_preload(self: &Arc<Self>, key: String, fire_at: Option<Instant>) {
        let store = Arc::clone(self);
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            if let Some(at) = fire_at
                && at > Instant::now()
            {
                sleep_until(at.into()).await;
            }

            let refreshed = match store.refresher_for(&key) {
                Some(refresher) => {
                    let refresh_key = key.clone();
                    // Refreshers are feature-supplied; run them in their own
                    // task so a panic is contained and counted.
                    match tokio::spawn(async move { refresher.refresh(&refresh_key).await }).await
                    {
                        Ok(outcome) => outcome,
                        Err(join_err) => {
                            if join_err.is_panic() {
                                error!(key = %key, "Preload refresh panicked");
                            }
                            false
                        }
                    }
                }
                None => false,
            };

            if refreshed {
                store
                    .global
                    .preloads_successful
                    .fetch_add(1, Ordering::Relaxed);
            } else {
                store.global.preloads_wasted.fetch_add(1, Ordering::Relaxed);
            }
            store.preload_tasks.remove(&key);
        });

        self.preload_tasks.insert(task_key, handle);
    }

    /// Recompute the hot-key set: top entries ranked by access frequency
    /// (accesses per second of age).
    fn update_hot_keys(&self) {
        let mut candidates: Vec<(String, f64)> = self
            .entries
            .iter()
            .filter(|e| e.value().access_count() > HOT_CANDIDATE_MIN_ACCESSES)
            .map(|e| {
                let age_secs = e.value().age().as_secs_f64().max(1.0);
                (e.key().clone(), e.value().access_count() as f64 / age_secs)
            })
            .collect();

        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut hot = self.hot_keys.write();
        hot.clear();
        hot.extend(candidates.into_iter().take(HOT_KEY_LIMIT).map(|(k, _)| k));
    }

    /// Rank guilds by cache activity over the last hour and run the
    /// registered refreshers for the common keys of the busiest few.
    async fn preload_active_guilds(self: &Arc<Self>, top: usize) {
        if top == 0 {
            return;
        }

        let cutoff = Instant::now().checked_sub(GUILD_ACTIVITY_WINDOW);
        let mut activity: HashMap<u64, u64> = HashMap::new();
        for item in self.entries.iter() {
            if let Some(cutoff) = cutoff
                && item.value().last_accessed() < cutoff
            {
                continue;
            }
            if let Some(guild_id) = guild_id_segment(item.key()) {
                *activity.entry(guild_id).or_default() += item.value().access_count();
            }
        }

        let mut ranked: Vec<(u64, u64)> = activity.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        for (guild_id, accesses) in ranked.into_iter().take(top) {
            debug!(guild_id, accesses, "Preloading data for active guild");
            for key in [
                format!("roster_data:{guild_id}:bulk_members"),
                format!("guild_data:{guild_id}:settings"),
            ] {
                if self.entries.contains_key(&key) {
                    continue;
                }
                if let Some(refresher) = self.refresher_for(&key) {
                    refresher.refresh(&key).await;
                }
            }
        }
    }
}

/// Periodic maintenance loop: cleanup then smart maintenance, forever.
/// Spawned by the runtime; cancellation happens at the sleep points.
pub async fn maintenance_loop(store: Arc<CacheStore>, config: CacheConfig) {
    let interval = Duration::from_secs(config.maintenance_interval_secs);
    loop {
        tokio::time::sleep(interval).await;
        store.cleanup_expired().await;
        store.smart_maintenance(&config).await;
    }
}
