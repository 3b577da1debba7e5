//! Wall-clock task scheduler.
//!
//! A minute-resolution loop evaluates the job table against the local time
//! in the configured timezone. Per-job guarantees:
//!
//! - at most one execution per bucket (`HH:MM`, or `HH:MM:<minute/5>` for
//!   the 5-minute jobs);
//! - no self-overlap (a held job lock skips the tick);
//! - job failures are recorded in metrics, logged, and never propagate.
//!
//! The tick interval is 30 seconds so at least one tick lands inside every
//! wall-clock minute; bucket deduplication makes the second tick in a
//! minute a no-op.

mod jobs;

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
pub use jobs::{GuildDirectory, JobKind, Trigger};
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{config::SchedulerConfig, features::FeatureRegistry};

/// Interval between scheduler ticks.
const TICK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Default)]
struct JobState {
    lock: Arc<Mutex<()>>,
    last_bucket: SyncMutex<Option<String>>,
    success: AtomicU64,
    failures: AtomicU64,
    total_time_ms: AtomicU64,
}

/// Per-job metrics snapshot.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobMetrics {
    pub success: u64,
    pub failures: u64,
    pub total_time_ms: u64,
}

/// Scheduler health: metrics, lock states and last execution buckets.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerHealth {
    pub task_metrics: HashMap<&'static str, JobMetrics>,
    pub active_locks: HashMap<&'static str, bool>,
    pub last_executions: HashMap<&'static str, String>,
}

pub struct TaskScheduler {
    tz: Tz,
    watchdog: Duration,
    features: FeatureRegistry,
    guilds: Arc<dyn GuildDirectory>,
    states: [JobState; 9],
}

impl TaskScheduler {
    pub fn new(
        config: &SchedulerConfig,
        features: FeatureRegistry,
        guilds: Arc<dyn GuildDirectory>,
    ) -> Self {
        info!(timezone = %config.timezone, "Task scheduler initialized");
        Self {
            tz: config.tz(),
            watchdog: Duration::from_secs(config.tick_watchdog_secs),
            features,
            guilds,
            states: Default::default(),
        }
    }

    fn state(&self, kind: JobKind) -> &JobState {
        &self.states[kind.index()]
    }

    /// Evaluate every job against the current wall clock.
    pub async fn tick(&self) {
        let now = Utc::now().with_timezone(&self.tz);
        let started = Instant::now();
        self.tick_at(now).await;

        let elapsed = started.elapsed();
        if elapsed > self.watchdog {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_secs = self.watchdog.as_secs(),
                "Scheduler tick exceeded watchdog threshold"
            );
        }
    }

    /// Evaluate every job against an explicit local time.
    pub async fn tick_at(&self, now: DateTime<Tz>) {
        for kind in JobKind::ALL {
            self.run_if_due(kind, now).await;
        }
    }

    async fn run_if_due(&self, kind: JobKind, now: DateTime<Tz>) {
        let trigger = kind.trigger();
        let Some(bucket) = trigger.bucket(now) else {
            return;
        };
        let state = self.state(kind);

        if state.last_bucket.lock().as_deref() == Some(bucket.as_str()) {
            return;
        }

        let Ok(_guard) = state.lock.try_lock() else {
            if trigger.quiet_skip() {
                debug!(job = kind.name(), "Job already running, skipping tick");
            } else {
                warn!(job = kind.name(), "Job already running, skipping tick");
            }
            return;
        };

        *state.last_bucket.lock() = Some(bucket);
        self.execute_with_monitoring(kind).await;
    }

    /// Run the job body, recording success/failure and elapsed time. Job
    /// errors never escape the scheduler.
    async fn execute_with_monitoring(&self, kind: JobKind) {
        let state = self.state(kind);
        let start = Instant::now();

        let result = jobs::run_job(kind, &self.features, &self.guilds).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        state.total_time_ms.fetch_add(elapsed_ms, Ordering::Relaxed);

        match result {
            Ok(()) => {
                state.success.fetch_add(1, Ordering::Relaxed);
                info!(job = kind.name(), elapsed_ms, "Job completed successfully");
            }
            Err(e) => {
                state.failures.fetch_add(1, Ordering::Relaxed);
                error!(job = kind.name(), elapsed_ms, error = %e, "Job failed");
            }
        }
    }

    pub fn health_status(&self) -> SchedulerHealth {
        let mut task_metrics = HashMap::new();
        let mut active_locks = HashMap::new();
        let mut last_executions = HashMap::new();

        for kind in JobKind::ALL {
            let state = self.state(kind);
            task_metrics.insert(
                kind.name(),
                JobMetrics {
                    success: state.success.load(Ordering::Relaxed),
                    failures: state.failures.load(Ordering::Relaxed),
                    total_time_ms: state.total_time_ms.load(Ordering::Relaxed),
                },
            );
            active_locks.insert(kind.name(), state.lock.try_lock().is_err());
            if let Some(bucket) = state.last_bucket.lock().clone() {
                last_executions.insert(kind.name(), bucket);
            }
        }

        SchedulerHealth {
            task_metrics,
            active_locks,
            last_executions,
        }
    }

    /// Aggregate success/failure totals for the health probe.
    pub fn totals(&self) -> (u64, u64) {
        let mut success = 0;
        let mut failures = 0;
        for kind in JobKind::ALL {
            let state = self.state(kind);
            success += state.success.load(Ordering::Relaxed);
            failures += state.failures.load(Ordering::Relaxed);
        }
        (success, failures)
    }
}

/// The scheduler loop, spawned by the runtime. Cancellation happens at the
/// interval await.
pub async fn scheduler_loop(scheduler: Arc<TaskScheduler>) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!("Task scheduler started");
    loop {
        interval.tick().await;
        scheduler.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering as AtomicOrdering;

    use chrono::TimeZone;

    use super::*;
    use crate::features::test_support::{
        FailingScraper, RecordingEvents, RecordingRoster, RecordingWishlist,
    };

    struct StaticGuilds(Vec<u64>);

    impl GuildDirectory for StaticGuilds {
        fn guild_ids(&self) -> Vec<u64> {
            self.0.clone()
        }
    }

    fn paris(h: u32, m: u32) -> DateTime<Tz> {
        Tz::Europe__Paris
            .with_ymd_and_hms(2026, 6, 1, h, m, 0)
            .unwrap()
    }

    fn scheduler_with(
        features: FeatureRegistry,
        guilds: Vec<u64>,
    ) -> TaskScheduler {
        TaskScheduler::new(
            &SchedulerConfig::default(),
            features,
            Arc::new(StaticGuilds(guilds)),
        )
    }

    #[tokio::test]
    async fn test_dedup_within_minute_bucket() {
        let features = FeatureRegistry::new();
        let events = Arc::new(RecordingEvents::default());
        features.register_events(events.clone());
        let scheduler = scheduler_with(features, vec![]);

        // Two ticks in the same minute: exactly one execution.
        scheduler.tick_at(paris(12, 0)).await;
        scheduler.tick_at(paris(12, 0)).await;
        assert_eq!(events.created.load(AtomicOrdering::SeqCst), 1);

        // The next minute does not re-fire a 12:00 job.
        scheduler.tick_at(paris(12, 1)).await;
        assert_eq!(events.created.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_five_minute_job_sub_buckets() {
        let features = FeatureRegistry::new();
        let events = Arc::new(RecordingEvents::default());
        features.register_events(events.clone());
        let scheduler = scheduler_with(features, vec![]);

        scheduler.tick_at(paris(13, 0)).await;
        scheduler.tick_at(paris(13, 0)).await;
        assert_eq!(events.closed.load(AtomicOrdering::SeqCst), 1);

        scheduler.tick_at(paris(13, 5)).await;
        assert_eq!(events.closed.load(AtomicOrdering::SeqCst), 2);

        // Non-multiple-of-five minutes never fire.
        scheduler.tick_at(paris(13, 7)).await;
        assert_eq!(events.closed.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_absent_module_short_circuits() {
        let scheduler = scheduler_with(FeatureRegistry::new(), vec![1, 2]);
        scheduler.tick_at(paris(12, 0)).await;
        scheduler.tick_at(paris(5, 0)).await;

        // Jobs still count as executed (successfully skipped).
        let health = scheduler.health_status();
        assert_eq!(health.task_metrics["events_create"].success, 1);
        assert_eq!(health.task_metrics["roster_update"].success, 1);
        assert_eq!(health.task_metrics["events_create"].failures, 0);
    }

    #[tokio::test]
    async fn test_roster_fanout_covers_all_guilds() {
        let features = FeatureRegistry::new();
        let roster = Arc::new(RecordingRoster::default());
        let events = Arc::new(RecordingEvents::default());
        features.register_roster(roster.clone());
        features.register_events(events.clone());
        let scheduler = scheduler_with(features, vec![1, 2, 3]);

        scheduler.tick_at(paris(5, 0)).await;
        assert_eq!(roster.updates.load(AtomicOrdering::SeqCst), 3);
        assert_eq!(events.static_updates.load(AtomicOrdering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_per_guild_failures_swallowed_by_fanout() {
        let features = FeatureRegistry::new();
        features.register_roster(Arc::new(RecordingRoster {
            fail: true,
            ..Default::default()
        }));
        let scheduler = scheduler_with(features, vec![1]);

        // Fan-out swallows per-guild errors; the job itself succeeds.
        scheduler.tick_at(paris(11, 0)).await;
        let health = scheduler.health_status();
        assert_eq!(health.task_metrics["roster_update"].failures, 0);
        assert_eq!(health.task_metrics["roster_update"].success, 1);
    }

    #[tokio::test]
    async fn test_job_failure_recorded_and_not_propagated() {
        let features = FeatureRegistry::new();
        features.register_scraper(Arc::new(FailingScraper));
        let scheduler = scheduler_with(features, vec![]);

        scheduler.tick_at(paris(3, 30)).await;
        let health = scheduler.health_status();
        assert_eq!(health.task_metrics["epic_items_scrape"].failures, 1);
        assert_eq!(health.task_metrics["epic_items_scrape"].success, 0);
        // The failed bucket still deduplicates.
        scheduler.tick_at(paris(3, 30)).await;
        assert_eq!(
            scheduler.health_status().task_metrics["epic_items_scrape"].failures,
            1
        );
    }

    #[tokio::test]
    async fn test_wishlist_fanout() {
        let features = FeatureRegistry::new();
        let wishlist = Arc::new(RecordingWishlist::default());
        features.register_wishlist(wishlist.clone());
        let scheduler = scheduler_with(features, vec![10, 20]);

        scheduler.tick_at(paris(9, 0)).await;
        assert_eq!(wishlist.updates.load(AtomicOrdering::SeqCst), 2);
        scheduler.tick_at(paris(22, 0)).await;
        assert_eq!(wishlist.updates.load(AtomicOrdering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_health_status_shape() {
        let scheduler = scheduler_with(FeatureRegistry::new(), vec![]);
        scheduler.tick_at(paris(12, 0)).await;

        let health = scheduler.health_status();
        assert_eq!(health.task_metrics.len(), JobKind::ALL.len());
        assert!(health.active_locks.values().all(|held| !held));
        assert_eq!(health.last_executions["events_create"], "12:00");
        assert!(!health.last_executions.contains_key("roster_update"));

        let (success, failures) = scheduler.totals();
        // events_create plus both 5-minute jobs fired at 12:00.
        assert_eq!(success, 3);
        assert_eq!(failures, 0);
    }
}
