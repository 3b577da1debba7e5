//! Runtime wiring and lifecycle.
//!
//! The runtime is the explicit context every component receives instead of
//! ambient singletons: the host builds one `Runtime`, hands the contained
//! handles to feature modules at registration time, and owns the background
//! tasks (cache maintenance, limiter cleanup, scheduler ticks) until
//! shutdown.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{
    cache::{CacheStore, maintenance_loop},
    commands::AdminCommands,
    config::{Config, ConfigError},
    db::{Database, DbError, SqlRunner},
    features::FeatureRegistry,
    limiter::{RateLimiter, cleanup_loop},
    loader::CacheLoader,
    observability::{ComponentHealth, HealthReport, cache_band, db_latency_band, scheduler_band},
    resilience::{BreakerRegistry, GracefulDegradation, RetryPolicy},
    scheduler::{GuildDirectory, TaskScheduler, scheduler_loop},
    translation::{TranslationError, TranslationStore},
};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Db(#[from] DbError),
}

pub struct Runtime {
    config: Arc<Config>,
    pub translations: Arc<TranslationStore>,
    pub db: Arc<Database>,
    pub cache: Arc<CacheStore>,
    pub loader: Arc<CacheLoader>,
    pub limiter: Arc<RateLimiter>,
    pub features: FeatureRegistry,
    pub scheduler: Arc<TaskScheduler>,
    pub commands: Arc<AdminCommands>,
    pub breakers: BreakerRegistry,
    pub retry: RetryPolicy,
    pub degradation: Arc<GracefulDegradation>,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Wire every component from configuration. Fails fast on an invalid
    /// translation catalog or an unreachable database.
    pub async fn build(config: Config) -> Result<Self, RuntimeError> {
        let config = Arc::new(config);

        let translations = Arc::new(TranslationStore::load(
            &config.translation.path,
            config.translation.max_bytes,
        )?);

        let db = Arc::new(Database::connect(&config.database).await?);
        let sql: Arc<dyn SqlRunner> = db.clone();

        let cache = Arc::new(CacheStore::new());
        let loader = CacheLoader::new(sql.clone(), cache.clone());
        loader.register_refreshers();

        let limiter = Arc::new(RateLimiter::new());
        let features = FeatureRegistry::new();

        let directory: Arc<dyn GuildDirectory> = loader.clone();
        let scheduler = Arc::new(TaskScheduler::new(
            &config.scheduler,
            features.clone(),
            directory,
        ));

        let commands = Arc::new(AdminCommands::new(
            sql,
            cache.clone(),
            loader.clone(),
            limiter.clone(),
            translations.clone(),
            config.rate_limits.clone(),
        ));

        Ok(Self {
            translations,
            db,
            cache,
            loader,
            limiter,
            features,
            scheduler,
            commands,
            breakers: BreakerRegistry::new(config.resilience.clone()),
            retry: RetryPolicy::from_config(&config.resilience),
            degradation: Arc::new(GracefulDegradation::new()),
            config,
            tasks: Vec::new(),
        })
    }

    /// Warm the cache, then start the background loops.
    pub async fn start(&mut self) {
        self.loader.load_all_shared_data().await;

        self.tasks.push(tokio::spawn(maintenance_loop(
            self.cache.clone(),
            self.config.cache.clone(),
        )));
        self.tasks.push(tokio::spawn(cleanup_loop(
            self.limiter.clone(),
            Duration::from_secs(self.config.rate_limits.cleanup_max_age_hours * 3600),
        )));
        self.tasks
            .push(tokio::spawn(scheduler_loop(self.scheduler.clone())));

        info!(
            features = ?self.features.registered(),
            "Runtime started"
        );
    }

    /// Run until interrupted, then shut down.
    pub async fn run(mut self) -> Result<(), RuntimeError> {
        self.start().await;

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Shutdown signal received");
        self.shutdown().await;
        Ok(())
    }

    /// Abort every background task. Cache state is process-local and is
    /// simply dropped.
    pub async fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Runtime stopped");
    }

    /// Aggregated component health with the raw numbers behind each band.
    pub async fn health_report(&self) -> HealthReport {
        let latency = self.db.ping().await.ok();
        let db = db_latency_band(latency);

        let (successes, failures) = self.scheduler.totals();
        let (scheduler, scheduler_failure_rate) = scheduler_band(successes, failures);

        let metrics = self.cache.metrics();
        let (cache, cache_hit_rate) = cache_band(metrics.global.hits, metrics.global.misses);

        HealthReport {
            db,
            scheduler,
            cache,
            db_latency_ms: latency.map(|d| d.as_millis() as u64),
            scheduler_failure_rate,
            cache_hit_rate,
        }
    }

    /// Overall status: the worst band across components.
    pub async fn overall_health(&self) -> ComponentHealth {
        let report = self.health_report().await;
        [report.db, report.scheduler, report.cache]
            .into_iter()
            .max_by_key(|h| match h {
                ComponentHealth::Healthy => 0,
                ComponentHealth::Warning => 1,
                ComponentHealth::Error => 2,
            })
            .unwrap_or(ComponentHealth::Healthy)
    }
}
