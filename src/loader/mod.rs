//! Bulk cache warm-up from the relational store.
//!
//! The loader populates every shared cache category once at startup
//! (`load_all_shared_data`, parallel, idempotent) and offers per-category
//! reload afterwards. Each category loader reads rows through the
//! [`SqlRunner`] seam, composes structured JSON values and writes them via
//! the specialized cache accessors. A category failure is logged and never
//! aborts the batch; empty result sets still mark the category loaded.

mod categories;

use std::{
    collections::HashSet,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    cache::{CacheRefresher, CacheStore},
    db::SqlRunner,
    scheduler::GuildDirectory,
};

/// Data categories managed by the loader, in startup-load order.
pub const DATA_CATEGORIES: [&str; 17] = [
    "guild_settings",
    "guild_roles",
    "guild_channels",
    "welcome_messages",
    "absence_messages",
    "guild_members",
    "events_data",
    "static_data",
    "static_groups",
    "user_setup",
    "weapons",
    "weapons_combinations",
    "guild_ideal_staff",
    "games_list",
    "epic_items_t2",
    "events_calendar",
    "guild_ptb_settings",
];

/// Bounded wait used by `wait_for_initial_load`: 100 polls at 100 ms.
const INITIAL_LOAD_POLLS: u32 = 100;
const INITIAL_LOAD_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct CacheLoader {
    pub(crate) db: Arc<dyn SqlRunner>,
    pub(crate) cache: Arc<CacheStore>,
    loaded: RwLock<HashSet<&'static str>>,
    initial_load_complete: AtomicBool,
    load_lock: Mutex<()>,
    guild_ids: RwLock<HashSet<u64>>,
}

impl CacheLoader {
    pub fn new(db: Arc<dyn SqlRunner>, cache: Arc<CacheStore>) -> Arc<Self> {
        Arc::new(Self {
            db,
            cache,
            loaded: RwLock::new(HashSet::new()),
            initial_load_complete: AtomicBool::new(false),
            load_lock: Mutex::new(()),
            guild_ids: RwLock::new(HashSet::new()),
        })
    }

    /// Load every shared data category in parallel, once. A second call
    /// is a no-op.
    pub async fn load_all_shared_data(&self) {
        let _guard = self.load_lock.lock().await;
        if self.initial_load_complete.load(Ordering::Acquire) {
            debug!("Initial load already complete, skipping");
            return;
        }

        info!("Starting initial shared data load");
        let started = std::time::Instant::now();

        tokio::join!(
            self.ensure_guild_settings_loaded(),
            self.ensure_guild_roles_loaded(),
            self.ensure_guild_channels_loaded(),
            self.ensure_welcome_messages_loaded(),
            self.ensure_absence_messages_loaded(),
            self.ensure_guild_members_loaded(),
            self.ensure_events_data_loaded(),
            self.ensure_static_data_loaded(),
            self.ensure_static_groups_loaded(),
            self.ensure_user_setup_loaded(),
            self.ensure_weapons_loaded(),
            self.ensure_weapons_combinations_loaded(),
            self.ensure_guild_ideal_staff_loaded(),
            self.ensure_games_list_loaded(),
            self.ensure_epic_items_t2_loaded(),
            self.ensure_events_calendar_loaded(),
            self.ensure_guild_ptb_settings_loaded(),
        );

        self.initial_load_complete.store(true, Ordering::Release);
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            categories = self.loaded.read().len(),
            "Initial shared data load completed"
        );
    }

    /// Block until the initial load completes, up to ten seconds. After
    /// the deadline the caller proceeds anyway with a warning.
    pub async fn wait_for_initial_load(&self) {
        for _ in 0..INITIAL_LOAD_POLLS {
            if self.initial_load_complete.load(Ordering::Acquire) {
                return;
            }
            tokio::time::sleep(INITIAL_LOAD_POLL_INTERVAL).await;
        }
        warn!("Initial load timeout - proceeding anyway");
    }

    pub fn is_loaded(&self) -> bool {
        self.initial_load_complete.load(Ordering::Acquire)
    }

    pub fn is_category_loaded(&self, category: &str) -> bool {
        self.loaded.read().contains(category)
    }

    pub fn loaded_categories(&self) -> HashSet<&'static str> {
        self.loaded.read().clone()
    }

    pub(crate) fn mark_loaded(&self, category: &'static str) {
        self.loaded.write().insert(category);
    }

    pub(crate) fn record_guild(&self, guild_id: u64) {
        self.guild_ids.write().insert(guild_id);
    }

    pub(crate) fn forget_guild(&self, guild_id: u64) {
        self.guild_ids.write().remove(&guild_id);
    }

    /// Run the loader for one category. Already-loaded categories are
    /// no-ops after the initial load; unknown names log a warning.
    pub async fn ensure_category_loaded(&self, category: &str) {
        if self.initial_load_complete.load(Ordering::Acquire) && self.is_category_loaded(category) {
            return;
        }
        match category {
            "guild_settings" => self.ensure_guild_settings_loaded().await,
            "guild_roles" => self.ensure_guild_roles_loaded().await,
            "guild_channels" => self.ensure_guild_channels_loaded().await,
            "welcome_messages" => self.ensure_welcome_messages_loaded().await,
            "absence_messages" => self.ensure_absence_messages_loaded().await,
            "guild_members" => self.ensure_guild_members_loaded().await,
            "events_data" => self.ensure_events_data_loaded().await,
            "static_data" => self.ensure_static_data_loaded().await,
            "static_groups" => self.ensure_static_groups_loaded().await,
            "user_setup" => self.ensure_user_setup_loaded().await,
            "weapons" => self.ensure_weapons_loaded().await,
            "weapons_combinations" => self.ensure_weapons_combinations_loaded().await,
            "guild_ideal_staff" => self.ensure_guild_ideal_staff_loaded().await,
            "games_list" => self.ensure_games_list_loaded().await,
            "epic_items_t2" => self.ensure_epic_items_t2_loaded().await,
            "events_calendar" => self.ensure_events_calendar_loaded().await,
            "guild_ptb_settings" => self.ensure_guild_ptb_settings_loaded().await,
            other => warn!(category = %other, "Unknown cache loader category"),
        }
    }

    /// Drop a category from the loaded set and load it again.
    pub async fn reload_category(&self, category: &str) {
        self.loaded.write().remove(category);
        self.ensure_category_loaded(category).await;
    }

    /// Hook the loader's refresh paths into the cache's predictive
    /// preloading. Registered once by the runtime after construction.
    pub fn register_refreshers(self: &Arc<Self>) {
        self.cache.register_refresher(
            "roster_data:",
            Arc::new(LoaderRefresher {
                loader: Arc::downgrade(self),
            }),
        );
        self.cache.register_refresher(
            "guild_data:",
            Arc::new(LoaderRefresher {
                loader: Arc::downgrade(self),
            }),
        );
    }
}

impl GuildDirectory for CacheLoader {
    fn guild_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.guild_ids.read().iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Preload refresher backed by the loader. Holds a weak reference; the
/// cache owns the refresher and the loader owns the cache.
struct LoaderRefresher {
    loader: Weak<CacheLoader>,
}

#[async_trait::async_trait]
impl CacheRefresher for LoaderRefresher {
    async fn refresh(&self, key: &str) -> bool {
        let Some(loader) = self.loader.upgrade() else {
            return false;
        };

        // roster_data:<guild_id>:bulk_members -> targeted bulk reload
        if let Some(rest) = key.strip_prefix("roster_data:")
            && let Some(guild_id) = rest.strip_suffix(":bulk_members")
            && let Ok(guild_id) = guild_id.parse::<u64>()
        {
            return loader.bulk_guild_members(guild_id, true).await.is_some();
        }

        // guild_data:<guild_id>:settings -> settings category reload
        if let Some(rest) = key.strip_prefix("guild_data:")
            && rest.ends_with(":settings")
        {
            loader.reload_category("guild_settings").await;
            return loader.is_category_loaded("guild_settings");
        }

        false
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! A canned-response `SqlRunner` for loader and command tests.

    use std::collections::HashMap;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::db::{DbError, DbResult, DbRow, SqlParam, SqlRunner};

    #[derive(Default)]
    pub struct MockDb {
        /// Keyed by a distinctive substring of the statement (table name).
        pub responses: HashMap<&'static str, Vec<DbRow>>,
        pub fail_tables: Vec<&'static str>,
        pub calls: Mutex<Vec<String>>,
        pub transactions: Mutex<Vec<Vec<String>>>,
    }

    impl MockDb {
        pub fn with(responses: HashMap<&'static str, Vec<DbRow>>) -> Self {
            Self {
                responses,
                ..Default::default()
            }
        }

        fn lookup(&self, sql: &str) -> DbResult<Vec<DbRow>> {
            self.calls.lock().push(sql.to_string());
            for table in &self.fail_tables {
                if sql.contains(table) {
                    return Err(DbError::Connection);
                }
            }
            for (table, rows) in &self.responses {
                if sql.contains(table) {
                    return Ok(rows.clone());
                }
            }
            Ok(Vec::new())
        }

        pub fn call_count(&self, table: &str) -> usize {
            self.calls.lock().iter().filter(|sql| sql.contains(table)).count()
        }
    }

    #[async_trait]
    impl SqlRunner for MockDb {
        async fn fetch_all(&self, sql: &str, _params: &[SqlParam]) -> DbResult<Vec<DbRow>> {
            self.lookup(sql)
        }

        async fn fetch_one(&self, sql: &str, _params: &[SqlParam]) -> DbResult<Option<DbRow>> {
            Ok(self.lookup(sql)?.into_iter().next())
        }

        async fn execute(&self, sql: &str, _params: &[SqlParam]) -> DbResult<u64> {
            self.lookup(sql)?;
            Ok(1)
        }

        async fn run_transaction(&self, statements: Vec<(String, Vec<SqlParam>)>) -> DbResult<()> {
            for (sql, _) in &statements {
                for table in &self.fail_tables {
                    if sql.contains(table) {
                        return Err(DbError::Constraint("1062".into()));
                    }
                }
            }
            self.transactions
                .lock()
                .push(statements.into_iter().map(|(sql, _)| sql).collect());
            Ok(())
        }
    }
}
