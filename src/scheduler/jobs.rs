//! Job table and fan-out execution helpers.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Timelike};
use chrono_tz::Tz;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, error, info};

use crate::features::{FeatureRegistry, FeatureResult};

/// Per-guild roster updates run under this concurrency cap.
const ROSTER_CONCURRENCY: usize = 5;

/// Per-guild wishlist updates run under this concurrency cap.
const WISHLIST_CONCURRENCY: usize = 3;

/// Spacing between per-guild roster updates, to smooth platform load.
const ROSTER_GUILD_DELAY: Duration = Duration::from_millis(500);

/// When a job fires.
#[derive(Debug, Clone, Copy)]
pub enum Trigger {
    /// At the given local wall-clock times (`HH:MM`).
    Daily(&'static [&'static str]),
    /// Every five minutes.
    EveryFiveMinutes,
}

impl Trigger {
    /// The execution bucket for `now` when the trigger is eligible:
    /// `HH:MM` for daily jobs, `HH:MM:<minute/5>` for 5-minute jobs.
    pub fn bucket(&self, now: DateTime<Tz>) -> Option<String> {
        let hhmm = now.format("%H:%M").to_string();
        match self {
            Trigger::Daily(times) => times.contains(&hhmm.as_str()).then_some(hhmm),
            Trigger::EveryFiveMinutes => (now.minute() % 5 == 0)
                .then(|| format!("{hhmm}:{}", now.minute() / 5)),
        }
    }

    /// 5-minute jobs log lock skips at debug; dailies at warn.
    pub fn quiet_skip(&self) -> bool {
        matches!(self, Trigger::EveryFiveMinutes)
    }
}

/// The core job set, by local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    EpicItemsScrape,
    ContractsDelete,
    RosterUpdate,
    EventsCreate,
    EventsReminder,
    EventsDelete,
    EventsClose,
    AttendanceCheck,
    WishlistUpdate,
}

impl JobKind {
    pub const ALL: [JobKind; 9] = [
        JobKind::EpicItemsScrape,
        JobKind::ContractsDelete,
        JobKind::RosterUpdate,
        JobKind::EventsCreate,
        JobKind::EventsReminder,
        JobKind::EventsDelete,
        JobKind::EventsClose,
        JobKind::AttendanceCheck,
        JobKind::WishlistUpdate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::EpicItemsScrape => "epic_items_scrape",
            JobKind::ContractsDelete => "contracts_delete",
            JobKind::RosterUpdate => "roster_update",
            JobKind::EventsCreate => "events_create",
            JobKind::EventsReminder => "events_reminder",
            JobKind::EventsDelete => "events_delete",
            JobKind::EventsClose => "events_close",
            JobKind::AttendanceCheck => "attendance_check",
            JobKind::WishlistUpdate => "wishlist_update",
        }
    }

    pub fn trigger(&self) -> Trigger {
        match self {
            JobKind::EpicItemsScrape => Trigger::Daily(&["03:30"]),
            JobKind::ContractsDelete => Trigger::Daily(&["06:30"]),
            JobKind::RosterUpdate => Trigger::Daily(&["05:00", "11:00", "17:00", "23:00"]),
            JobKind::EventsCreate => Trigger::Daily(&["12:00"]),
            JobKind::EventsReminder => Trigger::Daily(&["13:00", "18:00"]),
            JobKind::EventsDelete => Trigger::Daily(&["23:30", "04:30"]),
            JobKind::EventsClose => Trigger::EveryFiveMinutes,
            JobKind::AttendanceCheck => Trigger::EveryFiveMinutes,
            JobKind::WishlistUpdate => Trigger::Daily(&["09:00", "22:00"]),
        }
    }

    pub(super) fn index(&self) -> usize {
        Self::ALL.iter().position(|k| k == self).unwrap_or(0)
    }
}

/// Guild enumeration for fan-out jobs. Implemented by the cache loader.
pub trait GuildDirectory: Send + Sync {
    fn guild_ids(&self) -> Vec<u64>;
}

/// Run a job's body. Absent feature modules short-circuit the tick with a
/// warning from the registry lookup.
pub(super) async fn run_job(
    kind: JobKind,
    features: &FeatureRegistry,
    guilds: &Arc<dyn GuildDirectory>,
) -> FeatureResult {
    match kind {
        JobKind::EpicItemsScrape => match features.scraper() {
            Some(scraper) => {
                info!("Automatic epic items scraping triggered");
                scraper.scrape_epic_items().await
            }
            None => Ok(()),
        },
        JobKind::ContractsDelete => match features.contracts() {
            Some(contracts) => {
                info!("Automatic deletion of expired contracts");
                contracts.delete_expired_contracts().await
            }
            None => Ok(()),
        },
        JobKind::RosterUpdate => {
            if features.roster().is_some() {
                info!("Launching roster update for all guilds");
                update_rosters(features, guilds).await;
            }
            Ok(())
        }
        JobKind::EventsCreate => match features.events() {
            Some(events) => {
                info!("Automatic event creation triggered");
                events.create_events_for_premium_guilds().await
            }
            None => Ok(()),
        },
        JobKind::EventsReminder => match features.events() {
            Some(events) => {
                info!("Automatic registration reminder triggered");
                events.send_event_reminders().await
            }
            None => Ok(()),
        },
        JobKind::EventsDelete => match features.events() {
            Some(events) => {
                info!("Automatic deletion of finished events");
                events.delete_finished_events().await
            }
            None => Ok(()),
        },
        JobKind::EventsClose => match features.events() {
            Some(events) => {
                info!("Automatic closure of confirmed events");
                events.close_confirmed_events().await
            }
            None => Ok(()),
        },
        JobKind::AttendanceCheck => match features.attendance() {
            Some(attendance) => {
                debug!("Automatic voice presence check");
                attendance.check_voice_presence().await
            }
            None => Ok(()),
        },
        JobKind::WishlistUpdate => {
            if features.wishlist().is_some() {
                info!("Automatic wishlist update triggered");
                update_wishlists(features, guilds).await;
            }
            Ok(())
        }
    }
}

/// Roster fan-out: every guild under a small semaphore, spaced out, each
/// followed by a static-groups message refresh when the events module is
/// installed. Per-guild failures are logged and do not stop the sweep.
async fn update_rosters(features: &FeatureRegistry, guilds: &Arc<dyn GuildDirectory>) {
    let guild_ids = guilds.guild_ids();
    if guild_ids.is_empty() {
        info!("No guilds found for roster update");
        return;
    }
    let Some(roster) = features.roster() else {
        return;
    };
    let events = features.events();

    let semaphore = Arc::new(Semaphore::new(ROSTER_CONCURRENCY));
    let mut tasks = JoinSet::new();
    for guild_id in guild_ids.iter().copied() {
        let semaphore = Arc::clone(&semaphore);
        let roster = Arc::clone(&roster);
        let events = events.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            match roster.update_roster(guild_id).await {
                Ok(()) => {
                    debug!(guild_id, "Roster updated");
                    if let Some(events) = events
                        && let Err(e) = events.update_static_groups_message(guild_id).await
                    {
                        error!(guild_id, error = %e, "Static groups update failed");
                    }
                }
                Err(e) => error!(guild_id, error = %e, "Roster update failed"),
            }
            tokio::time::sleep(ROSTER_GUILD_DELAY).await;
        });
    }
    while tasks.join_next().await.is_some() {}
    info!(guilds = guild_ids.len(), "Roster update completed");
}

/// Wishlist fan-out with a lower concurrency cap; counts outcomes.
async fn update_wishlists(features: &FeatureRegistry, guilds: &Arc<dyn GuildDirectory>) {
    let guild_ids = guilds.guild_ids();
    if guild_ids.is_empty() {
        info!("No guilds found for wishlist update");
        return;
    }
    let Some(wishlist) = features.wishlist() else {
        return;
    };

    let semaphore = Arc::new(Semaphore::new(WISHLIST_CONCURRENCY));
    let mut tasks = JoinSet::new();
    for guild_id in guild_ids.iter().copied() {
        let semaphore = Arc::clone(&semaphore);
        let wishlist = Arc::clone(&wishlist);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            match wishlist.update_wishlist_message(guild_id).await {
                Ok(true) => {
                    debug!(guild_id, "Wishlist updated");
                    true
                }
                Ok(false) => {
                    debug!(guild_id, "Wishlist update was a no-op");
                    false
                }
                Err(e) => {
                    error!(guild_id, error = %e, "Wishlist update failed");
                    false
                }
            }
        });
    }

    let mut successful = 0usize;
    let mut failed = 0usize;
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(true) => successful += 1,
            _ => failed += 1,
        }
    }
    info!(successful, failed, "Wishlist update completed");
}
