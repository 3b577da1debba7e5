//! Typed interfaces for feature modules and their registry.
//!
//! Feature modules (events, roster, attendance, wishlist, item scraping,
//! contracts) are external collaborators: they consume the runtime core and
//! the scheduler drives them through the capability traits below. The
//! registry holds one slot per interface; looking up an absent module
//! returns `None` and logs a warning, and the scheduler skips that job for
//! the tick.
//!
//! The runtime context never references concrete modules, only this
//! registry.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct FeatureError(pub String);

pub type FeatureResult = Result<(), FeatureError>;

/// Base trait every feature module implements.
pub trait FeatureModule: Send + Sync {
    fn name(&self) -> &'static str;
}

/// Guild event lifecycle: creation, reminders, closure and deletion.
#[async_trait]
pub trait EventsFeature: FeatureModule {
    async fn create_events_for_premium_guilds(&self) -> FeatureResult;

    async fn send_event_reminders(&self) -> FeatureResult;

    async fn delete_finished_events(&self) -> FeatureResult;

    async fn close_confirmed_events(&self) -> FeatureResult;

    /// Refresh the static-groups message after a roster change.
    async fn update_static_groups_message(&self, guild_id: u64) -> FeatureResult;
}

/// Roster synchronization against the chat platform.
#[async_trait]
pub trait RosterFeature: FeatureModule {
    async fn update_roster(&self, guild_id: u64) -> FeatureResult;
}

/// Voice-presence attendance accounting.
#[async_trait]
pub trait AttendanceFeature: FeatureModule {
    async fn check_voice_presence(&self) -> FeatureResult;
}

/// Loot wishlist publication.
#[async_trait]
pub trait WishlistFeature: FeatureModule {
    /// Returns `true` when the guild's wishlist message was updated.
    async fn update_wishlist_message(&self, guild_id: u64) -> Result<bool, FeatureError>;
}

/// Epic item catalog scraping.
#[async_trait]
pub trait ScraperFeature: FeatureModule {
    async fn scrape_epic_items(&self) -> FeatureResult;
}

/// Expired-contract housekeeping.
#[async_trait]
pub trait ContractsFeature: FeatureModule {
    async fn delete_expired_contracts(&self) -> FeatureResult;
}

#[derive(Default)]
struct Slots {
    events: Option<Arc<dyn EventsFeature>>,
    roster: Option<Arc<dyn RosterFeature>>,
    attendance: Option<Arc<dyn AttendanceFeature>>,
    wishlist: Option<Arc<dyn WishlistFeature>>,
    scraper: Option<Arc<dyn ScraperFeature>>,
    contracts: Option<Arc<dyn ContractsFeature>>,
}

/// Registry of installed feature modules, keyed by interface.
#[derive(Clone, Default)]
pub struct FeatureRegistry {
    slots: Arc<RwLock<Slots>>,
}

macro_rules! slot_accessors {
    ($register:ident, $get:ident, $field:ident, $trait_obj:ty, $label:literal) => {
        pub fn $register(&self, module: Arc<$trait_obj>) {
            tracing::info!(module = module.name(), "Feature module registered");
            self.slots.write().$field = Some(module);
        }

        /// The installed module, or `None` with a warning when absent.
        pub fn $get(&self) -> Option<Arc<$trait_obj>> {
            let slot = self.slots.read().$field.clone();
            if slot.is_none() {
                warn!(concat!($label, " module not found, skipping related tasks"));
            }
            slot
        }
    };
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    slot_accessors!(register_events, events, events, dyn EventsFeature, "Events");
    slot_accessors!(register_roster, roster, roster, dyn RosterFeature, "Roster");
    slot_accessors!(
        register_attendance,
        attendance,
        attendance,
        dyn AttendanceFeature,
        "Attendance"
    );
    slot_accessors!(
        register_wishlist,
        wishlist,
        wishlist,
        dyn WishlistFeature,
        "Wishlist"
    );
    slot_accessors!(register_scraper, scraper, scraper, dyn ScraperFeature, "Scraper");
    slot_accessors!(
        register_contracts,
        contracts,
        contracts,
        dyn ContractsFeature,
        "Contracts"
    );

    /// Names of every installed module.
    pub fn registered(&self) -> Vec<&'static str> {
        let slots = self.slots.read();
        let mut names = Vec::new();
        if let Some(m) = &slots.events {
            names.push(m.name());
        }
        if let Some(m) = &slots.roster {
            names.push(m.name());
        }
        if let Some(m) = &slots.attendance {
            names.push(m.name());
        }
        if let Some(m) = &slots.wishlist {
            names.push(m.name());
        }
        if let Some(m) = &slots.scraper {
            names.push(m.name());
        }
        if let Some(m) = &slots.contracts {
            names.push(m.name());
        }
        names
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::{test_support::*, *};

    #[test]
    fn test_empty_registry_returns_none() {
        let registry = FeatureRegistry::new();
        assert!(registry.events().is_none());
        assert!(registry.roster().is_none());
        assert!(registry.registered().is_empty());
    }

    #[tokio::test]
    async fn test_registered_module_is_returned() {
        let registry = FeatureRegistry::new();
        let events = Arc::new(RecordingEvents::default());
        registry.register_events(events.clone());

        let installed = registry.events().expect("registered module");
        installed.create_events_for_premium_guilds().await.unwrap();
        assert_eq!(events.created.load(Ordering::SeqCst), 1);
        assert_eq!(registry.registered(), vec!["guild_events"]);
    }

    #[test]
    fn test_latest_registration_wins() {
        let registry = FeatureRegistry::new();
        registry.register_roster(Arc::new(RecordingRoster::default()));
        registry.register_roster(Arc::new(RecordingRoster {
            fail: true,
            ..Default::default()
        }));
        assert_eq!(registry.registered(), vec!["guild_members"]);
    }
}
