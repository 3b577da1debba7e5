//! Cache categories and their default TTLs.

use std::time::Duration;

use serde::Serialize;

/// Default TTL when no category-specific value applies.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Closed set of cache categories.
///
/// Each category groups entries with a shared default TTL and its own
/// refresh policy (event-driven, cron-driven, or transient).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Guild settings, roles, channels. Event-driven + fail-safe.
    GuildData,
    /// User profiles and setup data. Event-driven + fail-safe.
    UserData,
    /// Events and registrations. Daily cron + fail-safe.
    EventsData,
    /// Guild members and roster info. 6-hour cron + fail-safe.
    RosterData,
    /// Weapons, combinations, static configs. Daily cron + fail-safe.
    StaticData,
    /// Chat-platform members, channels, guilds. Event-driven + fail-safe.
    DiscordEntities,
    /// Short-term scratch values.
    Temporary,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::GuildData,
        Category::UserData,
        Category::EventsData,
        Category::RosterData,
        Category::StaticData,
        Category::DiscordEntities,
        Category::Temporary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::GuildData => "guild_data",
            Category::UserData => "user_data",
            Category::EventsData => "events_data",
            Category::RosterData => "roster_data",
            Category::StaticData => "static_data",
            Category::DiscordEntities => "discord_entities",
            Category::Temporary => "temporary",
        }
    }

    pub fn ttl(&self) -> Duration {
        let secs = match self {
            Category::GuildData => 86_400,
            Category::UserData => 7_200,
            Category::EventsData => 90_000,
            Category::RosterData => 25_200,
            Category::StaticData => 90_000,
            Category::DiscordEntities => 7_200,
            Category::Temporary => 300,
        };
        Duration::from_secs(secs)
    }

    /// Stable index used by the per-category metrics table.
    pub(super) fn index(&self) -> usize {
        match self {
            Category::GuildData => 0,
            Category::UserData => 1,
            Category::EventsData => 2,
            Category::RosterData => 3,
            Category::StaticData => 4,
            Category::DiscordEntities => 5,
            Category::Temporary => 6,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
