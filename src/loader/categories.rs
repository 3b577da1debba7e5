//! Per-category loaders: SQL, row composition and cache writes.

use std::{collections::BTreeMap, time::Duration};

use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use super::CacheLoader;
use crate::{
    cache::{Category, KeyPart},
    db::{DbResult, DbRow},
};

/// Bulk member snapshots are short-lived; rosters move often.
const BULK_MEMBERS_TTL: Duration = Duration::from_secs(600);

/// Calendar data changes rarely; cache a full day regardless of the
/// static_data default.
const EVENTS_CALENDAR_TTL: Duration = Duration::from_secs(86_400);

macro_rules! category_loader {
    ($ensure:ident, $load:ident, $category:literal, $what:literal) => {
        pub(super) async fn $ensure(&self) {
            if self.is_category_loaded($category) {
                return;
            }
            debug!(concat!("Loading ", $what));
            match self.$load().await {
                Ok(count) => {
                    self.mark_loaded($category);
                    info!(rows = count, concat!("Loaded ", $what));
                }
                Err(e) => error!(error = %e, concat!("Error loading ", $what)),
            }
        }
    };
}

impl CacheLoader {
    category_loader!(
        ensure_guild_settings_loaded,
        load_guild_settings,
        "guild_settings",
        "guild settings for all guilds"
    );
    category_loader!(
        ensure_guild_roles_loaded,
        load_guild_roles,
        "guild_roles",
        "guild roles for all guilds"
    );
    category_loader!(
        ensure_guild_channels_loaded,
        load_guild_channels,
        "guild_channels",
        "guild channels for all guilds"
    );
    category_loader!(
        ensure_welcome_messages_loaded,
        load_welcome_messages,
        "welcome_messages",
        "welcome messages"
    );
    category_loader!(
        ensure_guild_members_loaded,
        load_guild_members,
        "guild_members",
        "guild members for all guilds"
    );
    category_loader!(
        ensure_events_data_loaded,
        load_events_data,
        "events_data",
        "events data for all guilds"
    );
    category_loader!(
        ensure_static_groups_loaded,
        load_static_groups,
        "static_groups",
        "static groups"
    );
    category_loader!(
        ensure_user_setup_loaded,
        load_user_setup,
        "user_setup",
        "user setup data"
    );
    category_loader!(ensure_weapons_loaded, load_weapons, "weapons", "weapons data");
    category_loader!(
        ensure_weapons_combinations_loaded,
        load_weapons_combinations,
        "weapons_combinations",
        "weapons combinations"
    );
    category_loader!(
        ensure_guild_ideal_staff_loaded,
        load_guild_ideal_staff,
        "guild_ideal_staff",
        "guild ideal staff"
    );
    category_loader!(
        ensure_games_list_loaded,
        load_games_list,
        "games_list",
        "games list"
    );
    category_loader!(
        ensure_epic_items_t2_loaded,
        load_epic_items_t2,
        "epic_items_t2",
        "epic T2 items"
    );
    category_loader!(
        ensure_events_calendar_loaded,
        load_events_calendar,
        "events_calendar",
        "events calendar"
    );
    category_loader!(
        ensure_guild_ptb_settings_loaded,
        load_guild_ptb_settings,
        "guild_ptb_settings",
        "guild PTB settings"
    );

    /// Absence messages change too often to cache; they are read straight
    /// from the database. Only the marker is recorded.
    pub(super) async fn ensure_absence_messages_loaded(&self) {
        if self.is_category_loaded("absence_messages") {
            return;
        }
        debug!("Absence messages are managed directly via DB (high frequency data)");
        self.mark_loaded("absence_messages");
    }

    /// Static data beyond groups is loaded on demand; groups are the
    /// startup-critical part.
    pub(super) async fn ensure_static_data_loaded(&self) {
        if self.is_category_loaded("static_data") {
            return;
        }
        self.ensure_static_groups_loaded().await;
        self.mark_loaded("static_data");
    }

    async fn load_guild_settings(&self) -> DbResult<usize> {
        const SQL: &str = "SELECT guild_id, guild_ptb, guild_lang, guild_name, guild_game, \
                           guild_server, initialized, premium FROM guild_settings";
        const FIELDS: [&str; 7] = [
            "guild_ptb",
            "guild_lang",
            "guild_name",
            "guild_game",
            "guild_server",
            "initialized",
            "premium",
        ];

        let rows = self.db.fetch_all(SQL, &[]).await?;
        for row in &rows {
            let guild_id = row.u64(0)?;
            self.record_guild(guild_id);

            let mut settings = Map::new();
            for (i, field) in FIELDS.iter().enumerate() {
                let value = row.json(i + 1)?;
                self.cache
                    .set_guild_data(guild_id, field, value.clone())
                    .await;
                settings.insert((*field).to_string(), value);
            }
            self.cache
                .set_guild_data(guild_id, "settings", Value::Object(settings))
                .await;
        }
        Ok(rows.len())
    }

    async fn load_guild_roles(&self) -> DbResult<usize> {
        const SQL: &str = "SELECT guild_id, guild_master, officer, guardian, members, \
                           absent_members, allies, diplomats, friends, applicant, config_ok, \
                           rules_ok FROM guild_roles";
        const FIELDS: [&str; 11] = [
            "guild_master",
            "officer",
            "guardian",
            "members",
            "absent_members",
            "allies",
            "diplomats",
            "friends",
            "applicant",
            "config_ok",
            "rules_ok",
        ];

        let rows = self.db.fetch_all(SQL, &[]).await?;
        for row in &rows {
            let guild_id = row.u64(0)?;

            let mut roles = Map::new();
            for (i, field) in FIELDS.iter().enumerate() {
                roles.insert((*field).to_string(), row.json(i + 1)?);
            }
            self.cache
                .set_guild_data(guild_id, "roles", Value::Object(roles))
                .await;

            // Frequently checked roles also get direct entries.
            if let Some(members) = row.opt_u64(4)? {
                self.cache
                    .set_guild_data(guild_id, "members_role", json!(members))
                    .await;
            }
            if let Some(absent) = row.opt_u64(5)? {
                self.cache
                    .set_guild_data(guild_id, "absent_members_role", json!(absent))
                    .await;
            }
            if let Some(rules_ok) = row.opt_u64(11)? {
                self.cache
                    .set_guild_data(guild_id, "rules_ok_role", json!(rules_ok))
                    .await;
            }
        }
        Ok(rows.len())
    }

    async fn load_guild_channels(&self) -> DbResult<usize> {
        const SQL: &str = "SELECT guild_id, rules_channel, rules_message, announcements_channel, \
                           voice_tavern_channel, voice_war_channel, create_room_channel, \
                           events_channel, members_channel, members_m1, members_m2, members_m3, \
                           members_m4, members_m5, groups_channel, statics_channel, \
                           statics_message, abs_channel, loot_channel, loot_message, tuto_channel, \
                           forum_allies_channel, forum_friends_channel, forum_diplomats_channel, \
                           forum_recruitment_channel, forum_members_channel, \
                           notifications_channel, external_recruitment_cat, category_diplomat, \
                           external_recruitment_channel, external_recruitment_message \
                           FROM guild_channels";
        const FIELDS: [&str; 30] = [
            "rules_channel",
            "rules_message",
            "announcements_channel",
            "voice_tavern_channel",
            "voice_war_channel",
            "create_room_channel",
            "events_channel",
            "members_channel",
            "members_m1",
            "members_m2",
            "members_m3",
            "members_m4",
            "members_m5",
            "groups_channel",
            "statics_channel",
            "statics_message",
            "abs_channel",
            "loot_channel",
            "loot_message",
            "tuto_channel",
            "forum_allies_channel",
            "forum_friends_channel",
            "forum_diplomats_channel",
            "forum_recruitment_channel",
            "forum_members_channel",
            "notifications_channel",
            "external_recruitment_cat",
            "category_diplomat",
            "external_recruitment_channel",
            "external_recruitment_message",
        ];

        let rows = self.db.fetch_all(SQL, &[]).await?;
        for row in &rows {
            let guild_id = row.u64(0)?;

            let mut channels = Map::new();
            for (i, field) in FIELDS.iter().enumerate() {
                channels.insert((*field).to_string(), row.json(i + 1)?);
            }
            self.cache
                .set_guild_data(guild_id, "channels", Value::Object(channels))
                .await;

            // Individual entries for the channels feature modules resolve
            // on the hot path, plus composed channel+message pairs.
            if row.opt_u64(8)?.is_some() {
                for (field, index) in [
                    ("members_channel", 8),
                    ("members_m1", 9),
                    ("members_m2", 10),
                    ("members_m3", 11),
                    ("members_m4", 12),
                    ("members_m5", 13),
                ] {
                    self.cache
                        .set_guild_data(guild_id, field, row.json(index)?)
                        .await;
                }
            }

            if row.opt_u64(29)?.is_some() {
                self.cache
                    .set_guild_data(guild_id, "external_recruitment_channel", row.json(29)?)
                    .await;
                self.cache
                    .set_guild_data(guild_id, "external_recruitment_message", row.json(30)?)
                    .await;
            }

            if let (Some(channel), Some(message)) = (row.opt_u64(1)?, row.opt_u64(2)?) {
                self.cache
                    .set_guild_data(
                        guild_id,
                        "rules_message",
                        json!({"channel": channel, "message": message}),
                    )
                    .await;
            }

            if let Some(abs_channel) = row.opt_u64(17)? {
                self.cache
                    .set_guild_data(
                        guild_id,
                        "absence_channels",
                        json!({
                            "abs_channel": abs_channel,
                            "forum_members_channel": row.json(25)?,
                        }),
                    )
                    .await;
            }

            if let Some(events_channel) = row.opt_u64(7)? {
                self.cache
                    .set_guild_data(guild_id, "events_channel", json!(events_channel))
                    .await;
            }

            if let Some(create_room) = row.opt_u64(6)? {
                self.cache
                    .set_guild_data(guild_id, "create_room_channel", json!(create_room))
                    .await;
            }

            if let (Some(channel), Some(message)) = (row.opt_u64(18)?, row.opt_u64(19)?) {
                self.cache
                    .set_guild_data(
                        guild_id,
                        "loot_message",
                        json!({"channel": channel, "message": message}),
                    )
                    .await;
            }
        }
        Ok(rows.len())
    }

    async fn load_welcome_messages(&self) -> DbResult<usize> {
        const SQL: &str =
            "SELECT guild_id, member_id, channel_id, message_id FROM welcome_messages";

        let rows = self.db.fetch_all(SQL, &[]).await?;
        for row in &rows {
            let guild_id = row.u64(0)?;
            let member_id = row.u64(1)?;
            self.cache
                .set_user_data(
                    guild_id,
                    member_id,
                    "welcome_message",
                    json!({"channel": row.json(2)?, "message": row.json(3)?}),
                )
                .await;
        }
        Ok(rows.len())
    }

    async fn load_guild_members(&self) -> DbResult<usize> {
        const SQL: &str = "SELECT guild_id, member_id, username, language, class, GS, build, \
                           weapons, DKP, nb_events, registrations, attendances FROM guild_members";

        let rows = self.db.fetch_all(SQL, &[]).await?;
        let mut roster = Map::new();
        for row in &rows {
            let guild_id = row.u64(0)?;
            let member_id = row.u64(1)?;
            roster.insert(
                format!("{guild_id}:{member_id}"),
                json!({
                    "username": row.json(2)?,
                    "language": row.json(3)?,
                    "class": row.json(4)?,
                    "GS": row.json(5)?,
                    "build": row.json(6)?,
                    "weapons": row.json(7)?,
                    "DKP": row.opt_i64(8)?.unwrap_or(0),
                    "nb_events": row.opt_i64(9)?.unwrap_or(0),
                    "registrations": row.opt_i64(10)?.unwrap_or(0),
                    "attendances": row.opt_i64(11)?.unwrap_or(0),
                }),
            );
        }
        self.cache
            .set(
                Category::RosterData,
                Value::Object(roster),
                &[KeyPart::from("guild_members")],
                None,
            )
            .await;
        Ok(rows.len())
    }

    async fn load_events_data(&self) -> DbResult<usize> {
        const SQL: &str = "SELECT guild_id, event_id, name, event_date, event_time, duration, \
                           dkp_value, status, registrations, actual_presence FROM events_data";

        let rows = self.db.fetch_all(SQL, &[]).await?;
        for row in &rows {
            let guild_id = row.u64(0)?;
            let event_id = row.u64(1)?;
            self.cache
                .set_guild_data(
                    guild_id,
                    &format!("event_{event_id}"),
                    json!({
                        "event_id": event_id,
                        "name": row.json(2)?,
                        "event_date": row.json(3)?,
                        "event_time": row.json(4)?,
                        "duration": row.json(5)?,
                        "dkp_value": row.json(6)?,
                        "status": row.json(7)?,
                        "registrations": row.json(8)?,
                        "actual_presence": row.json(9)?,
                    }),
                )
                .await;
        }
        Ok(rows.len())
    }

    async fn load_static_groups(&self) -> DbResult<usize> {
        const SQL: &str = "SELECT g.guild_id, g.group_name, g.leader_id, \
                           GROUP_CONCAT(m.member_id ORDER BY m.position_order) AS member_ids \
                           FROM guild_static_groups g \
                           LEFT JOIN guild_static_members m ON g.id = m.group_id \
                           WHERE g.is_active = TRUE \
                           GROUP BY g.guild_id, g.group_name, g.leader_id";

        let rows = self.db.fetch_all(SQL, &[]).await?;
        let mut by_guild: BTreeMap<u64, Map<String, Value>> = BTreeMap::new();
        for row in &rows {
            let guild_id = row.u64(0)?;
            let group_name = row.text(1)?;
            let member_ids: Vec<u64> = row
                .opt_text(3)?
                .unwrap_or_default()
                .split(',')
                .filter_map(|id| id.trim().parse().ok())
                .collect();

            by_guild.entry(guild_id).or_default().insert(
                group_name,
                json!({
                    "leader_id": row.json(2)?,
                    "member_ids": member_ids,
                }),
            );
        }

        let guilds = by_guild.len();
        for (guild_id, groups) in by_guild {
            self.cache
                .set_guild_data(guild_id, "static_groups", Value::Object(groups))
                .await;
        }
        Ok(guilds)
    }

    async fn load_user_setup(&self) -> DbResult<usize> {
        const SQL: &str = "SELECT guild_id, user_id, locale, gs, weapons FROM user_setup";

        let rows = self.db.fetch_all(SQL, &[]).await?;
        for row in &rows {
            let guild_id = row.u64(0)?;
            let user_id = row.u64(1)?;
            self.cache
                .set_user_data(
                    guild_id,
                    user_id,
                    "setup",
                    json!({
                        "locale": row.json(2)?,
                        "gs": row.json(3)?,
                        "weapons": row.json(4)?,
                    }),
                )
                .await;
        }
        Ok(rows.len())
    }

    async fn load_weapons(&self) -> DbResult<usize> {
        const SQL: &str = "SELECT game_id, code, name FROM weapons ORDER BY game_id";

        let rows = self.db.fetch_all(SQL, &[]).await?;
        let mut by_game: Map<String, Value> = Map::new();
        for row in &rows {
            let game_id = row.u64(0)?;
            let code = row.text(1)?;
            if let Some(game) = by_game
                .entry(game_id.to_string())
                .or_insert_with(|| Value::Object(Map::new()))
                .as_object_mut()
            {
                game.insert(code, row.json(2)?);
            }
        }
        self.cache
            .set_static_data("weapons", Value::Object(by_game), None)
            .await;
        Ok(rows.len())
    }

    async fn load_weapons_combinations(&self) -> DbResult<usize> {
        const SQL: &str =
            "SELECT game_id, role, weapon1, weapon2 FROM weapons_combinations ORDER BY game_id";

        let rows = self.db.fetch_all(SQL, &[]).await?;
        let mut by_game: Map<String, Value> = Map::new();
        for row in &rows {
            let game_id = row.u64(0)?;
            let combination = json!({
                "role": row.json(1)?,
                "weapon1": row.text(2)?.to_uppercase(),
                "weapon2": row.text(3)?.to_uppercase(),
            });
            if let Some(list) = by_game
                .entry(game_id.to_string())
                .or_insert_with(|| Value::Array(Vec::new()))
                .as_array_mut()
            {
                list.push(combination);
            }
        }
        self.cache
            .set_static_data("weapons_combinations", Value::Object(by_game), None)
            .await;
        Ok(rows.len())
    }

    async fn load_guild_ideal_staff(&self) -> DbResult<usize> {
        const SQL: &str = "SELECT guild_id, class_name, ideal_count FROM guild_ideal_staff";

        let rows = self.db.fetch_all(SQL, &[]).await?;
        let mut by_guild: Map<String, Value> = Map::new();
        for row in &rows {
            let guild_id = row.u64(0)?;
            let class_name = row.text(1)?;
            if let Some(guild) = by_guild
                .entry(guild_id.to_string())
                .or_insert_with(|| Value::Object(Map::new()))
                .as_object_mut()
            {
                guild.insert(class_name, row.json(2)?);
            }
        }
        self.cache
            .set(
                Category::GuildData,
                Value::Object(by_guild),
                &[KeyPart::from("ideal_staff")],
                None,
            )
            .await;
        Ok(rows.len())
    }

    async fn load_games_list(&self) -> DbResult<usize> {
        const SQL: &str = "SELECT id, game_name, max_members FROM games_list";

        let rows = self.db.fetch_all(SQL, &[]).await?;
        let mut games: Map<String, Value> = Map::new();
        for row in &rows {
            let game_id = row.u64(0)?;
            games.insert(
                game_id.to_string(),
                json!({
                    "game_name": row.json(1)?,
                    "max_members": row.json(2)?,
                }),
            );
        }
        self.cache
            .set_static_data("games_list", Value::Object(games), None)
            .await;
        Ok(rows.len())
    }

    async fn load_epic_items_t2(&self) -> DbResult<usize> {
        const SQL: &str = "SELECT item_id, item_name_en, item_type, item_category, \
                           item_icon_url, item_url, item_name_fr, item_name_es, item_name_de \
                           FROM epic_items_t2";

        let rows = self.db.fetch_all(SQL, &[]).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let item_id = row.u64(0)?;
            items.push(json!({
                "item_id": item_id,
                "item_name_en": row.json(1)?,
                "item_type": row.opt_text(2)?.unwrap_or_else(|| "Unknown".into()),
                "item_category": row.opt_text(3)?.unwrap_or_else(|| "Unknown".into()),
                "item_icon_url": row.opt_text(4)?.unwrap_or_default(),
                "item_url": row.opt_text(5)?.unwrap_or_else(|| {
                    format!("https://questlog.gg/throne-and-liberty/en/db/item/{item_id}")
                }),
                "item_name_fr": row.opt_text(6)?.unwrap_or_default(),
                "item_name_es": row.opt_text(7)?.unwrap_or_default(),
                "item_name_de": row.opt_text(8)?.unwrap_or_default(),
            }));
        }
        self.cache
            .set_static_data("epic_items_t2", Value::Array(items), None)
            .await;
        Ok(rows.len())
    }

    async fn load_events_calendar(&self) -> DbResult<usize> {
        const SQL: &str = "SELECT game_id, id, name, day, time, duration, week, dkp_value, \
                           dkp_ins FROM events_calendar ORDER BY game_id, id";

        let rows = self.db.fetch_all(SQL, &[]).await?;
        let mut by_game: BTreeMap<u64, Vec<Value>> = BTreeMap::new();
        for row in &rows {
            let game_id = row.u64(0)?;
            by_game.entry(game_id).or_default().push(json!({
                "id": row.u64(1)?,
                "name": row.json(2)?,
                "day": row.json(3)?,
                "time": row.opt_text(4)?.unwrap_or_default(),
                "duration": row.opt_i64(5)?.unwrap_or(0),
                "week": row.json(6)?,
                "dkp_value": row.opt_i64(7)?.unwrap_or(0),
                "dkp_ins": row.opt_i64(8)?.unwrap_or(0),
            }));
        }

        for (game_id, events) in &by_game {
            self.cache
                .set(
                    Category::StaticData,
                    json!({"events": events}),
                    &[KeyPart::from(format!("events_calendar_{game_id}"))],
                    Some(EVENTS_CALENDAR_TTL),
                )
                .await;
        }
        Ok(rows.len())
    }

    async fn load_guild_ptb_settings(&self) -> DbResult<usize> {
        const SQL: &str = "SELECT guild_id, ptb_guild_id, info_channel_id, \
                           g1_role_id, g1_channel_id, g2_role_id, g2_channel_id, \
                           g3_role_id, g3_channel_id, g4_role_id, g4_channel_id, \
                           g5_role_id, g5_channel_id, g6_role_id, g6_channel_id, \
                           g7_role_id, g7_channel_id, g8_role_id, g8_channel_id, \
                           g9_role_id, g9_channel_id, g10_role_id, g10_channel_id, \
                           g11_role_id, g11_channel_id, g12_role_id, g12_channel_id \
                           FROM guild_ptb_settings";

        let rows = self.db.fetch_all(SQL, &[]).await?;
        for row in &rows {
            let guild_id = row.u64(0)?;

            let mut groups = Map::new();
            for group in 1..=12usize {
                let role_index = 1 + group * 2;
                let channel_index = role_index + 1;
                if let (Some(role_id), Some(channel_id)) =
                    (row.opt_u64(role_index)?, row.opt_u64(channel_index)?)
                {
                    groups.insert(
                        format!("G{group}"),
                        json!({"role_id": role_id, "channel_id": channel_id}),
                    );
                }
            }

            self.cache
                .set_guild_data(
                    guild_id,
                    "ptb_settings",
                    json!({
                        "ptb_guild_id": row.json(1)?,
                        "info_channel_id": row.json(2)?,
                        "groups": groups,
                    }),
                )
                .await;
        }
        Ok(rows.len())
    }

    /// Full member snapshot for one guild, joined with user locales.
    /// Serves command paths and the predictive preloader; results are
    /// cached for ten minutes.
    pub async fn bulk_guild_members(&self, guild_id: u64, force_refresh: bool) -> Option<Value> {
        let key = [KeyPart::from(guild_id), KeyPart::from("bulk_members")];
        if !force_refresh
            && let Some(cached) = self.cache.get(Category::RosterData, &key).await
        {
            return Some(cached);
        }

        const SQL: &str = "SELECT gm.member_id, gm.username, gm.language, gm.GS, gm.build, \
                           gm.weapons, gm.DKP, gm.nb_events, gm.registrations, gm.attendances, \
                           gm.class, us.locale \
                           FROM guild_members gm \
                           LEFT JOIN user_setup us \
                           ON gm.guild_id = us.guild_id AND gm.member_id = us.user_id \
                           WHERE gm.guild_id = ? \
                           ORDER BY gm.class, gm.GS DESC";

        let started = std::time::Instant::now();
        let rows = match self.db.fetch_all(SQL, &[guild_id.into()]).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(guild_id, error = %e, "Bulk guild members query failed");
                return None;
            }
        };

        let members = match compose_bulk_members(&rows) {
            Ok(members) => members,
            Err(e) => {
                error!(guild_id, error = %e, "Bulk guild members row decode failed");
                return None;
            }
        };

        let elapsed = started.elapsed();
        if elapsed > Duration::from_millis(100) {
            warn!(
                guild_id,
                elapsed_ms = elapsed.as_millis() as u64,
                members = members.as_object().map(Map::len).unwrap_or(0),
                "Slow bulk guild members query"
            );
        }

        self.cache
            .set(
                Category::RosterData,
                members.clone(),
                &key,
                Some(BULK_MEMBERS_TTL),
            )
            .await;
        Some(members)
    }
}

fn compose_bulk_members(rows: &[DbRow]) -> DbResult<Value> {
    let mut members = Map::new();
    for row in rows {
        let member_id = row.u64(0)?;
        members.insert(
            member_id.to_string(),
            json!({
                "username": row.json(1)?,
                "language": row.json(2)?,
                "GS": row.json(3)?,
                "build": row.json(4)?,
                "weapons": row.json(5)?,
                "DKP": row.json(6)?,
                "nb_events": row.json(7)?,
                "registrations": row.json(8)?,
                "attendances": row.json(9)?,
                "class": row.json(10)?,
                "locale": row.json(11)?,
            }),
        );
    }
    Ok(Value::Object(members))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use serde_json::json;

    use super::*;
    use crate::{
        cache::CacheStore,
        db::SqlValue,
        loader::test_support::MockDb,
    };

    fn loader_for(table: &'static str, rows: Vec<DbRow>) -> Arc<CacheLoader> {
        let mut responses = HashMap::new();
        responses.insert(table, rows);
        CacheLoader::new(
            Arc::new(MockDb::with(responses)),
            Arc::new(CacheStore::new()),
        )
    }

    fn u(v: u64) -> SqlValue {
        SqlValue::Uint(v)
    }

    fn t(v: &str) -> SqlValue {
        SqlValue::Text(v.to_string())
    }

    #[tokio::test]
    async fn test_guild_channels_conditional_entries() {
        let mut cells = vec![u(5)];
        // rules_channel + rules_message present, everything else null
        // except events_channel and the loot pair.
        cells.push(u(100)); // rules_channel
        cells.push(u(101)); // rules_message
        cells.extend(std::iter::repeat_n(SqlValue::Null, 4)); // idx 3..=6
        cells.push(u(107)); // events_channel
        cells.extend(std::iter::repeat_n(SqlValue::Null, 10)); // idx 8..=17
        cells.push(u(118)); // loot_channel
        cells.push(u(119)); // loot_message
        cells.extend(std::iter::repeat_n(SqlValue::Null, 11)); // idx 20..=30
        assert_eq!(cells.len(), 31);

        let loader = loader_for("guild_channels", vec![DbRow::new(cells)]);
        loader.ensure_guild_channels_loaded().await;

        let cache = &loader.cache;
        assert_eq!(
            cache.get_guild_data(5, "rules_message").await,
            Some(json!({"channel": 100, "message": 101}))
        );
        assert_eq!(
            cache.get_guild_data(5, "events_channel").await,
            Some(json!(107))
        );
        assert_eq!(
            cache.get_guild_data(5, "loot_message").await,
            Some(json!({"channel": 118, "message": 119}))
        );
        // No members_channel: none of the member entries were written.
        assert!(cache.get_guild_data(5, "members_channel").await.is_none());
        // The aggregate always lands.
        let channels = cache.get_guild_data(5, "channels").await.unwrap();
        assert_eq!(channels["rules_channel"], json!(100));
        assert_eq!(channels["members_channel"], Value::Null);
    }

    #[tokio::test]
    async fn test_static_groups_composition() {
        let rows = vec![
            DbRow::new(vec![u(1), t("Alpha"), u(10), t("11,12,13")]),
            DbRow::new(vec![u(1), t("Beta"), u(20), SqlValue::Null]),
            DbRow::new(vec![u(2), t("Gamma"), u(30), t("31")]),
        ];
        let loader = loader_for("guild_static_groups", rows);
        loader.ensure_static_groups_loaded().await;

        let groups = loader.cache.get_guild_data(1, "static_groups").await.unwrap();
        assert_eq!(groups["Alpha"]["leader_id"], json!(10));
        assert_eq!(groups["Alpha"]["member_ids"], json!([11, 12, 13]));
        assert_eq!(groups["Beta"]["member_ids"], json!([]));
        let groups2 = loader.cache.get_guild_data(2, "static_groups").await.unwrap();
        assert_eq!(groups2["Gamma"]["member_ids"], json!([31]));
    }

    #[tokio::test]
    async fn test_weapons_grouped_by_game_and_uppercased_combinations() {
        let loader = loader_for(
            "FROM weapons ",
            vec![
                DbRow::new(vec![u(1), t("SNS"), t("Sword and Shield")]),
                DbRow::new(vec![u(1), t("GS"), t("Greatsword")]),
                DbRow::new(vec![u(2), t("DG"), t("Dagger")]),
            ],
        );
        loader.ensure_weapons_loaded().await;
        let weapons = loader.cache.get_static_data("weapons", None).await.unwrap();
        assert_eq!(weapons["1"]["SNS"], json!("Sword and Shield"));
        assert_eq!(weapons["2"]["DG"], json!("Dagger"));

        let loader = loader_for(
            "weapons_combinations",
            vec![DbRow::new(vec![u(1), t("Tank"), t("sns"), t("gs")])],
        );
        loader.ensure_weapons_combinations_loaded().await;
        let combos = loader
            .cache
            .get_static_data("weapons_combinations", None)
            .await
            .unwrap();
        assert_eq!(combos["1"][0]["weapon1"], json!("SNS"));
        assert_eq!(combos["1"][0]["weapon2"], json!("GS"));
    }

    #[tokio::test]
    async fn test_ptb_settings_skip_incomplete_groups() {
        let mut cells = vec![u(9), u(900), u(901)];
        // G1 complete, G2 has role but no channel, G3..G12 empty.
        cells.push(u(1001));
        cells.push(u(2001));
        cells.push(u(1002));
        cells.push(SqlValue::Null);
        cells.extend(std::iter::repeat_n(SqlValue::Null, 20));
        assert_eq!(cells.len(), 27);

        let loader = loader_for("guild_ptb_settings", vec![DbRow::new(cells)]);
        loader.ensure_guild_ptb_settings_loaded().await;

        let ptb = loader.cache.get_guild_data(9, "ptb_settings").await.unwrap();
        assert_eq!(ptb["ptb_guild_id"], json!(900));
        assert_eq!(
            ptb["groups"]["G1"],
            json!({"role_id": 1001, "channel_id": 2001})
        );
        assert!(ptb["groups"].get("G2").is_none());
    }

    #[tokio::test]
    async fn test_events_calendar_long_ttl_and_grouping() {
        let rows = vec![
            DbRow::new(vec![
                u(1),
                u(10),
                t("Siege"),
                t("saturday"),
                t("20:00:00"),
                SqlValue::Int(120),
                t("all"),
                SqlValue::Int(30),
                SqlValue::Int(10),
            ]),
            DbRow::new(vec![
                u(1),
                u(11),
                t("Boonstone"),
                t("wednesday"),
                t("21:00:00"),
                SqlValue::Int(60),
                t("odd"),
                SqlValue::Null,
                SqlValue::Null,
            ]),
        ];
        let loader = loader_for("events_calendar", rows);
        loader.ensure_events_calendar_loaded().await;

        let calendar = loader
            .cache
            .get_static_data("events_calendar_1", None)
            .await
            .unwrap();
        let events = calendar["events"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["name"], json!("Siege"));
        assert_eq!(events[1]["dkp_value"], json!(0));
    }

    #[tokio::test]
    async fn test_guild_members_roster_map() {
        let rows = vec![DbRow::new(vec![
            u(1),
            u(42),
            t("Ragna"),
            t("en"),
            t("Ranged DPS"),
            SqlValue::Int(4200),
            t("dps"),
            t("GS/DG"),
            SqlValue::Null,
            SqlValue::Null,
            SqlValue::Int(5),
            SqlValue::Int(4),
        ])];
        let loader = loader_for("FROM guild_members", rows);
        loader.ensure_guild_members_loaded().await;

        let roster = loader
            .cache
            .get(Category::RosterData, &[KeyPart::from("guild_members")])
            .await
            .unwrap();
        let member = &roster["1:42"];
        assert_eq!(member["username"], json!("Ragna"));
        assert_eq!(member["DKP"], json!(0), "null DKP defaults to zero");
        assert_eq!(member["attendances"], json!(4));
    }

    #[tokio::test]
    async fn test_bulk_guild_members_caches_and_reuses() {
        let mut responses = HashMap::new();
        responses.insert(
            "FROM guild_members gm",
            vec![DbRow::new(vec![
                u(42),
                t("Ragna"),
                t("en"),
                SqlValue::Int(4200),
                t("dps"),
                t("GS/DG"),
                SqlValue::Int(10),
                SqlValue::Int(3),
                SqlValue::Int(3),
                SqlValue::Int(2),
                t("Ranged DPS"),
                t("en-US"),
            ])],
        );
        let db = Arc::new(MockDb::with(responses));
        let loader = CacheLoader::new(db.clone(), Arc::new(CacheStore::new()));

        let members = loader.bulk_guild_members(7, false).await.unwrap();
        assert_eq!(members["42"]["locale"], json!("en-US"));
        assert_eq!(db.call_count("FROM guild_members gm"), 1);

        // Second call is served from cache.
        loader.bulk_guild_members(7, false).await.unwrap();
        assert_eq!(db.call_count("FROM guild_members gm"), 1);

        // Forced refresh goes back to the database.
        loader.bulk_guild_members(7, true).await.unwrap();
        assert_eq!(db.call_count("FROM guild_members gm"), 2);
    }
}
