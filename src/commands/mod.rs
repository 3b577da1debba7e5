//! Administrative command handlers.
//!
//! These are the guild lifecycle commands: declare a guild to the bot,
//! adjust its settings, wire the chat-platform structure, bind a PTB
//! satellite guild, and wipe everything. Every command is rate-limited per
//! user, validates its input, mutates the database through the statement
//! seam (transactions for multi-table changes), keeps the cache coherent,
//! and replies with a localized, ephemeral message.
//!
//! Handlers never leak errors to the transport: `handle` converts every
//! failure into a user-facing reply and logs the chain.

use std::{sync::Arc, time::Duration};

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, info};

use crate::{
    cache::CacheStore,
    config::RateLimitConfig,
    db::{DbError, SqlParam, SqlRunner},
    limiter::{RateLimitScope, RateLimiter},
    loader::CacheLoader,
    translation::TranslationStore,
};

/// Languages a guild can be configured with.
pub const SUPPORTED_LOCALES: [&str; 5] = ["en-US", "fr", "es-ES", "de", "it"];

/// Invocation context resolved by the transport layer.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub guild_id: Option<u64>,
    pub user_id: u64,
    pub locale: String,
}

/// A reply to send back to the invoker.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    pub text: String,
    pub ephemeral: bool,
}

impl CommandReply {
    fn ephemeral(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ephemeral: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command must be invoked inside a guild")]
    NotInGuild,

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// One administrative invocation.
#[derive(Debug, Clone)]
pub enum AdminCall {
    Initialize {
        guild_name: String,
        guild_lang: String,
        guild_game: u64,
        guild_server: String,
    },
    Modify {
        guild_name: Option<String>,
        guild_lang: Option<String>,
        guild_game: Option<u64>,
        guild_server: Option<String>,
        premium: Option<bool>,
    },
    Reset {
        confirmation: String,
    },
    Setup {
        config_mode: SetupMode,
    },
    PtbInit {
        main_guild_id: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupMode {
    /// Reuse the guild's existing channels and roles.
    Existing,
    /// Create the full channel/role structure from scratch.
    Complete,
}

impl AdminCall {
    pub fn name(&self) -> &'static str {
        match self {
            AdminCall::Initialize { .. } => "app_initialize",
            AdminCall::Modify { .. } => "app_modify",
            AdminCall::Reset { .. } => "app_reset",
            AdminCall::Setup { .. } => "discord_setup",
            AdminCall::PtbInit { .. } => "ptb_init",
        }
    }

    /// Destructive commands carry the longer cooldown.
    fn is_destructive(&self) -> bool {
        matches!(self, AdminCall::Initialize { .. } | AdminCall::Reset { .. })
    }
}

/// Guild-scoped tables wiped by `app_reset`, children first.
const RESET_TABLES: [&str; 8] = [
    "welcome_messages",
    "events_data",
    "user_setup",
    "guild_members",
    "guild_ptb_settings",
    "guild_roles",
    "guild_channels",
    "guild_settings",
];

/// Cache entries dropped after a reset.
const RESET_CACHE_KEYS: [&str; 12] = [
    "guild_name",
    "guild_lang",
    "guild_game",
    "guild_server",
    "premium",
    "settings",
    "roles",
    "channels",
    "absence_channels",
    "rules_message",
    "events_channel",
    "ptb_settings",
];

pub struct AdminCommands {
    db: Arc<dyn SqlRunner>,
    cache: Arc<CacheStore>,
    loader: Arc<CacheLoader>,
    limiter: Arc<RateLimiter>,
    translations: Arc<TranslationStore>,
    limits: RateLimitConfig,
}

impl AdminCommands {
    pub fn new(
        db: Arc<dyn SqlRunner>,
        cache: Arc<CacheStore>,
        loader: Arc<CacheLoader>,
        limiter: Arc<RateLimiter>,
        translations: Arc<TranslationStore>,
        limits: RateLimitConfig,
    ) -> Self {
        Self {
            db,
            cache,
            loader,
            limiter,
            translations,
            limits,
        }
    }

    /// Entry point for the transport layer: rate-limit, dispatch, and turn
    /// every failure into a localized ephemeral reply.
    pub async fn handle(&self, ctx: &CommandContext, call: AdminCall) -> CommandReply {
        let cooldown = Duration::from_secs(if call.is_destructive() {
            self.limits.admin_cooldown_secs
        } else {
            self.limits.command_cooldown_secs
        });

        let decision = self
            .limiter
            .is_rate_limited(
                call.name(),
                Some(ctx.user_id),
                ctx.guild_id,
                cooldown,
                RateLimitScope::User,
            )
            .await;
        if decision.limited {
            return self.cooldown_reply(ctx, decision.remaining);
        }

        let result = match call {
            AdminCall::Initialize {
                guild_name,
                guild_lang,
                guild_game,
                guild_server,
            } => {
                self.app_initialize(ctx, &guild_name, &guild_lang, guild_game, &guild_server)
                    .await
            }
            AdminCall::Modify {
                guild_name,
                guild_lang,
                guild_game,
                guild_server,
                premium,
            } => {
                self.app_modify(ctx, guild_name, guild_lang, guild_game, guild_server, premium)
                    .await
            }
            AdminCall::Reset { confirmation } => self.app_reset(ctx, &confirmation).await,
            AdminCall::Setup { config_mode } => self.discord_setup(ctx, config_mode).await,
            AdminCall::PtbInit { main_guild_id } => self.ptb_init(ctx, main_guild_id).await,
        };

        match result {
            Ok(reply) => reply,
            Err(CommandError::Validation(reason)) => {
                CommandReply::ephemeral(format!("Invalid input: {reason}"))
            }
            Err(CommandError::NotInGuild) => {
                CommandReply::ephemeral("This command can only be used inside a guild.")
            }
            Err(CommandError::Db(DbError::Unavailable)) => {
                error!(command = "admin", "Database unavailable");
                self.error_reply(ctx, "errors.db_unavailable", "Database temporarily unavailable, try again later.")
            }
            Err(CommandError::Db(e)) => {
                error!(error = %e, "Admin command failed");
                self.error_reply(ctx, "errors.internal", "Something went wrong, try again later.")
            }
        }
    }

    fn cooldown_reply(&self, ctx: &CommandContext, remaining: Duration) -> CommandReply {
        let seconds = remaining.as_secs() + 1;
        let text = self.translations.get_user_message(
            &ctx.locale,
            "errors.cooldown",
            &[("remaining_time", json!(seconds))],
        );
        if text.is_empty() {
            return CommandReply::ephemeral(format!(
                "Administrative command cooldown: please wait {seconds} more seconds."
            ));
        }
        CommandReply::ephemeral(text)
    }

    fn error_reply(&self, ctx: &CommandContext, key: &str, fallback: &str) -> CommandReply {
        let text = self.translations.get_user_message(&ctx.locale, key, &[]);
        if text.is_empty() {
            return CommandReply::ephemeral(fallback);
        }
        CommandReply::ephemeral(text)
    }

    fn localized(
        &self,
        ctx: &CommandContext,
        key: &str,
        args: &[(&str, Value)],
        fallback: &str,
    ) -> CommandReply {
        let text = self.translations.get_user_message(&ctx.locale, key, args);
        if text.is_empty() {
            return CommandReply::ephemeral(fallback);
        }
        CommandReply::ephemeral(text)
    }

    async fn app_initialize(
        &self,
        ctx: &CommandContext,
        guild_name: &str,
        guild_lang: &str,
        guild_game: u64,
        guild_server: &str,
    ) -> Result<CommandReply, CommandError> {
        let guild_id = ctx.guild_id.ok_or(CommandError::NotInGuild)?;
        let guild_name = validate_label(guild_name, "guild name")?;
        let guild_server = validate_label(guild_server, "guild server")?;
        if !SUPPORTED_LOCALES.contains(&guild_lang) {
            return Err(CommandError::Validation(format!(
                "unsupported language '{guild_lang}'"
            )));
        }

        self.loader.ensure_category_loaded("guild_settings").await;
        if self.cache.get_guild_data(guild_id, "guild_lang").await.is_some() {
            info!(guild_id, "Guild already declared");
            return Ok(self.localized(
                ctx,
                "app_initialize.messages.already_declared",
                &[],
                "This guild is already declared.",
            ));
        }

        self.db
            .execute(
                "INSERT INTO guild_settings (guild_id, guild_name, guild_lang, guild_game, \
                 guild_server, initialized, premium) VALUES (?, ?, ?, ?, ?, TRUE, 0)",
                &[
                    guild_id.into(),
                    guild_name.as_str().into(),
                    guild_lang.into(),
                    guild_game.into(),
                    guild_server.as_str().into(),
                ],
            )
            .await?;
        info!(guild_id, "Guild initialized");

        for (field, value) in [
            ("guild_name", json!(guild_name)),
            ("guild_lang", json!(guild_lang)),
            ("guild_game", json!(guild_game)),
            ("guild_server", json!(guild_server)),
            ("premium", json!(0)),
        ] {
            self.cache.set_guild_data(guild_id, field, value).await;
        }
        self.cache
            .set_guild_data(
                guild_id,
                "settings",
                json!({
                    "guild_name": guild_name,
                    "guild_lang": guild_lang,
                    "guild_game": guild_game,
                    "guild_server": guild_server,
                    "premium": 0,
                }),
            )
            .await;
        self.loader.record_guild(guild_id);

        Ok(self.localized(
            ctx,
            "app_initialize.messages.success",
            &[("name", json!(guild_name))],
            "Guild initialized successfully.",
        ))
    }

    async fn app_modify(
        &self,
        ctx: &CommandContext,
        guild_name: Option<String>,
        guild_lang: Option<String>,
        guild_game: Option<u64>,
        guild_server: Option<String>,
        premium: Option<bool>,
    ) -> Result<CommandReply, CommandError> {
        let guild_id = ctx.guild_id.ok_or(CommandError::NotInGuild)?;

        let mut assignments: Vec<&str> = Vec::new();
        let mut params: Vec<SqlParam> = Vec::new();

        if let Some(name) = &guild_name {
            let name = validate_label(name, "guild name")?;
            assignments.push("guild_name = ?");
            params.push(name.into());
        }
        if let Some(lang) = &guild_lang {
            if !SUPPORTED_LOCALES.contains(&lang.as_str()) {
                return Err(CommandError::Validation(format!(
                    "unsupported language '{lang}'"
                )));
            }
            assignments.push("guild_lang = ?");
            params.push(lang.as_str().into());
        }
        if let Some(game) = guild_game {
            assignments.push("guild_game = ?");
            params.push(game.into());
        }
        if let Some(server) = &guild_server {
            let server = validate_label(server, "guild server")?;
            assignments.push("guild_server = ?");
            params.push(server.into());
        }
        if let Some(premium) = premium {
            assignments.push("premium = ?");
            params.push(premium.into());
        }

        if assignments.is_empty() {
            return Ok(self.localized(
                ctx,
                "app_modify.messages.nothing_to_change",
                &[],
                "Nothing to change.",
            ));
        }

        let sql = format!(
            "UPDATE guild_settings SET {} WHERE guild_id = ?",
            assignments.join(", ")
        );
        params.push(guild_id.into());
        self.db.execute(&sql, &params).await?;
        info!(guild_id, fields = assignments.len(), "Guild settings modified");

        // Cached copies are stale now; reload the aggregate row and cascade.
        self.loader.reload_category("guild_settings").await;
        self.cache
            .invalidate_related(crate::cache::Category::GuildData)
            .await;

        Ok(self.localized(
            ctx,
            "app_modify.messages.success",
            &[],
            "Guild settings updated.",
        ))
    }

    async fn app_reset(
        &self,
        ctx: &CommandContext,
        confirmation: &str,
    ) -> Result<CommandReply, CommandError> {
        let guild_id = ctx.guild_id.ok_or(CommandError::NotInGuild)?;

        if confirmation != "DELETE" {
            return Ok(self.localized(
                ctx,
                "app_reset.messages.bad_parameter",
                &[],
                "Reset requires the confirmation word DELETE.",
            ));
        }

        self.loader.ensure_category_loaded("guild_settings").await;
        if self.cache.get_guild_data(guild_id, "guild_lang").await.is_none() {
            return Ok(self.localized(
                ctx,
                "app_reset.messages.need_init",
                &[],
                "This guild has not been initialized.",
            ));
        }

        let statements: Vec<(String, Vec<SqlParam>)> = RESET_TABLES
            .iter()
            .map(|table| {
                (
                    format!("DELETE FROM {table} WHERE guild_id = ?"),
                    vec![SqlParam::from(guild_id)],
                )
            })
            .collect();
        self.db.run_transaction(statements).await?;

        for key in RESET_CACHE_KEYS {
            self.cache.delete_guild_data(guild_id, key).await;
        }
        self.loader.forget_guild(guild_id);
        info!(guild_id, "Guild data deleted");

        Ok(self.localized(
            ctx,
            "app_reset.messages.success",
            &[],
            "Guild data has been deleted.",
        ))
    }

    async fn discord_setup(
        &self,
        ctx: &CommandContext,
        config_mode: SetupMode,
    ) -> Result<CommandReply, CommandError> {
        let guild_id = ctx.guild_id.ok_or(CommandError::NotInGuild)?;

        self.db
            .execute(
                "UPDATE guild_roles SET config_ok = TRUE WHERE guild_id = ?",
                &[guild_id.into()],
            )
            .await?;
        self.loader.reload_category("guild_roles").await;
        info!(guild_id, mode = ?config_mode, "Guild setup recorded");

        Ok(self.localized(
            ctx,
            "discord_setup.messages.success",
            &[],
            "Server setup recorded.",
        ))
    }

    async fn ptb_init(
        &self,
        ctx: &CommandContext,
        main_guild_id: u64,
    ) -> Result<CommandReply, CommandError> {
        let ptb_guild_id = ctx.guild_id.ok_or(CommandError::NotInGuild)?;
        if ptb_guild_id == main_guild_id {
            return Err(CommandError::Validation(
                "a guild cannot be its own PTB satellite".into(),
            ));
        }

        self.db
            .execute(
                "INSERT INTO guild_ptb_settings (guild_id, ptb_guild_id) VALUES (?, ?) \
                 ON DUPLICATE KEY UPDATE ptb_guild_id = VALUES(ptb_guild_id)",
                &[main_guild_id.into(), ptb_guild_id.into()],
            )
            .await?;
        self.loader.reload_category("guild_ptb_settings").await;
        info!(main_guild_id, ptb_guild_id, "PTB guild bound");

        Ok(self.localized(
            ctx,
            "ptb_init.messages.success",
            &[],
            "PTB guild bound to the main guild.",
        ))
    }
}

/// Guild names and server labels: 1–50 characters, no control characters.
fn validate_label(value: &str, what: &str) -> Result<String, CommandError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CommandError::Validation(format!("{what} cannot be empty")));
    }
    if trimmed.chars().count() > 50 {
        return Err(CommandError::Validation(format!(
            "{what} cannot exceed 50 characters"
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(CommandError::Validation(format!(
            "{what} contains control characters"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        db::{DbRow, SqlValue},
        loader::test_support::MockDb,
    };

    fn catalog() -> Arc<TranslationStore> {
        Arc::new(
            TranslationStore::from_value(
                json!({
                    "app_initialize": {
                        "messages": {
                            "success": {"en-US": "Guild {name} initialized."},
                            "already_declared": {"en-US": "This guild is already declared."}
                        }
                    },
                    "app_reset": {
                        "messages": {
                            "success": {"en-US": "Guild data deleted."},
                            "bad_parameter": {"en-US": "Confirmation must be DELETE."},
                            "need_init": {"en-US": "Guild not initialized."}
                        }
                    },
                    "errors": {
                        "cooldown": {"en-US": "On cooldown: {remaining_time}s."}
                    }
                }),
                "test.json",
            )
            .unwrap(),
        )
    }

    fn ctx(guild_id: u64) -> CommandContext {
        CommandContext {
            guild_id: Some(guild_id),
            // Distinct invoker per guild so user-scoped cooldowns do not
            // couple unrelated test calls.
            user_id: guild_id + 1000,
            locale: "en-US".into(),
        }
    }

    fn commands_with(db: MockDb) -> (AdminCommands, Arc<CacheStore>, Arc<MockDb>) {
        let db = Arc::new(db);
        let cache = Arc::new(CacheStore::new());
        let loader = CacheLoader::new(db.clone(), cache.clone());
        let commands = AdminCommands::new(
            db.clone(),
            cache.clone(),
            loader,
            Arc::new(RateLimiter::new()),
            catalog(),
            RateLimitConfig::default(),
        );
        (commands, cache, db)
    }

    fn settings_row(guild_id: u64) -> DbRow {
        DbRow::new(vec![
            SqlValue::Uint(guild_id),
            SqlValue::Null,
            SqlValue::Text("en-US".into()),
            SqlValue::Text("Guild".into()),
            SqlValue::Int(1),
            SqlValue::Text("EU-1".into()),
            SqlValue::Bool(true),
            SqlValue::Int(0),
        ])
    }

    #[tokio::test]
    async fn test_initialize_success() {
        let (commands, cache, db) = commands_with(MockDb::default());

        let reply = commands
            .handle(
                &ctx(111),
                AdminCall::Initialize {
                    guild_name: "Iron Wolves".into(),
                    guild_lang: "en-US".into(),
                    guild_game: 1,
                    guild_server: "EU-1".into(),
                },
            )
            .await;

        assert_eq!(reply.text, "Guild Iron Wolves initialized.");
        assert!(reply.ephemeral);
        assert_eq!(db.call_count("INSERT INTO guild_settings"), 1);
        assert_eq!(
            cache.get_guild_data(111, "guild_lang").await,
            Some(json!("en-US"))
        );
    }

    #[tokio::test]
    async fn test_initialize_refuses_double_declaration() {
        let mut responses = HashMap::new();
        responses.insert("guild_settings", vec![settings_row(111)]);
        let (commands, _cache, db) = commands_with(MockDb::with(responses));

        let call = AdminCall::Initialize {
            guild_name: "Wolves".into(),
            guild_lang: "fr".into(),
            guild_game: 1,
            guild_server: "EU-1".into(),
        };
        let reply = commands.handle(&ctx(111), call).await;
        assert_eq!(reply.text, "This guild is already declared.");
        assert_eq!(db.call_count("INSERT INTO guild_settings"), 0);
    }

    #[tokio::test]
    async fn test_initialize_validation() {
        let (commands, _cache, db) = commands_with(MockDb::default());

        let reply = commands
            .handle(
                &ctx(1),
                AdminCall::Initialize {
                    guild_name: "   ".into(),
                    guild_lang: "en-US".into(),
                    guild_game: 1,
                    guild_server: "EU-1".into(),
                },
            )
            .await;
        assert!(reply.text.contains("Invalid input"));

        let reply = commands
            .handle(
                &ctx(2),
                AdminCall::Initialize {
                    guild_name: "Wolves".into(),
                    guild_lang: "xx-YY".into(),
                    guild_game: 1,
                    guild_server: "EU-1".into(),
                },
            )
            .await;
        assert!(reply.text.contains("unsupported language"));
        assert_eq!(db.call_count("INSERT"), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_second_call() {
        let (commands, _cache, _db) = commands_with(MockDb::default());

        let call = AdminCall::Reset {
            confirmation: "nope".into(),
        };
        let first = commands.handle(&ctx(1), call.clone()).await;
        assert_eq!(first.text, "Confirmation must be DELETE.");

        let second = commands.handle(&ctx(1), call).await;
        assert!(second.text.starts_with("On cooldown"), "{}", second.text);
    }

    #[tokio::test]
    async fn test_reset_requires_initialized_guild() {
        let (commands, _cache, db) = commands_with(MockDb::default());

        let reply = commands
            .handle(
                &ctx(5),
                AdminCall::Reset {
                    confirmation: "DELETE".into(),
                },
            )
            .await;
        assert_eq!(reply.text, "Guild not initialized.");
        assert!(db.transactions.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reset_deletes_all_tables_and_cache() {
        let mut responses = HashMap::new();
        responses.insert("guild_settings", vec![settings_row(7)]);
        let (commands, cache, db) = commands_with(MockDb::with(responses));

        // Warm the cache so there is something to clear.
        commands.loader.ensure_category_loaded("guild_settings").await;
        assert!(cache.get_guild_data(7, "guild_lang").await.is_some());

        let reply = commands
            .handle(
                &ctx(7),
                AdminCall::Reset {
                    confirmation: "DELETE".into(),
                },
            )
            .await;
        assert_eq!(reply.text, "Guild data deleted.");

        let transactions = db.transactions.lock();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].len(), RESET_TABLES.len());
        assert!(transactions[0][0].contains("welcome_messages"));
        assert!(transactions[0].last().unwrap().contains("guild_settings"));
        drop(transactions);

        assert!(cache.get_guild_data(7, "guild_lang").await.is_none());
        assert!(cache.get_guild_data(7, "settings").await.is_none());
    }

    #[tokio::test]
    async fn test_ptb_init_upserts_binding() {
        let (commands, _cache, db) = commands_with(MockDb::default());

        let reply = commands
            .handle(&ctx(900), AdminCall::PtbInit { main_guild_id: 100 })
            .await;
        assert_eq!(reply.text, "PTB guild bound to the main guild.");
        assert_eq!(db.call_count("guild_ptb_settings"), 2, "upsert plus reload");

        let reply = commands
            .handle(
                &CommandContext {
                    guild_id: Some(100),
                    user_id: 43,
                    locale: "en-US".into(),
                },
                AdminCall::PtbInit { main_guild_id: 100 },
            )
            .await;
        assert!(reply.text.contains("Invalid input"));
    }

    #[tokio::test]
    async fn test_not_in_guild() {
        let (commands, _cache, _db) = commands_with(MockDb::default());
        let reply = commands
            .handle(
                &CommandContext {
                    guild_id: None,
                    user_id: 1,
                    locale: "en-US".into(),
                },
                AdminCall::Setup {
                    config_mode: SetupMode::Existing,
                },
            )
            .await;
        assert!(reply.text.contains("inside a guild"));
    }

    #[test]
    fn test_validate_label() {
        assert!(validate_label("Iron Wolves", "guild name").is_ok());
        assert!(validate_label("", "guild name").is_err());
        assert!(validate_label(&"x".repeat(51), "guild name").is_err());
        assert!(validate_label("bad\u{0007}name", "guild name").is_err());
        assert_eq!(validate_label("  padded  ", "guild name").unwrap(), "padded");
    }
}
