//! guildhall: runtime core for a chat-platform guild-management bot.
//!
//! The crate provides the shared infrastructure that per-feature modules
//! (voice lifecycle, event attendance, notifications, AI relay, PTB
//! coordination) run on:
//!
//! - [`cache`]: category-scoped in-memory cache with TTLs, per-key write
//!   serialization, cascade invalidation and predictive preloading;
//! - [`loader`]: bulk warm-up of every cache category from the relational
//!   store, with per-category reload;
//! - [`db`]: a guarded database access layer (bounded pool, per-query
//!   timeouts, circuit breaker, bounded retry, transactions);
//! - [`scheduler`]: wall-clock recurring jobs with per-job mutual
//!   exclusion and minute-bucket deduplication;
//! - [`limiter`]: user/guild/global command cooldowns;
//! - [`resilience`]: circuit breakers, retry with jitter and graceful
//!   degradation for outbound integrations;
//! - [`translation`]: the localized message catalog;
//! - [`commands`]: the administrative guild lifecycle commands;
//! - [`runtime`]: the host context that wires everything together.
//!
//! Feature modules are external: they implement the [`features`] traits
//! and receive the [`runtime::Runtime`] handles at registration.

pub mod cache;
pub mod commands;
pub mod config;
pub mod db;
pub mod features;
pub mod limiter;
pub mod loader;
pub mod observability;
pub mod resilience;
pub mod runtime;
pub mod scheduler;
pub mod translation;

pub use config::Config;
pub use runtime::{Runtime, RuntimeError};
