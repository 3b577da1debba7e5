//! Cooldown tracking for administrative commands.
//!
//! Three scopes: per-user, per-guild and global. A request is limited iff
//! the bucket was stamped less than the cooldown ago; a passing check
//! stamps the bucket, a limited one leaves it untouched. All operations
//! run under a single mutex; they are O(1) and never await while holding
//! it.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Rate-limit scope for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    User,
    Guild,
    Global,
}

#[derive(Default)]
struct Buckets {
    user: HashMap<String, HashMap<u64, Instant>>,
    guild: HashMap<String, HashMap<u64, Instant>>,
    global: HashMap<String, Instant>,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub limited: bool,
    pub remaining: Duration,
}

impl RateLimitDecision {
    fn pass() -> Self {
        Self {
            limited: false,
            remaining: Duration::ZERO,
        }
    }

    fn limited(remaining: Duration) -> Self {
        Self {
            limited: true,
            remaining,
        }
    }
}

#[derive(Default)]
pub struct RateLimiter {
    buckets: Mutex<Buckets>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and conditionally stamp the bucket for a command invocation.
    ///
    /// A scope whose required id is missing silently passes; the caller
    /// keeps the scope contract, the limiter does not guess.
    pub async fn is_rate_limited(
        &self,
        command: &str,
        user_id: Option<u64>,
        guild_id: Option<u64>,
        cooldown: Duration,
        scope: RateLimitScope,
    ) -> RateLimitDecision {
        self.check_at(command, user_id, guild_id, cooldown, scope, Instant::now())
            .await
    }

    async fn check_at(
        &self,
        command: &str,
        user_id: Option<u64>,
        guild_id: Option<u64>,
        cooldown: Duration,
        scope: RateLimitScope,
        now: Instant,
    ) -> RateLimitDecision {
        let mut buckets = self.buckets.lock().await;

        match scope {
            RateLimitScope::User => {
                let Some(user_id) = user_id else {
                    return RateLimitDecision::pass();
                };
                let per_user = buckets.user.entry(command.to_string()).or_default();
                match check_bucket(per_user.get(&user_id), cooldown, now) {
                    Some(remaining) => {
                        warn!(
                            command = %command,
                            user_id,
                            remaining_secs = remaining.as_secs(),
                            "Rate limit hit"
                        );
                        RateLimitDecision::limited(remaining)
                    }
                    None => {
                        per_user.insert(user_id, now);
                        RateLimitDecision::pass()
                    }
                }
            }
            RateLimitScope::Guild => {
                let Some(guild_id) = guild_id else {
                    return RateLimitDecision::pass();
                };
                let per_guild = buckets.guild.entry(command.to_string()).or_default();
                match check_bucket(per_guild.get(&guild_id), cooldown, now) {
                    Some(remaining) => {
                        warn!(
                            command = %command,
                            guild_id,
                            remaining_secs = remaining.as_secs(),
                            "Rate limit hit"
                        );
                        RateLimitDecision::limited(remaining)
                    }
                    None => {
                        per_guild.insert(guild_id, now);
                        RateLimitDecision::pass()
                    }
                }
            }
            RateLimitScope::Global => {
                match check_bucket(buckets.global.get(command), cooldown, now) {
                    Some(remaining) => {
                        warn!(
                            command = %command,
                            remaining_secs = remaining.as_secs(),
                            "Global rate limit hit"
                        );
                        RateLimitDecision::limited(remaining)
                    }
                    None => {
                        buckets.global.insert(command.to_string(), now);
                        RateLimitDecision::pass()
                    }
                }
            }
        }
    }

    /// Drop bucket entries older than `max_age`; command keys whose maps
    /// become empty are removed entirely.
    pub async fn cleanup_old_entries(&self, max_age: Duration) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let mut removed = 0usize;

        for per_id in buckets.user.values_mut() {
            per_id.retain(|_, last| {
                let keep = now.saturating_duration_since(*last) < max_age;
                if !keep {
                    removed += 1;
                }
                keep
            });
        }
        buckets.user.retain(|_, per_id| !per_id.is_empty());

        for per_id in buckets.guild.values_mut() {
            per_id.retain(|_, last| {
                let keep = now.saturating_duration_since(*last) < max_age;
                if !keep {
                    removed += 1;
                }
                keep
            });
        }
        buckets.guild.retain(|_, per_id| !per_id.is_empty());

        buckets.global.retain(|_, last| {
            let keep = now.saturating_duration_since(*last) < max_age;
            if !keep {
                removed += 1;
            }
            keep
        });

        debug!(removed, "Cleaned up old rate limit entries");
    }

    /// Bucket counts, for health snapshots and tests.
    pub async fn bucket_counts(&self) -> (usize, usize, usize) {
        let buckets = self.buckets.lock().await;
        (
            buckets.user.values().map(HashMap::len).sum(),
            buckets.guild.values().map(HashMap::len).sum(),
            buckets.global.len(),
        )
    }
}

fn check_bucket(last: Option<&Instant>, cooldown: Duration, now: Instant) -> Option<Duration> {
    let last = last?;
    let elapsed = now.saturating_duration_since(*last);
    if elapsed < cooldown {
        Some(cooldown - elapsed)
    } else {
        None
    }
}

/// Hourly cleanup loop, spawned by the runtime.
pub async fn cleanup_loop(limiter: std::sync::Arc<RateLimiter>, max_age: Duration) {
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        limiter.cleanup_old_entries(max_age).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn test_first_call_passes_second_is_limited() {
        let limiter = RateLimiter::new();

        let first = limiter
            .is_rate_limited("app_reset", Some(42), None, COOLDOWN, RateLimitScope::User)
            .await;
        assert!(!first.limited);
        assert_eq!(first.remaining, Duration::ZERO);

        let second = limiter
            .is_rate_limited("app_reset", Some(42), None, COOLDOWN, RateLimitScope::User)
            .await;
        assert!(second.limited);
        assert!(second.remaining > Duration::from_secs(299));
        assert!(second.remaining <= Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_limited_call_does_not_restamp() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        limiter
            .check_at("cmd", Some(1), None, COOLDOWN, RateLimitScope::User, now)
            .await;
        // A limited check midway through must not extend the window.
        let mid = now + Duration::from_secs(200);
        let decision = limiter
            .check_at("cmd", Some(1), None, COOLDOWN, RateLimitScope::User, mid)
            .await;
        assert!(decision.limited);
        assert_eq!(decision.remaining, Duration::from_secs(100));

        // Past the original window the command passes again.
        let after = now + Duration::from_secs(301);
        let decision = limiter
            .check_at("cmd", Some(1), None, COOLDOWN, RateLimitScope::User, after)
            .await;
        assert!(!decision.limited);
    }

    #[tokio::test]
    async fn test_scopes_are_independent() {
        let limiter = RateLimiter::new();

        let user = limiter
            .is_rate_limited("cmd", Some(1), Some(10), COOLDOWN, RateLimitScope::User)
            .await;
        let guild = limiter
            .is_rate_limited("cmd", Some(1), Some(10), COOLDOWN, RateLimitScope::Guild)
            .await;
        let global = limiter
            .is_rate_limited("cmd", None, None, COOLDOWN, RateLimitScope::Global)
            .await;
        assert!(!user.limited && !guild.limited && !global.limited);

        // Different user in the same guild: user scope passes.
        let other_user = limiter
            .is_rate_limited("cmd", Some(2), Some(10), COOLDOWN, RateLimitScope::User)
            .await;
        assert!(!other_user.limited);

        // Same guild: guild scope is limited regardless of user.
        let same_guild = limiter
            .is_rate_limited("cmd", Some(2), Some(10), COOLDOWN, RateLimitScope::Guild)
            .await;
        assert!(same_guild.limited);
    }

    #[tokio::test]
    async fn test_missing_id_is_silent_pass() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            let decision = limiter
                .is_rate_limited("cmd", None, None, COOLDOWN, RateLimitScope::User)
                .await;
            assert!(!decision.limited);
        }
        let (user_buckets, _, _) = limiter.bucket_counts().await;
        assert_eq!(user_buckets, 0, "no bucket may be stamped without an id");
    }

    #[tokio::test]
    async fn test_zero_cooldown_never_limits() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            let decision = limiter
                .is_rate_limited("cmd", Some(1), None, Duration::ZERO, RateLimitScope::User)
                .await;
            assert!(!decision.limited);
        }
    }

    #[tokio::test]
    async fn test_commands_tracked_separately() {
        let limiter = RateLimiter::new();
        limiter
            .is_rate_limited("app_reset", Some(1), None, COOLDOWN, RateLimitScope::User)
            .await;
        let other = limiter
            .is_rate_limited("app_modify", Some(1), None, COOLDOWN, RateLimitScope::User)
            .await;
        assert!(!other.limited);
    }

    #[tokio::test]
    async fn test_cleanup_drops_old_entries_and_empty_commands() {
        let limiter = RateLimiter::new();
        limiter
            .is_rate_limited("old_cmd", Some(1), Some(2), COOLDOWN, RateLimitScope::User)
            .await;
        limiter
            .is_rate_limited("old_cmd", None, Some(2), COOLDOWN, RateLimitScope::Guild)
            .await;
        limiter
            .is_rate_limited("old_global", None, None, COOLDOWN, RateLimitScope::Global)
            .await;

        // Everything is younger than the cutoff: nothing removed.
        limiter.cleanup_old_entries(Duration::from_secs(3600)).await;
        let (user, guild, global) = limiter.bucket_counts().await;
        assert_eq!((user, guild, global), (1, 1, 1));

        // Zero max age: everything is stale.
        limiter.cleanup_old_entries(Duration::ZERO).await;
        let (user, guild, global) = limiter.bucket_counts().await;
        assert_eq!((user, guild, global), (0, 0, 0));
    }
}
