//! Per-statement-kind query metrics.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use dashmap::DashMap;
use serde::Serialize;

/// Queries slower than this are logged and counted as slow.
pub const SLOW_QUERY_THRESHOLD: Duration = Duration::from_secs(2);

#[derive(Default)]
struct KindCounters {
    count: AtomicU64,
    total_time_ms: AtomicU64,
    slow_queries: AtomicU64,
}

/// Snapshot of one statement kind (SELECT, INSERT, ...).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryKindSnapshot {
    pub count: u64,
    pub total_time_ms: u64,
    pub avg_time_ms: f64,
    pub slow_queries: u64,
}

/// Execution metrics keyed by the statement's first keyword.
#[derive(Default)]
pub struct QueryMetrics {
    kinds: DashMap<String, KindCounters>,
}

impl QueryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// First keyword of a statement, uppercased (`SELECT`, `INSERT`, ...).
    pub fn statement_kind(sql: &str) -> String {
        sql.split_whitespace()
            .next()
            .unwrap_or("UNKNOWN")
            .to_ascii_uppercase()
    }

    /// Record one execution. Returns true when the query was slow.
    pub fn record(&self, sql: &str, elapsed: Duration) -> bool {
        let kind = Self::statement_kind(sql);
        let slow = elapsed > SLOW_QUERY_THRESHOLD;

        let counters = self.kinds.entry(kind).or_default();
        counters.count.fetch_add(1, Ordering::Relaxed);
        counters
            .total_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        if slow {
            counters.slow_queries.fetch_add(1, Ordering::Relaxed);
        }
        slow
    }

    pub fn snapshot(&self) -> std::collections::HashMap<String, QueryKindSnapshot> {
        self.kinds
            .iter()
            .map(|entry| {
                let count = entry.count.load(Ordering::Relaxed);
                let total = entry.total_time_ms.load(Ordering::Relaxed);
                (
                    entry.key().clone(),
                    QueryKindSnapshot {
                        count,
                        total_time_ms: total,
                        avg_time_ms: if count > 0 {
                            total as f64 / count as f64
                        } else {
                            0.0
                        },
                        slow_queries: entry.slow_queries.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }
}
