//! Database access layer.
//!
//! Wraps a MySQL/MariaDB pool with the guard rails the rest of the runtime
//! relies on:
//!
//! - a counting semaphore bounding concurrent queries to the pool size, with
//!   waiting-queue depth tracking;
//! - a per-query timeout (acquisition and execution share the budget);
//! - a circuit breaker shared by every call, failing fast while the
//!   database is unavailable;
//! - bounded retry with backoff for transient failures (timeouts, pool
//!   exhaustion); constraint and programming errors never retry;
//! - multi-statement transactions with rollback on any failure;
//! - per-statement-kind metrics with slow-query detection.
//!
//! Statements always use parameter binding; logs carry the statement prefix
//! and parameter count, never parameter values.

mod error;
mod metrics;
mod value;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
pub use error::{DbError, DbResult};
pub use metrics::{QueryKindSnapshot, QueryMetrics, SLOW_QUERY_THRESHOLD};
use serde::Serialize;
use sqlx::{
    Column, Row, TypeInfo,
    mysql::{MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlRow},
};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
pub use value::{DbRow, SqlParam, SqlValue};

use crate::{
    config::DatabaseConfig,
    resilience::{BreakerSnapshot, CircuitBreaker},
};

/// How many times a transient failure is attempted in total.
const MAX_QUERY_ATTEMPTS: u32 = 3;

/// What to do with a statement's result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Execute and commit; the outcome carries affected-row count.
    Commit,
    /// Fetch at most one row.
    FetchOne,
    /// Fetch every row.
    FetchAll,
}

/// Result of [`Database::run_query`], shaped by the requested mode.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Done(u64),
    Row(Option<DbRow>),
    Rows(Vec<DbRow>),
}

impl QueryOutcome {
    pub fn rows(self) -> Vec<DbRow> {
        match self {
            QueryOutcome::Rows(rows) => rows,
            QueryOutcome::Row(Some(row)) => vec![row],
            _ => Vec::new(),
        }
    }

    pub fn row(self) -> Option<DbRow> {
        match self {
            QueryOutcome::Row(row) => row,
            QueryOutcome::Rows(mut rows) => {
                if rows.is_empty() {
                    None
                } else {
                    Some(rows.remove(0))
                }
            }
            QueryOutcome::Done(_) => None,
        }
    }
}

/// Statement-level SQL seam consumed by the cache loader and the command
/// handlers. `Database` is the production implementation; tests substitute
/// a mock.
#[async_trait]
pub trait SqlRunner: Send + Sync {
    async fn fetch_all(&self, sql: &str, params: &[SqlParam]) -> DbResult<Vec<DbRow>>;

    async fn fetch_one(&self, sql: &str, params: &[SqlParam]) -> DbResult<Option<DbRow>>;

    async fn execute(&self, sql: &str, params: &[SqlParam]) -> DbResult<u64>;

    /// Execute the batch on one connection with autocommit off; commit on
    /// success, roll back on the first failure.
    async fn run_transaction(&self, statements: Vec<(String, Vec<SqlParam>)>) -> DbResult<()>;
}

/// Pool and breaker gauges combined with query metrics.
#[derive(Debug, Clone, Serialize)]
pub struct DbPerformanceSnapshot {
    pub active_connections: u32,
    pub waiting_queue: u32,
    pub pool_size: u32,
    pub query_metrics: std::collections::HashMap<String, QueryKindSnapshot>,
    pub circuit_breaker: BreakerSnapshot,
}

pub struct Database {
    pool: MySqlPool,
    semaphore: Arc<Semaphore>,
    pool_size: u32,
    query_timeout: Duration,
    waiting_queue: Arc<AtomicU32>,
    breaker: Arc<CircuitBreaker>,
    metrics: QueryMetrics,
}

impl Database {
    /// Connect the pool and build the guard rails from configuration.
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.query_timeout_secs.max(1)))
            .connect(&config.url)
            .await
            .map_err(classify_sqlx)?;

        info!(
            pool_size = config.pool_size,
            timeout_secs = config.query_timeout_secs,
            "Database pool initialized"
        );

        Ok(Self::from_pool(pool, config))
    }

    /// Build from an existing pool. Primarily useful for testing.
    pub fn from_pool(pool: MySqlPool, config: &DatabaseConfig) -> Self {
        let breaker = CircuitBreaker::new(
            "database",
            config.breaker_failure_threshold,
            Duration::from_secs(config.breaker_timeout_secs),
            1,
        );
        Self {
            pool,
            semaphore: Arc::new(Semaphore::new(config.pool_size as usize)),
            pool_size: config.pool_size,
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            waiting_queue: Arc::new(AtomicU32::new(0)),
            breaker: Arc::new(breaker),
            metrics: QueryMetrics::new(),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Execute one statement with the full retry/breaker/timeout treatment.
    pub async fn run_query(
        &self,
        sql: &str,
        params: &[SqlParam],
        mode: QueryMode,
    ) -> DbResult<QueryOutcome> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.execute_once(sql, params, mode).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => match retry_backoff(&err, attempt) {
                    Some(delay) => {
                        warn!(
                            kind = %QueryMetrics::statement_kind(sql),
                            attempt,
                            max_attempts = MAX_QUERY_ATTEMPTS,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Transient query failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        if matches!(err, DbError::Timeout) {
                            self.breaker.record_failure();
                        }
                        return Err(err);
                    }
                },
            }
        }
    }

    async fn execute_once(
        &self,
        sql: &str,
        params: &[SqlParam],
        mode: QueryMode,
    ) -> DbResult<QueryOutcome> {
        if self.breaker.is_open() {
            warn!("Database circuit breaker is open - query blocked");
            return Err(DbError::Unavailable);
        }
        if self.query_timeout.is_zero() {
            return Err(DbError::Timeout);
        }

        safe_log_query(sql, params.len());

        let _queue = QueueGuard::enter(&self.waiting_queue, self.pool_size);
        let permit = tokio::time::timeout(self.query_timeout, self.semaphore.acquire())
            .await
            .map_err(|_| DbError::Timeout)?
            .map_err(|_| DbError::Connection)?;

        let start = Instant::now();
        let result = tokio::time::timeout(self.query_timeout, self.dispatch(sql, params, mode))
            .await
            .map_err(|_| DbError::Timeout)?;
        drop(permit);

        match result {
            Ok(outcome) => {
                let elapsed = start.elapsed();
                if self.metrics.record(sql, elapsed) {
                    warn!(
                        elapsed_ms = elapsed.as_millis() as u64,
                        query = %truncate(sql, 100),
                        "Slow query detected"
                    );
                }
                self.breaker.record_success();
                Ok(outcome)
            }
            Err(err) => {
                safe_log_error(&err, sql);
                match &err {
                    DbError::Constraint(_) | DbError::Connection | DbError::PoolExhausted => {
                        self.breaker.record_failure();
                    }
                    _ => {}
                }
                Err(err)
            }
        }
    }

    async fn dispatch(
        &self,
        sql: &str,
        params: &[SqlParam],
        mode: QueryMode,
    ) -> DbResult<QueryOutcome> {
        match mode {
            QueryMode::Commit => {
                let result = bind_params(sqlx::query(sql), params)
                    .execute(&self.pool)
                    .await
                    .map_err(classify_sqlx)?;
                Ok(QueryOutcome::Done(result.rows_affected()))
            }
            QueryMode::FetchOne => {
                let row = bind_params(sqlx::query(sql), params)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(classify_sqlx)?;
                Ok(QueryOutcome::Row(row.map(|r| decode_row(&r)).transpose()?))
            }
            QueryMode::FetchAll => {
                let rows = bind_params(sqlx::query(sql), params)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(classify_sqlx)?;
                let decoded = rows
                    .iter()
                    .map(decode_row)
                    .collect::<DbResult<Vec<DbRow>>>()?;
                Ok(QueryOutcome::Rows(decoded))
            }
        }
    }

    /// Execute statements atomically. Overall budget is twice the per-query
    /// timeout; transient failures are retried, constraint and programming
    /// errors surface immediately.
    pub async fn run_transaction_batch(
        &self,
        statements: &[(String, Vec<SqlParam>)],
    ) -> DbResult<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if self.breaker.is_open() {
                return Err(DbError::Unavailable);
            }

            let budget = self.query_timeout.saturating_mul(2);
            if budget.is_zero() {
                return Err(DbError::Timeout);
            }
            let result = tokio::time::timeout(budget, self.transaction_once(statements))
                .await
                .unwrap_or(Err(DbError::Timeout));

            match result {
                Ok(()) => {
                    self.breaker.record_success();
                    info!(
                        statements = statements.len(),
                        "Transaction completed successfully"
                    );
                    return Ok(());
                }
                Err(err) => {
                    match &err {
                        DbError::Constraint(_) | DbError::Connection => {
                            self.breaker.record_failure()
                        }
                        DbError::Timeout if attempt >= MAX_QUERY_ATTEMPTS => {
                            self.breaker.record_failure()
                        }
                        _ => {}
                    }
                    if err.is_transient() && attempt < MAX_QUERY_ATTEMPTS {
                        let delay = Duration::from_secs_f64(attempt as f64);
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Transient transaction failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    // Constraint and availability kinds keep their identity;
                    // everything else surfaces as a transaction failure.
                    return Err(match err {
                        DbError::Constraint(_)
                        | DbError::Unavailable
                        | DbError::Timeout
                        | DbError::PoolExhausted => err,
                        other => DbError::TransactionFailed(other.to_string()),
                    });
                }
            }
        }
    }

    async fn transaction_once(&self, statements: &[(String, Vec<SqlParam>)]) -> DbResult<()> {
        let _queue = QueueGuard::enter(&self.waiting_queue, self.pool_size);
        let permit = tokio::time::timeout(self.query_timeout, self.semaphore.acquire())
            .await
            .map_err(|_| DbError::Timeout)?
            .map_err(|_| DbError::Connection)?;

        let mut tx = self.pool.begin().await.map_err(classify_sqlx)?;

        for (sql, params) in statements {
            safe_log_query(sql, params.len());
            if let Err(err) = bind_params(sqlx::query(sql), params)
                .execute(&mut *tx)
                .await
                .map_err(classify_sqlx)
            {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(error = %rollback_err, "Failed to roll back transaction");
                } else {
                    warn!(error = %err, "Transaction rolled back");
                }
                drop(permit);
                return Err(err);
            }
        }

        tx.commit().await.map_err(classify_sqlx)?;
        drop(permit);
        Ok(())
    }

    /// Timed connectivity probe used by the health report.
    pub async fn ping(&self) -> DbResult<Duration> {
        let start = Instant::now();
        self.run_query("SELECT 1", &[], QueryMode::FetchOne).await?;
        Ok(start.elapsed())
    }

    pub fn performance_snapshot(&self) -> DbPerformanceSnapshot {
        DbPerformanceSnapshot {
            active_connections: self.pool_size - self.semaphore.available_permits() as u32,
            waiting_queue: self.waiting_queue.load(Ordering::Relaxed),
            pool_size: self.pool_size,
            query_metrics: self.metrics.snapshot(),
            circuit_breaker: self.breaker.snapshot(),
        }
    }
}

#[async_trait]
impl SqlRunner for Database {
    async fn fetch_all(&self, sql: &str, params: &[SqlParam]) -> DbResult<Vec<DbRow>> {
        Ok(self.run_query(sql, params, QueryMode::FetchAll).await?.rows())
    }

    async fn fetch_one(&self, sql: &str, params: &[SqlParam]) -> DbResult<Option<DbRow>> {
        Ok(self.run_query(sql, params, QueryMode::FetchOne).await?.row())
    }

    async fn execute(&self, sql: &str, params: &[SqlParam]) -> DbResult<u64> {
        match self.run_query(sql, params, QueryMode::Commit).await? {
            QueryOutcome::Done(n) => Ok(n),
            _ => Ok(0),
        }
    }

    async fn run_transaction(&self, statements: Vec<(String, Vec<SqlParam>)>) -> DbResult<()> {
        self.run_transaction_batch(&statements).await
    }
}

/// Tracks waiting-queue depth; warns when the queue grows past 1.5x the
/// pool size (sampled every tenth waiter to avoid log storms).
struct QueueGuard<'a> {
    gauge: &'a AtomicU32,
}

impl<'a> QueueGuard<'a> {
    fn enter(gauge: &'a AtomicU32, pool_size: u32) -> Self {
        let depth = gauge.fetch_add(1, Ordering::Relaxed) + 1;
        if depth as f64 > pool_size as f64 * 1.5 && depth % 10 == 0 {
            warn!(waiting = depth - 1, "High database queue depth");
        }
        Self { gauge }
    }
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Backoff before the next attempt, or `None` when the error must surface.
fn retry_backoff(err: &DbError, attempt: u32) -> Option<Duration> {
    if attempt >= MAX_QUERY_ATTEMPTS {
        return None;
    }
    match err {
        DbError::Timeout => Some(Duration::from_secs_f64(0.5 * (attempt + 1) as f64)),
        DbError::PoolExhausted => Some(Duration::from_secs_f64(0.5 * attempt as f64)),
        _ => None,
    }
}

fn classify_sqlx(err: sqlx::Error) -> DbError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if db_err.is_unique_violation()
                || db_err.is_foreign_key_violation()
                || db_err.is_check_violation()
            {
                DbError::Constraint(db_err.code().unwrap_or_default().into_owned())
            } else {
                DbError::Query(db_err.code().unwrap_or_default().into_owned())
            }
        }
        sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
        sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => DbError::Connection,
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            DbError::Decode(err.to_string())
        }
        _ => DbError::Query(err.to_string()),
    }
}

fn bind_params<'q>(
    query: sqlx::query::Query<'q, sqlx::MySql, MySqlArguments>,
    params: &[SqlParam],
) -> sqlx::query::Query<'q, sqlx::MySql, MySqlArguments> {
    let mut query = query;
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(None::<String>),
            SqlParam::Bool(b) => query.bind(*b),
            SqlParam::Int(i) => query.bind(*i),
            SqlParam::Uint(u) => query.bind(*u),
            SqlParam::Float(f) => query.bind(*f),
            SqlParam::Text(s) => query.bind(s.clone()),
            SqlParam::Json(v) => query.bind(v.clone()),
        };
    }
    query
}

fn decode_row(row: &MySqlRow) -> DbResult<DbRow> {
    let mut cells = Vec::with_capacity(row.columns().len());
    for (index, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name().to_ascii_uppercase();
        let cell = decode_cell(row, index, &type_name)
            .map_err(|e| DbError::Decode(format!("column '{}': {e}", column.name())))?;
        cells.push(cell);
    }
    Ok(DbRow::new(cells))
}

fn decode_cell(row: &MySqlRow, index: usize, type_name: &str) -> Result<SqlValue, sqlx::Error> {
    let value = if type_name == "BOOLEAN" {
        row.try_get::<Option<bool>, _>(index)?
            .map_or(SqlValue::Null, SqlValue::Bool)
    } else if type_name.contains("UNSIGNED") {
        row.try_get::<Option<u64>, _>(index)?
            .map_or(SqlValue::Null, SqlValue::Uint)
    } else if matches!(
        type_name,
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT"
    ) {
        row.try_get::<Option<i64>, _>(index)?
            .map_or(SqlValue::Null, SqlValue::Int)
    } else if type_name == "FLOAT" {
        row.try_get::<Option<f32>, _>(index)?
            .map_or(SqlValue::Null, |f| SqlValue::Float(f as f64))
    } else if type_name == "DOUBLE" {
        row.try_get::<Option<f64>, _>(index)?
            .map_or(SqlValue::Null, SqlValue::Float)
    } else if type_name == "JSON" {
        row.try_get::<Option<serde_json::Value>, _>(index)?
            .map_or(SqlValue::Null, SqlValue::Json)
    } else if type_name == "DATE" {
        row.try_get::<Option<chrono::NaiveDate>, _>(index)?
            .map_or(SqlValue::Null, |d| SqlValue::Text(d.to_string()))
    } else if type_name == "TIME" {
        row.try_get::<Option<chrono::NaiveTime>, _>(index)?
            .map_or(SqlValue::Null, |t| SqlValue::Text(t.to_string()))
    } else if type_name == "DATETIME" {
        row.try_get::<Option<chrono::NaiveDateTime>, _>(index)?
            .map_or(SqlValue::Null, |dt| {
                SqlValue::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string())
            })
    } else if type_name == "TIMESTAMP" {
        row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
            .map_or(SqlValue::Null, |dt| SqlValue::Text(dt.to_rfc3339()))
    } else if type_name.contains("BINARY") || type_name.contains("BLOB") {
        row.try_get::<Option<Vec<u8>>, _>(index)?
            .map_or(SqlValue::Null, SqlValue::Bytes)
    } else {
        // VARCHAR, CHAR, TEXT family, ENUM, SET, DECIMAL and anything else
        // textual.
        row.try_get::<Option<String>, _>(index)?
            .map_or(SqlValue::Null, SqlValue::Text)
    };
    Ok(value)
}

fn safe_log_query(sql: &str, param_count: usize) {
    debug!(
        params = param_count,
        query = %truncate(sql, 100),
        "Executing query"
    );
}

fn safe_log_error(err: &DbError, sql: &str) {
    error!(error = %err, query = %truncate(sql, 50), "Query failed");
}

fn truncate(sql: &str, max: usize) -> String {
    let trimmed = sql.trim();
    if trimmed.len() > max {
        let mut end = max;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_backoff_matrix() {
        // Timeout: retried with 0.5 * (attempt + 1).
        assert_eq!(
            retry_backoff(&DbError::Timeout, 1),
            Some(Duration::from_secs_f64(1.0))
        );
        assert_eq!(
            retry_backoff(&DbError::Timeout, 2),
            Some(Duration::from_secs_f64(1.5))
        );
        assert_eq!(retry_backoff(&DbError::Timeout, 3), None);

        // Pool exhaustion: retried with 0.5 * attempt.
        assert_eq!(
            retry_backoff(&DbError::PoolExhausted, 1),
            Some(Duration::from_secs_f64(0.5))
        );
        assert_eq!(
            retry_backoff(&DbError::PoolExhausted, 2),
            Some(Duration::from_secs_f64(1.0))
        );
        assert_eq!(retry_backoff(&DbError::PoolExhausted, 3), None);

        // Permanent kinds never retry.
        assert_eq!(retry_backoff(&DbError::Constraint("1062".into()), 1), None);
        assert_eq!(retry_backoff(&DbError::Query("1064".into()), 1), None);
        assert_eq!(retry_backoff(&DbError::Unavailable, 1), None);
    }

    #[test]
    fn test_truncate_logs() {
        assert_eq!(truncate("SELECT 1", 100), "SELECT 1");
        let long = "SELECT ".repeat(40);
        let out = truncate(&long, 100);
        assert!(out.ends_with("..."));
        assert_eq!(out.len(), 103);
    }

    #[test]
    fn test_outcome_row_accessors() {
        let rows = vec![
            DbRow::new(vec![SqlValue::Int(1)]),
            DbRow::new(vec![SqlValue::Int(2)]),
        ];
        assert_eq!(QueryOutcome::Rows(rows.clone()).rows().len(), 2);
        assert_eq!(
            QueryOutcome::Rows(rows).row().unwrap(),
            DbRow::new(vec![SqlValue::Int(1)])
        );
        assert!(QueryOutcome::Done(3).row().is_none());
        assert!(QueryOutcome::Row(None).rows().is_empty());
    }

    #[test]
    fn test_queue_guard_tracks_depth() {
        let gauge = AtomicU32::new(0);
        {
            let _a = QueueGuard::enter(&gauge, 10);
            let _b = QueueGuard::enter(&gauge, 10);
            assert_eq!(gauge.load(Ordering::Relaxed), 2);
        }
        assert_eq!(gauge.load(Ordering::Relaxed), 0);
    }

    /// A pool handle that never dials out; good enough for paths that must
    /// fail before touching a connection.
    fn lazy_database(config: &crate::config::DatabaseConfig) -> Database {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .connect_lazy(&config.url)
            .expect("lazy pool construction is offline");
        Database::from_pool(pool, config)
    }

    #[tokio::test]
    async fn test_zero_timeout_fails_immediately() {
        let config = crate::config::DatabaseConfig {
            url: "mysql://bot@localhost/guildhall".into(),
            query_timeout_secs: 0,
            ..Default::default()
        };
        let db = lazy_database(&config);

        let err = db
            .run_query("SELECT 1", &[], QueryMode::FetchOne)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Timeout));

        let err = db
            .run_transaction_batch(&[("SELECT 1".into(), vec![])])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Timeout));
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast_without_touching_pool() {
        let config = crate::config::DatabaseConfig {
            url: "mysql://bot@localhost/guildhall".into(),
            breaker_failure_threshold: 3,
            ..Default::default()
        };
        let db = lazy_database(&config);

        for _ in 0..3 {
            db.breaker().record_failure();
        }

        let started = std::time::Instant::now();
        let err = db
            .run_query("SELECT 1", &[], QueryMode::FetchAll)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Unavailable));
        // Fail-fast means no connection attempt and no semaphore wait.
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(
            db.performance_snapshot().active_connections,
            0,
            "no permit may be taken while the breaker is open"
        );
    }
}
