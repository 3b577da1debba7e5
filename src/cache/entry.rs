//! Individual cache entries with access tracking and prediction.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use serde_json::Value;

use super::categories::Category;

/// Ring capacity for recent access timestamps.
const ACCESS_RING_CAPACITY: usize = 20;

/// Accesses beyond this mark an entry hot (eligible for predictive preload).
pub(super) const HOT_ACCESS_THRESHOLD: u64 = 5;

/// Minimum samples before a next-access prediction is produced.
const PREDICTION_MIN_SAMPLES: usize = 3;

/// Result of checking an existing prediction on access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PredictionCheck {
    /// No prediction existed before this access.
    None,
    /// A prediction existed; `correct` when the access landed within 20% of
    /// the TTL around the predicted instant.
    Made { correct: bool },
}

/// A cached value with TTL and access metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    value: Value,
    created_at: Instant,
    ttl: Duration,
    category: Category,
    access_count: u64,
    last_accessed: Instant,
    access_times: VecDeque<Instant>,
    predicted_next_access: Option<Instant>,
    is_hot: bool,
}

impl CacheEntry {
    pub fn new(value: Value, ttl: Duration, category: Category) -> Self {
        let now = Instant::now();
        let mut access_times = VecDeque::with_capacity(ACCESS_RING_CAPACITY);
        access_times.push_back(now);
        Self {
            value,
            created_at: now,
            ttl,
            category,
            access_count: 1,
            last_accessed: now,
            access_times,
            predicted_next_access: None,
            is_hot: false,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_hot(&self) -> bool {
        self.is_hot
    }

    pub fn predicted_next_access(&self) -> Option<Instant> {
        self.predicted_next_access
    }

    /// Age since creation.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Expiry is strict: an entry whose age equals the TTL exactly is still
    /// alive. A zero TTL means immediately expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub(super) fn is_expired_at(&self, now: Instant) -> bool {
        if self.ttl.is_zero() {
            return true;
        }
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    /// Record an access: bump the counter, append to the ring (FIFO beyond
    /// capacity), refresh the prediction once enough samples exist, and
    /// flip the hot flag past the threshold. Returns the value plus the
    /// outcome of the pre-existing prediction, for the store's counters.
    pub(super) fn access(&mut self) -> (Value, PredictionCheck) {
        let now = Instant::now();

        let check = match self.predicted_next_access {
            Some(predicted) => {
                let window = self.ttl.mul_f64(0.2);
                let distance = if now >= predicted {
                    now - predicted
                } else {
                    predicted - now
                };
                PredictionCheck::Made {
                    correct: distance <= window,
                }
            }
            None => PredictionCheck::None,
        };

        self.access_count += 1;
        self.last_accessed = now;
        if self.access_times.len() == ACCESS_RING_CAPACITY {
            self.access_times.pop_front();
        }
        self.access_times.push_back(now);

        if self.access_times.len() >= PREDICTION_MIN_SAMPLES {
            self.update_prediction(now);
        }

        if self.access_count > HOT_ACCESS_THRESHOLD {
            self.is_hot = true;
        }

        (self.value.clone(), check)
    }

    fn update_prediction(&mut self, now: Instant) {
        let samples = self.access_times.len();
        if samples < PREDICTION_MIN_SAMPLES {
            return;
        }

        let mut total = Duration::ZERO;
        let mut prev: Option<Instant> = None;
        for &t in &self.access_times {
            if let Some(p) = prev {
                total += t.saturating_duration_since(p);
            }
            prev = Some(t);
        }
        let avg = total / (samples as u32 - 1);
        self.predicted_next_access = Some(now + avg);
    }

    /// Preload is worthwhile when the entry is hot and the predicted next
    /// access falls within the leading 20% of the TTL window.
    pub(super) fn should_preload(&self) -> bool {
        let Some(predicted) = self.predicted_next_access else {
            return false;
        };
        if !self.is_hot {
            return false;
        }

        let now = Instant::now();
        if predicted <= now {
            return false;
        }
        predicted - now < self.ttl.mul_f64(0.2)
    }

    /// Instant at which a preload task should fire: 10% of the TTL ahead of
    /// the predicted access.
    pub(super) fn preload_at(&self) -> Option<Instant> {
        let predicted = self.predicted_next_access?;
        predicted.checked_sub(self.ttl.mul_f64(0.1))
    }
}
