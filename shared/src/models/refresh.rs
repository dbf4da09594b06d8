//! Refresh bookkeeping models

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_ERROR_LEN: usize = 500;

/// Per-location refresh bookkeeping
///
/// `next_due_at` is always `last_attempt_at + effective interval`, where the
/// effective interval is never shorter than the location's refresh interval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshState {
    pub location_id: Uuid,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub next_due_at: DateTime<Utc>,
    pub consecutive_failures: i32,
    pub last_error: Option<String>,
    pub is_enabled: bool,
}

impl RefreshState {
    /// State for a location that has never been fetched: due immediately
    pub fn initial(location_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            location_id,
            last_attempt_at: None,
            last_success_at: None,
            next_due_at: now,
            consecutive_failures: 0,
            last_error: None,
            is_enabled: true,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_enabled && self.next_due_at <= now
    }

    pub fn record_success(&mut self, attempted_at: DateTime<Utc>, interval: Duration) {
        self.last_attempt_at = Some(attempted_at);
        self.last_success_at = Some(attempted_at);
        self.consecutive_failures = 0;
        self.last_error = None;
        self.next_due_at = attempted_at + interval;
    }

    pub fn record_failure(
        &mut self,
        attempted_at: DateTime<Utc>,
        interval: Duration,
        error: &str,
        backoff: &BackoffPolicy,
    ) {
        self.last_attempt_at = Some(attempted_at);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(truncate(error, MAX_ERROR_LEN));
        self.next_due_at =
            attempted_at + backoff.effective_interval(interval, self.consecutive_failures);
    }
}

/// Lengthens the refresh interval for locations that keep failing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Consecutive failures before the interval starts growing
    pub failure_threshold: u32,
    /// Upper bound on the interval multiplier; 1 disables backoff
    pub max_multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            max_multiplier: 4,
        }
    }
}

impl BackoffPolicy {
    pub fn effective_interval(&self, interval: Duration, consecutive_failures: i32) -> Duration {
        let failures = consecutive_failures.max(0) as u32;
        if self.max_multiplier <= 1 || self.failure_threshold == 0 || failures < self.failure_threshold
        {
            return interval;
        }

        let exponent = (failures - self.failure_threshold + 1).min(16);
        let multiplier = 2u32.saturating_pow(exponent).min(self.max_multiplier);
        interval * multiplier as i32
    }
}

/// Outcome of one scheduler tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub elapsed_ms: i64,
}

impl BatchReport {
    pub fn status(&self) -> &'static str {
        match (self.attempted, self.failed) {
            (0, _) => "idle",
            (_, 0) => "success",
            (a, f) if a == f => "failed",
            _ => "partial",
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push('…');
        cut
    }
}
