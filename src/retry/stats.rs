// src/retry/stats.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Point-in-time view of a retry manager's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetryStats {
    /// Calls to `execute` (one per call, not per attempt)
    pub total_attempts: u64,
    pub successful_ops: u64,
    pub failed_ops: u64,
    /// Backoff waits started
    pub total_retries: u64,
    /// `total_retries / total_attempts`, or 0 before the first call
    pub average_retries: f64,
    pub last_retry_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub(crate) struct RetryCounters {
    total_attempts: AtomicU64,
    successful_ops: AtomicU64,
    failed_ops: AtomicU64,
    total_retries: AtomicU64,
    last_retry_time: Mutex<Option<DateTime<Utc>>>,
}

impl RetryCounters {
    pub(crate) fn record_call(&self) {
        self.total_attempts.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_success(&self) {
        self.successful_ops.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_failure(&self) {
        self.failed_ops.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_retry(&self) {
        self.total_retries.fetch_add(1, Ordering::SeqCst);
        *self.last_retry_time.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    pub(crate) fn snapshot(&self) -> RetryStats {
        let total_attempts = self.total_attempts.load(Ordering::SeqCst);
        let total_retries = self.total_retries.load(Ordering::SeqCst);
        let average_retries = if total_attempts == 0 {
            0.0
        } else {
            total_retries as f64 / total_attempts as f64
        };

        RetryStats {
            total_attempts,
            successful_ops: self.successful_ops.load(Ordering::SeqCst),
            failed_ops: self.failed_ops.load(Ordering::SeqCst),
            total_retries,
            average_retries,
            last_retry_time: *self.last_retry_time.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub(crate) fn reset(&self) {
        self.total_attempts.store(0, Ordering::SeqCst);
        self.successful_ops.store(0, Ordering::SeqCst);
        self.failed_ops.store(0, Ordering::SeqCst);
        self.total_retries.store(0, Ordering::SeqCst);
        *self.last_retry_time.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
