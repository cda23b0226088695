// src/retry/mod.rs

//! Bounded exponential-backoff retry.
//!
//! [`RetryManager::execute`] runs an operation up to `max_retries + 1` times,
//! consulting [`classify`](crate::classify::classify) after each failure to
//! decide whether another attempt is worthwhile. Waits between attempts race
//! the caller's cancellation token, and cancellation always wins.

mod stats;

pub use stats::RetryStats;

use crate::classify::classify;
use crate::client::connection::{ConnectionProvider, OpFuture};
use crate::common::config::duration_ms;
use crate::common::error::{BoxError, ResilienceError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use stats::RetryCounters;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Jitter applied to each wait when `randomize_wait` is set (±25%).
const JITTER: f64 = 0.25;

/// Retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Wait before the first retry
    #[serde(with = "duration_ms")]
    pub initial_interval: Duration,
    /// Upper bound for any single wait
    #[serde(with = "duration_ms")]
    pub max_interval: Duration,
    /// Growth factor between consecutive waits
    pub multiplier: f64,
    /// Spread waits by ±25% so concurrent callers don't retry in lockstep
    pub randomize_wait: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            multiplier: 2.0,
            randomize_wait: true,
        }
    }
}

impl RetryConfig {
    /// Reject settings that cannot produce a sensible backoff schedule.
    pub fn validate(&self) -> Result<()> {
        if self.initial_interval.is_zero() {
            return Err(ResilienceError::InvalidConfig(
                "initial_interval must be greater than zero".to_string(),
            ));
        }
        if self.max_interval < self.initial_interval {
            return Err(ResilienceError::InvalidConfig(format!(
                "max_interval ({:?}) must not be less than initial_interval ({:?})",
                self.max_interval, self.initial_interval
            )));
        }
        if !self.multiplier.is_finite() || self.multiplier <= 1.0 {
            return Err(ResilienceError::InvalidConfig(format!(
                "multiplier must be greater than 1.0, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }

    /// Wait before retry number `retry` (0-based), without jitter:
    /// `min(initial_interval * multiplier^retry, max_interval)`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let nanos = self.initial_interval.as_nanos() as f64 * self.multiplier.powi(exponent);
        let nanos = nanos.min(self.max_interval.as_nanos() as f64);
        Duration::from_nanos(nanos as u64)
    }

    /// Wait actually slept before retry number `retry`.
    fn wait_for(&self, retry: u32) -> Duration {
        let base = self.backoff(retry);
        if !self.randomize_wait {
            return base;
        }

        let factor = rand::rng().random_range((1.0 - JITTER)..=(1.0 + JITTER));
        let nanos = base.as_nanos() as f64 * factor;
        if nanos <= 0.0 {
            self.initial_interval
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }
}

/// Runs operations with bounded retry and keeps running statistics.
///
/// Each manager owns its configuration and counters; nothing is shared between
/// instances.
#[derive(Debug)]
pub struct RetryManager {
    config: RwLock<Arc<RetryConfig>>,
    stats: RetryCounters,
}

impl RetryManager {
    pub fn new(config: RetryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            stats: RetryCounters::default(),
        })
    }

    /// The configuration new calls will run under.
    pub fn config(&self) -> Arc<RetryConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace the configuration. Invalid configurations are rejected and the
    /// current one stays in place; calls already running keep the configuration
    /// they started with.
    pub fn update_config(&self, config: RetryConfig) -> Result<()> {
        config.validate()?;
        info!(
            "Updating retry config: max_retries={}, initial_interval={:?}, max_interval={:?}, multiplier={}",
            config.max_retries, config.initial_interval, config.max_interval, config.multiplier
        );
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        Ok(())
    }

    pub fn stats(&self) -> RetryStats {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// runs out of attempts, or `cancel` fires.
    pub async fn execute<T, E, F, Fut>(&self, cancel: &CancellationToken, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        let config = self.config();
        let max_attempts = config.max_retries.saturating_add(1);
        self.stats.record_call();

        let mut attempts: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                debug!("Operation cancelled before attempt {}", attempts + 1);
                self.stats.record_failure();
                return Err(ResilienceError::Cancelled);
            }

            attempts += 1;
            let err: BoxError = match operation().await {
                Ok(value) => {
                    self.stats.record_success();
                    return Ok(value);
                }
                Err(err) => err.into(),
            };

            if cancel.is_cancelled() {
                debug!("Attempt {} failed after cancellation: {}", attempts, err);
                self.stats.record_failure();
                return Err(ResilienceError::Cancelled);
            }

            let classified = classify(err.as_ref());
            if !classified.is_retryable() {
                warn!("Non-retryable {} error after {} attempts: {}", classified.kind(), attempts, err);
                self.stats.record_failure();
                return Err(ResilienceError::NonRetryable { attempts, source: err });
            }

            if attempts >= max_attempts {
                warn!("Operation failed after {} attempts, last error: {}", attempts, err);
                self.stats.record_failure();
                return Err(ResilienceError::RetriesExhausted { attempts, source: err });
            }

            let wait = config.wait_for(attempts - 1);
            self.stats.record_retry();
            debug!(
                "Retrying after {} error (attempt {}/{}), waiting {:?}",
                classified.kind(),
                attempts,
                max_attempts,
                wait
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Operation cancelled while waiting to retry");
                    self.stats.record_failure();
                    return Err(ResilienceError::CancelledDuringWait);
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Like [`execute`](Self::execute), but every attempt checks a connection
    /// out of `provider`, runs `operation` on it and hands it back, whatever
    /// the outcome. Failing to acquire a connection counts as a failed attempt.
    pub async fn execute_with_conn<P, T, F>(
        &self,
        cancel: &CancellationToken,
        provider: &P,
        operation: F,
    ) -> Result<T>
    where
        P: ConnectionProvider,
        F: for<'c> Fn(&'c mut P::Connection) -> OpFuture<'c, T>,
    {
        let operation = &operation;
        self.execute(cancel, move || async move {
            let mut connection = match provider.acquire(cancel).await {
                Ok(connection) => connection,
                Err(err) => {
                    debug!("Failed to acquire connection: {}", err);
                    return Err(err);
                }
            };
            let result = operation(&mut connection).await;
            provider.release(connection).await;
            result
        })
        .await
    }
}
