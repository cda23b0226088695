// src/executor.rs

//! Retry layered over failover.

use crate::client::connection::{NodeConnector, OpFuture};
use crate::common::config::ResilienceConfig;
use crate::common::error::Result;
use crate::failover::FailoverManager;
use crate::retry::RetryManager;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs each operation through the failover manager, and retries the whole
/// failover pass when the error it ends with is transient. Cancellation at any
/// point surfaces as [`ResilienceError::Cancelled`](crate::ResilienceError::Cancelled) or
/// [`ResilienceError::CancelledDuringWait`](crate::ResilienceError::CancelledDuringWait).
pub struct ResilientExecutor<N> {
    retry: RetryManager,
    failover: Arc<FailoverManager<N>>,
}

impl<N: NodeConnector> ResilientExecutor<N> {
    pub fn new(retry: RetryManager, failover: Arc<FailoverManager<N>>) -> Self {
        Self { retry, failover }
    }

    pub fn from_config(config: &ResilienceConfig, connector: N) -> Result<Self> {
        let retry = RetryManager::new(config.retry.clone())?;
        let failover = FailoverManager::new(config.failover.clone(), connector)?;
        Ok(Self::new(retry, Arc::new(failover)))
    }

    pub fn retry(&self) -> &RetryManager {
        &self.retry
    }

    pub fn failover(&self) -> &Arc<FailoverManager<N>> {
        &self.failover
    }

    pub async fn execute<T, F>(&self, cancel: &CancellationToken, operation: F) -> Result<T>
    where
        F: for<'c> Fn(&'c mut N::Connection) -> OpFuture<'c, T>,
    {
        let operation = &operation;
        let failover = &self.failover;
        self.retry
            .execute(cancel, move || failover.execute(cancel, operation))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ErrorKind, classify};
    use crate::client::error::StoreError;
    use crate::client::pool::{Fault, MemoryConnection, MemoryPool, PoolOptions};
    use crate::common::error::{BoxError, ResilienceError};
    use crate::failover::FailoverConfig;
    use crate::retry::RetryConfig;
    use std::time::Duration;

    fn executor(pool: &MemoryPool) -> ResilientExecutor<MemoryPool> {
        let config = ResilienceConfig {
            retry: RetryConfig {
                max_retries: 2,
                initial_interval: Duration::from_millis(5),
                max_interval: Duration::from_millis(20),
                multiplier: 2.0,
                randomize_wait: false,
            },
            failover: FailoverConfig {
                enabled: true,
                fallback_nodes: vec!["n1".to_string(), "n2".to_string()],
                health_check_interval: Duration::ZERO,
                retry_interval: Duration::ZERO,
                max_failover_attempts: 2,
            },
        };
        ResilientExecutor::from_config(&config, pool.clone()).unwrap()
    }

    async fn run_update(executor: &ResilientExecutor<MemoryPool>, cancel: &CancellationToken) -> Result<String> {
        executor
            .execute(cancel, |conn: &mut MemoryConnection| {
                Box::pin(async move {
                    conn.execute("UPDATE accounts SET balance = balance + 1").await?;
                    Ok::<_, BoxError>(conn.node().to_string())
                })
            })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_is_retried() {
        let pool = MemoryPool::new(["n1", "n2"], PoolOptions::default());
        pool.inject("n1", Fault::Store(StoreError::new("40001", "could not serialize access")));
        let executor = executor(&pool);

        let node = run_update(&executor, &CancellationToken::new()).await.unwrap();
        assert_eq!(node, "n1");
        assert_eq!(executor.retry().stats().total_retries, 1);
        assert_eq!(executor.failover().stats().total_failovers, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_and_deadlock() {
        let pool = MemoryPool::new(["n1", "n2"], PoolOptions::default());
        pool.set_online("n1", false);
        pool.inject("n2", Fault::Store(StoreError::new("40P01", "deadlock detected")));
        let executor = executor(&pool);

        let node = run_update(&executor, &CancellationToken::new()).await.unwrap();
        assert_eq!(node, "n2");
        assert_eq!(pool.executed("n2"), 1);
        assert_eq!(executor.failover().unhealthy_nodes(), vec!["n1".to_string()]);

        let retry = executor.retry().stats();
        assert_eq!(retry.total_retries, 1);
        assert_eq!(retry.successful_ops, 1);
    }

    #[tokio::test]
    async fn test_constraint_violation_is_not_retried() {
        let pool = MemoryPool::new(["n1", "n2"], PoolOptions::default());
        pool.inject("n1", Fault::Store(StoreError::new("23505", "duplicate key value")));
        let executor = executor(&pool);

        let err = run_update(&executor, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ResilienceError::NonRetryable { attempts: 1, .. }));
        assert_eq!(classify(&err).kind(), ErrorKind::UniqueViolation);
        assert!(executor.failover().is_node_healthy("n1"));
    }

    #[tokio::test]
    async fn test_cancellation_is_reported_plainly() {
        let pool = MemoryPool::new(["n1", "n2"], PoolOptions::default());
        let executor = executor(&pool);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = run_update(&executor, &cancel).await.unwrap_err();
        assert!(matches!(err, ResilienceError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_connect_leaves_cluster_untouched() {
        let pool = MemoryPool::new(["n1", "n2"], PoolOptions {
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
        });
        let _held = pool.connect(&CancellationToken::new(), "n1").await.unwrap();
        let executor = executor(&pool);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let err = run_update(&executor, &cancel).await.unwrap_err();
        assert!(matches!(err, ResilienceError::Cancelled));
        assert!(executor.failover().unhealthy_nodes().is_empty());
        assert_eq!(executor.retry().stats().total_retries, 0);
    }

    #[tokio::test]
    async fn test_exhausted_cluster_is_not_retried() {
        let pool = MemoryPool::new(["n1", "n2"], PoolOptions::default());
        pool.set_online("n1", false);
        pool.set_online("n2", false);
        let executor = executor(&pool);

        let err = run_update(&executor, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ResilienceError::NonRetryable { attempts: 1, .. }));
        assert_eq!(classify(&err).kind(), ErrorKind::ConnectionRefused);
        assert_eq!(executor.failover().stats().failed_failovers, 1);
    }
}
