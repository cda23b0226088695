// src/failover/mod.rs

//! Multi-node failover.
//!
//! A [`FailoverManager`] tracks the health of an ordered list of nodes and
//! routes each operation to the active one. When the node cannot be reached,
//! it is marked down and the next healthy node in configured order takes
//! over. Errors that come from the operation itself are handed back untouched.

mod health;

pub use health::{FailoverStats, is_node_failure};

use crate::client::connection::{NodeConnector, NodeId, OpFuture};
use crate::common::config::duration_ms;
use crate::common::error::{BoxError, ResilienceError, Result};
use health::{NodeHealth, SharedHealth, read, spawn_health_check, write};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Failover policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    pub enabled: bool,
    /// Nodes in order of preference
    pub fallback_nodes: Vec<NodeId>,
    /// How often silent nodes are checked; zero disables the background check
    #[serde(with = "duration_ms")]
    pub health_check_interval: Duration,
    /// Pause between failover attempts within one operation
    #[serde(with = "duration_ms")]
    pub retry_interval: Duration,
    pub max_failover_attempts: u32,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fallback_nodes: Vec::new(),
            health_check_interval: Duration::from_secs(30),
            retry_interval: Duration::from_secs(1),
            max_failover_attempts: 3,
        }
    }
}

impl FailoverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_failover_attempts == 0 {
            return Err(ResilienceError::InvalidConfig(
                "max_failover_attempts must be at least 1".to_string(),
            ));
        }
        if self.enabled && self.fallback_nodes.is_empty() {
            return Err(ResilienceError::InvalidConfig(
                "failover is enabled but no fallback nodes are configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for node in &self.fallback_nodes {
            if node.trim().is_empty() {
                return Err(ResilienceError::InvalidConfig("node ids must not be empty".to_string()));
            }
            if !seen.insert(node.as_str()) {
                return Err(ResilienceError::InvalidConfig(format!("duplicate node '{}'", node)));
            }
        }
        Ok(())
    }
}

/// Routes operations to the healthiest available node.
pub struct FailoverManager<N> {
    config: FailoverConfig,
    connector: N,
    state: SharedHealth,
    shutdown: CancellationToken,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl<N: NodeConnector> FailoverManager<N> {
    /// Create a manager over `config.fallback_nodes`. All nodes start healthy
    /// and the first is active.
    ///
    /// When failover is enabled with a non-zero `health_check_interval`, a
    /// background task is spawned on the current Tokio runtime; it runs until
    /// [`stop`](Self::stop) is called or the manager is dropped.
    pub fn new(config: FailoverConfig, connector: N) -> Result<Self> {
        config.validate()?;

        let state = Arc::new(RwLock::new(NodeHealth::new(&config.fallback_nodes)));
        let shutdown = CancellationToken::new();

        let health_task = if config.enabled && !config.health_check_interval.is_zero() {
            if tokio::runtime::Handle::try_current().is_err() {
                return Err(ResilienceError::InvalidConfig(
                    "health checks require a running Tokio runtime".to_string(),
                ));
            }
            Some(spawn_health_check(
                Arc::clone(&state),
                config.health_check_interval,
                shutdown.clone(),
            ))
        } else {
            None
        };

        info!(
            "Failover manager created: enabled={}, nodes={:?}",
            config.enabled, config.fallback_nodes
        );

        Ok(Self {
            config,
            connector,
            state,
            shutdown,
            health_task: Mutex::new(health_task),
        })
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    /// Run `operation` on the active node, failing over to the next healthy
    /// node when the current one is unreachable.
    pub async fn execute<T, F>(&self, cancel: &CancellationToken, operation: F) -> Result<T>
    where
        F: for<'c> Fn(&'c mut N::Connection) -> OpFuture<'c, T>,
    {
        if !self.config.enabled {
            return Err(ResilienceError::NotEnabled);
        }

        let mut attempts = 0;
        let mut last_error: Option<BoxError> = None;

        while attempts < self.config.max_failover_attempts {
            if attempts > 0 {
                self.pause(cancel).await?;
            }
            if cancel.is_cancelled() {
                return Err(ResilienceError::Cancelled);
            }

            let Some(node) = self.active_node() else {
                error!("No healthy nodes available for failover");
                return Err(ResilienceError::NoHealthyNodes);
            };
            attempts += 1;

            let mut connection = match self.connector.connect(cancel, &node).await {
                Ok(connection) => connection,
                // A caller giving up says nothing about the node.
                Err(err) if cancel.is_cancelled() => {
                    debug!("Connect to node '{}' abandoned: {}", node, err);
                    return Err(ResilienceError::Cancelled);
                }
                Err(err) => {
                    warn!("Failed to connect to node '{}': {}", node, err);
                    last_error = Some(err);
                    if !self.demote(&node) {
                        break;
                    }
                    continue;
                }
            };

            let result = operation(&mut connection).await;
            self.connector.release(&node, connection).await;

            match result {
                Ok(value) => {
                    let mut state = write(&self.state);
                    state.touch(&node);
                    state.record_success();
                    return Ok(value);
                }
                Err(err) if is_node_failure(err.as_ref()) && cancel.is_cancelled() => {
                    debug!("Operation on node '{}' abandoned: {}", node, err);
                    return Err(ResilienceError::Cancelled);
                }
                Err(err) if is_node_failure(err.as_ref()) => {
                    warn!("Node '{}' failed during operation: {}", node, err);
                    last_error = Some(err);
                    if !self.demote(&node) {
                        break;
                    }
                }
                Err(err) => {
                    debug!("Operation on node '{}' failed: {}", node, err);
                    return Err(ResilienceError::Operation(err));
                }
            }
        }

        write(&self.state).record_failure();
        error!("Failover failed after {} attempts", attempts);
        Err(ResilienceError::FailoverExhausted { attempts, source: last_error })
    }

    /// Mark a node unhealthy. If it was active, the next healthy node in
    /// configured order takes over.
    pub fn mark_node_down(&self, node: &str) -> Result<()> {
        write(&self.state).mark_down(node)
    }

    /// Mark a node healthy. It becomes active if no healthy node currently is.
    pub fn mark_node_up(&self, node: &str) -> Result<()> {
        write(&self.state).mark_up(node)
    }

    pub fn active_node(&self) -> Option<NodeId> {
        read(&self.state).active().cloned()
    }

    pub fn is_node_healthy(&self, node: &str) -> bool {
        read(&self.state).is_healthy(node)
    }

    pub fn healthy_nodes(&self) -> Vec<NodeId> {
        read(&self.state).healthy_nodes()
    }

    pub fn unhealthy_nodes(&self) -> Vec<NodeId> {
        read(&self.state).unhealthy_nodes()
    }

    pub fn stats(&self) -> FailoverStats {
        read(&self.state).snapshot()
    }

    /// Mark `node` down; returns whether any healthy node is left.
    fn demote(&self, node: &str) -> bool {
        let mut state = write(&self.state);
        if let Err(err) = state.mark_down(node) {
            debug!("{}", err);
        }
        state.has_healthy()
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<()> {
        if self.config.retry_interval.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResilienceError::Cancelled),
            _ = tokio::time::sleep(self.config.retry_interval) => Ok(()),
        }
    }
}

impl<N> FailoverManager<N> {
    /// Stop the background health check. Safe to call more than once.
    pub fn stop(&self) {
        self.shutdown.cancel();
        let task = self.health_task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = task {
            handle.abort();
            debug!("Health check task aborted");
        }
    }
}

impl<N> Drop for FailoverManager<N> {
    fn drop(&mut self) {
        self.stop();
    }
}
