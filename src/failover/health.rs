// src/failover/health.rs

//! Node health bookkeeping for the failover manager.

use crate::client::connection::NodeId;
use crate::common::error::{ResilienceError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Phrases in an error message that point at the node rather than the query.
const NODE_FAILURE_PHRASES: [&str; 8] = [
    "connection refused",
    "connection reset",
    "unreachable",
    "no route",
    "timeout",
    "server closed",
    "connection lost",
    "broken pipe",
];

/// Whether `err` (or anything in its source chain) says the node itself is
/// unreachable. Matching is on message text, case-insensitively.
pub fn is_node_failure(err: &(dyn Error + 'static)) -> bool {
    std::iter::successors(Some(err), |err| (*err).source()).any(|err| {
        let text = err.to_string().to_lowercase();
        NODE_FAILURE_PHRASES.iter().any(|phrase| text.contains(phrase))
    })
}

/// Point-in-time view of failover activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FailoverStats {
    /// Times the active node was re-selected after going down
    pub total_failovers: u64,
    /// Operations that completed on some node
    pub successful_failovers: u64,
    /// Operations that ran out of failover attempts
    pub failed_failovers: u64,
    pub current_active_node: Option<NodeId>,
    pub down_nodes: Vec<NodeId>,
    pub last_failover_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
struct NodeState {
    healthy: bool,
    last_seen: Instant,
}

/// Health of every configured node plus the active selection.
///
/// `active` is always `None` or a configured node that is currently healthy.
#[derive(Debug)]
pub(crate) struct NodeHealth {
    order: Vec<NodeId>,
    nodes: HashMap<NodeId, NodeState>,
    active: Option<NodeId>,
    total_failovers: u64,
    successful_failovers: u64,
    failed_failovers: u64,
    last_failover_time: Option<DateTime<Utc>>,
}

pub(crate) type SharedHealth = Arc<RwLock<NodeHealth>>;

pub(crate) fn read(state: &SharedHealth) -> RwLockReadGuard<'_, NodeHealth> {
    state.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write(state: &SharedHealth) -> RwLockWriteGuard<'_, NodeHealth> {
    state.write().unwrap_or_else(PoisonError::into_inner)
}

impl NodeHealth {
    /// All nodes start healthy; the first one is active.
    pub(crate) fn new(order: &[NodeId]) -> Self {
        let now = Instant::now();
        let nodes = order
            .iter()
            .map(|node| (node.clone(), NodeState { healthy: true, last_seen: now }))
            .collect();

        Self {
            order: order.to_vec(),
            nodes,
            active: order.first().cloned(),
            total_failovers: 0,
            successful_failovers: 0,
            failed_failovers: 0,
            last_failover_time: None,
        }
    }

    fn node_mut(&mut self, node: &str) -> Result<&mut NodeState> {
        self.nodes
            .get_mut(node)
            .ok_or_else(|| ResilienceError::NodeNotFound(node.to_string()))
    }

    pub(crate) fn active(&self) -> Option<&NodeId> {
        self.active.as_ref()
    }

    pub(crate) fn is_healthy(&self, node: &str) -> bool {
        self.nodes.get(node).is_some_and(|state| state.healthy)
    }

    pub(crate) fn has_healthy(&self) -> bool {
        self.nodes.values().any(|state| state.healthy)
    }

    pub(crate) fn mark_down(&mut self, node: &str) -> Result<()> {
        let state = self.node_mut(node)?;
        if state.healthy {
            warn!("Marking node '{}' as down", node);
        }
        state.healthy = false;

        if self.active.as_deref() == Some(node) {
            self.select_active();
        }
        Ok(())
    }

    pub(crate) fn mark_up(&mut self, node: &str) -> Result<()> {
        let state = self.node_mut(node)?;
        if !state.healthy {
            info!("Node '{}' is back up", node);
        }
        state.healthy = true;
        state.last_seen = Instant::now();

        let active_ok = self.active.as_deref().is_some_and(|active| self.is_healthy(active));
        if !active_ok {
            info!("Node '{}' is now the active node", node);
            self.active = Some(node.to_string());
        }
        Ok(())
    }

    /// Record that `node` just served an operation.
    pub(crate) fn touch(&mut self, node: &str) {
        if let Some(state) = self.nodes.get_mut(node) {
            state.last_seen = Instant::now();
        }
    }

    /// Make the first healthy node, in configured order, the active one.
    pub(crate) fn select_active(&mut self) {
        let previous = self.active.take();
        self.active = self.order.iter().find(|node| self.is_healthy(node)).cloned();
        self.total_failovers += 1;
        self.last_failover_time = Some(Utc::now());

        match &self.active {
            Some(node) => info!(
                "Failover: active node changed from {:?} to '{}'",
                previous.as_deref().unwrap_or(""),
                node
            ),
            None => error!("Failover: no healthy nodes remain (was {:?})", previous.as_deref().unwrap_or("")),
        }
    }

    /// Demote every node not seen for longer than `max_age`. Returns the nodes
    /// that changed state.
    pub(crate) fn expire_stale(&mut self, now: Instant, max_age: Duration) -> Vec<NodeId> {
        let mut demoted = Vec::new();
        for node in &self.order {
            if let Some(state) = self.nodes.get_mut(node) {
                if state.healthy && now.saturating_duration_since(state.last_seen) > max_age {
                    state.healthy = false;
                    demoted.push(node.clone());
                }
            }
        }

        let active_ok = self.active.as_deref().is_some_and(|active| self.is_healthy(active));
        if !active_ok && self.active.is_some() {
            self.select_active();
        }
        demoted
    }

    pub(crate) fn record_success(&mut self) {
        self.successful_failovers += 1;
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed_failovers += 1;
    }

    pub(crate) fn healthy_nodes(&self) -> Vec<NodeId> {
        self.order.iter().filter(|node| self.is_healthy(node)).cloned().collect()
    }

    pub(crate) fn unhealthy_nodes(&self) -> Vec<NodeId> {
        self.order.iter().filter(|node| !self.is_healthy(node)).cloned().collect()
    }

    pub(crate) fn snapshot(&self) -> FailoverStats {
        FailoverStats {
            total_failovers: self.total_failovers,
            successful_failovers: self.successful_failovers,
            failed_failovers: self.failed_failovers,
            current_active_node: self.active.clone(),
            down_nodes: self.unhealthy_nodes(),
            last_failover_time: self.last_failover_time,
        }
    }
}

/// Periodically demote nodes that have not been seen for three intervals.
/// Runs until `shutdown` is cancelled.
pub(crate) fn spawn_health_check(
    state: SharedHealth,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let max_age = interval * 3;

        info!(interval_ms = interval.as_millis() as u64, "Health check started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let demoted = write(&state).expire_stale(Instant::now(), max_age);
                    if demoted.is_empty() {
                        debug!("Health check: all nodes seen recently");
                    } else {
                        warn!(nodes = ?demoted, "Health check marked stale nodes unhealthy");
                    }
                }
            }
        }
        info!("Health check stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn nodes() -> Vec<NodeId> {
        vec!["n1".to_string(), "n2".to_string(), "n3".to_string()]
    }

    #[test]
    fn test_initial_state() {
        let health = NodeHealth::new(&nodes());
        assert_eq!(health.active().map(String::as_str), Some("n1"));
        assert_eq!(health.healthy_nodes(), nodes());
        assert!(health.unhealthy_nodes().is_empty());
    }

    #[test]
    fn test_selection_follows_configured_order() {
        let mut health = NodeHealth::new(&nodes());
        health.mark_down("n1").unwrap();
        assert_eq!(health.active().map(String::as_str), Some("n2"));
        assert_eq!(health.snapshot().total_failovers, 1);

        // Marking a non-active node down does not trigger selection.
        health.mark_down("n3").unwrap();
        assert_eq!(health.active().map(String::as_str), Some("n2"));
        assert_eq!(health.snapshot().total_failovers, 1);
    }

    #[test]
    fn test_all_nodes_down() {
        let mut health = NodeHealth::new(&nodes());
        for node in nodes() {
            health.mark_down(&node).unwrap();
        }
        assert!(health.active().is_none());
        assert!(health.healthy_nodes().is_empty());
        assert!(!health.has_healthy());

        let stats = health.snapshot();
        assert_eq!(stats.current_active_node, None);
        assert_eq!(stats.down_nodes, nodes());
    }

    #[test]
    fn test_mark_up_restores_active() {
        let mut health = NodeHealth::new(&nodes());
        for node in nodes() {
            health.mark_down(&node).unwrap();
        }
        health.mark_up("n3").unwrap();
        assert_eq!(health.active().map(String::as_str), Some("n3"));

        // A healthy active node is kept when another node comes back.
        health.mark_up("n1").unwrap();
        assert_eq!(health.active().map(String::as_str), Some("n3"));
    }

    #[test]
    fn test_unknown_node_leaves_state_untouched() {
        let mut health = NodeHealth::new(&nodes());
        let before = health.snapshot();

        let err = health.mark_down("unknown-node").unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(health.mark_up("unknown-node").is_err());
        assert_eq!(health.snapshot(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_stale() {
        let mut health = NodeHealth::new(&nodes());
        tokio::time::advance(Duration::from_secs(2)).await;
        health.touch("n2");
        tokio::time::advance(Duration::from_secs(2)).await;

        let demoted = health.expire_stale(Instant::now(), Duration::from_secs(3));
        assert_eq!(demoted, vec!["n1".to_string(), "n3".to_string()]);
        assert_eq!(health.active().map(String::as_str), Some("n2"));
        assert_eq!(health.snapshot().total_failovers, 1);
    }

    #[test]
    fn test_node_failure_phrases() {
        let failures: Vec<Box<dyn Error + Send + Sync>> = vec![
            Box::new(io::Error::new(io::ErrorKind::ConnectionRefused, "Connection refused (os error 111)")),
            "read tcp: connection reset by peer".into(),
            "network is unreachable".into(),
            "dial tcp: no route to host".into(),
            "i/o timeout".into(),
            "server closed the connection unexpectedly".into(),
            "write: broken pipe".into(),
            "Connection lost while reading".into(),
        ];
        for err in &failures {
            assert!(is_node_failure(err.as_ref()), "{} should be a node failure", err);
        }

        let query_errors: Vec<Box<dyn Error + Send + Sync>> = vec![
            "duplicate key value violates unique constraint".into(),
            "syntax error at or near \"SELEC\"".into(),
            "relation \"users\" does not exist".into(),
        ];
        for err in &query_errors {
            assert!(!is_node_failure(err.as_ref()), "{} should not be a node failure", err);
        }
    }

    #[test]
    fn test_node_failure_in_source_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("query aborted")]
        struct Aborted(#[source] io::Error);

        let err = Aborted(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        assert!(is_node_failure(&err));
    }
}
