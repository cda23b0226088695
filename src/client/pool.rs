// src/client/pool.rs

//! In-memory connection pool.
//!
//! `MemoryPool` behaves like a small cluster of database nodes: each node has a
//! bounded set of connection slots, can be taken offline, and can be told to
//! fail upcoming statements with a chosen error. It implements both
//! [`ConnectionProvider`] and [`NodeConnector`], which makes it the backing
//! store for the drill binary and for the crate's tests.

use crate::client::connection::{ConnectionProvider, NodeConnector, NodeId};
use crate::client::error::{DriverError, NetworkError, StoreError};
use crate::common::error::BoxError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Options for configuring a memory pool.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Maximum number of connections checked out per node.
    pub max_connections: usize,
    /// Maximum time to wait for a free connection slot.
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// A failure queued against a node.
#[derive(Debug, Clone)]
pub enum Fault {
    Store(StoreError),
    Network(NetworkError),
    Io(io::ErrorKind, String),
    Driver(DriverError),
}

impl Fault {
    fn into_error(self) -> BoxError {
        match self {
            Fault::Store(err) => Box::new(err),
            Fault::Network(err) => Box::new(err),
            Fault::Io(kind, message) => Box::new(io::Error::new(kind, message)),
            Fault::Driver(err) => Box::new(err),
        }
    }
}

struct NodeSlot {
    semaphore: Arc<Semaphore>,
    online: bool,
    faults: VecDeque<Fault>,
    executed: u64,
}

type NodeMap = Arc<Mutex<HashMap<NodeId, NodeSlot>>>;

fn lock(nodes: &NodeMap) -> MutexGuard<'_, HashMap<NodeId, NodeSlot>> {
    nodes.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A connection checked out of a [`MemoryPool`].
pub struct MemoryConnection {
    id: Uuid,
    node: NodeId,
    nodes: NodeMap,
    _permit: OwnedSemaphorePermit,
}

impl MemoryConnection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Run a statement on the node this connection belongs to.
    ///
    /// Fails with a connection reset if the node went offline after the
    /// connection was opened, or with the next queued fault for the node.
    pub async fn execute(&mut self, statement: &str) -> Result<u64, BoxError> {
        let mut nodes = lock(&self.nodes);
        let slot = nodes
            .get_mut(&self.node)
            .ok_or_else(|| NetworkError::new(format!("node '{}' no longer exists", self.node)))?;

        if !slot.online {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        if let Some(fault) = slot.faults.pop_front() {
            return Err(fault.into_error());
        }

        slot.executed += 1;
        debug!("Executed on {} via connection {}: {}", self.node, self.id, statement);
        Ok(1)
    }
}

/// A pool of in-memory connections spread over a set of named nodes.
#[derive(Clone)]
pub struct MemoryPool {
    options: PoolOptions,
    nodes: NodeMap,
    default_node: NodeId,
    released: Arc<AtomicU64>,
}

impl MemoryPool {
    /// Create a pool over `nodes`; the first node is the one
    /// [`ConnectionProvider::acquire`] hands out.
    pub fn new<I, S>(nodes: I, options: PoolOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let mut map = HashMap::new();
        let mut default_node = None;
        for node in nodes {
            let node = node.into();
            default_node.get_or_insert_with(|| node.clone());
            map.insert(
                node,
                NodeSlot {
                    semaphore: Arc::new(Semaphore::new(options.max_connections)),
                    online: true,
                    faults: VecDeque::new(),
                    executed: 0,
                },
            );
        }

        Self {
            options,
            nodes: Arc::new(Mutex::new(map)),
            default_node: default_node.unwrap_or_default(),
            released: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Take a node offline (or bring it back). Offline nodes refuse new
    /// connections and reset existing ones on their next statement.
    pub fn set_online(&self, node: &str, online: bool) {
        if let Some(slot) = lock(&self.nodes).get_mut(node) {
            slot.online = online;
        }
    }

    /// Queue a fault to be returned by the next statement run on `node`.
    pub fn inject(&self, node: &str, fault: Fault) {
        if let Some(slot) = lock(&self.nodes).get_mut(node) {
            slot.faults.push_back(fault);
        }
    }

    /// Number of statements that completed successfully on `node`.
    pub fn executed(&self, node: &str) -> u64 {
        lock(&self.nodes).get(node).map(|slot| slot.executed).unwrap_or(0)
    }

    /// Number of connections currently checked out of `node`.
    pub fn in_use(&self, node: &str) -> usize {
        lock(&self.nodes)
            .get(node)
            .map(|slot| self.options.max_connections - slot.semaphore.available_permits())
            .unwrap_or(0)
    }

    /// Total number of connections handed back to the pool.
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    async fn open(&self, cancel: &CancellationToken, node: &str) -> Result<MemoryConnection, BoxError> {
        let semaphore = {
            let nodes = lock(&self.nodes);
            let slot = nodes
                .get(node)
                .ok_or_else(|| NetworkError::new(format!("no route to host '{}'", node)))?;
            if !slot.online {
                return Err(Box::new(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("connection refused by {}", node),
                )));
            }
            Arc::clone(&slot.semaphore)
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(Box::new(DriverError::AcquireCancelled)),
            acquired = timeout(self.options.acquire_timeout, semaphore.acquire_owned()) => match acquired {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(Box::new(DriverError::PoolClosed)),
                Err(_) => return Err(Box::new(DriverError::PoolExhausted)),
            },
        };

        Ok(MemoryConnection {
            id: Uuid::new_v4(),
            node: node.to_string(),
            nodes: Arc::clone(&self.nodes),
            _permit: permit,
        })
    }

    fn give_back(&self, connection: MemoryConnection) {
        debug!("Connection {} returned to {}", connection.id, connection.node);
        self.released.fetch_add(1, Ordering::SeqCst);
        drop(connection);
    }
}

#[async_trait]
impl ConnectionProvider for MemoryPool {
    type Connection = MemoryConnection;

    async fn acquire(&self, cancel: &CancellationToken) -> Result<MemoryConnection, BoxError> {
        self.open(cancel, &self.default_node).await
    }

    async fn release(&self, connection: MemoryConnection) {
        self.give_back(connection);
    }
}

#[async_trait]
impl NodeConnector for MemoryPool {
    type Connection = MemoryConnection;

    async fn connect(&self, cancel: &CancellationToken, node: &str) -> Result<MemoryConnection, BoxError> {
        self.open(cancel, node).await
    }

    async fn release(&self, _node: &str, connection: MemoryConnection) {
        self.give_back(connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> MemoryPool {
        MemoryPool::new(["primary", "replica"], PoolOptions {
            max_connections: 1,
            acquire_timeout: Duration::from_millis(20),
        })
    }

    #[tokio::test]
    async fn test_acquire_execute_release() {
        let pool = pool();
        let cancel = CancellationToken::new();

        let mut conn = ConnectionProvider::acquire(&pool, &cancel).await.unwrap();
        assert_eq!(conn.node(), "primary");
        assert_eq!(pool.in_use("primary"), 1);
        conn.execute("SELECT 1").await.unwrap();

        ConnectionProvider::release(&pool, conn).await;
        assert_eq!(pool.in_use("primary"), 0);
        assert_eq!(pool.executed("primary"), 1);
        assert_eq!(pool.released(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_pool_reports_sentinel() {
        let pool = pool();
        let cancel = CancellationToken::new();

        let _held = pool.connect(&cancel, "replica").await.unwrap();
        let err = pool.connect(&cancel, "replica").await.err().unwrap();
        assert_eq!(err.downcast_ref::<DriverError>(), Some(&DriverError::PoolExhausted));
    }

    #[tokio::test]
    async fn test_offline_node_refuses_and_resets() {
        let pool = pool();
        let cancel = CancellationToken::new();

        let mut conn = pool.connect(&cancel, "primary").await.unwrap();
        pool.set_online("primary", false);

        let err = conn.execute("SELECT 1").await.unwrap_err();
        let io_err = err.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_err.kind(), io::ErrorKind::ConnectionReset);
        NodeConnector::release(&pool, "primary", conn).await;

        let err = pool.connect(&cancel, "primary").await.err().unwrap();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_injected_fault_is_returned_once() {
        let pool = pool();
        let cancel = CancellationToken::new();
        pool.inject("primary", Fault::Store(StoreError::new("40001", "could not serialize access")));

        let mut conn = pool.connect(&cancel, "primary").await.unwrap();
        let err = conn.execute("UPDATE t SET x = 1").await.unwrap_err();
        assert_eq!(err.downcast_ref::<StoreError>().map(|e| e.code.as_str()), Some("40001"));
        assert!(conn.execute("UPDATE t SET x = 1").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_acquire_reports_sentinel() {
        let pool = MemoryPool::new(["primary"], PoolOptions {
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
        });
        let _held = pool.connect(&CancellationToken::new(), "primary").await.unwrap();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let err = pool.connect(&cancel, "primary").await.err().unwrap();
        assert_eq!(err.downcast_ref::<DriverError>(), Some(&DriverError::AcquireCancelled));
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let pool = pool();
        let err = pool.connect(&CancellationToken::new(), "nowhere").await.err().unwrap();
        assert!(err.to_string().contains("no route to host"));
    }
}
