// src/client/connection.rs

//! Collaborator interfaces through which the resilience layer obtains
//! connections. Implementations live with the actual driver.

use crate::common::error::BoxError;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Identifier of one addressable store instance.
pub type NodeId = String;

/// Future returned by operations that borrow a connection.
///
/// Connection-consuming operations are written as
/// `|conn| Box::pin(async move { ... })` so the future may hold the `&mut`
/// borrow for its whole lifetime.
pub type OpFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send + 'a>>;

/// Hands out connections from a single logical pool.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    type Connection: Send;

    /// Check a connection out of the pool.
    async fn acquire(&self, cancel: &CancellationToken) -> Result<Self::Connection, BoxError>;

    /// Return a connection to the pool.
    async fn release(&self, connection: Self::Connection);
}

/// Opens connections to a specific node of a replicated store.
#[async_trait]
pub trait NodeConnector: Send + Sync + 'static {
    type Connection: Send;

    /// Obtain a connection to `node`.
    async fn connect(&self, cancel: &CancellationToken, node: &str) -> Result<Self::Connection, BoxError>;

    /// Give back a connection previously obtained from `node`.
    async fn release(&self, node: &str, connection: Self::Connection);
}
