// src/client/mod.rs

//! Connection-side collaborators.
//!
//! The resilience layer never talks to a database directly. It goes through
//! the [`ConnectionProvider`] and [`NodeConnector`] traits, and it inspects
//! the driver errors defined in [`error`]. [`MemoryPool`] is an in-process
//! implementation of both traits.

pub mod connection;
pub mod error;
pub mod pool;

pub use connection::{ConnectionProvider, NodeConnector, NodeId, OpFuture};
pub use error::{DriverError, NetworkError, StoreError};
pub use pool::{Fault, MemoryConnection, MemoryPool, PoolOptions};
