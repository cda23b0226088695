// src/lib.rs

//! Resilience layer for pooled relational database access.
//!
//! - [`classify`] maps driver and store errors onto a fixed set of
//!   [`ErrorKind`]s and decides which of them are worth retrying.
//! - [`retry`] runs operations with bounded exponential backoff.
//! - [`failover`] routes operations across an ordered list of nodes and
//!   keeps track of which ones are healthy.
//! - [`ResilientExecutor`] stacks retry on top of failover.

pub mod classify;
pub mod client;
pub mod common;
pub mod executor;
pub mod failover;
pub mod retry;

pub use classify::{DatabaseError, ErrorKind, classify, is_retryable};
pub use common::config::ResilienceConfig;
pub use common::error::{BoxError, ResilienceError, Result};
pub use executor::ResilientExecutor;
pub use failover::{FailoverConfig, FailoverManager, FailoverStats};
pub use retry::{RetryConfig, RetryManager, RetryStats};
