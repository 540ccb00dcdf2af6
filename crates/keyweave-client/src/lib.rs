//! # keyweave Client
//!
//! Typed asynchronous operations over Redis data structures.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        CacheClient                           │
//! │   hash() · list() · set() · sorted_set() · value() · locks   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Dispatcher                            │
//! │        typed decode · cursor scans · OperationObserver       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  CommandChannel (trait)                      │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                   │
//!                    ▼                   ▼
//! ┌─────────────────────────┐   ┌──────────────────────────────┐
//! │      RedisChannel       │   │        MemoryChannel         │
//! │  (connection manager)   │   │   (process-local keyspace)   │
//! └─────────────────────────┘   └──────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - `redis`: Redis-backed channel (default)
//! - `memory`: in-process channel for tests and development (default)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keyweave_client::{CacheClient, ClientConfig};
//! use keyweave_domain::{End, ScoreRange};
//! use futures::TryStreamExt;
//!
//! let client = CacheClient::connect(&ClientConfig::default()).await?;
//!
//! let board = client.sorted_set();
//! board.add("leaderboard", "alice", 10.0).await?;
//! let top: Vec<String> = board.reverse_range("leaderboard", 0, 9).try_collect().await?;
//!
//! client.list().push("jobs", End::Right, "render").await?;
//! let lock = client.lock("nightly-report");
//! lock.try_lock(|acquired| async move { Ok::<_, keyweave_domain::CacheError>(acquired) }).await?;
//! ```

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod client;
pub mod config;
pub mod cursor;
pub mod lock;
pub mod observer;
pub mod ops;

// Re-export commonly used types
pub use channel::{CommandChannel, SharedChannel};
#[cfg(feature = "memory")]
pub use channel::MemoryChannel;
#[cfg(feature = "redis")]
pub use channel::RedisChannel;
pub use client::{CacheClient, SharedCacheClient};
pub use config::{ClientConfig, LockConfig};
pub use cursor::{ScanRequest, ScanShape};
pub use lock::{DistributedLock, LockRegistry};
pub use observer::{NoopObserver, OperationEvent, OperationObserver, Outcome, TracingObserver};
pub use ops::{Dispatcher, HashOps, ListOps, SetOps, SortedSetOps, ValueOps};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
