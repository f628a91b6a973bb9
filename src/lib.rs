//! Tiercache - Embeddable Multi-Tier Cache
//!
//! Named cache regions keep a bounded LRU working set in memory and overflow,
//! replicate and recover entries through pluggable auxiliary stores (disk,
//! remote, lateral). Auxiliary writes are delivered asynchronously through
//! per-store ordered event queues; remote stores sit behind a failover
//! controller that buffers events while disconnected.
//!
//! # Architecture
//!
//! ```text
//! CacheHub ──▶ CompositeCache (region) ──▶ LruMemoryCache
//!                    │                 └─▶ Shrinker
//!                    ├─▶ CacheEventQueue ──▶ AuxiliaryCache (disk, lateral)
//!                    └─▶ FailoverController ──▶ CacheEventQueue ──▶ remote[i]
//!                                     ▲
//!                     WorkerPoolManager (pooled queues)
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Regions, elements, memory tier, shrinker and the store contract
//! - [`config`] - YAML configuration
//! - [`error`] - Error types
//! - [`hub`] - Region registry and shutdown
//! - [`pool`] - Named worker pools
//! - [`queue`] - Ordered event delivery to listeners
//! - [`remote`] - Remote failover, zombie buffering and inbound listener

pub mod cache;
pub mod config;
pub mod error;
pub mod hub;
pub mod pool;
pub mod queue;
pub mod remote;

// Re-export commonly used types
pub use cache::{
    AuxiliaryCache, AuxiliaryKind, CacheElement, CacheStatus, CompositeCache, DiskUsagePattern,
    ElementAttributes, ElementEvent, ElementEventHandler, ElementEventKind, InMemoryAuxiliary,
    RegionAttributes, RegionBuilder,
};
pub use config::CacheConfig;
pub use error::{Error, Result};
pub use hub::CacheHub;
pub use pool::{PoolConfig, WhenBlockedPolicy, WorkerPool, WorkerPoolManager};
pub use queue::{CacheEvent, CacheEventQueue, CacheListener, ListenerId, QueueConfig, QueueMode};
pub use remote::{
    FailoverConfig, FailoverController, FailoverStatus, InMemoryConnector, RemoteCacheListener,
    RemoteConnector, RemoteLocation,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
