//! Tiered Region Cache
//!
//! A region keeps a bounded in-process working set and overflows, replicates
//! and recovers data through zero or more auxiliary stores.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          Composite Cache                             │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Memory (LRU)          │ Disk               │ Remote / Lateral       │
//! │  ┌──────────────────┐  │ ┌──────────────┐   │ ┌──────────────────┐   │
//! │  │ LruMemoryCache   │  │ │ Event Queue  │   │ │ Failover + Queue │   │
//! │  │ max_objects      │  │ │ → store      │   │ │ → server[i]      │   │
//! │  └──────────────────┘  │ └──────────────┘   │ └──────────────────┘   │
//! │           │            │        ▲           │          ▲             │
//! │           └── evict ───┴─ spool ┘           │          │             │
//! │                                              update / remove         │
//! │                     Shrinker (expire + idle spool)                   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - Memory writes and evictions are synchronous with the caller
//! - Every auxiliary write goes through that store's ordered event queue
//! - Store failures degrade a tier, never the region

mod attributes;
mod composite;
mod element;
mod event;
mod memory;
mod metrics;
mod shrinker;
pub mod auxiliary;
pub mod matcher;

pub use attributes::{DiskUsagePattern, RegionAttributes};
pub use auxiliary::{AuxiliaryCache, AuxiliaryKind, AuxiliaryStats, CacheStatus, InMemoryAuxiliary};
pub use composite::{CompositeCache, RegionBuilder, DEFAULT_DISPOSE_WAIT};
pub use element::{now_millis, CacheElement, ElementAttributes, Expiry};
pub use event::{
    ElementEvent, ElementEventCollector, ElementEventHandler, ElementEventKind,
    LoggingEventHandler,
};
pub use matcher::{KeyMatcher, RegexKeyMatcher};
pub use memory::{LruMemoryCache, MemoryConfig};
pub use metrics::{RegionStats, RegionStatsSnapshot};
pub use shrinker::{ShrinkReport, Shrinker, ShrinkerState};

/// Trailing delimiter that turns `remove` into a prefix removal
pub const KEY_DELIMITER: &str = ":";

/// Default memory capacity per region
pub const DEFAULT_MAX_OBJECTS: usize = 100;

/// Default number of elements evicted at once
pub const DEFAULT_SPOOL_CHUNK_SIZE: usize = 2;

/// Default shrinker interval in seconds
pub const DEFAULT_SHRINKER_INTERVAL_SECS: u64 = 30;
