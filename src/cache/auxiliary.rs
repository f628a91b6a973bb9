//! Auxiliary Stores
//!
//! The contract every tier beyond memory satisfies (disk, remote, lateral),
//! plus an in-memory implementation that stands in for a disk or lateral tier.
//!
//! # Design
//!
//! - Async I/O so a slow backend only ever blocks its own event queue
//! - Any error is treated by the region as "tier temporarily unavailable"
//! - Backends own their wire format and persistence; the engine never sees it

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::element::CacheElement;
use super::matcher::{KeyMatcher, RegexKeyMatcher};
use super::KEY_DELIMITER;
use crate::error::{Error, Result};

/// Class of auxiliary store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuxiliaryKind {
    /// Local persistent overflow
    Disk,
    /// Client of a remote cache server
    Remote,
    /// Peer-to-peer replication
    Lateral,
}

impl std::fmt::Display for AuxiliaryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuxiliaryKind::Disk => write!(f, "disk"),
            AuxiliaryKind::Remote => write!(f, "remote"),
            AuxiliaryKind::Lateral => write!(f, "lateral"),
        }
    }
}

/// Liveness of a cache or store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Alive,
    Error,
    Disposed,
}

impl CacheStatus {
    pub fn is_alive(&self) -> bool {
        *self == CacheStatus::Alive
    }
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStatus::Alive => write!(f, "ALIVE"),
            CacheStatus::Error => write!(f, "ERROR"),
            CacheStatus::Disposed => write!(f, "DISPOSED"),
        }
    }
}

/// Auxiliary store contract
#[async_trait]
pub trait AuxiliaryCache: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Store class
    fn kind(&self) -> AuxiliaryKind;

    /// Get an element
    async fn get(&self, key: &str) -> Result<Option<CacheElement>>;

    /// Get several elements; absent keys are left out of the map
    async fn get_multiple(&self, keys: &[String]) -> Result<HashMap<String, CacheElement>> {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(element) = self.get(key).await? {
                found.insert(key.clone(), element);
            }
        }
        Ok(found)
    }

    /// Get every element whose key matches `pattern`. Stores that cannot
    /// answer pattern queries return an empty map.
    async fn get_matching(&self, _pattern: &str) -> Result<HashMap<String, CacheElement>> {
        Ok(HashMap::new())
    }

    /// Store an element
    async fn update(&self, element: CacheElement) -> Result<()>;

    /// Remove a key (hierarchically when it ends in the delimiter)
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Remove everything held for the region
    async fn remove_all(&self) -> Result<()>;

    /// Release resources; the store is unusable afterwards
    async fn dispose(&self) -> Result<()>;

    /// Snapshot of held keys
    async fn key_set(&self) -> Result<HashSet<String>>;

    /// Number of held elements
    fn size(&self) -> usize;

    /// Liveness
    fn status(&self) -> CacheStatus;
}

/// In-memory store statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuxiliaryStats {
    pub element_count: u64,
    pub reads: u64,
    pub writes: u64,
    pub removes: u64,
}

/// In-memory auxiliary store.
///
/// Uses DashMap for concurrent access. A failure switch turns every call
/// into a store error, which is how tests and soak runs simulate an outage.
pub struct InMemoryAuxiliary {
    name: String,
    kind: AuxiliaryKind,
    storage: DashMap<String, CacheElement>,
    matcher: RegexKeyMatcher,
    failing: AtomicBool,
    disposed: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    removes: AtomicU64,
}

impl InMemoryAuxiliary {
    /// Create a store of the given kind
    pub fn new(name: impl Into<String>, kind: AuxiliaryKind) -> Self {
        Self {
            name: name.into(),
            kind,
            storage: DashMap::new(),
            matcher: RegexKeyMatcher::new(),
            failing: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            removes: AtomicU64::new(0),
        }
    }

    /// Create a store that acts as the disk tier
    pub fn disk(name: impl Into<String>) -> Self {
        Self::new(name, AuxiliaryKind::Disk)
    }

    /// Create a store that acts as a lateral peer
    pub fn lateral(name: impl Into<String>) -> Self {
        Self::new(name, AuxiliaryKind::Lateral)
    }

    /// Make every subsequent call fail (or stop failing)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Direct, synchronous peek for assertions
    pub fn peek(&self, key: &str) -> Option<CacheElement> {
        self.storage.get(key).map(|e| e.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.storage.contains_key(key)
    }

    pub fn stats(&self) -> AuxiliaryStats {
        AuxiliaryStats {
            element_count: self.storage.len() as u64,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
        }
    }

    fn check(&self) -> Result<()> {
        if self.disposed.load(Ordering::Relaxed) {
            return Err(Error::store(&self.name, "store disposed"));
        }
        if self.failing.load(Ordering::Relaxed) {
            return Err(Error::store(&self.name, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl AuxiliaryCache for InMemoryAuxiliary {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AuxiliaryKind {
        self.kind
    }

    async fn get(&self, key: &str) -> Result<Option<CacheElement>> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.storage.get(key).map(|e| e.value().clone()))
    }

    async fn get_matching(&self, pattern: &str) -> Result<HashMap<String, CacheElement>> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        let keys: HashSet<String> = self.storage.iter().map(|e| e.key().clone()).collect();
        let matched = self.matcher.matching_keys(pattern, &keys)?;
        Ok(matched
            .into_iter()
            .filter_map(|k| self.storage.get(&k).map(|e| (k, e.value().clone())))
            .collect())
    }

    async fn update(&self, element: CacheElement) -> Result<()> {
        self.check()?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.storage.insert(element.key().to_string(), element);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        self.check()?;
        self.removes.fetch_add(1, Ordering::Relaxed);
        if key.ends_with(KEY_DELIMITER) {
            let before = self.storage.len();
            self.storage.retain(|k, _| !k.starts_with(key));
            Ok(self.storage.len() < before)
        } else {
            Ok(self.storage.remove(key).is_some())
        }
    }

    async fn remove_all(&self) -> Result<()> {
        self.check()?;
        self.removes.fetch_add(1, Ordering::Relaxed);
        self.storage.clear();
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        self.disposed.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn key_set(&self) -> Result<HashSet<String>> {
        self.check()?;
        Ok(self.storage.iter().map(|e| e.key().clone()).collect())
    }

    fn size(&self) -> usize {
        self.storage.len()
    }

    fn status(&self) -> CacheStatus {
        if self.disposed.load(Ordering::Relaxed) {
            CacheStatus::Disposed
        } else if self.failing.load(Ordering::Relaxed) {
            CacheStatus::Error
        } else {
            CacheStatus::Alive
        }
    }
}

// =============================================================================
// Tests
// =============================================================================


impl std::fmt::Debug for dyn AuxiliaryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuxiliaryCache")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}
