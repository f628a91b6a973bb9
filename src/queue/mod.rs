//! Ordered Event Queues
//!
//! Every auxiliary store (and every remote connection) is fed through its own
//! [`CacheEventQueue`]. Producers enqueue without blocking; exactly one
//! consumer applies events to the target in enqueue order.
//!
//! # Modes
//!
//! - `single`: a dedicated Tokio task per queue
//! - `pooled`: drain jobs borrowed from a named worker pool, at most one per
//!   queue at a time

mod event_queue;

pub use event_queue::{CacheEventQueue, QueueStats};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::{AuxiliaryCache, CacheElement};
use crate::error::{Error, Result};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-assigned listener identity, used to drop self-originated echoes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

impl ListenerId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pending operation for one target
#[derive(Debug, Clone)]
pub enum CacheEvent {
    Put(CacheElement),
    Remove(String),
    RemoveAll,
    Dispose,
}

impl CacheEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CacheEvent::Put(_) => "put",
            CacheEvent::Remove(_) => "remove",
            CacheEvent::RemoveAll => "remove_all",
            CacheEvent::Dispose => "dispose",
        }
    }
}

/// Downstream target of an event queue
#[async_trait]
pub trait CacheListener: Send + Sync {
    fn listener_id(&self) -> ListenerId;

    async fn handle_put(&self, element: CacheElement) -> Result<()>;

    async fn handle_remove(&self, region: &str, key: &str) -> Result<()>;

    async fn handle_remove_all(&self, region: &str) -> Result<()>;

    async fn handle_dispose(&self, region: &str) -> Result<()>;
}

/// Applies queued events to an auxiliary store
pub struct AuxiliaryListener {
    id: ListenerId,
    store: Arc<dyn AuxiliaryCache>,
}

impl AuxiliaryListener {
    pub fn new(store: Arc<dyn AuxiliaryCache>) -> Self {
        Self {
            id: ListenerId::next(),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn AuxiliaryCache> {
        &self.store
    }
}

#[async_trait]
impl CacheListener for AuxiliaryListener {
    fn listener_id(&self) -> ListenerId {
        self.id
    }

    async fn handle_put(&self, element: CacheElement) -> Result<()> {
        self.store.update(element).await
    }

    async fn handle_remove(&self, _region: &str, key: &str) -> Result<()> {
        self.store.remove(key).await.map(|_| ())
    }

    async fn handle_remove_all(&self, _region: &str) -> Result<()> {
        self.store.remove_all().await
    }

    async fn handle_dispose(&self, _region: &str) -> Result<()> {
        self.store.dispose().await
    }
}

/// Consumer mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    #[default]
    Single,
    Pooled,
}

/// Event queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub mode: QueueMode,
    /// Worker pool used in pooled mode
    pub pool_name: String,
    /// Consecutive failures after which the queue stops working
    pub max_failure: u32,
    /// Pause before retrying a failed event
    pub wait_before_retry_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            mode: QueueMode::Single,
            pool_name: "cache_event_queue".to_string(),
            max_failure: 3,
            wait_before_retry_ms: 500,
        }
    }
}

impl QueueConfig {
    pub fn pooled(pool_name: impl Into<String>) -> Self {
        Self {
            mode: QueueMode::Pooled,
            pool_name: pool_name.into(),
            ..Self::default()
        }
    }

    pub fn wait_before_retry(&self) -> Duration {
        Duration::from_millis(self.wait_before_retry_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_failure == 0 {
            return Err(Error::Config("max_failure must be at least 1".into()));
        }
        if self.mode == QueueMode::Pooled && self.pool_name.is_empty() {
            return Err(Error::Config("pooled event queues need a pool_name".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryAuxiliary;

    #[test]
    fn test_listener_ids_are_unique() {
        let a = ListenerId::next();
        let b = ListenerId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_queue_config_from_yaml() {
        let config: QueueConfig = serde_yaml::from_str("mode: pooled\nmax_failure: 5\n").unwrap();
        assert_eq!(config.mode, QueueMode::Pooled);
        assert_eq!(config.max_failure, 5);
        assert_eq!(config.wait_before_retry(), Duration::from_millis(500));
        config.validate().unwrap();

        let mut bad = QueueConfig::default();
        bad.max_failure = 0;
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_auxiliary_listener_applies_events() {
        let store = Arc::new(InMemoryAuxiliary::disk("disk"));
        let listener = AuxiliaryListener::new(store.clone());

        listener
            .handle_put(CacheElement::new("r", "k", "v"))
            .await
            .unwrap();
        assert!(store.contains("k"));

        listener.handle_remove("r", "k").await.unwrap();
        assert!(!store.contains("k"));

        listener.handle_dispose("r").await.unwrap();
        assert!(!store.status().is_alive());
    }
}
