//! Inbound half of remote replication

use std::sync::{Arc, Weak};

use tracing::debug;

use crate::cache::{CacheElement, CompositeCache};
use crate::error::{Error, Result};
use crate::queue::ListenerId;

/// Applies operations pushed by remote peers to the local region.
///
/// Updates go through the region's local-only paths so they are never sent
/// back out. Operations whose requester is this listener are echoes of our own
/// writes and are dropped.
pub struct RemoteCacheListener {
    id: ListenerId,
    region: String,
    cache: Weak<CompositeCache>,
}

impl RemoteCacheListener {
    pub fn new(cache: &Arc<CompositeCache>) -> Self {
        Self {
            id: ListenerId::next(),
            region: cache.name().to_string(),
            cache: Arc::downgrade(cache),
        }
    }

    /// A listener not bound to any region; every operation fails
    pub fn detached(region: impl Into<String>) -> Self {
        Self {
            id: ListenerId::next(),
            region: region.into(),
            cache: Weak::new(),
        }
    }

    pub fn listener_id(&self) -> ListenerId {
        self.id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn cache(&self) -> Result<Arc<CompositeCache>> {
        self.cache
            .upgrade()
            .ok_or_else(|| Error::RegionDisposed(self.region.clone()))
    }

    fn is_echo(&self, requester: ListenerId, op: &str) -> bool {
        if requester == self.id {
            debug!(region = %self.region, listener = %self.id, op, "Ignoring echo");
            true
        } else {
            false
        }
    }

    pub fn handle_put(&self, element: CacheElement, requester: ListenerId) -> Result<()> {
        if self.is_echo(requester, "put") {
            return Ok(());
        }
        self.cache()?.update_local(element)
    }

    pub fn handle_remove(&self, key: &str, requester: ListenerId) -> Result<bool> {
        if self.is_echo(requester, "remove") {
            return Ok(false);
        }
        self.cache()?.remove_local(key)
    }

    pub fn handle_remove_all(&self, requester: ListenerId) -> Result<()> {
        if self.is_echo(requester, "remove_all") {
            return Ok(());
        }
        let cache = self.cache()?;
        if !cache.attributes().allow_remote_remove_all {
            debug!(region = %self.region, "Remote remove-all not allowed, ignoring");
            return Ok(());
        }
        cache.remove_all_local()
    }

    /// The remote side is going away; drop the local region
    pub async fn handle_dispose(&self, requester: ListenerId) -> Result<()> {
        if self.is_echo(requester, "dispose") {
            return Ok(());
        }
        self.cache()?.dispose().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryAuxiliary, RegionAttributes, RegionBuilder};
    use assert_matches::assert_matches;
    use std::time::Duration;

    #[tokio::test]
    async fn test_echo_is_ignored() {
        let cache = RegionBuilder::new("users").build().await.unwrap();
        let listener = RemoteCacheListener::new(&cache);

        listener
            .handle_put(CacheElement::new("users", "a", "1"), listener.listener_id())
            .unwrap();
        assert!(cache.get("a").await.unwrap().is_none());

        listener
            .handle_put(CacheElement::new("users", "a", "1"), ListenerId::next())
            .unwrap();
        assert!(cache.get("a").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_remote_put_is_not_forwarded_to_lateral() {
        let lateral = Arc::new(InMemoryAuxiliary::lateral("peer"));
        let cache = RegionBuilder::new("users")
            .auxiliary(lateral.clone())
            .build()
            .await
            .unwrap();
        let listener = RemoteCacheListener::new(&cache);

        listener
            .handle_put(CacheElement::new("users", "a", "1"), ListenerId::next())
            .unwrap();
        cache.flush(Duration::from_secs(2)).await;

        assert!(cache.memory().contains("a"));
        assert!(!lateral.contains("a"));
    }

    #[tokio::test]
    async fn test_remove_all_respects_region_setting() {
        let attrs = RegionAttributes::default().with_allow_remote_remove_all(false);
        let cache = RegionBuilder::new("users")
            .attributes(attrs)
            .build()
            .await
            .unwrap();
        cache.put("a", "1").unwrap();
        let listener = RemoteCacheListener::new(&cache);

        listener.handle_remove_all(ListenerId::next()).unwrap();
        assert_eq!(cache.size(), 1);

        assert!(listener.handle_remove("a", ListenerId::next()).unwrap());
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test]
    async fn test_detached_listener_reports_disposed_region() {
        let listener = RemoteCacheListener::detached("gone");
        assert_matches!(
            listener.handle_put(CacheElement::new("gone", "a", "1"), ListenerId::next()),
            Err(Error::RegionDisposed(_))
        );
    }
}
