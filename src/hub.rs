//! Cache Hub
//!
//! Composition root for an embedding process. Owns the configuration, the
//! worker pool registry shared by every region, and the named regions.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::cache::{CompositeCache, RegionBuilder, RegionStatsSnapshot};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::pool::WorkerPoolManager;

/// Registry of regions sharing one set of worker pools
pub struct CacheHub {
    config: CacheConfig,
    pools: Arc<WorkerPoolManager>,
    regions: DashMap<String, Arc<CompositeCache>>,
}

impl CacheHub {
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let pools = WorkerPoolManager::with_configs(config.default_pool.clone(), config.pools.clone());
        Ok(Self {
            config,
            pools: Arc::new(pools),
            regions: DashMap::new(),
        })
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::new(CacheConfig::from_file(path)?)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn pools(&self) -> &Arc<WorkerPoolManager> {
        &self.pools
    }

    /// A builder preset with the configured attributes, queue settings and
    /// this hub's pools
    pub fn builder(&self, name: impl Into<String>) -> RegionBuilder {
        let name = name.into();
        RegionBuilder::new(name.clone())
            .attributes(self.config.region_attributes(&name))
            .queue_config(self.config.event_queue.clone())
            .pools(Arc::clone(&self.pools))
    }

    /// Build and register a region
    pub async fn create_region(&self, builder: RegionBuilder) -> Result<Arc<CompositeCache>> {
        let name = builder.name().to_string();
        if self.regions.contains_key(&name) {
            return Err(Error::RegionExists(name));
        }

        let cache = builder.build().await?;
        let registered = match self.regions.entry(name.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&cache));
                Some(cache.clone())
            }
        };
        match registered {
            Some(cache) => Ok(cache),
            None => {
                // lost a race with another create
                cache.dispose().await;
                Err(Error::RegionExists(name))
            }
        }
    }

    pub fn region(&self, name: &str) -> Option<Arc<CompositeCache>> {
        self.regions.get(name).map(|r| Arc::clone(r.value()))
    }

    /// Existing region, or a new memory-and-configured-attributes region
    pub async fn get_or_create(&self, name: &str) -> Result<Arc<CompositeCache>> {
        if let Some(region) = self.region(name) {
            return Ok(region);
        }
        match self.create_region(self.builder(name)).await {
            Err(Error::RegionExists(_)) => self
                .region(name)
                .ok_or_else(|| Error::Internal(format!("region '{}' vanished", name))),
            other => other,
        }
    }

    pub fn region_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.regions.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Dispose and forget a region; false if it was not registered
    pub async fn dispose_region(&self, name: &str) -> bool {
        match self.regions.remove(name) {
            Some((_, cache)) => {
                cache.dispose().await;
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> Vec<(String, RegionStatsSnapshot)> {
        let mut stats: Vec<_> = self
            .regions
            .iter()
            .map(|r| (r.key().clone(), r.value().stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    /// Dispose every region, then shut the pools down
    pub async fn shutdown(&self) {
        let names = self.region_names();
        for name in &names {
            if !self.dispose_region(name).await {
                warn!(region = %name, "Region disappeared during shutdown");
            }
        }
        self.pools.shutdown();
        info!(regions = names.len(), "Cache hub shut down");
    }
}
