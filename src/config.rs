//! Cache configuration
//!
//! Plain structured input, loaded from YAML:
//!
//! ```yaml
//! default_region:
//!   max_objects: 1000
//! regions:
//!   sessions:
//!     max_objects: 5000
//!     use_memory_shrinker: true
//!     shrinker_interval_seconds: 10
//!     element:
//!       max_idle_seconds: 1800
//!       eternal: false
//! default_pool:
//!   max_pool_size: 32
//! pools:
//!   cache_event_queue:
//!     boundary_size: 10000
//!     when_blocked_policy: discard_oldest
//! event_queue:
//!   mode: pooled
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::RegionAttributes;
use crate::error::{Error, Result};
use crate::pool::PoolConfig;
use crate::queue::{QueueConfig, QueueMode};

/// Top-level cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Attributes for regions without their own entry
    pub default_region: RegionAttributes,
    /// Per-region attributes
    pub regions: HashMap<String, RegionAttributes>,
    /// Configuration for pools without their own entry
    pub default_pool: PoolConfig,
    /// Per-pool configuration
    pub pools: HashMap<String, PoolConfig>,
    /// Event queue settings shared by every region
    pub event_queue: QueueConfig,
}

impl CacheConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Check every section
    pub fn validate(&self) -> Result<()> {
        self.default_region.validate()?;
        for (name, attributes) in &self.regions {
            if name.is_empty() {
                return Err(Error::Config("region name must not be empty".into()));
            }
            attributes
                .validate()
                .map_err(|e| Error::Config(format!("region '{}': {}", name, e)))?;
        }

        self.default_pool.validate()?;
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| Error::Config(format!("pool '{}': {}", name, e)))?;
        }

        self.event_queue.validate()?;
        if self.event_queue.mode == QueueMode::Pooled
            && !self.pools.contains_key(&self.event_queue.pool_name)
        {
            tracing::debug!(
                pool = %self.event_queue.pool_name,
                "Event queue pool not configured, default pool settings apply"
            );
        }
        Ok(())
    }

    /// Attributes for `region`, falling back to the default region
    pub fn region_attributes(&self, region: &str) -> RegionAttributes {
        self.regions
            .get(region)
            .unwrap_or(&self.default_region)
            .clone()
    }
}
