//! Region (composite cache) attributes

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::element::ElementAttributes;
use super::memory::MemoryConfig;
use crate::error::{Error, Result};

/// How a region uses its disk tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskUsagePattern {
    /// Disk only receives elements evicted from memory
    #[default]
    Swap,
    /// Every update is also written through to disk
    Update,
}

/// Per-region configuration, fixed for the lifetime of the region
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionAttributes {
    /// Memory capacity in elements
    pub max_objects: usize,
    /// Disk usage pattern
    pub disk_usage_pattern: DiskUsagePattern,
    /// Run the background shrinker
    pub use_memory_shrinker: bool,
    /// Seconds between shrinker passes
    pub shrinker_interval_seconds: u64,
    /// Memory idle time after which the shrinker spools an element out
    pub max_memory_idle_seconds: Option<u64>,
    /// Cap on idle spools per shrinker pass
    pub max_spools_per_run: Option<usize>,
    /// Elements evicted at once when memory is over capacity
    pub spool_chunk_size: usize,
    pub use_disk: bool,
    pub use_remote: bool,
    pub use_lateral: bool,
    /// Accept remove-all requests arriving from remote peers
    pub allow_remote_remove_all: bool,
    /// Defaults for puts that do not carry their own attributes
    pub element: ElementAttributes,
}

impl Default for RegionAttributes {
    fn default() -> Self {
        Self {
            max_objects: super::DEFAULT_MAX_OBJECTS,
            disk_usage_pattern: DiskUsagePattern::Swap,
            use_memory_shrinker: false,
            shrinker_interval_seconds: super::DEFAULT_SHRINKER_INTERVAL_SECS,
            max_memory_idle_seconds: None,
            max_spools_per_run: None,
            spool_chunk_size: super::DEFAULT_SPOOL_CHUNK_SIZE,
            use_disk: true,
            use_remote: true,
            use_lateral: true,
            allow_remote_remove_all: true,
            element: ElementAttributes::default(),
        }
    }
}

impl RegionAttributes {
    pub fn with_max_objects(mut self, max_objects: usize) -> Self {
        self.max_objects = max_objects;
        self
    }

    pub fn with_disk_usage_pattern(mut self, pattern: DiskUsagePattern) -> Self {
        self.disk_usage_pattern = pattern;
        self
    }

    /// Enable the shrinker with the given interval
    pub fn with_shrinker(mut self, interval: Duration) -> Self {
        self.use_memory_shrinker = true;
        self.shrinker_interval_seconds = interval.as_secs().max(1);
        self
    }

    /// Idle limit in whole seconds. A non-zero limit below one second rounds
    /// up to one rather than down to "spool on every pass".
    pub fn with_max_memory_idle(mut self, idle: Duration) -> Self {
        let secs = idle.as_secs() + u64::from(idle.subsec_nanos() > 0);
        self.max_memory_idle_seconds = Some(secs);
        self
    }

    pub fn with_max_spools_per_run(mut self, budget: usize) -> Self {
        self.max_spools_per_run = Some(budget);
        self
    }

    pub fn with_spool_chunk_size(mut self, chunk: usize) -> Self {
        self.spool_chunk_size = chunk;
        self
    }

    pub fn with_allow_remote_remove_all(mut self, allow: bool) -> Self {
        self.allow_remote_remove_all = allow;
        self
    }

    pub fn with_element_attributes(mut self, element: ElementAttributes) -> Self {
        self.element = element;
        self
    }

    /// Shrinker interval
    pub fn shrinker_interval(&self) -> Duration {
        Duration::from_secs(self.shrinker_interval_seconds)
    }

    /// Memory idle threshold for the shrinker's spool step
    pub fn max_memory_idle(&self) -> Option<Duration> {
        self.max_memory_idle_seconds.map(Duration::from_secs)
    }

    /// Memory cache settings derived from these attributes
    pub fn memory_config(&self) -> MemoryConfig {
        MemoryConfig {
            max_objects: self.max_objects,
            spool_chunk_size: self.spool_chunk_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.spool_chunk_size == 0 {
            return Err(Error::Config("spool_chunk_size must be at least 1".into()));
        }
        if self.use_memory_shrinker && self.shrinker_interval_seconds == 0 {
            return Err(Error::Config(
                "shrinker_interval_seconds must be positive when the shrinker is enabled".into(),
            ));
        }
        if self.max_spools_per_run == Some(0) {
            return Err(Error::Config("max_spools_per_run must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let attrs = RegionAttributes::default();
        assert_eq!(attrs.max_objects, 100);
        assert_eq!(attrs.disk_usage_pattern, DiskUsagePattern::Swap);
        assert!(!attrs.use_memory_shrinker);
        assert_eq!(attrs.shrinker_interval(), Duration::from_secs(30));
        assert_eq!(attrs.spool_chunk_size, 2);
        assert!(attrs.allow_remote_remove_all);
        attrs.validate().unwrap();
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
max_objects: 500
disk_usage_pattern: update
use_memory_shrinker: true
shrinker_interval_seconds: 5
max_memory_idle_seconds: 60
max_spools_per_run: 10
element:
  max_life_seconds: 120
  eternal: false
"#;
        let attrs: RegionAttributes = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(attrs.max_objects, 500);
        assert_eq!(attrs.disk_usage_pattern, DiskUsagePattern::Update);
        assert_eq!(attrs.max_memory_idle(), Some(Duration::from_secs(60)));
        assert_eq!(attrs.max_spools_per_run, Some(10));
        assert_eq!(attrs.element.max_life, Some(Duration::from_secs(120)));
        assert!(attrs.use_disk);
        attrs.validate().unwrap();
    }

    #[test]
    fn test_max_memory_idle_rounds_up() {
        let idle = |d| RegionAttributes::default().with_max_memory_idle(d).max_memory_idle();
        assert_eq!(idle(Duration::ZERO), Some(Duration::ZERO));
        assert_eq!(idle(Duration::from_millis(500)), Some(Duration::from_secs(1)));
        assert_eq!(idle(Duration::from_millis(1500)), Some(Duration::from_secs(2)));
        assert_eq!(idle(Duration::from_secs(60)), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_invalid_attributes() {
        assert!(RegionAttributes::default()
            .with_spool_chunk_size(0)
            .validate()
            .is_err());

        let mut attrs = RegionAttributes::default();
        attrs.use_memory_shrinker = true;
        attrs.shrinker_interval_seconds = 0;
        assert!(attrs.validate().is_err());
    }
}
