//! Composite Cache - Region Orchestrator
//!
//! Combines the memory tier with the region's auxiliary stores and implements
//! tier ordering and the waterfall.
//!
//! # Read Path
//!
//! 1. Memory. An expired hit is removed everywhere and reads as a miss.
//! 2. Each live auxiliary in attachment order. The first unexpired hit is
//!    promoted into memory, which may spool older elements out.
//!
//! # Write Path
//!
//! Memory is updated synchronously (evicting and spooling as needed), then the
//! element is queued for each eligible auxiliary. The caller never waits on
//! auxiliary I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use super::attributes::{DiskUsagePattern, RegionAttributes};
use super::auxiliary::{AuxiliaryCache, AuxiliaryKind, CacheStatus};
use super::element::{now_millis, CacheElement, ElementAttributes};
use super::event::ElementEventKind;
use super::matcher::{KeyMatcher, RegexKeyMatcher};
use super::memory::LruMemoryCache;
use super::metrics::{RegionStats, RegionStatsSnapshot};
use super::shrinker::{self, ShrinkReport, Shrinker, ShrinkerState};
use crate::error::{Error, Result};
use crate::pool::WorkerPoolManager;
use crate::queue::{AuxiliaryListener, CacheEventQueue, QueueConfig, QueueStats};
use crate::remote::{
    FailoverConfig, FailoverController, FailoverStatus, RemoteCacheListener, RemoteConnector,
    RemoteLocation,
};

/// Time a queue may drain when its region is disposed
pub const DEFAULT_DISPOSE_WAIT: Duration = Duration::from_secs(5);

enum MemoryLookup {
    Hit(CacheElement),
    Expired,
    Miss,
}

/// One attached tier
#[derive(Clone)]
enum AuxiliarySlot {
    /// Disk, lateral or plain remote store fed through its own queue
    Queued {
        store: Arc<dyn AuxiliaryCache>,
        queue: Arc<CacheEventQueue>,
    },
    /// Remote store behind a failover controller
    Remote(Arc<FailoverController>),
}

impl AuxiliarySlot {
    fn kind(&self) -> AuxiliaryKind {
        match self {
            AuxiliarySlot::Queued { store, .. } => store.kind(),
            AuxiliarySlot::Remote(_) => AuxiliaryKind::Remote,
        }
    }

    fn name(&self) -> String {
        match self {
            AuxiliarySlot::Queued { store, .. } => store.name().to_string(),
            AuxiliarySlot::Remote(controller) => controller.current().to_string(),
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            AuxiliarySlot::Queued { store, queue } => {
                store.status().is_alive() && queue.is_working() && queue.is_alive()
            }
            AuxiliarySlot::Remote(controller) => controller.status().is_alive(),
        }
    }

    fn put(&self, element: CacheElement) -> bool {
        match self {
            AuxiliarySlot::Queued { queue, .. } => queue.add_put_event(element).is_ok(),
            AuxiliarySlot::Remote(controller) => {
                controller.enqueue_update(element);
                true
            }
        }
    }

    fn remove(&self, key: &str) {
        match self {
            AuxiliarySlot::Queued { queue, .. } => {
                let _ = queue.add_remove_event(key);
            }
            AuxiliarySlot::Remote(controller) => controller.enqueue_remove(key),
        }
    }

    fn remove_all(&self) {
        match self {
            AuxiliarySlot::Queued { queue, .. } => {
                let _ = queue.add_remove_all_event();
            }
            AuxiliarySlot::Remote(controller) => controller.enqueue_remove_all(),
        }
    }

    async fn get(&self, key: &str) -> Option<CacheElement> {
        match self {
            AuxiliarySlot::Queued { store, .. } => match store.get(key).await {
                Ok(found) => found,
                Err(e) => {
                    debug!(store = %store.name(), key, error = %e, "Auxiliary get failed");
                    None
                }
            },
            AuxiliarySlot::Remote(controller) => controller.get(key).await,
        }
    }

    async fn get_multiple(&self, keys: &[String]) -> HashMap<String, CacheElement> {
        match self {
            AuxiliarySlot::Queued { store, .. } => {
                store.get_multiple(keys).await.unwrap_or_else(|e| {
                    debug!(store = %store.name(), error = %e, "Auxiliary get_multiple failed");
                    HashMap::new()
                })
            }
            AuxiliarySlot::Remote(controller) => controller.get_multiple(keys).await,
        }
    }

    async fn get_matching(&self, pattern: &str) -> HashMap<String, CacheElement> {
        match self {
            AuxiliarySlot::Queued { store, .. } => {
                store.get_matching(pattern).await.unwrap_or_else(|e| {
                    debug!(store = %store.name(), error = %e, "Auxiliary get_matching failed");
                    HashMap::new()
                })
            }
            AuxiliarySlot::Remote(controller) => controller.get_matching(pattern).await,
        }
    }

    async fn flush(&self, timeout: Duration) -> bool {
        match self {
            AuxiliarySlot::Queued { queue, .. } => queue.flush(timeout).await,
            AuxiliarySlot::Remote(controller) => controller.flush(timeout).await,
        }
    }

    fn queue_stats(&self) -> Option<QueueStats> {
        match self {
            AuxiliarySlot::Queued { queue, .. } => Some(queue.stats()),
            AuxiliarySlot::Remote(controller) => controller.queue_stats(),
        }
    }

    async fn dispose(self, wait: Duration) {
        match self {
            AuxiliarySlot::Queued { queue, .. } => {
                let _ = queue.add_dispose_event();
                queue.destroy(wait).await;
            }
            AuxiliarySlot::Remote(controller) => controller.dispose().await,
        }
    }
}

/// A named region: memory plus zero or more auxiliary stores
pub struct CompositeCache {
    name: String,
    attributes: RegionAttributes,
    memory: LruMemoryCache,
    auxiliaries: RwLock<Vec<AuxiliarySlot>>,
    matcher: Arc<dyn KeyMatcher>,
    stats: RegionStats,
    pools: Arc<WorkerPoolManager>,
    queue_config: QueueConfig,
    dispose_wait: Duration,
    shrinker: Mutex<Option<Shrinker>>,
    alive: AtomicBool,
}

impl CompositeCache {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &RegionAttributes {
        &self.attributes
    }

    /// The memory tier
    pub fn memory(&self) -> &LruMemoryCache {
        &self.memory
    }

    /// Number of elements in memory
    pub fn size(&self) -> usize {
        self.memory.len()
    }

    pub fn status(&self) -> CacheStatus {
        if self.alive.load(Ordering::Acquire) {
            CacheStatus::Alive
        } else {
            CacheStatus::Disposed
        }
    }

    pub fn stats(&self) -> RegionStatsSnapshot {
        self.stats.snapshot()
    }

    /// Statistics for every auxiliary queue
    pub fn queue_stats(&self) -> Vec<QueueStats> {
        self.slots().iter().filter_map(|s| s.queue_stats()).collect()
    }

    /// Number of attached auxiliary stores
    pub fn auxiliary_count(&self) -> usize {
        self.auxiliaries.read().len()
    }

    /// State of each remote failover controller
    pub fn remote_status(&self) -> Vec<FailoverStatus> {
        self.slots()
            .iter()
            .filter_map(|s| match s {
                AuxiliarySlot::Remote(controller) => Some(controller.status()),
                _ => None,
            })
            .collect()
    }

    /// The region's failover controllers
    pub fn remotes(&self) -> Vec<Arc<FailoverController>> {
        self.slots()
            .into_iter()
            .filter_map(|s| match s {
                AuxiliarySlot::Remote(controller) => Some(controller),
                _ => None,
            })
            .collect()
    }

    /// The shrinker, if one is running
    pub fn shrinker_passes(&self) -> Option<u64> {
        self.shrinker.lock().as_ref().map(|s| s.passes())
    }

    /// Whether the background shrinker is mid-pass; `None` when it is off
    pub fn shrinker_state(&self) -> Option<ShrinkerState> {
        self.shrinker.lock().as_ref().map(|s| s.state())
    }

    fn slots(&self) -> Vec<AuxiliarySlot> {
        self.auxiliaries.read().clone()
    }

    fn slots_of(&self, kind: AuxiliaryKind) -> Vec<AuxiliarySlot> {
        self.auxiliaries
            .read()
            .iter()
            .filter(|s| s.kind() == kind)
            .cloned()
            .collect()
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.alive.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::RegionDisposed(self.name.clone()))
        }
    }

    fn check_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("key must not be empty".into()));
        }
        Ok(())
    }

    /// Attach another auxiliary store after the region is built
    pub fn add_auxiliary(&self, store: Arc<dyn AuxiliaryCache>) -> Result<()> {
        self.ensure_alive()?;
        let queue = CacheEventQueue::new(
            self.name.clone(),
            Arc::new(AuxiliaryListener::new(Arc::clone(&store))),
            self.queue_config.clone(),
            &self.pools,
        )?;
        debug!(region = %self.name, store = %store.name(), kind = %store.kind(), "Auxiliary attached");
        self.auxiliaries.write().push(AuxiliarySlot::Queued {
            store,
            queue: Arc::new(queue),
        });
        Ok(())
    }

    fn add_remote(&self, controller: Arc<FailoverController>) {
        self.auxiliaries.write().push(AuxiliarySlot::Remote(controller));
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Attributes for a put that does not bring its own
    pub fn default_element_attributes(&self) -> ElementAttributes {
        let mut attributes = self.attributes.element.clone();
        attributes.stamp(now_millis());
        attributes
    }

    /// Store a value under the region's default element attributes
    pub fn put(&self, key: impl Into<String>, value: impl Into<Bytes>) -> Result<()> {
        let element = CacheElement::with_attributes(
            self.name.clone(),
            key,
            value,
            self.default_element_attributes(),
        );
        self.update(element)
    }

    /// Store a value with explicit attributes
    pub fn put_with_attributes(
        &self,
        key: impl Into<String>,
        value: impl Into<Bytes>,
        mut attributes: ElementAttributes,
    ) -> Result<()> {
        attributes.stamp(now_millis());
        self.update(CacheElement::with_attributes(self.name.clone(), key, value, attributes))
    }

    /// Store an element in memory and queue it for every eligible tier
    pub fn update(&self, element: CacheElement) -> Result<()> {
        self.update_with(element, false)
    }

    /// Store an element that came from a peer; it is not sent back out to
    /// remote or lateral tiers.
    pub fn update_local(&self, element: CacheElement) -> Result<()> {
        self.update_with(element, true)
    }

    fn update_with(&self, element: CacheElement, local_only: bool) -> Result<()> {
        self.ensure_alive()?;
        Self::check_key(element.key())?;
        if element.region() != self.name {
            return Err(Error::InvalidArgument(format!(
                "element for region '{}' put into region '{}'",
                element.region(),
                self.name
            )));
        }

        self.stats.record_put();
        let evicted = self.memory.update(element.clone());
        self.spool_evicted(evicted);

        let attrs = element.attributes();
        let outbound = element.without_handlers();
        for slot in self.slots() {
            let eligible = match slot.kind() {
                AuxiliaryKind::Disk => {
                    self.attributes.use_disk
                        && self.attributes.disk_usage_pattern == DiskUsagePattern::Update
                        && attrs.spoolable
                }
                AuxiliaryKind::Remote => !local_only && self.attributes.use_remote && attrs.remote,
                AuxiliaryKind::Lateral => {
                    !local_only && self.attributes.use_lateral && attrs.lateral
                }
            };
            if eligible && !slot.put(outbound.clone()) {
                debug!(region = %self.name, store = %slot.name(), key = %element.key(), "Auxiliary not accepting update");
            }
        }
        Ok(())
    }

    fn spool_evicted(&self, evicted: Vec<CacheElement>) {
        if evicted.is_empty() {
            return;
        }
        self.stats.record_evictions(evicted.len() as u64);
        for element in evicted {
            self.spool_to_disk(element);
        }
    }

    /// Hand an element leaving memory to the first live disk tier. Fires an
    /// element event either way; returns true if a disk took it.
    pub fn spool_to_disk(&self, element: CacheElement) -> bool {
        if !element.attributes().spoolable {
            element.notify(ElementEventKind::SpooledNotAllowed);
            return false;
        }

        if self.attributes.use_disk {
            for disk in self.slots_of(AuxiliaryKind::Disk) {
                if disk.is_alive() && disk.put(element.without_handlers()) {
                    self.stats.record_spool();
                    element.notify(ElementEventKind::SpooledDiskAvailable);
                    return true;
                }
            }
        }

        debug!(region = %self.name, key = %element.key(), "No disk available for spool");
        element.notify(ElementEventKind::SpooledDiskNotAvailable);
        false
    }

    /// Remove a key (or every key under a prefix ending in the delimiter).
    /// Returns whether memory held anything.
    pub fn remove(&self, key: &str) -> Result<bool> {
        self.remove_with(key, false)
    }

    /// Remove requested by a peer; not sent back out
    pub fn remove_local(&self, key: &str) -> Result<bool> {
        self.remove_with(key, true)
    }

    fn remove_with(&self, key: &str, local_only: bool) -> Result<bool> {
        self.ensure_alive()?;
        Self::check_key(key)?;

        let removed = self.memory.remove(key);
        self.stats.record_remove();
        for slot in self.slots() {
            if local_only && slot.kind() != AuxiliaryKind::Disk {
                continue;
            }
            slot.remove(key);
        }
        Ok(removed)
    }

    /// Clear memory and every tier
    pub fn remove_all(&self) -> Result<()> {
        self.remove_all_with(false)
    }

    /// Clear requested by a peer; not sent back out
    pub fn remove_all_local(&self) -> Result<()> {
        self.remove_all_with(true)
    }

    fn remove_all_with(&self, local_only: bool) -> Result<()> {
        self.ensure_alive()?;
        self.memory.clear();
        for slot in self.slots() {
            match slot.kind() {
                AuxiliaryKind::Disk => slot.remove_all(),
                AuxiliaryKind::Remote if !local_only && self.attributes.allow_remote_remove_all => {
                    slot.remove_all()
                }
                AuxiliaryKind::Lateral if !local_only => slot.remove_all(),
                _ => {}
            }
        }
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a value, searching memory then each auxiliary in order
    pub async fn get(&self, key: &str) -> Result<Option<CacheElement>> {
        self.ensure_alive()?;
        Self::check_key(key)?;

        match self.get_from_memory(key) {
            MemoryLookup::Hit(element) => return Ok(Some(element)),
            MemoryLookup::Expired => return Ok(None),
            MemoryLookup::Miss => {}
        }

        for slot in self.slots() {
            if !slot.is_alive() {
                continue;
            }
            if let Some(element) = slot.get(key).await {
                return Ok(self.promote(element));
            }
        }

        self.stats.record_miss();
        Ok(None)
    }

    /// Get just the value
    pub async fn get_value(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.get(key).await?.map(CacheElement::into_value))
    }

    /// Get several keys; absent keys are left out of the result
    pub async fn get_multiple(&self, keys: &[String]) -> Result<HashMap<String, CacheElement>> {
        self.ensure_alive()?;
        for key in keys {
            Self::check_key(key)?;
        }

        let mut found = HashMap::with_capacity(keys.len());
        let mut missing = Vec::new();
        for key in keys {
            match self.get_from_memory(key) {
                MemoryLookup::Hit(element) => {
                    found.insert(key.clone(), element);
                }
                MemoryLookup::Miss => missing.push(key.clone()),
                MemoryLookup::Expired => {}
            }
        }

        for slot in self.slots() {
            if missing.is_empty() {
                break;
            }
            if !slot.is_alive() {
                continue;
            }
            for (key, element) in slot.get_multiple(&missing).await {
                if let Some(element) = self.promote(element) {
                    found.insert(key, element);
                }
            }
            missing.retain(|k| !found.contains_key(k));
        }

        for _ in &missing {
            self.stats.record_miss();
        }
        Ok(found)
    }

    /// Get every element whose key matches `pattern`. Memory wins over
    /// auxiliary stores when both hold a key.
    pub async fn get_matching(&self, pattern: &str) -> Result<HashMap<String, CacheElement>> {
        self.ensure_alive()?;
        let matched = self.matcher.matching_keys(pattern, &self.memory.key_set())?;

        let mut found = HashMap::new();
        let now = now_millis();
        for slot in self.slots().iter().rev() {
            if !slot.is_alive() {
                continue;
            }
            for (key, element) in slot.get_matching(pattern).await {
                if element.attributes().expiry(now).is_none() {
                    found.insert(key, element);
                }
            }
        }
        for key in matched {
            if let MemoryLookup::Hit(element) = self.get_from_memory(&key) {
                found.insert(key, element);
            }
        }
        Ok(found)
    }

    /// Memory lookup with the on-request expiry check. An expired element is
    /// removed from every tier.
    fn get_from_memory(&self, key: &str) -> MemoryLookup {
        let Some(candidate) = self.memory.get_quiet(key) else {
            return MemoryLookup::Miss;
        };
        let now = now_millis();
        if let Some(expiry) = candidate.attributes().expiry(now) {
            let taken = self.memory.take_if(key, |current| {
                current.same_entry(&candidate) && current.attributes().expiry(now).is_some()
            });
            if taken.is_none() {
                // replaced since the snapshot; serve whatever is there now
                return match self.memory.get(key) {
                    Some(element) => {
                        self.stats.record_memory_hit();
                        MemoryLookup::Hit(element)
                    }
                    None => MemoryLookup::Miss,
                };
            }
            self.stats.record_expired_miss();
            debug!(region = %self.name, key, ?expiry, "Expired on request");
            candidate.notify(expiry.event_kind(false));
            for slot in self.slots() {
                slot.remove(key);
            }
            return MemoryLookup::Expired;
        }

        match self.memory.get(key) {
            Some(element) => {
                self.stats.record_memory_hit();
                MemoryLookup::Hit(element)
            }
            None => MemoryLookup::Miss,
        }
    }

    /// Move an auxiliary hit into memory unless it has expired
    fn promote(&self, mut element: CacheElement) -> Option<CacheElement> {
        let now = now_millis();
        if let Some(expiry) = element.attributes().expiry(now) {
            self.stats.record_expired_miss();
            element.notify(expiry.event_kind(false));
            for slot in self.slots() {
                slot.remove(element.key());
            }
            return None;
        }

        element.attributes_mut().touch(now);
        self.stats.record_auxiliary_hit();
        let evicted = self.memory.update(element.clone());
        self.spool_evicted(evicted);
        Some(element)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Run one shrinker pass now
    pub fn shrink(&self) -> ShrinkReport {
        shrinker::scan(self)
    }

    /// Wait until every auxiliary queue has applied what it was given
    pub async fn flush(&self, timeout: Duration) -> bool {
        let mut drained = true;
        for slot in self.slots() {
            drained &= slot.flush(timeout).await;
        }
        drained
    }

    /// Persist spoolable memory to disk, then tear down every tier.
    /// Calling it again does nothing.
    #[instrument(skip(self), fields(region = %self.name))]
    pub async fn dispose(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(shrinker) = self.shrinker.lock().take() {
            shrinker.stop();
        }

        let mut persisted = 0usize;
        if self.attributes.use_disk {
            let disks: Vec<_> = self
                .slots_of(AuxiliaryKind::Disk)
                .into_iter()
                .filter(|d| d.is_alive())
                .collect();
            if !disks.is_empty() {
                for element in self.memory.elements() {
                    if !element.attributes().spoolable {
                        continue;
                    }
                    for disk in &disks {
                        if disk.put(element.without_handlers()) {
                            persisted += 1;
                        }
                    }
                }
            }
        }
        self.memory.clear();

        let slots = std::mem::take(&mut *self.auxiliaries.write());
        let tiers = slots.len();
        for slot in slots {
            slot.dispose(self.dispose_wait).await;
        }
        info!(persisted, tiers, "Region disposed");
    }
}

impl Drop for CompositeCache {
    fn drop(&mut self) {
        if let Some(shrinker) = self.shrinker.get_mut().take() {
            shrinker.stop();
        }
    }
}

struct RemoteSpec {
    servers: Vec<RemoteLocation>,
    connector: Arc<dyn RemoteConnector>,
    config: FailoverConfig,
}

/// Builds a [`CompositeCache`]
pub struct RegionBuilder {
    name: String,
    attributes: RegionAttributes,
    pools: Option<Arc<WorkerPoolManager>>,
    queue_config: QueueConfig,
    matcher: Arc<dyn KeyMatcher>,
    auxiliaries: Vec<Arc<dyn AuxiliaryCache>>,
    remotes: Vec<RemoteSpec>,
    dispose_wait: Duration,
}

impl RegionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: RegionAttributes::default(),
            pools: None,
            queue_config: QueueConfig::default(),
            matcher: Arc::new(RegexKeyMatcher::new()),
            auxiliaries: Vec::new(),
            remotes: Vec::new(),
            dispose_wait: DEFAULT_DISPOSE_WAIT,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(mut self, attributes: RegionAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Worker pools shared with other regions
    pub fn pools(mut self, pools: Arc<WorkerPoolManager>) -> Self {
        self.pools = Some(pools);
        self
    }

    pub fn queue_config(mut self, config: QueueConfig) -> Self {
        self.queue_config = config;
        self
    }

    pub fn matcher(mut self, matcher: Arc<dyn KeyMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Attach a disk, lateral or plain remote store
    pub fn auxiliary(mut self, store: Arc<dyn AuxiliaryCache>) -> Self {
        self.auxiliaries.push(store);
        self
    }

    /// Attach a remote tier with failover over `servers`
    pub fn remote(
        mut self,
        servers: Vec<RemoteLocation>,
        connector: Arc<dyn RemoteConnector>,
        config: FailoverConfig,
    ) -> Self {
        self.remotes.push(RemoteSpec {
            servers,
            connector,
            config,
        });
        self
    }

    pub fn dispose_wait(mut self, wait: Duration) -> Self {
        self.dispose_wait = wait;
        self
    }

    /// Create the region, its queues and background tasks
    pub async fn build(self) -> Result<Arc<CompositeCache>> {
        self.attributes.validate()?;
        self.queue_config.validate()?;
        let pools = self
            .pools
            .unwrap_or_else(|| Arc::new(WorkerPoolManager::new()));

        let cache = Arc::new(CompositeCache {
            memory: LruMemoryCache::with_config(self.attributes.memory_config()),
            name: self.name,
            attributes: self.attributes,
            auxiliaries: RwLock::new(Vec::new()),
            matcher: self.matcher,
            stats: RegionStats::new(),
            pools: Arc::clone(&pools),
            queue_config: self.queue_config.clone(),
            dispose_wait: self.dispose_wait,
            shrinker: Mutex::new(None),
            alive: AtomicBool::new(true),
        });

        for store in self.auxiliaries {
            cache.add_auxiliary(store)?;
        }

        for remote in self.remotes {
            let listener = Arc::new(RemoteCacheListener::new(&cache));
            let controller = FailoverController::connect(
                cache.name.clone(),
                remote.servers,
                remote.connector,
                listener,
                Arc::clone(&pools),
                self.queue_config.clone(),
                remote.config,
            )
            .await?;
            controller.start()?;
            cache.add_remote(controller);
        }

        if cache.attributes.use_memory_shrinker {
            let shrinker = Shrinker::start(&cache)?;
            *cache.shrinker.lock() = Some(shrinker);
        }

        if cache.remote_status().iter().any(|s| !s.is_alive()) {
            warn!(region = %cache.name, "Region started with a remote tier down");
        }
        info!(
            region = %cache.name,
            max_objects = cache.attributes.max_objects,
            auxiliaries = cache.auxiliary_count(),
            shrinker = cache.attributes.use_memory_shrinker,
            "Region created"
        );
        Ok(cache)
    }
}

// =============================================================================
// Tests
// =============================================================================


impl std::fmt::Debug for CompositeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeCache")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
