//! Cache Elements
//!
//! A cache element is a key/value pair for one region plus the attributes that
//! decide when it expires and which tiers it may travel to. Each tier holds its
//! own copy; nothing mutable is shared between tiers.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::event::{ElementEvent, ElementEventHandler, ElementEventKind};

/// Current wall-clock time in milliseconds since the Unix epoch
#[inline]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Reason an element is considered expired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Older than its max life
    MaxLife,
    /// Not read for longer than its idle time
    IdleTime,
}

impl Expiry {
    /// Map to the event kind reported to handlers
    pub fn event_kind(self, background: bool) -> ElementEventKind {
        match (self, background) {
            (Expiry::MaxLife, false) => ElementEventKind::ExceededMaxlifeOnrequest,
            (Expiry::MaxLife, true) => ElementEventKind::ExceededMaxlifeBackground,
            (Expiry::IdleTime, false) => ElementEventKind::ExceededIdletimeOnrequest,
            (Expiry::IdleTime, true) => ElementEventKind::ExceededIdletimeBackground,
        }
    }
}

/// Optional durations expressed as (fractional) seconds in configuration
mod opt_secs {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs: Option<f64> = Option::deserialize(d)?;
        match secs {
            Some(s) if s < 0.0 => Ok(None),
            Some(s) => Duration::try_from_secs_f64(s)
                .map(Some)
                .map_err(|e| D::Error::custom(format!("invalid duration {}: {}", s, e))),
            None => Ok(None),
        }
    }
}

/// Per-element expiration and replication policy
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementAttributes {
    /// Creation time (epoch millis)
    #[serde(skip)]
    created_at: u64,
    /// Last successful read (epoch millis)
    #[serde(skip)]
    last_access: u64,
    /// Maximum lifetime from creation
    #[serde(rename = "max_life_seconds", with = "opt_secs")]
    pub max_life: Option<Duration>,
    /// Maximum time between reads
    #[serde(rename = "max_idle_seconds", with = "opt_secs")]
    pub max_idle: Option<Duration>,
    /// Eternal elements skip every expiration check
    pub eternal: bool,
    /// May be spooled to a disk tier
    pub spoolable: bool,
    /// May be sent to lateral peers
    pub lateral: bool,
    /// May be sent to remote servers
    pub remote: bool,
    /// Size hint in bytes (0 = use the value length)
    pub size: usize,
    #[serde(skip)]
    handlers: Vec<Arc<dyn ElementEventHandler>>,
}

impl Default for ElementAttributes {
    fn default() -> Self {
        let now = now_millis();
        Self {
            created_at: now,
            last_access: now,
            max_life: None,
            max_idle: None,
            eternal: true,
            spoolable: true,
            lateral: true,
            remote: true,
            size: 0,
            handlers: Vec::new(),
        }
    }
}

impl std::fmt::Debug for ElementAttributes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementAttributes")
            .field("created_at", &self.created_at)
            .field("last_access", &self.last_access)
            .field("max_life", &self.max_life)
            .field("max_idle", &self.max_idle)
            .field("eternal", &self.eternal)
            .field("spoolable", &self.spoolable)
            .field("lateral", &self.lateral)
            .field("remote", &self.remote)
            .field("size", &self.size)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl ElementAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the max life. Also clears the eternal flag.
    pub fn with_max_life(mut self, max_life: Duration) -> Self {
        self.max_life = Some(max_life);
        self.eternal = false;
        self
    }

    /// Set the max idle time. Also clears the eternal flag.
    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = Some(max_idle);
        self.eternal = false;
        self
    }

    pub fn with_eternal(mut self, eternal: bool) -> Self {
        self.eternal = eternal;
        self
    }

    pub fn with_spoolable(mut self, spoolable: bool) -> Self {
        self.spoolable = spoolable;
        self
    }

    pub fn with_lateral(mut self, lateral: bool) -> Self {
        self.lateral = lateral;
        self
    }

    pub fn with_remote(mut self, remote: bool) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Attach an event handler
    pub fn with_handler(mut self, handler: Arc<dyn ElementEventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Attach an event handler in place
    pub fn add_handler(&mut self, handler: Arc<dyn ElementEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn handlers(&self) -> &[Arc<dyn ElementEventHandler>] {
        &self.handlers
    }

    /// Creation time (epoch millis)
    #[inline]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Last access time (epoch millis)
    #[inline]
    pub fn last_access(&self) -> u64 {
        self.last_access
    }

    /// Reset creation and access times, used when a region hands out a copy
    /// of its default attributes.
    pub fn stamp(&mut self, now: u64) {
        self.created_at = now;
        self.last_access = now;
    }

    /// Record a successful read
    #[inline]
    pub fn touch(&mut self, now: u64) {
        self.last_access = now;
    }

    /// Time since the last successful read
    pub fn idle_for(&self, now: u64) -> Duration {
        Duration::from_millis(now.saturating_sub(self.last_access))
    }

    /// Check expiration at `now`; max life is checked before idle time
    pub fn expiry(&self, now: u64) -> Option<Expiry> {
        if self.eternal {
            return None;
        }
        if let Some(max_life) = self.max_life {
            if now.saturating_sub(self.created_at) > max_life.as_millis() as u64 {
                return Some(Expiry::MaxLife);
            }
        }
        if let Some(max_idle) = self.max_idle {
            if now.saturating_sub(self.last_access) > max_idle.as_millis() as u64 {
                return Some(Expiry::IdleTime);
            }
        }
        None
    }

    /// Deliver an event to every attached handler
    pub fn notify(&self, event: &ElementEvent) {
        for handler in &self.handlers {
            handler.handle_element_event(event);
        }
    }
}

/// A cached key/value pair
#[derive(Clone, Debug)]
pub struct CacheElement {
    region: String,
    key: String,
    value: Bytes,
    attributes: ElementAttributes,
}

impl CacheElement {
    /// Create an element with default attributes
    pub fn new(region: impl Into<String>, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self::with_attributes(region, key, value, ElementAttributes::default())
    }

    /// Create an element with explicit attributes
    pub fn with_attributes(
        region: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Bytes>,
        attributes: ElementAttributes,
    ) -> Self {
        Self {
            region: region.into(),
            key: key.into(),
            value: value.into(),
            attributes,
        }
    }

    #[inline]
    pub fn region(&self) -> &str {
        &self.region
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn into_value(self) -> Bytes {
        self.value
    }

    #[inline]
    pub fn attributes(&self) -> &ElementAttributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut ElementAttributes {
        &mut self.attributes
    }

    /// Replace the attributes, keeping key and value
    pub fn replace_attributes(mut self, attributes: ElementAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Copy of this element with no event handlers attached, for handing to
    /// auxiliary tiers that outlive the caller's handlers
    pub fn without_handlers(&self) -> CacheElement {
        let mut copy = self.clone();
        copy.attributes.handlers.clear();
        copy
    }

    /// Whether `other` is a copy of the same stored entry rather than a
    /// later write under the same key
    pub fn same_entry(&self, other: &CacheElement) -> bool {
        self.key == other.key
            && self.attributes.created_at == other.attributes.created_at
            && self.value.as_ptr() == other.value.as_ptr()
            && self.value.len() == other.value.len()
    }

    /// Size in bytes, preferring the attribute hint
    pub fn size(&self) -> usize {
        if self.attributes.size > 0 {
            self.attributes.size
        } else {
            self.value.len()
        }
    }

    /// Fire an event of `kind` for this element
    pub fn notify(&self, kind: ElementEventKind) {
        if self.attributes.handlers.is_empty() {
            return;
        }
        let event = ElementEvent::new(kind, self.region.clone(), self.key.clone());
        self.attributes.notify(&event);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::event::ElementEventCollector;

    #[test]
    fn test_default_attributes_are_eternal() {
        let attrs = ElementAttributes::default();
        assert!(attrs.eternal);
        assert!(attrs.spoolable);
        assert!(attrs.max_life.is_none());
        assert_eq!(attrs.expiry(now_millis() + 10_000_000), None);
    }

    #[test]
    fn test_eternal_skips_expiration() {
        let mut attrs = ElementAttributes::new()
            .with_max_life(Duration::from_millis(10))
            .with_eternal(true);
        attrs.stamp(1_000);
        assert_eq!(attrs.expiry(1_000_000), None);
    }

    #[test]
    fn test_max_life_checked_before_idle() {
        let mut attrs = ElementAttributes::new()
            .with_max_life(Duration::from_secs(1))
            .with_max_idle(Duration::from_secs(1));
        attrs.stamp(1_000);
        assert_eq!(attrs.expiry(1_500), None);
        assert_eq!(attrs.expiry(2_100), Some(Expiry::MaxLife));
    }

    #[test]
    fn test_touch_resets_idle() {
        let mut attrs = ElementAttributes::new().with_max_idle(Duration::from_secs(1));
        attrs.stamp(1_000);
        attrs.touch(1_900);
        assert_eq!(attrs.expiry(2_500), None);
        assert_eq!(attrs.expiry(3_000), Some(Expiry::IdleTime));
        assert_eq!(attrs.idle_for(3_000), Duration::from_millis(1_100));
    }

    #[test]
    fn test_expiry_event_kinds() {
        assert_eq!(
            Expiry::MaxLife.event_kind(false),
            ElementEventKind::ExceededMaxlifeOnrequest
        );
        assert_eq!(
            Expiry::IdleTime.event_kind(true),
            ElementEventKind::ExceededIdletimeBackground
        );
    }

    #[test]
    fn test_element_size_prefers_hint() {
        let element = CacheElement::new("r", "k", "12345");
        assert_eq!(element.size(), 5);
        let element = element.replace_attributes(ElementAttributes::new().with_size(64));
        assert_eq!(element.size(), 64);
    }

    #[test]
    fn test_element_notify_reaches_handlers() {
        let collector = Arc::new(ElementEventCollector::new());
        let attrs = ElementAttributes::new().with_handler(collector.clone());
        let element = CacheElement::with_attributes("users", "alice", "v", attrs);

        element.notify(ElementEventKind::SpooledDiskAvailable);

        let events = collector.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].region, "users");
        assert_eq!(events[0].key, "alice");
    }

    #[test]
    fn test_attributes_from_yaml() {
        let yaml = "max_life_seconds: 1.5\neternal: false\nspoolable: false\n";
        let attrs: ElementAttributes = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(attrs.max_life, Some(Duration::from_millis(1500)));
        assert!(attrs.max_idle.is_none());
        assert!(!attrs.eternal);
        assert!(!attrs.spoolable);
        assert!(attrs.remote);
    }

    #[test]
    fn test_attributes_reject_unrepresentable_lifetimes() {
        for yaml in [
            "max_life_seconds: .inf\n",
            "max_idle_seconds: .nan\n",
            "max_life_seconds: 1.0e+30\n",
        ] {
            assert!(serde_yaml::from_str::<ElementAttributes>(yaml).is_err(), "{}", yaml);
        }
        let attrs: ElementAttributes = serde_yaml::from_str("max_life_seconds: -1\n").unwrap();
        assert!(attrs.max_life.is_none());
    }

    #[test]
    fn test_without_handlers_keeps_original_handlers() {
        let collector = Arc::new(ElementEventCollector::new());
        let attrs = ElementAttributes::new()
            .with_max_life(Duration::from_secs(5))
            .with_handler(collector);
        let element = CacheElement::with_attributes("r", "k", "v", attrs);

        let bare = element.without_handlers();

        assert!(bare.attributes().handlers().is_empty());
        assert_eq!(bare.attributes().max_life, Some(Duration::from_secs(5)));
        assert_eq!(element.attributes().handlers().len(), 1);
    }
}
