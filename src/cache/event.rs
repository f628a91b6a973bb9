//! Element Events
//!
//! In-process notifications fired when an element is spooled out of memory or
//! found to be expired. Handlers hang off [`ElementAttributes`] and never leave
//! the process with the element.
//!
//! [`ElementAttributes`]: super::element::ElementAttributes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Kind of element event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementEventKind {
    /// Element left memory and was handed to a disk tier
    SpooledDiskAvailable,
    /// Element left memory but is not spoolable
    SpooledNotAllowed,
    /// Element left memory and no disk tier could take it
    SpooledDiskNotAvailable,
    /// Max life exceeded, discovered by a caller's read
    ExceededMaxlifeOnrequest,
    /// Max life exceeded, discovered by the shrinker
    ExceededMaxlifeBackground,
    /// Idle time exceeded, discovered by a caller's read
    ExceededIdletimeOnrequest,
    /// Idle time exceeded, discovered by the shrinker
    ExceededIdletimeBackground,
}

impl ElementEventKind {
    /// Whether this event reports a spool attempt
    pub fn is_spool(&self) -> bool {
        matches!(
            self,
            ElementEventKind::SpooledDiskAvailable
                | ElementEventKind::SpooledNotAllowed
                | ElementEventKind::SpooledDiskNotAvailable
        )
    }

    /// Whether this event reports an expiration
    pub fn is_expiration(&self) -> bool {
        !self.is_spool()
    }

    /// Stable name used in logs and metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementEventKind::SpooledDiskAvailable => "SPOOLED_DISK_AVAILABLE",
            ElementEventKind::SpooledNotAllowed => "SPOOLED_NOT_ALLOWED",
            ElementEventKind::SpooledDiskNotAvailable => "SPOOLED_DISK_NOT_AVAILABLE",
            ElementEventKind::ExceededMaxlifeOnrequest => "EXCEEDED_MAXLIFE_ONREQUEST",
            ElementEventKind::ExceededMaxlifeBackground => "EXCEEDED_MAXLIFE_BACKGROUND",
            ElementEventKind::ExceededIdletimeOnrequest => "EXCEEDED_IDLETIME_ONREQUEST",
            ElementEventKind::ExceededIdletimeBackground => "EXCEEDED_IDLETIME_BACKGROUND",
        }
    }
}

impl std::fmt::Display for ElementEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An element event as delivered to handlers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementEvent {
    pub kind: ElementEventKind,
    pub region: String,
    pub key: String,
    pub timestamp: DateTime<Utc>,
}

impl ElementEvent {
    /// Create a new event stamped with the current time
    pub fn new(kind: ElementEventKind, region: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind,
            region: region.into(),
            key: key.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Receiver of element events.
///
/// Handlers run on whichever task discovered the event (a caller for
/// on-request expiry and spooling, the shrinker for background expiry), so
/// they should return quickly.
pub trait ElementEventHandler: Send + Sync {
    fn handle_element_event(&self, event: &ElementEvent);
}

/// Logging-based element event handler.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventHandler {
    /// Whether to log events at info level (true) or debug level (false)
    info_level: bool,
}

impl LoggingEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handler that logs at info level.
    pub fn info_level() -> Self {
        Self { info_level: true }
    }
}

impl ElementEventHandler for LoggingEventHandler {
    fn handle_element_event(&self, event: &ElementEvent) {
        if self.info_level {
            info!(kind = %event.kind, region = %event.region, key = %event.key, "Element event");
        } else {
            debug!(kind = %event.kind, region = %event.region, key = %event.key, "Element event");
        }
    }
}

/// In-memory event collector.
///
/// Keeps every event it sees for later inspection.
#[derive(Debug, Default)]
pub struct ElementEventCollector {
    events: parking_lot::RwLock<Vec<ElementEvent>>,
}

impl ElementEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events.
    pub fn events(&self) -> Vec<ElementEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Get events of a specific kind.
    pub fn events_of_kind(&self, kind: ElementEventKind) -> Vec<ElementEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Count of events of a specific kind.
    pub fn count_of(&self, kind: ElementEventKind) -> usize {
        self.events.read().iter().filter(|e| e.kind == kind).count()
    }
}

impl ElementEventHandler for ElementEventCollector {
    fn handle_element_event(&self, event: &ElementEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert!(ElementEventKind::SpooledNotAllowed.is_spool());
        assert!(ElementEventKind::ExceededIdletimeBackground.is_expiration());
        assert!(!ElementEventKind::SpooledDiskAvailable.is_expiration());
        assert_eq!(
            ElementEventKind::ExceededMaxlifeOnrequest.to_string(),
            "EXCEEDED_MAXLIFE_ONREQUEST"
        );
    }

    #[test]
    fn test_kind_serializes_as_screaming_snake() {
        let json = serde_json::to_string(&ElementEventKind::SpooledDiskNotAvailable).unwrap();
        assert_eq!(json, "\"SPOOLED_DISK_NOT_AVAILABLE\"");
    }

    #[test]
    fn test_collector() {
        let collector = ElementEventCollector::new();
        assert!(collector.is_empty());

        collector.handle_element_event(&ElementEvent::new(
            ElementEventKind::SpooledDiskAvailable,
            "users",
            "a",
        ));
        collector.handle_element_event(&ElementEvent::new(
            ElementEventKind::ExceededMaxlifeBackground,
            "users",
            "b",
        ));

        assert_eq!(collector.len(), 2);
        assert_eq!(
            collector.count_of(ElementEventKind::ExceededMaxlifeBackground),
            1
        );
        assert_eq!(
            collector.events_of_kind(ElementEventKind::SpooledDiskAvailable)[0].key,
            "a"
        );

        collector.clear();
        assert!(collector.is_empty());
    }

    #[test]
    fn test_logging_handler_does_not_panic() {
        let event = ElementEvent::new(ElementEventKind::SpooledNotAllowed, "r", "k");
        LoggingEventHandler::new().handle_element_event(&event);
        LoggingEventHandler::info_level().handle_element_event(&event);
    }
}
