//! Expiration Sweeper
//!
//! One background task per region with shrinking enabled. Each pass walks a
//! snapshot of the memory keys from least to most recently used and, for each
//! element read quietly:
//!
//! 1. removes it if max life or idle time is exceeded (background event)
//! 2. otherwise spools it out if it sat in memory longer than
//!    `max_memory_idle_seconds`, up to `max_spools_per_run` per pass
//!
//! A panicking pass is logged and the task carries on at the next tick.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use super::composite::CompositeCache;
use super::element::{now_millis, CacheElement};
use crate::error::{Error, Result};

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShrinkerState {
    Idle,
    Scanning,
}

/// Outcome of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShrinkReport {
    pub scanned: usize,
    pub expired: usize,
    pub spooled: usize,
}

/// Handle to a region's shrinker task
pub struct Shrinker {
    interval: Duration,
    scanning: Arc<AtomicBool>,
    passes: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Shrinker {
    /// Start shrinking `cache` on its configured interval
    pub fn start(cache: &Arc<CompositeCache>) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| Error::Internal(format!("shrinker needs a Tokio runtime: {}", e)))?;
        let period = cache.attributes().shrinker_interval();
        if period.is_zero() {
            return Err(Error::Config("shrinker interval must be positive".into()));
        }

        let scanning = Arc::new(AtomicBool::new(false));
        let passes = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();
        let task = handle.spawn(run(
            Arc::downgrade(cache),
            cache.name().to_string(),
            period,
            Arc::clone(&scanning),
            Arc::clone(&passes),
            cancel.clone(),
        ));

        Ok(Self {
            interval: period,
            scanning,
            passes,
            cancel,
            task,
        })
    }

    pub fn state(&self) -> ShrinkerState {
        if self.scanning.load(Ordering::Acquire) {
            ShrinkerState::Scanning
        } else {
            ShrinkerState::Idle
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Completed passes
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

#[instrument(skip(cache, scanning, passes, cancel))]
async fn run(
    cache: Weak<CompositeCache>,
    region: String,
    period: Duration,
    scanning: Arc<AtomicBool>,
    passes: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let Some(cache) = cache.upgrade() else {
                    break;
                };

                scanning.store(true, Ordering::Release);
                match std::panic::catch_unwind(AssertUnwindSafe(|| scan(&cache))) {
                    Ok(report) if report.expired + report.spooled > 0 => {
                        debug!(?report, "Shrinker pass finished");
                    }
                    Ok(_) => {}
                    Err(_) => error!("Shrinker pass panicked, retrying next interval"),
                }
                scanning.store(false, Ordering::Release);
                passes.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    debug!("Shrinker stopped");
}

/// One pass over `cache`'s memory tier
pub(crate) fn scan(cache: &CompositeCache) -> ShrinkReport {
    let attributes = cache.attributes();
    let max_idle = attributes.max_memory_idle();
    let budget = attributes.max_spools_per_run;
    let memory = cache.memory();
    let now = now_millis();

    let mut report = ShrinkReport::default();
    for key in memory.keys_by_recency().into_iter().rev() {
        let Some(element) = memory.get_quiet(&key) else {
            continue;
        };
        report.scanned += 1;

        if let Some(expiry) = element.attributes().expiry(now) {
            let taken = memory.take_if(&key, |current| {
                current.same_entry(&element) && current.attributes().expiry(now).is_some()
            });
            if taken.is_some() {
                element.notify(expiry.event_kind(true));
                report.expired += 1;
            }
            continue;
        }

        let Some(max_idle) = max_idle else {
            continue;
        };
        if element.attributes().idle_for(now) <= max_idle {
            continue;
        }
        let still_idle = |current: &CacheElement| {
            current.same_entry(&element) && current.attributes().idle_for(now) > max_idle
        };
        if let Some(element) = memory.take_if(&key, still_idle) {
            cache.spool_to_disk(element);
            report.spooled += 1;
            if budget.is_some_and(|b| report.spooled >= b) {
                break;
            }
        }
    }
    report
}
