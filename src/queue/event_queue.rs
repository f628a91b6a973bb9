//! Cache Event Queue
//!
//! An unbounded MPSC channel with exactly one consumer. In single mode the
//! consumer is a dedicated task that owns the receiver; in pooled mode a drain
//! job is submitted to a worker pool whenever events arrive and no drain is
//! already scheduled, so events for one target are still applied one at a time.
//!
//! A failing event is retried after `wait_before_retry` until the number of
//! consecutive failures reaches `max_failure`. The queue then stops working:
//! the backlog and later events are skipped and counted.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{CacheEvent, CacheListener, ListenerId, QueueConfig, QueueMode};
use crate::cache::CacheElement;
use crate::error::{Error, Result};
use crate::pool::{WorkerPool, WorkerPoolManager};

/// Queue statistics
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub region: String,
    pub listener_id: u64,
    pub mode: QueueMode,
    pub working: bool,
    pub alive: bool,
    pub size: usize,
    pub processed: u64,
    pub failures: u64,
    pub skipped: u64,
}

struct Shared {
    region: String,
    listener: Arc<dyn CacheListener>,
    listener_id: ListenerId,
    config: QueueConfig,
    tx: mpsc::UnboundedSender<CacheEvent>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<CacheEvent>>,
    pool: Option<Arc<WorkerPool>>,
    accepting: AtomicBool,
    working: AtomicBool,
    draining: AtomicBool,
    stop: CancellationToken,
    consecutive_failures: AtomicU32,
    pending: AtomicUsize,
    idle: Notify,
    processed: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
}

impl Shared {
    async fn process(&self, event: CacheEvent) {
        if self.working.load(Ordering::Acquire) && !self.stop.is_cancelled() {
            self.dispatch(&event).await;
        } else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
        }
        if matches!(event, CacheEvent::Dispose) {
            self.accepting.store(false, Ordering::Release);
        }
        self.finish_one();
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn dispatch(&self, event: &CacheEvent) {
        loop {
            match self.apply(event).await {
                Ok(()) => {
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    self.processed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    let attempts = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    if attempts >= self.config.max_failure {
                        self.working.store(false, Ordering::Release);
                        self.skipped.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            region = %self.region,
                            listener = %self.listener_id,
                            event = event.name(),
                            attempts,
                            error = %e,
                            "Event queue stopped working"
                        );
                        return;
                    }

                    debug!(
                        region = %self.region,
                        listener = %self.listener_id,
                        event = event.name(),
                        attempts,
                        error = %e,
                        "Event failed, retrying"
                    );
                    tokio::select! {
                        _ = self.stop.cancelled() => return,
                        _ = tokio::time::sleep(self.config.wait_before_retry()) => {}
                    }
                }
            }
        }
    }

    async fn apply(&self, event: &CacheEvent) -> Result<()> {
        match event {
            CacheEvent::Put(element) => self.listener.handle_put(element.clone()).await,
            CacheEvent::Remove(key) => self.listener.handle_remove(&self.region, key).await,
            CacheEvent::RemoveAll => self.listener.handle_remove_all(&self.region).await,
            CacheEvent::Dispose => self.listener.handle_dispose(&self.region).await,
        }
    }

    async fn drain(&self) {
        let mut rx = self.rx.lock().await;
        while !self.stop.is_cancelled() {
            match rx.try_recv() {
                Ok(event) => self.process(event).await,
                Err(_) => break,
            }
        }
    }

    fn schedule_drain(self: &Arc<Self>) {
        let Some(pool) = &self.pool else {
            return;
        };
        if self.stop.is_cancelled() || self.draining.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropped with the job if the pool discards it or shuts down
        let guard = DrainGuard {
            shared: Arc::clone(self),
            finished: false,
        };
        let job = async move {
            let mut guard = guard;
            guard.shared.drain().await;
            guard.finished = true;
        };
        if let Err(e) = pool.spawn(job) {
            warn!(
                region = %self.region,
                listener = %self.listener_id,
                error = %e,
                "Could not schedule event queue drain"
            );
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct DrainGuard {
    shared: Arc<Shared>,
    finished: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        self.shared.draining.store(false, Ordering::Release);
        // events that raced with the end of the drain
        if self.finished && self.shared.pending.load(Ordering::Acquire) > 0 {
            self.shared.schedule_drain();
        }
    }
}

async fn consume(shared: Arc<Shared>) {
    let mut rx = shared.rx.lock().await;
    loop {
        let event = tokio::select! {
            _ = shared.stop.cancelled() => break,
            event = rx.recv() => event,
        };
        match event {
            Some(event) => shared.process(event).await,
            None => break,
        }
    }
    debug!(region = %shared.region, listener = %shared.listener_id, "Event queue consumer exited");
}

/// Ordered, single-consumer event queue for one target
pub struct CacheEventQueue {
    shared: Arc<Shared>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl CacheEventQueue {
    /// Create a queue feeding `listener`. Pooled queues borrow workers from
    /// `pools`; single-mode queues spawn their consumer on the current runtime.
    pub fn new(
        region: impl Into<String>,
        listener: Arc<dyn CacheListener>,
        config: QueueConfig,
        pools: &WorkerPoolManager,
    ) -> Result<Self> {
        config.validate()?;
        let region = region.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let pool = match config.mode {
            QueueMode::Pooled => Some(pools.pool(&config.pool_name)?),
            QueueMode::Single => None,
        };

        let shared = Arc::new(Shared {
            listener_id: listener.listener_id(),
            region,
            listener,
            config,
            tx,
            rx: AsyncMutex::new(rx),
            pool,
            accepting: AtomicBool::new(true),
            working: AtomicBool::new(true),
            draining: AtomicBool::new(false),
            stop: CancellationToken::new(),
            consecutive_failures: AtomicU32::new(0),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            processed: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        });

        let consumer = match shared.config.mode {
            QueueMode::Single => {
                let handle = Handle::try_current().map_err(|e| {
                    Error::Internal(format!("event queue needs a Tokio runtime: {}", e))
                })?;
                Some(handle.spawn(consume(Arc::clone(&shared))))
            }
            QueueMode::Pooled => None,
        };

        debug!(
            region = %shared.region,
            listener = %shared.listener_id,
            mode = ?shared.config.mode,
            "Event queue created"
        );

        Ok(Self {
            shared,
            consumer: Mutex::new(consumer),
            destroyed: AtomicBool::new(false),
        })
    }

    fn enqueue(&self, event: CacheEvent) -> Result<()> {
        let shared = &self.shared;
        if !shared.accepting.load(Ordering::Acquire) {
            debug!(
                region = %shared.region,
                listener = %shared.listener_id,
                event = event.name(),
                "Event queue not accepting, event dropped"
            );
            return Err(Error::QueueClosed {
                listener: shared.listener_id.0,
            });
        }
        if !shared.working.load(Ordering::Acquire) {
            shared.skipped.fetch_add(1, Ordering::Relaxed);
            return Err(Error::QueueClosed {
                listener: shared.listener_id.0,
            });
        }

        shared.pending.fetch_add(1, Ordering::AcqRel);
        if shared.tx.send(event).is_err() {
            shared.finish_one();
            return Err(Error::QueueClosed {
                listener: shared.listener_id.0,
            });
        }
        shared.schedule_drain();
        Ok(())
    }

    pub fn add_put_event(&self, element: CacheElement) -> Result<()> {
        self.enqueue(CacheEvent::Put(element))
    }

    pub fn add_remove_event(&self, key: impl Into<String>) -> Result<()> {
        self.enqueue(CacheEvent::Remove(key.into()))
    }

    pub fn add_remove_all_event(&self) -> Result<()> {
        self.enqueue(CacheEvent::RemoveAll)
    }

    /// Queue a dispose for the target; nothing is accepted after it
    pub fn add_dispose_event(&self) -> Result<()> {
        let result = self.enqueue(CacheEvent::Dispose);
        self.shared.accepting.store(false, Ordering::Release);
        result
    }

    /// Re-queue an event taken from elsewhere (zombie replay)
    pub fn add_event(&self, event: CacheEvent) -> Result<()> {
        match event {
            CacheEvent::Dispose => self.add_dispose_event(),
            other => self.enqueue(other),
        }
    }

    /// Wait until everything queued so far has been handled
    pub async fn flush(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.shared.wait_idle())
            .await
            .is_ok()
    }

    /// Stop accepting events, wait up to `wait` for the backlog, then stop the
    /// consumer. Calling it again does nothing.
    #[instrument(skip(self), fields(region = %self.shared.region, listener = %self.shared.listener_id))]
    pub async fn destroy(&self, wait: Duration) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = &self.shared;
        shared.accepting.store(false, Ordering::Release);

        if !wait.is_zero()
            && shared.working.load(Ordering::Acquire)
            && tokio::time::timeout(wait, shared.wait_idle()).await.is_err()
        {
            warn!(pending = self.size(), "Event queue backlog not drained, discarding");
        }

        shared.stop.cancel();
        if let Some(handle) = self.consumer.lock().take() {
            handle.abort();
        }
        info!(
            processed = shared.processed.load(Ordering::Relaxed),
            skipped = shared.skipped.load(Ordering::Relaxed),
            "Event queue destroyed"
        );
    }

    /// False once failures reached the threshold
    pub fn is_working(&self) -> bool {
        self.shared.working.load(Ordering::Acquire)
    }

    /// Accepting events and not destroyed
    pub fn is_alive(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire) && self.shared.accepting.load(Ordering::Acquire)
    }

    /// Events enqueued but not yet handled
    pub fn size(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn listener_id(&self) -> ListenerId {
        self.shared.listener_id
    }

    pub fn region(&self) -> &str {
        &self.shared.region
    }

    pub fn mode(&self) -> QueueMode {
        self.shared.config.mode
    }

    pub fn stats(&self) -> QueueStats {
        let shared = &self.shared;
        QueueStats {
            region: shared.region.clone(),
            listener_id: shared.listener_id.0,
            mode: shared.config.mode,
            working: self.is_working(),
            alive: self.is_alive(),
            size: self.size(),
            processed: shared.processed.load(Ordering::Relaxed),
            failures: shared.failures.load(Ordering::Relaxed),
            skipped: shared.skipped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for CacheEventQueue {
    fn drop(&mut self) {
        self.shared.stop.cancel();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::collections::HashMap;

    /// Records every call in order; can fail a number of calls or all of them
    struct RecordingListener {
        id: ListenerId,
        calls: Mutex<Vec<String>>,
        fail_next: AtomicU32,
        fail_always: AtomicBool,
        delay: Duration,
    }

    impl RecordingListener {
        fn new() -> Arc<Self> {
            Self::with_delay(Duration::ZERO)
        }

        fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                id: ListenerId::next(),
                calls: Mutex::new(Vec::new()),
                fail_next: AtomicU32::new(0),
                fail_always: AtomicBool::new(false),
                delay,
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        async fn record(&self, call: String) -> Result<()> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_always.load(Ordering::SeqCst) {
                return Err(Error::store("recording", "down"));
            }
            if self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::store("recording", "flaky"));
            }
            self.calls.lock().push(call);
            Ok(())
        }
    }

    #[async_trait]
    impl CacheListener for RecordingListener {
        fn listener_id(&self) -> ListenerId {
            self.id
        }

        async fn handle_put(&self, element: CacheElement) -> Result<()> {
            self.record(format!("put:{}", element.key())).await
        }

        async fn handle_remove(&self, _region: &str, key: &str) -> Result<()> {
            self.record(format!("remove:{}", key)).await
        }

        async fn handle_remove_all(&self, _region: &str) -> Result<()> {
            self.record("remove_all".to_string()).await
        }

        async fn handle_dispose(&self, _region: &str) -> Result<()> {
            self.record("dispose".to_string()).await
        }
    }

    fn fast_retry(mode: QueueMode) -> QueueConfig {
        QueueConfig {
            mode,
            pool_name: "test-queue-pool".to_string(),
            max_failure: 3,
            wait_before_retry_ms: 5,
        }
    }

    fn pools() -> WorkerPoolManager {
        let mut configs = HashMap::new();
        configs.insert(
            "test-queue-pool".to_string(),
            PoolConfig {
                max_pool_size: 4,
                min_pool_size: 0,
                start_up_size: 1,
                ..PoolConfig::default()
            },
        );
        WorkerPoolManager::with_configs(PoolConfig::default(), configs)
    }

    fn enqueue_mixed(queue: &CacheEventQueue, n: usize) -> Vec<String> {
        let mut expected = Vec::with_capacity(n);
        for i in 0..n {
            let key = format!("k{}", i);
            if i % 3 == 2 {
                queue.add_remove_event(key.clone()).unwrap();
                expected.push(format!("remove:{}", key));
            } else {
                queue
                    .add_put_event(CacheElement::new("r", key.clone(), "v"))
                    .unwrap();
                expected.push(format!("put:{}", key));
            }
        }
        expected
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_mode_preserves_order() {
        let pools = pools();
        let listener = RecordingListener::new();
        let queue =
            CacheEventQueue::new("r", listener.clone(), fast_retry(QueueMode::Single), &pools)
                .unwrap();

        let expected = enqueue_mixed(&queue, 100);
        assert!(queue.flush(Duration::from_secs(5)).await);
        assert_eq!(listener.calls(), expected);
        assert_eq!(queue.stats().processed, 100);
        assert!(queue.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pooled_mode_preserves_order_per_queue() {
        let pools = pools();
        let listeners: Vec<_> = (0..3).map(|_| RecordingListener::new()).collect();
        let queues: Vec<_> = listeners
            .iter()
            .map(|l| {
                CacheEventQueue::new("r", l.clone(), fast_retry(QueueMode::Pooled), &pools)
                    .unwrap()
            })
            .collect();

        let expected: Vec<_> = queues.iter().map(|q| enqueue_mixed(q, 200)).collect();
        for queue in &queues {
            assert!(queue.flush(Duration::from_secs(5)).await);
            assert_eq!(queue.mode(), QueueMode::Pooled);
        }
        for (listener, expected) in listeners.iter().zip(expected) {
            assert_eq!(listener.calls(), expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_retry_recovers_from_transient_failure() {
        let pools = pools();
        let listener = RecordingListener::new();
        listener.fail_next.store(2, Ordering::SeqCst);
        let queue =
            CacheEventQueue::new("r", listener.clone(), fast_retry(QueueMode::Single), &pools)
                .unwrap();

        queue.add_put_event(CacheElement::new("r", "a", "v")).unwrap();
        queue.add_put_event(CacheElement::new("r", "b", "v")).unwrap();
        assert!(queue.flush(Duration::from_secs(5)).await);

        assert!(queue.is_working());
        assert_eq!(listener.calls(), vec!["put:a", "put:b"]);
        assert_eq!(queue.stats().failures, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_threshold_stops_working() {
        let pools = pools();
        let listener = RecordingListener::new();
        listener.fail_always.store(true, Ordering::SeqCst);
        let queue =
            CacheEventQueue::new("r", listener.clone(), fast_retry(QueueMode::Single), &pools)
                .unwrap();

        queue.add_put_event(CacheElement::new("r", "a", "v")).unwrap();
        queue.add_put_event(CacheElement::new("r", "b", "v")).unwrap();
        assert!(queue.flush(Duration::from_secs(5)).await);

        assert!(!queue.is_working());
        assert_matches!(
            queue.add_remove_event("a"),
            Err(Error::QueueClosed { .. })
        );

        let stats = queue.stats();
        assert_eq!(stats.failures, 3);
        // failed event, queued event, rejected event
        assert_eq!(stats.skipped, 3);
        assert!(listener.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_destroy_waits_for_backlog() {
        let pools = pools();
        let listener = RecordingListener::with_delay(Duration::from_millis(2));
        let queue =
            CacheEventQueue::new("r", listener.clone(), fast_retry(QueueMode::Single), &pools)
                .unwrap();

        let expected = enqueue_mixed(&queue, 20);
        queue.destroy(Duration::from_secs(5)).await;

        assert_eq!(listener.calls(), expected);
        assert!(!queue.is_alive());
        assert_matches!(
            queue.add_put_event(CacheElement::new("r", "late", "v")),
            Err(Error::QueueClosed { .. })
        );

        // idempotent
        queue.destroy(Duration::from_secs(5)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_destroy_without_wait_discards_backlog() {
        let pools = pools();
        let listener = RecordingListener::with_delay(Duration::from_millis(50));
        let queue =
            CacheEventQueue::new("r", listener.clone(), fast_retry(QueueMode::Single), &pools)
                .unwrap();

        enqueue_mixed(&queue, 10);
        queue.destroy(Duration::ZERO).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(listener.calls().len() < 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispose_event_closes_queue() {
        let pools = pools();
        let listener = RecordingListener::new();
        let queue =
            CacheEventQueue::new("r", listener.clone(), fast_retry(QueueMode::Pooled), &pools)
                .unwrap();

        queue.add_remove_all_event().unwrap();
        queue.add_dispose_event().unwrap();
        assert!(!queue.is_alive());
        assert!(queue.add_remove_all_event().is_err());

        assert!(queue.flush(Duration::from_secs(5)).await);
        assert_eq!(listener.calls(), vec!["remove_all", "dispose"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_fifo_delivery(ops in prop::collection::vec((any::<bool>(), 0u8..16), 1..64), pooled in any::<bool>()) {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            let calls = rt.block_on(async {
                let pools = pools();
                let listener = RecordingListener::new();
                let mode = if pooled { QueueMode::Pooled } else { QueueMode::Single };
                let queue = CacheEventQueue::new("r", listener.clone(), fast_retry(mode), &pools).unwrap();
                for (is_put, key) in &ops {
                    if *is_put {
                        queue.add_put_event(CacheElement::new("r", key.to_string(), "v")).unwrap();
                    } else {
                        queue.add_remove_event(key.to_string()).unwrap();
                    }
                }
                queue.flush(Duration::from_secs(5)).await;
                queue.destroy(Duration::ZERO).await;
                pools.shutdown();
                listener.calls()
            });

            let expected: Vec<String> = ops
                .iter()
                .map(|(is_put, key)| if *is_put { format!("put:{}", key) } else { format!("remove:{}", key) })
                .collect();
            prop_assert_eq!(calls, expected);
        }
    }
}
