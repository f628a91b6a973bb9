//! Remote Failover Controller
//!
//! Owns a region's connection to one remote server out of a prioritized list.
//!
//! # States
//!
//! ```text
//!   ALIVE(i) ──queue stops working / call fails──▶ ERROR(i)
//!   ERROR(i) ──restore to (i+1) mod N succeeds───▶ ALIVE(i+1 mod N)
//!   ERROR(i) ──restore to (i+1) mod N fails──────▶ ERROR(i+1 mod N)
//!   ALIVE(i>0) ──primary reachable again─────────▶ ALIVE(0)
//! ```
//!
//! Every successful restore builds a fresh event queue for the new server,
//! replays the zombie queue into it, then destroys the old queue. State is
//! guarded by one lock, shared by callers and the restoration task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{RemoteCacheListener, RemoteConnector, RemoteLocation, ZombieQueue};
use crate::cache::{AuxiliaryCache, CacheElement};
use crate::error::{Error, Result};
use crate::pool::WorkerPoolManager;
use crate::queue::{AuxiliaryListener, CacheEvent, CacheEventQueue, QueueConfig, QueueStats};

/// Failover behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Move back to the primary once it recovers
    pub restore_primary: bool,
    /// Time between restoration attempts
    pub restoration_interval_ms: u64,
    /// Operations held while disconnected
    pub zombie_capacity: usize,
    /// How long a replaced queue may drain before it is discarded
    pub destroy_wait_ms: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            restore_primary: true,
            restoration_interval_ms: 30_000,
            zombie_capacity: 1000,
            destroy_wait_ms: 1000,
        }
    }
}

impl FailoverConfig {
    pub fn restoration_interval(&self) -> Duration {
        Duration::from_millis(self.restoration_interval_ms)
    }

    pub fn destroy_wait(&self) -> Duration {
        Duration::from_millis(self.destroy_wait_ms)
    }
}

/// Connection state over the failover list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailoverStatus {
    Alive(usize),
    Error(usize),
}

impl FailoverStatus {
    pub fn index(&self) -> usize {
        match self {
            FailoverStatus::Alive(i) | FailoverStatus::Error(i) => *i,
        }
    }

    pub fn is_alive(&self) -> bool {
        matches!(self, FailoverStatus::Alive(_))
    }
}

impl std::fmt::Display for FailoverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailoverStatus::Alive(i) => write!(f, "ALIVE({})", i),
            FailoverStatus::Error(i) => write!(f, "ERROR({})", i),
        }
    }
}

struct Connection {
    index: usize,
    store: Arc<dyn AuxiliaryCache>,
    queue: Arc<CacheEventQueue>,
}

struct FailoverState {
    status: FailoverStatus,
    connection: Option<Connection>,
}

/// Remote connection with failover and restoration
pub struct FailoverController {
    region: String,
    servers: Vec<RemoteLocation>,
    connector: Arc<dyn RemoteConnector>,
    listener: Arc<RemoteCacheListener>,
    pools: Arc<WorkerPoolManager>,
    queue_config: QueueConfig,
    config: FailoverConfig,
    state: Mutex<FailoverState>,
    restoring: tokio::sync::Mutex<()>,
    zombies: ZombieQueue,
    disposed: AtomicBool,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FailoverController {
    /// Connect to the primary. An unreachable primary leaves the controller in
    /// `ERROR(0)`; the restoration task takes it from there.
    pub async fn connect(
        region: impl Into<String>,
        servers: Vec<RemoteLocation>,
        connector: Arc<dyn RemoteConnector>,
        listener: Arc<RemoteCacheListener>,
        pools: Arc<WorkerPoolManager>,
        queue_config: QueueConfig,
        config: FailoverConfig,
    ) -> Result<Arc<Self>> {
        if servers.is_empty() {
            return Err(Error::Config("failover list is empty".into()));
        }
        if config.restoration_interval_ms == 0 {
            return Err(Error::Config("restoration_interval_ms must be positive".into()));
        }
        queue_config.validate()?;

        let controller = Arc::new(Self {
            region: region.into(),
            zombies: ZombieQueue::new(config.zombie_capacity),
            servers,
            connector,
            listener,
            pools,
            queue_config,
            config,
            state: Mutex::new(FailoverState {
                status: FailoverStatus::Error(0),
                connection: None,
            }),
            restoring: tokio::sync::Mutex::new(()),
            disposed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        });

        match controller.open(0).await {
            Ok(connection) => controller.install(connection).await,
            Err(e) => warn!(
                region = %controller.region,
                server = %controller.servers[0],
                error = %e,
                "Primary remote server unavailable"
            ),
        }
        Ok(controller)
    }

    /// Spawn the restoration task on the current runtime
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let handle = Handle::try_current()
            .map_err(|e| Error::Internal(format!("failover needs a Tokio runtime: {}", e)))?;
        let task = handle.spawn(Self::run(
            Arc::downgrade(self),
            self.cancel.clone(),
            self.config.restoration_interval(),
        ));
        if let Some(old) = self.task.lock().replace(task) {
            old.abort();
        }
        Ok(())
    }

    async fn run(controller: Weak<Self>, cancel: CancellationToken, period: Duration) {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    let Some(controller) = controller.upgrade() else {
                        break;
                    };
                    controller.restore_once().await;
                }
            }
        }
        debug!("Failover restoration task exited");
    }

    async fn open(&self, index: usize) -> Result<Connection> {
        let location = &self.servers[index];
        let store = self
            .connector
            .add_listener(location, &self.region, Arc::clone(&self.listener))
            .await?;
        if !store.status().is_alive() {
            return Err(Error::RemoteUnavailable {
                location: location.to_string(),
                reason: format!("store reports {}", store.status()),
            });
        }

        let queue = CacheEventQueue::new(
            self.region.clone(),
            Arc::new(AuxiliaryListener::new(Arc::clone(&store))),
            self.queue_config.clone(),
            &self.pools,
        )?;
        Ok(Connection {
            index,
            store,
            queue: Arc::new(queue),
        })
    }

    /// Make `connection` current, replaying held operations into it first
    async fn install(&self, connection: Connection) {
        let index = connection.index;
        let (previous, replayed) = {
            let mut state = self.state.lock();
            let mut replayed = 0;
            while let Some(event) = self.zombies.pop() {
                if connection.queue.add_event(event).is_ok() {
                    replayed += 1;
                }
            }
            state.status = FailoverStatus::Alive(index);
            (state.connection.replace(connection), replayed)
        };

        info!(
            region = %self.region,
            server = %self.servers[index],
            index,
            replayed,
            "Remote connection established"
        );

        if let Some(previous) = previous {
            self.close(previous).await;
        }
    }

    async fn close(&self, connection: Connection) {
        connection.queue.destroy(self.config.destroy_wait()).await;
        let location = &self.servers[connection.index];
        if let Err(e) = self
            .connector
            .remove_listener(location, &self.region, self.listener.listener_id())
            .await
        {
            debug!(region = %self.region, server = %location, error = %e, "Could not remove listener");
        }
    }

    fn check_liveness(&self, state: &mut FailoverState) {
        if let FailoverStatus::Alive(index) = state.status {
            let healthy = state
                .connection
                .as_ref()
                .map(|c| c.queue.is_working() && c.store.status().is_alive())
                .unwrap_or(false);
            if !healthy {
                warn!(region = %self.region, server = %self.servers[index], "Remote connection lost");
                state.status = FailoverStatus::Error(index);
            }
        }
    }

    fn mark_failed(&self, index: usize, error: &Error) {
        let mut state = self.state.lock();
        if state.status == FailoverStatus::Alive(index) {
            warn!(region = %self.region, server = %self.servers[index], error = %error, "Remote call failed");
            state.status = FailoverStatus::Error(index);
        }
    }

    /// Current state, after checking the connection's queue and store
    pub fn status(&self) -> FailoverStatus {
        let mut state = self.state.lock();
        self.check_liveness(&mut state);
        state.status
    }

    /// Server the controller currently points at
    pub fn current(&self) -> &RemoteLocation {
        let index = self.state.lock().status.index();
        &self.servers[index]
    }

    pub fn servers(&self) -> &[RemoteLocation] {
        &self.servers
    }

    pub fn listener(&self) -> &Arc<RemoteCacheListener> {
        &self.listener
    }

    /// One restoration step; returns the resulting state
    #[instrument(skip(self), fields(region = %self.region))]
    pub async fn restore_once(&self) -> FailoverStatus {
        let _serial = self.restoring.lock().await;
        if self.disposed.load(Ordering::Acquire) {
            return self.status();
        }

        let status = self.status();
        let target = match status {
            FailoverStatus::Error(i) => (i + 1) % self.servers.len(),
            FailoverStatus::Alive(i) if i > 0 && self.config.restore_primary => 0,
            FailoverStatus::Alive(_) => return status,
        };

        match self.open(target).await {
            Ok(connection) => {
                self.install(connection).await;
                FailoverStatus::Alive(target)
            }
            Err(e) => {
                debug!(server = %self.servers[target], error = %e, "Restoration attempt failed");
                let mut state = self.state.lock();
                if let FailoverStatus::Error(_) = state.status {
                    state.status = FailoverStatus::Error(target);
                }
                state.status
            }
        }
    }

    fn connected(&self) -> Option<(usize, Arc<dyn AuxiliaryCache>)> {
        let mut state = self.state.lock();
        self.check_liveness(&mut state);
        match (&state.status, &state.connection) {
            (FailoverStatus::Alive(i), Some(connection)) => Some((*i, Arc::clone(&connection.store))),
            _ => None,
        }
    }

    /// Hand an operation to the current connection, or hold it until the next
    /// connection is installed.
    pub fn enqueue(&self, event: CacheEvent) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let mut state = self.state.lock();
        self.check_liveness(&mut state);
        if state.status.is_alive() {
            if let Some(connection) = &state.connection {
                if connection.queue.add_event(event.clone()).is_ok() {
                    return;
                }
            }
            let index = state.status.index();
            state.status = FailoverStatus::Error(index);
        }
        // held under the state lock so an install cannot drain in between
        self.zombies.push(event);
    }

    pub fn enqueue_update(&self, element: CacheElement) {
        self.enqueue(CacheEvent::Put(element));
    }

    pub fn enqueue_remove(&self, key: &str) {
        self.enqueue(CacheEvent::Remove(key.to_string()));
    }

    pub fn enqueue_remove_all(&self) {
        self.enqueue(CacheEvent::RemoveAll);
    }

    /// Read from the current server; any failure reads as a miss
    pub async fn get(&self, key: &str) -> Option<CacheElement> {
        let (index, store) = self.connected()?;
        match store.get(key).await {
            Ok(found) => found,
            Err(e) => {
                self.mark_failed(index, &e);
                None
            }
        }
    }

    pub async fn get_multiple(&self, keys: &[String]) -> HashMap<String, CacheElement> {
        let Some((index, store)) = self.connected() else {
            return HashMap::new();
        };
        store.get_multiple(keys).await.unwrap_or_else(|e| {
            self.mark_failed(index, &e);
            HashMap::new()
        })
    }

    pub async fn get_matching(&self, pattern: &str) -> HashMap<String, CacheElement> {
        let Some((index, store)) = self.connected() else {
            return HashMap::new();
        };
        store.get_matching(pattern).await.unwrap_or_else(|e| {
            self.mark_failed(index, &e);
            HashMap::new()
        })
    }

    /// Operations currently held for replay
    pub fn zombie_len(&self) -> usize {
        self.zombies.len()
    }

    /// Operations lost to zombie overflow
    pub fn zombie_dropped(&self) -> u64 {
        self.zombies.dropped()
    }

    pub fn queue_stats(&self) -> Option<QueueStats> {
        self.state.lock().connection.as_ref().map(|c| c.queue.stats())
    }

    /// Wait until the current queue has applied everything handed to it
    pub async fn flush(&self, timeout: Duration) -> bool {
        let queue = self.state.lock().connection.as_ref().map(|c| Arc::clone(&c.queue));
        match queue {
            Some(queue) => queue.flush(timeout).await,
            None => true,
        }
    }

    /// Stop restoration and release the connection. Server-side data is left
    /// alone.
    #[instrument(skip(self), fields(region = %self.region))]
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }

        let connection = {
            let mut state = self.state.lock();
            let index = state.status.index();
            state.status = FailoverStatus::Error(index);
            state.connection.take()
        };
        if let Some(connection) = connection {
            self.close(connection).await;
        }
        self.zombies.clear();
        info!("Remote connection disposed");
    }
}

impl Drop for FailoverController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryConnector;

    fn servers(n: usize) -> Vec<RemoteLocation> {
        (0..n).map(|i| RemoteLocation::new(format!("cache-{}", i), 1102)).collect()
    }

    fn fast_queue() -> QueueConfig {
        QueueConfig {
            max_failure: 1,
            wait_before_retry_ms: 1,
            ..QueueConfig::default()
        }
    }

    fn config() -> FailoverConfig {
        FailoverConfig {
            restoration_interval_ms: 3_600_000,
            destroy_wait_ms: 100,
            ..FailoverConfig::default()
        }
    }

    async fn controller(
        connector: &Arc<InMemoryConnector>,
        n: usize,
    ) -> Arc<FailoverController> {
        for location in servers(n) {
            connector.add_server(location);
        }
        FailoverController::connect(
            "r",
            servers(n),
            connector.clone(),
            Arc::new(RemoteCacheListener::detached("r")),
            Arc::new(WorkerPoolManager::new()),
            fast_queue(),
            config(),
        )
        .await
        .unwrap()
    }

    async fn wait_for_status(controller: &FailoverController, expected: FailoverStatus) -> bool {
        for _ in 0..200 {
            if controller.status() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_connects_to_primary() {
        let connector = Arc::new(InMemoryConnector::new());
        let controller = controller(&connector, 2).await;

        assert_eq!(controller.status(), FailoverStatus::Alive(0));
        assert_eq!(controller.current(), &servers(2)[0]);

        controller.enqueue_update(CacheElement::new("r", "a", "1"));
        assert!(controller.flush(Duration::from_secs(2)).await);
        assert!(connector.store(&servers(2)[0]).unwrap().contains("a"));
        assert_eq!(controller.get("a").await.unwrap().value().as_ref(), b"1");
    }

    #[tokio::test]
    async fn test_empty_failover_list_is_rejected() {
        let result = FailoverController::connect(
            "r",
            Vec::new(),
            Arc::new(InMemoryConnector::new()),
            Arc::new(RemoteCacheListener::detached("r")),
            Arc::new(WorkerPoolManager::new()),
            QueueConfig::default(),
            FailoverConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fails_over_to_secondary() {
        let connector = Arc::new(InMemoryConnector::new());
        let controller = controller(&connector, 2).await;
        let primary = &servers(2)[0];

        connector.set_up(primary, false);
        controller.enqueue_update(CacheElement::new("r", "a", "1"));
        assert!(wait_for_status(&controller, FailoverStatus::Error(0)).await);

        assert_eq!(controller.restore_once().await, FailoverStatus::Alive(1));
        assert_eq!(controller.status(), FailoverStatus::Alive(1));
        assert_eq!(controller.current(), &servers(2)[1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_zombie_replay_after_failover() {
        let connector = Arc::new(InMemoryConnector::new());
        let controller = controller(&connector, 2).await;
        connector.set_up(&servers(2)[0], false);

        // the read failure marks the connection down
        assert!(controller.get("x").await.is_none());
        assert_eq!(controller.status(), FailoverStatus::Error(0));

        controller.enqueue_update(CacheElement::new("r", "a", "1"));
        controller.enqueue_update(CacheElement::new("r", "b", "2"));
        controller.enqueue_remove("a");
        assert_eq!(controller.zombie_len(), 3);

        controller.restore_once().await;
        assert!(controller.flush(Duration::from_secs(2)).await);

        let secondary = connector.store(&servers(2)[1]).unwrap();
        assert!(!secondary.contains("a"));
        assert!(secondary.contains("b"));
        assert_eq!(controller.zombie_len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_updates_during_restore_are_not_stranded() {
        let connector = Arc::new(InMemoryConnector::new());
        let controller = controller(&connector, 2).await;
        connector.set_up(&servers(2)[0], false);
        controller.get("x").await;
        assert_eq!(controller.status(), FailoverStatus::Error(0));

        let writer = {
            let controller = Arc::clone(&controller);
            std::thread::spawn(move || {
                for i in 0..500 {
                    controller.enqueue_update(CacheElement::new("r", format!("k{}", i), "v"));
                }
            })
        };
        assert_eq!(controller.restore_once().await, FailoverStatus::Alive(1));
        writer.join().unwrap();

        assert_eq!(controller.zombie_len(), 0);
        assert!(controller.flush(Duration::from_secs(5)).await);
        let secondary = connector.store(&servers(2)[1]).unwrap();
        assert!((0..500).all(|i| secondary.contains(&format!("k{}", i))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_broken_queue_on_live_store_fails_over() {
        let connector = Arc::new(InMemoryConnector::new());
        let controller = controller(&connector, 2).await;
        let primary = &servers(2)[0];

        connector.set_rejecting(primary, true);
        controller.enqueue_update(CacheElement::new("r", "a", "1"));
        assert!(wait_for_status(&controller, FailoverStatus::Error(0)).await);
        assert!(connector.store(primary).unwrap().status().is_alive());
        assert!(!controller.queue_stats().unwrap().working);

        assert_eq!(controller.restore_once().await, FailoverStatus::Alive(1));
        controller.enqueue_update(CacheElement::new("r", "b", "2"));
        assert!(controller.flush(Duration::from_secs(2)).await);
        assert!(connector.store(&servers(2)[1]).unwrap().contains("b"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_restore_advances_index() {
        let connector = Arc::new(InMemoryConnector::new());
        let controller = controller(&connector, 3).await;
        for location in servers(3).iter().take(2) {
            connector.set_up(location, false);
        }

        controller.get("x").await;
        assert_eq!(controller.status(), FailoverStatus::Error(0));
        assert_eq!(controller.restore_once().await, FailoverStatus::Error(1));
        assert_eq!(controller.restore_once().await, FailoverStatus::Alive(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_restores_primary() {
        let connector = Arc::new(InMemoryConnector::new());
        let controller = controller(&connector, 2).await;
        let primary = servers(2)[0].clone();

        connector.set_up(&primary, false);
        controller.get("x").await;
        controller.restore_once().await;
        assert_eq!(controller.status(), FailoverStatus::Alive(1));

        // primary still down: stay on the secondary
        assert_eq!(controller.restore_once().await, FailoverStatus::Alive(1));

        connector.set_up(&primary, true);
        assert_eq!(controller.restore_once().await, FailoverStatus::Alive(0));
        assert_eq!(connector.listener_ids(&servers(2)[1]).len(), 0);
        assert_eq!(connector.listener_ids(&primary).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_restoration_task_runs_on_interval() {
        let connector = Arc::new(InMemoryConnector::new());
        for location in servers(2) {
            connector.add_server(location);
        }
        connector.set_up(&servers(2)[0], false);

        let controller = FailoverController::connect(
            "r",
            servers(2),
            connector.clone(),
            Arc::new(RemoteCacheListener::detached("r")),
            Arc::new(WorkerPoolManager::new()),
            fast_queue(),
            FailoverConfig {
                restoration_interval_ms: 20,
                ..config()
            },
        )
        .await
        .unwrap();
        assert_eq!(controller.status(), FailoverStatus::Error(0));

        controller.start().unwrap();
        assert!(wait_for_status(&controller, FailoverStatus::Alive(1)).await);
        controller.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispose_releases_connection() {
        let connector = Arc::new(InMemoryConnector::new());
        let controller = controller(&connector, 1).await;
        assert_eq!(connector.listener_ids(&servers(1)[0]).len(), 1);

        controller.dispose().await;
        assert!(!controller.status().is_alive());
        assert!(connector.listener_ids(&servers(1)[0]).is_empty());

        controller.enqueue_remove("a");
        assert_eq!(controller.zombie_len(), 0);
        controller.dispose().await;
    }
}
