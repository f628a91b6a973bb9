//! Worker Pools
//!
//! Named pools of Tokio worker tasks shared by every region. Pooled event
//! queues borrow workers from here to drain their backlog.
//!
//! # Design
//!
//! - One pool per name, created lazily by [`WorkerPoolManager::pool`]
//! - A bounded job queue (`boundary_size`) with a policy for when it is full
//! - Workers grow on demand up to `max_pool_size`; idle workers above
//!   `min_pool_size` exit after `keep_alive_time_ms`
//! - Shutdown cancels queued and in-flight jobs
//!
//! The manager is an ordinary value owned by the composition root
//! ([`CacheHub`](crate::hub::CacheHub)) and passed by reference, not a global.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// A unit of work run by a pool
pub type Job = BoxFuture<'static, ()>;

/// What to do with a job when the bounded queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhenBlockedPolicy {
    /// Reject the job with [`Error::PoolSaturated`]
    Abort,
    /// Run the job immediately outside the pool's worker limit
    Run,
    /// Drop the oldest queued job to make room
    DiscardOldest,
    /// Drop the new job
    Discard,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Bound the job queue
    pub use_boundary: bool,
    /// Job queue bound
    pub boundary_size: usize,
    /// Upper limit on workers
    pub max_pool_size: usize,
    /// Workers kept alive while idle
    pub min_pool_size: usize,
    /// Idle time after which a worker above the minimum exits
    pub keep_alive_time_ms: u64,
    /// Policy when the queue is full
    pub when_blocked_policy: WhenBlockedPolicy,
    /// Workers started with the pool
    pub start_up_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            use_boundary: true,
            boundary_size: 2000,
            max_pool_size: 150,
            min_pool_size: 4,
            keep_alive_time_ms: 300_000,
            when_blocked_policy: WhenBlockedPolicy::Run,
            start_up_size: 4,
        }
    }
}

impl PoolConfig {
    /// Keep-alive as a duration
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_time_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_pool_size == 0 {
            return Err(Error::Config("max_pool_size must be at least 1".into()));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(Error::Config(format!(
                "min_pool_size ({}) exceeds max_pool_size ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        if self.use_boundary && self.boundary_size == 0 {
            return Err(Error::Config(
                "boundary_size must be at least 1 when use_boundary is set".into(),
            ));
        }
        Ok(())
    }
}

/// Pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub name: String,
    pub workers: usize,
    pub idle: usize,
    pub queued: usize,
    pub executed: u64,
    pub discarded: u64,
    pub rejected: u64,
}

struct PoolState {
    jobs: VecDeque<Job>,
    workers: usize,
    idle: usize,
}

enum Wake {
    Notified,
    TimedOut,
    Cancelled,
}

/// A named pool of worker tasks
pub struct WorkerPool {
    name: String,
    config: PoolConfig,
    state: Mutex<PoolState>,
    notify: Notify,
    cancel: CancellationToken,
    handle: Handle,
    executed: AtomicU64,
    discarded: AtomicU64,
    rejected: AtomicU64,
}

impl WorkerPool {
    /// Create a pool on the given runtime and start its start-up workers
    pub fn new(name: impl Into<String>, config: PoolConfig, handle: Handle) -> Arc<Self> {
        let start_up = config.start_up_size.min(config.max_pool_size);
        let pool = Arc::new(Self {
            name: name.into(),
            config,
            state: Mutex::new(PoolState {
                jobs: VecDeque::new(),
                workers: start_up,
                idle: 0,
            }),
            notify: Notify::new(),
            cancel: CancellationToken::new(),
            handle,
            executed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        });

        for _ in 0..start_up {
            pool.spawn_worker();
        }
        debug!(pool = %pool.name, workers = start_up, "Worker pool started");
        pool
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Submit a job
    pub fn execute(self: &Arc<Self>, job: Job) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::PoolShutdown(self.name.clone()));
        }

        let mut state = self.state.lock();
        if self.config.use_boundary && state.jobs.len() >= self.config.boundary_size {
            match self.config.when_blocked_policy {
                WhenBlockedPolicy::Abort => {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(Error::PoolSaturated {
                        pool: self.name.clone(),
                        queued: state.jobs.len(),
                    });
                }
                WhenBlockedPolicy::Run => {
                    drop(state);
                    self.run_outside(job);
                    return Ok(());
                }
                WhenBlockedPolicy::DiscardOldest => {
                    state.jobs.pop_front();
                    self.discarded.fetch_add(1, Ordering::Relaxed);
                    debug!(pool = %self.name, "Discarded oldest queued job");
                }
                WhenBlockedPolicy::Discard => {
                    drop(state);
                    self.discarded.fetch_add(1, Ordering::Relaxed);
                    debug!(pool = %self.name, "Discarded new job");
                    return Ok(());
                }
            }
        }

        state.jobs.push_back(job);
        if state.idle > 0 {
            drop(state);
            self.notify.notify_one();
        } else if state.workers < self.config.max_pool_size {
            state.workers += 1;
            drop(state);
            self.spawn_worker();
        }
        Ok(())
    }

    /// Submit a future, boxing it
    pub fn spawn<F>(self: &Arc<Self>, future: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.execute(future.boxed())
    }

    fn run_outside(&self, job: Job) {
        let cancel = self.cancel.clone();
        let name = self.name.clone();
        self.handle.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = AssertUnwindSafe(job).catch_unwind() => {
                    if result.is_err() {
                        error!(pool = %name, "Job panicked");
                    }
                }
            }
        });
    }

    fn spawn_worker(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        self.handle.spawn(async move { pool.work().await });
    }

    async fn work(self: Arc<Self>) {
        loop {
            let job = {
                let mut state = self.state.lock();
                let job = state.jobs.pop_front();
                if job.is_none() {
                    state.idle += 1;
                }
                job
            };

            match job {
                Some(job) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        result = AssertUnwindSafe(job).catch_unwind() => {
                            self.executed.fetch_add(1, Ordering::Relaxed);
                            if result.is_err() {
                                error!(pool = %self.name, "Job panicked");
                            }
                        }
                    }
                }
                None => {
                    let wake = tokio::select! {
                        _ = self.cancel.cancelled() => Wake::Cancelled,
                        _ = self.notify.notified() => Wake::Notified,
                        _ = tokio::time::sleep(self.config.keep_alive()) => Wake::TimedOut,
                    };

                    let mut state = self.state.lock();
                    state.idle = state.idle.saturating_sub(1);
                    match wake {
                        Wake::Cancelled => break,
                        Wake::Notified => {}
                        Wake::TimedOut => {
                            if state.jobs.is_empty() && state.workers > self.config.min_pool_size {
                                state.workers -= 1;
                                debug!(pool = %self.name, workers = state.workers, "Idle worker exiting");
                                return;
                            }
                        }
                    }
                }
            }
        }

        let mut state = self.state.lock();
        state.workers = state.workers.saturating_sub(1);
    }

    /// Cancel queued and running jobs; further submissions fail
    pub fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let dropped = {
            let mut state = self.state.lock();
            let n = state.jobs.len();
            state.jobs.clear();
            n
        };
        info!(pool = %self.name, dropped, "Worker pool shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            name: self.name.clone(),
            workers: state.workers,
            idle: state.idle,
            queued: state.jobs.len(),
            executed: self.executed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Registry of named worker pools
pub struct WorkerPoolManager {
    default_config: PoolConfig,
    configs: HashMap<String, PoolConfig>,
    pools: DashMap<String, Arc<WorkerPool>>,
}

impl WorkerPoolManager {
    /// Create a manager where every pool uses the default configuration
    pub fn new() -> Self {
        Self::with_configs(PoolConfig::default(), HashMap::new())
    }

    /// Create a manager with per-name configurations
    pub fn with_configs(default_config: PoolConfig, configs: HashMap<String, PoolConfig>) -> Self {
        Self {
            default_config,
            configs,
            pools: DashMap::new(),
        }
    }

    /// Configuration that applies to `name`
    pub fn config_for(&self, name: &str) -> &PoolConfig {
        self.configs.get(name).unwrap_or(&self.default_config)
    }

    /// Get the pool called `name`, creating it on the current Tokio runtime
    /// the first time it is asked for.
    pub fn pool(&self, name: &str) -> Result<Arc<WorkerPool>> {
        if let Some(pool) = self.pools.get(name) {
            return Ok(Arc::clone(pool.value()));
        }

        let config = self.config_for(name).clone();
        config.validate()?;
        let entry = self.pools.entry(name.to_string()).or_try_insert_with(|| {
            let handle = Handle::try_current().map_err(|e| {
                Error::Internal(format!("worker pool '{}' needs a Tokio runtime: {}", name, e))
            })?;
            Ok::<_, Error>(WorkerPool::new(name, config, handle))
        })?;
        Ok(Arc::clone(entry.value()))
    }

    /// Names of pools created so far
    pub fn pool_names(&self) -> Vec<String> {
        self.pools.iter().map(|p| p.key().clone()).collect()
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools.iter().map(|p| p.value().stats()).collect()
    }

    /// Shut down every pool and forget them
    pub fn shutdown(&self) {
        for pool in self.pools.iter() {
            pool.value().shutdown();
        }
        self.pools.clear();
    }
}

impl Default for WorkerPoolManager {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================


impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
