//! Remote Tier
//!
//! A region reaches remote cache servers through a [`RemoteConnector`], which
//! registers the region's [`RemoteCacheListener`] with a server and hands back
//! an auxiliary store speaking to it. The [`FailoverController`] owns that
//! connection, walks a prioritized server list when it fails, and holds
//! operations issued mid-failover in a bounded [`ZombieQueue`].
//!
//! Wire transports live behind [`RemoteConnector`]; [`InMemoryConnector`]
//! simulates a set of servers in-process.

mod failover;
mod listener;
mod zombie;

pub use failover::{FailoverConfig, FailoverController, FailoverStatus};
pub use listener::RemoteCacheListener;
pub use zombie::ZombieQueue;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{AuxiliaryCache, AuxiliaryKind, CacheElement, CacheStatus, InMemoryAuxiliary};
use crate::error::{Error, Result};
use crate::queue::ListenerId;

/// Address of a remote cache server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteLocation {
    pub host: String,
    pub port: u16,
}

impl RemoteLocation {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a comma separated `host:port` list
    pub fn parse_list(list: &str) -> Result<Vec<Self>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for RemoteLocation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::Config(format!("remote location '{}' is not host:port", s)))?;
        if host.is_empty() {
            return Err(Error::Config(format!("remote location '{}' has no host", s)));
        }
        let port = port
            .parse()
            .map_err(|e| Error::Config(format!("remote location '{}': bad port: {}", s, e)))?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for RemoteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Registers listeners with remote servers
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Register `listener` for `region` at `location` and return a store that
    /// forwards operations to that server.
    async fn add_listener(
        &self,
        location: &RemoteLocation,
        region: &str,
        listener: Arc<RemoteCacheListener>,
    ) -> Result<Arc<dyn AuxiliaryCache>>;

    /// Deregister a listener
    async fn remove_listener(
        &self,
        location: &RemoteLocation,
        region: &str,
        listener: ListenerId,
    ) -> Result<()>;
}

type Listeners = Arc<Mutex<Vec<Arc<RemoteCacheListener>>>>;

struct SimulatedServer {
    store: Arc<InMemoryAuxiliary>,
    up: AtomicBool,
    rejecting: Arc<AtomicBool>,
    listeners: Listeners,
}

/// In-process stand-in for a set of remote servers.
///
/// Each server is an [`InMemoryAuxiliary`] with an up/down switch. Taking a
/// server down makes its store fail and refuses new registrations. Writes
/// made through one registration are pushed to every other listener of the
/// same region, the way a cache server fans out to its clients.
#[derive(Default)]
pub struct InMemoryConnector {
    servers: DashMap<RemoteLocation, SimulatedServer>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server that is up
    pub fn add_server(&self, location: RemoteLocation) {
        let store = Arc::new(InMemoryAuxiliary::new(location.to_string(), AuxiliaryKind::Remote));
        self.servers.insert(
            location,
            SimulatedServer {
                store,
                up: AtomicBool::new(true),
                rejecting: Arc::new(AtomicBool::new(false)),
                listeners: Arc::new(Mutex::new(Vec::new())),
            },
        );
    }

    /// Bring a server up or down
    pub fn set_up(&self, location: &RemoteLocation, up: bool) {
        if let Some(server) = self.servers.get(location) {
            server.up.store(up, Ordering::SeqCst);
            server.store.set_failing(!up);
        }
    }

    /// Make a server refuse writes while still reporting itself alive
    pub fn set_rejecting(&self, location: &RemoteLocation, rejecting: bool) {
        if let Some(server) = self.servers.get(location) {
            server.rejecting.store(rejecting, Ordering::SeqCst);
        }
    }

    /// Backing store of a server
    pub fn store(&self, location: &RemoteLocation) -> Option<Arc<InMemoryAuxiliary>> {
        self.servers.get(location).map(|s| Arc::clone(&s.store))
    }

    /// Ids of listeners registered at a server
    pub fn listener_ids(&self, location: &RemoteLocation) -> Vec<ListenerId> {
        self.servers
            .get(location)
            .map(|s| s.listeners.lock().iter().map(|l| l.listener_id()).collect())
            .unwrap_or_default()
    }

    /// Fan a put out to every listener registered at `location`, as a server
    /// would after accepting it from `requester`.
    pub fn broadcast_put(
        &self,
        location: &RemoteLocation,
        element: &CacheElement,
        requester: ListenerId,
    ) -> usize {
        let listeners = match self.servers.get(location) {
            Some(server) => Arc::clone(&server.listeners),
            None => return 0,
        };
        fan_out_put(&listeners, element, requester)
    }
}

fn region_listeners(listeners: &Listeners, region: &str) -> Vec<Arc<RemoteCacheListener>> {
    listeners
        .lock()
        .iter()
        .filter(|l| l.region() == region)
        .cloned()
        .collect()
}

fn fan_out_put(listeners: &Listeners, element: &CacheElement, requester: ListenerId) -> usize {
    region_listeners(listeners, element.region())
        .iter()
        .filter(|l| l.handle_put(element.clone(), requester).is_ok())
        .count()
}

/// One listener's session with a simulated server
struct ServerConnection {
    requester: ListenerId,
    region: String,
    location: String,
    store: Arc<InMemoryAuxiliary>,
    rejecting: Arc<AtomicBool>,
    listeners: Listeners,
}

impl ServerConnection {
    fn check_accepting(&self) -> Result<()> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(Error::Store {
                store: self.location.clone(),
                reason: "write rejected".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AuxiliaryCache for ServerConnection {
    fn name(&self) -> &str {
        self.store.name()
    }

    fn kind(&self) -> AuxiliaryKind {
        AuxiliaryKind::Remote
    }

    async fn get(&self, key: &str) -> Result<Option<CacheElement>> {
        self.store.get(key).await
    }

    async fn get_multiple(&self, keys: &[String]) -> Result<HashMap<String, CacheElement>> {
        self.store.get_multiple(keys).await
    }

    async fn get_matching(&self, pattern: &str) -> Result<HashMap<String, CacheElement>> {
        self.store.get_matching(pattern).await
    }

    async fn update(&self, element: CacheElement) -> Result<()> {
        self.check_accepting()?;
        self.store.update(element.clone()).await?;
        fan_out_put(&self.listeners, &element, self.requester);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        self.check_accepting()?;
        let removed = self.store.remove(key).await?;
        for listener in region_listeners(&self.listeners, &self.region) {
            if let Err(e) = listener.handle_remove(key, self.requester) {
                debug!(listener = %listener.listener_id(), error = %e, "Remove not applied by peer");
            }
        }
        Ok(removed)
    }

    async fn remove_all(&self) -> Result<()> {
        self.check_accepting()?;
        self.store.remove_all().await?;
        for listener in region_listeners(&self.listeners, &self.region) {
            if let Err(e) = listener.handle_remove_all(self.requester) {
                debug!(listener = %listener.listener_id(), error = %e, "Remove-all not applied by peer");
            }
        }
        Ok(())
    }

    /// Ends this session only; the server's data stays
    async fn dispose(&self) -> Result<()> {
        Ok(())
    }

    async fn key_set(&self) -> Result<HashSet<String>> {
        self.store.key_set().await
    }

    fn size(&self) -> usize {
        self.store.size()
    }

    fn status(&self) -> CacheStatus {
        self.store.status()
    }
}

#[async_trait]
impl RemoteConnector for InMemoryConnector {
    async fn add_listener(
        &self,
        location: &RemoteLocation,
        region: &str,
        listener: Arc<RemoteCacheListener>,
    ) -> Result<Arc<dyn AuxiliaryCache>> {
        let server = self.servers.get(location).ok_or_else(|| Error::RemoteUnavailable {
            location: location.to_string(),
            reason: "unknown server".into(),
        })?;
        if !server.up.load(Ordering::SeqCst) {
            return Err(Error::RemoteUnavailable {
                location: location.to_string(),
                reason: "connection refused".into(),
            });
        }
        debug!(%location, region, listener = %listener.listener_id(), "Listener registered");
        let connection = ServerConnection {
            requester: listener.listener_id(),
            region: region.to_string(),
            location: location.to_string(),
            store: Arc::clone(&server.store),
            rejecting: Arc::clone(&server.rejecting),
            listeners: Arc::clone(&server.listeners),
        };
        server.listeners.lock().push(listener);
        Ok(Arc::new(connection) as Arc<dyn AuxiliaryCache>)
    }

    async fn remove_listener(
        &self,
        location: &RemoteLocation,
        region: &str,
        listener: ListenerId,
    ) -> Result<()> {
        if let Some(server) = self.servers.get(location) {
            server.listeners.lock().retain(|l| l.listener_id() != listener);
            debug!(%location, region, %listener, "Listener removed");
        }
        Ok(())
    }
}
