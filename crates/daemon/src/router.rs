// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory route table with peer replication.
//!
//! Routes are projections of sandboxes fed from the cache's event
//! stream; a route is pushed to peers on add and whenever its
//! `(address, state)` pair changes. Peers heartbeat each other with
//! `GET /hello` and are evicted after five missed intervals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sp_adapters::WatchEvent;
use sp_core::{Clock, EffectiveState, Peer, Route, SandboxId};
use sp_engine::CacheEvent;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Peers seeded from configuration; learned peers join them.
    pub seed_peers: Vec<String>,
    pub heartbeat_interval: Duration,
    /// Heartbeats missed before a peer is evicted.
    pub missed_intervals: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            seed_peers: Vec::new(),
            heartbeat_interval: Duration::from_secs(5),
            missed_intervals: 5,
        }
    }
}

pub struct Router<C: Clock> {
    routes: RwLock<HashMap<SandboxId, Route>>,
    peers: RwLock<HashMap<String, Peer>>,
    http: reqwest::Client,
    clock: C,
    config: RouterConfig,
}

impl<C: Clock> Router<C> {
    pub fn new(clock: C, config: RouterConfig) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
            .map_err(|e| format!("failed to build peer http client: {e}"))?;
        Ok(Self {
            routes: RwLock::new(HashMap::new()),
            peers: RwLock::new(HashMap::new()),
            http,
            clock,
            config,
        })
    }

    /// Consume cache events and the heartbeat schedule until cancelled.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<CacheEvent>,
        cancel: CancellationToken,
    ) {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => {
                    let Some(event) = event else { return };
                    if let Some(route) = self.apply_cache_event(&event) {
                        let router = Arc::clone(&self);
                        tokio::spawn(async move { router.push_to_peers(&route).await });
                    }
                }
                _ = heartbeat.tick() => {
                    self.evict_stale_peers();
                    let router = Arc::clone(&self);
                    tokio::spawn(async move { router.send_hellos().await });
                }
            }
        }
    }

    /// Update the table from a cache event. Returns the route when it
    /// changed and should be replicated.
    pub fn apply_cache_event(&self, event: &CacheEvent) -> Option<Route> {
        let CacheEvent::Sandbox(event) = event else {
            return None;
        };
        match event {
            WatchEvent::Added(sandbox) | WatchEvent::Modified(sandbox) => {
                let route = Route::from_sandbox(sandbox);
                self.upsert(route)
            }
            WatchEvent::Deleted(sandbox) => {
                let id = sandbox.id();
                if self.routes.write().remove(&id).is_some() {
                    debug!(sandbox = %id, "route removed");
                    return Some(Route {
                        id,
                        address: String::new(),
                        owner: String::new(),
                        state: EffectiveState::Dead,
                    });
                }
                None
            }
        }
    }

    /// Insert or update; emits only when `(address, state)` changed.
    fn upsert(&self, route: Route) -> Option<Route> {
        let mut routes = self.routes.write();
        let changed = match routes.get(&route.id) {
            Some(existing) => existing.address != route.address || existing.state != route.state,
            None => true,
        };
        routes.insert(route.id.clone(), route.clone());
        if changed {
            debug!(sandbox = %route.id, address = %route.address, state = ?route.state, "route updated");
            Some(route)
        } else {
            None
        }
    }

    /// Apply a route pushed by a peer. Dead routes are removals. Not
    /// re-replicated, so refreshes cannot loop.
    pub fn apply_refresh(&self, route: Route) {
        if route.state == EffectiveState::Dead {
            self.routes.write().remove(&route.id);
        } else {
            self.routes.write().insert(route.id.clone(), route);
        }
    }

    pub fn load(&self, id: &SandboxId) -> Option<Route> {
        self.routes.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Route> {
        self.routes.read().values().cloned().collect()
    }

    pub fn delete(&self, id: &SandboxId) -> bool {
        self.routes.write().remove(id).is_some()
    }

    /// Record a heartbeat from `address`.
    pub fn record_hello(&self, address: &str) {
        let now = self.clock.epoch_ms();
        let mut peers = self.peers.write();
        let known = peers.contains_key(address);
        peers.insert(address.to_string(), Peer { address: address.to_string(), last_heartbeat: now });
        if !known {
            info!(peer = %address, "peer joined");
        }
    }

    pub fn list_peers(&self) -> Vec<Peer> {
        self.peers.read().values().cloned().collect()
    }

    /// Drop peers that have missed five heartbeat intervals.
    pub fn evict_stale_peers(&self) {
        let now = self.clock.epoch_ms();
        let max_silence =
            self.config.heartbeat_interval.as_millis() as u64 * self.config.missed_intervals as u64;
        self.peers.write().retain(|address, peer| {
            let alive = now.saturating_sub(peer.last_heartbeat) < max_silence;
            if !alive {
                info!(peer = %address, "peer evicted after missed heartbeats");
            }
            alive
        });
    }

    /// Best-effort replication of one route to every peer.
    async fn push_to_peers(&self, route: &Route) {
        for address in self.peer_addresses() {
            let url = format!("http://{address}/refresh");
            if let Err(e) = self.http.post(&url).json(route).send().await {
                warn!(peer = %address, error = %e, "route refresh push failed");
            }
        }
    }

    async fn send_hellos(&self) {
        for address in self.peer_addresses() {
            let url = format!("http://{address}/hello");
            if let Err(e) = self.http.get(&url).send().await {
                debug!(peer = %address, error = %e, "peer hello failed");
            }
        }
    }

    fn peer_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.config.seed_peers.clone();
        for address in self.peers.read().keys() {
            if !addresses.contains(address) {
                addresses.push(address.clone());
            }
        }
        addresses
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
