// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup: configuration, listener binding, task wiring.
//!
//! Listeners are bound before any background task starts so a bind
//! failure surfaces as a startup error (exit code 1) instead of a
//! half-wired process. Claim and lifecycle errors after startup are
//! logged, never process-fatal.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use sp_adapters::{Orchestrator, RuntimeClient};
use sp_core::SystemClock;
use sp_engine::{
    default_bypass, ClaimConfig, ClaimDeps, ClaimEngine, Controller, ControllerConfig, EventBus,
    ExpectationTracker, ObjectCache, PickRegistry,
};
use sp_proto::envoy::service::ext_proc::v3::external_processor_server::ExternalProcessorServer;
use sp_proto::grpc::health::v1::health_server::HealthServer;

use crate::extproc::{ExtProcService, RequestAdapter};
use crate::health::HealthService;
use crate::router::{Router, RouterConfig};
use crate::sweeper::Sweeper;
use crate::{env, peer_http};

/// Daemon configuration, loaded from `SP_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub namespace: String,
    pub system_port: u16,
    pub extproc_port: u16,
    pub lb_entry: String,
    pub base_domain: String,
    pub peers: Vec<String>,
    pub heartbeat_interval: Duration,
    pub claim_workers: usize,
    pub sweep_interval: Duration,
}

impl Config {
    pub fn load() -> Self {
        Self {
            namespace: env::namespace(),
            system_port: env::system_port(),
            extproc_port: env::extproc_port(),
            lb_entry: env::lb_entry(),
            base_domain: env::base_domain(),
            peers: env::peers(),
            heartbeat_interval: env::heartbeat_interval(),
            claim_workers: env::claim_workers(),
            sweep_interval: env::sweep_interval(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to bind {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    #[error("wiring failed: {0}")]
    Wiring(String),
}

/// Running daemon: the long-lived tasks plus the library surface
/// (claim engine, router, cache) other components use.
pub struct DaemonState<O: Orchestrator> {
    pub cancel: CancellationToken,
    pub engine: Arc<ClaimEngine<O, SystemClock>>,
    pub router: Arc<Router<SystemClock>>,
    pub cache: Arc<ObjectCache<O, SystemClock>>,
    pub bus: EventBus,
    handles: Vec<JoinHandle<()>>,
}

impl<O: Orchestrator> DaemonState<O> {
    /// Wait for every background task to finish after cancellation.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Wire the whole process: cache, claim engine, lifecycle controller,
/// router, sweeper, and both listeners.
pub async fn startup<O: Orchestrator, A: RequestAdapter>(
    config: Config,
    orchestrator: Arc<O>,
    adapter: Arc<A>,
) -> Result<DaemonState<O>, LifecycleError> {
    let cancel = CancellationToken::new();
    let clock = SystemClock;
    let bus = EventBus::new();

    let expectations = Arc::new(ExpectationTracker::new(clock.clone()));
    let cache = Arc::new(ObjectCache::new(Arc::clone(&orchestrator), Arc::clone(&expectations)));
    let picks = Arc::new(PickRegistry::new());
    let runtime = RuntimeClient::new().map_err(|e| LifecycleError::Wiring(e.to_string()))?;

    let engine = Arc::new(ClaimEngine::new(
        ClaimDeps {
            orchestrator: Arc::clone(&orchestrator),
            cache: Arc::clone(&cache),
            expectations,
            picks,
            bus: bus.clone(),
            runtime,
            clock: clock.clone(),
        },
        ClaimConfig { workers: config.claim_workers, ..ClaimConfig::default() },
    ));

    let controller = Arc::new(Controller::new(
        Arc::clone(&orchestrator),
        Arc::clone(&cache),
        bus.clone(),
        clock.clone(),
        default_bypass(),
        ControllerConfig::default(),
    ));

    let router = Arc::new(
        Router::new(
            clock.clone(),
            RouterConfig {
                seed_peers: config.peers.clone(),
                heartbeat_interval: config.heartbeat_interval,
                ..RouterConfig::default()
            },
        )
        .map_err(LifecycleError::Wiring)?,
    );

    let sweeper = Arc::new(Sweeper::new(
        Arc::clone(&orchestrator),
        Arc::clone(&cache),
        bus.clone(),
        clock.clone(),
        config.sweep_interval,
    ));

    // Bind both listeners before starting anything.
    let system_addr: SocketAddr = ([0, 0, 0, 0], config.system_port).into();
    let system_listener = tokio::net::TcpListener::bind(system_addr)
        .await
        .map_err(|e| LifecycleError::BindFailed(system_addr, e))?;
    let extproc_addr: SocketAddr = ([0, 0, 0, 0], config.extproc_port).into();
    let extproc_listener = tokio::net::TcpListener::bind(extproc_addr)
        .await
        .map_err(|e| LifecycleError::BindFailed(extproc_addr, e))?;
    info!(%system_addr, %extproc_addr, "listeners bound");

    let mut handles = Vec::new();

    // Subscribers register before the cache task starts so no replayed
    // event is missed.
    let controller_events = cache.subscribe();
    let router_events = cache.subscribe();
    handles.push(tokio::spawn(Arc::clone(&cache).run(cancel.clone())));
    handles.push(tokio::spawn(
        Arc::clone(&controller).run(controller_events, cancel.clone()),
    ));
    handles.push(tokio::spawn(Arc::clone(&router).run(router_events, cancel.clone())));
    handles.push(tokio::spawn(Arc::clone(&sweeper).run(cancel.clone())));

    let peer_app = peer_http::app(Arc::clone(&router))
        .into_make_service_with_connect_info::<SocketAddr>();
    let peer_cancel = cancel.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = axum::serve(system_listener, peer_app)
            .with_graceful_shutdown(peer_cancel.cancelled_owned())
            .await
        {
            error!(error = %e, "peer http server failed");
        }
    }));

    let extproc = ExtProcService::new(Arc::clone(&router), adapter, config.lb_entry.clone());
    let grpc_cancel = cancel.clone();
    handles.push(tokio::spawn(async move {
        let incoming = TcpListenerStream::new(extproc_listener);
        if let Err(e) = tonic::transport::Server::builder()
            .add_service(ExternalProcessorServer::new(extproc))
            .add_service(HealthServer::new(HealthService))
            .serve_with_incoming_shutdown(incoming, grpc_cancel.cancelled_owned())
            .await
        {
            error!(error = %e, "ext-proc grpc server failed");
        }
    }));

    Ok(DaemonState { cancel, engine, router, cache, bus, handles })
}
