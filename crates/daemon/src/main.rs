// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! spd: the Sandpool daemon binary.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sp_adapters::KubeOrchestrator;
use sp_daemon::extproc::SubdomainAdapter;
use sp_daemon::{startup, Config};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Keep the writer guard alive for the process lifetime.
    let _log_guard = match std::env::var("SP_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "spd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    };

    let config = Config::load();
    info!(?config, "starting sandpool daemon");

    let orchestrator = match KubeOrchestrator::new(&config.namespace).await {
        Ok(orchestrator) => Arc::new(orchestrator),
        Err(e) => {
            error!(error = %e, "failed to connect to the orchestrator");
            std::process::exit(1);
        }
    };
    let adapter = Arc::new(SubdomainAdapter { base_domain: config.base_domain.clone() });

    let state = match startup(config, orchestrator, adapter).await {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "startup failed");
            std::process::exit(1);
        }
    };
    info!("sandpool daemon ready");

    shutdown_signal().await;
    info!("shutdown requested, draining");
    state.cancel.cancel();
    if tokio::time::timeout(Duration::from_secs(5), state.join()).await.is_err() {
        error!("tasks did not drain in time");
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
