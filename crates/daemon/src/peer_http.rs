// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Peer HTTP endpoints on the system port.
//!
//! `POST /refresh` applies a replicated route, `GET /hello` records a
//! peer heartbeat (caller address from `X-Forwarded-For`, `X-Real-IP`,
//! or the remote address). `GET /routes` and `DELETE /routes/*id`
//! expose the table to operator tooling.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::Json;

use sp_core::{Clock, Route, SandboxId};

use crate::router::Router;

pub fn app<C: Clock>(router: Arc<Router<C>>) -> axum::Router {
    axum::Router::new()
        .route("/refresh", post(refresh::<C>))
        .route("/hello", get(hello::<C>))
        .route("/routes", get(list_routes::<C>))
        .route("/routes/*id", delete(delete_route::<C>))
        .with_state(router)
}

async fn refresh<C: Clock>(
    State(router): State<Arc<Router<C>>>,
    Json(route): Json<Route>,
) -> StatusCode {
    router.apply_refresh(route);
    StatusCode::NO_CONTENT
}

async fn hello<C: Clock>(
    State(router): State<Arc<Router<C>>>,
    headers: HeaderMap,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> StatusCode {
    let address = peer_address(&headers, remote);
    router.record_hello(&address);
    StatusCode::NO_CONTENT
}

async fn list_routes<C: Clock>(State(router): State<Arc<Router<C>>>) -> Json<Vec<Route>> {
    Json(router.list())
}

async fn delete_route<C: Clock>(
    State(router): State<Arc<Router<C>>>,
    Path(id): Path<String>,
) -> StatusCode {
    if router.delete(&SandboxId::from_string(&id)) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Caller address: forwarded headers win over the socket peer.
fn peer_address(headers: &HeaderMap, remote: SocketAddr) -> String {
    for name in ["x-forwarded-for", "x-real-ip"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            if let Some(first) = value.split(',').next().map(str::trim) {
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }
    remote.ip().to_string()
}

#[cfg(test)]
#[path = "peer_http_tests.rs"]
mod tests;
