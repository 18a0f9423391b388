// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Envoy external-processor service: maps edge requests onto sandboxes.
//!
//! Per inbound `ProcessingRequest` carrying request headers, the
//! injected [`RequestAdapter`] decides whether this is sandbox traffic
//! and which sandbox/user it belongs to; the route table supplies the
//! destination, and the response is either a header mutation
//! (`x-envoy-original-dst-host` rewrite) or an immediate error
//! response. Stream EOF is normal; only send failures terminate a
//! stream abnormally.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::debug;

use sp_core::{Clock, EffectiveState, SandboxId};

use sp_proto::envoy::config::core::v3::{HeaderValue, HeaderValueOption};
use sp_proto::envoy::r#type::v3::HttpStatus;
use sp_proto::envoy::service::ext_proc::v3::{
    external_processor_server::ExternalProcessor, processing_request, processing_response,
    CommonResponse, HeaderMutation, HeadersResponse, HttpHeaders, ImmediateResponse,
    ProcessingRequest, ProcessingResponse,
};

use crate::router::Router;

/// Header Envoy uses for original-destination rewrites.
const ORIGINAL_DST_HEADER: &str = "x-envoy-original-dst-host";

/// Reserved request header carrying a JSON map of additional headers to
/// set on the upstream request.
const HEADER_MODIFIER: &str = "request-header-modifier";

/// A parsed edge request, handed to the adapter.
#[derive(Debug, Clone, Default)]
pub struct EdgeRequest {
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub port: u16,
    pub headers: HashMap<String, String>,
}

/// Where a sandbox request should go.
#[derive(Debug, Clone)]
pub struct Mapping {
    pub sandbox_id: SandboxId,
    pub port: u16,
    pub extra_headers: HashMap<String, String>,
    pub user: String,
}

/// Injected policy: extracts sandbox identity from a request and
/// authorises the user.
pub trait RequestAdapter: Send + Sync + 'static {
    fn is_sandbox_request(&self, request: &EdgeRequest) -> bool;

    fn map(&self, request: &EdgeRequest) -> Result<Mapping, String>;

    fn authorize(&self, user: &str, owner: &str) -> bool;
}

pub struct ExtProcService<A, C: Clock> {
    router: Arc<Router<C>>,
    adapter: Arc<A>,
    lb_entry: String,
}

impl<A: RequestAdapter, C: Clock> ExtProcService<A, C> {
    pub fn new(router: Arc<Router<C>>, adapter: Arc<A>, lb_entry: impl Into<String>) -> Self {
        Self { router, adapter, lb_entry: lb_entry.into() }
    }

    /// Build the response for one inbound message.
    pub(crate) fn handle(&self, message: ProcessingRequest) -> ProcessingResponse {
        let Some(processing_request::Request::RequestHeaders(headers)) = message.request else {
            // Bodies/trailers pass through untouched.
            return continue_request(Vec::new());
        };
        let edge = parse_edge_request(&headers);

        if !self.adapter.is_sandbox_request(&edge) {
            // Bypass path: send it to the configured load balancer.
            return continue_request(vec![header(ORIGINAL_DST_HEADER, &self.lb_entry)]);
        }

        let mapping = match self.adapter.map(&edge) {
            Ok(mapping) => mapping,
            Err(e) => {
                return immediate(
                    500,
                    format!(
                        "failed to map request {}://{}{}: {e}",
                        edge.scheme, edge.authority, edge.path
                    ),
                );
            }
        };

        let Some(route) = self.router.load(&mapping.sandbox_id) else {
            return immediate(404, format!("sandbox {} not found", mapping.sandbox_id));
        };
        if route.state == EffectiveState::Dead {
            return immediate(404, format!("sandbox {} not found", mapping.sandbox_id));
        }
        if route.state == EffectiveState::Paused {
            return immediate(403, format!("sandbox {} is paused", mapping.sandbox_id));
        }

        if !self.adapter.authorize(&mapping.user, &route.owner) {
            return immediate(
                401,
                format!(
                    "user {} is not authorized to access sandbox {}",
                    mapping.user, mapping.sandbox_id
                ),
            );
        }

        let mut set_headers: Vec<HeaderValueOption> = mapping
            .extra_headers
            .iter()
            .map(|(k, v)| header(k, v))
            .collect();
        if let Some(json) = edge.headers.get(HEADER_MODIFIER) {
            match serde_json::from_str::<HashMap<String, String>>(json) {
                Ok(modifiers) => {
                    set_headers.extend(modifiers.iter().map(|(k, v)| header(k, v)));
                }
                Err(e) => debug!(error = %e, "ignoring malformed request-header-modifier"),
            }
        }
        set_headers.push(header(
            ORIGINAL_DST_HEADER,
            &format!("{}:{}", route.address, mapping.port),
        ));
        continue_request(set_headers)
    }
}

#[tonic::async_trait]
impl<A: RequestAdapter, C: Clock> ExternalProcessor for ExtProcService<A, C> {
    type ProcessStream = ReceiverStream<Result<ProcessingResponse, Status>>;

    async fn process(
        &self,
        request: Request<Streaming<ProcessingRequest>>,
    ) -> Result<Response<Self::ProcessStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(16);
        let router = Arc::clone(&self.router);
        let adapter = Arc::clone(&self.adapter);
        let lb_entry = self.lb_entry.clone();
        tokio::spawn(async move {
            let service = ExtProcService { router, adapter, lb_entry };
            loop {
                let message = match inbound.message().await {
                    Ok(Some(message)) => message,
                    // EOF: the client went away; this is a normal end.
                    Ok(None) => return,
                    Err(e) => {
                        debug!(error = %e, "ext-proc stream receive failed");
                        return;
                    }
                };
                let response = service.handle(message);
                if tx.send(Ok(response)).await.is_err() {
                    return;
                }
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Parse `:scheme`, `:authority`, `:path` and the port out of the
/// header map.
fn parse_edge_request(headers: &HttpHeaders) -> EdgeRequest {
    let mut edge = EdgeRequest::default();
    if let Some(map) = &headers.headers {
        for entry in &map.headers {
            let value = if entry.value.is_empty() {
                String::from_utf8_lossy(&entry.raw_value).to_string()
            } else {
                entry.value.clone()
            };
            match entry.key.as_str() {
                ":scheme" => edge.scheme = value,
                ":authority" => edge.authority = value,
                ":path" => edge.path = value,
                _ => {
                    edge.headers.insert(entry.key.to_ascii_lowercase(), value);
                }
            }
        }
    }
    edge.port = edge
        .authority
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse().ok())
        .unwrap_or(if edge.scheme == "https" { 443 } else { 80 });
    edge
}

fn header(key: &str, value: &str) -> HeaderValueOption {
    HeaderValueOption {
        header: Some(HeaderValue {
            key: key.to_string(),
            value: value.to_string(),
            raw_value: Vec::new(),
        }),
        append_action: 0,
    }
}

fn continue_request(set_headers: Vec<HeaderValueOption>) -> ProcessingResponse {
    ProcessingResponse {
        response: Some(processing_response::Response::RequestHeaders(HeadersResponse {
            response: Some(CommonResponse {
                header_mutation: Some(HeaderMutation {
                    set_headers,
                    remove_headers: Vec::new(),
                }),
                ..CommonResponse::default()
            }),
        })),
    }
}

fn immediate(code: i32, body: String) -> ProcessingResponse {
    ProcessingResponse {
        response: Some(processing_response::Response::ImmediateResponse(ImmediateResponse {
            status: Some(HttpStatus { code }),
            headers: None,
            body,
            grpc_status: None,
            details: String::new(),
        })),
    }
}

/// Default adapter: sandbox hosts live under a base domain as
/// `<name>[--<port>].<namespace>.<base-domain>`; the user arrives in
/// `x-sandpool-user`; owners authorise only themselves.
pub struct SubdomainAdapter {
    pub base_domain: String,
}

impl RequestAdapter for SubdomainAdapter {
    fn is_sandbox_request(&self, request: &EdgeRequest) -> bool {
        let host = request.authority.split(':').next().unwrap_or_default();
        host.ends_with(&self.base_domain) && host != self.base_domain
    }

    fn map(&self, request: &EdgeRequest) -> Result<Mapping, String> {
        let host = request.authority.split(':').next().unwrap_or_default();
        let prefix = host
            .strip_suffix(&self.base_domain)
            .and_then(|p| p.strip_suffix('.'))
            .ok_or_else(|| format!("host {host} is not under the sandbox domain"))?;
        let (label, namespace) = prefix
            .rsplit_once('.')
            .ok_or_else(|| format!("host {host} is missing a namespace label"))?;
        let (name, port) = match label.split_once("--") {
            Some((name, port)) => {
                (name, port.parse::<u16>().map_err(|_| format!("bad port in host {host}"))?)
            }
            None => (label, request.port),
        };
        let user = request.headers.get("x-sandpool-user").cloned().unwrap_or_default();
        if user.is_empty() {
            return Err("missing x-sandpool-user header".to_string());
        }
        Ok(Mapping {
            sandbox_id: SandboxId::from_parts(namespace, name),
            port,
            extra_headers: HashMap::new(),
            user,
        })
    }

    fn authorize(&self, user: &str, owner: &str) -> bool {
        !user.is_empty() && user == owner
    }
}

#[cfg(test)]
#[path = "extproc_tests.rs"]
mod tests;
