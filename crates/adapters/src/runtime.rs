// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clients for the daemon running inside each sandbox.
//!
//! Two surfaces: a plain HTTP/JSON `/init` endpoint used to seed the
//! runtime after a claim, and a gRPC process stream used to run
//! commands (CSI mounts) inside the sandbox.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine as _;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataValue;
use tonic::transport::Channel;
use tracing::debug;

use sp_proto::sandbox::process::v1::{
    process_client::ProcessClient as GrpcProcessClient, process_event, ProcessConfig, StartRequest,
};

/// Failures talking to the in-sandbox runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime request failed: {0}")]
    Http(String),

    #[error("runtime returned status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("runtime stream failed: {0}")]
    Grpc(String),

    #[error("runtime init timed out: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    /// The in-sandbox command ran but reported failure.
    #[error("command failed (exit {exit_code}): {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },
}

/// Body of `POST <runtime-url>/init`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub env_vars: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// Result of one in-sandbox command run.
#[derive(Debug, Clone, Default)]
pub struct ProcessResult {
    pub pid: u32,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub exited: bool,
    pub error: Option<String>,
}

impl ProcessResult {
    pub fn succeeded(&self) -> bool {
        self.exited && self.exit_code == 0 && self.error.is_none()
    }
}

/// HTTP client for the runtime's `/init` endpoint.
#[derive(Clone)]
pub struct RuntimeClient {
    http: reqwest::Client,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl RuntimeClient {
    pub fn new() -> Result<Self, RuntimeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RuntimeError::Http(e.to_string()))?;
        Ok(Self {
            http,
            backoff_base: Duration::from_millis(200),
            backoff_cap: Duration::from_secs(20),
        })
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// POST `/init` with bounded exponential backoff (base 200 ms, ×2,
    /// ~20 s total). Aborts promptly on cancellation.
    pub async fn init(
        &self,
        base_url: &str,
        request: &InitRequest,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        let url = format!("{}/init", base_url.trim_end_matches('/'));
        let started = tokio::time::Instant::now();
        let mut delay = self.backoff_base;
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }
            attempt += 1;
            match self.try_init(&url, request).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if started.elapsed() + delay >= self.backoff_cap {
                        return Err(RuntimeError::Timeout(e.to_string()));
                    }
                    debug!(%url, attempt, error = %e, "runtime init failed, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RuntimeError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay *= 2;
                }
            }
        }
    }

    async fn try_init(&self, url: &str, request: &InitRequest) -> Result<(), RuntimeError> {
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| RuntimeError::Http(e.to_string()))?;
        let code = response.status();
        if code.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(RuntimeError::Status { code: code.as_u16(), body })
    }
}

/// gRPC client for the runtime's process stream.
pub struct ProcessClient;

impl ProcessClient {
    /// Start a command inside the sandbox and aggregate its output.
    ///
    /// A non-nil end error or non-zero exit code is an application-level
    /// failure surfaced as [`RuntimeError::CommandFailed`].
    pub async fn run(
        endpoint: &str,
        access_token: &str,
        user: &str,
        config: ProcessConfig,
        timeout: Duration,
    ) -> Result<ProcessResult, RuntimeError> {
        tokio::time::timeout(timeout, Self::run_inner(endpoint, access_token, user, config))
            .await
            .map_err(|_| RuntimeError::Grpc(format!("process stream timed out after {timeout:?}")))?
    }

    async fn run_inner(
        endpoint: &str,
        access_token: &str,
        user: &str,
        config: ProcessConfig,
    ) -> Result<ProcessResult, RuntimeError> {
        let channel = Channel::from_shared(endpoint.to_string())
            .map_err(|e| RuntimeError::Grpc(format!("bad endpoint {endpoint}: {e}")))?
            .connect()
            .await
            .map_err(|e| RuntimeError::Grpc(format!("connect {endpoint}: {e}")))?;
        let mut client = GrpcProcessClient::new(channel);

        let mut request = tonic::Request::new(StartRequest { process: Some(config) });
        let token_value = MetadataValue::try_from(access_token)
            .map_err(|e| RuntimeError::Grpc(format!("bad access token: {e}")))?;
        request.metadata_mut().insert("x-access-token", token_value);
        let basic = base64::engine::general_purpose::STANDARD.encode(format!("{user}:"));
        let auth_value = MetadataValue::try_from(format!("Basic {basic}").as_str())
            .map_err(|e| RuntimeError::Grpc(format!("bad auth header: {e}")))?;
        request.metadata_mut().insert("authorization", auth_value);

        let mut stream = client
            .start(request)
            .await
            .map_err(|e| RuntimeError::Grpc(e.to_string()))?
            .into_inner();

        let mut result = ProcessResult::default();
        while let Some(event) = stream
            .message()
            .await
            .map_err(|e| RuntimeError::Grpc(e.to_string()))?
        {
            match event.event {
                Some(process_event::Event::Start(start)) => result.pid = start.pid,
                Some(process_event::Event::Data(data)) => match data.output {
                    Some(sp_proto::sandbox::process::v1::data_event::Output::Stdout(bytes)) => {
                        result.stdout.push_str(&String::from_utf8_lossy(&bytes));
                    }
                    Some(sp_proto::sandbox::process::v1::data_event::Output::Stderr(bytes)) => {
                        result.stderr.push_str(&String::from_utf8_lossy(&bytes));
                    }
                    None => {}
                },
                Some(process_event::Event::Keepalive(_)) => {}
                Some(process_event::Event::End(end)) => {
                    result.exit_code = end.exit_code;
                    result.exited = end.exited;
                    result.error = end.error;
                    break;
                }
                None => {}
            }
        }

        if let Some(error) = &result.error {
            return Err(RuntimeError::CommandFailed {
                exit_code: result.exit_code,
                stderr: format!("{error}; {}", result.stderr),
            });
        }
        if result.exited && result.exit_code != 0 {
            return Err(RuntimeError::CommandFailed {
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }
        Ok(result)
    }
}
