// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::time::Duration;

/// Namespace this process manages.
pub fn namespace() -> String {
    std::env::var("SP_NAMESPACE").unwrap_or_else(|_| "default".to_string())
}

/// System port: peer HTTP endpoints (`/refresh`, `/hello`) and operator
/// route tooling.
pub fn system_port() -> u16 {
    std::env::var("SP_SYSTEM_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(7070)
}

/// Port for the Envoy external-processor gRPC service.
pub fn extproc_port() -> u16 {
    std::env::var("SP_EXTPROC_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(7443)
}

/// Load-balancer entry non-sandbox traffic is rewritten to.
pub fn lb_entry() -> String {
    std::env::var("SP_LB_ENTRY").unwrap_or_else(|_| "127.0.0.1:80".to_string())
}

/// Base domain the default request adapter matches sandbox hosts under.
pub fn base_domain() -> String {
    std::env::var("SP_BASE_DOMAIN").unwrap_or_else(|_| "sandpool.local".to_string())
}

/// Static peer addresses (`host:port`, comma separated) seeded into the
/// router's heartbeat loop.
pub fn peers() -> Vec<String> {
    std::env::var("SP_PEERS")
        .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
        .unwrap_or_default()
}

/// Peer heartbeat interval (default 5s).
pub fn heartbeat_interval() -> Duration {
    std::env::var("SP_HEARTBEAT_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}

/// Bounded claim-worker admission size.
pub fn claim_workers() -> usize {
    std::env::var("SP_CLAIM_WORKERS").ok().and_then(|v| v.parse().ok()).unwrap_or(64)
}

/// Timeout sweeper scan interval.
pub fn sweep_interval() -> Duration {
    std::env::var("SP_SWEEP_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn peers_parses_a_comma_list() {
        std::env::set_var("SP_PEERS", "10.0.0.1:7070, 10.0.0.2:7070,");
        assert_eq!(peers(), vec!["10.0.0.1:7070".to_string(), "10.0.0.2:7070".to_string()]);
        std::env::remove_var("SP_PEERS");
        assert!(peers().is_empty());
    }

    #[test]
    #[serial]
    fn ports_fall_back_to_defaults_on_garbage() {
        std::env::set_var("SP_SYSTEM_PORT", "not-a-port");
        assert_eq!(system_port(), 7070);
        std::env::remove_var("SP_SYSTEM_PORT");
    }

    #[test]
    #[serial]
    fn heartbeat_interval_is_configurable() {
        std::env::set_var("SP_HEARTBEAT_MS", "250");
        assert_eq!(heartbeat_interval(), Duration::from_millis(250));
        std::env::remove_var("SP_HEARTBEAT_MS");
        assert_eq!(heartbeat_interval(), Duration::from_secs(5));
    }
}
