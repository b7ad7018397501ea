//! Shared utilities for integration tests.
#![allow(dead_code)]

use srtnet::{ClientConfig, ServerConfig};
use std::time::{Duration, Instant};

pub const VALID_PSK: &str = "Th1$_is_4n_0pt10N4L_P$k";
pub const INVALID_PSK: &str = "Th1$_is_4_F4k3_P$k";

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(condition: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Server configuration matching the canonical test parameters.
pub fn server_config(host: &str, port: u16, psk: &str) -> ServerConfig {
    ServerConfig {
        local_host: host.to_string(),
        local_port: port,
        reorder: 16,
        latency_ms: 1000,
        overhead_percent: 100,
        mtu: 1456,
        peer_idle_timeout_ms: 5000,
        psk: psk.to_string(),
        single_client: false,
        ipv6_only: false,
    }
}

/// Client configuration matching the canonical test parameters.
pub fn client_config(host: &str, port: u16, psk: &str, fail_on_connection_error: bool) -> ClientConfig {
    ClientConfig {
        remote_host: host.to_string(),
        remote_port: port,
        reorder: 16,
        latency_ms: 1000,
        overhead_percent: 100,
        mtu: 1456,
        peer_idle_timeout_ms: 5000,
        psk: psk.to_string(),
        stream_id: String::new(),
        fail_on_connection_error,
    }
}
