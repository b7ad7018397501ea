//! Start-time configuration and the socket factory.
//!
//! Public config structs mirror the start parameters; the factory
//! validates them, resolves endpoints through the host's name resolution,
//! and translates the result into transport socket options. Resolution is
//! always synchronous, so a bad host name fails the start call itself.

use crate::error::Error;
use srtnet_transport::{Passphrase, SocketOptions};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Parameters for [`crate::SrtNet::start_server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen host; an IP literal or a resolvable name.
    pub local_host: String,
    /// Listen port; 0 lets the OS pick one.
    pub local_port: u16,
    /// Packets of re-order tolerance.
    pub reorder: usize,
    /// Latency budget in milliseconds.
    pub latency_ms: u16,
    /// Bandwidth share allowed for recovery traffic, percent.
    pub overhead_percent: u32,
    /// Link MTU.
    pub mtu: usize,
    /// Connection considered broken after this many milliseconds without
    /// a packet from the peer.
    pub peer_idle_timeout_ms: u32,
    /// Pre-shared key; empty disables encryption.
    pub psk: String,
    /// Accept one client at a time instead of many.
    pub single_client: bool,
    /// Restrict an IPv6 listener to IPv6 traffic.
    pub ipv6_only: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            local_host: "0.0.0.0".to_string(),
            local_port: 0,
            reorder: 16,
            latency_ms: 120,
            overhead_percent: 25,
            mtu: 1456,
            peer_idle_timeout_ms: 5000,
            psk: String::new(),
            single_client: false,
            ipv6_only: false,
        }
    }
}

/// Parameters for [`crate::SrtNet::start_client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host; an IP literal or a resolvable name.
    pub remote_host: String,
    /// Server port.
    pub remote_port: u16,
    /// Packets of re-order tolerance.
    pub reorder: usize,
    /// Latency budget in milliseconds.
    pub latency_ms: u16,
    /// Bandwidth share allowed for recovery traffic, percent.
    pub overhead_percent: u32,
    /// Link MTU.
    pub mtu: usize,
    /// Connection considered broken after this many milliseconds without
    /// a packet from the peer.
    pub peer_idle_timeout_ms: u32,
    /// Pre-shared key; empty disables encryption. Must match the
    /// server's.
    pub psk: String,
    /// Stream identifier sent verbatim during the handshake.
    pub stream_id: String,
    /// Fail `start_client` if the first connection attempt fails instead
    /// of retrying in the background.
    pub fail_on_connection_error: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            remote_host: "127.0.0.1".to_string(),
            remote_port: 0,
            reorder: 16,
            latency_ms: 120,
            overhead_percent: 25,
            mtu: 1456,
            peer_idle_timeout_ms: 5000,
            psk: String::new(),
            stream_id: String::new(),
            fail_on_connection_error: true,
        }
    }
}

/// A validated, resolved server start request.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedServer {
    pub local_addr: SocketAddr,
    pub options: SocketOptions,
    pub single_client: bool,
}

/// A validated, resolved client start request.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedClient {
    pub remote_addr: SocketAddr,
    pub local_addr: Option<SocketAddr>,
    pub options: SocketOptions,
    pub fail_on_connection_error: bool,
}

pub(crate) fn resolve_server(config: &ServerConfig) -> Result<ResolvedServer, Error> {
    let local_addr = resolve_host(&config.local_host, config.local_port, None)?;

    let mut options = base_options(
        config.reorder,
        config.latency_ms,
        config.overhead_percent,
        config.mtu,
        config.peer_idle_timeout_ms,
        &config.psk,
    )?;
    options.ipv6_only = config.ipv6_only;

    Ok(ResolvedServer {
        local_addr,
        options,
        single_client: config.single_client,
    })
}

pub(crate) fn resolve_client(
    config: &ClientConfig,
    local: Option<(&str, u16)>,
) -> Result<ResolvedClient, Error> {
    // An explicit bind address pins the address family for the remote
    // lookup.
    let local_addr = match local {
        Some((host, port)) => Some(resolve_host(host, port, None)?),
        None => None,
    };
    let family = local_addr.map(|addr| addr.is_ipv4());
    let remote_addr = resolve_host(&config.remote_host, config.remote_port, family)?;

    let mut options = base_options(
        config.reorder,
        config.latency_ms,
        config.overhead_percent,
        config.mtu,
        config.peer_idle_timeout_ms,
        &config.psk,
    )?;
    if !config.stream_id.is_empty() {
        options.stream_id = Some(config.stream_id.clone());
    }

    Ok(ResolvedClient {
        remote_addr,
        local_addr,
        options,
        fail_on_connection_error: config.fail_on_connection_error,
    })
}

fn base_options(
    reorder: usize,
    latency_ms: u16,
    overhead_percent: u32,
    mtu: usize,
    peer_idle_timeout_ms: u32,
    psk: &str,
) -> Result<SocketOptions, Error> {
    let mut options = SocketOptions {
        latency_ms,
        reorder_tolerance: reorder,
        overhead_percent,
        mtu,
        peer_idle_timeout: Duration::from_millis(peer_idle_timeout_ms as u64),
        ..SocketOptions::default()
    };

    if !psk.is_empty() {
        let passphrase = Passphrase::new(psk)
            .map_err(|e| Error::ConfigurationRejected(e.to_string()))?;
        options.passphrase = Some(passphrase);
    }

    options
        .validate()
        .map_err(|e| Error::ConfigurationRejected(e.to_string()))?;
    Ok(options)
}

/// Resolve a host and port. IP literals are used directly; anything else
/// goes through the host's name resolution and the first address of the
/// wanted family wins. `family` is `Some(true)` for IPv4, `Some(false)`
/// for IPv6, `None` for either.
pub(crate) fn resolve_host(
    host: &str,
    port: u16,
    family: Option<bool>,
) -> Result<SocketAddr, Error> {
    if host.is_empty() {
        return Err(Error::AddressResolutionFailed);
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if let Some(want_v4) = family {
            if ip.is_ipv4() != want_v4 {
                return Err(Error::AddressResolutionFailed);
            }
        }
        return Ok(SocketAddr::new(ip, port));
    }

    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|_| Error::AddressResolutionFailed)?;
    addrs
        .into_iter()
        .find(|addr| family.map_or(true, |want_v4| addr.is_ipv4() == want_v4))
        .ok_or(Error::AddressResolutionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_literal_resolves_directly() {
        let addr = resolve_host("127.0.0.1", 8009, None).unwrap();
        assert_eq!(addr, "127.0.0.1:8009".parse().unwrap());
    }

    #[test]
    fn ipv6_literal_resolves_directly() {
        let addr = resolve_host("::1", 8020, None).unwrap();
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), 8020);
    }

    #[test]
    fn empty_host_fails() {
        assert!(matches!(
            resolve_host("", 8009, None),
            Err(Error::AddressResolutionFailed)
        ));
    }

    #[test]
    fn corrupt_literal_fails() {
        assert!(matches!(
            resolve_host("123.456.789.012", 8009, None),
            Err(Error::AddressResolutionFailed)
        ));
    }

    #[test]
    fn family_mismatch_fails() {
        assert!(matches!(
            resolve_host("::1", 8009, Some(true)),
            Err(Error::AddressResolutionFailed)
        ));
    }

    #[test]
    fn psk_length_is_validated() {
        let config = ServerConfig {
            psk: "short".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(
            resolve_server(&config),
            Err(Error::ConfigurationRejected(_))
        ));
    }

    #[test]
    fn bad_mtu_is_rejected() {
        let config = ServerConfig {
            mtu: 40,
            ..ServerConfig::default()
        };
        assert!(matches!(
            resolve_server(&config),
            Err(Error::ConfigurationRejected(_))
        ));
    }

    #[test]
    fn stream_id_is_carried() {
        let config = ClientConfig {
            stream_id: "An example Stream ID".to_string(),
            ..ClientConfig::default()
        };
        let resolved = resolve_client(&config, None).unwrap();
        assert_eq!(
            resolved.options.stream_id.as_deref(),
            Some("An example Stream ID")
        );
    }
}
