//! Socket configuration applied before bind or connect.

use crate::error::TransportError;
use srtnet_crypto::Passphrase;
use srtnet_protocol::packet::MAX_PAYLOAD_SIZE;
use std::time::Duration;

/// Smallest MTU the transport accepts (enough for headers plus a minimal
/// payload).
pub const MIN_MTU: usize = 76;

/// Largest MTU the transport accepts.
pub const MAX_MTU: usize = 1500;

/// Options for a listener or caller socket.
///
/// The transport always runs in message mode; payload message-mode flags
/// are implied and not configurable.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Receiver latency budget in milliseconds; negotiated to the maximum
    /// of both peers during the handshake.
    pub latency_ms: u16,
    /// How many out-of-order packets the receiver tolerates before gaps
    /// are treated as loss.
    pub reorder_tolerance: usize,
    /// Extra bandwidth share reserved for recovery traffic, percent.
    pub overhead_percent: u32,
    /// Link MTU; bounds UDP buffer sizing.
    pub mtu: usize,
    /// The link is declared broken after this long without a packet from
    /// the peer.
    pub peer_idle_timeout: Duration,
    /// Pre-shared key; `None` disables encryption.
    pub passphrase: Option<Passphrase>,
    /// Stream identifier sent during the handshake (callers only).
    pub stream_id: Option<String>,
    /// Restrict an IPv6 listener to IPv6 traffic (listeners only).
    pub ipv6_only: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        SocketOptions {
            latency_ms: 120,
            reorder_tolerance: 0,
            overhead_percent: 25,
            mtu: MAX_MTU,
            peer_idle_timeout: Duration::from_secs(5),
            passphrase: None,
            stream_id: None,
            ipv6_only: false,
        }
    }
}

impl SocketOptions {
    /// Largest message accepted by `send`.
    pub fn max_payload(&self) -> usize {
        MAX_PAYLOAD_SIZE
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if !(MIN_MTU..=MAX_MTU).contains(&self.mtu) {
            return Err(TransportError::InvalidOption(format!(
                "mtu {} outside {MIN_MTU}..={MAX_MTU}",
                self.mtu
            )));
        }
        if self.overhead_percent > 100 {
            return Err(TransportError::InvalidOption(format!(
                "overhead {}% above 100%",
                self.overhead_percent
            )));
        }
        if self.peer_idle_timeout.is_zero() {
            return Err(TransportError::InvalidOption(
                "peer idle timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(SocketOptions::default().validate().is_ok());
    }

    #[test]
    fn mtu_bounds() {
        let mut options = SocketOptions::default();
        options.mtu = 40;
        assert!(options.validate().is_err());
        options.mtu = 9000;
        assert!(options.validate().is_err());
        options.mtu = 1456;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn overhead_bounds() {
        let mut options = SocketOptions::default();
        options.overhead_percent = 101;
        assert!(options.validate().is_err());
    }
}
