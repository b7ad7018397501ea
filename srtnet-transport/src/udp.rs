//! UDP socket construction and bounded-blocking I/O.
//!
//! Sockets are built through socket2 so listener options (reuse address,
//! IPv6-only, buffer sizes) can be applied before bind, then converted to
//! a standard `UdpSocket` with a short read timeout. Reads return `None`
//! on timeout so callers can interleave housekeeping and observe
//! cancellation.

use crate::error::TransportError;
use crate::options::SocketOptions;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Read timeout quantum of the reader loops.
pub(crate) const READ_TICK: Duration = Duration::from_millis(100);

/// A bound UDP socket shared by one multiplexer.
#[derive(Debug)]
pub(crate) struct UdpChannel {
    inner: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpChannel {
    pub(crate) fn bind(addr: SocketAddr, options: &SocketOptions) -> Result<Self, TransportError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if addr.is_ipv6() {
            socket.set_only_v6(options.ipv6_only)?;
        }

        // Size kernel buffers for a latency window of full-MTU packets.
        let buffer = (options.mtu * 256).max(1 << 16);
        socket.set_send_buffer_size(buffer)?;
        socket.set_recv_buffer_size(buffer)?;

        socket.bind(&addr.into())?;

        let inner: UdpSocket = socket.into();
        inner.set_read_timeout(Some(READ_TICK))?;

        let local_addr = inner.local_addr()?;
        Ok(UdpChannel { inner, local_addr })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<(), TransportError> {
        self.inner.send_to(buf, target)?;
        Ok(())
    }

    /// Bounded-blocking read. `Ok(None)` means the timeout quantum
    /// elapsed with nothing to read.
    pub(crate) fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> Result<Option<(usize, SocketAddr)>, TransportError> {
        match self.inner.recv_from(buf) {
            Ok((n, from)) => Ok(Some((n, from))),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            // Stray ICMP errors (port unreachable) must not kill the
            // reader; the idle timer decides when a link is broken.
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => Ok(None),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(addr: &str) -> UdpChannel {
        UdpChannel::bind(addr.parse().unwrap(), &SocketOptions::default()).unwrap()
    }

    #[test]
    fn binds_ephemeral_port() {
        let channel = bound("127.0.0.1:0");
        assert!(channel.local_addr().port() > 0);
    }

    #[test]
    fn read_times_out() {
        let channel = bound("127.0.0.1:0");
        let mut buf = [0u8; 64];
        assert!(matches!(channel.recv_from(&mut buf), Ok(None)));
    }

    #[test]
    fn loopback_roundtrip() {
        let a = bound("127.0.0.1:0");
        let b = bound("127.0.0.1:0");

        a.send_to(b"ping", b.local_addr()).unwrap();

        let mut buf = [0u8; 64];
        for _ in 0..20 {
            if let Some((n, from)) = b.recv_from(&mut buf).unwrap() {
                assert_eq!(&buf[..n], b"ping");
                assert_eq!(from, a.local_addr());
                return;
            }
        }
        panic!("datagram never arrived");
    }
}
