//! Transport error types.

use srtnet_crypto::CryptoError;
use srtnet_protocol::handshake::{HandshakeError, RejectReason};
use srtnet_protocol::packet::PacketError;
use thiserror::Error;

/// Errors surfaced by sockets and the poller.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address")]
    InvalidAddress,

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("connection attempt timed out")]
    ConnectTimeout,

    #[error("connection rejected by peer: {0:?}")]
    ConnectionRejected(RejectReason),

    #[error("connection is broken")]
    Broken,

    #[error("socket is closed")]
    Closed,

    #[error("operation not supported by this socket role")]
    WrongRole,

    #[error("payload of {size} bytes exceeds the maximum of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("packet error: {0}")]
    Packet(#[from] PacketError),
}
