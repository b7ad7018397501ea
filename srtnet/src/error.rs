//! Façade error kinds.
//!
//! Every fallible public operation returns one of these; nothing else
//! crosses the API boundary. A peer that goes away is never an error, it
//! is reported through the disconnect callback.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing required callback, invalid option value, or the instance
    /// is already started.
    #[error("configuration rejected: {0}")]
    ConfigurationRejected(String),

    /// A host or bind address could not be resolved.
    #[error("failed to resolve address")]
    AddressResolutionFailed,

    /// The local endpoint could not be bound.
    #[error("failed to bind local endpoint")]
    BindFailed,

    /// The listener could not be brought up after binding.
    #[error("failed to listen on local endpoint")]
    ListenFailed,

    /// The peer is unreachable or refused the handshake (including a
    /// pre-shared key mismatch).
    #[error("failed to connect to server")]
    ConnectFailed,

    /// Send request above the live-mode payload maximum.
    #[error("message of {size} bytes exceeds the maximum payload of {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// The target socket is unknown, removed, or the protocol send
    /// failed.
    #[error("failed to send data")]
    SendFailed,
}
