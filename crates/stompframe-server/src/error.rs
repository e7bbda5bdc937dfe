//! Server error types.

use std::fmt;

use stompframe_proto::ProtocolError;

use crate::registry::RegistryError;

/// Errors that can occur in the server runtime.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (unparseable bind address, zero limits, etc.).
    ///
    /// Fatal: prevents server startup.
    Config(String),

    /// Transport/network error (bind failure, accept failure, socket I/O).
    ///
    /// May be transient or fatal (bind address in use). Check the message.
    Transport(String),

    /// Protocol error (undecodable byte stream).
    ///
    /// Fatal for that connection only.
    Protocol(ProtocolError),

    /// Internal error (unexpected state, logic bug).
    ///
    /// Should never happen. Indicates a bug.
    Internal(String),

    /// Registry rejected a connection-level operation.
    Registry(RegistryError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(err) => write!(f, "protocol error: {err}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::Registry(err) => write!(f, "registry error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(err) => Some(err),
            Self::Registry(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RegistryError> for ServerError {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err)
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
