//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect timeout")]
    Timeout,

    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("receive failed: {0}")]
    Receive(#[source] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] jnova_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("session already started")]
    AlreadyStarted,
}

impl ClientError {
    /// Returns whether this error is an orderly close rather than a failure.
    pub fn is_orderly_close(&self) -> bool {
        matches!(self, ClientError::ConnectionClosed)
    }

    /// Returns whether the connection closed before a whole frame arrived.
    pub fn is_incomplete_frame(&self) -> bool {
        matches!(
            self,
            ClientError::Protocol(jnova_protocol::ProtocolError::IncompleteFrame { .. })
        )
    }
}
