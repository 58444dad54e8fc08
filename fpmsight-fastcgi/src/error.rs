use std::time::Duration;

use thiserror::Error;

/// Result type alias using [`FastCgiError`].
pub type Result<T> = std::result::Result<T, FastCgiError>;

/// Errors that can occur while talking to a FastCGI server.
#[derive(Debug, Error)]
pub enum FastCgiError {
    /// The connection could not be established.
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The connection was not established within the dial timeout.
    #[error("Timed out connecting to {address} after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    /// The requested transport is unknown or unavailable on this platform.
    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// Writing the request to the connection failed.
    #[error("Failed to send request: {0}")]
    Write(#[source] std::io::Error),

    /// Reading the response from the connection failed.
    #[error("Failed to read response: {0}")]
    Read(#[source] std::io::Error),

    /// The server closed the connection before ending the request.
    #[error("Connection closed before the request completed")]
    UnexpectedEof,

    /// The server sent something that is not valid FastCGI.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server ended the request with a non-complete protocol status.
    #[error("Request rejected by server (protocol status {0})")]
    Rejected(u8),
}

impl FastCgiError {
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}
