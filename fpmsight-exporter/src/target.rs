//! Description of the php-fpm status endpoint being polled.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub use fpmsight_fastcgi::Transport as TransportKind;

/// Errors raised when building a [`Target`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("target timeout must be > 0")]
    ZeroTimeout,
    #[error("target address must not be empty")]
    EmptyAddress,
    #[error("target path must not be empty")]
    EmptyPath,
}

/// One remote status endpoint.
///
/// Immutable once built; the collector owns it and shares it read-only
/// between scrapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    kind: TransportKind,
    address: String,
    path: String,
    timeout: Duration,
}

impl Target {
    /// Create a new target.
    ///
    /// `address` is `host:port` for TCP or a socket path for Unix, `path` is
    /// the status page location configured as `pm.status_path` in the pool.
    pub fn new(
        kind: TransportKind,
        address: impl Into<String>,
        path: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TargetError> {
        let address = address.into();
        let path = path.into();

        if timeout.is_zero() {
            return Err(TargetError::ZeroTimeout);
        }
        if address.trim().is_empty() {
            return Err(TargetError::EmptyAddress);
        }
        if path.trim().is_empty() {
            return Err(TargetError::EmptyPath);
        }

        Ok(Self {
            kind,
            address,
            path,
            timeout,
        })
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.kind, self.address, self.path)
    }
}
