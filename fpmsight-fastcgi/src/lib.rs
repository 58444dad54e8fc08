//! FastCGI client for fpmsight.
//!
//! This crate implements the responder side of the FastCGI protocol that is
//! needed to fetch a php-fpm status page:
//!
//! - [`record`] - Record framing and name/value parameter encoding
//! - [`client`] - Connection dialing (`tcp` or `unix`) and a single
//!   request/response exchange
//! - [`error`] - Error types
//!
//! One [`Client`] performs exactly one request; the server closes the
//! connection once the request completes.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use fpmsight_fastcgi::{Client, Transport};
//!
//! let client = Client::dial(Transport::Tcp, "127.0.0.1:9000", Duration::from_secs(3)).await?;
//! let params = vec![
//!     ("SCRIPT_FILENAME".to_string(), "/fpm_status".to_string()),
//!     ("SCRIPT_NAME".to_string(), "/fpm_status".to_string()),
//!     ("QUERY_STRING".to_string(), "json".to_string()),
//! ];
//! let response = client.request(&params).await?;
//! println!("{}", String::from_utf8_lossy(&response.body));
//! ```

pub mod client;
pub mod error;
pub mod record;

pub use client::{Client, DEFAULT_MAX_OUTPUT, Response, Stream, Transport};
pub use error::{FastCgiError, Result};
