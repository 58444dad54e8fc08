//! Querying the php-fpm status page.
//!
//! One query is one FastCGI request with `QUERY_STRING=json`, so php-fpm
//! answers with a JSON object such as:
//!
//! ```text
//! {"pool":"www","process manager":"dynamic","start time":1700000000,
//!  "start since":3600,"accepted conn":100,"listen queue":0,
//!  "max listen queue":1,"listen queue len":128,"idle processes":3,
//!  "active processes":2,"total processes":5,"max active processes":10,
//!  "max children reached":0,"slow requests":0}
//! ```

use std::future::Future;
use std::time::Duration;

use fpmsight_fastcgi::{Client, FastCgiError};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::target::Target;

/// Query string that makes php-fpm render the status page as JSON.
pub const STATUS_QUERY: &str = "json";

/// Remote address presented to php-fpm.
pub const REMOTE_ADDR: &str = "127.0.0.1";

/// Raw snapshot returned by one successful status query.
///
/// Numeric fields missing from the body read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StatusFields {
    #[serde(rename = "pool")]
    pub pool: String,
    #[serde(rename = "process manager")]
    pub process_manager: String,
    #[serde(rename = "start time")]
    pub start_time: i64,
    #[serde(rename = "start since")]
    pub start_since: i64,
    #[serde(rename = "accepted conn")]
    pub accepted_conn: i64,
    #[serde(rename = "listen queue")]
    pub listen_queue: i64,
    #[serde(rename = "max listen queue")]
    pub max_listen_queue: i64,
    #[serde(rename = "listen queue len")]
    pub listen_queue_len: i64,
    #[serde(rename = "idle processes")]
    pub idle_processes: i64,
    #[serde(rename = "active processes")]
    pub active_processes: i64,
    #[serde(rename = "total processes")]
    pub total_processes: i64,
    #[serde(rename = "max active processes")]
    pub max_active_processes: i64,
    #[serde(rename = "max children reached")]
    pub max_children_reached: i64,
    #[serde(rename = "slow requests")]
    pub slow_requests: i64,
}

/// Reasons a status body cannot be turned into [`StatusFields`].
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

impl StatusFields {
    /// Parse a status page body.
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        if !value.is_object() {
            return Err(ParseError::NotAnObject(json_type(&value)));
        }
        Ok(serde_json::from_value(value)?)
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Failure classes of a status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The target could not be reached within the timeout.
    Connect,
    /// Connected, but the exchange failed or timed out.
    Request,
    /// The response stream was cut short or could not be read.
    Read,
    /// The body is not a status record.
    Parse,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Connect => "connect",
            FailureKind::Request => "request",
            FailureKind::Read => "read",
            FailureKind::Parse => "parse",
        }
    }
}

/// Error returned by a [`StatusQuerier`].
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("connect failed: {0}")]
    Connect(#[source] FastCgiError),

    #[error("request failed: {0}")]
    Request(#[source] FastCgiError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("status page answered with HTTP {0}")]
    Status(u16),

    #[error("reading response failed: {0}")]
    Read(#[source] FastCgiError),

    #[error("invalid status body: {0}")]
    Parse(#[from] ParseError),
}

impl QueryError {
    /// Classify the error.
    pub fn kind(&self) -> FailureKind {
        match self {
            QueryError::Connect(_) => FailureKind::Connect,
            QueryError::Request(_) | QueryError::Timeout(_) | QueryError::Status(_) => {
                FailureKind::Request
            }
            QueryError::Read(_) => FailureKind::Read,
            QueryError::Parse(_) => FailureKind::Parse,
        }
    }
}

impl From<FastCgiError> for QueryError {
    fn from(err: FastCgiError) -> Self {
        match err {
            FastCgiError::Connect { .. }
            | FastCgiError::ConnectTimeout { .. }
            | FastCgiError::UnsupportedTransport(_) => QueryError::Connect(err),
            FastCgiError::Read(_) | FastCgiError::UnexpectedEof => QueryError::Read(err),
            FastCgiError::Write(_) | FastCgiError::Protocol(_) | FastCgiError::Rejected(_) => {
                QueryError::Request(err)
            }
        }
    }
}

/// Everything needed to issue one status query: the target plus the
/// FastCGI parameters derived from it.
///
/// Built once per target and passed by reference into every query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRequest {
    target: Target,
    params: Vec<(String, String)>,
}

impl StatusRequest {
    pub fn new(target: Target) -> Self {
        let path = target.path().to_string();
        let params = vec![
            ("SCRIPT_FILENAME".to_string(), path.clone()),
            ("SCRIPT_NAME".to_string(), path),
            ("REQUEST_METHOD".to_string(), "GET".to_string()),
            ("CONTENT_LENGTH".to_string(), "0".to_string()),
            (
                "SERVER_SOFTWARE".to_string(),
                concat!("fpmsight-exporter/", env!("CARGO_PKG_VERSION")).to_string(),
            ),
            ("REMOTE_ADDR".to_string(), REMOTE_ADDR.to_string()),
            ("QUERY_STRING".to_string(), STATUS_QUERY.to_string()),
        ];

        Self { target, params }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Look up a parameter value by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Performs one status query against a target.
pub trait StatusQuerier: Send + Sync + 'static {
    /// Query the target once. No retries.
    fn query(
        &self,
        request: &StatusRequest,
    ) -> impl Future<Output = Result<StatusFields, QueryError>> + Send;
}

/// [`StatusQuerier`] speaking FastCGI to php-fpm, one connection per query.
#[derive(Debug, Clone, Copy, Default)]
pub struct FastCgiQuerier;

impl FastCgiQuerier {
    pub fn new() -> Self {
        Self
    }
}

impl StatusQuerier for FastCgiQuerier {
    async fn query(&self, request: &StatusRequest) -> Result<StatusFields, QueryError> {
        let target = request.target();
        let timeout = target.timeout();

        // One deadline covers the dial and the exchange
        let deadline = tokio::time::Instant::now() + timeout;

        let client = Client::dial(target.kind(), target.address(), timeout).await?;

        let response = tokio::time::timeout_at(deadline, client.request(request.params()))
            .await
            .map_err(|_| QueryError::Timeout(timeout))??;

        if !response.stderr.is_empty() {
            debug!(
                stderr = %String::from_utf8_lossy(&response.stderr),
                "php-fpm wrote to stderr"
            );
        }

        if !response.is_success() {
            return Err(QueryError::Status(response.status));
        }

        trace!(bytes = response.body.len(), "Status body received");

        Ok(StatusFields::parse(&response.body)?)
    }
}
