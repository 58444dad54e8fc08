//! FastCGI connection dialing and request/response exchange.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::{FastCgiError, Result};
use crate::record::{
    self, EndRequest, REQUEST_COMPLETE, ROLE_RESPONDER, RecordType, begin_request_body,
    encode_params, write_record, write_stream,
};

/// Request id used for the single request carried on each connection.
const REQUEST_ID: u16 = 1;

/// Default cap on the combined STDOUT and STDERR size of one response.
pub const DEFAULT_MAX_OUTPUT: usize = 4 * 1024 * 1024;

/// A bidirectional byte stream a [`Client`] can run over.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// Transport used to reach the FastCGI server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// TCP socket, address in `host:port` form.
    #[default]
    Tcp,
    /// Unix domain socket, address is a filesystem path.
    Unix,
}

impl Transport {
    /// Get the transport name as used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Unix => "unix",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = FastCgiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "unix" => Ok(Transport::Unix),
            other => Err(FastCgiError::UnsupportedTransport(other.to_string())),
        }
    }
}

/// Response returned by the FastCGI server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status from the CGI `Status:` header (200 when absent).
    pub status: u16,
    /// CGI response headers in the order they were received.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
    /// Anything the application wrote to its error stream.
    pub stderr: Vec<u8>,
    /// Application exit status from `END_REQUEST`.
    pub app_status: u32,
}

impl Response {
    /// Build a response from the collected STDOUT and STDERR streams.
    pub fn parse(stdout: Vec<u8>, stderr: Vec<u8>, app_status: u32) -> Result<Self> {
        let (head, body) = match split_head(&stdout) {
            Some((head_end, body_start)) => (&stdout[..head_end], stdout[body_start..].to_vec()),
            None => (&stdout[..0], stdout.clone()),
        };

        let head = std::str::from_utf8(head)
            .map_err(|_| FastCgiError::protocol("response headers are not valid UTF-8"))?;

        let mut headers = Vec::new();
        for line in head.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FastCgiError::protocol(format!("malformed header: {}", line)))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        let status = match headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("status"))
        {
            Some((_, value)) => value
                .split_whitespace()
                .next()
                .and_then(|code| code.parse::<u16>().ok())
                .ok_or_else(|| FastCgiError::protocol(format!("invalid status: {}", value)))?,
            None => 200,
        };

        Ok(Self {
            status,
            headers,
            body,
            stderr,
            app_status,
        })
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Locate the blank line separating headers from body.
///
/// Returns the end of the header block and the start of the body.
fn split_head(stdout: &[u8]) -> Option<(usize, usize)> {
    let crlf = stdout.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = stdout.windows(2).position(|w| w == b"\n\n");

    match (crlf, lf) {
        (Some(c), Some(l)) if l < c => Some((l, l + 2)),
        (Some(c), _) => Some((c, c + 4)),
        (None, Some(l)) => Some((l, l + 2)),
        (None, None) => None,
    }
}

/// A connection to a FastCGI server carrying a single request.
pub struct Client {
    stream: Box<dyn Stream>,
    max_output: usize,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("max_output", &self.max_output)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Connect to a FastCGI server, giving up after `timeout`.
    pub async fn dial(transport: Transport, address: &str, timeout: Duration) -> Result<Self> {
        debug!(%transport, address, ?timeout, "Dialing FastCGI server");

        let stream: Box<dyn Stream> = match transport {
            Transport::Tcp => {
                let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
                    .await
                    .map_err(|_| FastCgiError::ConnectTimeout {
                        address: address.to_string(),
                        timeout,
                    })?
                    .map_err(|source| FastCgiError::Connect {
                        address: address.to_string(),
                        source,
                    })?;
                stream.set_nodelay(true).ok();
                Box::new(stream)
            }
            Transport::Unix => connect_unix(address, timeout).await?,
        };

        Ok(Self {
            stream,
            max_output: DEFAULT_MAX_OUTPUT,
        })
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: impl Stream + 'static) -> Self {
        Self {
            stream: Box::new(stream),
            max_output: DEFAULT_MAX_OUTPUT,
        }
    }

    /// Limit the combined STDOUT and STDERR bytes accepted for the response.
    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }

    /// Send one request with the given parameters and an empty body, then
    /// read the full response.
    pub async fn request(mut self, params: &[(String, String)]) -> Result<Response> {
        let mut buf = Vec::new();
        write_record(
            &mut buf,
            RecordType::BeginRequest,
            REQUEST_ID,
            &begin_request_body(ROLE_RESPONDER, false),
        );
        write_stream(&mut buf, RecordType::Params, REQUEST_ID, &encode_params(params));
        write_stream(&mut buf, RecordType::Stdin, REQUEST_ID, &[]);

        self.stream
            .write_all(&buf)
            .await
            .map_err(FastCgiError::Write)?;
        self.stream.flush().await.map_err(FastCgiError::Write)?;

        trace!(bytes = buf.len(), params = params.len(), "FastCGI request sent");

        self.read_response().await
    }

    async fn read_response(&mut self) -> Result<Response> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        loop {
            let (header, content) = record::read_record(&mut self.stream).await?;

            if header.request_id != REQUEST_ID {
                trace!(request_id = header.request_id, "Ignoring record for other request");
                continue;
            }

            let record_type = RecordType::from_u8(header.record_type);
            if matches!(record_type, Some(RecordType::Stdout | RecordType::Stderr))
                && stdout.len() + stderr.len() + content.len() > self.max_output
            {
                return Err(FastCgiError::protocol(format!(
                    "response exceeds {} bytes",
                    self.max_output
                )));
            }

            match record_type {
                Some(RecordType::Stdout) => stdout.extend_from_slice(&content),
                Some(RecordType::Stderr) => stderr.extend_from_slice(&content),
                Some(RecordType::EndRequest) => {
                    let end = EndRequest::decode(&content)?;
                    if end.protocol_status != REQUEST_COMPLETE {
                        return Err(FastCgiError::Rejected(end.protocol_status));
                    }
                    debug!(
                        stdout = stdout.len(),
                        stderr = stderr.len(),
                        app_status = end.app_status,
                        "FastCGI request completed"
                    );
                    return Response::parse(stdout, stderr, end.app_status);
                }
                _ => {
                    trace!(record_type = header.record_type, "Ignoring unexpected record");
                }
            }
        }
    }
}

#[cfg(unix)]
async fn connect_unix(address: &str, timeout: Duration) -> Result<Box<dyn Stream>> {
    let stream = tokio::time::timeout(timeout, tokio::net::UnixStream::connect(address))
        .await
        .map_err(|_| FastCgiError::ConnectTimeout {
            address: address.to_string(),
            timeout,
        })?
        .map_err(|source| FastCgiError::Connect {
            address: address.to_string(),
            source,
        })?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
async fn connect_unix(_address: &str, _timeout: Duration) -> Result<Box<dyn Stream>> {
    Err(FastCgiError::UnsupportedTransport(
        "unix sockets are not available on this platform".to_string(),
    ))
}
