//! FastCGI record framing.
//!
//! Every FastCGI message is a sequence of records:
//!
//! ```text
//! +---------+------+------------+----------------+----------------+----------+
//! | version | type | request id | content length | padding length | reserved |
//! |   u8    |  u8  |  u16 (BE)  |    u16 (BE)    |       u8       |    u8    |
//! +---------+------+------------+----------------+----------------+----------+
//! | content (content length bytes) | padding (padding length bytes)         |
//! +--------------------------------+----------------------------------------+
//! ```

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{FastCgiError, Result};

/// The only protocol version in use.
pub const VERSION_1: u8 = 1;

/// Size of a record header in bytes.
pub const HEADER_LEN: usize = 8;

/// Largest content a single record can carry.
pub const MAX_CONTENT_LEN: usize = u16::MAX as usize;

/// Role requested in `BEGIN_REQUEST`.
pub const ROLE_RESPONDER: u16 = 1;

/// `END_REQUEST` protocol status for a normally completed request.
pub const REQUEST_COMPLETE: u8 = 0;

/// FastCGI record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
    Data = 8,
    GetValues = 9,
    GetValuesResult = 10,
    UnknownType = 11,
}

impl RecordType {
    /// Decode a record type byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::BeginRequest),
            2 => Some(Self::AbortRequest),
            3 => Some(Self::EndRequest),
            4 => Some(Self::Params),
            5 => Some(Self::Stdin),
            6 => Some(Self::Stdout),
            7 => Some(Self::Stderr),
            8 => Some(Self::Data),
            9 => Some(Self::GetValues),
            10 => Some(Self::GetValuesResult),
            11 => Some(Self::UnknownType),
            _ => None,
        }
    }
}

/// A record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub record_type: u8,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl Header {
    /// Create a header, padding the content to an 8-byte boundary.
    pub fn new(record_type: RecordType, request_id: u16, content_length: u16) -> Self {
        let padding_length = ((8 - (content_length as usize % 8)) % 8) as u8;
        Self {
            version: VERSION_1,
            record_type: record_type as u8,
            request_id,
            content_length,
            padding_length,
        }
    }

    /// Encode the header into its wire form.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let id = self.request_id.to_be_bytes();
        let len = self.content_length.to_be_bytes();
        [
            self.version,
            self.record_type,
            id[0],
            id[1],
            len[0],
            len[1],
            self.padding_length,
            0,
        ]
    }

    /// Decode a header from its wire form.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        Self {
            version: buf[0],
            record_type: buf[1],
            request_id: u16::from_be_bytes([buf[2], buf[3]]),
            content_length: u16::from_be_bytes([buf[4], buf[5]]),
            padding_length: buf[6],
        }
    }
}

/// Append a single record to `buf`.
///
/// `content` must not exceed [`MAX_CONTENT_LEN`]; use [`write_stream`] for
/// larger payloads.
pub fn write_record(buf: &mut Vec<u8>, record_type: RecordType, request_id: u16, content: &[u8]) {
    debug_assert!(content.len() <= MAX_CONTENT_LEN);
    let header = Header::new(record_type, request_id, content.len() as u16);
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(content);
    buf.resize(buf.len() + header.padding_length as usize, 0);
}

/// Append a stream (PARAMS, STDIN, STDOUT, ...) to `buf`.
///
/// The content is split into records of at most [`MAX_CONTENT_LEN`] bytes
/// and followed by the empty record that closes the stream.
pub fn write_stream(buf: &mut Vec<u8>, record_type: RecordType, request_id: u16, content: &[u8]) {
    for chunk in content.chunks(MAX_CONTENT_LEN) {
        write_record(buf, record_type, request_id, chunk);
    }
    write_record(buf, record_type, request_id, &[]);
}

/// Body of a `BEGIN_REQUEST` record.
///
/// With `keep_conn` unset the server closes the connection when the request
/// ends.
pub fn begin_request_body(role: u16, keep_conn: bool) -> [u8; 8] {
    let role = role.to_be_bytes();
    [role[0], role[1], u8::from(keep_conn), 0, 0, 0, 0, 0]
}

/// Body of an `END_REQUEST` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequest {
    pub app_status: u32,
    pub protocol_status: u8,
}

impl EndRequest {
    /// Encode into the 8-byte record body.
    pub fn encode(&self) -> [u8; 8] {
        let s = self.app_status.to_be_bytes();
        [s[0], s[1], s[2], s[3], self.protocol_status, 0, 0, 0]
    }

    /// Decode from a record body.
    pub fn decode(content: &[u8]) -> Result<Self> {
        if content.len() < 8 {
            return Err(FastCgiError::protocol(format!(
                "END_REQUEST body too short: {} bytes",
                content.len()
            )));
        }
        Ok(Self {
            app_status: u32::from_be_bytes([content[0], content[1], content[2], content[3]]),
            protocol_status: content[4],
        })
    }
}

/// Encode name/value pairs into a PARAMS stream payload.
pub fn encode_params(params: &[(String, String)]) -> Vec<u8> {
    let mut buf = Vec::new();
    for (name, value) in params {
        encode_length(&mut buf, name.len());
        encode_length(&mut buf, value.len());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(value.as_bytes());
    }
    buf
}

/// Decode a PARAMS stream payload into name/value pairs.
pub fn decode_params(mut data: &[u8]) -> Result<Vec<(String, String)>> {
    let mut params = Vec::new();
    while !data.is_empty() {
        let name_len = decode_length(&mut data)?;
        let value_len = decode_length(&mut data)?;
        if data.len() < name_len + value_len {
            return Err(FastCgiError::protocol("truncated name/value pair"));
        }
        let name = String::from_utf8_lossy(&data[..name_len]).into_owned();
        let value = String::from_utf8_lossy(&data[name_len..name_len + value_len]).into_owned();
        data = &data[name_len + value_len..];
        params.push((name, value));
    }
    Ok(params)
}

fn encode_length(buf: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        buf.push(len as u8);
    } else {
        buf.extend_from_slice(&((len as u32) | 0x8000_0000).to_be_bytes());
    }
}

fn decode_length(data: &mut &[u8]) -> Result<usize> {
    let first = *data
        .first()
        .ok_or_else(|| FastCgiError::protocol("truncated name/value length"))?;
    if first & 0x80 == 0 {
        *data = &data[1..];
        return Ok(first as usize);
    }
    if data.len() < 4 {
        return Err(FastCgiError::protocol("truncated name/value length"));
    }
    let len = u32::from_be_bytes([first & 0x7f, data[1], data[2], data[3]]);
    *data = &data[4..];
    Ok(len as usize)
}

/// Read one record, returning its header and content. Padding is discarded.
pub async fn read_record<R>(reader: &mut R) -> Result<(Header, Vec<u8>)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut raw = [0u8; HEADER_LEN];
    read_exact(reader, &mut raw).await?;
    let header = Header::decode(&raw);

    if header.version != VERSION_1 {
        return Err(FastCgiError::protocol(format!(
            "unsupported FastCGI version {}",
            header.version
        )));
    }

    let mut content = vec![0u8; header.content_length as usize];
    read_exact(reader, &mut content).await?;

    if header.padding_length > 0 {
        let mut padding = [0u8; 255];
        read_exact(reader, &mut padding[..header.padding_length as usize]).await?;
    }

    Ok((header, content))
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(FastCgiError::UnexpectedEof)
        }
        Err(e) => Err(FastCgiError::Read(e)),
    }
}
