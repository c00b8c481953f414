//! Connection classifiers
//!
//! A matcher inspects the start of a connection through a [`Sniffer`] and
//! decides whether it belongs to its route. Matchers never write to the
//! connection. Running out of input (`UnexpectedEof`) and malformed input
//! (`InvalidData`) both count as "no match"; the next route is tried.

use async_trait::async_trait;
use std::io;

use super::sniff::Sniffer;

/// HTTP/2 client connection preface (RFC 9113 §3.4)
pub const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Methods recognised by [`Http1Fast`]
pub const HTTP1_METHODS: &[&str] = &[
    "OPTIONS", "GET", "HEAD", "POST", "PUT", "DELETE", "TRACE", "CONNECT", "PATCH",
];

const MAX_REQUEST_LINE: usize = 4096;

const FRAME_HEADER_LEN: usize = 9;
const FRAME_HEADERS: u8 = 0x1;
const FRAME_GOAWAY: u8 = 0x7;
const FRAME_CONTINUATION: u8 = 0x9;
const FLAG_END_HEADERS: u8 = 0x4;
const FLAG_PADDED: u8 = 0x8;
const FLAG_PRIORITY: u8 = 0x20;

#[async_trait]
pub trait Matcher: Send + Sync {
    /// Short label used in logs and metrics
    fn name(&self) -> &str;

    async fn matches(&self, sniffer: &mut Sniffer) -> io::Result<bool>;
}

/// Claims every connection
#[derive(Debug, Clone, Default)]
pub struct Any;

#[async_trait]
impl Matcher for Any {
    fn name(&self) -> &str {
        "any"
    }

    async fn matches(&self, _sniffer: &mut Sniffer) -> io::Result<bool> {
        Ok(true)
    }
}

/// Claims connections starting with any of the given byte strings
#[derive(Debug, Clone)]
pub struct Prefix {
    name: String,
    prefixes: Vec<Vec<u8>>,
}

impl Prefix {
    pub fn new<I, P>(name: impl Into<String>, prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        Self {
            name: name.into(),
            prefixes: prefixes
                .into_iter()
                .map(|p| p.as_ref().to_vec())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }
}

#[async_trait]
impl Matcher for Prefix {
    fn name(&self) -> &str {
        &self.name
    }

    async fn matches(&self, sniffer: &mut Sniffer) -> io::Result<bool> {
        if self.prefixes.is_empty() {
            return Ok(false);
        }

        let mut needed = 1;
        loop {
            let available = sniffer.peek_available(needed).await?;
            if self.prefixes.iter().any(|p| available.starts_with(p)) {
                return Ok(true);
            }
            let still_possible = self
                .prefixes
                .iter()
                .any(|p| p.len() > available.len() && p.starts_with(available));
            if !still_possible {
                return Ok(false);
            }
            needed = available.len() + 1;
        }
    }
}

/// Cheap HTTP/1 check: the connection opens with a known method name
#[derive(Debug, Clone)]
pub struct Http1Fast(Prefix);

impl Default for Http1Fast {
    fn default() -> Self {
        Self(Prefix::new("http1", HTTP1_METHODS))
    }
}

#[async_trait]
impl Matcher for Http1Fast {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn matches(&self, sniffer: &mut Sniffer) -> io::Result<bool> {
        self.0.matches(sniffer).await
    }
}

/// Strict HTTP/1 check: the request line names an `HTTP/1.x` version
#[derive(Debug, Clone, Default)]
pub struct Http1;

#[async_trait]
impl Matcher for Http1 {
    fn name(&self) -> &str {
        "http1"
    }

    async fn matches(&self, sniffer: &mut Sniffer) -> io::Result<bool> {
        let line = match sniffer.read_line(MAX_REQUEST_LINE).await {
            Ok(line) => line,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => return Ok(false),
            Err(e) => return Err(e),
        };

        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let mut parts = line.split(|b| *b == b' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Ok(false);
        };

        Ok(!method.is_empty() && !target.is_empty() && version.starts_with(b"HTTP/1."))
    }
}

/// Any HTTP/2 connection using prior knowledge
#[derive(Debug, Clone, Default)]
pub struct Http2;

#[async_trait]
impl Matcher for Http2 {
    fn name(&self) -> &str {
        "http2"
    }

    async fn matches(&self, sniffer: &mut Sniffer) -> io::Result<bool> {
        sniffer.match_prefix(HTTP2_PREFACE).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldValue {
    Exact(Vec<u8>),
    Prefix(Vec<u8>),
}

/// HTTP/2 connection whose first request carries a given header field.
///
/// Reads the preface, skips frames until the first header block completes,
/// HPACK-decodes it and compares the field.
#[derive(Debug, Clone)]
pub struct Http2HeaderField {
    name: String,
    field: Vec<u8>,
    value: FieldValue,
}

impl Http2HeaderField {
    /// Field must equal `value`
    pub fn exact(name: impl Into<String>, field: &str, value: &str) -> Self {
        Self {
            name: name.into(),
            field: field.to_ascii_lowercase().into_bytes(),
            value: FieldValue::Exact(value.as_bytes().to_vec()),
        }
    }

    /// Field must start with `prefix`
    pub fn prefix(name: impl Into<String>, field: &str, prefix: &str) -> Self {
        Self {
            name: name.into(),
            field: field.to_ascii_lowercase().into_bytes(),
            value: FieldValue::Prefix(prefix.as_bytes().to_vec()),
        }
    }

    fn accepts(&self, headers: &[(Vec<u8>, Vec<u8>)]) -> bool {
        headers.iter().any(|(name, value)| {
            name == &self.field
                && match &self.value {
                    FieldValue::Exact(expected) => value == expected,
                    FieldValue::Prefix(prefix) => value.starts_with(prefix),
                }
        })
    }
}

#[async_trait]
impl Matcher for Http2HeaderField {
    fn name(&self) -> &str {
        &self.name
    }

    async fn matches(&self, sniffer: &mut Sniffer) -> io::Result<bool> {
        if !sniffer.match_prefix(HTTP2_PREFACE).await? {
            return Ok(false);
        }

        let mut block: Option<Vec<u8>> = None;
        loop {
            let header: [u8; FRAME_HEADER_LEN] = sniffer
                .read_exact(FRAME_HEADER_LEN)
                .await?
                .try_into()
                .map_err(|_| io::Error::from(io::ErrorKind::InvalidData))?;
            let length = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
            let kind = header[3];
            let flags = header[4];
            let payload = sniffer.read_exact(length).await?;

            match (kind, block.as_mut()) {
                (FRAME_HEADERS, _) => {
                    let Some(fragment) = header_block_fragment(payload, flags) else {
                        return Ok(false);
                    };
                    block = Some(fragment.to_vec());
                }
                (FRAME_CONTINUATION, Some(block)) => block.extend_from_slice(payload),
                (FRAME_GOAWAY, _) => return Ok(false),
                // Only CONTINUATION may follow an unfinished header block
                (_, Some(_)) => return Ok(false),
                (_, None) => continue,
            }

            if flags & FLAG_END_HEADERS != 0
                && let Some(block) = block.take()
            {
                let headers = decode_header_block(&block)?;
                return Ok(self.accepts(&headers));
            }
        }
    }
}

/// HPACK-decode a complete header block with a fresh dynamic table.
///
/// hpack 0.3 unwraps the integer of a dynamic table size update, so an
/// overlong one from the peer panics inside the decoder. That panic is
/// contained here and reported as `InvalidData` like any other bad block.
fn decode_header_block(block: &[u8]) -> io::Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let decoded = std::panic::catch_unwind(|| hpack::Decoder::new().decode(block))
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "header block crashed the decoder"))?;

    decoded.map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid header block: {:?}", e),
        )
    })
}

/// Strip padding and priority fields from a HEADERS payload
fn header_block_fragment(payload: &[u8], flags: u8) -> Option<&[u8]> {
    let mut start = 0;
    let mut end = payload.len();

    if flags & FLAG_PADDED != 0 {
        let padding = *payload.first()? as usize;
        start = 1;
        end = end.checked_sub(padding)?;
    }
    if flags & FLAG_PRIORITY != 0 {
        start += 5;
    }

    payload.get(start..end)
}

pub fn any() -> Any {
    Any
}

pub fn prefix<I, P>(name: impl Into<String>, prefixes: I) -> Prefix
where
    I: IntoIterator<Item = P>,
    P: AsRef<[u8]>,
{
    Prefix::new(name, prefixes)
}

pub fn http1_fast() -> Http1Fast {
    Http1Fast::default()
}

pub fn http1() -> Http1 {
    Http1
}

pub fn http2() -> Http2 {
    Http2
}

/// gRPC over HTTP/2: `content-type` starting with `application/grpc`
pub fn grpc() -> Http2HeaderField {
    Http2HeaderField::prefix("grpc", "content-type", "application/grpc")
}
