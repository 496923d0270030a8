//! Incremental HTTP/1.x request parser.
//!
//! Bytes are appended with [`Parser::feed`] as they arrive; events are pulled
//! with [`Parser::next_event`]. For every message the order is always
//! `Head`, zero or more `Data`, optionally `Trailers`, then `Complete`.
//! Unconsumed bytes stay buffered, so a pipelined request that arrives
//! together with the previous one is picked up after `Complete`.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{ParseError, ParseErrorKind};
use crate::http::headers::Headers;
use crate::http::request::{Method, Version};

/// Longest chunk-size line accepted, extensions included.
const MAX_CHUNK_LINE: usize = 1024;

/// How much raw input a [`ParseError`] keeps for diagnostics.
const DIAGNOSTIC_PREFIX: usize = 512;

#[derive(Debug, Clone, Copy)]
pub struct ParserLimits {
    /// Maximum size of the request line plus header block (and of a
    /// trailer block).
    pub max_header_size: usize,
    /// Maximum size of a single `Data` event.
    pub body_emit_size: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_header_size: 32 * 1024,
            body_emit_size: 32 * 1024,
        }
    }
}

/// How the body of a message is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Empty,
    Length(u64),
    Chunked,
}

/// Request line and headers of one message.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: Headers,
    pub body: BodyKind,
}

#[derive(Debug)]
pub enum Event {
    Head(RequestHead),
    Data(Bytes),
    Trailers(Headers),
    Complete,
}

/// Coarse parser state, per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    AwaitingHeaders,
    ReadingBody,
    Complete,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Head,
    Length(u64),
    ChunkSize,
    ChunkData(u64),
    ChunkDataEnd,
    Trailers,
    /// Body done; `Complete` is the next event.
    Finish,
    Complete,
}

pub struct Parser {
    buf: BytesMut,
    state: State,
    limits: ParserLimits,
}

impl Parser {
    pub fn new(limits: ParserLimits) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            state: State::Head,
            limits,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn state(&self) -> ParserState {
        match self.state {
            State::Head => ParserState::AwaitingHeaders,
            State::Complete => ParserState::Complete,
            _ => ParserState::ReadingBody,
        }
    }

    /// True between messages with nothing buffered.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Head | State::Complete) && self.buf.is_empty()
    }

    pub fn set_max_header_size(&mut self, limit: usize) {
        self.limits.max_header_size = limit;
    }

    /// Pulls the next event, or `None` if more bytes are needed.
    pub fn next_event(&mut self) -> Result<Option<Event>, ParseError> {
        loop {
            match self.state {
                State::Complete => {
                    self.state = State::Head;
                }
                State::Head => return self.parse_head(),
                State::Length(0) | State::Finish => {
                    self.state = State::Complete;
                    return Ok(Some(Event::Complete));
                }
                State::Length(remaining) => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let data = self.take_body(remaining);
                    self.state = State::Length(remaining - data.len() as u64);
                    return Ok(Some(Event::Data(data)));
                }
                State::ChunkSize => {
                    let Some(line_end) = find_crlf(&self.buf) else {
                        if self.buf.len() > MAX_CHUNK_LINE {
                            return Err(self.fail(ParseErrorKind::InvalidChunk));
                        }
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&self.buf[..line_end])
                        .ok_or_else(|| self.fail(ParseErrorKind::InvalidChunk))?;
                    self.buf.advance(line_end + 2);
                    self.state = if size == 0 {
                        State::Trailers
                    } else {
                        State::ChunkData(size)
                    };
                }
                State::ChunkData(0) => {
                    self.state = State::ChunkDataEnd;
                }
                State::ChunkData(remaining) => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let data = self.take_body(remaining);
                    self.state = State::ChunkData(remaining - data.len() as u64);
                    return Ok(Some(Event::Data(data)));
                }
                State::ChunkDataEnd => {
                    if self.buf.len() < 2 {
                        return Ok(None);
                    }
                    if &self.buf[..2] != b"\r\n" {
                        return Err(self.fail(ParseErrorKind::InvalidChunk));
                    }
                    self.buf.advance(2);
                    self.state = State::ChunkSize;
                }
                State::Trailers => {
                    if self.buf.starts_with(b"\r\n") {
                        self.buf.advance(2);
                        self.state = State::Complete;
                        return Ok(Some(Event::Complete));
                    }
                    let Some(end) = find_headers_end(&self.buf) else {
                        if self.buf.len() > self.limits.max_header_size {
                            return Err(self.too_large());
                        }
                        return Ok(None);
                    };
                    if end + 4 > self.limits.max_header_size {
                        return Err(self.too_large());
                    }
                    let block = self.buf.split_to(end + 4);
                    let text = std::str::from_utf8(&block[..end])
                        .map_err(|_| self.fail(ParseErrorKind::InvalidHeader))?;
                    let trailers = parse_header_lines(text.split("\r\n"))
                        .map_err(|kind| self.fail(kind))?;
                    self.state = State::Finish;
                    return Ok(Some(Event::Trailers(trailers)));
                }
            }
        }
    }

    fn parse_head(&mut self) -> Result<Option<Event>, ParseError> {
        // Tolerate empty lines between pipelined messages.
        while self.buf.starts_with(b"\r\n") {
            self.buf.advance(2);
        }

        let Some(headers_end) = find_headers_end(&self.buf) else {
            if self.buf.len() > self.limits.max_header_size {
                return Err(self.too_large());
            }
            return Ok(None);
        };
        if headers_end + 4 > self.limits.max_header_size {
            return Err(self.too_large());
        }

        let head = self.decode_head(headers_end)?;
        self.buf.advance(headers_end + 4);
        self.state = match head.body {
            BodyKind::Empty => State::Length(0),
            BodyKind::Length(n) => State::Length(n),
            BodyKind::Chunked => State::ChunkSize,
        };
        Ok(Some(Event::Head(head)))
    }

    fn decode_head(&self, headers_end: usize) -> Result<RequestHead, ParseError> {
        let headers_str = std::str::from_utf8(&self.buf[..headers_end])
            .map_err(|_| self.fail(ParseErrorKind::InvalidRequestLine))?;

        let mut lines = headers_str.split("\r\n");

        // Request line
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split(' ');
        let (Some(method_str), Some(target), Some(version_str), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(self.fail(ParseErrorKind::InvalidRequestLine));
        };
        if target.is_empty() {
            return Err(self.fail(ParseErrorKind::InvalidRequestLine));
        }

        let method = Method::from_str(method_str).ok_or_else(|| self.fail(ParseErrorKind::InvalidMethod))?;
        let version = match Version::from_str(version_str) {
            Some(v @ (Version::Http10 | Version::Http11)) => v,
            _ if version_str.starts_with("HTTP/") => {
                return Err(self.fail(ParseErrorKind::InvalidVersion));
            }
            _ => return Err(self.fail(ParseErrorKind::InvalidRequestLine)),
        };

        // Headers
        let headers = parse_header_lines(lines).map_err(|kind| self.fail(kind))?;

        if version == Version::Http11 && !headers.contains("Host") {
            return Err(self.fail(ParseErrorKind::MissingHost));
        }

        let body = body_kind(&headers).map_err(|kind| self.fail(kind))?;

        Ok(RequestHead {
            method,
            target: target.to_string(),
            version,
            headers,
            body,
        })
    }

    fn take_body(&mut self, remaining: u64) -> Bytes {
        let n = (self.buf.len() as u64)
            .min(remaining)
            .min(self.limits.body_emit_size as u64) as usize;
        self.buf.split_to(n).freeze()
    }

    fn fail(&self, kind: ParseErrorKind) -> ParseError {
        let n = self.buf.len().min(DIAGNOSTIC_PREFIX);
        ParseError::new(kind, Bytes::copy_from_slice(&self.buf[..n]))
    }

    fn too_large(&self) -> ParseError {
        self.fail(ParseErrorKind::HeaderTooLarge {
            limit: self.limits.max_header_size,
        })
    }
}

/// Determines body framing. A chunked Transfer-Encoding wins over
/// Content-Length.
fn body_kind(headers: &Headers) -> Result<BodyKind, ParseErrorKind> {
    if headers.contains("Transfer-Encoding") {
        let last = headers
            .get_all("Transfer-Encoding")
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .last();
        return match last {
            Some(coding) if coding.eq_ignore_ascii_case("chunked") => Ok(BodyKind::Chunked),
            _ => Err(ParseErrorKind::UnsupportedTransferCoding),
        };
    }

    let mut length: Option<u64> = None;
    for value in headers.get_all("Content-Length").flat_map(|v| v.split(',')) {
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseErrorKind::InvalidContentLength);
        }
        let n: u64 = value.parse().map_err(|_| ParseErrorKind::InvalidContentLength)?;
        match length {
            Some(prev) if prev != n => return Err(ParseErrorKind::InvalidContentLength),
            _ => length = Some(n),
        }
    }

    Ok(match length {
        None | Some(0) => BodyKind::Empty,
        Some(n) => BodyKind::Length(n),
    })
}

fn parse_header_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Headers, ParseErrorKind> {
    let mut headers = Headers::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }
        // Obsolete line folding is rejected.
        if line.starts_with(' ') || line.starts_with('\t') {
            return Err(ParseErrorKind::InvalidHeader);
        }

        let (key, value) = line.split_once(':').ok_or(ParseErrorKind::InvalidHeader)?;
        if key.is_empty() || !key.bytes().all(is_token_byte) {
            return Err(ParseErrorKind::InvalidHeader);
        }

        headers.append(key, value.trim_matches(|c| c == ' ' || c == '\t'));
    }

    Ok(headers)
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parses `HEX [; ext]`. Extensions are ignored.
fn parse_chunk_size(line: &[u8]) -> Option<u64> {
    let hex_end = line
        .iter()
        .position(|&b| b == b';' || b == b' ' || b == b'\t')
        .unwrap_or(line.len());
    let hex = &line[..hex_end];
    if hex.is_empty() || hex.len() > 16 {
        return None;
    }

    let mut n: u64 = 0;
    for &b in hex {
        let d = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return None,
        };
        n = n.checked_mul(16)?.checked_add(d as u64)?;
    }
    Some(n)
}
