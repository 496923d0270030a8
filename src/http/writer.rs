//! Response serialization and socket draining.
//!
//! [`normalize`] applies the header rules to a response and decides framing;
//! [`ResponseWriter`] turns the result into wire bytes and drains them,
//! whether the body is a fixed buffer or a lazy chunk sequence.

use std::fmt::Write as _;

use bytes::{Buf, BytesMut};
use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::config::Config;
use crate::error::Error;
use crate::http::request::{Method, Request, Version};
use crate::http::response::{ChunkStream, Response, ResponseBody, StatusCode};

/// Terminal chunk of a chunked body (no trailers).
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Everything the writer needs to know about the exchange, fixed for the
/// duration of one write.
#[derive(Debug, Clone, Copy)]
pub struct WriteContext<'a> {
    pub version: Version,
    pub head_request: bool,
    /// Close after this response regardless of what the response says.
    pub close_requested: bool,
    pub keep_alive_timeout: u64,
    pub server_token: Option<&'a str>,
    pub date: &'a str,
    pub default_content_type: &'a str,
    pub default_charset: &'a str,
}

impl<'a> WriteContext<'a> {
    pub fn new(config: &'a Config, date: &'a str) -> Self {
        Self {
            version: Version::Http11,
            head_request: false,
            close_requested: false,
            keep_alive_timeout: config.keep_alive_timeout,
            server_token: config.server_token.as_deref().filter(|s| !s.is_empty()),
            date,
            default_content_type: &config.default_content_type,
            default_charset: &config.default_charset,
        }
    }

    /// Takes version, method and keep-alive preference from the request.
    pub fn for_request(mut self, request: &Request) -> Self {
        self.version = request.version;
        self.head_request = request.method == Method::HEAD;
        self.close_requested |= !request.keep_alive();
        self
    }

    pub fn close(mut self, close: bool) -> Self {
        self.close_requested |= close;
        self
    }
}

/// Body delimitation chosen for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body on the wire (interim, 204 and 304 responses).
    Empty,
    Length(u64),
    Chunked,
    /// Body ends when the connection closes.
    CloseDelimited,
    /// HTTP/2 DATA frames of unknown total length.
    Frames,
}

/// Outcome of header normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Head {
    pub framing: Framing,
    pub must_close: bool,
    /// Headers are written but body bytes are not.
    pub suppress_body: bool,
}

/// Applies the header rules to `response` in place.
///
/// Normalizing an already normalized response changes nothing.
pub fn normalize(response: &mut Response, ctx: &WriteContext<'_>) -> Head {
    let status = response.status;

    if status.is_informational() {
        return Head {
            framing: Framing::Empty,
            must_close: false,
            suppress_body: true,
        };
    }

    let h2 = ctx.version == Version::H2;
    let no_content = status == StatusCode::NO_CONTENT;
    let not_modified = status == StatusCode::NOT_MODIFIED;
    let headers = &mut response.headers;

    let mut must_close = !h2
        && (ctx.close_requested
            || ctx.version < Version::Http11
            || headers.has_token("Connection", "close"));

    // 1. Framing
    let framing = match &response.body {
        ResponseBody::Fixed(body) => {
            headers.remove("Transfer-Encoding");
            if no_content {
                headers.remove("Content-Length");
            } else if !not_modified || !body.is_empty() || !headers.contains("Content-Length") {
                headers.insert("Content-Length", body.len().to_string());
            }
            Framing::Length(body.len() as u64)
        }
        ResponseBody::Stream(_) if no_content || not_modified => {
            headers.remove("Transfer-Encoding");
            if no_content {
                headers.remove("Content-Length");
            }
            Framing::Empty
        }
        ResponseBody::Stream(_) => {
            let declared = headers
                .get("Content-Length")
                .and_then(|v| v.trim().parse::<u64>().ok());
            match declared {
                Some(n) => {
                    headers.remove("Transfer-Encoding");
                    Framing::Length(n)
                }
                None if h2 => {
                    headers.remove("Content-Length");
                    Framing::Frames
                }
                None if ctx.version >= Version::Http11 => {
                    headers.remove("Content-Length");
                    headers.insert("Transfer-Encoding", "chunked");
                    Framing::Chunked
                }
                None => {
                    headers.remove("Content-Length");
                    must_close = true;
                    Framing::CloseDelimited
                }
            }
        }
    };

    // 2. Connection management
    if h2 {
        headers.remove("Connection");
        headers.remove("Keep-Alive");
        headers.remove("Transfer-Encoding");
    } else if must_close {
        headers.insert("Connection", "close");
        headers.remove("Keep-Alive");
    } else {
        if !headers.has_token("Connection", "keep-alive") {
            headers.append("Connection", "keep-alive");
        }
        headers.insert("Keep-Alive", format!("timeout={}", ctx.keep_alive_timeout));
    }

    // 3. Content type
    if !no_content && !not_modified {
        let content_type = headers
            .get("Content-Type")
            .unwrap_or(ctx.default_content_type)
            .to_string();
        let needs_charset = content_type
            .get(..5)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("text/"))
            && !content_type.to_ascii_lowercase().contains("charset=");
        if needs_charset {
            headers.insert("Content-Type", format!("{content_type}; charset={}", ctx.default_charset));
        } else if !headers.contains("Content-Type") {
            headers.insert("Content-Type", content_type);
        }
    }

    // 4. Date
    headers.insert("Date", ctx.date);

    // 5. Server token
    if let Some(token) = ctx.server_token {
        headers.insert("Server", token);
    }

    // 6. Body suppression, after the headers above are final
    let suppress_body = ctx.head_request || no_content || not_modified;

    Head {
        framing,
        must_close,
        suppress_body,
    }
}

/// Writes the status line and, unless interim, the header block.
pub fn encode_head(response: &Response, version: Version, dst: &mut BytesMut) {
    let version = match version {
        Version::Http10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    };
    let _ = write!(
        dst,
        "{} {} {}\r\n",
        version,
        response.status.as_u16(),
        response.reason_phrase()
    );

    if response.status.is_informational() {
        dst.extend_from_slice(b"\r\n");
        return;
    }

    for (k, v) in response.headers.iter() {
        dst.extend_from_slice(k.as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(v.as_bytes());
        dst.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    dst.extend_from_slice(b"\r\n");
}

/// Appends one chunk in chunked transfer-coding. Empty input writes nothing,
/// since a zero-size chunk would end the body.
pub fn encode_chunk(data: &[u8], dst: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    let _ = write!(dst, "{:x}\r\n", data.len());
    dst.extend_from_slice(data);
    dst.extend_from_slice(b"\r\n");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Idle,
    Writing,
    Drained,
    Failed,
}

/// Owns the connection's write half and its outbound buffer.
pub struct ResponseWriter<W> {
    io: W,
    buffer: BytesMut,
    output_buffer_size: usize,
    state: WriterState,
}

impl<W> ResponseWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(io: W, output_buffer_size: usize) -> Self {
        Self {
            io,
            buffer: BytesMut::with_capacity(output_buffer_size.max(1024)),
            output_buffer_size: output_buffer_size.max(1),
            state: WriterState::Idle,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Bytes queued but not yet accepted by the socket.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn get_ref(&self) -> &W {
        &self.io
    }

    /// Queues raw bytes; they go out on the next drain.
    pub fn enqueue(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Normalizes, serializes and fully writes `response`.
    ///
    /// Resolves to `true` when the connection must be closed afterwards.
    pub async fn write_response(&mut self, mut response: Response, ctx: &WriteContext<'_>) -> Result<bool, Error> {
        self.state = WriterState::Writing;
        let head = normalize(&mut response, ctx);
        let result = self.write_normalized(response, head, ctx.version).await;
        self.state = match result {
            Ok(_) => WriterState::Drained,
            Err(_) => WriterState::Failed,
        };
        result
    }

    async fn write_normalized(&mut self, response: Response, head: Head, version: Version) -> Result<bool, Error> {
        encode_head(&response, version, &mut self.buffer);

        if head.suppress_body || head.framing == Framing::Empty {
            self.drain().await?;
            return Ok(head.must_close);
        }

        match response.body {
            ResponseBody::Fixed(body) => {
                self.buffer.extend_from_slice(&body);
                self.drain().await?;
                Ok(head.must_close)
            }
            ResponseBody::Stream(chunks) => self.write_stream(chunks, head).await,
        }
    }

    async fn write_stream(&mut self, mut chunks: ChunkStream, head: Head) -> Result<bool, Error> {
        let mut must_close = head.must_close;
        let mut sent: u64 = 0;

        while let Some(chunk) = chunks.next().await {
            for data in chunk.resolve().await? {
                match head.framing {
                    Framing::Chunked => encode_chunk(&data, &mut self.buffer),
                    Framing::Length(declared) => {
                        let room = declared.saturating_sub(sent);
                        if (data.len() as u64) > room {
                            tracing::warn!(declared, "streamed body longer than its Content-Length, truncating");
                            self.buffer.extend_from_slice(&data[..room as usize]);
                            self.drain().await?;
                            return Ok(true);
                        }
                        self.buffer.extend_from_slice(&data);
                    }
                    _ => self.buffer.extend_from_slice(&data),
                }
                sent += data.len() as u64;
            }

            if self.buffer.len() >= self.output_buffer_size {
                self.drain().await?;
            }
        }

        match head.framing {
            Framing::Chunked => self.buffer.extend_from_slice(LAST_CHUNK),
            Framing::Length(declared) if sent < declared => {
                tracing::warn!(declared, sent, "streamed body shorter than its Content-Length");
                must_close = true;
            }
            _ => {}
        }

        self.drain().await?;
        Ok(must_close)
    }

    /// Writes out everything queued.
    ///
    /// A short write leaves the unwritten suffix at the front of the buffer
    /// and the next `write` call waits for writability, so bytes are never
    /// reordered or repeated.
    pub async fn drain(&mut self) -> Result<(), Error> {
        while !self.buffer.is_empty() {
            let n = self.io.write(&self.buffer).await.map_err(Error::target_gone)?;
            if n == 0 {
                return Err(Error::target_gone(std::io::ErrorKind::WriteZero.into()));
            }
            self.buffer.advance(n);
        }
        self.io.flush().await.map_err(Error::target_gone)
    }

    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.drain().await?;
        self.io.shutdown().await.map_err(Error::target_gone)
    }
}
