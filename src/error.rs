//! Error taxonomy for the request/response pipeline.
//!
//! Faults are grouped by how far they reach:
//!
//! - [`ParseError`]: the byte stream itself is unusable (connection-level).
//! - [`BodyError`]: a request body could not be delivered in full.
//! - [`HandlerError`]: a responder or middleware failed (cycle-level).
//! - [`Error`]: everything a connection task can end with.

use std::io;

use bytes::Bytes;
use thiserror::Error;

use crate::http::response::StatusCode;

/// Reason a request head or body framing was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("malformed request line")]
    InvalidRequestLine,
    #[error("unsupported HTTP method")]
    InvalidMethod,
    #[error("unsupported HTTP version")]
    InvalidVersion,
    #[error("malformed request target")]
    InvalidTarget,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("missing Host header")]
    MissingHost,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("invalid chunked encoding")]
    InvalidChunk,
    #[error("unsupported transfer coding")]
    UnsupportedTransferCoding,
    #[error("header block exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },
}

/// Protocol fault raised by the parser.
///
/// `partial` holds a bounded prefix of the raw bytes that were being parsed
/// when the fault happened, for diagnostics only.
#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub partial: Bytes,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, partial: Bytes) -> Self {
        Self { kind, partial }
    }

    /// Status code used when answering the fault before closing.
    pub fn status(&self) -> StatusCode {
        match self.kind {
            ParseErrorKind::HeaderTooLarge { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            ParseErrorKind::UnsupportedTransferCoding => StatusCode::NOT_IMPLEMENTED,
            ParseErrorKind::InvalidVersion => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<ParseErrorKind> for ParseError {
    fn from(kind: ParseErrorKind) -> Self {
        Self::new(kind, Bytes::new())
    }
}

/// Failure observed by a request body consumer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BodyError {
    #[error("client disconnected before the body was complete")]
    ClientGone,
    #[error("request body exceeds the {limit} byte limit")]
    SizeExceeded { limit: usize },
    #[error("malformed request body framing")]
    Malformed,
}

impl BodyError {
    pub fn status(&self) -> StatusCode {
        match self {
            BodyError::SizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            BodyError::ClientGone | BodyError::Malformed => StatusCode::BAD_REQUEST,
        }
    }
}

/// Fault produced while a responder or middleware was running.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Body(#[from] BodyError),
    #[error("invalid responder result: {0}")]
    InvalidResult(String),
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        HandlerError::Fault(anyhow::Error::msg(message))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            HandlerError::Body(e) => e.status(),
            HandlerError::InvalidResult(_) | HandlerError::Fault(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message with every cause appended, used for debug-mode error bodies.
    pub fn detail(&self) -> String {
        let mut detail = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            detail.push_str(": ");
            detail.push_str(&cause.to_string());
            source = cause.source();
        }
        detail
    }
}

/// Anything a connection task can end with.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Body(#[from] BodyError),
    #[error("client disconnected")]
    ClientGone,
    #[error("write target gone: {0}")]
    TargetGone(#[source] io::Error),
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("http/2: {0}")]
    Http2(#[from] h2::Error),
    #[error("invalid response head: {0}")]
    Http(#[from] http::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Classifies a failed socket write.
    pub(crate) fn target_gone(err: io::Error) -> Self {
        Error::TargetGone(err)
    }

    /// True for faults caused by the peer going away rather than by us.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::ClientGone | Error::TargetGone(_) => true,
            Error::Body(BodyError::ClientGone) => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
