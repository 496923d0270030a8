//! Request entity bodies.
//!
//! A [`Body`] is the pull side of a producer/consumer pair. The connection's
//! reader holds the matching [`BodySender`] and pushes chunks as the parser
//! decodes them; the handler pulls at its own pace. Total buffered content is
//! bounded by the body size limit rather than by the channel.

use std::fmt;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, watch};

use crate::error::BodyError;
use crate::http::headers::Headers;

pub(crate) enum Frame {
    Data(Bytes),
    Trailers(Headers),
    Error(BodyError),
    End,
}

/// Streaming request body.
///
/// Consume it either chunk by chunk with [`Body::next`]/[`Body::current`]
/// (or [`Body::read`]), or all at once with [`Body::buffer`]. Mixing is fine:
/// `buffer()` returns what has not been pulled yet.
pub struct Body {
    kind: Kind,
    current: Option<Bytes>,
    /// Chunks collected by a `buffer()` call that failed part way.
    partial: BytesMut,
}

enum Kind {
    Empty,
    Full(Option<Bytes>),
    Chan(Chan),
}

struct Chan {
    rx: mpsc::UnboundedReceiver<Frame>,
    limit: watch::Sender<usize>,
    trailers: Option<Headers>,
    /// Terminal state, replayed to every later call.
    ended: Option<Result<(), BodyError>>,
    /// Size limit hit and not raised since.
    exceeded: bool,
}

/// Creates a connected sender/body pair with the given size limit.
pub(crate) fn channel(limit: usize) -> (BodySender, Body) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (limit_tx, limit_rx) = watch::channel(limit);

    let sender = BodySender {
        tx,
        limit: limit_rx,
        received: 0,
        abandoned: false,
    };
    let body = Body {
        kind: Kind::Chan(Chan {
            rx,
            limit: limit_tx,
            trailers: None,
            ended: None,
            exceeded: false,
        }),
        current: None,
        partial: BytesMut::new(),
    };
    (sender, body)
}

impl Body {
    /// A body with no content; `next()` reports end immediately.
    pub fn empty() -> Self {
        Self {
            kind: Kind::Empty,
            current: None,
            partial: BytesMut::new(),
        }
    }

    /// Advances to the next chunk.
    ///
    /// Returns `Ok(true)` when a chunk is available through [`Body::current`],
    /// `Ok(false)` at end of stream. Once the stream has ended or failed, every
    /// further call returns the same result.
    pub async fn next(&mut self) -> Result<bool, BodyError> {
        self.current = if self.partial.is_empty() {
            self.pull().await?
        } else {
            Some(std::mem::take(&mut self.partial).freeze())
        };
        Ok(self.current.is_some())
    }

    async fn pull(&mut self) -> Result<Option<Bytes>, BodyError> {
        match &mut self.kind {
            Kind::Empty => Ok(None),
            Kind::Full(data) => Ok(data.take().filter(|b| !b.is_empty())),
            Kind::Chan(chan) => chan.next().await,
        }
    }

    /// The chunk most recently returned by [`Body::next`].
    pub fn current(&self) -> Option<&Bytes> {
        self.current.as_ref()
    }

    /// Pulls the next chunk, or `None` at end of stream.
    pub async fn read(&mut self) -> Result<Option<Bytes>, BodyError> {
        if self.next().await? {
            Ok(self.current.take())
        } else {
            Ok(None)
        }
    }

    /// Collects every chunk not yet pulled into one buffer.
    ///
    /// Chunks already returned by `next()`/`read()` are not included, so the
    /// drained chunks followed by this value always equal the whole body.
    /// On error the chunks gathered so far are kept, and a later call (for
    /// instance after [`Body::raise_limit`]) picks up where this one stopped.
    pub async fn buffer(&mut self) -> Result<Bytes, BodyError> {
        while let Some(chunk) = self.pull().await? {
            self.partial.extend_from_slice(&chunk);
        }
        Ok(std::mem::take(&mut self.partial).freeze())
    }

    /// Trailer fields sent after a chunked body, available once the stream
    /// has ended.
    pub fn trailers(&self) -> Option<&Headers> {
        match &self.kind {
            Kind::Chan(chan) => chan.trailers.as_ref(),
            _ => None,
        }
    }

    /// Current body size limit in bytes.
    pub fn size_limit(&self) -> Option<usize> {
        match &self.kind {
            Kind::Chan(chan) => Some(*chan.limit.borrow()),
            _ => None,
        }
    }

    /// Raises the size limit after a [`BodyError::SizeExceeded`]; reading
    /// can then continue where it stopped.
    pub fn raise_limit(&mut self, limit: usize) {
        if let Kind::Chan(chan) = &mut self.kind {
            if limit > *chan.limit.borrow() {
                chan.exceeded = false;
                chan.limit.send_replace(limit);
            }
        }
    }

    /// True while the size limit is exceeded and has not been raised. The
    /// rest of such a body is never read, so the connection cannot be reused.
    pub fn exceeded_limit(&self) -> bool {
        matches!(&self.kind, Kind::Chan(chan) if chan.exceeded)
    }
}

impl Chan {
    async fn next(&mut self) -> Result<Option<Bytes>, BodyError> {
        if let Some(ended) = &self.ended {
            return ended.clone().map(|()| None);
        }
        if self.exceeded {
            return Err(BodyError::SizeExceeded {
                limit: *self.limit.borrow(),
            });
        }

        loop {
            match self.rx.recv().await {
                Some(Frame::Data(data)) => return Ok(Some(data)),
                Some(Frame::Trailers(trailers)) => self.trailers = Some(trailers),
                Some(Frame::End) => {
                    self.ended = Some(Ok(()));
                    return Ok(None);
                }
                Some(Frame::Error(err @ BodyError::SizeExceeded { .. })) => {
                    self.exceeded = true;
                    return Err(err);
                }
                Some(Frame::Error(err)) => {
                    self.ended = Some(Err(err.clone()));
                    return Err(err);
                }
                // Sender dropped without End: the connection went away.
                None => {
                    self.ended = Some(Err(BodyError::ClientGone));
                    return Err(BodyError::ClientGone);
                }
            }
        }
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Self {
        Self {
            kind: Kind::Full(Some(data)),
            current: None,
            partial: BytesMut::new(),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self {
        Body::from(Bytes::from(data))
    }
}

impl From<&'static str> for Body {
    fn from(data: &'static str) -> Self {
        Body::from(Bytes::from_static(data.as_bytes()))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            Kind::Empty => "Empty",
            Kind::Full(_) => "Full",
            Kind::Chan(_) => "Streaming",
        };
        f.debug_tuple("Body").field(&kind).finish()
    }
}

/// Outcome of pushing one chunk towards the consumer.
#[derive(Debug)]
pub(crate) enum Push {
    Delivered,
    /// The consumer dropped the body; the chunk was discarded.
    Discarded,
    /// Delivering would exceed the limit; the chunk is handed back.
    Exceeded(Bytes),
}

/// Producer half held by the connection reader.
pub(crate) struct BodySender {
    tx: mpsc::UnboundedSender<Frame>,
    limit: watch::Receiver<usize>,
    received: usize,
    abandoned: bool,
}

impl BodySender {
    pub(crate) fn push(&mut self, data: Bytes) -> Push {
        if self.tx.is_closed() {
            if !self.abandoned {
                tracing::trace!(received = self.received, "body abandoned by consumer, discarding");
                self.abandoned = true;
            }
            return Push::Discarded;
        }

        let limit = *self.limit.borrow();
        if self.received + data.len() > limit {
            let _ = self.tx.send(Frame::Error(BodyError::SizeExceeded { limit }));
            return Push::Exceeded(data);
        }

        self.received += data.len();
        if self.tx.send(Frame::Data(data)).is_err() {
            self.abandoned = true;
            return Push::Discarded;
        }
        Push::Delivered
    }

    /// Pushes a chunk, suspending while the size limit is exceeded until the
    /// consumer either raises the limit or drops the body.
    pub(crate) async fn deliver(&mut self, mut data: Bytes) {
        loop {
            match self.push(data) {
                Push::Delivered | Push::Discarded => return,
                Push::Exceeded(back) => {
                    data = back;
                    // Err: the body was dropped, so the next push discards.
                    let _ = self.limit.changed().await;
                }
            }
        }
    }

    pub(crate) fn trailers(&mut self, trailers: Headers) {
        let _ = self.tx.send(Frame::Trailers(trailers));
    }

    pub(crate) fn finish(self) {
        let _ = self.tx.send(Frame::End);
    }

    pub(crate) fn fail(self, err: BodyError) {
        let _ = self.tx.send(Frame::Error(err));
    }
}
