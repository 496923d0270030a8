//! HTTP/1.x connection driver.
//!
//! The socket is split in two halves served by two futures on the same
//! task. The reader parses requests and queues a [`MessageCycle`] for each
//! as soon as its head is complete, then keeps feeding that request's body.
//! The responder takes cycles off the queue strictly in order, runs the
//! chain and writes the response. Pipelined requests are therefore parsed
//! while earlier responses are still being produced, but their responses
//! never overlap.
//!
//! ```text
//!   socket ──read──▶ Parser ──Head──▶ queue ──▶ chain ──▶ ResponseWriter ──▶ socket
//!                        └──Data──▶ BodySender ··· Body (in Request)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{BodyError, Error, ParseError};
use crate::http::body::{self, Body, BodySender};
use crate::http::connection::ConnectionInfo;
use crate::http::cycle::MessageCycle;
use crate::http::parser::{BodyKind, Event, Parser};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::{ResponseWriter, WriteContext};
use crate::server::ServerContext;

const READ_RESERVE: usize = 4096;

enum Inbound {
    Message(MessageCycle),
    /// The byte stream broke; answer with an error and close.
    Reject(ParseError),
}

pub(crate) async fn serve<S>(io: S, info: Arc<ConnectionInfo>, server: Arc<ServerContext>) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, write_half) = tokio::io::split(io);
    let (queue_tx, queue_rx) = mpsc::channel(server.config.max_pipelined_requests);
    // Set once the byte stream is unusable; no later response may keep it open.
    let broken = AtomicBool::new(false);

    let reader = read_requests(read_half, queue_tx, &broken, &info, &server);
    let responder = write_responses(queue_rx, write_half, &broken, &info, &server);
    tokio::pin!(reader, responder);

    let read_result = tokio::select! {
        // Closing: whatever the reader was doing no longer matters.
        res = &mut responder => return res,
        res = &mut reader => res,
    };

    // The reader is done, but queued cycles still get their responses.
    let write_result = responder.await;
    if let Err(e) = read_result {
        debug!(connection = info.id, error = %e, "read side ended with error");
    }
    write_result
}

async fn read_requests<R>(
    mut io: R,
    queue: mpsc::Sender<Inbound>,
    broken: &AtomicBool,
    info: &Arc<ConnectionInfo>,
    server: &ServerContext,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
{
    let config = &server.config;
    let idle_timeout = Duration::from_secs(config.keep_alive_timeout);
    let mut parser = Parser::new(config.parser_limits());
    let mut body: Option<BodySender> = None;
    let mut accepted = 0usize;
    let mut closing = false;

    loop {
        while let Some(event) = next_event(&mut parser, &mut body, &queue, broken).await? {
            match event {
                Event::Head(head) => {
                    accepted += 1;
                    let last = config.max_requests_per_connection != 0 && accepted >= config.max_requests_per_connection;

                    let (sender, request_body) = match head.body {
                        BodyKind::Empty => (None, Body::empty()),
                        _ => {
                            let (sender, request_body) = body::channel(config.max_body_size);
                            (Some(sender), request_body)
                        }
                    };

                    let cycle = match MessageCycle::new(head, request_body, Arc::clone(info), last) {
                        Ok(cycle) => cycle,
                        Err(err) => {
                            warn!(connection = info.id, error = %err, "rejecting request");
                            let _ = queue.send(Inbound::Reject(err)).await;
                            return Ok(());
                        }
                    };

                    closing = cycle.close_after;
                    info.request_started();
                    if queue.send(Inbound::Message(cycle)).await.is_err() {
                        return Ok(());
                    }
                    body = sender;
                }
                Event::Data(data) => {
                    if let Some(sender) = body.as_mut() {
                        sender.deliver(data).await;
                    }
                }
                Event::Trailers(trailers) => {
                    if let Some(sender) = body.as_mut() {
                        sender.trailers(trailers);
                    }
                }
                Event::Complete => {
                    if let Some(sender) = body.take() {
                        sender.finish();
                    }
                    if closing {
                        return Ok(());
                    }
                }
            }
        }

        let idle = parser.is_idle();
        let buf = parser.buffer_mut();
        buf.reserve(READ_RESERVE);

        let n = loop {
            match tokio::time::timeout(idle_timeout, io.read_buf(buf)).await {
                Ok(res) => break res?,
                Err(_) if idle && info.in_flight() == 0 => {
                    debug!(connection = info.id, "keep-alive timeout, closing idle connection");
                    return Ok(());
                }
                Err(_) => continue,
            }
        };

        if n == 0 {
            // Dropping an unfinished body sender reports ClientGone.
            if body.is_some() || !parser.is_idle() {
                debug!(connection = info.id, "client closed mid-request");
            }
            return Ok(());
        }
        info.touch(server.clock.current_time());
    }
}

/// Pulls the next parser event. A parse fault ends the message: mid-body it
/// fails the body, otherwise it is queued as a rejection.
async fn next_event(
    parser: &mut Parser,
    body: &mut Option<BodySender>,
    queue: &mpsc::Sender<Inbound>,
    broken: &AtomicBool,
) -> Result<Option<Event>, Error> {
    match parser.next_event() {
        Ok(event) => Ok(event),
        Err(err) => {
            warn!(error = %err, partial = ?String::from_utf8_lossy(&err.partial), "protocol fault");
            broken.store(true, Ordering::Release);
            match body.take() {
                Some(sender) => sender.fail(BodyError::Malformed),
                None => {
                    let _ = queue.send(Inbound::Reject(err.clone())).await;
                }
            }
            Err(Error::Parse(err))
        }
    }
}

async fn write_responses<W>(
    mut queue: mpsc::Receiver<Inbound>,
    io: W,
    broken: &AtomicBool,
    info: &ConnectionInfo,
    server: &ServerContext,
) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let config = &server.config;
    let mut writer = ResponseWriter::new(io, config.output_buffer_size);

    while let Some(inbound) = queue.recv().await {
        let must_close = match inbound {
            Inbound::Message(mut cycle) => {
                let result = answer(&mut writer, &mut cycle, broken, info, server).await;
                info.request_finished();
                result?
            }
            Inbound::Reject(err) => {
                let status = err.status();
                let response = server.chain.error_response(status, &err.kind.to_string(), None).await;
                let date = server.clock.current_http_date();
                let ctx = WriteContext::new(config, &date).close(true);
                writer.write_response(response, &ctx).await?;
                true
            }
        };

        info.touch(server.clock.current_time());
        if must_close {
            break;
        }
    }

    writer.shutdown().await
}

async fn answer<W>(
    writer: &mut ResponseWriter<W>,
    cycle: &mut MessageCycle,
    broken: &AtomicBool,
    info: &ConnectionInfo,
    server: &ServerContext,
) -> Result<bool, Error>
where
    W: AsyncWrite + Unpin,
{
    let config = &server.config;
    let request = &mut cycle.request;

    if cycle.expects_continue {
        let date = server.clock.current_http_date();
        let ctx = WriteContext::new(config, &date).for_request(request);
        writer.write_response(Response::new(StatusCode::CONTINUE), &ctx).await?;
    }

    let response = server.chain.respond(request).await;
    debug!(
        connection = info.id,
        method = %request.method,
        path = %request.path(),
        status = %response.status,
        "request served"
    );

    let date = server.clock.current_http_date();
    let close = cycle.close_after || request.body.exceeded_limit() || broken.load(Ordering::Acquire);
    let ctx = WriteContext::new(config, &date).for_request(request).close(close);
    writer.write_response(response, &ctx).await
}
