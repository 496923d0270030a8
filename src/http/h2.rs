//! HTTP/2 connection driver.
//!
//! Framing, flow control and stream multiplexing come from the `h2` crate.
//! Each stream is answered by its own task through the same responder
//! chain and header normalization as HTTP/1.

use std::future::poll_fn;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use h2::server::SendResponse;
use h2::{RecvStream, SendStream};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::{BodyError, Error, ParseError, ParseErrorKind};
use crate::http::body::{self, Body, BodySender};
use crate::http::connection::ConnectionInfo;
use crate::http::headers::Headers;
use crate::http::request::{Method, Request, RequestUri, Version};
use crate::http::response::{Response, ResponseBody};
use crate::http::writer::{WriteContext, normalize};
use crate::server::ServerContext;

pub(crate) async fn serve<S>(io: S, info: Arc<ConnectionInfo>, server: Arc<ServerContext>) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let max_header_list_size = u32::try_from(server.config.max_header_size).unwrap_or(u32::MAX);
    let mut conn = h2::server::Builder::new()
        .max_header_list_size(max_header_list_size)
        .handshake::<_, Bytes>(io)
        .await?;

    while let Some(accepted) = conn.accept().await {
        let (request, respond) = accepted?;
        info.touch(server.clock.current_time());

        let info = Arc::clone(&info);
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            info.request_started();
            if let Err(e) = serve_stream(request, respond, &info, &server).await {
                debug!(connection = info.id, error = %e, "stream failed");
            }
            info.request_finished();
            info.touch(server.clock.current_time());
        });
    }

    Ok(())
}

async fn serve_stream(
    request: http::Request<RecvStream>,
    mut respond: SendResponse<Bytes>,
    info: &Arc<ConnectionInfo>,
    server: &ServerContext,
) -> Result<(), Error> {
    let date = server.clock.current_http_date();
    let mut ctx = WriteContext::new(&server.config, &date);
    ctx.version = Version::H2;

    let mut request = match into_request(request, info, server) {
        Ok(request) => request,
        Err(err) => {
            let response = server.chain.error_response(err.status(), &err.kind.to_string(), None).await;
            return send(&mut respond, response, &ctx).await;
        }
    };

    let response = server.chain.respond(&mut request).await;
    debug!(
        connection = info.id,
        method = %request.method,
        path = %request.path(),
        status = %response.status,
        "request served"
    );

    let ctx = ctx.for_request(&request);
    send(&mut respond, response, &ctx).await
}

fn into_request(request: http::Request<RecvStream>, info: &Arc<ConnectionInfo>, server: &ServerContext) -> Result<Request, ParseError> {
    let (parts, recv) = request.into_parts();

    let method = Method::from_str(parts.method.as_str()).ok_or(ParseErrorKind::InvalidMethod)?;
    let target = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let headers = convert_headers(&parts.headers);
    let authority = parts
        .uri
        .authority()
        .map(|a| a.as_str())
        .or_else(|| headers.get("Host"));
    let encrypted = info.is_encrypted() || parts.uri.scheme_str() == Some("https");
    let uri = RequestUri::derive(target, authority, encrypted)?;

    let body = if recv.is_end_stream() {
        Body::empty()
    } else {
        let (sender, body) = body::channel(server.config.max_body_size);
        tokio::spawn(pump_body(recv, sender));
        body
    };

    Ok(Request::new(method, uri, Version::H2, headers, body, Arc::clone(info)))
}

fn convert_headers(map: &http::HeaderMap) -> Headers {
    map.iter()
        .map(|(name, value)| (name.as_str(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
        .collect()
}

/// Feeds DATA frames and trailers into the request body.
async fn pump_body(mut recv: RecvStream, mut sender: BodySender) {
    while let Some(frame) = recv.data().await {
        match frame {
            Ok(data) => {
                let _ = recv.flow_control().release_capacity(data.len());
                sender.deliver(data).await;
            }
            Err(e) => {
                debug!(error = %e, "request stream aborted");
                sender.fail(BodyError::ClientGone);
                return;
            }
        }
    }

    match recv.trailers().await {
        Ok(Some(trailers)) => sender.trailers(convert_headers(&trailers)),
        Ok(None) => {}
        Err(_) => {
            sender.fail(BodyError::ClientGone);
            return;
        }
    }
    sender.finish();
}

async fn send(respond: &mut SendResponse<Bytes>, mut response: Response, ctx: &WriteContext<'_>) -> Result<(), Error> {
    let head = normalize(&mut response, ctx);

    let mut builder = http::Response::builder().status(response.status.as_u16());
    for (name, value) in response.headers.iter() {
        builder = builder.header(name, value);
    }
    let head_only = builder.body(())?;

    let end_of_stream = head.suppress_body || matches!(&response.body, ResponseBody::Fixed(b) if b.is_empty());
    let mut stream = respond.send_response(head_only, end_of_stream)?;
    if end_of_stream {
        return Ok(());
    }

    match response.body {
        ResponseBody::Fixed(data) => send_data(&mut stream, data, true).await,
        ResponseBody::Stream(mut chunks) => {
            while let Some(chunk) = chunks.next().await {
                let parts = match chunk.resolve().await {
                    Ok(parts) => parts,
                    Err(e) => {
                        stream.send_reset(h2::Reason::INTERNAL_ERROR);
                        return Err(e.into());
                    }
                };
                for data in parts {
                    send_data(&mut stream, data, false).await?;
                }
            }
            stream.send_data(Bytes::new(), true)?;
            Ok(())
        }
    }
}

/// Sends `data` as flow control allows.
async fn send_data(stream: &mut SendStream<Bytes>, mut data: Bytes, end_of_stream: bool) -> Result<(), Error> {
    if data.is_empty() {
        if end_of_stream {
            stream.send_data(data, true)?;
        }
        return Ok(());
    }

    while !data.is_empty() {
        stream.reserve_capacity(data.len());
        let granted = match poll_fn(|cx| stream.poll_capacity(cx)).await {
            Some(granted) => granted?,
            None => return Err(Error::ClientGone),
        };
        if granted == 0 {
            continue;
        }

        let frame = data.split_to(granted.min(data.len()));
        stream.send_data(frame, end_of_stream && data.is_empty())?;
    }
    Ok(())
}
