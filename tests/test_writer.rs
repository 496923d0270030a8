use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use keel::config::Config;
use keel::error::{Error, HandlerError};
use keel::http::headers::Headers;
use keel::http::request::{Method, RequestBuilder, Version};
use keel::http::response::{BoxFuture, Chunk, Response, ResponseBody, ResponseBuilder, StatusCode};
use keel::http::writer::{Framing, ResponseWriter, WriteContext, WriterState, encode_head, normalize};
use tokio::io::AsyncWrite;

const DATE: &str = "Sun, 06 Nov 1994 08:49:37 GMT";

/// Accepts at most `max` bytes per write and is only writable every other
/// poll, waking itself in between.
struct Throttled {
    max: usize,
    ready: bool,
    written: Vec<u8>,
    writes: Vec<usize>,
}

impl Throttled {
    fn new(max: usize) -> Self {
        Self {
            max,
            ready: false,
            written: Vec::new(),
            writes: Vec::new(),
        }
    }
}

impl AsyncWrite for Throttled {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if !self.ready {
            self.ready = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        self.ready = false;

        let n = buf.len().min(self.max);
        self.written.extend_from_slice(&buf[..n]);
        self.writes.push(n);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// A peer that has gone away.
struct Broken;

impl AsyncWrite for Broken {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn split(wire: &[u8]) -> (String, Vec<u8>) {
    let end = wire.windows(4).position(|w| w == b"\r\n\r\n").expect("no header terminator");
    (String::from_utf8(wire[..end + 4].to_vec()).unwrap(), wire[end + 4..].to_vec())
}

async fn write(response: Response, ctx: &WriteContext<'_>) -> (bool, String, Vec<u8>) {
    let mut writer = ResponseWriter::new(Vec::new(), 8 * 1024);
    let must_close = writer.write_response(response, ctx).await.unwrap();
    let (head, body) = split(writer.get_ref());
    (must_close, head, body)
}

fn delayed(data: &'static [u8]) -> BoxFuture<'static, Result<Bytes, HandlerError>> {
    Box::pin(async move {
        tokio::task::yield_now().await;
        Ok(Bytes::from_static(data))
    })
}

#[test]
fn test_normalization_is_idempotent() {
    let config = Config::default();
    let ctx = WriteContext::new(&config, DATE);
    let mut response = ResponseBuilder::new(StatusCode::OK)
        .header("Content-Type", "text/plain")
        .body("hello world!")
        .build();

    let once = normalize(&mut response, &ctx);
    let mut first = BytesMut::new();
    encode_head(&response, Version::Http11, &mut first);

    let twice = normalize(&mut response, &ctx);
    let mut second = BytesMut::new();
    encode_head(&response, Version::Http11, &mut second);

    assert_eq!(once, twice);
    assert_eq!(first, second);
    for name in ["Date", "Server", "Content-Length", "Connection", "Keep-Alive", "Content-Type"] {
        assert_eq!(response.headers.get_all(name).count(), 1, "{name} duplicated");
    }
}

#[test]
fn test_header_rules() {
    let config = Config::default();
    let ctx = WriteContext::new(&config, DATE);
    let mut response = ResponseBuilder::new(StatusCode::OK).header("Content-Type", "text/plain").body("hi").build();

    let head = normalize(&mut response, &ctx);
    assert_eq!(head.framing, Framing::Length(2));
    assert!(!head.must_close);
    assert_eq!(response.headers.get("Content-Length"), Some("2"));
    assert_eq!(response.headers.get("Connection"), Some("keep-alive"));
    assert_eq!(response.headers.get("Keep-Alive"), Some("timeout=10"));
    assert_eq!(response.headers.get("Content-Type"), Some("text/plain; charset=utf-8"));
    assert_eq!(response.headers.get("Date"), Some(DATE));
    assert_eq!(response.headers.get("Server"), Some("keel"));
}

#[test]
fn test_content_type_defaults() {
    let config = Config::default();
    let ctx = WriteContext::new(&config, DATE);

    let mut plain = Response::ok("x");
    normalize(&mut plain, &ctx);
    assert_eq!(plain.headers.get("Content-Type"), Some("text/html; charset=utf-8"));

    let mut json = ResponseBuilder::new(StatusCode::OK).header("Content-Type", "application/json").build();
    normalize(&mut json, &ctx);
    assert_eq!(json.headers.get("Content-Type"), Some("application/json"));

    let mut latin = ResponseBuilder::new(StatusCode::OK).header("Content-Type", "text/csv; charset=latin1").build();
    normalize(&mut latin, &ctx);
    assert_eq!(latin.headers.get("Content-Type"), Some("text/csv; charset=latin1"));
}

#[test]
fn test_server_token_only_when_configured() {
    let config = Config {
        server_token: None,
        ..Config::default()
    };
    let ctx = WriteContext::new(&config, DATE);
    let mut response = Response::ok("x");
    normalize(&mut response, &ctx);

    assert!(!response.headers.contains("Server"));
}

#[test]
fn test_close_rules() {
    let config = Config::default();

    // Asked for by the responder
    let ctx = WriteContext::new(&config, DATE);
    let mut response = ResponseBuilder::new(StatusCode::OK).header("Connection", "close").build();
    assert!(normalize(&mut response, &ctx).must_close);
    assert!(!response.headers.contains("Keep-Alive"));

    // HTTP/1.0
    let request = RequestBuilder::new()
        .method(Method::GET)
        .target("/")
        .version(Version::Http10)
        .header("Connection", "keep-alive")
        .build()
        .unwrap();
    let ctx = WriteContext::new(&config, DATE).for_request(&request);
    let mut response = Response::ok("x");
    assert!(normalize(&mut response, &ctx).must_close);
    assert_eq!(response.headers.get("Connection"), Some("close"));

    // Explicit flag
    let ctx = WriteContext::new(&config, DATE).close(true);
    let mut response = Response::ok("x");
    assert!(normalize(&mut response, &ctx).must_close);
}

#[test]
fn test_connection_header_is_appended() {
    let config = Config::default();
    let ctx = WriteContext::new(&config, DATE);
    let mut response = ResponseBuilder::new(StatusCode::OK)
        .header("Connection", "Upgrade")
        .build();

    normalize(&mut response, &ctx);
    let values: Vec<_> = response.headers.get_all("Connection").collect();
    assert_eq!(values, vec!["Upgrade", "keep-alive"]);
}

#[tokio::test]
async fn test_head_suppression_keeps_content_length() {
    let config = Config::default();
    let twelve = "twelve bytes";
    assert_eq!(twelve.len(), 12);

    let get = RequestBuilder::new().method(Method::GET).target("/").header("Host", "a").build().unwrap();
    let ctx = WriteContext::new(&config, DATE).for_request(&get);
    let (_, head, body) = write(Response::ok(twelve), &ctx).await;
    assert!(head.contains("Content-Length: 12\r\n"));
    assert_eq!(body, twelve.as_bytes());

    let head_req = RequestBuilder::new().method(Method::HEAD).target("/").header("Host", "a").build().unwrap();
    let ctx = WriteContext::new(&config, DATE).for_request(&head_req);
    let (_, head, body) = write(Response::ok(twelve), &ctx).await;
    assert!(head.contains("Content-Length: 12\r\n"));
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_informational_status_is_a_bare_status_line() {
    let config = Config::default();
    let ctx = WriteContext::new(&config, DATE).close(true);
    let response = ResponseBuilder::new(StatusCode::CONTINUE)
        .header("Content-Type", "text/plain")
        .body("ignored")
        .build();

    let mut writer = ResponseWriter::new(Vec::new(), 1024);
    let must_close = writer.write_response(response, &ctx).await.unwrap();

    assert!(!must_close);
    assert_eq!(writer.get_ref().as_slice(), b"HTTP/1.1 100 Continue\r\n\r\n");
}

#[tokio::test]
async fn test_no_content_and_not_modified() {
    let config = Config::default();
    let ctx = WriteContext::new(&config, DATE);

    let (_, head, body) = write(ResponseBuilder::new(StatusCode::NO_CONTENT).body("x").build(), &ctx).await;
    assert!(!head.contains("Content-Length"));
    assert!(!head.contains("Content-Type"));
    assert!(body.is_empty());

    let not_modified = ResponseBuilder::new(StatusCode::NOT_MODIFIED).header("Content-Length", "1234").build();
    let (_, head, body) = write(not_modified, &ctx).await;
    assert!(head.contains("Content-Length: 1234\r\n"));
    assert!(body.is_empty());

    // Streamed bodies get no framing headers either.
    let mut streamed = Response::new(StatusCode::NO_CONTENT);
    streamed.body = ResponseBody::chunks(["x"]);
    let head = normalize(&mut streamed, &ctx);
    assert_eq!(head.framing, Framing::Empty);
    assert!(head.suppress_body);
    assert!(!streamed.headers.contains("Transfer-Encoding"));
    assert!(!streamed.headers.contains("Content-Length"));

    let mut streamed = ResponseBuilder::new(StatusCode::NOT_MODIFIED).header("Content-Length", "1234").build();
    streamed.body = ResponseBody::chunks(["x"]);
    let (must_close, head, body) = write(streamed, &ctx).await;
    assert!(!must_close);
    assert!(!head.contains("Transfer-Encoding"));
    assert!(head.contains("Content-Length: 1234\r\n"));
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_chunked_stream_preserves_order() {
    let config = Config::default();
    let ctx = WriteContext::new(&config, DATE);
    let response = ResponseBuilder::new(StatusCode::OK)
        .stream(futures_util::stream::iter(vec![
            Chunk::from("hello"),
            Chunk::Pending(delayed(b" ")),
            Chunk::Batch(vec![delayed(b"wor"), delayed(b"ld")]),
            Chunk::from(""),
        ]))
        .build();

    let (must_close, head, body) = write(response, &ctx).await;
    assert!(!must_close);
    assert!(head.contains("Transfer-Encoding: chunked\r\n"));
    assert!(!head.contains("Content-Length"));
    assert_eq!(body, b"5\r\nhello\r\n1\r\n \r\n3\r\nwor\r\n2\r\nld\r\n0\r\n\r\n");
}

#[tokio::test]
async fn test_stream_on_http10_is_close_delimited() {
    let config = Config::default();
    let request = RequestBuilder::new().method(Method::GET).target("/").version(Version::Http10).build().unwrap();
    let ctx = WriteContext::new(&config, DATE).for_request(&request);
    let response = ResponseBuilder::new(StatusCode::OK)
        .stream(futures_util::stream::iter(vec![Chunk::from("ab"), Chunk::from("cd")]))
        .build();

    let (must_close, head, body) = write(response, &ctx).await;
    assert!(must_close);
    assert!(head.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(head.contains("Connection: close\r\n"));
    assert!(!head.contains("Transfer-Encoding"));
    assert_eq!(body, b"abcd");
}

#[tokio::test]
async fn test_stream_with_declared_length_is_truncated() {
    let config = Config::default();
    let ctx = WriteContext::new(&config, DATE);
    let response = ResponseBuilder::new(StatusCode::OK)
        .header("Content-Length", "3")
        .stream(futures_util::stream::iter(vec![Chunk::from("ab"), Chunk::from("cd")]))
        .build();

    let (must_close, head, body) = write(response, &ctx).await;
    assert!(must_close);
    assert!(head.contains("Content-Length: 3\r\n"));
    assert_eq!(body, b"abc");
}

#[tokio::test]
async fn test_partial_writes_resume_without_loss() {
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

    let mut writer = ResponseWriter::new(Throttled::new(4096), 8 * 1024);
    writer.enqueue(&payload);
    assert_eq!(writer.pending(), 10_000);

    writer.drain().await.unwrap();

    assert_eq!(writer.pending(), 0);
    assert_eq!(writer.get_ref().writes, vec![4096, 4096, 1808]);
    assert_eq!(writer.get_ref().written, payload);
}

#[tokio::test]
async fn test_throttled_response_arrives_intact() {
    let config = Config::default();
    let ctx = WriteContext::new(&config, DATE);
    let body: Vec<u8> = vec![b'z'; 20_000];

    let mut writer = ResponseWriter::new(Throttled::new(1000), 4096);
    writer.write_response(Response::ok(body.clone()), &ctx).await.unwrap();
    assert_eq!(writer.state(), WriterState::Drained);

    let (head, received) = split(&writer.get_ref().written);
    assert!(head.contains("Content-Length: 20000\r\n"));
    assert_eq!(received, body);
}

#[tokio::test]
async fn test_broken_pipe_is_target_gone() {
    let config = Config::default();
    let ctx = WriteContext::new(&config, DATE);

    let mut writer = ResponseWriter::new(Broken, 1024);
    let err = writer.write_response(Response::ok("x"), &ctx).await.unwrap_err();

    assert!(matches!(err, Error::TargetGone(_)));
    assert!(err.is_disconnect());
    assert_eq!(writer.state(), WriterState::Failed);
}

#[tokio::test]
async fn test_failing_chunk_aborts_the_write() {
    let config = Config::default();
    let ctx = WriteContext::new(&config, DATE);
    let failing: BoxFuture<'static, Result<Bytes, HandlerError>> =
        Box::pin(async { Err(HandlerError::msg("generator failed")) });
    let response = Response {
        status: StatusCode::OK,
        reason: None,
        headers: Headers::new(),
        body: ResponseBody::Stream(Box::pin(futures_util::stream::iter(vec![Chunk::from("a"), Chunk::Pending(failing)]))),
    };

    let mut writer = ResponseWriter::new(Vec::new(), 1024);
    let err = writer.write_response(response, &ctx).await.unwrap_err();
    assert!(matches!(err, Error::Handler(_)));
}
