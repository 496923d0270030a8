use bytes::BytesMut;
use keel::error::ParseErrorKind;
use keel::http::parser::{BodyKind, Event, Parser, ParserLimits, ParserState, RequestHead};
use keel::http::request::{Method, Version};
use keel::http::writer::{LAST_CHUNK, encode_chunk};

fn parser() -> Parser {
    Parser::new(ParserLimits::default())
}

fn expect_head(p: &mut Parser) -> RequestHead {
    match p.next_event().unwrap() {
        Some(Event::Head(head)) => head,
        other => panic!("expected head, got {:?}", other),
    }
}

/// Collects body bytes until `Complete`.
fn collect_body(p: &mut Parser) -> Vec<u8> {
    let mut body = Vec::new();
    loop {
        match p.next_event().unwrap() {
            Some(Event::Data(data)) => body.extend_from_slice(&data),
            Some(Event::Trailers(_)) => {}
            Some(Event::Complete) => return body,
            other => panic!("unexpected event {:?}", other),
        }
    }
}

#[test]
fn test_parse_simple_get_request() {
    let mut p = parser();
    p.feed(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");

    let head = expect_head(&mut p);
    assert_eq!(head.method, Method::GET);
    assert_eq!(head.target, "/");
    assert_eq!(head.version, Version::Http11);
    assert_eq!(head.headers.get("Host").unwrap(), "example.com");
    assert_eq!(head.body, BodyKind::Empty);
    assert!(matches!(p.next_event().unwrap(), Some(Event::Complete)));
    assert_eq!(p.buffered(), 0);
}

#[test]
fn test_parse_post_request_with_body() {
    let mut p = parser();
    p.feed(b"POST /api HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello");

    let head = expect_head(&mut p);
    assert_eq!(head.method, Method::POST);
    assert_eq!(head.body, BodyKind::Length(5));
    assert_eq!(p.state(), ParserState::ReadingBody);
    assert_eq!(collect_body(&mut p), b"hello");
    assert_eq!(p.state(), ParserState::Complete);
}

#[test]
fn test_parse_request_with_path_and_query_string() {
    let mut p = parser();
    p.feed(b"GET /search?q=rust HTTP/1.1\r\nHost: example.com\r\n\r\n");

    assert_eq!(expect_head(&mut p).target, "/search?q=rust");
}

#[test]
fn test_parse_incomplete_request_missing_blank_line() {
    let mut p = parser();
    p.feed(b"GET / HTTP/1.1\r\nHost: example.com\r\n");

    assert!(p.next_event().unwrap().is_none());
    assert_eq!(p.state(), ParserState::AwaitingHeaders);

    p.feed(b"\r\n");
    assert_eq!(expect_head(&mut p).target, "/");
}

#[test]
fn test_body_arrives_in_pieces() {
    let mut p = parser();
    p.feed(b"POST /api HTTP/1.1\r\nHost: a\r\nContent-Length: 10\r\n\r\nhello");

    expect_head(&mut p);
    assert!(matches!(p.next_event().unwrap(), Some(Event::Data(d)) if d == "hello"));
    assert!(p.next_event().unwrap().is_none());

    p.feed(b"world");
    assert!(matches!(p.next_event().unwrap(), Some(Event::Data(d)) if d == "world"));
    assert!(matches!(p.next_event().unwrap(), Some(Event::Complete)));
}

#[test]
fn test_pipelined_requests_are_parsed_in_order() {
    let mut p = parser();
    p.feed(
        b"GET /one HTTP/1.1\r\nHost: a\r\n\r\n\
          POST /two HTTP/1.1\r\nHost: a\r\nContent-Length: 3\r\n\r\nabc\
          GET /three HTTP/1.1\r\nHost: a\r\n\r\n",
    );

    assert_eq!(expect_head(&mut p).target, "/one");
    assert!(collect_body(&mut p).is_empty());
    assert_eq!(expect_head(&mut p).target, "/two");
    assert_eq!(collect_body(&mut p), b"abc");
    assert_eq!(expect_head(&mut p).target, "/three");
    assert!(collect_body(&mut p).is_empty());
    assert!(p.next_event().unwrap().is_none());
}

#[test]
fn test_chunked_body_with_trailers() {
    let mut p = parser();
    p.feed(
        b"POST /up HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n\
          5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\nX-Checksum: 42\r\n\r\n",
    );

    assert_eq!(expect_head(&mut p).body, BodyKind::Chunked);
    assert!(matches!(p.next_event().unwrap(), Some(Event::Data(d)) if d == "hello"));
    assert!(matches!(p.next_event().unwrap(), Some(Event::Data(d)) if d == " world"));
    match p.next_event().unwrap() {
        Some(Event::Trailers(trailers)) => assert_eq!(trailers.get("x-checksum"), Some("42")),
        other => panic!("expected trailers, got {:?}", other),
    }
    assert!(matches!(p.next_event().unwrap(), Some(Event::Complete)));
}

#[test]
fn test_chunked_takes_precedence_over_content_length() {
    let mut p = parser();
    p.feed(b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 100\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n");

    assert_eq!(expect_head(&mut p).body, BodyKind::Chunked);
    assert_eq!(collect_body(&mut p), b"abc");
}

#[test]
fn test_chunk_round_trip() {
    let chunks: [&[u8]; 4] = [b"a", &[b'x'; 300], b"", b"tail\r\n"];

    let mut wire = BytesMut::new();
    wire.extend_from_slice(b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n");
    for chunk in chunks {
        encode_chunk(chunk, &mut wire);
    }
    wire.extend_from_slice(LAST_CHUNK);

    let mut p = parser();
    p.feed(&wire);
    expect_head(&mut p);

    assert_eq!(collect_body(&mut p), chunks.concat());
}

#[test]
fn test_body_is_emitted_in_bounded_windows() {
    let mut p = Parser::new(ParserLimits {
        max_header_size: 1024,
        body_emit_size: 4,
    });
    p.feed(b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 10\r\n\r\n0123456789");
    expect_head(&mut p);

    let mut sizes = Vec::new();
    while let Some(Event::Data(d)) = p.next_event().unwrap() {
        sizes.push(d.len());
    }
    assert_eq!(sizes, vec![4, 4, 2]);
}

#[test]
fn test_header_too_large() {
    let mut p = Parser::new(ParserLimits {
        max_header_size: 64,
        body_emit_size: 1024,
    });
    p.feed(b"GET / HTTP/1.1\r\nHost: a\r\nX-Padding: ");
    p.feed(&[b'p'; 100]);

    let err = p.next_event().unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::HeaderTooLarge { limit: 64 });
    assert_eq!(err.status().as_u16(), 431);
}

#[test]
fn test_raising_the_header_limit_allows_a_retry() {
    let mut p = Parser::new(ParserLimits {
        max_header_size: 64,
        body_emit_size: 1024,
    });
    let mut req = b"GET / HTTP/1.1\r\nHost: a\r\nX-Padding: ".to_vec();
    req.extend_from_slice(&[b'p'; 100]);
    req.extend_from_slice(b"\r\n\r\n");
    p.feed(&req);

    assert!(p.next_event().is_err());
    p.set_max_header_size(1024);
    assert_eq!(expect_head(&mut p).headers.get("x-padding").map(str::len), Some(100));
}

#[test]
fn test_parse_invalid_http_method() {
    let mut p = parser();
    p.feed(b"INVALID / HTTP/1.1\r\nHost: a\r\n\r\n");

    let err = p.next_event().unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::InvalidMethod);
    assert!(err.partial.starts_with(b"INVALID"));
}

#[test]
fn test_parse_malformed_header() {
    let mut p = parser();
    p.feed(b"GET / HTTP/1.1\r\nBrokenHeader\r\n\r\n");

    assert_eq!(p.next_event().unwrap_err().kind, ParseErrorKind::InvalidHeader);
}

#[test]
fn test_http11_requires_host() {
    let mut p = parser();
    p.feed(b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n");
    assert_eq!(p.next_event().unwrap_err().kind, ParseErrorKind::MissingHost);

    let mut p = parser();
    p.feed(b"GET / HTTP/1.0\r\n\r\n");
    assert_eq!(expect_head(&mut p).version, Version::Http10);
}

#[test]
fn test_unsupported_version() {
    let mut p = parser();
    p.feed(b"GET / HTTP/2.0\r\nHost: a\r\n\r\n");

    let err = p.next_event().unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::InvalidVersion);
    assert_eq!(err.status().as_u16(), 505);
}

#[test]
fn test_invalid_chunk_size() {
    let mut p = parser();
    p.feed(b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n");
    expect_head(&mut p);

    assert_eq!(p.next_event().unwrap_err().kind, ParseErrorKind::InvalidChunk);
}

#[test]
fn test_conflicting_content_length() {
    let mut p = parser();
    p.feed(b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\n");

    assert_eq!(p.next_event().unwrap_err().kind, ParseErrorKind::InvalidContentLength);
}

#[test]
fn test_parse_various_http_methods() {
    let methods = vec![
        ("GET", Method::GET),
        ("POST", Method::POST),
        ("PUT", Method::PUT),
        ("DELETE", Method::DELETE),
        ("HEAD", Method::HEAD),
        ("OPTIONS", Method::OPTIONS),
        ("PATCH", Method::PATCH),
    ];

    for (method_str, expected_method) in methods {
        let mut p = parser();
        p.feed(format!("{} / HTTP/1.1\r\nHost: a\r\n\r\n", method_str).as_bytes());
        assert_eq!(expect_head(&mut p).method, expected_method);
    }
}

#[test]
fn test_parse_request_with_binary_body() {
    let mut p = parser();
    p.feed(b"POST /upload HTTP/1.1\r\nHost: a\r\nContent-Length: 4\r\n\r\n\x00\x01\x02\x03");
    expect_head(&mut p);

    assert_eq!(collect_body(&mut p), vec![0, 1, 2, 3]);
}

#[test]
fn test_content_length_zero_is_empty() {
    let mut p = parser();
    p.feed(b"POST /api HTTP/1.1\r\nHost: a\r\nContent-Length: 0\r\n\r\n");

    assert_eq!(expect_head(&mut p).body, BodyKind::Empty);
    assert!(collect_body(&mut p).is_empty());
    assert!(p.next_event().unwrap().is_none());
}
