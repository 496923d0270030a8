use crate::http::request::Request;
use crate::http::response::{BoxFuture, Response, ResponseBuilder, StatusCode};

/// Renders 4xx/5xx responses.
///
/// `request` is `None` when the fault happened before a request could be
/// parsed.
pub trait ErrorHandler: Send + Sync {
    fn render<'a>(&'a self, status: StatusCode, reason: &'a str, request: Option<&'a Request>) -> BoxFuture<'a, Response>;
}

/// Default handler: a minimal HTML page.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlErrorHandler;

impl ErrorHandler for HtmlErrorHandler {
    fn render<'a>(&'a self, status: StatusCode, reason: &'a str, _request: Option<&'a Request>) -> BoxFuture<'a, Response> {
        Box::pin(async move { html_error(status, reason) })
    }
}

pub fn html_error(status: StatusCode, reason: &str) -> Response {
    let title = format!("{} {}", status.as_u16(), status.reason_phrase());
    let body = format!(
        "<!DOCTYPE html>\n<html><head><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{}</p></body></html>\n",
        escape(reason)
    );

    ResponseBuilder::new(status)
        .header("Content-Type", "text/html; charset=utf-8")
        .body(body)
        .build()
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
