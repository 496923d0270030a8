//! Request dispatch: responder units, middleware and the chain that ties
//! them together.
//!
//! A [`ResponderChain`] tries its units in registration order. A unit may
//! answer, defer ([`Outcome::Pending`]), decline ([`Outcome::Fallthrough`] or
//! a 404 response) or fail. Middleware wrap the whole unit list; the first
//! one registered sees the request first and the response last.

pub mod error_handler;

use std::sync::Arc;

use crate::error::HandlerError;
use crate::http::request::Request;
use crate::http::response::{BoxFuture, Response, StatusCode};

pub use error_handler::{ErrorHandler, HtmlErrorHandler};

/// Body of the 500 response when debug mode is off.
pub const GENERIC_FAULT_MESSAGE: &str = "Something went wrong ;(";

/// What a responder unit produced for a request.
pub enum Outcome<'a> {
    Response(Response),
    /// Resolved before its status is looked at.
    Pending(BoxFuture<'a, Result<Response, HandlerError>>),
    /// Not handled here; the next unit gets the request.
    Fallthrough,
    Fault(HandlerError),
}

impl From<Response> for Outcome<'_> {
    fn from(response: Response) -> Self {
        Outcome::Response(response)
    }
}

impl From<HandlerError> for Outcome<'_> {
    fn from(err: HandlerError) -> Self {
        Outcome::Fault(err)
    }
}

impl From<Result<Response, HandlerError>> for Outcome<'_> {
    fn from(result: Result<Response, HandlerError>) -> Self {
        match result {
            Ok(response) => Outcome::Response(response),
            Err(err) => Outcome::Fault(err),
        }
    }
}

/// A request handling unit.
pub trait Responder: Send + Sync {
    fn respond<'a>(&'a self, request: &'a mut Request) -> Outcome<'a>;
}

/// Responder built from a closure that does not borrow the request past
/// the call.
pub struct FnResponder<F>(F);

pub fn from_fn<F>(f: F) -> FnResponder<F>
where
    F: Fn(&Request) -> Outcome<'static> + Send + Sync,
{
    FnResponder(f)
}

impl<F> Responder for FnResponder<F>
where
    F: Fn(&Request) -> Outcome<'static> + Send + Sync,
{
    fn respond<'a>(&'a self, request: &'a mut Request) -> Outcome<'a> {
        (self.0)(request)
    }
}

/// Wraps the rest of the chain.
///
/// Call [`Next::run`] to pass the request on; skip it to short-circuit.
pub trait Middleware: Send + Sync {
    fn handle<'a>(&'a self, request: &'a mut Request, next: Next<'a>) -> BoxFuture<'a, Result<Response, HandlerError>>;
}

/// Handle to everything after the current middleware.
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    chain: &'a ResponderChain,
}

impl<'a> Next<'a> {
    pub fn run<'r>(self, request: &'r mut Request) -> BoxFuture<'r, Result<Response, HandlerError>>
    where
        'a: 'r,
    {
        match self.middleware.split_first() {
            Some((first, rest)) => first.handle(
                request,
                Next {
                    middleware: rest,
                    chain: self.chain,
                },
            ),
            None => Box::pin(self.chain.dispatch(request)),
        }
    }
}

/// Ordered responder units plus the middleware around them.
pub struct ResponderChain {
    units: Vec<Arc<dyn Responder>>,
    middleware: Vec<Arc<dyn Middleware>>,
    error_handler: Arc<dyn ErrorHandler>,
    debug: bool,
}

impl ResponderChain {
    pub fn builder() -> ChainBuilder {
        ChainBuilder::default()
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Produces exactly one response for `request`.
    ///
    /// Faults never escape: they become error responses here.
    pub async fn respond(&self, request: &mut Request) -> Response {
        let next = Next {
            middleware: &self.middleware,
            chain: self,
        };
        let result = match next.run(request).await {
            Ok(response) => check(response),
            Err(err) => Err(err),
        };

        match result {
            Ok(response) => response,
            Err(err) => self.fault_response(err, request).await,
        }
    }

    /// Renders an error page through the configured error handler.
    pub async fn error_response(&self, status: StatusCode, reason: &str, request: Option<&Request>) -> Response {
        self.error_handler.render(status, reason, request).await
    }

    async fn dispatch(&self, request: &mut Request) -> Result<Response, HandlerError> {
        for unit in &self.units {
            let response = match unit.respond(request) {
                Outcome::Response(response) => response,
                Outcome::Pending(pending) => pending.await?,
                Outcome::Fallthrough => continue,
                Outcome::Fault(err) => return Err(err),
            };

            let response = check(response)?;
            if response.status != StatusCode::NOT_FOUND {
                return Ok(response);
            }
        }

        let status = StatusCode::NOT_FOUND;
        Ok(self.error_handler.render(status, status.reason_phrase(), Some(request)).await)
    }

    async fn fault_response(&self, err: HandlerError, request: &Request) -> Response {
        let status = err.status();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(
                method = %request.method,
                path = %request.path(),
                error = %err.detail(),
                "responder failed"
            );
            let detail;
            let reason = if self.debug {
                detail = err.detail();
                detail.as_str()
            } else {
                GENERIC_FAULT_MESSAGE
            };
            return self.error_handler.render(status, reason, Some(request)).await;
        }

        tracing::debug!(%status, error = %err, "request rejected");
        self.error_handler.render(status, status.reason_phrase(), Some(request)).await
    }
}

fn check(response: Response) -> Result<Response, HandlerError> {
    if response.status.is_valid() {
        Ok(response)
    } else {
        Err(HandlerError::InvalidResult(format!(
            "status code {} is out of range",
            response.status.as_u16()
        )))
    }
}

pub struct ChainBuilder {
    units: Vec<Arc<dyn Responder>>,
    middleware: Vec<Arc<dyn Middleware>>,
    error_handler: Arc<dyn ErrorHandler>,
    debug: bool,
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self {
            units: Vec::new(),
            middleware: Vec::new(),
            error_handler: Arc::new(HtmlErrorHandler),
            debug: false,
        }
    }
}

impl ChainBuilder {
    pub fn responder(mut self, unit: impl Responder + 'static) -> Self {
        self.units.push(Arc::new(unit));
        self
    }

    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Put fault details into 500 responses.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn build(self) -> ResponderChain {
        ResponderChain {
            units: self.units,
            middleware: self.middleware,
            error_handler: self.error_handler,
            debug: self.debug,
        }
    }
}
