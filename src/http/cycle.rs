use std::sync::Arc;

use bytes::Bytes;

use crate::error::ParseError;
use crate::http::body::Body;
use crate::http::connection::ConnectionInfo;
use crate::http::parser::{BodyKind, RequestHead};
use crate::http::request::{Request, RequestUri, Version};

/// One request on a connection, from parsed head until its response has
/// been written.
#[derive(Debug)]
pub struct MessageCycle {
    pub request: Request,
    /// The connection closes once this response is written.
    pub close_after: bool,
    /// The client waits for `100 Continue` before sending the body.
    pub expects_continue: bool,
}

impl MessageCycle {
    /// `last` marks the final request the connection will accept.
    pub fn new(head: RequestHead, body: Body, connection: Arc<ConnectionInfo>, last: bool) -> Result<Self, ParseError> {
        let uri = RequestUri::derive(&head.target, head.headers.get("Host"), connection.is_encrypted())
            .map_err(|kind| ParseError::new(kind, Bytes::from(head.target.clone())))?;
        let has_body = head.body != BodyKind::Empty;

        let request = Request::new(head.method, uri, head.version, head.headers, body, connection);
        let close_after = last || !request.keep_alive() || request.version < Version::Http11;
        let expects_continue = has_body && request.expects_continue();

        Ok(Self {
            request,
            close_after,
            expects_continue,
        })
    }
}
