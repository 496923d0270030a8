//! Keel - event-driven HTTP server core
//!
//! Parsing, request dispatch and response writing for HTTP/1.x and HTTP/2.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod responder;
pub mod server;
