//! HTTP protocol implementation.
//!
//! # Architecture
//!
//! - **`connection`**: per-socket state and driver binding
//! - **`driver`**: picks HTTP/1.x or HTTP/2 from the ALPN outcome
//! - **`h1`** / **`h2`**: the two protocol drivers
//! - **`parser`**: incremental HTTP/1.x request parser
//! - **`cycle`**: one request's bookkeeping until its response is written
//! - **`body`**: streaming request bodies
//! - **`request`** / **`response`** / **`headers`**: message types
//! - **`writer`**: header normalization, framing and socket draining
//!
//! # Message State Machine
//!
//! Each HTTP/1.x message moves through the parser states while the writer
//! runs its own state machine for the response:
//!
//! ```text
//!   Parser                              Writer
//!   ┌──────────────────┐                ┌─────────┐
//!   │ AwaitingHeaders  │ ← next message │  Idle   │
//!   └────────┬─────────┘                └────┬────┘
//!            │ Head                          │ write_response
//!            ▼                               ▼
//!   ┌──────────────────┐                ┌─────────┐
//!   │   ReadingBody    │ Data/Trailers  │ Writing │
//!   └────────┬─────────┘                └────┬────┘
//!            │ Complete                      ├─ ok  → Drained
//!            ▼                               └─ err → Failed
//!   ┌──────────────────┐
//!   │     Complete     │
//!   └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use keel::http::connection::Connection;
//! use tokio::net::TcpListener;
//!
//! let listener = TcpListener::bind("127.0.0.1:8080").await?;
//! loop {
//!     let (socket, peer) = listener.accept().await?;
//!     let info = server.connection_info(None, Some(peer), None);
//!     let server = Arc::clone(&server);
//!     tokio::spawn(async move {
//!         if let Err(e) = Connection::new(socket, info, server).run().await {
//!             eprintln!("Connection error: {}", e);
//!         }
//!     });
//! }
//! ```

pub mod body;
pub mod connection;
pub mod cycle;
pub mod driver;
mod h1;
mod h2;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
