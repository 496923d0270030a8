use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::http::driver::HttpDriver;
use crate::server::ServerContext;

/// TLS parameters negotiated by the (external) TLS layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsInfo {
    /// ALPN protocol identifier, e.g. `h2`.
    pub alpn_protocol: Option<Vec<u8>>,
    pub cipher: Option<String>,
    pub protocol_version: Option<String>,
}

/// Per-connection facts shared with every request on it.
#[derive(Debug)]
pub struct ConnectionInfo {
    pub id: u64,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub tls: Option<TlsInfo>,
    last_activity: AtomicU64,
    in_flight: AtomicUsize,
}

impl ConnectionInfo {
    pub fn new(id: u64, local_addr: Option<SocketAddr>, remote_addr: Option<SocketAddr>, tls: Option<TlsInfo>) -> Self {
        Self {
            id,
            local_addr,
            remote_addr,
            tls,
            last_activity: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Info for requests built outside a live connection.
    pub fn detached() -> Self {
        Self::new(0, None, None, None)
    }

    pub fn is_encrypted(&self) -> bool {
        self.tls.is_some()
    }

    /// Clock seconds of the last read or write.
    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    pub(crate) fn touch(&self, now: u64) {
        self.last_activity.store(now, Ordering::Relaxed);
    }

    /// Requests read but not yet fully answered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn request_started(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn request_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One accepted socket, served with the driver its negotiated protocol
/// calls for.
pub struct Connection<S> {
    stream: S,
    info: Arc<ConnectionInfo>,
    server: Arc<ServerContext>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(stream: S, info: ConnectionInfo, server: Arc<ServerContext>) -> Self {
        info.touch(server.clock.current_time());
        Self {
            stream,
            info: Arc::new(info),
            server,
        }
    }

    pub fn info(&self) -> &Arc<ConnectionInfo> {
        &self.info
    }

    pub fn driver(&self) -> HttpDriver {
        HttpDriver::select(self.info.tls.as_ref(), self.server.config.enable_http2)
    }

    /// Serves requests until the connection closes.
    pub async fn run(self) -> Result<(), crate::error::Error> {
        let driver = self.driver();
        tracing::debug!(connection = self.info.id, ?driver, "serving connection");
        driver.serve(self.stream, self.info, self.server).await
    }
}
