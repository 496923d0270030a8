pub mod listener;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::clock::Clock;
use crate::config::Config;
use crate::http::connection::{ConnectionInfo, TlsInfo};
use crate::responder::ResponderChain;

/// State shared by every connection of one server.
pub struct ServerContext {
    pub config: Config,
    pub chain: ResponderChain,
    pub clock: Clock,
    next_connection_id: AtomicU64,
}

impl ServerContext {
    pub fn new(config: Config, chain: ResponderChain, clock: Clock) -> Self {
        Self {
            config,
            chain,
            clock,
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Describes a freshly accepted connection.
    pub fn connection_info(
        &self,
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
        tls: Option<TlsInfo>,
    ) -> ConnectionInfo {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        ConnectionInfo::new(id, local_addr, remote_addr, tls)
    }
}
