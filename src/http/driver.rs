use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Error;
use crate::http::connection::{ConnectionInfo, TlsInfo};
use crate::http::{h1, h2};
use crate::server::ServerContext;

pub const ALPN_H2: &[u8] = b"h2";
pub const ALPN_HTTP11: &[u8] = b"http/1.1";

/// Protocol driver bound to a connection. Chosen once, at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpDriver {
    Http1,
    Http2,
}

impl HttpDriver {
    /// HTTP/2 only when `h2` was negotiated over TLS and is enabled.
    pub fn select(tls: Option<&TlsInfo>, http2_enabled: bool) -> Self {
        let negotiated_h2 = tls
            .and_then(|tls| tls.alpn_protocol.as_deref())
            .is_some_and(|proto| proto == ALPN_H2);

        if http2_enabled && negotiated_h2 {
            HttpDriver::Http2
        } else {
            HttpDriver::Http1
        }
    }

    /// Protocol identifiers for the TLS layer to offer, most preferred first.
    pub fn alpn_protocols(http2_enabled: bool) -> Vec<Vec<u8>> {
        let mut protocols = Vec::with_capacity(2);
        if http2_enabled {
            protocols.push(ALPN_H2.to_vec());
        }
        protocols.push(ALPN_HTTP11.to_vec());
        protocols
    }

    pub async fn serve<S>(self, io: S, info: Arc<ConnectionInfo>, server: Arc<ServerContext>) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        match self {
            HttpDriver::Http1 => h1::serve(io, info, server).await,
            HttpDriver::Http2 => h2::serve(io, info, server).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tls(alpn: &[u8]) -> TlsInfo {
        TlsInfo {
            alpn_protocol: Some(alpn.to_vec()),
            ..TlsInfo::default()
        }
    }

    #[test]
    fn h2_requires_tls_and_alpn() {
        assert_eq!(HttpDriver::select(None, true), HttpDriver::Http1);
        assert_eq!(HttpDriver::select(Some(&TlsInfo::default()), true), HttpDriver::Http1);
        assert_eq!(HttpDriver::select(Some(&tls(b"http/1.1")), true), HttpDriver::Http1);
        assert_eq!(HttpDriver::select(Some(&tls(b"h2")), true), HttpDriver::Http2);
        assert_eq!(HttpDriver::select(Some(&tls(b"h2")), false), HttpDriver::Http1);
    }

    #[test]
    fn advertised_protocols() {
        assert_eq!(HttpDriver::alpn_protocols(true), vec![b"h2".to_vec(), b"http/1.1".to_vec()]);
        assert_eq!(HttpDriver::alpn_protocols(false), vec![b"http/1.1".to_vec()]);
    }
}
