use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::http::connection::Connection;
use crate::server::ServerContext;

pub async fn run(server: Arc<ServerContext>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&server.config.listen_addr).await?;
    info!("Listening on {}", server.config.listen_addr);
    serve(listener, server).await
}

/// Accepts connections from an already bound listener until accepting fails.
pub async fn serve(listener: TcpListener, server: Arc<ServerContext>) -> anyhow::Result<()> {
    let local_addr = listener.local_addr().ok();

    loop {
        let (socket, peer) = listener.accept().await?;
        let _ = socket.set_nodelay(true);

        let info = server.connection_info(local_addr, Some(peer), None);
        info!(connection = info.id, "Accepted connection from {}", peer);

        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let conn = Connection::new(socket, info, server);
            if let Err(e) = conn.run().await {
                if e.is_disconnect() {
                    tracing::debug!("Connection from {} closed early: {}", peer, e);
                } else {
                    tracing::error!("Connection error from {}: {}", peer, e);
                }
            }
        });
    }
}
