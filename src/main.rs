use std::sync::Arc;

use keel::clock::Clock;
use keel::config::Config;
use keel::http::response::Response;
use keel::responder::{self, Outcome, ResponderChain};
use keel::server::{self, ServerContext};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config::load()?;

    let chain = ResponderChain::builder()
        .debug(cfg.debug)
        .responder(responder::from_fn(|_req| Outcome::Response(Response::ok("Hello from keel\n"))))
        .build();
    let server = Arc::new(ServerContext::new(cfg, chain, Clock::start()));

    tokio::select! {
        res = server::listener::run(server) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
