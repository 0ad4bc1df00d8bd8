//! Listener lifecycle: accept loop and graceful shutdown.
//!
//! Each accepted connection runs in its own task holding a drain guard (a
//! clone of an mpsc sender). On shutdown the listener stops accepting and
//! waits up to the grace period for every guard to drop; connections still
//! running after that are abandoned.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::http::connection::Connection;
use crate::proxy::backend::HttpBackend;
use crate::proxy::balancer::Balancer;

/// Binds the balancer's configured address and serves until `shutdown`
/// resolves.
pub async fn run(
    balancer: Arc<Balancer<HttpBackend>>,
    shutdown: impl Future<Output = ()>,
    grace: Duration,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(balancer.listen_addr()).await?;
    info!("Listening on {}", balancer.listen_addr());

    serve(listener, balancer, shutdown, grace).await
}

/// Accept loop with signal-triggered graceful shutdown.
///
/// Split from [`run`] so tests can pass a pre-bound listener and their own
/// shutdown trigger.
pub async fn serve(
    listener: TcpListener,
    balancer: Arc<Balancer<HttpBackend>>,
    shutdown: impl Future<Output = ()>,
    grace: Duration,
) -> anyhow::Result<()> {
    let (drain_tx, mut drain_rx) = mpsc::channel::<()>(1);

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (socket, peer) = res?;
                info!("Accepted connection from {}", peer);

                let balancer = balancer.clone();
                let guard = drain_tx.clone();

                tokio::spawn(async move {
                    let mut conn = Connection::new(socket, balancer);
                    if let Err(e) = conn.run().await {
                        tracing::error!("Connection error from {}: {}", peer, e);
                    }
                    drop(guard);
                });
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    // Stop accepting, then wait for in-flight connections to finish.
    drop(listener);
    drop(drain_tx);

    match timeout(grace, drain_rx.recv()).await {
        Ok(_) => info!("All connections drained, shutting down"),
        Err(_) => warn!(
            grace_secs = grace.as_secs(),
            "Drain grace period expired, abandoning remaining connections"
        ),
    }

    Ok(())
}
