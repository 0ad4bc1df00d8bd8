use std::sync::Arc;

use rotor::config::Config;
use rotor::proxy::Balancer;
use rotor::server::listener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let balancer = Arc::new(Balancer::new(&cfg)?);

    listener::run(balancer, shutdown_signal(), cfg.shutdown_grace()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
