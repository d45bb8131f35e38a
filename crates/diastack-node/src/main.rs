use anyhow::Context;
use diastack_config::{load_config, StackConfig};
use diastack_node::DiameterStack;
use std::sync::Arc;
use tracing::{error, info};

const DEFAULT_CONFIG: &str = "config/diastack.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config: StackConfig =
        load_config(&path).with_context(|| format!("loading configuration from {path}"))?;

    diastack_logging::init_with(&config.logging.level, config.logging.format);

    info!(
        service = "diastack-agent",
        version = env!("CARGO_PKG_VERSION"),
        host = %config.local.host,
        realm = %config.local.realm,
        "Starting Diameter agent"
    );

    let stack = Arc::new(
        DiameterStack::from_config(&config)
            .await
            .context("building Diameter stack")?,
    );
    stack.start().await.context("starting peers")?;

    if let Some(addr) = config.local.listen {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        let server = stack.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                error!(error = %e, "Listener stopped");
            }
        });
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutting down Diameter agent");
    stack.shutdown().await;

    if let Ok(metrics) = stack.metrics().gather() {
        info!(metrics = %metrics, "Final counters");
    }
    Ok(())
}
