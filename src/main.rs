use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use flowq::api;
use flowq::config::Config;
use flowq::qmgr::{sweep, QMgr};
use flowq::shutdown::install_shutdown_handler;
use flowq::store::gateway::Gateway;
use flowq::store::memory::MemStore;

#[derive(Parser, Debug)]
#[command(name = "flowq")]
#[command(about = "Workflow queue manager: schedules workunits onto worker clients")]
struct Args {
    /// Port for the HTTP control plane (overrides the configured
    /// listen address)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.listen_addr = SocketAddr::new(config.listen_addr.ip(), port);
    }

    let store = Arc::new(MemStore::new());
    let gateway = Gateway::new(store, &config);
    gateway.ensure_indexes().await?;

    let listen_addr = config.listen_addr;
    let qmgr = Arc::new(QMgr::new(gateway, config));

    let recovered = qmgr.reconcile().await?;
    tracing::info!(
        addr = %listen_addr,
        recovered,
        "starting queue manager"
    );

    let shutdown = install_shutdown_handler();
    sweep::spawn_sweepers(qmgr.clone(), shutdown.clone());

    let app = api::router(qmgr);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
