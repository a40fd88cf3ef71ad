use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hearth_daemon::build_router;
use hearth_daemon::config::DaemonConfig;
use hearth_rpc::serve_connection;
use hearth_store::DeviceStore;
use log::{info, warn};
use tokio::net::TcpListener;

#[derive(Debug, Parser)]
#[command(name = "hearthd", about = "Smart-home gateway RPC daemon")]
struct Args {
    /// Path to a toml config file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Listen address; overrides the config file.
    #[arg(long)]
    listen: Option<String>,
    /// Device database path; overrides the config file.
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load_from_path(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(db) = args.db {
        config.db_path = Some(db.display().to_string());
    }

    let store = match &config.db_path {
        Some(path) => DeviceStore::open(Path::new(path))
            .with_context(|| format!("failed to open device store at {path}"))?,
        None => {
            warn!("no database path configured; device records will not survive a restart");
            DeviceStore::in_memory().context("failed to open in-memory device store")?
        }
    };
    let router = Arc::new(build_router(Arc::new(store)));

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!("listening on {}", config.listen);

    loop {
        let (stream, peer) = listener.accept().await?;
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            if let Err(err) = serve_connection(&router, stream).await {
                warn!("connection from {peer} ended: {err}");
            }
        });
    }
}
