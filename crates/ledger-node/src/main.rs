mod api;
mod config;
mod constants;

use anyhow::Context;
use clap::Parser;
use config::Settings;
use constants::DEFAULT_CONFIG_PATH;
use ledger_core::Transaction;
use ledger_p2p::{Node, Server, SharedLedger, Synchronizer};
use ledger_storage::{JsonFileStore, PeersFile};
use std::{path::PathBuf, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Path to the JSON node config
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Address for the HTTP control API, e.g. 127.0.0.1:8080
    #[arg(long)]
    api: Option<String>,

    /// Submit one transaction and mine a block right after startup
    #[arg(long)]
    demo: bool,

    /// Reconcile with every peer before serving
    #[arg(long)]
    sync_on_start: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::load(&args.config)?;

    let store = Arc::new(JsonFileStore::new(&settings.blockchain_file));
    let ledger = SharedLedger::open(store)?;
    let sync = Synchronizer::new(settings.sync_config());
    let peers = Arc::new(PeersFile::new(&settings.peers_file));
    let node = Node::new(ledger.clone(), sync.clone(), peers, settings.node_config());

    let listener = tokio::net::TcpListener::bind(settings.listen_addr())
        .await
        .with_context(|| format!("binding {}", settings.listen_addr()))?;
    info!("[SERVER] Listening on {}", listener.local_addr()?);
    let server = Server::new(ledger, sync, settings.server_config());
    let server_task = tokio::spawn(server.serve(listener));

    if args.sync_on_start {
        if let Some(peer) = node.sync_with_peers().await? {
            info!("[RESOLVE] started from the chain of {peer}");
        }
    }

    if args.demo {
        run_demo(&node).await?;
        if args.api.is_none() {
            return Ok(());
        }
    }

    match args.api {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding api {addr}"))?;
            info!("ledger-node api on http://{}", listener.local_addr()?);
            let app = api::router(api::AppState { node });
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        None => {
            tokio::select! {
                res = server_task => {
                    res.context("server task panicked")??;
                }
                _ = shutdown_signal() => {}
            }
        }
    }
    info!("shutting down");
    Ok(())
}

/// One transfer, one block: enough to watch two nodes gossip.
async fn run_demo(node: &Node) -> anyhow::Result<()> {
    let submission = node
        .add_transaction(Transaction::new("thiago", "weberti", 10.0))
        .await?;
    if !submission.broadcast.failed.is_empty() {
        warn!(
            failed = submission.broadcast.failed.len(),
            "transaction did not reach every peer"
        );
    }
    let mined = node.mine().await?;
    info!(index = mined.block.index, hash = %mined.block.hash, "demo block mined");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
