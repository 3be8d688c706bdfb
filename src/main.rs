//! gossip-store - Signed document store replicated over peer gossip
//!
//! This is the composition root that wires together all the components.

use gossip_store::adapters::inbound::ApiServer;
use gossip_store::adapters::outbound::{DashMapEntryStore, SqliteEntryStore};
use gossip_store::config::{load_config, StorageKind};
use gossip_store::domain::ports::EntryStore;
use gossip_store::infrastructure::shutdown_signal;
use gossip_store::replication::ReplicationAgent;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting gossip-store self={} peers={} api={}",
        cfg.self_address,
        cfg.peers.len(),
        cfg.api_listen_addr
    );

    // ===== COMPOSITION ROOT =====

    // 1. Entry store
    let store: Arc<dyn EntryStore> = match cfg.storage {
        StorageKind::Sqlite => {
            let store = SqliteEntryStore::open(cfg.db_path.clone())?;
            tracing::info!("entry store: sqlite at {}", store.path());
            Arc::new(store)
        }
        StorageKind::Memory => {
            tracing::info!("entry store: in-memory");
            Arc::new(DashMapEntryStore::new())
        }
    };

    // 2. Replication agent (peer transport + engine)
    let agent = Arc::new(ReplicationAgent::new(cfg.replication_config(), store)?);
    let peer_addr = agent.start().await?;
    tracing::info!("peer transport bound to {}", peer_addr);

    // 3. HTTP API, stopped on Ctrl+C / SIGTERM
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(());
    });

    let server = ApiServer::new(cfg.api_listen_addr.clone(), agent.clone());
    let result = server
        .run(async move {
            let _ = stop_rx.await;
        })
        .await;

    agent.stop().await;
    tracing::info!("gossip-store stopped");
    result
}
