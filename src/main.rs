//! Process entrypoint: loads configuration, opens persisted state, wires
//! the shared `Context`, and starts the side-chain monitors, the p2p
//! overlay, the withdraw orchestrator driver, and the read-only status
//! API, all per spec §5/§6.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;

use elabridge::arbiter_group::ArbiterGroupCache;
use elabridge::config::Parameters;
use elabridge::context::Context;
use elabridge::monitor::SideChainMonitor;
use elabridge::orchestrator::Orchestrator;
use elabridge::p2p::overlay::Overlay;
use elabridge::reservation::ReservationProtocol;
use elabridge::rpc::main_chain::MainChainClient;
use elabridge::signing::{PendingProposals, SigningEngine};
use elabridge::store::tx_cache::TxCache;
use elabridge::store::utxo_ledger::UtxoLedger;
use elabridge::telemetry::TelemetryConfig;

#[derive(Parser, Debug)]
#[clap(name = "elabridge")]
#[clap(about = "Cross-chain arbitration node", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[clap(long, default_value = "elabridge.toml")]
    config: String,

    /// Log format: "json" or "pretty". Overrides ELABRIDGE_LOG_FORMAT.
    #[clap(long)]
    log_format: Option<String>,

    /// Log level, e.g. "info", "debug". Overrides RUST_LOG.
    #[clap(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig::default();
    if let Some(level) = cli.log_level {
        telemetry.log_level = level;
    }
    if let Some(format) = cli.log_format {
        telemetry.log_format = format;
    }
    elabridge::telemetry::init_tracing(telemetry)?;
    elabridge::metrics::init_metrics()?;

    let config = Arc::new(Parameters::load(&cli.config)?);

    // A database open failure is fatal; the monitors must not start
    // against a half-initialized store (spec §7).
    let db_path = format!("{}.db", config.main_chain_multisig_address);
    let db = Arc::new(elabridge::store::open_db(&db_path)?);

    let signing = Arc::new(SigningEngine::load_from_keystore(&config.main_keystore_file)?);
    let local_public_key = signing.public_key_hex.clone();

    let main_chain = Arc::new(MainChainClient::new(config.main_node.clone()));
    let arbiter_group = Arc::new(ArbiterGroupCache::new(config.withdraw_majority_count));

    let (inbound_tx, mut inbound_rx) = mpsc::channel(1024);
    let overlay = Overlay::new(inbound_tx);

    let context = Arc::new(Context {
        config: Arc::clone(&config),
        db: Arc::clone(&db),
        main_chain: Arc::clone(&main_chain),
        arbiter_group: Arc::clone(&arbiter_group),
        overlay: Arc::clone(&overlay),
        local_public_key: local_public_key.clone(),
    });

    let cache = Arc::new(TxCache::new(Arc::clone(&db)));
    let ledger = Arc::new(UtxoLedger::new(Arc::clone(&db)));
    let reservation = Arc::new(ReservationProtocol::new(config.min_received_used_utxo_msg_number as usize));
    let pending_proposals = Arc::new(PendingProposals::new());

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&cache),
        Arc::clone(&ledger),
        Arc::clone(&reservation),
        Arc::clone(&pending_proposals),
        Arc::clone(&signing),
        Arc::clone(&overlay),
        Arc::clone(&main_chain),
        Arc::clone(&arbiter_group),
        config.main_chain_multisig_address.clone(),
    ));

    {
        let overlay = Arc::clone(&overlay);
        let bind_addr = config.p2p_listen_address.clone();
        tokio::spawn(async move {
            if let Err(e) = overlay.listen(&bind_addr).await {
                tracing::error!(error = %e, "p2p listener exited");
            }
        });
    }

    {
        let overlay = Arc::clone(&overlay);
        let main_chain = Arc::clone(&main_chain);
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            peer_sync_loop(overlay, main_chain, config).await;
        });
    }

    {
        let orchestrator = Arc::clone(&orchestrator);
        let local_public_key = local_public_key.clone();
        tokio::spawn(async move {
            while let Some((peer_id, msg)) = inbound_rx.recv().await {
                if let Err(e) = orchestrator.handle_message(&peer_id, msg, &local_public_key).await {
                    tracing::warn!(peer = %peer_id, error = %e, "failed to handle inbound p2p message");
                }
            }
        });
    }

    for side_node in &config.side_node_list {
        let monitor = SideChainMonitor::new(side_node, config.side_chain_monitor_confirmations);
        let cache = Arc::clone(&cache);
        let main_chain = Arc::clone(&main_chain);
        let arbiter_group = Arc::clone(&arbiter_group);
        let local_public_key = local_public_key.clone();
        let scan_interval_ms = config.side_chain_monitor_scan_interval;
        tokio::spawn(async move {
            monitor.run(cache, main_chain, arbiter_group, local_public_key, scan_interval_ms).await;
        });

        let orchestrator = Arc::clone(&orchestrator);
        let genesis_address = side_node.genesis_block_address.clone();
        let local_public_key = local_public_key.clone();
        let scan_interval_ms = config.side_chain_monitor_scan_interval;
        tokio::spawn(async move {
            loop {
                if let Err(e) = orchestrator
                    .send_cached_withdraw_txs(&genesis_address, &local_public_key)
                    .await
                {
                    tracing::warn!(genesis_address = %genesis_address, error = %e, "withdraw orchestration tick failed");
                }
                tokio::time::sleep(Duration::from_millis(scan_interval_ms)).await;
            }
        });
    }

    let api_addr = config.api_listen_address.clone();
    let app = elabridge::api::router(Arc::clone(&context));
    let listener = tokio::net::TcpListener::bind(&api_addr).await?;
    tracing::info!(addr = %api_addr, "status API listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Keeps the p2p overlay's connected peer set equal to the union of the
/// current on-duty arbiter group and, below `private_dpos_height`, the
/// configured static origin/CRC arbiter sets (spec §4.5).
async fn peer_sync_loop(overlay: Arc<Overlay>, main_chain: Arc<MainChainClient>, config: Arc<Parameters>) {
    loop {
        match main_chain.get_block_count().await {
            Ok(height) => {
                let active = if height < config.private_dpos_height {
                    config
                        .origin_cross_chain_arbiters
                        .iter()
                        .chain(config.crc_cross_chain_arbiters.iter())
                        .map(|a| (a.public_key.clone(), a.net_address.clone()))
                        .collect::<Vec<_>>()
                } else {
                    match main_chain.get_dpos_peers_info().await {
                        Ok(peers) => peers
                            .into_iter()
                            .map(|p| (p.node_public_key, p.ip))
                            .collect::<Vec<_>>(),
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to fetch dpos peer info, keeping existing peer set");
                            Vec::new()
                        }
                    }
                };
                if !active.is_empty() {
                    overlay.sync_peers(&active).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch main chain height for peer sync");
            }
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
}
