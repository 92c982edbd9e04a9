//! RFQ monitor daemon.
//!
//! Polls the marketplace for the seller's RFQs, turns changes into
//! notifications and keeps a running count of RFQs waiting on the operator.
//!
//! Usage:
//!   cargo run --bin rfq-monitor
//!
//! Settings come from `rfq-monitor.toml` when present, otherwise defaults;
//! credentials always come from the environment (see `.env`).

use anyhow::{Context, Result};
use rfq_monitor::actionable::{actionable, pending_action, pending_count};
use rfq_monitor::auth::ApiCredentials;
use rfq_monitor::config::Config;
use rfq_monitor::lifecycle::LifecyclePoller;
use rfq_monitor::notify::{EmitOutcome, NotificationEmitter};
use rfq_monitor::rfq::display::{best_quote_summary, escrow_summary, settlement_lines, Explorer};
use rfq_monitor::store::MarketplaceClient;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config_path = Path::new("rfq-monitor.toml");
    let config = if config_path.exists() {
        Config::load(config_path).context("loading rfq-monitor.toml")?
    } else {
        Config::from_env()?
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("rfq-monitor v{} starting", env!("CARGO_PKG_VERSION"));

    // --- Marketplace client ---
    config.require_credentials()?;
    let creds = ApiCredentials::from_config(
        &config.marketplace.api_key,
        &config.marketplace.private_key,
    )
    .context("marketplace credentials missing")?;

    let api_url = config.marketplace.api_url();
    let client = MarketplaceClient::new(
        api_url.clone(),
        creds,
        Duration::from_secs(config.marketplace.request_timeout_secs),
    )?;
    info!(
        server = %config.marketplace.server,
        url = %api_url,
        interval_ms = config.poller.interval_ms,
        "marketplace client ready"
    );

    let explorer = Explorer::new(config.marketplace.server);

    // --- Poller ---
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let poller = Arc::new(LifecyclePoller::new(
        Arc::new(client),
        config.poller.interval(),
        event_tx,
    ));
    let mut state_rx = poller.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poll_task = poller.clone().start(shutdown_rx);

    let mut emitter = NotificationEmitter::new(config.notifications.dismissed_capacity);
    let mut last_generation = 0u64;
    let mut last_pending: Option<usize> = None;

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                if let EmitOutcome::Replaced { previous_rfq_id } = emitter.on_event(&event) {
                    debug!(rfq = %previous_rfq_id, "notification replaced");
                }
                if let Some(doc) = poller.snapshot().get(&event.rfq_id) {
                    for line in settlement_lines(&explorer, doc) {
                        debug!(rfq = %doc.id, "{line}");
                    }
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    warn!("poller stopped");
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                if let Some(e) = &state.last_error {
                    debug!(error = %e, "last poll failed");
                }
                if !state.has_snapshot() || state.generation == last_generation {
                    continue;
                }
                last_generation = state.generation;

                let pending = pending_count(&state.snapshot);
                if last_pending == Some(pending) {
                    continue;
                }
                last_pending = Some(pending);
                info!(pending, total = state.snapshot.len(), "RFQs awaiting action");
                for doc in actionable(&state.snapshot) {
                    info!(
                        rfq = %doc.id,
                        action = ?pending_action(doc),
                        quote = %best_quote_summary(doc),
                        escrow = %escrow_summary(doc),
                        "action required"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = poll_task.await {
        error!(error = %e, "poller task failed");
    }
    info!("rfq-monitor stopped");
    Ok(())
}
