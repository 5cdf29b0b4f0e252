//! Escrow ledger node binary

use anyhow::Context;
use escrow_core::{spawn_ledger_actor, spawn_outbox_drainer, Config, Ledger, Transfer};
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting escrow ledger node");

    // Load configuration
    let config = match std::env::var("ESCROW_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::from_env().context("reading ESCROW_* environment")?,
    };
    let mailbox_capacity = config.actor.mailbox_capacity;
    let drain_interval = Duration::from_millis(config.actor.outbox_drain_interval_ms);

    // Open ledger (replays the journal when enabled)
    let ledger = Arc::new(Ledger::open(config).context("opening ledger")?);
    tracing::info!(
        apps = ledger.app_count(),
        settings_version = ledger.settings_version(),
        "Ledger opened successfully"
    );

    let handle = spawn_ledger_actor(ledger.clone(), mailbox_capacity);

    // Stand-in dispatcher: forward committed events to the log as JSON
    let mut events = ledger.subscribe();
    let dispatcher = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match event.to_json() {
                    Ok(json) => tracing::info!(sequence = event.sequence, event = %json, "Ledger event"),
                    Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event dispatcher lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Stand-in settlement: forward drained transfers to the log as JSON
    let drainer = spawn_outbox_drainer(ledger.clone(), drain_interval, settle);

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down escrow ledger node");
    handle.shutdown().await?;
    drainer.abort();
    for transfer in ledger.transfer_outbox().drain().context("draining transfer outbox")? {
        settle(transfer);
    }
    dispatcher.abort();
    Ok(())
}

fn settle(transfer: Transfer) {
    match serde_json::to_string(&transfer) {
        Ok(json) => tracing::info!(transfer_id = %transfer.transfer_id, transfer = %json, "Transfer released"),
        Err(e) => tracing::warn!(transfer_id = %transfer.transfer_id, error = %e, "Failed to encode transfer"),
    }
}
