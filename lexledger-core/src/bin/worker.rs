use dotenv::dotenv;
use lexledger_core::billing::InvoiceService;
use lexledger_core::config::AppConfig;
use lexledger_core::db;
use lexledger_core::notifier::LogNotifier;
use lexledger_core::store::{BillingStore, PgStore};
use lexledger_core::worker::OverdueSweeper;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Worker binary entry point for the overdue sweep.
///
/// Periodically moves open invoices past their due date to `overdue`.
/// All state lives in the database, so the worker can be restarted freely.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(LevelFilter::INFO.into());

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    info!("Starting LexLedger Overdue Worker...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    let store: Arc<dyn BillingStore> = Arc::new(PgStore::new(pool));
    let invoices = Arc::new(InvoiceService::new(
        store,
        Arc::new(LogNotifier::new()?),
        config.billing_settings(),
    ));

    let sweeper = Arc::new(OverdueSweeper::new(
        invoices,
        Some(config.worker_poll_interval_seconds),
    ));

    let runner = sweeper.clone();
    let sweeper_handle = tokio::spawn(async move { runner.start().await });

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            sweeper.stop().await;
        }
        _ = sweeper_handle => {
            info!("Sweeper task completed");
        }
    }

    info!("LexLedger Overdue Worker stopped");
    Ok(())
}
