use dotenv::dotenv;
use lexledger_core::api::{create_router, AppState};
use lexledger_core::billing::{InvoiceService, StatisticsReporter};
use lexledger_core::config::AppConfig;
use lexledger_core::db;
use lexledger_core::notifier::LogNotifier;
use lexledger_core::store::{BillingStore, PgStore};
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

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

    info!("Starting LexLedger Core Server...");

    let config = AppConfig::from_env()?;

    // Initialize database connection pool
    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    db::run_migrations(&pool).await?;
    let store: Arc<dyn BillingStore> = Arc::new(PgStore::new(pool));

    let notifier = Arc::new(LogNotifier::new()?);
    let invoices = InvoiceService::new(store.clone(), notifier, config.billing_settings());

    let app_state = AppState {
        store: store.clone(),
        invoices: Arc::new(invoices),
        statistics: StatisticsReporter::new(store),
        jwt_secret: config.jwt_secret.clone(),
    };

    let app = create_router(app_state);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", address, e))?;

    info!("Server listening on {}", address);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
