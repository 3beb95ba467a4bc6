//! HTTP surface of the billing engine.

pub mod invoices;
pub mod reports;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth;
use crate::billing::{InvoiceService, StatisticsReporter};
use crate::store::BillingStore;

/// Application state shared with every handler.
#[derive(Clone)]
pub struct AppState {
    /// Backing store, used directly only for health checks
    pub store: Arc<dyn BillingStore>,

    pub invoices: Arc<InvoiceService>,
    pub statistics: StatisticsReporter,

    /// Secret used to verify bearer tokens
    pub jwt_secret: Option<String>,
}

/// Health check endpoint.
///
/// Returns a simple JSON response indicating the server is running.
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "lexledger-core",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Database health check endpoint.
async fn db_health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!("Database health check failed: {}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "database": "connected"
    })))
}

/// Creates the main application router.
///
/// Health routes are public; everything else requires a bearer token.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/invoices",
            get(invoices::list_invoices).post(invoices::create_invoice),
        )
        .route("/invoices/overdue", get(invoices::overdue_invoices))
        .route("/invoices/statistics", get(reports::invoice_statistics))
        .route("/invoices/statistics/monthly", get(reports::monthly_statistics))
        .route(
            "/invoices/:id",
            get(invoices::get_invoice)
                .put(invoices::update_invoice)
                .delete(invoices::delete_invoice),
        )
        .route("/invoices/:id/payment", post(invoices::record_payment))
        .route("/invoices/:id/send", post(invoices::send_invoice))
        .route("/time/utilization", get(reports::time_utilization))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::jwt_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/health/db", get(db_health_check))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests;
