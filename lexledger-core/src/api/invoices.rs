use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::CurrentUser;
use crate::error::BillingResult;
use crate::models::{
    CreateInvoice, GenerateInvoice, Invoice, InvoiceDetail, InvoiceFilter, NewPayment,
    UpdateInvoice,
};

/// Body of `POST /invoices`.
///
/// A body carrying `clientId` asks for generation from unbilled work;
/// anything else is an invoice with explicit items.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CreateInvoiceRequest {
    Generate(GenerateInvoice),
    Explicit(CreateInvoice),
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Query(filter): Query<InvoiceFilter>,
) -> BillingResult<Json<Vec<Invoice>>> {
    Ok(Json(state.invoices.list(&filter).await?))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> BillingResult<Json<InvoiceDetail>> {
    Ok(Json(state.invoices.get_detail(id).await?))
}

pub async fn create_invoice(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(request): Json<CreateInvoiceRequest>,
) -> BillingResult<(StatusCode, Json<Invoice>)> {
    let invoice = match request {
        CreateInvoiceRequest::Generate(input) => {
            info!("Generating invoice for client {} by user {}", input.client_id, user_id);
            state.invoices.generate_from_unbilled(input, user_id).await?
        }
        CreateInvoiceRequest::Explicit(input) => state.invoices.create(input, user_id).await?,
    };
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn update_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<UpdateInvoice>,
) -> BillingResult<Json<Invoice>> {
    Ok(Json(state.invoices.update(id, patch).await?))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> BillingResult<Json<serde_json::Value>> {
    let invoice = state.invoices.delete(id).await?;
    Ok(Json(serde_json::json!({
        "message": "Invoice deleted",
        "invoiceNumber": invoice.invoice_number,
    })))
}

pub async fn record_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(payment): Json<NewPayment>,
) -> BillingResult<Json<Invoice>> {
    Ok(Json(state.invoices.record_payment(id, payment, user_id).await?))
}

pub async fn send_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> BillingResult<Json<Invoice>> {
    Ok(Json(state.invoices.send(id).await?))
}

pub async fn overdue_invoices(State(state): State<AppState>) -> BillingResult<Json<Vec<Invoice>>> {
    let today = state.invoices.today();
    Ok(Json(state.invoices.overdue(today).await?))
}
