use axum::{
    extract::{Query, State},
    response::Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::AppState;
use crate::billing::{BillingSummary, TimeUtilization};
use crate::error::BillingResult;
use crate::models::{MonthlyBreakdown, ReportRange};

/// Query of `GET /time/utilization`.
#[derive(Debug, Default, Deserialize)]
pub struct UtilizationQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub user: Option<Uuid>,
}

pub async fn invoice_statistics(
    State(state): State<AppState>,
    Query(range): Query<ReportRange>,
) -> BillingResult<Json<BillingSummary>> {
    Ok(Json(state.statistics.summary(&range).await?))
}

pub async fn monthly_statistics(
    State(state): State<AppState>,
    Query(range): Query<ReportRange>,
) -> BillingResult<Json<Vec<MonthlyBreakdown>>> {
    Ok(Json(state.statistics.monthly(&range).await?))
}

pub async fn time_utilization(
    State(state): State<AppState>,
    Query(query): Query<UtilizationQuery>,
) -> BillingResult<Json<TimeUtilization>> {
    let range = ReportRange {
        from: query.from,
        to: query.to,
    };
    Ok(Json(state.statistics.utilization(&range, query.user).await?))
}
