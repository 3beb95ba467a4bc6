use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::billing::calculator::round_money;
use crate::error::BillingResult;
use crate::models::{InvoiceStatus, MonthlyBreakdown, ReportRange, StatusSummary};
use crate::store::BillingStore;

/// Aggregate invoice figures over a date range.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingSummary {
    pub total_invoiced: Decimal,
    pub total_paid: Decimal,
    pub total_outstanding: Decimal,
    pub average_invoice: Decimal,
    pub invoice_count: i64,
    pub by_status: Vec<StatusSummary>,
}

/// Share of recorded time that was billable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeUtilization {
    pub total_minutes: i64,
    pub billable_minutes: i64,
    pub billable_amount: Decimal,

    /// Percentage, two decimals
    pub utilization_rate: Decimal,
}

/// Read-only reporting over invoices and time entries.
#[derive(Clone)]
pub struct StatisticsReporter {
    store: Arc<dyn BillingStore>,
}

impl StatisticsReporter {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Totals over non-deleted invoices issued in the range.
    ///
    /// Cancelled invoices are listed per status but left out of the totals.
    pub async fn summary(&self, range: &ReportRange) -> BillingResult<BillingSummary> {
        let groups = self.store.summarize_by_status(range).await?;

        let mut summary = BillingSummary {
            total_invoiced: Decimal::ZERO,
            total_paid: Decimal::ZERO,
            total_outstanding: Decimal::ZERO,
            average_invoice: Decimal::ZERO,
            invoice_count: 0,
            by_status: Vec::new(),
        };

        for group in groups {
            if group.status != InvoiceStatus::Cancelled {
                summary.total_invoiced += group.total;
                summary.total_paid += group.amount_paid;
                summary.total_outstanding += group.balance;
                summary.invoice_count += group.count;
            }
            summary.by_status.push(group);
        }

        if summary.invoice_count > 0 {
            summary.average_invoice =
                round_money(summary.total_invoiced / Decimal::from(summary.invoice_count));
        }

        Ok(summary)
    }

    /// Invoiced and collected amounts per calendar month, oldest first.
    pub async fn monthly(&self, range: &ReportRange) -> BillingResult<Vec<MonthlyBreakdown>> {
        Ok(self.store.monthly_totals(range).await?)
    }

    /// Billable share of logged time, optionally for one user.
    pub async fn utilization(
        &self,
        range: &ReportRange,
        user_id: Option<Uuid>,
    ) -> BillingResult<TimeUtilization> {
        let totals = self.store.time_totals(range, user_id).await?;

        let utilization_rate = if totals.total_minutes > 0 {
            (Decimal::from(totals.billable_minutes) * Decimal::ONE_HUNDRED
                / Decimal::from(totals.total_minutes))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        } else {
            Decimal::ZERO
        };

        Ok(TimeUtilization {
            total_minutes: totals.total_minutes,
            billable_minutes: totals.billable_minutes,
            billable_amount: round_money(totals.billable_amount),
            utilization_rate,
        })
    }
}
