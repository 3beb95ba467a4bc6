use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

use crate::models::invoice::InvoiceStatus;

/// Inclusive date range for reports. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl ReportRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

/// Count and sums of invoices sharing a status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub status: InvoiceStatus,
    pub count: i64,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub balance: Decimal,
}

/// Amount grouped by calendar month.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct MonthAmount {
    pub year: i32,
    pub month: i32,
    pub amount: Decimal,
}

impl MonthAmount {
    pub fn for_date(date: NaiveDate, amount: Decimal) -> Self {
        MonthAmount {
            year: date.year(),
            month: date.month() as i32,
            amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyBreakdown {
    pub year: i32,
    pub month: i32,
    pub invoiced: Decimal,
    pub paid: Decimal,
}

impl MonthlyBreakdown {
    /// Combines per-month invoiced and paid sums into one ascending series.
    pub fn merge(invoiced: Vec<MonthAmount>, paid: Vec<MonthAmount>) -> Vec<MonthlyBreakdown> {
        let mut months: BTreeMap<(i32, i32), MonthlyBreakdown> = BTreeMap::new();
        for (row, is_paid) in invoiced
            .into_iter()
            .map(|r| (r, false))
            .chain(paid.into_iter().map(|r| (r, true)))
        {
            let entry = months
                .entry((row.year, row.month))
                .or_insert_with(|| MonthlyBreakdown {
                    year: row.year,
                    month: row.month,
                    invoiced: Decimal::ZERO,
                    paid: Decimal::ZERO,
                });
            if is_paid {
                entry.paid += row.amount;
            } else {
                entry.invoiced += row.amount;
            }
        }
        months.into_values().collect()
    }
}

/// Raw time totals used for utilization.
#[derive(Debug, Clone, Default, PartialEq, FromRow)]
pub struct TimeTotals {
    pub total_minutes: i64,
    pub billable_minutes: i64,
    pub billable_amount: Decimal,
}
