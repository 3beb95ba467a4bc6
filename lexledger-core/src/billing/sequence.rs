//! Human-readable invoice and case numbers.

use chrono::{Datelike, NaiveDate};
use std::sync::Arc;
use tracing::info;

use crate::error::BillingResult;
use crate::store::BillingStore;

/// Numbering schemes and the period each one restarts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceScope {
    /// `INV-YYYY-NNNNN`, restarting every year
    InvoiceYear,
    /// `YYMM-NNNN`, restarting every month
    CaseMonth,
}

impl SequenceScope {
    pub fn prefix(&self, date: NaiveDate) -> String {
        match self {
            SequenceScope::InvoiceYear => format!("INV-{:04}-", date.year()),
            SequenceScope::CaseMonth => {
                format!("{:02}{:02}-", date.year().rem_euclid(100), date.month())
            }
        }
    }

    /// Zero-padded width of the numeric suffix.
    pub fn width(&self) -> usize {
        match self {
            SequenceScope::InvoiceYear => 5,
            SequenceScope::CaseMonth => 4,
        }
    }
}

/// Numeric suffix of `number` if it starts with `prefix`.
pub fn parse_suffix(number: &str, prefix: &str) -> Option<u32> {
    let suffix = number.strip_prefix(prefix)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

pub fn format_number(prefix: &str, value: u32, width: usize) -> String {
    format!("{}{:0width$}", prefix, value, width = width)
}

/// Allocates numbers through the store's atomic counter.
#[derive(Clone)]
pub struct SequenceGenerator {
    store: Arc<dyn BillingStore>,
}

impl SequenceGenerator {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn next(&self, scope: SequenceScope, date: NaiveDate) -> BillingResult<String> {
        let prefix = scope.prefix(date);
        let value = self.store.next_sequence_value(scope, &prefix).await?;
        let number = format_number(&prefix, value, scope.width());
        info!("Allocated number {}", number);
        Ok(number)
    }

    pub async fn next_invoice_number(&self, date: NaiveDate) -> BillingResult<String> {
        self.next(SequenceScope::InvoiceYear, date).await
    }
}
