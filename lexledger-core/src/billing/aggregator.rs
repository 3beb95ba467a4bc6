use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use crate::billing::calculator::round_money;
use crate::error::BillingResult;
use crate::models::{Expense, InvoiceItem, TimeEntry};
use crate::store::{BillableQuery, BillingStore};

/// Line items built from a client's unbilled work.
#[derive(Debug, Clone, Default)]
pub struct BillableItems {
    pub items: Vec<InvoiceItem>,
    pub time_entries: usize,
    pub expenses: usize,
}

impl BillableItems {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Line for a time entry: `"<description> (<user>)"`, hours at the entry's rate.
pub fn time_entry_item(entry: &TimeEntry) -> InvoiceItem {
    InvoiceItem {
        description: format!("{} ({})", entry.description, entry.user_name),
        quantity: round_money(entry.hours()),
        rate: entry.billing_rate,
        amount: entry.billable_amount,
        time_entry_id: Some(entry.id),
        expense_id: None,
        case_id: entry.case_id,
        taxable: true,
    }
}

/// Line for an expense: one unit at the billed amount.
pub fn expense_item(expense: &Expense) -> InvoiceItem {
    let amount = expense.invoice_amount();
    InvoiceItem {
        description: format!("Expense: {}", expense.description),
        quantity: Decimal::ONE,
        rate: amount,
        amount,
        time_entry_id: None,
        expense_id: Some(expense.id),
        case_id: expense.case_id,
        taxable: true,
    }
}

/// Gathers unbilled, billable time entries and expenses into line items.
#[derive(Clone)]
pub struct BillableItemAggregator {
    store: Arc<dyn BillingStore>,
}

impl BillableItemAggregator {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Collects matching records, time entries first. An empty result is not an error.
    pub async fn collect(&self, query: &BillableQuery) -> BillingResult<BillableItems> {
        let entries = self.store.find_billable_time_entries(query).await?;
        let expenses = self.store.find_billable_expenses(query).await?;

        let items: Vec<InvoiceItem> = entries
            .iter()
            .map(time_entry_item)
            .chain(expenses.iter().map(expense_item))
            .collect();

        info!(
            client_id = %query.client_id,
            time_entries = entries.len(),
            expenses = expenses.len(),
            "Collected billable items"
        );

        Ok(BillableItems {
            items,
            time_entries: entries.len(),
            expenses: expenses.len(),
        })
    }
}
