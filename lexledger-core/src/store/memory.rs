use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::billing::sequence::{parse_suffix, SequenceScope};
use crate::models::{
    Case, Client, Expense, ExpenseStatus, Invoice, InvoiceFilter, InvoiceStatus, MonthAmount,
    MonthlyBreakdown, ReportRange, StatusSummary, TimeEntry, TimeTotals,
};
use crate::store::{BillableQuery, BillingStore, SourceChanges, StoreError};

#[derive(Default)]
struct MemoryState {
    clients: HashMap<Uuid, Client>,
    cases: HashMap<Uuid, Case>,
    invoices: HashMap<Uuid, Invoice>,
    time_entries: HashMap<Uuid, TimeEntry>,
    expenses: HashMap<Uuid, Expense>,
    sequences: HashMap<String, u32>,
}

impl MemoryState {
    /// Checks that every record to bill is still unbilled and belongs to the
    /// invoice's client before anything is written.
    fn check_billable(&self, invoice: &Invoice, changes: &SourceChanges) -> Result<(), StoreError> {
        for id in &changes.bill.time_entry_ids {
            let available = self.time_entries.get(id).is_some_and(|entry| {
                entry.client_id == invoice.client_id
                    && (entry.is_billable() || entry.invoice_id == Some(invoice.id))
            });
            if !available {
                return Err(StoreError::Conflict(format!(
                    "Time entry {} is not available for billing",
                    id
                )));
            }
        }
        for id in &changes.bill.expense_ids {
            let available = self.expenses.get(id).is_some_and(|expense| {
                expense.client_id == invoice.client_id
                    && (expense.is_billable() || expense.invoice_id == Some(invoice.id))
            });
            if !available {
                return Err(StoreError::Conflict(format!(
                    "Expense {} is not available for billing",
                    id
                )));
            }
        }
        Ok(())
    }

    fn apply_changes(&mut self, invoice_id: Uuid, changes: &SourceChanges) {
        for id in &changes.bill.time_entry_ids {
            if let Some(entry) = self.time_entries.get_mut(id) {
                entry.invoiced = true;
                entry.invoice_id = Some(invoice_id);
            }
        }
        for id in &changes.bill.expense_ids {
            if let Some(expense) = self.expenses.get_mut(id) {
                expense.invoiced = true;
                expense.invoice_id = Some(invoice_id);
                expense.status = ExpenseStatus::Billed;
            }
        }
        for id in &changes.release.time_entry_ids {
            if let Some(entry) = self
                .time_entries
                .get_mut(id)
                .filter(|e| e.invoice_id == Some(invoice_id))
            {
                entry.invoiced = false;
                entry.invoice_id = None;
            }
        }
        for id in &changes.release.expense_ids {
            if let Some(expense) = self
                .expenses
                .get_mut(id)
                .filter(|e| e.invoice_id == Some(invoice_id))
            {
                expense.invoiced = false;
                expense.invoice_id = None;
                expense.status = changes.released_expense_status;
            }
        }
    }

    fn greatest_suffix(&self, scope: SequenceScope, prefix: &str) -> u32 {
        let greatest = match scope {
            SequenceScope::InvoiceYear => self
                .invoices
                .values()
                .filter_map(|i| parse_suffix(&i.invoice_number, prefix))
                .max(),
            SequenceScope::CaseMonth => self
                .cases
                .values()
                .filter_map(|c| parse_suffix(&c.case_number, prefix))
                .max(),
        };
        greatest.unwrap_or(0)
    }
}

/// In-process [`BillingStore`] backed by hash maps.
///
/// Every write happens under a single lock, which gives the same
/// all-or-nothing behavior as a database transaction. Used as the fake in
/// tests and for local runs without Postgres.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }

    pub async fn insert_client(&self, client: Client) {
        self.state.write().await.clients.insert(client.id, client);
    }

    pub async fn insert_case(&self, case: Case) {
        self.state.write().await.cases.insert(case.id, case);
    }

    pub async fn insert_time_entry(&self, entry: TimeEntry) {
        self.state.write().await.time_entries.insert(entry.id, entry);
    }

    pub async fn insert_expense(&self, expense: Expense) {
        self.state.write().await.expenses.insert(expense.id, expense);
    }

    pub async fn time_entry(&self, id: Uuid) -> Option<TimeEntry> {
        self.state.read().await.time_entries.get(&id).cloned()
    }

    pub async fn expense(&self, id: Uuid) -> Option<Expense> {
        self.state.read().await.expenses.get(&id).cloned()
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.ensure_available()
    }

    async fn next_sequence_value(
        &self,
        scope: SequenceScope,
        prefix: &str,
    ) -> Result<u32, StoreError> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        let current = match state.sequences.get(prefix) {
            Some(value) => *value,
            None => state.greatest_suffix(scope, prefix),
        };
        let next = current + 1;
        state.sequences.insert(prefix.to_string(), next);
        Ok(next)
    }

    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, StoreError> {
        self.ensure_available()?;
        Ok(self.state.read().await.clients.get(&id).cloned())
    }

    async fn get_case(&self, id: Uuid) -> Result<Option<Case>, StoreError> {
        self.ensure_available()?;
        Ok(self.state.read().await.cases.get(&id).cloned())
    }

    async fn get_time_entry(&self, id: Uuid) -> Result<Option<TimeEntry>, StoreError> {
        self.ensure_available()?;
        Ok(self.time_entry(id).await)
    }

    async fn get_expense(&self, id: Uuid) -> Result<Option<Expense>, StoreError> {
        self.ensure_available()?;
        Ok(self.expense(id).await)
    }

    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, StoreError> {
        self.ensure_available()?;
        Ok(self.state.read().await.invoices.get(&id).cloned())
    }

    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, StoreError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|invoice| filter.matches(invoice))
            .cloned()
            .collect();
        invoices.sort_by(|a, b| {
            b.issue_date
                .cmp(&a.issue_date)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(invoices)
    }

    async fn insert_invoice(
        &self,
        invoice: &Invoice,
        changes: &SourceChanges,
    ) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        if state
            .invoices
            .values()
            .any(|existing| existing.invoice_number == invoice.invoice_number)
        {
            return Err(StoreError::Conflict(format!(
                "Invoice number {} already exists",
                invoice.invoice_number
            )));
        }
        state.check_billable(invoice, changes)?;
        state.apply_changes(invoice.id, changes);
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn save_invoice(
        &self,
        invoice: &mut Invoice,
        changes: &SourceChanges,
    ) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        match state.invoices.get(&invoice.id) {
            None => {
                return Err(StoreError::Conflict(format!(
                    "Invoice {} does not exist",
                    invoice.id
                )))
            }
            Some(stored) if stored.version != invoice.version => {
                return Err(StoreError::StaleInvoice(invoice.id));
            }
            Some(_) => {}
        }
        state.check_billable(invoice, changes)?;
        state.apply_changes(invoice.id, changes);
        invoice.version += 1;
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn find_billable_time_entries(
        &self,
        query: &BillableQuery,
    ) -> Result<Vec<TimeEntry>, StoreError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let mut entries: Vec<TimeEntry> = state
            .time_entries
            .values()
            .filter(|entry| query.matches_time_entry(entry))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn find_billable_expenses(
        &self,
        query: &BillableQuery,
    ) -> Result<Vec<Expense>, StoreError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let mut expenses: Vec<Expense> = state
            .expenses
            .values()
            .filter(|expense| query.matches_expense(expense))
            .cloned()
            .collect();
        expenses.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        Ok(expenses)
    }

    async fn summarize_by_status(
        &self,
        range: &ReportRange,
    ) -> Result<Vec<StatusSummary>, StoreError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let mut groups: HashMap<InvoiceStatus, StatusSummary> = HashMap::new();
        for invoice in state
            .invoices
            .values()
            .filter(|i| !i.is_deleted && range.contains(i.issue_date))
        {
            let group = groups.entry(invoice.status).or_insert_with(|| StatusSummary {
                status: invoice.status,
                count: 0,
                total: Decimal::ZERO,
                amount_paid: Decimal::ZERO,
                balance: Decimal::ZERO,
            });
            group.count += 1;
            group.total += invoice.total;
            group.amount_paid += invoice.amount_paid;
            group.balance += invoice.balance;
        }
        let mut summaries: Vec<StatusSummary> = groups.into_values().collect();
        summaries.sort_by_key(|s| s.status.as_str());
        Ok(summaries)
    }

    async fn monthly_totals(
        &self,
        range: &ReportRange,
    ) -> Result<Vec<MonthlyBreakdown>, StoreError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let live = || {
            state
                .invoices
                .values()
                .filter(|i| !i.is_deleted && i.status != InvoiceStatus::Cancelled)
        };
        let invoiced = live()
            .filter(|i| range.contains(i.issue_date))
            .map(|i| MonthAmount::for_date(i.issue_date, i.total))
            .collect();
        let paid = live()
            .flat_map(|i| i.payments.iter())
            .filter(|p| range.contains(p.date))
            .map(|p| MonthAmount::for_date(p.date, p.amount))
            .collect();
        Ok(MonthlyBreakdown::merge(invoiced, paid))
    }

    async fn time_totals(
        &self,
        range: &ReportRange,
        user_id: Option<Uuid>,
    ) -> Result<TimeTotals, StoreError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let mut totals = TimeTotals::default();
        for entry in state.time_entries.values().filter(|e| {
            !e.is_deleted && range.contains(e.date) && user_id.map_or(true, |id| e.user_id == id)
        }) {
            totals.total_minutes += i64::from(entry.duration);
            if entry.billable {
                totals.billable_minutes += i64::from(entry.duration);
                totals.billable_amount += entry.billable_amount;
            }
        }
        Ok(totals)
    }
}
