//! Persistence seam for the billing engine.
//!
//! Services depend on [`BillingStore`] only, so the Postgres store and the
//! in-memory store are interchangeable.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::billing::sequence::SequenceScope;
use crate::models::{
    Case, Client, Expense, ExpenseStatus, Invoice, InvoiceFilter, MonthlyBreakdown, ReportRange,
    SourceLinks, StatusSummary, TimeEntry, TimeTotals,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A conditional write found the data in an unexpected state.
    #[error("{0}")]
    Conflict(String),

    /// The invoice changed between load and save.
    #[error("Invoice {0} was modified by another request")]
    StaleInvoice(Uuid),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            StoreError::Serialization(_) => false,
            StoreError::Conflict(_) | StoreError::StaleInvoice(_) | StoreError::Unavailable(_) => {
                true
            }
        }
    }
}

/// Selection of unbilled records for a client.
#[derive(Debug, Clone, Default)]
pub struct BillableQuery {
    pub client_id: Uuid,
    pub case_id: Option<Uuid>,

    /// When set, only these time entries are considered
    pub time_entry_ids: Option<Vec<Uuid>>,

    /// When set, only these expenses are considered
    pub expense_ids: Option<Vec<Uuid>>,
}

impl BillableQuery {
    pub fn matches_time_entry(&self, entry: &TimeEntry) -> bool {
        entry.is_billable()
            && entry.client_id == self.client_id
            && self.case_id.map_or(true, |id| entry.case_id == Some(id))
            && self
                .time_entry_ids
                .as_ref()
                .map_or(true, |ids| ids.contains(&entry.id))
    }

    pub fn matches_expense(&self, expense: &Expense) -> bool {
        expense.is_billable()
            && expense.client_id == self.client_id
            && self.case_id.map_or(true, |id| expense.case_id == Some(id))
            && self
                .expense_ids
                .as_ref()
                .map_or(true, |ids| ids.contains(&expense.id))
    }
}

/// Billed-state changes to apply to source records together with an invoice write.
#[derive(Debug, Clone)]
pub struct SourceChanges {
    /// Records to mark as invoiced by this invoice
    pub bill: SourceLinks,

    /// Records to return to the unbilled pool
    pub release: SourceLinks,

    /// Status given to released expenses
    pub released_expense_status: ExpenseStatus,
}

impl SourceChanges {
    pub fn none() -> Self {
        SourceChanges {
            bill: SourceLinks::default(),
            release: SourceLinks::default(),
            released_expense_status: ExpenseStatus::Approved,
        }
    }

    pub fn bill(links: SourceLinks) -> Self {
        SourceChanges {
            bill: links,
            ..SourceChanges::none()
        }
    }

    pub fn release(links: SourceLinks, expense_status: ExpenseStatus) -> Self {
        SourceChanges {
            release: links,
            released_expense_status: expense_status,
            ..SourceChanges::none()
        }
    }

    /// Changes needed to move from one set of referenced records to another.
    pub fn between(before: &SourceLinks, after: &SourceLinks) -> Self {
        SourceChanges {
            bill: after.difference(before),
            release: before.difference(after),
            released_expense_status: ExpenseStatus::Approved,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bill.is_empty() && self.release.is_empty()
    }
}

/// Document-oriented store used by every billing component.
///
/// Writes that carry [`SourceChanges`] are atomic: the invoice document and
/// the billed-state of its time entries and expenses commit together or not
/// at all. Records are only billed to an invoice of the same client.
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Atomically allocates the next sequence value for a number prefix.
    ///
    /// The first allocation for a prefix continues from the greatest number
    /// already stored under it.
    async fn next_sequence_value(
        &self,
        scope: SequenceScope,
        prefix: &str,
    ) -> Result<u32, StoreError>;

    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, StoreError>;

    async fn get_case(&self, id: Uuid) -> Result<Option<Case>, StoreError>;

    async fn get_time_entry(&self, id: Uuid) -> Result<Option<TimeEntry>, StoreError>;

    async fn get_expense(&self, id: Uuid) -> Result<Option<Expense>, StoreError>;

    /// Fetches an invoice by id, including soft-deleted ones.
    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, StoreError>;

    /// Non-deleted invoices matching the filter, newest issue date first.
    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, StoreError>;

    async fn insert_invoice(
        &self,
        invoice: &Invoice,
        changes: &SourceChanges,
    ) -> Result<(), StoreError>;

    /// Overwrites an existing invoice if it is still at `invoice.version`.
    ///
    /// On success the stored and the passed version are both bumped. A
    /// concurrent write in between fails with [`StoreError::StaleInvoice`].
    async fn save_invoice(
        &self,
        invoice: &mut Invoice,
        changes: &SourceChanges,
    ) -> Result<(), StoreError>;

    async fn find_billable_time_entries(
        &self,
        query: &BillableQuery,
    ) -> Result<Vec<TimeEntry>, StoreError>;

    async fn find_billable_expenses(
        &self,
        query: &BillableQuery,
    ) -> Result<Vec<Expense>, StoreError>;

    async fn summarize_by_status(
        &self,
        range: &ReportRange,
    ) -> Result<Vec<StatusSummary>, StoreError>;

    async fn monthly_totals(&self, range: &ReportRange)
        -> Result<Vec<MonthlyBreakdown>, StoreError>;

    async fn time_totals(
        &self,
        range: &ReportRange,
        user_id: Option<Uuid>,
    ) -> Result<TimeTotals, StoreError>;
}
