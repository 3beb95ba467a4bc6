use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::billing::calculator::{balance, round_money, InvoiceTotals};
use crate::models::client::{Case, Client};
use crate::models::payment::Payment;

/// Invoice status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar")]
pub enum InvoiceStatus {
    #[sqlx(rename = "draft")]
    Draft,
    #[sqlx(rename = "sent")]
    Sent,
    #[sqlx(rename = "paid")]
    Paid,
    #[sqlx(rename = "overdue")]
    Overdue,
    #[sqlx(rename = "cancelled")]
    Cancelled,
    #[sqlx(rename = "partially_paid")]
    PartiallyPaid,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 6] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Sent,
        InvoiceStatus::Paid,
        InvoiceStatus::Overdue,
        InvoiceStatus::Cancelled,
        InvoiceStatus::PartiallyPaid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::PartiallyPaid => "partially_paid",
        }
    }

    /// Only drafts can be sent to the client.
    pub fn can_send(&self) -> bool {
        matches!(self, InvoiceStatus::Draft)
    }

    /// Line items, tax rate and discount are frozen once the invoice leaves draft.
    pub fn can_edit_items(&self) -> bool {
        matches!(self, InvoiceStatus::Draft)
    }

    pub fn can_update(&self) -> bool {
        !matches!(self, InvoiceStatus::Paid)
    }

    /// Invoices that have received money stay on the books.
    pub fn can_delete(&self) -> bool {
        !matches!(self, InvoiceStatus::Paid | InvoiceStatus::PartiallyPaid)
    }

    /// Whether the invoice is issued and still waiting on money.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Sent | InvoiceStatus::PartiallyPaid | InvoiceStatus::Overdue
        )
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InvoiceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown invoice status '{}'", s))
    }
}

/// A billable line on an invoice.
///
/// `time_entry_id` and `expense_id` are weak back-references to the record
/// the line was generated from; the invoice does not own those records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceItem {
    pub description: String,
    pub quantity: Decimal,
    pub rate: Decimal,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_entry_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expense_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<Uuid>,
    #[serde(default = "default_taxable")]
    pub taxable: bool,
}

fn default_taxable() -> bool {
    true
}

/// Line item as submitted by a caller, before normalization.
///
/// Any of quantity, rate and amount may be omitted; the calculator fills
/// in the missing values and rejects inconsistent combinations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvoiceItem {
    #[serde(default)]
    pub description: String,
    pub quantity: Option<Decimal>,
    pub rate: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub time_entry_id: Option<Uuid>,
    pub expense_id: Option<Uuid>,
    pub case_id: Option<Uuid>,
    pub taxable: Option<bool>,
}

impl NewInvoiceItem {
    /// Items entered by hand carry no back-reference to a time entry or expense.
    pub fn is_manual(&self) -> bool {
        self.time_entry_id.is_none() && self.expense_id.is_none()
    }
}

impl From<InvoiceItem> for NewInvoiceItem {
    fn from(item: InvoiceItem) -> Self {
        NewInvoiceItem {
            description: item.description,
            quantity: Some(item.quantity),
            rate: Some(item.rate),
            amount: Some(item.amount),
            time_entry_id: item.time_entry_id,
            expense_id: item.expense_id,
            case_id: item.case_id,
            taxable: Some(item.taxable),
        }
    }
}

/// Invoice aggregate.
///
/// Owns its line items and its payment ledger. Monetary fields are kept
/// cent-precise and satisfy `total == subtotal + tax_amount - discount` and
/// `balance == total - amount_paid` after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    /// Unique identifier for the invoice
    pub id: Uuid,

    /// Human-readable number, `INV-YYYY-NNNNN`; never changes
    pub invoice_number: String,

    pub client_id: Uuid,
    pub case_id: Option<Uuid>,

    /// Date the invoice was issued
    pub issue_date: NaiveDate,

    /// Date payment is due
    pub due_date: NaiveDate,

    pub items: Vec<InvoiceItem>,

    pub subtotal: Decimal,

    /// Tax rate as a percentage (0-100)
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub balance: Decimal,

    pub status: InvoiceStatus,

    /// Append-only payment ledger
    pub payments: Vec<Payment>,

    pub notes: Option<String>,

    /// Soft delete flag
    pub is_deleted: bool,

    /// User who created the invoice
    pub created_by: Uuid,

    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Write counter; a save only lands on the version it was loaded at
    #[serde(skip)]
    pub version: i32,
}

impl Invoice {
    /// Builds a fresh draft with no payments; balance starts at the total.
    #[allow(clippy::too_many_arguments)]
    pub fn draft(
        invoice_number: String,
        client_id: Uuid,
        case_id: Option<Uuid>,
        issue_date: NaiveDate,
        due_date: NaiveDate,
        items: Vec<InvoiceItem>,
        tax_rate: Decimal,
        discount: Decimal,
        totals: InvoiceTotals,
        notes: Option<String>,
        created_by: Uuid,
    ) -> Self {
        let now = Utc::now();
        Invoice {
            id: Uuid::new_v4(),
            invoice_number,
            client_id,
            case_id,
            issue_date,
            due_date,
            items,
            subtotal: totals.subtotal,
            tax_rate,
            tax_amount: totals.tax_amount,
            discount,
            total: totals.total,
            amount_paid: Decimal::ZERO,
            balance: totals.total,
            status: InvoiceStatus::Draft,
            payments: Vec::new(),
            notes,
            is_deleted: false,
            created_by,
            sent_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Replaces the line items and amounts, keeping whatever has been paid.
    pub fn apply_amounts(
        &mut self,
        items: Vec<InvoiceItem>,
        tax_rate: Decimal,
        discount: Decimal,
        totals: InvoiceTotals,
    ) {
        self.items = items;
        self.tax_rate = tax_rate;
        self.discount = discount;
        self.subtotal = totals.subtotal;
        self.tax_amount = totals.tax_amount;
        self.total = totals.total;
        self.refresh_balance();
    }

    /// Recomputes `amount_paid` from the ledger and `balance` from the total.
    pub fn refresh_balance(&mut self) {
        self.amount_paid = round_money(self.payments.iter().map(|p| p.amount).sum());
        self.balance = balance(self.total, self.amount_paid);
    }

    /// Time entries and expenses referenced by the line items.
    pub fn source_links(&self) -> SourceLinks {
        SourceLinks::from_items(&self.items)
    }
}

/// Ids of time entries and expenses referenced by a set of line items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLinks {
    pub time_entry_ids: BTreeSet<Uuid>,
    pub expense_ids: BTreeSet<Uuid>,
}

impl SourceLinks {
    pub fn from_items(items: &[InvoiceItem]) -> Self {
        SourceLinks {
            time_entry_ids: items.iter().filter_map(|i| i.time_entry_id).collect(),
            expense_ids: items.iter().filter_map(|i| i.expense_id).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.time_entry_ids.is_empty() && self.expense_ids.is_empty()
    }

    /// Links present in `self` but not in `other`.
    pub fn difference(&self, other: &SourceLinks) -> SourceLinks {
        SourceLinks {
            time_entry_ids: self
                .time_entry_ids
                .difference(&other.time_entry_ids)
                .copied()
                .collect(),
            expense_ids: self
                .expense_ids
                .difference(&other.expense_ids)
                .copied()
                .collect(),
        }
    }
}

/// Invoice creation request with explicit line items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoice {
    pub client: Option<Uuid>,
    pub case: Option<Uuid>,
    #[serde(default)]
    pub items: Vec<NewInvoiceItem>,
    pub tax_rate: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Request to build an invoice out of a client's unbilled time and expenses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateInvoice {
    pub client_id: Uuid,
    pub case_id: Option<Uuid>,
    pub time_entry_ids: Option<Vec<Uuid>>,
    pub expense_ids: Option<Vec<Uuid>>,
    pub tax_rate: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Invoice update request.
///
/// There is deliberately no `invoice_number` field: numbers are immutable
/// and unknown fields in a request body are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInvoice {
    pub case: Option<Uuid>,
    pub items: Option<Vec<NewInvoiceItem>>,
    pub tax_rate: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl UpdateInvoice {
    /// Whether the patch changes anything that feeds the totals.
    pub fn touches_amounts(&self) -> bool {
        self.items.is_some() || self.tax_rate.is_some() || self.discount.is_some()
    }
}

/// Filters accepted by the invoice listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceFilter {
    pub client: Option<Uuid>,
    pub case: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub issued_after: Option<NaiveDate>,
    pub issued_before: Option<NaiveDate>,
    pub due_after: Option<NaiveDate>,
    pub due_before: Option<NaiveDate>,

    /// Restrict to open invoices with an outstanding balance due before this date
    #[serde(skip)]
    pub overdue_as_of: Option<NaiveDate>,
}

impl InvoiceFilter {
    pub fn overdue(as_of: NaiveDate) -> Self {
        InvoiceFilter {
            overdue_as_of: Some(as_of),
            ..Default::default()
        }
    }

    /// In-process evaluation of the filter, mirroring the SQL in the Postgres store.
    pub fn matches(&self, invoice: &Invoice) -> bool {
        if invoice.is_deleted {
            return false;
        }
        if self.client.is_some_and(|id| invoice.client_id != id) {
            return false;
        }
        if self.case.is_some_and(|id| invoice.case_id != Some(id)) {
            return false;
        }
        if self.status.is_some_and(|s| invoice.status != s) {
            return false;
        }
        if self.issued_after.is_some_and(|d| invoice.issue_date < d)
            || self.issued_before.is_some_and(|d| invoice.issue_date > d)
            || self.due_after.is_some_and(|d| invoice.due_date < d)
            || self.due_before.is_some_and(|d| invoice.due_date > d)
        {
            return false;
        }
        if let Some(as_of) = self.overdue_as_of {
            return invoice.status.is_open()
                && invoice.due_date < as_of
                && invoice.balance > Decimal::ZERO;
        }
        true
    }
}

/// Invoice with its client and case expanded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub client: Option<Client>,
    pub case: Option<Case>,
}
