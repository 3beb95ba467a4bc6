use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::billing::aggregator::{self, BillableItemAggregator};
use crate::billing::calculator::{self, InvoiceTotals};
use crate::billing::ledger::PaymentLedger;
use crate::billing::sequence::SequenceGenerator;
use crate::billing::status::derive_status;
use crate::error::{BillingError, BillingResult};
use crate::models::{
    Client, CreateInvoice, ExpenseStatus, GenerateInvoice, Invoice, InvoiceDetail, InvoiceFilter,
    InvoiceItem, InvoiceStatus, NewPayment, UpdateInvoice,
};
use crate::notifier::{EmailNotifier, INVOICE_NOTIFICATION};
use crate::store::{BillableQuery, BillingStore, SourceChanges};

/// Settings the lifecycle manager needs from configuration.
#[derive(Debug, Clone)]
pub struct BillingSettings {
    /// Name shown on outgoing invoice emails
    pub company_name: String,

    /// Days between issue date and default due date
    pub payment_terms_days: i64,
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            company_name: "LexLedger".to_string(),
            payment_terms_days: 30,
        }
    }
}

/// Source of "today" for due-date and status decisions.
pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Variables of the `invoiceNotification` template.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvoiceNotification {
    client_name: String,
    invoice_number: String,
    amount: String,
    due_date: String,
    subtotal: String,
    tax_amount: String,
    tax_rate: String,
    total: String,
    company_name: String,
}

/// Fields shared by explicit creation and generation from unbilled work.
struct DraftRequest {
    client_id: Uuid,
    case_id: Option<Uuid>,
    items: Vec<InvoiceItem>,
    tax_rate: Option<Decimal>,
    discount: Option<Decimal>,
    issue_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    notes: Option<String>,

    /// Items came straight from their source records and need no repricing
    priced: bool,
}

/// Owns invoice creation, updates, sending, payment and deletion.
///
/// All invoice state changes go through here so the status machine and the
/// billed-state of time entries and expenses never drift apart.
pub struct InvoiceService {
    store: Arc<dyn BillingStore>,
    notifier: Arc<dyn EmailNotifier>,
    sequence: SequenceGenerator,
    aggregator: BillableItemAggregator,
    ledger: PaymentLedger,
    settings: BillingSettings,
    clock: Clock,
}

impl InvoiceService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        notifier: Arc<dyn EmailNotifier>,
        settings: BillingSettings,
    ) -> Self {
        Self {
            sequence: SequenceGenerator::new(store.clone()),
            aggregator: BillableItemAggregator::new(store.clone()),
            ledger: PaymentLedger::new(store.clone()),
            store,
            notifier,
            settings,
            clock: Arc::new(|| Utc::now().date_naive()),
        }
    }

    /// Replaces the clock, e.g. to pin "today" in tests.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    /// Loads a non-deleted invoice.
    async fn load(&self, id: Uuid) -> BillingResult<Invoice> {
        self.store
            .get_invoice(id)
            .await?
            .filter(|invoice| !invoice.is_deleted)
            .ok_or_else(|| BillingError::not_found("Invoice"))
    }

    async fn require_client(&self, id: Uuid) -> BillingResult<Client> {
        self.store
            .get_client(id)
            .await?
            .filter(|client| !client.is_deleted)
            .ok_or_else(|| BillingError::not_found("Client"))
    }

    async fn require_case(&self, id: Uuid, client_id: Uuid) -> BillingResult<()> {
        let case = self
            .store
            .get_case(id)
            .await?
            .filter(|case| !case.is_deleted)
            .ok_or_else(|| BillingError::not_found("Case"))?;
        if case.client_id != client_id {
            return Err(BillingError::validation("Case does not belong to this client"));
        }
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> BillingResult<Invoice> {
        self.load(id).await
    }

    /// Invoice with its client and case expanded.
    pub async fn get_detail(&self, id: Uuid) -> BillingResult<InvoiceDetail> {
        let invoice = self.load(id).await?;
        let client = self.store.get_client(invoice.client_id).await?;
        let case = match invoice.case_id {
            Some(case_id) => self.store.get_case(case_id).await?,
            None => None,
        };
        Ok(InvoiceDetail {
            invoice,
            client,
            case,
        })
    }

    pub async fn list(&self, filter: &InvoiceFilter) -> BillingResult<Vec<Invoice>> {
        Ok(self.store.list_invoices(filter).await?)
    }

    /// Open invoices with money owed past their due date as of `today`.
    pub async fn overdue(&self, today: NaiveDate) -> BillingResult<Vec<Invoice>> {
        self.list(&InvoiceFilter::overdue(today)).await
    }

    /// Creates a draft invoice from explicit line items.
    #[instrument(skip(self, input))]
    pub async fn create(&self, input: CreateInvoice, created_by: Uuid) -> BillingResult<Invoice> {
        let client_id = input
            .client
            .ok_or_else(|| BillingError::validation("Client is required"))?;
        let items = calculator::normalize_items(input.items)?;

        self.create_draft(
            DraftRequest {
                client_id,
                case_id: input.case,
                items,
                tax_rate: input.tax_rate,
                discount: input.discount,
                issue_date: input.issue_date,
                due_date: input.due_date,
                notes: input.notes,
                priced: false,
            },
            created_by,
        )
        .await
    }

    /// Creates a draft invoice from a client's unbilled time entries and expenses.
    #[instrument(skip(self, input), fields(client_id = %input.client_id))]
    pub async fn generate_from_unbilled(
        &self,
        input: GenerateInvoice,
        created_by: Uuid,
    ) -> BillingResult<Invoice> {
        let query = BillableQuery {
            client_id: input.client_id,
            case_id: input.case_id,
            time_entry_ids: input.time_entry_ids,
            expense_ids: input.expense_ids,
        };
        let billable = self.aggregator.collect(&query).await?;
        if billable.is_empty() {
            return Err(BillingError::validation(
                "No unbilled items found for this client",
            ));
        }

        self.create_draft(
            DraftRequest {
                client_id: input.client_id,
                case_id: input.case_id,
                items: billable.items,
                tax_rate: input.tax_rate,
                discount: input.discount,
                issue_date: input.issue_date,
                due_date: input.due_date,
                notes: input.notes,
                priced: true,
            },
            created_by,
        )
        .await
    }

    /// Prices items linked to a time entry or expense from the linked record.
    ///
    /// The record must belong to `client_id`. The caller's description and
    /// taxable flag are kept; quantity, rate and amount come from the record.
    async fn price_linked_items(
        &self,
        items: Vec<InvoiceItem>,
        client_id: Uuid,
    ) -> BillingResult<Vec<InvoiceItem>> {
        let mut priced = Vec::with_capacity(items.len());
        for item in items {
            let source = match (item.time_entry_id, item.expense_id) {
                (None, None) => {
                    priced.push(item);
                    continue;
                }
                (Some(_), Some(_)) => {
                    return Err(BillingError::validation(
                        "Item cannot reference both a time entry and an expense",
                    ))
                }
                (Some(id), None) => {
                    let entry = self
                        .store
                        .get_time_entry(id)
                        .await?
                        .filter(|entry| !entry.is_deleted)
                        .ok_or_else(|| BillingError::not_found("Time entry"))?;
                    if entry.client_id != client_id {
                        return Err(BillingError::validation(
                            "Time entry does not belong to this client",
                        ));
                    }
                    aggregator::time_entry_item(&entry)
                }
                (None, Some(id)) => {
                    let expense = self
                        .store
                        .get_expense(id)
                        .await?
                        .filter(|expense| !expense.is_deleted)
                        .ok_or_else(|| BillingError::not_found("Expense"))?;
                    if expense.client_id != client_id {
                        return Err(BillingError::validation(
                            "Expense does not belong to this client",
                        ));
                    }
                    aggregator::expense_item(&expense)
                }
            };
            priced.push(InvoiceItem {
                description: item.description,
                taxable: item.taxable,
                ..source
            });
        }
        Ok(priced)
    }

    async fn create_draft(&self, request: DraftRequest, created_by: Uuid) -> BillingResult<Invoice> {
        self.require_client(request.client_id).await?;
        if let Some(case_id) = request.case_id {
            self.require_case(case_id, request.client_id).await?;
        }
        let items = if request.priced {
            request.items
        } else {
            self.price_linked_items(request.items, request.client_id).await?
        };

        let tax_rate = request.tax_rate.unwrap_or(Decimal::ZERO);
        let discount = request.discount.unwrap_or(Decimal::ZERO);
        calculator::validate_rates(tax_rate, discount)?;
        let totals = calculator::calculate(&items, tax_rate, discount);
        calculator::validate_totals(&totals)?;

        let issue_date = request.issue_date.unwrap_or_else(|| self.today());
        let due_date = request
            .due_date
            .unwrap_or(issue_date + Duration::days(self.settings.payment_terms_days));
        if due_date < issue_date {
            return Err(BillingError::validation("Due date cannot be before issue date"));
        }

        let invoice_number = self.sequence.next_invoice_number(issue_date).await?;
        let invoice = Invoice::draft(
            invoice_number,
            request.client_id,
            request.case_id,
            issue_date,
            due_date,
            items,
            tax_rate,
            discount,
            totals,
            request.notes,
            created_by,
        );

        let links = invoice.source_links();
        self.store
            .insert_invoice(&invoice, &SourceChanges::bill(links.clone()))
            .await?;

        info!(
            invoice_number = %invoice.invoice_number,
            total = %invoice.total,
            time_entries = links.time_entry_ids.len(),
            expenses = links.expense_ids.len(),
            "Invoice created"
        );

        Ok(invoice)
    }

    /// Applies a patch to an invoice.
    ///
    /// Paid invoices are frozen. Items and amounts may only change while the
    /// invoice is a draft; totals are then recomputed against what has
    /// already been paid.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: Uuid, patch: UpdateInvoice) -> BillingResult<Invoice> {
        let mut invoice = self.load(id).await?;
        let touches_amounts = patch.touches_amounts();

        if !invoice.status.can_update() {
            return Err(BillingError::invalid_state("Cannot update a paid invoice"));
        }
        if touches_amounts && !invoice.status.can_edit_items() {
            return Err(BillingError::invalid_state(
                "Only draft invoices can have items or amounts changed",
            ));
        }

        let previous_links = invoice.source_links();

        if let Some(case_id) = patch.case {
            self.require_case(case_id, invoice.client_id).await?;
            invoice.case_id = Some(case_id);
        }
        if let Some(issue_date) = patch.issue_date {
            invoice.issue_date = issue_date;
        }
        if let Some(due_date) = patch.due_date {
            invoice.due_date = due_date;
        }
        if invoice.due_date < invoice.issue_date {
            return Err(BillingError::validation("Due date cannot be before issue date"));
        }
        if let Some(notes) = patch.notes {
            invoice.notes = Some(notes);
        }

        if touches_amounts {
            let items = match patch.items {
                Some(items) => {
                    let items = calculator::normalize_items(items)?;
                    self.price_linked_items(items, invoice.client_id).await?
                }
                None => invoice.items.clone(),
            };
            let tax_rate = patch.tax_rate.unwrap_or(invoice.tax_rate);
            let discount = patch.discount.unwrap_or(invoice.discount);
            calculator::validate_rates(tax_rate, discount)?;
            let totals: InvoiceTotals = calculator::calculate(&items, tax_rate, discount);
            calculator::validate_totals(&totals)?;
            if totals.total < invoice.amount_paid {
                return Err(BillingError::validation(
                    "Invoice total cannot be less than the amount already paid",
                ));
            }
            invoice.apply_amounts(items, tax_rate, discount, totals);
        }

        invoice.status = derive_status(&invoice, self.today());
        invoice.updated_at = Utc::now();

        let changes = SourceChanges::between(&previous_links, &invoice.source_links());
        self.store.save_invoice(&mut invoice, &changes).await?;

        info!(
            invoice_number = %invoice.invoice_number,
            status = %invoice.status,
            total = %invoice.total,
            "Invoice updated"
        );

        Ok(invoice)
    }

    /// Issues a draft invoice and notifies the client.
    ///
    /// A failed notification is logged; the invoice stays sent.
    #[instrument(skip(self))]
    pub async fn send(&self, id: Uuid) -> BillingResult<Invoice> {
        let mut invoice = self.load(id).await?;
        if !invoice.status.can_send() {
            return Err(BillingError::invalid_state("Only draft invoices can be sent"));
        }
        let client = self.require_client(invoice.client_id).await?;

        invoice.status = InvoiceStatus::Sent;
        let now = Utc::now();
        invoice.sent_at = Some(now);
        invoice.updated_at = now;
        self.store.save_invoice(&mut invoice, &SourceChanges::none()).await?;

        info!(invoice_number = %invoice.invoice_number, "Invoice sent");
        self.notify_client(&invoice, &client).await;

        Ok(invoice)
    }

    async fn notify_client(&self, invoice: &Invoice, client: &Client) {
        let Some(recipient) = client.email.as_deref() else {
            warn!(
                "No email for client {}, skipping notification for {}",
                client.id, invoice.invoice_number
            );
            return;
        };

        let notification = InvoiceNotification {
            client_name: client.name.clone(),
            invoice_number: invoice.invoice_number.clone(),
            amount: format!("{:.2}", invoice.balance),
            due_date: invoice.due_date.format("%Y-%m-%d").to_string(),
            subtotal: format!("{:.2}", invoice.subtotal),
            tax_amount: format!("{:.2}", invoice.tax_amount),
            tax_rate: invoice.tax_rate.normalize().to_string(),
            total: format!("{:.2}", invoice.total),
            company_name: self.settings.company_name.clone(),
        };
        let variables = match serde_json::to_value(&notification) {
            Ok(variables) => variables,
            Err(e) => {
                warn!("Failed to build notification for {}: {}", invoice.invoice_number, e);
                return;
            }
        };

        if !self
            .notifier
            .send_template_email(INVOICE_NOTIFICATION, recipient, &variables)
            .await
        {
            warn!(
                "Failed to send invoice email for {} to {}",
                invoice.invoice_number, recipient
            );
        }
    }

    /// Appends a payment to the invoice ledger.
    pub async fn record_payment(
        &self,
        id: Uuid,
        payment: NewPayment,
        recorded_by: Uuid,
    ) -> BillingResult<Invoice> {
        self.ledger.append(id, payment, recorded_by, self.today()).await
    }

    /// Soft-deletes an invoice and returns its time entries and expenses to the unbilled pool.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> BillingResult<Invoice> {
        let mut invoice = self.load(id).await?;
        if !invoice.status.can_delete() {
            return Err(BillingError::invalid_state("Cannot delete a paid invoice"));
        }

        let released_status = if invoice.amount_paid > Decimal::ZERO {
            ExpenseStatus::Reimbursed
        } else {
            ExpenseStatus::Approved
        };
        let links = invoice.source_links();

        invoice.is_deleted = true;
        invoice.status = derive_status(&invoice, self.today());
        invoice.updated_at = Utc::now();
        self.store
            .save_invoice(&mut invoice, &SourceChanges::release(links, released_status))
            .await?;

        info!(invoice_number = %invoice.invoice_number, "Invoice deleted");
        Ok(invoice)
    }

    /// Re-applies status derivation and persists when it changed.
    ///
    /// Returns whether the status moved.
    pub async fn refresh_status(&self, id: Uuid, today: NaiveDate) -> BillingResult<bool> {
        let mut invoice = self.load(id).await?;
        let status = derive_status(&invoice, today);
        if status == invoice.status {
            return Ok(false);
        }

        info!(
            "Invoice {}: {} -> {}",
            invoice.invoice_number, invoice.status, status
        );
        invoice.status = status;
        invoice.updated_at = Utc::now();
        self.store.save_invoice(&mut invoice, &SourceChanges::none()).await?;
        Ok(true)
    }
}
