use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::billing::sequence::SequenceScope;
use crate::models::{
    Case, Client, Expense, Invoice, InvoiceFilter, InvoiceItem, InvoiceStatus, MonthAmount,
    MonthlyBreakdown, Payment, ReportRange, StatusSummary, TimeEntry, TimeTotals,
};
use crate::store::{BillableQuery, BillingStore, SourceChanges, StoreError};

const INVOICE_COLUMNS: &str = r#"
    id, invoice_number, client_id, case_id, issue_date, due_date, items,
    subtotal, tax_rate, tax_amount, discount, total, amount_paid, balance,
    status, payments, notes, is_deleted, created_by, sent_at, created_at, updated_at, version
"#;

const TIME_ENTRY_COLUMNS: &str = r#"
    t.id, t.user_id, COALESCE(u.full_name, u.email, '') AS user_name,
    t.client_id, t.case_id, t.task_id, t.description, t.date, t.duration,
    t.billable, t.billing_rate, t.billable_amount, t.invoiced, t.invoice_id,
    t.is_deleted
"#;

const EXPENSE_COLUMNS: &str = r#"
    id, client_id, case_id, description, date, amount, markup, billable,
    billable_amount, status, invoiced, invoice_id, is_deleted
"#;

/// Row shape of the `invoices` table; items and payments live in JSONB columns.
#[derive(Debug, FromRow)]
struct InvoiceRow {
    id: Uuid,
    invoice_number: String,
    client_id: Uuid,
    case_id: Option<Uuid>,
    issue_date: NaiveDate,
    due_date: NaiveDate,
    items: Json<Vec<InvoiceItem>>,
    subtotal: Decimal,
    tax_rate: Decimal,
    tax_amount: Decimal,
    discount: Decimal,
    total: Decimal,
    amount_paid: Decimal,
    balance: Decimal,
    status: InvoiceStatus,
    payments: Json<Vec<Payment>>,
    notes: Option<String>,
    is_deleted: bool,
    created_by: Uuid,
    sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i32,
}

impl From<InvoiceRow> for Invoice {
    fn from(row: InvoiceRow) -> Self {
        Invoice {
            id: row.id,
            invoice_number: row.invoice_number,
            client_id: row.client_id,
            case_id: row.case_id,
            issue_date: row.issue_date,
            due_date: row.due_date,
            items: row.items.0,
            subtotal: row.subtotal,
            tax_rate: row.tax_rate,
            tax_amount: row.tax_amount,
            discount: row.discount,
            total: row.total,
            amount_paid: row.amount_paid,
            balance: row.balance,
            status: row.status,
            payments: row.payments.0,
            notes: row.notes,
            is_deleted: row.is_deleted,
            created_by: row.created_by,
            sent_at: row.sent_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        }
    }
}

/// Postgres-backed [`BillingStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Writes the billed-state of source records inside the caller's transaction.
    ///
    /// Billing is conditional on the record belonging to the invoice's client
    /// and still being unbilled (or already billed to this invoice); a
    /// shortfall aborts the whole transaction.
    async fn apply_source_changes(
        tx: &mut Transaction<'_, Postgres>,
        invoice: &Invoice,
        changes: &SourceChanges,
    ) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        let invoice_id = invoice.id;
        if !changes.bill.time_entry_ids.is_empty() {
            let ids: Vec<Uuid> = changes.bill.time_entry_ids.iter().copied().collect();
            let result = sqlx::query(
                r#"
                UPDATE time_entries
                SET invoiced = TRUE, invoice_id = $1, updated_at = NOW()
                WHERE id = ANY($2)
                    AND client_id = $3
                    AND billable = TRUE
                    AND is_deleted = FALSE
                    AND (invoiced = FALSE OR invoice_id = $1)
                "#,
            )
            .bind(invoice_id)
            .bind(&ids)
            .bind(invoice.client_id)
            .execute(&mut **tx)
            .await?;

            if result.rows_affected() != ids.len() as u64 {
                return Err(StoreError::Conflict(
                    "Some time entries are no longer available for billing".to_string(),
                ));
            }
        }

        if !changes.bill.expense_ids.is_empty() {
            let ids: Vec<Uuid> = changes.bill.expense_ids.iter().copied().collect();
            let result = sqlx::query(
                r#"
                UPDATE expenses
                SET invoiced = TRUE, invoice_id = $1, status = 'billed', updated_at = NOW()
                WHERE id = ANY($2)
                    AND client_id = $3
                    AND billable = TRUE
                    AND is_deleted = FALSE
                    AND (invoiced = FALSE OR invoice_id = $1)
                "#,
            )
            .bind(invoice_id)
            .bind(&ids)
            .bind(invoice.client_id)
            .execute(&mut **tx)
            .await?;

            if result.rows_affected() != ids.len() as u64 {
                return Err(StoreError::Conflict(
                    "Some expenses are no longer available for billing".to_string(),
                ));
            }
        }

        if !changes.release.time_entry_ids.is_empty() {
            let ids: Vec<Uuid> = changes.release.time_entry_ids.iter().copied().collect();
            sqlx::query(
                r#"
                UPDATE time_entries
                SET invoiced = FALSE, invoice_id = NULL, updated_at = NOW()
                WHERE id = ANY($2) AND invoice_id = $1
                "#,
            )
            .bind(invoice_id)
            .bind(&ids)
            .execute(&mut **tx)
            .await?;
        }

        if !changes.release.expense_ids.is_empty() {
            let ids: Vec<Uuid> = changes.release.expense_ids.iter().copied().collect();
            sqlx::query(
                r#"
                UPDATE expenses
                SET invoiced = FALSE, invoice_id = NULL, status = $3, updated_at = NOW()
                WHERE id = ANY($2) AND invoice_id = $1
                "#,
            )
            .bind(invoice_id)
            .bind(&ids)
            .bind(changes.released_expense_status)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl BillingStore for PgStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn next_sequence_value(
        &self,
        scope: SequenceScope,
        prefix: &str,
    ) -> Result<u32, StoreError> {
        // Seed from the greatest stored number so existing data is continued, then
        // let the counter row serialize concurrent allocations.
        let sql = match scope {
            SequenceScope::InvoiceYear => {
                r#"
                INSERT INTO number_sequences (prefix, last_value)
                VALUES ($1, COALESCE((
                    SELECT MAX(CAST(SUBSTRING(invoice_number FROM $2) AS INTEGER))
                    FROM invoices
                    WHERE invoice_number LIKE $1 || '%'
                        AND SUBSTRING(invoice_number FROM $2) ~ '^[0-9]+$'
                ), 0) + 1)
                ON CONFLICT (prefix) DO UPDATE SET last_value = number_sequences.last_value + 1
                RETURNING last_value
                "#
            }
            SequenceScope::CaseMonth => {
                r#"
                INSERT INTO number_sequences (prefix, last_value)
                VALUES ($1, COALESCE((
                    SELECT MAX(CAST(SUBSTRING(case_number FROM $2) AS INTEGER))
                    FROM cases
                    WHERE case_number LIKE $1 || '%'
                        AND SUBSTRING(case_number FROM $2) ~ '^[0-9]+$'
                ), 0) + 1)
                ON CONFLICT (prefix) DO UPDATE SET last_value = number_sequences.last_value + 1
                RETURNING last_value
                "#
            }
        };

        let value: i32 = sqlx::query_scalar(sql)
            .bind(prefix)
            .bind(prefix.len() as i32 + 1)
            .fetch_one(&self.pool)
            .await?;

        u32::try_from(value)
            .map_err(|_| StoreError::Conflict(format!("Sequence for {} is corrupt", prefix)))
    }

    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, StoreError> {
        let client = sqlx::query_as::<_, Client>(
            "SELECT id, name, email, is_deleted FROM clients WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(client)
    }

    async fn get_case(&self, id: Uuid) -> Result<Option<Case>, StoreError> {
        let case = sqlx::query_as::<_, Case>(
            "SELECT id, client_id, case_number, title, is_deleted FROM cases WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(case)
    }

    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, StoreError> {
        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {} FROM invoices WHERE id = $1",
            INVOICE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Invoice::from))
    }

    #[instrument(skip(self))]
    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, StoreError> {
        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            r#"
            SELECT {}
            FROM invoices
            WHERE is_deleted = FALSE
                AND ($1::uuid IS NULL OR client_id = $1)
                AND ($2::uuid IS NULL OR case_id = $2)
                AND ($3::varchar IS NULL OR status = $3)
                AND ($4::date IS NULL OR issue_date >= $4)
                AND ($5::date IS NULL OR issue_date <= $5)
                AND ($6::date IS NULL OR due_date >= $6)
                AND ($7::date IS NULL OR due_date <= $7)
                AND ($8::date IS NULL OR (
                    due_date < $8
                    AND status IN ('sent', 'partially_paid', 'overdue')
                    AND balance > 0
                ))
            ORDER BY issue_date DESC, created_at DESC
            "#,
            INVOICE_COLUMNS
        ))
        .bind(filter.client)
        .bind(filter.case)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.issued_after)
        .bind(filter.issued_before)
        .bind(filter.due_after)
        .bind(filter.due_before)
        .bind(filter.overdue_as_of)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Invoice::from).collect())
    }

    #[instrument(skip(self, invoice, changes), fields(invoice_number = %invoice.invoice_number))]
    async fn insert_invoice(
        &self,
        invoice: &Invoice,
        changes: &SourceChanges,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, invoice_number, client_id, case_id, issue_date, due_date, items,
                subtotal, tax_rate, tax_amount, discount, total, amount_paid, balance,
                status, payments, notes, is_deleted, created_by, sent_at, created_at, updated_at,
                version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(invoice.id)
        .bind(&invoice.invoice_number)
        .bind(invoice.client_id)
        .bind(invoice.case_id)
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(Json(&invoice.items))
        .bind(invoice.subtotal)
        .bind(invoice.tax_rate)
        .bind(invoice.tax_amount)
        .bind(invoice.discount)
        .bind(invoice.total)
        .bind(invoice.amount_paid)
        .bind(invoice.balance)
        .bind(invoice.status)
        .bind(Json(&invoice.payments))
        .bind(&invoice.notes)
        .bind(invoice.is_deleted)
        .bind(invoice.created_by)
        .bind(invoice.sent_at)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .bind(invoice.version)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::Conflict(format!(
                    "Invoice number {} already exists",
                    invoice.invoice_number
                ))
            }
            other => StoreError::Database(other),
        })?;

        Self::apply_source_changes(&mut tx, invoice, changes).await?;
        tx.commit().await?;

        info!(invoice_id = %invoice.id, "Invoice inserted");
        Ok(())
    }

    #[instrument(skip(self, invoice, changes), fields(invoice_id = %invoice.id))]
    async fn save_invoice(
        &self,
        invoice: &mut Invoice,
        changes: &SourceChanges,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET case_id = $2,
                issue_date = $3,
                due_date = $4,
                items = $5,
                subtotal = $6,
                tax_rate = $7,
                tax_amount = $8,
                discount = $9,
                total = $10,
                amount_paid = $11,
                balance = $12,
                status = $13,
                payments = $14,
                notes = $15,
                is_deleted = $16,
                sent_at = $17,
                updated_at = $18,
                version = version + 1
            WHERE id = $1 AND version = $19
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.case_id)
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(Json(&invoice.items))
        .bind(invoice.subtotal)
        .bind(invoice.tax_rate)
        .bind(invoice.tax_amount)
        .bind(invoice.discount)
        .bind(invoice.total)
        .bind(invoice.amount_paid)
        .bind(invoice.balance)
        .bind(invoice.status)
        .bind(Json(&invoice.payments))
        .bind(&invoice.notes)
        .bind(invoice.is_deleted)
        .bind(invoice.sent_at)
        .bind(invoice.updated_at)
        .bind(invoice.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM invoices WHERE id = $1)")
                    .bind(invoice.id)
                    .fetch_one(&mut *tx)
                    .await?;
            if exists {
                warn!(version = invoice.version, "Invoice changed since it was loaded");
                return Err(StoreError::StaleInvoice(invoice.id));
            }
            warn!("Attempted to save an invoice that does not exist");
            return Err(StoreError::Conflict(format!(
                "Invoice {} does not exist",
                invoice.id
            )));
        }

        Self::apply_source_changes(&mut tx, invoice, changes).await?;
        tx.commit().await?;
        invoice.version += 1;
        Ok(())
    }

    async fn get_time_entry(&self, id: Uuid) -> Result<Option<TimeEntry>, StoreError> {
        let entry = sqlx::query_as::<_, TimeEntry>(&format!(
            r#"
            SELECT {}
            FROM time_entries t
            LEFT JOIN users u ON u.id = t.user_id
            WHERE t.id = $1
            "#,
            TIME_ENTRY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn get_expense(&self, id: Uuid) -> Result<Option<Expense>, StoreError> {
        let expense = sqlx::query_as::<_, Expense>(&format!(
            "SELECT {} FROM expenses WHERE id = $1",
            EXPENSE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(expense)
    }

    #[instrument(skip(self))]
    async fn find_billable_time_entries(
        &self,
        query: &BillableQuery,
    ) -> Result<Vec<TimeEntry>, StoreError> {
        let entries = sqlx::query_as::<_, TimeEntry>(&format!(
            r#"
            SELECT {}
            FROM time_entries t
            LEFT JOIN users u ON u.id = t.user_id
            WHERE t.client_id = $1
                AND ($2::uuid IS NULL OR t.case_id = $2)
                AND ($3::uuid[] IS NULL OR t.id = ANY($3))
                AND t.billable = TRUE
                AND t.invoiced = FALSE
                AND t.is_deleted = FALSE
            ORDER BY t.date ASC, t.created_at ASC
            "#,
            TIME_ENTRY_COLUMNS
        ))
        .bind(query.client_id)
        .bind(query.case_id)
        .bind(query.time_entry_ids.clone())
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn find_billable_expenses(
        &self,
        query: &BillableQuery,
    ) -> Result<Vec<Expense>, StoreError> {
        let expenses = sqlx::query_as::<_, Expense>(&format!(
            r#"
            SELECT {}
            FROM expenses
            WHERE client_id = $1
                AND ($2::uuid IS NULL OR case_id = $2)
                AND ($3::uuid[] IS NULL OR id = ANY($3))
                AND billable = TRUE
                AND invoiced = FALSE
                AND is_deleted = FALSE
            ORDER BY date ASC, created_at ASC
            "#,
            EXPENSE_COLUMNS
        ))
        .bind(query.client_id)
        .bind(query.case_id)
        .bind(query.expense_ids.clone())
        .fetch_all(&self.pool)
        .await?;

        Ok(expenses)
    }

    async fn summarize_by_status(
        &self,
        range: &ReportRange,
    ) -> Result<Vec<StatusSummary>, StoreError> {
        let summaries = sqlx::query_as::<_, StatusSummary>(
            r#"
            SELECT
                status,
                COUNT(*) AS count,
                COALESCE(SUM(total), 0) AS total,
                COALESCE(SUM(amount_paid), 0) AS amount_paid,
                COALESCE(SUM(balance), 0) AS balance
            FROM invoices
            WHERE is_deleted = FALSE
                AND ($1::date IS NULL OR issue_date >= $1)
                AND ($2::date IS NULL OR issue_date <= $2)
            GROUP BY status
            ORDER BY status
            "#,
        )
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&self.pool)
        .await?;

        Ok(summaries)
    }

    async fn monthly_totals(
        &self,
        range: &ReportRange,
    ) -> Result<Vec<MonthlyBreakdown>, StoreError> {
        let invoiced = sqlx::query_as::<_, MonthAmount>(
            r#"
            SELECT
                EXTRACT(YEAR FROM issue_date)::int AS year,
                EXTRACT(MONTH FROM issue_date)::int AS month,
                SUM(total) AS amount
            FROM invoices
            WHERE is_deleted = FALSE
                AND status <> 'cancelled'
                AND ($1::date IS NULL OR issue_date >= $1)
                AND ($2::date IS NULL OR issue_date <= $2)
            GROUP BY 1, 2
            "#,
        )
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&self.pool)
        .await?;

        let paid = sqlx::query_as::<_, MonthAmount>(
            r#"
            SELECT
                EXTRACT(YEAR FROM (p->>'date')::date)::int AS year,
                EXTRACT(MONTH FROM (p->>'date')::date)::int AS month,
                SUM((p->>'amount')::numeric) AS amount
            FROM invoices i
            CROSS JOIN LATERAL jsonb_array_elements(i.payments) AS p
            WHERE i.is_deleted = FALSE
                AND i.status <> 'cancelled'
                AND ($1::date IS NULL OR (p->>'date')::date >= $1)
                AND ($2::date IS NULL OR (p->>'date')::date <= $2)
            GROUP BY 1, 2
            "#,
        )
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&self.pool)
        .await?;

        Ok(MonthlyBreakdown::merge(invoiced, paid))
    }

    async fn time_totals(
        &self,
        range: &ReportRange,
        user_id: Option<Uuid>,
    ) -> Result<TimeTotals, StoreError> {
        let totals = sqlx::query_as::<_, TimeTotals>(
            r#"
            SELECT
                COALESCE(SUM(duration), 0)::bigint AS total_minutes,
                COALESCE(SUM(duration) FILTER (WHERE billable), 0)::bigint AS billable_minutes,
                COALESCE(SUM(billable_amount) FILTER (WHERE billable), 0) AS billable_amount
            FROM time_entries
            WHERE is_deleted = FALSE
                AND ($1::date IS NULL OR date >= $1)
                AND ($2::date IS NULL OR date <= $2)
                AND ($3::uuid IS NULL OR user_id = $3)
            "#,
        )
        .bind(range.from)
        .bind(range.to)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(totals)
    }
}
