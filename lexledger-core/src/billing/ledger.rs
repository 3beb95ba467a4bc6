use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::billing::calculator::round_money;
use crate::billing::status::derive_status;
use crate::error::{BillingError, BillingResult};
use crate::models::{Invoice, InvoiceStatus, NewPayment, Payment};
use crate::store::{BillingStore, SourceChanges, StoreError};

/// Attempts at appending a payment when other writes keep landing first.
const MAX_APPEND_ATTEMPTS: usize = 3;

/// Append-only payment ledger attached to each invoice.
#[derive(Clone)]
pub struct PaymentLedger {
    store: Arc<dyn BillingStore>,
}

impl PaymentLedger {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Validates a payment and appends it to the invoice in memory.
    ///
    /// Recomputes amount paid, balance and status. Does not persist.
    pub fn apply(
        invoice: &mut Invoice,
        payment: NewPayment,
        recorded_by: Uuid,
        today: NaiveDate,
    ) -> BillingResult<Payment> {
        if invoice.is_deleted || invoice.status == InvoiceStatus::Cancelled {
            return Err(BillingError::invalid_state(
                "Cannot record a payment on a cancelled invoice",
            ));
        }

        let amount = payment
            .amount
            .ok_or_else(|| BillingError::validation("Payment amount is required"))?;
        let method = payment
            .method
            .ok_or_else(|| BillingError::validation("Payment method is required"))?;

        let amount = round_money(amount);
        if amount <= Decimal::ZERO {
            return Err(BillingError::validation("Payment amount must be greater than 0"));
        }
        if amount > invoice.balance {
            return Err(BillingError::validation("Payment exceeds outstanding balance"));
        }

        let entry = Payment {
            id: Uuid::new_v4(),
            amount,
            date: payment.date.unwrap_or(today),
            method,
            reference: payment.reference,
            notes: payment.notes,
            recorded_by,
            recorded_at: Utc::now(),
        };

        invoice.payments.push(entry.clone());
        invoice.refresh_balance();
        invoice.status = derive_status(invoice, today);
        invoice.updated_at = Utc::now();
        Ok(entry)
    }

    /// Records a payment against an invoice and persists the result.
    ///
    /// The invoice is reloaded and the payment re-validated whenever another
    /// write lands in between, so concurrent payments are appended one after
    /// the other and never exceed the balance.
    #[instrument(skip(self, payment), fields(invoice_id = %invoice_id))]
    pub async fn append(
        &self,
        invoice_id: Uuid,
        payment: NewPayment,
        recorded_by: Uuid,
        today: NaiveDate,
    ) -> BillingResult<Invoice> {
        let mut attempt = 1;
        loop {
            let mut invoice = self
                .store
                .get_invoice(invoice_id)
                .await?
                .filter(|invoice| !invoice.is_deleted)
                .ok_or_else(|| BillingError::not_found("Invoice"))?;

            let entry = Self::apply(&mut invoice, payment.clone(), recorded_by, today)?;
            match self
                .store
                .save_invoice(&mut invoice, &SourceChanges::none())
                .await
            {
                Ok(()) => {
                    info!(
                        invoice_number = %invoice.invoice_number,
                        amount = %entry.amount,
                        method = %entry.method,
                        balance = %invoice.balance,
                        status = %invoice.status,
                        "Payment recorded"
                    );
                    return Ok(invoice);
                }
                Err(StoreError::StaleInvoice(_)) if attempt < MAX_APPEND_ATTEMPTS => {
                    warn!(attempt, "Invoice changed while recording payment, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::calculator::InvoiceTotals;
    use crate::models::PaymentMethod;
    use rust_decimal_macros::dec;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    fn sent_invoice(total: Decimal) -> Invoice {
        let mut invoice = Invoice::draft(
            "INV-2024-00003".to_string(),
            Uuid::new_v4(),
            None,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            Vec::new(),
            Decimal::ZERO,
            Decimal::ZERO,
            InvoiceTotals {
                subtotal: total,
                tax_amount: Decimal::ZERO,
                total,
            },
            None,
            Uuid::new_v4(),
        );
        invoice.status = InvoiceStatus::Sent;
        invoice
    }

    fn payment(amount: Decimal) -> NewPayment {
        NewPayment {
            amount: Some(amount),
            method: Some(PaymentMethod::Check),
            ..Default::default()
        }
    }

    #[test]
    fn partial_then_full_payment() {
        let mut invoice = sent_invoice(dec!(160));
        let user = Uuid::new_v4();

        PaymentLedger::apply(&mut invoice, payment(dec!(60)), user, today()).unwrap();
        assert_eq!(invoice.amount_paid, dec!(60));
        assert_eq!(invoice.balance, dec!(100));
        assert_eq!(invoice.status, InvoiceStatus::PartiallyPaid);

        let entry = PaymentLedger::apply(&mut invoice, payment(dec!(100)), user, today()).unwrap();
        assert_eq!(invoice.balance, Decimal::ZERO);
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(entry.recorded_by, user);
        assert_eq!(entry.date, today());
        assert_eq!(invoice.payments.len(), 2);
    }

    #[test]
    fn missing_fields_are_validation_errors() {
        let mut invoice = sent_invoice(dec!(100));
        let no_amount = NewPayment {
            method: Some(PaymentMethod::Cash),
            ..Default::default()
        };
        let no_method = NewPayment {
            amount: Some(dec!(10)),
            ..Default::default()
        };

        let err = PaymentLedger::apply(&mut invoice, no_amount, Uuid::new_v4(), today()).unwrap_err();
        assert_eq!(err.to_string(), "Payment amount is required");
        let err = PaymentLedger::apply(&mut invoice, no_method, Uuid::new_v4(), today()).unwrap_err();
        assert_eq!(err.to_string(), "Payment method is required");
        assert!(invoice.payments.is_empty());
    }

    #[test]
    fn non_positive_and_excess_amounts_are_rejected() {
        let mut invoice = sent_invoice(dec!(100));
        for amount in [dec!(0), dec!(-5), dec!(100.01)] {
            let result = PaymentLedger::apply(&mut invoice, payment(amount), Uuid::new_v4(), today());
            assert!(matches!(result, Err(BillingError::Validation(_))));
        }
        assert_eq!(invoice.balance, dec!(100));
    }

    #[test]
    fn cancelled_invoice_takes_no_payments() {
        let mut invoice = sent_invoice(dec!(100));
        invoice.status = InvoiceStatus::Cancelled;
        let result = PaymentLedger::apply(&mut invoice, payment(dec!(10)), Uuid::new_v4(), today());
        assert!(matches!(result, Err(BillingError::InvalidState(_))));
    }
}
