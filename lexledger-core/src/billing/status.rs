use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::models::{Invoice, InvoiceStatus};

/// Derives an invoice's status from its balance, payments and due date.
///
/// Applied after every change that can move the balance. Precedence:
/// - deleted invoices are `Cancelled`
/// - nothing left to pay is `Paid`
/// - something paid, something left is `PartiallyPaid`
/// - cancelled invoices stay `Cancelled`
/// - anything else past its due date is `Overdue`, drafts included
/// - an invoice that was paid but owes the full amount again goes back to `Sent`
///
/// Otherwise the current status is kept. Nothing calls this on a timer; an
/// invoice only turns overdue when something touches it.
pub fn derive_status(invoice: &Invoice, today: NaiveDate) -> InvoiceStatus {
    if invoice.is_deleted {
        return InvoiceStatus::Cancelled;
    }

    if invoice.balance <= Decimal::ZERO {
        return InvoiceStatus::Paid;
    }
    if invoice.amount_paid > Decimal::ZERO {
        return InvoiceStatus::PartiallyPaid;
    }

    match invoice.status {
        InvoiceStatus::Cancelled => InvoiceStatus::Cancelled,
        _ if today > invoice.due_date => InvoiceStatus::Overdue,
        InvoiceStatus::Paid | InvoiceStatus::PartiallyPaid => InvoiceStatus::Sent,
        current => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::calculator::InvoiceTotals;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn invoice(status: InvoiceStatus, total: Decimal, paid: Decimal) -> Invoice {
        let mut invoice = Invoice::draft(
            "INV-2024-00001".to_string(),
            Uuid::new_v4(),
            None,
            date(2024, 1, 1),
            date(2024, 1, 31),
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
        invoice.status = status;
        invoice.amount_paid = paid;
        invoice.balance = total - paid;
        invoice
    }

    #[test]
    fn test_deleted_is_cancelled() {
        let mut inv = invoice(InvoiceStatus::Sent, dec!(100), Decimal::ZERO);
        inv.is_deleted = true;
        assert_eq!(derive_status(&inv, date(2024, 1, 10)), InvoiceStatus::Cancelled);
    }

    #[test]
    fn test_full_payment_is_paid() {
        let inv = invoice(InvoiceStatus::Sent, dec!(160), dec!(160));
        assert_eq!(derive_status(&inv, date(2024, 1, 10)), InvoiceStatus::Paid);
    }

    #[test]
    fn test_partial_payment_wins_over_overdue() {
        let inv = invoice(InvoiceStatus::Overdue, dec!(160), dec!(60));
        assert_eq!(derive_status(&inv, date(2024, 3, 1)), InvoiceStatus::PartiallyPaid);
    }

    #[test]
    fn test_sent_past_due_is_overdue() {
        let inv = invoice(InvoiceStatus::Sent, dec!(100), Decimal::ZERO);
        assert_eq!(derive_status(&inv, date(2024, 1, 31)), InvoiceStatus::Sent);
        assert_eq!(derive_status(&inv, date(2024, 2, 1)), InvoiceStatus::Overdue);
    }

    #[test]
    fn test_draft_follows_the_same_rule() {
        let inv = invoice(InvoiceStatus::Draft, dec!(100), Decimal::ZERO);
        assert_eq!(derive_status(&inv, date(2024, 1, 10)), InvoiceStatus::Draft);
        assert_eq!(derive_status(&inv, date(2025, 1, 1)), InvoiceStatus::Overdue);

        let empty = invoice(InvoiceStatus::Draft, Decimal::ZERO, Decimal::ZERO);
        assert_eq!(derive_status(&empty, date(2024, 1, 10)), InvoiceStatus::Paid);
    }

    #[test]
    fn test_paid_with_raised_balance_flips_back() {
        let partially = invoice(InvoiceStatus::Paid, dec!(200), dec!(160));
        assert_eq!(derive_status(&partially, date(2024, 1, 10)), InvoiceStatus::PartiallyPaid);

        let unpaid = invoice(InvoiceStatus::Paid, dec!(200), Decimal::ZERO);
        assert_eq!(derive_status(&unpaid, date(2024, 1, 10)), InvoiceStatus::Sent);
    }
}
