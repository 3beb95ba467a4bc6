//! Invoice arithmetic.
//!
//! Amounts are rounded to cents where they are computed, so stored totals
//! never carry sub-cent residue.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};
use crate::models::{InvoiceItem, NewInvoiceItem};

/// One cent; the tolerance between a manual item's amount and quantity × rate.
const CENT: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Rounds to 2 decimal places, halves away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Derived amounts of an invoice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

/// Computes subtotal, tax and total for a set of line items.
///
/// `tax_rate` is a percentage. The total is not clamped here; callers run
/// [`validate_totals`] before persisting.
pub fn calculate(items: &[InvoiceItem], tax_rate: Decimal, discount: Decimal) -> InvoiceTotals {
    let subtotal = round_money(items.iter().map(|item| item.amount).sum());
    let tax_amount = round_money(subtotal * tax_rate / Decimal::ONE_HUNDRED);
    let total = round_money(subtotal + tax_amount - discount);
    InvoiceTotals {
        subtotal,
        tax_amount,
        total,
    }
}

/// Outstanding balance given a total and what has been paid.
pub fn balance(total: Decimal, amount_paid: Decimal) -> Decimal {
    round_money(total - amount_paid)
}

pub fn validate_rates(tax_rate: Decimal, discount: Decimal) -> BillingResult<()> {
    if tax_rate < Decimal::ZERO || tax_rate > Decimal::ONE_HUNDRED {
        return Err(BillingError::validation("Tax rate must be between 0 and 100"));
    }
    if discount < Decimal::ZERO {
        return Err(BillingError::validation("Discount cannot be negative"));
    }
    Ok(())
}

pub fn validate_totals(totals: &InvoiceTotals) -> BillingResult<()> {
    if totals.total < Decimal::ZERO {
        return Err(BillingError::validation(
            "Discount cannot exceed the subtotal plus tax",
        ));
    }
    Ok(())
}

/// Turns a submitted line item into a strict [`InvoiceItem`].
///
/// Missing quantity defaults to 1. A missing amount is derived from
/// quantity × rate and a missing rate from amount / quantity. For manual
/// items that supply both, the amount must match quantity × rate to the cent.
/// Items linked to a time entry or expense may omit both; the lifecycle
/// manager prices them from the linked record.
pub fn normalize_item(item: NewInvoiceItem) -> BillingResult<InvoiceItem> {
    let description = item.description.trim().to_string();
    if description.is_empty() {
        return Err(BillingError::validation("Item description is required"));
    }

    let quantity = item.quantity.unwrap_or(Decimal::ONE);
    if quantity < Decimal::ZERO {
        return Err(BillingError::validation("Item quantity cannot be negative"));
    }

    let manual = item.is_manual();
    let (rate, amount) = match (item.rate, item.amount) {
        (Some(rate), Some(amount)) => {
            if manual && (round_money(quantity * rate) - amount).abs() > CENT {
                return Err(BillingError::validation(format!(
                    "Item '{}' amount {} does not match quantity {} x rate {}",
                    description, amount, quantity, rate
                )));
            }
            (rate, round_money(amount))
        }
        (Some(rate), None) => (rate, round_money(quantity * rate)),
        (None, Some(amount)) => {
            let rate = if quantity.is_zero() {
                amount
            } else {
                round_money(amount / quantity)
            };
            (rate, round_money(amount))
        }
        // Priced later from the linked record.
        (None, None) if !manual => (Decimal::ZERO, Decimal::ZERO),
        (None, None) => {
            return Err(BillingError::validation(format!(
                "Item '{}' needs an amount or a rate",
                description
            )))
        }
    };

    if rate < Decimal::ZERO || amount < Decimal::ZERO {
        return Err(BillingError::validation("Item rate and amount cannot be negative"));
    }

    Ok(InvoiceItem {
        description,
        quantity,
        rate,
        amount,
        time_entry_id: item.time_entry_id,
        expense_id: item.expense_id,
        case_id: item.case_id,
        taxable: item.taxable.unwrap_or(true),
    })
}

pub fn normalize_items(items: Vec<NewInvoiceItem>) -> BillingResult<Vec<InvoiceItem>> {
    items.into_iter().map(normalize_item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(amount: Decimal) -> InvoiceItem {
        InvoiceItem {
            description: "Research".to_string(),
            quantity: Decimal::ONE,
            rate: amount,
            amount,
            time_entry_id: None,
            expense_id: None,
            case_id: None,
            taxable: true,
        }
    }

    #[test]
    fn computes_subtotal_tax_and_total() {
        let totals = calculate(&[item(dec!(100)), item(dec!(50))], dec!(10), dec!(5));
        assert_eq!(totals.subtotal, dec!(150));
        assert_eq!(totals.tax_amount, dec!(15));
        assert_eq!(totals.total, dec!(160));
    }

    #[test]
    fn tax_is_rounded_to_cents() {
        let totals = calculate(&[item(dec!(10.01))], dec!(7.5), Decimal::ZERO);
        // 10.01 * 0.075 = 0.75075
        assert_eq!(totals.tax_amount, dec!(0.75));
        assert_eq!(totals.total, dec!(10.76));
        assert_eq!(totals.total, round_money(totals.subtotal + totals.tax_amount));
    }

    #[test]
    fn empty_items_total_zero() {
        let totals = calculate(&[], dec!(20), Decimal::ZERO);
        assert_eq!(totals.total, Decimal::ZERO);
    }

    #[test]
    fn negative_total_is_rejected() {
        let totals = calculate(&[item(dec!(10))], Decimal::ZERO, dec!(20));
        assert_eq!(totals.total, dec!(-10));
        assert!(validate_totals(&totals).is_err());
    }

    #[test]
    fn rates_are_bounded() {
        assert!(validate_rates(dec!(100), Decimal::ZERO).is_ok());
        assert!(validate_rates(dec!(100.01), Decimal::ZERO).is_err());
        assert!(validate_rates(dec!(-1), Decimal::ZERO).is_err());
        assert!(validate_rates(dec!(5), dec!(-0.01)).is_err());
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_money(dec!(2.345)), dec!(2.35));
        assert_eq!(round_money(dec!(-2.345)), dec!(-2.35));
        assert_eq!(balance(dec!(160), dec!(59.995)), dec!(100.01));
    }

    #[test]
    fn amount_only_item_gets_unit_quantity() {
        let normalized = normalize_item(NewInvoiceItem {
            description: "Filing fee".to_string(),
            amount: Some(dec!(100)),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(normalized.quantity, Decimal::ONE);
        assert_eq!(normalized.rate, dec!(100));
        assert!(normalized.taxable);
    }

    #[test]
    fn amount_is_derived_from_rate() {
        let normalized = normalize_item(NewInvoiceItem {
            description: "Consultation".to_string(),
            quantity: Some(dec!(1.5)),
            rate: Some(dec!(250)),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(normalized.amount, dec!(375.00));
    }

    #[test]
    fn inconsistent_manual_item_is_rejected() {
        let result = normalize_item(NewInvoiceItem {
            description: "Consultation".to_string(),
            quantity: Some(dec!(2)),
            rate: Some(dec!(100)),
            amount: Some(dec!(150)),
            ..Default::default()
        });
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[test]
    fn linked_item_keeps_its_amount() {
        // 20 minutes at 100/h: 0.33 h x 100 = 33.00 but the entry bills 33.33
        let normalized = normalize_item(NewInvoiceItem {
            description: "Call (Ann)".to_string(),
            quantity: Some(dec!(0.33)),
            rate: Some(dec!(100)),
            amount: Some(dec!(33.33)),
            time_entry_id: Some(uuid::Uuid::new_v4()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(normalized.amount, dec!(33.33));
    }

    #[test]
    fn linked_item_may_omit_amounts() {
        let normalized = normalize_item(NewInvoiceItem {
            description: "Filing fee".to_string(),
            expense_id: Some(uuid::Uuid::new_v4()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(normalized.amount, Decimal::ZERO);

        let manual = normalize_item(NewInvoiceItem {
            description: "Filing fee".to_string(),
            ..Default::default()
        });
        assert!(matches!(manual, Err(BillingError::Validation(_))));
    }

    #[test]
    fn blank_description_is_rejected() {
        let result = normalize_item(NewInvoiceItem {
            description: "   ".to_string(),
            amount: Some(dec!(1)),
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
