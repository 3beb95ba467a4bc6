use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use crate::billing::calculator::round_money;

/// Expense approval status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar")]
pub enum ExpenseStatus {
    #[sqlx(rename = "pending")]
    Pending,
    #[sqlx(rename = "approved")]
    Approved,
    #[sqlx(rename = "rejected")]
    Rejected,
    #[sqlx(rename = "reimbursed")]
    Reimbursed,
    #[sqlx(rename = "billed")]
    Billed,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseStatus::Pending => "pending",
            ExpenseStatus::Approved => "approved",
            ExpenseStatus::Rejected => "rejected",
            ExpenseStatus::Reimbursed => "reimbursed",
            ExpenseStatus::Billed => "billed",
        }
    }
}

impl fmt::Display for ExpenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Out-of-pocket expense that can be passed on to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: Uuid,
    pub client_id: Uuid,
    pub case_id: Option<Uuid>,
    pub description: String,
    pub date: NaiveDate,
    pub amount: Decimal,

    /// Markup percentage applied when billing
    pub markup: Decimal,

    pub billable: bool,

    /// `amount * (1 + markup / 100)`, cent-precise
    pub billable_amount: Decimal,

    pub status: ExpenseStatus,
    pub invoiced: bool,
    pub invoice_id: Option<Uuid>,
    pub is_deleted: bool,
}

impl Expense {
    pub fn billable_amount_for(amount: Decimal, markup: Decimal) -> Decimal {
        round_money(amount * (Decimal::ONE + markup / Decimal::ONE_HUNDRED))
    }

    /// Amount to put on an invoice: the marked-up amount when one was computed.
    pub fn invoice_amount(&self) -> Decimal {
        if self.billable_amount.is_zero() {
            self.amount
        } else {
            self.billable_amount
        }
    }

    pub fn is_billable(&self) -> bool {
        self.billable && !self.invoiced && !self.is_deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn markup_is_applied() {
        assert_eq!(Expense::billable_amount_for(dec!(80), dec!(25)), dec!(100.00));
        assert_eq!(Expense::billable_amount_for(dec!(19.99), dec!(0)), dec!(19.99));
    }
}
