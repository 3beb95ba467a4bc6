use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::billing::calculator::round_money;

/// Time entry recorded against a client (and optionally a case).
///
/// Owned by time tracking. Billing only flips `invoiced` and the weak
/// `invoice_id` back-reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub id: Uuid,

    /// User who logged the time
    pub user_id: Uuid,

    /// Display name of that user, joined in for line item descriptions
    pub user_name: String,

    pub client_id: Uuid,
    pub case_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub description: String,
    pub date: NaiveDate,

    /// Duration in minutes
    pub duration: i32,

    pub billable: bool,

    /// Hourly rate
    pub billing_rate: Decimal,

    /// `duration / 60 * billing_rate`, cent-precise
    pub billable_amount: Decimal,

    pub invoiced: bool,
    pub invoice_id: Option<Uuid>,
    pub is_deleted: bool,
}

impl TimeEntry {
    /// Duration expressed in hours.
    pub fn hours(&self) -> Decimal {
        Decimal::from(self.duration) / Decimal::from(60)
    }

    /// Billable amount for a duration in minutes at an hourly rate.
    pub fn billable_amount_for(duration: i32, rate: Decimal) -> Decimal {
        round_money(Decimal::from(duration) * rate / Decimal::from(60))
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
    fn billable_amount_is_rounded_to_cents() {
        assert_eq!(TimeEntry::billable_amount_for(90, dec!(200)), dec!(300.00));
        assert_eq!(TimeEntry::billable_amount_for(20, dec!(100)), dec!(33.33));
        assert_eq!(TimeEntry::billable_amount_for(0, dec!(100)), dec!(0));
    }
}
