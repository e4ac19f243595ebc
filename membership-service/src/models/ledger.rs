//! Normalized ledger entry shared by every payment kind.

use super::payment::PaymentKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row of the unified payment ledger.
///
/// `refund_amount` is zero for every kind except refunds, and `paid_amount` is
/// zero for refunds. Miscellaneous transactions expose their total as
/// `net_amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(rename = "type")]
    pub kind: PaymentKind,
    pub payment_id: Uuid,
    pub member_id: Option<Uuid>,
    pub payment_date: NaiveDate,
    pub payment_mode: String,
    pub net_amount: i64,
    pub paid_amount: i64,
    pub refund_amount: i64,
    pub invoice_number: Option<String>,
    /// Global insertion order across all payment tables.
    pub record_seq: i64,
}

impl LedgerEntry {
    /// Contribution of this entry to the member's credit balance.
    pub fn credit_delta(&self) -> i64 {
        self.net_amount - self.paid_amount + self.refund_amount
    }
}
