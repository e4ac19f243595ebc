//! Member credit ledger.
//!
//! `apply_delta` is the only code path that writes `members.credit`. There is no
//! undo: a mistake is corrected by recording an offsetting payment or refund.

use crate::error::BillingError;
use crate::models::LedgerEntry;
use crate::services::metrics::DB_QUERY_DURATION;
use serde::Serialize;
use sqlx::PgConnection;
use tracing::{info, instrument};
use uuid::Uuid;

/// Credit contribution of a billed payment: owed minus received.
pub fn credit_delta(net_amount: i64, paid_amount: i64) -> i64 {
    net_amount - paid_amount
}

/// Advance credit a member holds, i.e. the most that can be refunded to them.
pub fn refundable_advance(balance: i64) -> i64 {
    (-balance).max(0)
}

/// A member refund pays back an advance; it may not push the balance into debt.
pub fn check_refund(member_id: Uuid, balance: i64, refund_amount: i64) -> Result<(), BillingError> {
    let available = refundable_advance(balance);
    if refund_amount > available {
        return Err(BillingError::InvalidInput(anyhow::anyhow!(
            "Refund of {} exceeds the {} advance held by member {}",
            refund_amount,
            available,
            member_id
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreditChange {
    pub member_id: Uuid,
    pub delta: i64,
    pub balance_before: i64,
    pub balance_after: i64,
}

/// Add `delta` to the member's balance in one statement, so concurrent writers
/// serialize on the row lock instead of overwriting each other.
#[instrument(skip(conn), fields(member_id = %member_id, delta = delta))]
pub async fn apply_delta(
    conn: &mut PgConnection,
    member_id: Uuid,
    delta: i64,
) -> Result<CreditChange, BillingError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["apply_credit_delta"])
        .start_timer();

    let balance_after: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE members
        SET credit = credit + $2,
            updated_utc = NOW()
        WHERE member_id = $1
        RETURNING credit
        "#,
    )
    .bind(member_id)
    .bind(delta)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| BillingError::from_sqlx("Failed to apply credit delta", e))?;

    timer.observe_duration();

    let balance_after = balance_after
        .ok_or_else(|| BillingError::NotFound(anyhow::anyhow!("Member {} not found", member_id)))?;

    let change = CreditChange {
        member_id,
        delta,
        balance_before: balance_after - delta,
        balance_after,
    };

    info!(
        balance_before = change.balance_before,
        balance_after = change.balance_after,
        "Credit updated"
    );

    Ok(change)
}

/// Stored balance compared with the balance implied by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreditReconciliation {
    pub member_id: Uuid,
    pub stored_credit: i64,
    pub ledger_credit: i64,
}

impl CreditReconciliation {
    pub fn is_balanced(&self) -> bool {
        self.stored_credit == self.ledger_credit
    }

    pub fn discrepancy(&self) -> i64 {
        self.stored_credit - self.ledger_credit
    }
}

pub fn reconcile(member_id: Uuid, stored_credit: i64, entries: &[LedgerEntry]) -> CreditReconciliation {
    CreditReconciliation {
        member_id,
        stored_credit,
        ledger_credit: entries.iter().map(LedgerEntry::credit_delta).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentKind;
    use chrono::NaiveDate;

    fn entry(kind: PaymentKind, net: i64, paid: i64, refund: i64) -> LedgerEntry {
        LedgerEntry {
            kind,
            payment_id: Uuid::new_v4(),
            member_id: None,
            payment_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            payment_mode: "cash".to_string(),
            net_amount: net,
            paid_amount: paid,
            refund_amount: refund,
            invoice_number: None,
            record_seq: 0,
        }
    }

    #[test]
    fn underpayment_raises_credit_and_overpayment_lowers_it() {
        assert_eq!(credit_delta(13200, 13200), 0);
        assert_eq!(credit_delta(13200, 10000), 3200);
        assert_eq!(credit_delta(13200, 15000), -1800);
    }

    #[test]
    fn refund_limited_to_advance() {
        let member_id = Uuid::new_v4();
        assert_eq!(refundable_advance(-300), 300);
        assert_eq!(refundable_advance(0), 0);
        assert_eq!(refundable_advance(450), 0);

        assert!(check_refund(member_id, -300, 300).is_ok());
        assert!(check_refund(member_id, -300, 100).is_ok());

        let err = check_refund(member_id, 0, 30).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
        let err = check_refund(member_id, -100, 101).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
        assert!(check_refund(member_id, 600, 1).is_err());
    }

    #[test]
    fn ledger_sum_reproduces_balance() {
        let member_id = Uuid::new_v4();
        let entries = vec![
            entry(PaymentKind::EntryPayment, 28000, 20000, 0),
            entry(PaymentKind::LockerPayment, 500, 1000, 0),
            entry(PaymentKind::MembershipRenewal, 6000, 6000, 0),
            entry(PaymentKind::Refund, 0, 0, 200),
        ];

        let report = reconcile(member_id, 7700, &entries);
        assert!(report.is_balanced());

        let report = reconcile(member_id, 7500, &entries);
        assert!(!report.is_balanced());
        assert_eq!(report.discrepancy(), -200);
    }
}
