//! Locker assignment shared by registration, renewal, and standalone purchase.

use crate::error::BillingError;
use crate::models::{Invoice, Locker, LockerPayment, LockerSelection, MemberLocker, PaymentKind, PaymentReference};
use crate::services::credit::{self, CreditChange};
use crate::services::fees::{quote_locker, LockerQuote, LockerTerms};
use crate::services::invoice_sequence::issue_invoice;
use crate::services::records::{self, PaymentDetails};
use chrono::{Months, NaiveDate};
use serde::Serialize;
use sqlx::PgConnection;
use tracing::{info, instrument};
use uuid::Uuid;

/// What happens to the member's locker assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockerPlan {
    /// No active assignment yet.
    Assign { start: NaiveDate, end: NaiveDate },
    /// Same locker, window continues from the current end.
    Extend {
        member_locker_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    },
    /// Different locker: the old assignment is released.
    Replace {
        release: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    },
}

impl LockerPlan {
    pub fn window(&self) -> (NaiveDate, NaiveDate) {
        match *self {
            LockerPlan::Assign { start, end }
            | LockerPlan::Extend { start, end, .. }
            | LockerPlan::Replace { start, end, .. } => (start, end),
        }
    }
}

fn add_months(date: NaiveDate, months: i32) -> Result<NaiveDate, BillingError> {
    u32::try_from(months)
        .ok()
        .and_then(|m| date.checked_add_months(Months::new(m)))
        .ok_or_else(|| BillingError::InvalidInput(anyhow::anyhow!("Locker term out of range")))
}

/// Decide the assignment window for `months` of `locker_id` starting at `from`.
///
/// A member holds at most one active locker. Renewing the same locker extends
/// the window from whichever is later, its current end or `from`.
pub fn plan_locker_window(
    current: Option<&MemberLocker>,
    locker_id: Uuid,
    months: i32,
    from: NaiveDate,
) -> Result<LockerPlan, BillingError> {
    if months < 1 {
        return Err(BillingError::InvalidInput(anyhow::anyhow!(
            "Locker term must be at least one month"
        )));
    }

    match current {
        Some(held) if held.locker_id == locker_id => {
            let start = held.end_date.max(from);
            Ok(LockerPlan::Extend {
                member_locker_id: held.member_locker_id,
                start,
                end: add_months(start, months)?,
            })
        }
        Some(held) => Ok(LockerPlan::Replace {
            release: held.member_locker_id,
            start: from,
            end: add_months(from, months)?,
        }),
        None => Ok(LockerPlan::Assign {
            start: from,
            end: add_months(from, months)?,
        }),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LockerOutcome {
    pub assignment: MemberLocker,
    pub payment: LockerPayment,
    pub invoice: Invoice,
    pub quote: LockerQuote,
    pub credit: CreditChange,
}

/// Load the locker a selection refers to, failing before any write.
pub(super) async fn load_selection(
    conn: &mut PgConnection,
    selection: Option<&LockerSelection>,
) -> Result<Option<Locker>, BillingError> {
    match selection {
        Some(selection) => Ok(Some(records::fetch_locker(conn, selection.locker_id).await?)),
        None => Ok(None),
    }
}

pub(super) fn terms_for(locker: &Locker, selection: &LockerSelection) -> LockerTerms {
    LockerTerms {
        monthly_price: locker.monthly_price,
        months: selection.months,
        discount: selection.discount,
    }
}

/// Assign or extend the locker, record its payment, apply credit, and invoice.
#[instrument(skip(conn, locker, selection, details), fields(member_id = %member_id, locker_id = %locker.locker_id))]
pub(super) async fn assign_locker(
    conn: &mut PgConnection,
    member_id: Uuid,
    locker: &Locker,
    selection: &LockerSelection,
    from: NaiveDate,
    details: &PaymentDetails<'_>,
) -> Result<LockerOutcome, BillingError> {
    let quote = quote_locker(terms_for(locker, selection))?;

    let occupant = records::lock_active_assignment_for_locker(conn, locker.locker_id).await?;
    if let Some(occupant) = occupant {
        if occupant.member_id != member_id {
            if occupant.end_date >= from {
                return Err(BillingError::InvalidInput(anyhow::anyhow!(
                    "Locker {} is assigned to another member until {}",
                    locker.locker_number,
                    occupant.end_date
                )));
            }
            // Lapsed hold from another member.
            records::deactivate_assignment(conn, occupant.member_locker_id).await?;
        }
    }

    let current = records::lock_active_assignment_for_member(conn, member_id).await?;
    let plan = plan_locker_window(current.as_ref(), locker.locker_id, selection.months, from)?;

    let assignment = match plan {
        LockerPlan::Assign { start, end } => {
            records::insert_assignment(conn, member_id, locker.locker_id, start, end).await?
        }
        LockerPlan::Extend {
            member_locker_id,
            end,
            ..
        } => records::extend_assignment(conn, member_locker_id, end).await?,
        LockerPlan::Replace {
            release,
            start,
            end,
        } => {
            records::deactivate_assignment(conn, release).await?;
            records::insert_assignment(conn, member_id, locker.locker_id, start, end).await?
        }
    };

    let locker_details = PaymentDetails {
        net_amount: quote.locker_charge,
        paid_amount: selection.paid_amount,
        ..details.clone()
    };
    let payment = records::insert_locker_payment(
        conn,
        member_id,
        locker.locker_id,
        selection.months,
        &quote,
        plan.window(),
        &locker_details,
    )
    .await?;

    let credit = credit::apply_delta(
        conn,
        member_id,
        credit::credit_delta(payment.net_amount, payment.paid_amount),
    )
    .await?;

    let invoice = issue_invoice(
        conn,
        PaymentReference::new(PaymentKind::LockerPayment, payment.locker_payment_id),
    )
    .await?;

    info!(
        member_locker_id = %assignment.member_locker_id,
        end_date = %assignment.end_date,
        invoice_number = %invoice.invoice_number,
        "Locker assigned"
    );

    Ok(LockerOutcome {
        assignment,
        payment,
        invoice,
        quote,
        credit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn held(locker_id: Uuid, end: NaiveDate) -> MemberLocker {
        MemberLocker {
            member_locker_id: Uuid::new_v4(),
            member_id: Uuid::new_v4(),
            locker_id,
            start_date: date(2025, 1, 1),
            end_date: end,
            is_active: true,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn first_locker_starts_at_from_date() {
        let plan = plan_locker_window(None, Uuid::new_v4(), 3, date(2025, 1, 31)).unwrap();
        assert_eq!(
            plan,
            LockerPlan::Assign {
                start: date(2025, 1, 31),
                end: date(2025, 4, 30)
            }
        );
    }

    #[test]
    fn same_locker_extends_from_current_end() {
        let locker_id = Uuid::new_v4();
        let current = held(locker_id, date(2025, 6, 30));

        let plan = plan_locker_window(Some(&current), locker_id, 1, date(2025, 6, 1)).unwrap();
        assert_eq!(
            plan,
            LockerPlan::Extend {
                member_locker_id: current.member_locker_id,
                start: date(2025, 6, 30),
                end: date(2025, 7, 30)
            }
        );
    }

    #[test]
    fn lapsed_same_locker_restarts_from_date() {
        let locker_id = Uuid::new_v4();
        let current = held(locker_id, date(2025, 1, 31));

        let plan = plan_locker_window(Some(&current), locker_id, 2, date(2025, 3, 10)).unwrap();
        assert_eq!(plan.window(), (date(2025, 3, 10), date(2025, 5, 10)));
    }

    #[test]
    fn different_locker_releases_current() {
        let current = held(Uuid::new_v4(), date(2025, 6, 30));
        let plan = plan_locker_window(Some(&current), Uuid::new_v4(), 1, date(2025, 6, 1)).unwrap();

        match plan {
            LockerPlan::Replace { release, .. } => assert_eq!(release, current.member_locker_id),
            other => panic!("expected replace, got {:?}", other),
        }
    }

    #[test]
    fn zero_month_locker_term_is_rejected() {
        let err = plan_locker_window(None, Uuid::new_v4(), 0, date(2025, 1, 1)).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }
}
