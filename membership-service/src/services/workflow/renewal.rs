//! Membership renewal and admin confirmation of public renewals.

use super::locker::{assign_locker, load_selection, terms_for, LockerOutcome};
use super::{access_granted_effects, commit, ActorContext, ApprovalState, BillingEngine};
use crate::error::BillingError;
use crate::models::{
    Invoice, LockerSelection, Member, MembershipPackage, MembershipRenewal, PaymentKind,
    PaymentMode, PaymentProof, PaymentReference, RenewalConfirmation,
};
use crate::services::collaborators::{NotificationContext, NotificationKind, PostCommitEffect};
use crate::services::credit::{self, CreditChange};
use crate::services::fees::{calculate_fees, FeeBasis, FeeBreakdown, FeeRequest, LockerTerms};
use crate::services::invoice_sequence::issue_invoice;
use crate::services::records::{self, PaymentDetails};
use chrono::{Months, NaiveDate};
use serde::Serialize;
use sqlx::PgConnection;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Validate)]
pub struct RenewalRequest {
    pub member_id: Uuid,
    #[validate(range(min = 0, max = 120))]
    pub months: i32,
    #[validate(range(min = 0))]
    pub extra_discount: i64,
    pub short_term_amount: Option<i64>,
    /// Admin-chosen expiry overriding `current expiry + months`.
    pub explicit_expiry: Option<NaiveDate>,
    #[validate(range(min = 0))]
    pub paid_amount: i64,
    pub payment_date: NaiveDate,
    pub payment_mode: PaymentMode,
    pub proof: Option<PaymentProof>,
    pub locker: Option<LockerSelection>,
}

/// Expiry after renewing `current` for `months`.
///
/// An explicit date wins. A zero-month renewal (day pass) runs to the payment
/// date.
pub fn next_expiry(
    current: NaiveDate,
    months: i32,
    explicit: Option<NaiveDate>,
    payment_date: NaiveDate,
) -> Result<NaiveDate, BillingError> {
    if let Some(explicit) = explicit {
        return Ok(explicit);
    }
    if months == 0 {
        return Ok(payment_date);
    }
    u32::try_from(months)
        .ok()
        .and_then(|m| current.checked_add_months(Months::new(m)))
        .ok_or_else(|| BillingError::InvalidInput(anyhow::anyhow!("Duration out of range")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPlan {
    pub fees: FeeBreakdown,
    pub previous_expiry: NaiveDate,
    /// Stored on the renewal record either way.
    pub tentative_expiry: NaiveDate,
    /// `Some` when the member's expiry is written now.
    pub committed_expiry: Option<NaiveDate>,
    pub approval: ApprovalState,
}

pub fn plan_renewal(
    member: &Member,
    package: &MembershipPackage,
    request: &RenewalRequest,
    locker: Option<LockerTerms>,
    actor: ActorContext,
) -> Result<RenewalPlan, BillingError> {
    if request.explicit_expiry.is_some() && !actor.is_admin {
        return Err(BillingError::InvalidInput(anyhow::anyhow!(
            "Only an admin can set an explicit expiry"
        )));
    }

    let fees = calculate_fees(&FeeRequest {
        package,
        basis: FeeBasis::Renewal,
        months: request.months,
        extra_discount: request.extra_discount,
        short_term_amount: request.short_term_amount,
        locker,
    })?;

    let previous_expiry = member.payment_expiry_date;
    let tentative_expiry = next_expiry(
        previous_expiry,
        request.months,
        request.explicit_expiry,
        request.payment_date,
    )?;
    let approval = ApprovalState::for_actor(actor);

    Ok(RenewalPlan {
        fees,
        previous_expiry,
        tentative_expiry,
        committed_expiry: (approval == ApprovalState::Approved).then_some(tentative_expiry),
        approval,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RenewalOutcome {
    pub member: Member,
    pub renewal: MembershipRenewal,
    pub invoice: Invoice,
    pub fees: FeeBreakdown,
    pub credit: CreditChange,
    pub locker: Option<LockerOutcome>,
    pub approval: ApprovalState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationOutcome {
    pub member: Member,
    pub confirmation: RenewalConfirmation,
    /// Confirmed expiry differs from the one shown at submission.
    pub drifted: bool,
}

#[instrument(skip(conn, request), fields(member_id = %request.member_id, is_admin = actor.is_admin))]
pub(super) async fn renew_in_tx(
    conn: &mut PgConnection,
    request: &RenewalRequest,
    actor: ActorContext,
) -> Result<(RenewalOutcome, Vec<PostCommitEffect>), BillingError> {
    request.validate()?;
    if let Some(selection) = &request.locker {
        selection.validate()?;
    }

    let member = records::lock_member(conn, request.member_id).await?;
    let package = records::fetch_package(conn, member.package_id).await?;
    let locker = load_selection(conn, request.locker.as_ref()).await?;
    let locker_terms = locker
        .as_ref()
        .zip(request.locker.as_ref())
        .map(|(locker, selection)| terms_for(locker, selection));

    let plan = plan_renewal(&member, &package, request, locker_terms, actor)?;

    let details = PaymentDetails {
        net_amount: plan.fees.net_amount,
        paid_amount: request.paid_amount,
        payment_date: request.payment_date,
        payment_mode: request.payment_mode.as_str(),
        proof: request.proof.as_ref(),
    };

    let renewal = records::insert_renewal(
        conn,
        member.member_id,
        package.package_id,
        request.months,
        &plan.fees,
        plan.previous_expiry,
        plan.tentative_expiry,
        plan.committed_expiry.is_none(),
        &details,
    )
    .await?;

    let credit = credit::apply_delta(
        conn,
        member.member_id,
        credit::credit_delta(renewal.net_amount, renewal.paid_amount),
    )
    .await?;

    let invoice = issue_invoice(
        conn,
        PaymentReference::new(PaymentKind::MembershipRenewal, renewal.renewal_id),
    )
    .await?;

    let locker = match (locker.as_ref(), request.locker.as_ref()) {
        (Some(locker), Some(selection)) => Some(
            assign_locker(
                conn,
                member.member_id,
                locker,
                selection,
                request.payment_date,
                &details,
            )
            .await?,
        ),
        _ => None,
    };

    let member = match plan.committed_expiry {
        Some(expiry) => records::update_member_expiry(conn, member.member_id, expiry, true).await?,
        None => records::set_member_approval(conn, member.member_id, false).await?,
    };

    let context = NotificationContext {
        invoice_number: Some(invoice.invoice_number.clone()),
        amount_due: Some(plan.fees.total_due()),
        paid_amount: Some(request.paid_amount),
        expiry_date: Some(plan.tentative_expiry),
        credit: Some(member.credit),
    };
    let effects = match plan.approval {
        ApprovalState::Approved => {
            access_granted_effects(&member, &package, NotificationKind::Renewal, context)
        }
        ApprovalState::PendingApproval => vec![PostCommitEffect::Notify {
            kind: NotificationKind::Renewal,
            member: member.clone(),
            context,
        }],
    };

    info!(
        renewal_id = %renewal.renewal_id,
        invoice_number = %invoice.invoice_number,
        previous_expiry = %plan.previous_expiry,
        tentative_expiry = %plan.tentative_expiry,
        approval = ?plan.approval,
        "Membership renewed"
    );

    Ok((
        RenewalOutcome {
            member,
            renewal,
            invoice,
            fees: plan.fees,
            credit,
            locker,
            approval: plan.approval,
        },
        effects,
    ))
}

impl BillingEngine {
    /// Renew a member for another term.
    pub async fn renew_membership(
        &self,
        request: RenewalRequest,
        actor: ActorContext,
    ) -> Result<RenewalOutcome, BillingError> {
        let request = &request;
        self.execute("renew_membership", || async move {
            let mut tx = self.db().begin().await?;
            let result = renew_in_tx(&mut tx, request, actor).await?;
            commit(tx).await?;
            Ok(result)
        })
        .await
    }

    /// Commit the expiry of a renewal taken on the public path and re-approve
    /// the member.
    ///
    /// The confirmed expiry is recomputed from the member's expiry at
    /// confirmation time unless the admin supplies one. A difference from the
    /// tentative date is logged and reported.
    #[instrument(skip(self))]
    pub async fn confirm_renewal(
        &self,
        renewal_id: Uuid,
        explicit_expiry: Option<NaiveDate>,
        actor: ActorContext,
    ) -> Result<ConfirmationOutcome, BillingError> {
        actor.require_admin("confirm_renewal")?;

        self.execute("confirm_renewal", || async move {
            let mut tx = self.db().begin().await?;

            // Held until commit, so a second confirmation sees this one's row.
            let renewal = records::lock_renewal(&mut tx, renewal_id).await?;
            if !renewal.requires_confirmation {
                return Err(BillingError::Conflict(anyhow::anyhow!(
                    "Renewal {} was committed when it was taken",
                    renewal_id
                )));
            }
            if records::fetch_renewal_confirmation(&mut tx, renewal_id)
                .await?
                .is_some()
            {
                return Err(BillingError::Conflict(anyhow::anyhow!(
                    "Renewal {} is already confirmed",
                    renewal_id
                )));
            }

            let member = records::lock_member(&mut tx, renewal.member_id).await?;
            let confirmed = next_expiry(
                member.payment_expiry_date,
                renewal.months,
                explicit_expiry,
                renewal.payment_date,
            )?;

            let confirmation = records::insert_renewal_confirmation(
                &mut tx,
                renewal_id,
                renewal.expiry_date,
                confirmed,
            )
            .await?;
            let member =
                records::update_member_expiry(&mut tx, member.member_id, confirmed, true).await?;
            let package = records::fetch_package(&mut tx, member.package_id).await?;
            commit(tx).await?;

            let drifted = confirmation.drifted();
            if drifted {
                warn!(
                    renewal_id = %renewal_id,
                    tentative_expiry = %confirmation.tentative_expiry_date,
                    confirmed_expiry = %confirmation.confirmed_expiry_date,
                    "Confirmed expiry differs from the one shown at renewal"
                );
            }

            let effects = access_granted_effects(
                &member,
                &package,
                NotificationKind::Renewal,
                NotificationContext {
                    expiry_date: Some(confirmed),
                    ..Default::default()
                },
            );
            Ok((
                ConfirmationOutcome {
                    member,
                    confirmation,
                    drifted,
                },
                effects,
            ))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{test_member, test_package};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn request(member_id: Uuid, months: i32, paid: i64) -> RenewalRequest {
        RenewalRequest {
            member_id,
            months,
            extra_discount: 0,
            short_term_amount: None,
            explicit_expiry: None,
            paid_amount: paid,
            payment_date: date(2025, 3, 25),
            payment_mode: PaymentMode::Upi,
            proof: None,
            locker: None,
        }
    }

    #[test]
    fn admin_renewal_extends_expiry_with_zero_credit_delta() {
        let package = test_package(4000, 2200, (0, 0, 0));
        let member = test_member(true, date(2025, 3, 31));

        let plan = plan_renewal(
            &member,
            &package,
            &request(member.member_id, 6, 13200),
            None,
            ActorContext::admin(),
        )
        .unwrap();

        assert_eq!(plan.fees.admission_fee, 0);
        assert_eq!(plan.fees.net_amount, 13200);
        assert_eq!(credit::credit_delta(plan.fees.net_amount, 13200), 0);
        assert_eq!(plan.tentative_expiry, date(2025, 9, 30));
        assert_eq!(plan.committed_expiry, Some(date(2025, 9, 30)));
        assert_eq!(plan.approval, ApprovalState::Approved);
    }

    #[test]
    fn public_renewal_leaves_expiry_uncommitted() {
        let package = test_package(4000, 2200, (0, 0, 0));
        let member = test_member(true, date(2025, 3, 31));

        let plan = plan_renewal(
            &member,
            &package,
            &request(member.member_id, 6, 13200),
            None,
            ActorContext::public(),
        )
        .unwrap();

        assert_eq!(plan.tentative_expiry, date(2025, 9, 30));
        assert_eq!(plan.committed_expiry, None);
        assert_eq!(plan.approval, ApprovalState::PendingApproval);
    }

    #[test]
    fn explicit_expiry_wins_over_term() {
        assert_eq!(
            next_expiry(date(2025, 3, 31), 6, Some(date(2025, 12, 31)), date(2025, 3, 1)).unwrap(),
            date(2025, 12, 31)
        );
    }

    #[test]
    fn zero_month_renewal_runs_to_payment_date() {
        assert_eq!(
            next_expiry(date(2025, 1, 31), 0, None, date(2025, 3, 3)).unwrap(),
            date(2025, 3, 3)
        );
    }

    #[test]
    fn month_end_expiry_clamps() {
        assert_eq!(
            next_expiry(date(2025, 1, 31), 1, None, date(2025, 1, 20)).unwrap(),
            date(2025, 2, 28)
        );
    }

    #[test]
    fn public_actor_cannot_pick_expiry() {
        let package = test_package(0, 1000, (0, 0, 0));
        let member = test_member(true, date(2025, 3, 31));
        let mut req = request(member.member_id, 1, 1000);
        req.explicit_expiry = Some(date(2026, 1, 1));

        let err = plan_renewal(&member, &package, &req, None, ActorContext::public()).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }
}
