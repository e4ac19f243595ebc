//! New member registration and approval.

use super::locker::{assign_locker, load_selection, terms_for, LockerOutcome};
use super::{
    access_granted_effects, commit, not_found_member, ActorContext, ApprovalState, BillingEngine,
};
use crate::error::BillingError;
use crate::models::{
    EntryPayment, Invoice, LockerSelection, Member, MembershipPackage, NewMember, PaymentKind,
    PaymentMode, PaymentProof, PaymentReference,
};
use crate::services::collaborators::{
    NotificationContext, NotificationKind, PostCommitEffect,
};
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
pub struct RegistrationRequest {
    pub package_id: Uuid,
    pub member: NewMember,
    #[validate(range(min = 0, max = 120))]
    pub months: i32,
    #[validate(range(min = 0))]
    pub extra_discount: i64,
    /// Amount billed for a zero-month membership.
    pub short_term_amount: Option<i64>,
    /// Admin-chosen expiry overriding `start_date + months`.
    pub explicit_expiry: Option<NaiveDate>,
    #[validate(range(min = 0))]
    pub paid_amount: i64,
    pub payment_date: NaiveDate,
    pub payment_mode: PaymentMode,
    pub proof: Option<PaymentProof>,
    pub locker: Option<LockerSelection>,
}

impl RegistrationRequest {
    fn validate_all(&self) -> Result<(), BillingError> {
        self.validate()?;
        self.member.validate()?;
        if let Some(locker) = &self.locker {
            locker.validate()?;
        }
        Ok(())
    }
}

/// Everything decided before the first write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationPlan {
    pub fees: FeeBreakdown,
    /// Expiry the payment buys, stored on the entry payment.
    pub tentative_expiry: NaiveDate,
    /// Expiry written to the member now. Equals the start date until approval.
    pub committed_expiry: NaiveDate,
    pub approval: ApprovalState,
}

/// Expiry a registration buys: the explicit date, or start plus the term.
pub(super) fn registration_expiry(
    start_date: NaiveDate,
    months: i32,
    explicit: Option<NaiveDate>,
) -> Result<NaiveDate, BillingError> {
    if let Some(explicit) = explicit {
        if explicit < start_date {
            return Err(BillingError::InvalidInput(anyhow::anyhow!(
                "Expiry {} is before the start date {}",
                explicit,
                start_date
            )));
        }
        return Ok(explicit);
    }
    if months == 0 {
        return Ok(start_date);
    }
    u32::try_from(months)
        .ok()
        .and_then(|m| start_date.checked_add_months(Months::new(m)))
        .ok_or_else(|| BillingError::InvalidInput(anyhow::anyhow!("Duration out of range")))
}

pub fn plan_registration(
    package: &MembershipPackage,
    request: &RegistrationRequest,
    locker: Option<LockerTerms>,
    actor: ActorContext,
) -> Result<RegistrationPlan, BillingError> {
    if request.explicit_expiry.is_some() && !actor.is_admin {
        return Err(BillingError::InvalidInput(anyhow::anyhow!(
            "Only an admin can set an explicit expiry"
        )));
    }

    let fees = calculate_fees(&FeeRequest {
        package,
        basis: FeeBasis::Registration,
        months: request.months,
        extra_discount: request.extra_discount,
        short_term_amount: request.short_term_amount,
        locker,
    })?;

    let start_date = request.member.start_date;
    let tentative_expiry = registration_expiry(start_date, request.months, request.explicit_expiry)?;
    let approval = ApprovalState::for_actor(actor);
    let committed_expiry = match approval {
        ApprovalState::Approved => tentative_expiry,
        ApprovalState::PendingApproval => start_date,
    };

    Ok(RegistrationPlan {
        fees,
        tentative_expiry,
        committed_expiry,
        approval,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationOutcome {
    pub member: Member,
    pub payment: EntryPayment,
    pub invoice: Invoice,
    pub fees: FeeBreakdown,
    pub credit: CreditChange,
    pub locker: Option<LockerOutcome>,
    pub approval: ApprovalState,
}

/// Result of approving a public registration.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    pub member: Member,
    pub tentative_expiry: NaiveDate,
}

/// Registration writes on an open transaction.
#[instrument(skip(conn, request), fields(package_id = %request.package_id, is_admin = actor.is_admin))]
pub(super) async fn register_in_tx(
    conn: &mut PgConnection,
    request: &RegistrationRequest,
    actor: ActorContext,
) -> Result<(RegistrationOutcome, Vec<PostCommitEffect>), BillingError> {
    request.validate_all()?;

    let package = records::fetch_package(conn, request.package_id).await?;
    let locker = load_selection(conn, request.locker.as_ref()).await?;
    let locker_terms = locker
        .as_ref()
        .zip(request.locker.as_ref())
        .map(|(locker, selection)| terms_for(locker, selection));

    let plan = plan_registration(&package, request, locker_terms, actor)?;
    let is_approved = plan.approval == ApprovalState::Approved;

    let member = records::insert_member(
        conn,
        package.package_id,
        &request.member,
        plan.committed_expiry,
        is_approved,
    )
    .await?;

    let details = PaymentDetails {
        net_amount: plan.fees.net_amount,
        paid_amount: request.paid_amount,
        payment_date: request.payment_date,
        payment_mode: request.payment_mode.as_str(),
        proof: request.proof.as_ref(),
    };

    let payment = records::insert_entry_payment(
        conn,
        member.member_id,
        package.package_id,
        request.months,
        &plan.fees,
        plan.tentative_expiry,
        &details,
    )
    .await?;

    let credit = credit::apply_delta(
        conn,
        member.member_id,
        credit::credit_delta(payment.net_amount, payment.paid_amount),
    )
    .await?;

    let invoice = issue_invoice(
        conn,
        PaymentReference::new(PaymentKind::EntryPayment, payment.entry_payment_id),
    )
    .await?;

    let locker = match (locker.as_ref(), request.locker.as_ref()) {
        (Some(locker), Some(selection)) => Some(
            assign_locker(
                conn,
                member.member_id,
                locker,
                selection,
                request.member.start_date,
                &details,
            )
            .await?,
        ),
        _ => None,
    };

    let member = records::fetch_member(conn, member.member_id)
        .await?
        .ok_or_else(|| not_found_member(member.member_id))?;

    let context = NotificationContext {
        invoice_number: Some(invoice.invoice_number.clone()),
        amount_due: Some(plan.fees.total_due()),
        paid_amount: Some(request.paid_amount),
        expiry_date: Some(plan.tentative_expiry),
        credit: Some(member.credit),
    };
    let effects = match plan.approval {
        ApprovalState::Approved => {
            access_granted_effects(&member, &package, NotificationKind::Creation, context)
        }
        // Access waits for approval.
        ApprovalState::PendingApproval => vec![PostCommitEffect::Notify {
            kind: NotificationKind::Creation,
            member: member.clone(),
            context,
        }],
    };

    info!(
        member_id = %member.member_id,
        invoice_number = %invoice.invoice_number,
        approval = ?plan.approval,
        "Member registered"
    );

    Ok((
        RegistrationOutcome {
            member,
            payment,
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
    /// Create a member with their entry payment, invoice, credit, and locker.
    pub async fn register_member(
        &self,
        request: RegistrationRequest,
        actor: ActorContext,
    ) -> Result<RegistrationOutcome, BillingError> {
        let request = &request;
        self.execute("register_member", || async move {
            let mut tx = self.db().begin().await?;
            let result = register_in_tx(&mut tx, request, actor).await?;
            commit(tx).await?;
            Ok(result)
        })
        .await
    }

    /// Approve a member registered on the public path, committing the expiry
    /// their entry payment bought or an explicit admin date.
    #[instrument(skip(self))]
    pub async fn approve_member(
        &self,
        member_id: Uuid,
        explicit_expiry: Option<NaiveDate>,
        actor: ActorContext,
    ) -> Result<ApprovalOutcome, BillingError> {
        actor.require_admin("approve_member")?;

        self.execute("approve_member", || async move {
            let mut tx = self.db().begin().await?;

            let member = records::lock_member(&mut tx, member_id).await?;
            if member.is_approved {
                return Err(BillingError::Conflict(anyhow::anyhow!(
                    "Member {} is already approved",
                    member_id
                )));
            }
            if records::has_unconfirmed_renewal(&mut tx, member_id).await? {
                return Err(BillingError::Conflict(anyhow::anyhow!(
                    "Member {} has a renewal awaiting confirmation",
                    member_id
                )));
            }

            let entry = records::fetch_latest_entry_payment(&mut tx, member_id).await?;
            let expiry = registration_expiry(member.start_date, entry.months, explicit_expiry)?;
            if expiry != entry.expiry_date {
                warn!(
                    member_id = %member_id,
                    tentative_expiry = %entry.expiry_date,
                    confirmed_expiry = %expiry,
                    "Approved expiry differs from the one shown at registration"
                );
            }

            let member = records::update_member_expiry(&mut tx, member_id, expiry, true).await?;
            let package = records::fetch_package(&mut tx, member.package_id).await?;
            commit(tx).await?;

            let effects = access_granted_effects(
                &member,
                &package,
                NotificationKind::Creation,
                NotificationContext {
                    expiry_date: Some(expiry),
                    ..Default::default()
                },
            );
            Ok((
                ApprovalOutcome {
                    member,
                    tentative_expiry: entry.expiry_date,
                },
                effects,
            ))
        })
        .await
    }
}
