//! Standalone locker purchases, miscellaneous sales, and refunds.

use super::locker::{assign_locker, LockerOutcome};
use super::{commit, not_found_member, BillingEngine};
use crate::error::BillingError;
use crate::models::{
    Invoice, LockerSelection, Member, MiscTransaction, PaymentKind, PaymentMode, PaymentProof,
    PaymentReference, Refund,
};
use crate::services::collaborators::PostCommitEffect;
use crate::services::credit::{self, CreditChange};
use crate::services::invoice_sequence::{issue_invoice, lock_sequence};
use crate::services::records::{self, PaymentDetails};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone)]
pub struct LockerPurchase {
    pub member_id: Uuid,
    pub selection: LockerSelection,
    pub payment_date: NaiveDate,
    pub payment_mode: PaymentMode,
    pub proof: Option<PaymentProof>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LockerPurchaseOutcome {
    pub member: Member,
    pub locker: LockerOutcome,
}

#[derive(Debug, Clone, Validate)]
pub struct MiscTransactionRequest {
    /// `None` for a walk-in sale.
    pub member_id: Option<Uuid>,
    #[validate(length(min = 1, max = 255))]
    pub description: String,
    #[validate(range(min = 0))]
    pub total_amount: i64,
    #[validate(range(min = 0))]
    pub paid_amount: i64,
    pub payment_date: NaiveDate,
    pub payment_mode: PaymentMode,
    pub proof: Option<PaymentProof>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MiscOutcome {
    pub transaction: MiscTransaction,
    pub invoice: Invoice,
    /// `None` for walk-in sales.
    pub credit: Option<CreditChange>,
}

#[derive(Debug, Clone, Validate)]
pub struct RefundRequest {
    pub member_id: Option<Uuid>,
    #[validate(length(min = 1, max = 255))]
    pub reason: String,
    #[validate(range(min = 1))]
    pub refund_amount: i64,
    pub payment_date: NaiveDate,
    pub payment_mode: PaymentMode,
    pub proof: Option<PaymentProof>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundOutcome {
    pub refund: Refund,
    pub credit: Option<CreditChange>,
}

impl BillingEngine {
    /// Assign or extend a locker for an existing member.
    #[instrument(skip(self, purchase), fields(member_id = %purchase.member_id, locker_id = %purchase.selection.locker_id))]
    pub async fn purchase_locker(
        &self,
        purchase: LockerPurchase,
    ) -> Result<LockerPurchaseOutcome, BillingError> {
        purchase.selection.validate()?;

        let purchase = &purchase;
        self.execute("purchase_locker", || async move {
            let mut tx = self.db().begin().await?;

            let member = records::lock_member(&mut tx, purchase.member_id).await?;
            let locker = records::fetch_locker(&mut tx, purchase.selection.locker_id).await?;

            // Registration and renewal hold the sequence lock before touching
            // assignment rows; take it in the same order here.
            lock_sequence(&mut tx).await?;

            let details = PaymentDetails {
                net_amount: 0,
                paid_amount: purchase.selection.paid_amount,
                payment_date: purchase.payment_date,
                payment_mode: purchase.payment_mode.as_str(),
                proof: purchase.proof.as_ref(),
            };
            let outcome = assign_locker(
                &mut tx,
                member.member_id,
                &locker,
                &purchase.selection,
                purchase.payment_date,
                &details,
            )
            .await?;

            let member = records::fetch_member(&mut tx, member.member_id)
                .await?
                .ok_or_else(|| not_found_member(member.member_id))?;
            let package = records::fetch_package(&mut tx, member.package_id).await?;
            commit(tx).await?;

            let effects = vec![PostCommitEffect::SyncMember {
                member: member.clone(),
                device_ids: package.device_ids,
            }];
            Ok((
                LockerPurchaseOutcome {
                    member,
                    locker: outcome,
                },
                effects,
            ))
        })
        .await
    }

    /// Record an invoiced sale, on a member's account or as a walk-in.
    #[instrument(skip(self, request), fields(member_id = ?request.member_id))]
    pub async fn record_misc_transaction(
        &self,
        request: MiscTransactionRequest,
    ) -> Result<MiscOutcome, BillingError> {
        request.validate()?;

        let request = &request;
        self.execute("record_misc_transaction", || async move {
            let mut tx = self.db().begin().await?;

            if let Some(member_id) = request.member_id {
                records::lock_member(&mut tx, member_id).await?;
            }

            let details = PaymentDetails {
                net_amount: request.total_amount,
                paid_amount: request.paid_amount,
                payment_date: request.payment_date,
                payment_mode: request.payment_mode.as_str(),
                proof: request.proof.as_ref(),
            };
            let transaction = records::insert_misc_transaction(
                &mut tx,
                request.member_id,
                &request.description,
                &details,
            )
            .await?;

            let credit = match request.member_id {
                Some(member_id) => Some(
                    credit::apply_delta(
                        &mut tx,
                        member_id,
                        credit::credit_delta(transaction.total_amount, transaction.paid_amount),
                    )
                    .await?,
                ),
                None => None,
            };

            let invoice = issue_invoice(
                &mut tx,
                PaymentReference::new(PaymentKind::MiscTransaction, transaction.misc_transaction_id),
            )
            .await?;
            commit(tx).await?;

            info!(
                misc_transaction_id = %transaction.misc_transaction_id,
                invoice_number = %invoice.invoice_number,
                "Miscellaneous transaction recorded"
            );

            Ok((
                MiscOutcome {
                    transaction,
                    invoice,
                    credit,
                },
                Vec::new(),
            ))
        })
        .await
    }

    /// Pay money back out. Refunds are never invoiced. A member refund returns
    /// advance credit, moving the balance up towards zero and never past it.
    #[instrument(skip(self, request), fields(member_id = ?request.member_id))]
    pub async fn record_refund(&self, request: RefundRequest) -> Result<RefundOutcome, BillingError> {
        request.validate()?;

        let request = &request;
        self.execute("record_refund", || async move {
            let mut tx = self.db().begin().await?;

            if let Some(member_id) = request.member_id {
                let member = records::lock_member(&mut tx, member_id).await?;
                credit::check_refund(member_id, member.credit, request.refund_amount)?;
            }

            let refund = records::insert_refund(
                &mut tx,
                request.member_id,
                &request.reason,
                request.refund_amount,
                request.payment_date,
                request.payment_mode.as_str(),
                request.proof.as_ref(),
            )
            .await?;

            let credit = match request.member_id {
                Some(member_id) => {
                    Some(credit::apply_delta(&mut tx, member_id, refund.refund_amount).await?)
                }
                None => None,
            };
            commit(tx).await?;

            info!(refund_id = %refund.refund_id, amount = refund.refund_amount, "Refund recorded");

            Ok((RefundOutcome { refund, credit }, Vec::new()))
        })
        .await
    }
}
