//! Atomic billing workflows.
//!
//! Every workflow runs its writes in one transaction: payment record, credit
//! delta, invoice, and locker assignment commit together or not at all. A lost
//! invoice sequence race reruns the attempt from scratch; collaborator calls
//! are dispatched only after a successful commit.

mod applications;
mod locker;
mod registration;
mod renewal;
mod transactions;

pub use applications::ApplicationTerms;
pub use locker::{plan_locker_window, LockerOutcome, LockerPlan};
pub use registration::{
    plan_registration, ApprovalOutcome, RegistrationOutcome, RegistrationPlan, RegistrationRequest,
};
pub use renewal::{
    next_expiry, plan_renewal, ConfirmationOutcome, RenewalOutcome, RenewalPlan, RenewalRequest,
};
pub use transactions::{
    LockerPurchase, LockerPurchaseOutcome, MiscOutcome, MiscTransactionRequest, RefundOutcome,
    RefundRequest,
};

use crate::error::BillingError;
use crate::models::{Member, MembershipPackage};
use crate::services::collaborators::{
    Dispatcher, NotificationContext, NotificationKind, PostCommitEffect,
};
use crate::services::database::Database;
use crate::services::retry::{run_with_retry, RetryConfig};
use serde::Serialize;
use sqlx::{Postgres, Transaction};
use std::future::Future;
use uuid::Uuid;

/// Who is driving a workflow. Replaces ambient session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorContext {
    pub is_admin: bool,
}

impl ActorContext {
    pub fn admin() -> Self {
        Self { is_admin: true }
    }

    pub fn public() -> Self {
        Self { is_admin: false }
    }

    fn require_admin(&self, operation: &str) -> Result<(), BillingError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(BillingError::InvalidInput(anyhow::anyhow!(
                "{} requires an admin actor",
                operation
            )))
        }
    }
}

/// Where a registration or renewal ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Approved,
    PendingApproval,
}

impl ApprovalState {
    fn for_actor(actor: ActorContext) -> Self {
        if actor.is_admin {
            ApprovalState::Approved
        } else {
            ApprovalState::PendingApproval
        }
    }
}

/// Entry point for every billing workflow.
#[derive(Clone)]
pub struct BillingEngine {
    db: Database,
    dispatcher: Dispatcher,
    retry: RetryConfig,
}

impl BillingEngine {
    pub fn new(db: Database, dispatcher: Dispatcher, retry: RetryConfig) -> Self {
        Self {
            db,
            dispatcher,
            retry,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run `attempt` with sequence-conflict retries, then hand its effects to
    /// the dispatcher. Only the outcome reaches the caller.
    async fn execute<T, F, Fut>(&self, operation: &str, attempt: F) -> Result<T, BillingError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(T, Vec<PostCommitEffect>), BillingError>>,
    {
        let (outcome, effects) = run_with_retry(&self.retry, operation, attempt).await?;
        if !effects.is_empty() {
            // Detached: the caller never waits on collaborators.
            drop(self.dispatcher.dispatch(effects));
        }
        Ok(outcome)
    }

    /// Push a staff member's access to the given devices.
    pub fn sync_staff(&self, staff_id: Uuid, full_name: &str, device_ids: Vec<String>) {
        drop(self.dispatcher.dispatch(vec![PostCommitEffect::SyncStaff {
            staff_id,
            full_name: full_name.to_string(),
            device_ids,
        }]));
    }
}

async fn commit(tx: Transaction<'_, Postgres>) -> Result<(), BillingError> {
    tx.commit()
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to commit transaction", e))
}

fn not_found_member(member_id: Uuid) -> BillingError {
    BillingError::NotFound(anyhow::anyhow!("Member {} not found", member_id))
}

/// Grant access on the package's devices and tell the member.
fn access_granted_effects(
    member: &Member,
    package: &MembershipPackage,
    kind: NotificationKind,
    context: NotificationContext,
) -> Vec<PostCommitEffect> {
    vec![
        PostCommitEffect::SyncMember {
            member: member.clone(),
            device_ids: package.device_ids.clone(),
        },
        PostCommitEffect::Notify {
            kind,
            member: member.clone(),
            context,
        },
    ]
}
