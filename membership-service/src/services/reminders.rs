//! Daily reminder job run by the `membership-reminders` binary.

use crate::error::BillingError;
use crate::models::{Member, MembershipPackage};
use crate::services::collaborators::{
    Dispatcher, NotificationContext, NotificationKind, PostCommitEffect,
};
use crate::services::database::Database;
use chrono::{Days, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReminderSummary {
    pub expiry_reminders: usize,
    pub credit_reminders: usize,
    pub access_revoked: usize,
}

pub struct ReminderJob {
    db: Database,
    dispatcher: Dispatcher,
    lead_days: u64,
}

impl ReminderJob {
    pub fn new(db: Database, dispatcher: Dispatcher, lead_days: i64) -> Self {
        Self {
            db,
            dispatcher,
            lead_days: lead_days.max(0) as u64,
        }
    }

    /// Remind members expiring `lead_days` from `today`.
    #[instrument(skip(self))]
    pub async fn dispatch_expiry_reminders(&self, today: NaiveDate) -> Result<usize, BillingError> {
        let target = today
            .checked_add_days(Days::new(self.lead_days))
            .ok_or_else(|| BillingError::InvalidInput(anyhow::anyhow!("Reminder date out of range")))?;

        let members = self.db.members_expiring_on(target).await?;
        let effects = expiry_reminder_effects(&members);
        let sent = effects.len();
        self.dispatch_and_wait(effects).await?;

        info!(expiry_date = %target, reminders = sent, "Expiry reminders dispatched");
        Ok(sent)
    }

    /// Remind every member with a positive balance.
    #[instrument(skip(self))]
    pub async fn dispatch_credit_reminders(&self) -> Result<usize, BillingError> {
        let members = self.db.members_with_outstanding_credit().await?;
        let effects = credit_reminder_effects(&members);
        let sent = effects.len();
        self.dispatch_and_wait(effects).await?;

        info!(reminders = sent, "Credit reminders dispatched");
        Ok(sent)
    }

    /// Remove device access for members whose last paid day was yesterday.
    #[instrument(skip(self))]
    pub async fn revoke_lapsed_access(&self, today: NaiveDate) -> Result<usize, BillingError> {
        let yesterday = today
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| BillingError::InvalidInput(anyhow::anyhow!("Date out of range")))?;

        let members = self.db.members_expiring_on(yesterday).await?;
        let mut packages: HashMap<Uuid, MembershipPackage> = HashMap::new();
        let mut effects = Vec::with_capacity(members.len());

        for member in &members {
            if !packages.contains_key(&member.package_id) {
                let package = self.db.get_package(member.package_id).await?;
                packages.insert(member.package_id, package);
            }
            let device_ids = packages
                .get(&member.package_id)
                .map(|p| p.device_ids.clone())
                .unwrap_or_default();
            effects.push(PostCommitEffect::DeleteUser {
                user_id: member.member_id,
                device_ids,
            });
        }

        let revoked = effects.len();
        self.dispatch_and_wait(effects).await?;

        info!(expired_on = %yesterday, revoked = revoked, "Lapsed access revoked");
        Ok(revoked)
    }

    pub async fn run(&self, today: NaiveDate) -> Result<ReminderSummary, BillingError> {
        Ok(ReminderSummary {
            expiry_reminders: self.dispatch_expiry_reminders(today).await?,
            credit_reminders: self.dispatch_credit_reminders().await?,
            access_revoked: self.revoke_lapsed_access(today).await?,
        })
    }

    /// The binary exits when `run` returns, so wait for delivery here.
    async fn dispatch_and_wait(&self, effects: Vec<PostCommitEffect>) -> Result<(), BillingError> {
        if effects.is_empty() {
            return Ok(());
        }
        self.dispatcher
            .dispatch(effects)
            .await
            .map_err(|e| BillingError::Internal(anyhow::anyhow!("Reminder dispatch task failed: {}", e)))
    }
}

fn expiry_reminder_effects(members: &[Member]) -> Vec<PostCommitEffect> {
    members
        .iter()
        .map(|member| PostCommitEffect::Notify {
            kind: NotificationKind::ExpiryReminder,
            member: member.clone(),
            context: NotificationContext {
                expiry_date: Some(member.payment_expiry_date),
                credit: Some(member.credit),
                ..Default::default()
            },
        })
        .collect()
}

fn credit_reminder_effects(members: &[Member]) -> Vec<PostCommitEffect> {
    members
        .iter()
        .filter(|member| member.owes())
        .map(|member| PostCommitEffect::Notify {
            kind: NotificationKind::CreditReminder,
            member: member.clone(),
            context: NotificationContext {
                amount_due: Some(member.credit),
                credit: Some(member.credit),
                ..Default::default()
            },
        })
        .collect()
}
