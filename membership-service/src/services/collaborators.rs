//! Outbound collaborators: member messaging and access-control device sync.
//!
//! Workflows never call these directly. They return [`PostCommitEffect`]s that
//! the [`Dispatcher`] runs on a detached task once the transaction committed.
//! A failed call is logged and counted, nothing more.

use crate::error::{BillingError, NotificationDispatchError};
use crate::models::Member;
use crate::services::metrics::record_dispatch;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Creation,
    Renewal,
    CreditReminder,
    ExpiryReminder,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Creation => "creation",
            NotificationKind::Renewal => "renewal",
            NotificationKind::CreditReminder => "credit_reminder",
            NotificationKind::ExpiryReminder => "expiry_reminder",
        }
    }
}

/// Message details that vary by notification kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotificationContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_due: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit: Option<i64>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        kind: NotificationKind,
        member: &Member,
        context: &NotificationContext,
    ) -> Result<(), NotificationDispatchError>;
}

/// Access-control device client. Device ids come from the member's package.
#[async_trait]
pub trait DeviceSync: Send + Sync {
    async fn sync_member(
        &self,
        member: &Member,
        device_ids: &[String],
    ) -> Result<(), NotificationDispatchError>;

    async fn sync_staff(
        &self,
        staff_id: Uuid,
        full_name: &str,
        device_ids: &[String],
    ) -> Result<(), NotificationDispatchError>;

    async fn delete_user(
        &self,
        user_id: Uuid,
        device_ids: &[String],
    ) -> Result<(), NotificationDispatchError>;
}

/// Side effect produced by a committed workflow.
#[derive(Debug, Clone)]
pub enum PostCommitEffect {
    Notify {
        kind: NotificationKind,
        member: Member,
        context: NotificationContext,
    },
    SyncMember {
        member: Member,
        device_ids: Vec<String>,
    },
    SyncStaff {
        staff_id: Uuid,
        full_name: String,
        device_ids: Vec<String>,
    },
    DeleteUser {
        user_id: Uuid,
        device_ids: Vec<String>,
    },
}

impl PostCommitEffect {
    fn collaborator(&self) -> &'static str {
        match self {
            PostCommitEffect::Notify { .. } => "notifier",
            _ => "device_sync",
        }
    }
}

/// Runs post-commit effects without blocking the caller.
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    devices: Arc<dyn DeviceSync>,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, devices: Arc<dyn DeviceSync>) -> Self {
        Self { notifier, devices }
    }

    /// Dispatcher whose collaborators accept and drop every call.
    pub fn disabled() -> Self {
        let noop = Arc::new(DisabledCollaborator);
        Self::new(noop.clone(), noop)
    }

    /// Spawn the effects in order on a detached task. The handle is only for
    /// callers that want to wait, such as tests and the reminder job.
    pub fn dispatch(&self, effects: Vec<PostCommitEffect>) -> JoinHandle<()> {
        let dispatcher = self.clone();
        let span = tracing::info_span!("post_commit_dispatch", effects = effects.len());

        tokio::spawn(
            async move {
                for effect in effects {
                    dispatcher.run(effect).await;
                }
            }
            .instrument(span),
        )
    }

    async fn run(&self, effect: PostCommitEffect) {
        let collaborator = effect.collaborator();
        let result = match &effect {
            PostCommitEffect::Notify {
                kind,
                member,
                context,
            } => self.notifier.notify(*kind, member, context).await,
            PostCommitEffect::SyncMember { member, device_ids } => {
                self.devices.sync_member(member, device_ids).await
            }
            PostCommitEffect::SyncStaff {
                staff_id,
                full_name,
                device_ids,
            } => self.devices.sync_staff(*staff_id, full_name, device_ids).await,
            PostCommitEffect::DeleteUser {
                user_id,
                device_ids,
            } => self.devices.delete_user(*user_id, device_ids).await,
        };

        match result {
            Ok(()) => record_dispatch(collaborator, "success"),
            Err(e) => {
                warn!(collaborator = collaborator, error = %e, "Post-commit dispatch failed");
                record_dispatch(collaborator, "failed");
            }
        }
    }
}

fn http_client(timeout: Duration) -> Result<Client, BillingError> {
    Client::builder().timeout(timeout).build().map_err(|e| {
        BillingError::Config(anyhow::anyhow!("Failed to create HTTP client: {}", e))
    })
}

async fn check_response(response: reqwest::Response) -> Result<(), NotificationDispatchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(NotificationDispatchError::Rejected {
        status: status.as_u16(),
        body,
    })
}

/// Messaging gateway client.
pub struct HttpNotifier {
    base_url: String,
    client: Client,
}

impl HttpNotifier {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BillingError> {
        info!(endpoint = %base_url, "Notification client configured");
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    #[instrument(skip(self, member, context), fields(kind = kind.as_str(), member_id = %member.member_id))]
    async fn notify(
        &self,
        kind: NotificationKind,
        member: &Member,
        context: &NotificationContext,
    ) -> Result<(), NotificationDispatchError> {
        let response = self
            .client
            .post(format!("{}/notifications", self.base_url))
            .json(&json!({
                "kind": kind,
                "member_id": member.member_id,
                "full_name": member.full_name,
                "phone": member.phone,
                "email": member.email,
                "context": context,
            }))
            .send()
            .await?;

        check_response(response).await?;
        debug!("Notification accepted");
        Ok(())
    }
}

/// Access-control device bridge client.
pub struct HttpDeviceSync {
    base_url: String,
    client: Client,
}

impl HttpDeviceSync {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BillingError> {
        info!(endpoint = %base_url, "Device sync client configured");
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl DeviceSync for HttpDeviceSync {
    #[instrument(skip(self, member), fields(member_id = %member.member_id))]
    async fn sync_member(
        &self,
        member: &Member,
        device_ids: &[String],
    ) -> Result<(), NotificationDispatchError> {
        let response = self
            .client
            .post(format!("{}/users/members", self.base_url))
            .json(&json!({
                "user_id": member.member_id,
                "full_name": member.full_name,
                "photo_reference": member.photo_reference,
                "valid_until": member.payment_expiry_date,
                "enabled": member.is_approved,
                "device_ids": device_ids,
            }))
            .send()
            .await?;

        check_response(response).await
    }

    #[instrument(skip(self, full_name))]
    async fn sync_staff(
        &self,
        staff_id: Uuid,
        full_name: &str,
        device_ids: &[String],
    ) -> Result<(), NotificationDispatchError> {
        let response = self
            .client
            .post(format!("{}/users/staff", self.base_url))
            .json(&json!({
                "user_id": staff_id,
                "full_name": full_name,
                "device_ids": device_ids,
            }))
            .send()
            .await?;

        check_response(response).await
    }

    #[instrument(skip(self))]
    async fn delete_user(
        &self,
        user_id: Uuid,
        device_ids: &[String],
    ) -> Result<(), NotificationDispatchError> {
        let response = self
            .client
            .delete(format!("{}/users/{}", self.base_url, user_id))
            .json(&json!({ "device_ids": device_ids }))
            .send()
            .await?;

        check_response(response).await
    }
}

/// Stand-in used when a collaborator URL is not configured.
pub struct DisabledCollaborator;

#[async_trait]
impl Notifier for DisabledCollaborator {
    async fn notify(
        &self,
        kind: NotificationKind,
        member: &Member,
        _context: &NotificationContext,
    ) -> Result<(), NotificationDispatchError> {
        debug!(kind = kind.as_str(), member_id = %member.member_id, "Notifications disabled, skipping");
        Ok(())
    }
}

#[async_trait]
impl DeviceSync for DisabledCollaborator {
    async fn sync_member(
        &self,
        member: &Member,
        _device_ids: &[String],
    ) -> Result<(), NotificationDispatchError> {
        debug!(member_id = %member.member_id, "Device sync disabled, skipping");
        Ok(())
    }

    async fn sync_staff(
        &self,
        staff_id: Uuid,
        _full_name: &str,
        _device_ids: &[String],
    ) -> Result<(), NotificationDispatchError> {
        debug!(staff_id = %staff_id, "Device sync disabled, skipping");
        Ok(())
    }

    async fn delete_user(
        &self,
        user_id: Uuid,
        _device_ids: &[String],
    ) -> Result<(), NotificationDispatchError> {
        debug!(user_id = %user_id, "Device sync disabled, skipping");
        Ok(())
    }
}
