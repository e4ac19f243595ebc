//! Self-service applications awaiting an admin decision.
//!
//! Approval converts the application through the matching workflow and deletes
//! it in the same transaction. Rejection deletes it. Neither leaves a row.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RegistrationApplication {
    pub application_id: Uuid,
    pub package_id: Uuid,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub photo_reference: Option<String>,
    pub requested_months: i32,
    pub start_date: NaiveDate,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RenewalApplication {
    pub application_id: Uuid,
    pub member_id: Uuid,
    pub requested_months: i32,
    pub payment_proof: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Validate)]
pub struct SubmitRegistrationApplication {
    pub package_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub full_name: String,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub photo_reference: Option<String>,
    #[validate(range(min = 0))]
    pub requested_months: i32,
    pub start_date: NaiveDate,
}

#[derive(Debug, Clone, Validate)]
pub struct SubmitRenewalApplication {
    pub member_id: Uuid,
    #[validate(range(min = 0))]
    pub requested_months: i32,
    /// Stored document reference for an uploaded payment screenshot.
    pub payment_proof: Option<String>,
}
