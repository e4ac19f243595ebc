//! Locker and locker assignment models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Locker {
    pub locker_id: Uuid,
    pub locker_number: String,
    pub monthly_price: i64,
    pub created_utc: DateTime<Utc>,
}

/// A member's hold on a locker over a date window.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MemberLocker {
    pub member_locker_id: Uuid,
    pub member_id: Uuid,
    pub locker_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Locker requested alongside a registration or renewal, or on its own.
#[derive(Debug, Clone, Validate)]
pub struct LockerSelection {
    pub locker_id: Uuid,
    #[validate(range(min = 1))]
    pub months: i32,
    #[validate(range(min = 0))]
    pub discount: i64,
    #[validate(range(min = 0))]
    pub paid_amount: i64,
}
