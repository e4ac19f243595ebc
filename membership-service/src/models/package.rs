//! Membership package model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Pricing for a membership plan. Term discounts are flat amounts in the
/// smallest currency unit, not percentages.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MembershipPackage {
    pub package_id: Uuid,
    pub name: String,
    pub admission_amount: i64,
    pub monthly_amount: i64,
    pub discount_quarterly: i64,
    pub discount_half_yearly: i64,
    pub discount_yearly: i64,
    pub default_months: i32,
    pub device_ids: Vec<String>,
    pub created_utc: DateTime<Utc>,
}

impl MembershipPackage {
    /// Flat discount for a term. Only exact 3/6/12 month terms qualify.
    pub fn term_discount(&self, months: i32) -> i64 {
        match months {
            3 => self.discount_quarterly,
            6 => self.discount_half_yearly,
            12 => self.discount_yearly,
            _ => 0,
        }
    }
}

/// Input for creating a package.
#[derive(Debug, Clone, Validate)]
pub struct CreatePackage {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(range(min = 0))]
    pub admission_amount: i64,
    #[validate(range(min = 0))]
    pub monthly_amount: i64,
    #[validate(range(min = 0))]
    pub discount_quarterly: i64,
    #[validate(range(min = 0))]
    pub discount_half_yearly: i64,
    #[validate(range(min = 0))]
    pub discount_yearly: i64,
    #[validate(range(min = 0))]
    pub default_months: i32,
    pub device_ids: Vec<String>,
}

#[cfg(test)]
pub(crate) fn test_package(admission: i64, monthly: i64, tiers: (i64, i64, i64)) -> MembershipPackage {
    MembershipPackage {
        package_id: Uuid::new_v4(),
        name: "Standard".to_string(),
        admission_amount: admission,
        monthly_amount: monthly,
        discount_quarterly: tiers.0,
        discount_half_yearly: tiers.1,
        discount_yearly: tiers.2,
        default_months: 1,
        device_ids: vec!["door-1".to_string()],
        created_utc: Utc::now(),
    }
}
