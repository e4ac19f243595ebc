//! Member model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Membership status, derived on read and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Unapproved,
    Active,
    Expired,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Unapproved => "unapproved",
            MemberStatus::Active => "active",
            MemberStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Member {
    pub member_id: Uuid,
    pub package_id: Uuid,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub photo_reference: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub payment_expiry_date: NaiveDate,
    /// Positive: the member owes the gym. Negative: advance paid.
    pub credit: i64,
    pub is_approved: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Member {
    /// Status as of `today`. The expiry date itself is still a paid day.
    pub fn status_on(&self, today: NaiveDate) -> MemberStatus {
        if !self.is_approved {
            MemberStatus::Unapproved
        } else if self.payment_expiry_date < today {
            MemberStatus::Expired
        } else {
            MemberStatus::Active
        }
    }

    pub fn owes(&self) -> bool {
        self.credit > 0
    }
}

/// Identity details for a new member.
#[derive(Debug, Clone, Validate)]
pub struct NewMember {
    #[validate(length(min = 1, max = 255))]
    pub full_name: String,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    /// Reference returned by file storage for the member photo.
    pub photo_reference: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

#[cfg(test)]
pub(crate) fn test_member(is_approved: bool, expiry: NaiveDate) -> Member {
    Member {
        member_id: Uuid::new_v4(),
        package_id: Uuid::new_v4(),
        full_name: "Asha Verma".to_string(),
        phone: Some("+911234567890".to_string()),
        email: None,
        photo_reference: None,
        start_date: expiry - chrono::Months::new(1),
        end_date: None,
        payment_expiry_date: expiry,
        credit: 0,
        is_approved,
        created_utc: Utc::now(),
        updated_utc: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn unapproved_wins_over_expiry() {
        let member = test_member(false, date(2030, 1, 1));
        assert_eq!(member.status_on(date(2025, 1, 1)), MemberStatus::Unapproved);
    }

    #[test]
    fn expiry_day_is_still_active() {
        let member = test_member(true, date(2025, 3, 31));
        assert_eq!(member.status_on(date(2025, 3, 31)), MemberStatus::Active);
        assert_eq!(member.status_on(date(2025, 4, 1)), MemberStatus::Expired);
    }
}
