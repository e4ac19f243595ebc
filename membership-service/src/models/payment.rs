//! Payment record models. All five kinds are immutable once written.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Discriminant shared by payment records, invoices, and ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    EntryPayment,
    MembershipRenewal,
    LockerPayment,
    MiscTransaction,
    Refund,
}

impl PaymentKind {
    /// Fixed merge order for the unified ledger.
    pub const ALL: [PaymentKind; 5] = [
        PaymentKind::EntryPayment,
        PaymentKind::MembershipRenewal,
        PaymentKind::LockerPayment,
        PaymentKind::MiscTransaction,
        PaymentKind::Refund,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::EntryPayment => "entry_payment",
            PaymentKind::MembershipRenewal => "membership_renewal",
            PaymentKind::LockerPayment => "locker_payment",
            PaymentKind::MiscTransaction => "misc_transaction",
            PaymentKind::Refund => "refund",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "entry_payment" => Some(PaymentKind::EntryPayment),
            "membership_renewal" => Some(PaymentKind::MembershipRenewal),
            "locker_payment" => Some(PaymentKind::LockerPayment),
            "misc_transaction" => Some(PaymentKind::MiscTransaction),
            "refund" => Some(PaymentKind::Refund),
            _ => None,
        }
    }

    /// Refunds pay money out and are never billed.
    pub fn is_invoiced(&self) -> bool {
        !matches!(self, PaymentKind::Refund)
    }
}

impl std::fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tagged pointer from an invoice to the payment record it bills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentReference {
    pub kind: PaymentKind,
    pub id: Uuid,
}

impl PaymentReference {
    pub fn new(kind: PaymentKind, id: Uuid) -> Self {
        Self { kind, id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Cash,
    Card,
    Upi,
    BankTransfer,
    Cheque,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Cash => "cash",
            PaymentMode::Card => "card",
            PaymentMode::Upi => "upi",
            PaymentMode::BankTransfer => "bank_transfer",
            PaymentMode::Cheque => "cheque",
        }
    }
}

/// Proof that money changed hands: a paper bill number or a stored document
/// reference. A record carries at most one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProof {
    BillNumber(String),
    Document(String),
}

impl PaymentProof {
    /// Split into the `(bill_number, payment_proof)` column pair.
    pub fn columns(proof: Option<&PaymentProof>) -> (Option<&str>, Option<&str>) {
        match proof {
            Some(PaymentProof::BillNumber(bill)) => (Some(bill.as_str()), None),
            Some(PaymentProof::Document(reference)) => (None, Some(reference.as_str())),
            None => (None, None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EntryPayment {
    pub entry_payment_id: Uuid,
    pub record_seq: i64,
    pub member_id: Uuid,
    pub package_id: Uuid,
    pub months: i32,
    pub admission_fee: i64,
    pub monthly_fee: i64,
    pub total_monthly_fees: i64,
    pub package_discount: i64,
    pub extra_discount: i64,
    pub net_amount: i64,
    pub paid_amount: i64,
    /// Coverage end requested with this payment.
    pub expiry_date: NaiveDate,
    pub payment_date: NaiveDate,
    pub payment_mode: String,
    pub bill_number: Option<String>,
    pub payment_proof: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MembershipRenewal {
    pub renewal_id: Uuid,
    pub record_seq: i64,
    pub member_id: Uuid,
    pub package_id: Uuid,
    pub months: i32,
    pub monthly_fee: i64,
    pub total_monthly_fees: i64,
    pub package_discount: i64,
    pub extra_discount: i64,
    pub net_amount: i64,
    pub paid_amount: i64,
    pub previous_expiry_date: NaiveDate,
    /// Expiry computed when the renewal was taken. Committed to the member
    /// immediately on the admin path, only after confirmation otherwise.
    pub expiry_date: NaiveDate,
    /// Taken on the public path and waiting for an admin to confirm it.
    pub requires_confirmation: bool,
    pub payment_date: NaiveDate,
    pub payment_mode: String,
    pub bill_number: Option<String>,
    pub payment_proof: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LockerPayment {
    pub locker_payment_id: Uuid,
    pub record_seq: i64,
    pub member_id: Uuid,
    pub locker_id: Uuid,
    pub months: i32,
    pub locker_price: i64,
    pub locker_discount: i64,
    pub net_amount: i64,
    pub paid_amount: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub payment_date: NaiveDate,
    pub payment_mode: String,
    pub bill_number: Option<String>,
    pub payment_proof: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MiscTransaction {
    pub misc_transaction_id: Uuid,
    pub record_seq: i64,
    /// `None` for walk-in sales.
    pub member_id: Option<Uuid>,
    pub description: String,
    pub total_amount: i64,
    pub paid_amount: i64,
    pub payment_date: NaiveDate,
    pub payment_mode: String,
    pub bill_number: Option<String>,
    pub payment_proof: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Refund {
    pub refund_id: Uuid,
    pub record_seq: i64,
    pub member_id: Option<Uuid>,
    pub reason: String,
    pub refund_amount: i64,
    pub payment_date: NaiveDate,
    pub payment_mode: String,
    pub bill_number: Option<String>,
    pub payment_proof: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Admin confirmation of a renewal taken on the public path.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RenewalConfirmation {
    pub renewal_id: Uuid,
    pub tentative_expiry_date: NaiveDate,
    pub confirmed_expiry_date: NaiveDate,
    pub confirmed_utc: DateTime<Utc>,
}

impl RenewalConfirmation {
    /// Whether the confirmed date differs from the one shown at submission.
    pub fn drifted(&self) -> bool {
        self.tentative_expiry_date != self.confirmed_expiry_date
    }
}
