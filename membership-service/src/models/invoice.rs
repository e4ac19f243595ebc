//! Invoice model.

use super::payment::{PaymentKind, PaymentReference};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Issued invoice. Exactly one per invoiced payment record, never reused.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_seq: i64,
    pub invoice_number: String,
    pub payment_kind: String,
    pub payment_id: Uuid,
    pub issued_utc: DateTime<Utc>,
}

impl Invoice {
    /// Tagged reference to the billed record, if the stored kind is known.
    pub fn reference(&self) -> Option<PaymentReference> {
        PaymentKind::from_str(&self.payment_kind).map(|kind| PaymentReference::new(kind, self.payment_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice(kind: &str) -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_seq: 1,
            invoice_number: "INV-000001".to_string(),
            payment_kind: kind.to_string(),
            payment_id: Uuid::new_v4(),
            issued_utc: Utc::now(),
        }
    }

    #[test]
    fn reference_decodes_stored_kind() {
        let stored = invoice(PaymentKind::LockerPayment.as_str());
        assert_eq!(
            stored.reference(),
            Some(PaymentReference::new(PaymentKind::LockerPayment, stored.payment_id))
        );
        assert_eq!(invoice("gift_card").reference(), None);
    }
}
