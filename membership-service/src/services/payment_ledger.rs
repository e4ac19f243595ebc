//! Unified payment ledger: every payment kind for a member as one sorted list.
//!
//! Each record type normalizes itself into a [`LedgerEntry`]; the merge only
//! sorts already-normalized values and never touches stored records.

use crate::models::{
    EntryPayment, LedgerEntry, LockerPayment, MembershipRenewal, MiscTransaction, PaymentKind,
    PaymentReference, Refund,
};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Normalization into the common ledger shape.
pub trait LedgerSource {
    const KIND: PaymentKind;

    fn payment_id(&self) -> Uuid;

    fn reference(&self) -> PaymentReference {
        PaymentReference::new(Self::KIND, self.payment_id())
    }

    fn to_ledger_entry(&self, invoice_number: Option<String>) -> LedgerEntry;
}

impl LedgerSource for EntryPayment {
    const KIND: PaymentKind = PaymentKind::EntryPayment;

    fn payment_id(&self) -> Uuid {
        self.entry_payment_id
    }

    fn to_ledger_entry(&self, invoice_number: Option<String>) -> LedgerEntry {
        LedgerEntry {
            kind: PaymentKind::EntryPayment,
            payment_id: self.entry_payment_id,
            member_id: Some(self.member_id),
            payment_date: self.payment_date,
            payment_mode: self.payment_mode.clone(),
            net_amount: self.net_amount,
            paid_amount: self.paid_amount,
            refund_amount: 0,
            invoice_number,
            record_seq: self.record_seq,
        }
    }
}

impl LedgerSource for MembershipRenewal {
    const KIND: PaymentKind = PaymentKind::MembershipRenewal;

    fn payment_id(&self) -> Uuid {
        self.renewal_id
    }

    fn to_ledger_entry(&self, invoice_number: Option<String>) -> LedgerEntry {
        LedgerEntry {
            kind: PaymentKind::MembershipRenewal,
            payment_id: self.renewal_id,
            member_id: Some(self.member_id),
            payment_date: self.payment_date,
            payment_mode: self.payment_mode.clone(),
            net_amount: self.net_amount,
            paid_amount: self.paid_amount,
            refund_amount: 0,
            invoice_number,
            record_seq: self.record_seq,
        }
    }
}

impl LedgerSource for LockerPayment {
    const KIND: PaymentKind = PaymentKind::LockerPayment;

    fn payment_id(&self) -> Uuid {
        self.locker_payment_id
    }

    fn to_ledger_entry(&self, invoice_number: Option<String>) -> LedgerEntry {
        LedgerEntry {
            kind: PaymentKind::LockerPayment,
            payment_id: self.locker_payment_id,
            member_id: Some(self.member_id),
            payment_date: self.payment_date,
            payment_mode: self.payment_mode.clone(),
            net_amount: self.net_amount,
            paid_amount: self.paid_amount,
            refund_amount: 0,
            invoice_number,
            record_seq: self.record_seq,
        }
    }
}

impl LedgerSource for MiscTransaction {
    const KIND: PaymentKind = PaymentKind::MiscTransaction;

    fn payment_id(&self) -> Uuid {
        self.misc_transaction_id
    }

    fn to_ledger_entry(&self, invoice_number: Option<String>) -> LedgerEntry {
        LedgerEntry {
            kind: PaymentKind::MiscTransaction,
            payment_id: self.misc_transaction_id,
            member_id: self.member_id,
            payment_date: self.payment_date,
            payment_mode: self.payment_mode.clone(),
            net_amount: self.total_amount,
            paid_amount: self.paid_amount,
            refund_amount: 0,
            invoice_number,
            record_seq: self.record_seq,
        }
    }
}

impl LedgerSource for Refund {
    const KIND: PaymentKind = PaymentKind::Refund;

    fn payment_id(&self) -> Uuid {
        self.refund_id
    }

    fn to_ledger_entry(&self, _invoice_number: Option<String>) -> LedgerEntry {
        LedgerEntry {
            kind: PaymentKind::Refund,
            payment_id: self.refund_id,
            member_id: self.member_id,
            payment_date: self.payment_date,
            payment_mode: self.payment_mode.clone(),
            net_amount: 0,
            paid_amount: 0,
            refund_amount: self.refund_amount,
            invoice_number: None,
            record_seq: self.record_seq,
        }
    }
}

/// Normalize one kind's records, attaching invoice numbers where issued.
pub fn normalize<T: LedgerSource>(
    records: &[T],
    invoice_numbers: &HashMap<PaymentReference, String>,
) -> Vec<LedgerEntry> {
    records
        .iter()
        .map(|r| r.to_ledger_entry(invoice_numbers.get(&r.reference()).cloned()))
        .collect()
}

/// Merge per-kind entry lists, most recent payment date first. Entries on the
/// same date keep insertion order.
pub fn merge_ledger<I>(groups: I) -> Vec<LedgerEntry>
where
    I: IntoIterator<Item = Vec<LedgerEntry>>,
{
    let mut merged: Vec<LedgerEntry> = groups.into_iter().flatten().collect();
    merged.sort_by(|a, b| {
        b.payment_date
            .cmp(&a.payment_date)
            .then(a.record_seq.cmp(&b.record_seq))
    });
    merged
}

/// Amounts for one payment kind, or for the whole statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindTotals {
    pub count: usize,
    pub billed: i64,
    pub collected: i64,
    pub refunded: i64,
}

impl KindTotals {
    fn add(&mut self, entry: &LedgerEntry) {
        self.count += 1;
        self.billed += entry.net_amount;
        self.collected += entry.paid_amount;
        self.refunded += entry.refund_amount;
    }

    /// Income minus money paid back out.
    pub fn net_income(&self) -> i64 {
        self.collected - self.refunded
    }

    /// Billed but not yet collected, after refunds of advances.
    pub fn outstanding(&self) -> i64 {
        self.billed - self.collected + self.refunded
    }
}

/// Aggregates handed to the statement exporter alongside the entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatementTotals {
    pub overall: KindTotals,
    pub by_kind: Vec<(PaymentKind, KindTotals)>,
}

pub fn statement_totals(entries: &[LedgerEntry]) -> StatementTotals {
    let mut overall = KindTotals::default();
    let mut by_kind: HashMap<PaymentKind, KindTotals> = HashMap::new();

    for entry in entries {
        overall.add(entry);
        by_kind.entry(entry.kind).or_default().add(entry);
    }

    StatementTotals {
        overall,
        by_kind: PaymentKind::ALL
            .into_iter()
            .filter_map(|kind| by_kind.remove(&kind).map(|totals| (kind, totals)))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn renewal(seq: i64, on: NaiveDate, net: i64, paid: i64) -> MembershipRenewal {
        MembershipRenewal {
            renewal_id: Uuid::new_v4(),
            record_seq: seq,
            member_id: Uuid::nil(),
            package_id: Uuid::nil(),
            months: 1,
            monthly_fee: net,
            total_monthly_fees: net,
            package_discount: 0,
            extra_discount: 0,
            net_amount: net,
            paid_amount: paid,
            previous_expiry_date: on,
            expiry_date: on,
            requires_confirmation: false,
            payment_date: on,
            payment_mode: "cash".to_string(),
            bill_number: None,
            payment_proof: None,
            created_utc: Utc::now(),
        }
    }

    fn misc(seq: i64, on: NaiveDate, total: i64, paid: i64) -> MiscTransaction {
        MiscTransaction {
            misc_transaction_id: Uuid::new_v4(),
            record_seq: seq,
            member_id: Some(Uuid::nil()),
            description: "Protein shake".to_string(),
            total_amount: total,
            paid_amount: paid,
            payment_date: on,
            payment_mode: "upi".to_string(),
            bill_number: None,
            payment_proof: None,
            created_utc: Utc::now(),
        }
    }

    fn refund(seq: i64, on: NaiveDate, amount: i64) -> Refund {
        Refund {
            refund_id: Uuid::new_v4(),
            record_seq: seq,
            member_id: Some(Uuid::nil()),
            reason: "Advance returned".to_string(),
            refund_amount: amount,
            payment_date: on,
            payment_mode: "cash".to_string(),
            bill_number: None,
            payment_proof: None,
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn misc_total_is_exposed_as_net_amount() {
        let record = misc(1, date(2025, 2, 1), 450, 400);
        let entry = record.to_ledger_entry(Some("INV-000004".to_string()));

        assert_eq!(entry.kind, PaymentKind::MiscTransaction);
        assert_eq!(entry.net_amount, 450);
        assert_eq!(entry.paid_amount, 400);
        assert_eq!(entry.refund_amount, 0);
        assert_eq!(entry.credit_delta(), 50);
    }

    #[test]
    fn refund_has_no_paid_amount_and_no_invoice() {
        let entry = refund(1, date(2025, 2, 1), 700).to_ledger_entry(Some("INV-000001".to_string()));

        assert_eq!(entry.paid_amount, 0);
        assert_eq!(entry.net_amount, 0);
        assert_eq!(entry.refund_amount, 700);
        assert_eq!(entry.invoice_number, None);
        assert_eq!(entry.credit_delta(), 700);
    }

    #[test]
    fn normalize_attaches_invoice_numbers_by_reference() {
        let first = renewal(1, date(2025, 1, 1), 100, 100);
        let second = renewal(2, date(2025, 2, 1), 100, 100);
        let invoices = HashMap::from([
            (first.reference(), "INV-000010".to_string()),
            // Same id under another kind must not attach.
            (
                PaymentReference::new(PaymentKind::MiscTransaction, second.renewal_id),
                "INV-000011".to_string(),
            ),
        ]);

        let entries = normalize(&[first, second], &invoices);
        assert_eq!(entries[0].invoice_number.as_deref(), Some("INV-000010"));
        assert_eq!(entries[1].invoice_number, None);
    }

    #[test]
    fn merge_sorts_descending_with_insertion_order_on_ties() {
        let renewals = normalize(
            &[
                renewal(1, date(2025, 1, 10), 100, 100),
                renewal(5, date(2025, 3, 1), 100, 100),
            ],
            &HashMap::new(),
        );
        let miscs = normalize(
            &[misc(2, date(2025, 3, 1), 50, 50), misc(3, date(2025, 2, 1), 20, 0)],
            &HashMap::new(),
        );
        let refunds = normalize(&[refund(4, date(2025, 3, 1), 10)], &HashMap::new());

        let merged = merge_ledger(vec![renewals, miscs, refunds]);
        let order: Vec<(NaiveDate, i64)> = merged
            .iter()
            .map(|e| (e.payment_date, e.record_seq))
            .collect();

        assert_eq!(
            order,
            vec![
                (date(2025, 3, 1), 2),
                (date(2025, 3, 1), 4),
                (date(2025, 3, 1), 5),
                (date(2025, 2, 1), 3),
                (date(2025, 1, 10), 1),
            ]
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let groups = || {
            vec![
                normalize(&[renewal(1, date(2025, 1, 1), 10, 0)], &HashMap::new()),
                normalize(&[misc(2, date(2025, 1, 1), 5, 5)], &HashMap::new()),
            ]
        };
        // Record ids are random per call, so compare shape only.
        let shape = |entries: Vec<LedgerEntry>| -> Vec<(PaymentKind, i64)> {
            entries.into_iter().map(|e| (e.kind, e.record_seq)).collect()
        };
        assert_eq!(shape(merge_ledger(groups())), shape(merge_ledger(groups())));
    }

    #[test]
    fn totals_split_by_kind_in_fixed_order() {
        let entries = merge_ledger(vec![
            normalize(&[refund(3, date(2025, 1, 3), 200)], &HashMap::new()),
            normalize(&[renewal(1, date(2025, 1, 1), 6000, 5000)], &HashMap::new()),
            normalize(&[misc(2, date(2025, 1, 2), 300, 300)], &HashMap::new()),
        ]);

        let totals = statement_totals(&entries);
        assert_eq!(totals.overall.count, 3);
        assert_eq!(totals.overall.billed, 6300);
        assert_eq!(totals.overall.collected, 5300);
        assert_eq!(totals.overall.refunded, 200);
        assert_eq!(totals.overall.net_income(), 5100);
        assert_eq!(totals.overall.outstanding(), 1200);

        let kinds: Vec<PaymentKind> = totals.by_kind.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                PaymentKind::MembershipRenewal,
                PaymentKind::MiscTransaction,
                PaymentKind::Refund
            ]
        );
    }
}
