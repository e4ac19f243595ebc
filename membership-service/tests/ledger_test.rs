//! Unified payment ledger and credit reconciliation integration tests.

mod common;

use common::{date, locker_selection, renewal, spawn_app};
use membership_service::models::{PaymentKind, PaymentMode};
use membership_service::services::{
    ActorContext, LockerPurchase, MiscTransactionRequest, RefundRequest,
};

#[tokio::test]
async fn ledger_lists_every_kind_newest_first() {
    let Some(app) = spawn_app().await else { return };
    let package = app.package(500, 1000, (0, 0, 0)).await;
    let locker = app.locker(250).await;
    let member = app.register(&package, date(2025, 1, 1), 1, 1500).await;

    app.engine
        .renew_membership(
            renewal(member.member_id, 1, 1000, date(2025, 1, 30)),
            ActorContext::admin(),
        )
        .await
        .unwrap();
    app.engine
        .purchase_locker(LockerPurchase {
            member_id: member.member_id,
            selection: locker_selection(locker.locker_id, 1, 250),
            payment_date: date(2025, 1, 30),
            payment_mode: PaymentMode::Card,
            proof: None,
        })
        .await
        .unwrap();
    app.engine
        .record_misc_transaction(MiscTransactionRequest {
            member_id: Some(member.member_id),
            description: "Protein shake".to_string(),
            total_amount: 180,
            paid_amount: 210,
            payment_date: date(2025, 2, 3),
            payment_mode: PaymentMode::Cash,
            proof: None,
        })
        .await
        .unwrap();
    app.engine
        .record_refund(RefundRequest {
            member_id: Some(member.member_id),
            reason: "Overpaid shake".to_string(),
            refund_amount: 30,
            payment_date: date(2025, 2, 4),
            payment_mode: PaymentMode::Cash,
            proof: None,
        })
        .await
        .unwrap();

    let entries = app.db.all_payments(member.member_id).await.unwrap();
    let kinds: Vec<PaymentKind> = entries.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            PaymentKind::Refund,
            PaymentKind::MiscTransaction,
            PaymentKind::MembershipRenewal,
            PaymentKind::LockerPayment,
            PaymentKind::EntryPayment,
        ]
    );

    // Same payment date: insertion order breaks the tie.
    assert!(entries[2].record_seq < entries[3].record_seq);
    assert!(entries[4].invoice_number.is_some());
    assert!(entries[0].invoice_number.is_none());

    let again = app.db.all_payments(member.member_id).await.unwrap();
    assert_eq!(entries, again);
}

#[tokio::test]
async fn stored_credit_matches_ledger_after_mixed_activity() {
    let Some(app) = spawn_app().await else { return };
    let package = app.package(0, 1000, (0, 0, 0)).await;
    let member = app.register(&package, date(2025, 1, 1), 1, 400).await;

    app.engine
        .renew_membership(
            renewal(member.member_id, 2, 2700, date(2025, 2, 1)),
            ActorContext::admin(),
        )
        .await
        .unwrap();
    app.engine
        .record_refund(RefundRequest {
            member_id: Some(member.member_id),
            reason: "Advance returned".to_string(),
            refund_amount: 100,
            payment_date: date(2025, 2, 2),
            payment_mode: PaymentMode::BankTransfer,
            proof: None,
        })
        .await
        .unwrap();

    let report = app.db.reconcile_credit(member.member_id).await.unwrap();
    assert!(report.is_balanced());
    // 600 owed, a 700 overpayment leaves a 100 advance, which is paid back.
    assert_eq!(report.stored_credit, 0);
    assert_eq!(report.discrepancy(), 0);

    let (entries, totals) = app.db.member_statement(member.member_id).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(totals.overall.billed, 3000);
    assert_eq!(totals.overall.collected, 3100);
    assert_eq!(totals.overall.refunded, 100);
    assert_eq!(totals.overall.net_income(), 3000);
    assert_eq!(totals.overall.outstanding(), 0);
}

#[tokio::test]
async fn reconciling_unknown_member_is_not_found() {
    let Some(app) = spawn_app().await else { return };

    let err = app
        .db
        .reconcile_credit(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}
