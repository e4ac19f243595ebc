//! Renewal and renewal confirmation integration tests.

mod common;

use common::{date, locker_selection, renewal, spawn_app, Call};
use membership_service::models::PaymentMode;
use membership_service::services::{ActorContext, ApprovalState, NotificationKind};

#[tokio::test]
async fn admin_renewal_extends_from_current_expiry() {
    let Some(app) = spawn_app().await else { return };
    let package = app.package(0, 2200, (0, 0, 0)).await;
    let member = app.register(&package, date(2024, 12, 31), 3, 6600).await;
    assert_eq!(member.payment_expiry_date, date(2025, 3, 31));

    let outcome = app
        .engine
        .renew_membership(
            renewal(member.member_id, 6, 13200, date(2025, 3, 20)),
            ActorContext::admin(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.approval, ApprovalState::Approved);
    assert_eq!(outcome.fees.net_amount, 13200);
    assert_eq!(outcome.renewal.previous_expiry_date, date(2025, 3, 31));
    assert_eq!(outcome.renewal.expiry_date, date(2025, 9, 30));
    assert!(!outcome.renewal.requires_confirmation);
    assert_eq!(outcome.member.payment_expiry_date, date(2025, 9, 30));
    assert_eq!(outcome.credit.delta, 0);
    assert_eq!(outcome.member.credit, 0);

    let calls = app.collaborators.wait_for(member.member_id, 4).await;
    assert_eq!(calls.len(), 4);
    assert!(calls.contains(&Call::Notify(NotificationKind::Renewal, member.member_id)));
    assert_eq!(
        calls
            .iter()
            .filter(|call| matches!(call, Call::SyncMember(..)))
            .count(),
        2
    );
}

#[tokio::test]
async fn underpaid_renewal_adds_to_credit() {
    let Some(app) = spawn_app().await else { return };
    let package = app.package(0, 1000, (150, 0, 0)).await;
    let member = app.register(&package, date(2025, 1, 1), 1, 1000).await;

    let mut request = renewal(member.member_id, 3, 2000, date(2025, 2, 1));
    request.extra_discount = 50;
    request.payment_mode = PaymentMode::Upi;
    let outcome = app
        .engine
        .renew_membership(request, ActorContext::admin())
        .await
        .unwrap();

    // 3000 less the quarterly 150 and the extra 50.
    assert_eq!(outcome.fees.net_amount, 2800);
    assert_eq!(outcome.renewal.payment_mode, "upi");
    assert_eq!(outcome.credit.delta, 800);
    assert_eq!(outcome.member.credit, 800);
}

#[tokio::test]
async fn public_renewal_leaves_expiry_until_confirmed() {
    let Some(app) = spawn_app().await else { return };
    let package = app.package(0, 2000, (0, 0, 0)).await;
    let member = app.register(&package, date(2025, 1, 1), 1, 2000).await;

    let outcome = app
        .engine
        .renew_membership(
            renewal(member.member_id, 1, 2000, date(2025, 1, 28)),
            ActorContext::public(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.approval, ApprovalState::PendingApproval);
    assert!(outcome.renewal.requires_confirmation);
    assert_eq!(outcome.renewal.expiry_date, date(2025, 3, 1));
    assert_eq!(outcome.member.payment_expiry_date, date(2025, 2, 1));
    assert!(!outcome.member.is_approved);

    let confirmed = app
        .engine
        .confirm_renewal(outcome.renewal.renewal_id, None, ActorContext::admin())
        .await
        .unwrap();

    assert!(!confirmed.drifted);
    assert!(confirmed.member.is_approved);
    assert_eq!(confirmed.member.payment_expiry_date, date(2025, 3, 1));
    assert_eq!(confirmed.confirmation.tentative_expiry_date, date(2025, 3, 1));
}

#[tokio::test]
async fn confirmation_reports_drift_from_tentative_expiry() {
    let Some(app) = spawn_app().await else { return };
    let package = app.package(0, 2000, (0, 0, 0)).await;
    let member = app.register(&package, date(2025, 1, 1), 1, 2000).await;

    let outcome = app
        .engine
        .renew_membership(
            renewal(member.member_id, 1, 2000, date(2025, 1, 28)),
            ActorContext::public(),
        )
        .await
        .unwrap();
    let renewal_id = outcome.renewal.renewal_id;

    let confirmed = app
        .engine
        .confirm_renewal(renewal_id, Some(date(2025, 3, 15)), ActorContext::admin())
        .await
        .unwrap();
    assert!(confirmed.drifted);
    assert_eq!(confirmed.confirmation.tentative_expiry_date, date(2025, 3, 1));
    assert_eq!(confirmed.confirmation.confirmed_expiry_date, date(2025, 3, 15));
    assert_eq!(confirmed.member.payment_expiry_date, date(2025, 3, 15));

    let err = app
        .engine
        .confirm_renewal(renewal_id, None, ActorContext::admin())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");
}

#[tokio::test]
async fn concurrent_confirmations_commit_once() {
    let Some(app) = spawn_app().await else { return };
    let package = app.package(0, 2000, (0, 0, 0)).await;
    let member = app.register(&package, date(2025, 1, 1), 1, 2000).await;

    let outcome = app
        .engine
        .renew_membership(
            renewal(member.member_id, 1, 2000, date(2025, 1, 28)),
            ActorContext::public(),
        )
        .await
        .unwrap();
    let renewal_id = outcome.renewal.renewal_id;

    let (first, second) = tokio::join!(
        app.engine.confirm_renewal(renewal_id, None, ActorContext::admin()),
        app.engine.confirm_renewal(renewal_id, None, ActorContext::admin()),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results
        .iter()
        .find_map(|r| r.as_ref().err())
        .expect("second confirmation must fail");
    assert_eq!(err.kind(), "conflict");

    let confirmed = app.db.get_member(member.member_id).await.unwrap();
    assert_eq!(confirmed.payment_expiry_date, date(2025, 3, 1));
}

#[tokio::test]
async fn only_public_renewals_need_confirmation() {
    let Some(app) = spawn_app().await else { return };
    let package = app.package(0, 2000, (0, 0, 0)).await;
    let member = app.register(&package, date(2025, 1, 1), 1, 2000).await;

    let outcome = app
        .engine
        .renew_membership(
            renewal(member.member_id, 1, 2000, date(2025, 1, 28)),
            ActorContext::admin(),
        )
        .await
        .unwrap();

    let err = app
        .engine
        .confirm_renewal(outcome.renewal.renewal_id, None, ActorContext::admin())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");

    let err = app
        .engine
        .confirm_renewal(outcome.renewal.renewal_id, None, ActorContext::public())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_input");
}

#[tokio::test]
async fn public_renewal_cannot_set_explicit_expiry() {
    let Some(app) = spawn_app().await else { return };
    let package = app.package(0, 2000, (0, 0, 0)).await;
    let member = app.register(&package, date(2025, 1, 1), 1, 2000).await;

    let mut request = renewal(member.member_id, 1, 2000, date(2025, 1, 28));
    request.explicit_expiry = Some(date(2025, 12, 31));
    let err = app
        .engine
        .renew_membership(request, ActorContext::public())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_input");

    let unchanged = app.db.get_member(member.member_id).await.unwrap();
    assert_eq!(unchanged.payment_expiry_date, date(2025, 2, 1));
}

#[tokio::test]
async fn renewal_with_same_locker_extends_assignment() {
    let Some(app) = spawn_app().await else { return };
    let package = app.package(0, 1000, (0, 0, 0)).await;
    let locker = app.locker(200).await;
    let member = app.register(&package, date(2025, 1, 1), 1, 1000).await;

    let mut first = renewal(member.member_id, 1, 1000, date(2025, 1, 20));
    first.locker = Some(locker_selection(locker.locker_id, 1, 200));
    let first = app
        .engine
        .renew_membership(first, ActorContext::admin())
        .await
        .unwrap();
    let assignment = first.locker.expect("locker").assignment;
    assert_eq!(assignment.end_date, date(2025, 2, 20));

    let mut second = renewal(member.member_id, 1, 1000, date(2025, 2, 10));
    second.locker = Some(locker_selection(locker.locker_id, 2, 400));
    let second = app
        .engine
        .renew_membership(second, ActorContext::admin())
        .await
        .unwrap();
    let extended = second.locker.expect("locker").assignment;

    assert_eq!(extended.member_locker_id, assignment.member_locker_id);
    assert_eq!(extended.end_date, date(2025, 4, 20));
    assert_eq!(second.member.credit, 0);
}

#[tokio::test]
async fn renewing_unknown_member_is_not_found() {
    let Some(app) = spawn_app().await else { return };

    let err = app
        .engine
        .renew_membership(
            renewal(uuid::Uuid::new_v4(), 1, 0, date(2025, 1, 1)),
            ActorContext::admin(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}
