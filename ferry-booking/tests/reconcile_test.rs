mod common;

use chrono::Duration;
use common::*;
use ferry_booking::{PaymentCallback, ReconcileOutcome};
use ferry_core::{ClaimStatus, CoreError, PaymentStatus};
use std::collections::BTreeMap;

fn callback(order_id: &str, status: &str) -> PaymentCallback {
    PaymentCallback {
        merchant_ref: order_id.to_string(),
        status: status.to_string(),
    }
}

#[tokio::test]
async fn paid_callback_confirms_and_notifies_once() {
    let h = harness(&[(ECONOMY, 5)]).await;
    let (allocation, finalized) = h.allocate_and_finalize(&[(ECONOMY, 2)]).await;

    let outcome = h
        .service
        .handle_payment_callback(callback(&finalized.order_id, "PAID"))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Confirmed);

    let session = h.db.session_by_token(allocation.session_token).await.unwrap();
    assert_eq!(session.status, ClaimStatus::Confirmed);
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "putri@example.com");
    assert!(sent[0].subject.contains("confirmed"));
    assert!(sent[0].html.contains("EK1"));

    let again = h
        .service
        .handle_payment_callback(callback(&finalized.order_id, "PAID"))
        .await
        .unwrap();
    assert_eq!(again, ReconcileOutcome::AlreadyResolved);
    assert_eq!(h.notifier.sent().len(), 1);

    // Confirmed tickets keep their slots.
    let view = h.service.availability(SCHEDULE, ECONOMY).await.unwrap();
    assert_eq!(view.available, 3);
}

#[tokio::test]
async fn expired_callback_restores_quota_once() {
    let h = harness(&[(ECONOMY, 2)]).await;
    let (allocation, finalized) = h.allocate_and_finalize(&[(ECONOMY, 2)]).await;

    let outcome = h
        .service
        .handle_payment_callback(callback(&finalized.order_id, "EXPIRED"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Released {
            restored: BTreeMap::from([(ECONOMY, 2)])
        }
    );
    assert_eq!(h.quota(ECONOMY).await, 4);
    let session = h.db.session_by_token(allocation.session_token).await.unwrap();
    assert_eq!(session.status, ClaimStatus::Cancelled);

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].html.contains("payment window closed"));

    let duplicate = h
        .service
        .handle_payment_callback(callback(&finalized.order_id, "EXPIRED"))
        .await
        .unwrap();
    assert_eq!(duplicate, ReconcileOutcome::AlreadyResolved);
    assert_eq!(h.quota(ECONOMY).await, 4);
    assert_eq!(h.notifier.sent().len(), 1);

    // The two released slots are claimable again.
    h.allocate(&[(ECONOMY, 2)]).await;
}

#[tokio::test]
async fn failure_restores_each_class_of_a_mixed_booking() {
    let h = harness(&[(ECONOMY, 3), (CAR, 1)]).await;
    let (_, finalized) = h.allocate_and_finalize(&[(ECONOMY, 2), (CAR, 1)]).await;

    let outcome = h
        .service
        .handle_payment_callback(callback(&finalized.order_id, "failed"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Released {
            restored: BTreeMap::from([(ECONOMY, 2), (CAR, 1)])
        }
    );
    assert_eq!(h.quota(ECONOMY).await, 5);
    assert_eq!(h.quota(CAR).await, 2);
}

#[tokio::test]
async fn paid_after_payment_window_is_expired() {
    let h = harness(&[(ECONOMY, 5)]).await;
    let (allocation, finalized) = h.allocate_and_finalize(&[(ECONOMY, 1)]).await;

    h.clock.set(finalized.expires_at + Duration::seconds(1));
    let err = h
        .service
        .handle_payment_callback(callback(&finalized.order_id, "PAID"))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Expired(_)));
    let session = h.db.session_by_token(allocation.session_token).await.unwrap();
    assert_eq!(session.status, ClaimStatus::PendingPayment);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn overdue_failure_expires_without_restoring() {
    let h = harness(&[(ECONOMY, 2)]).await;
    let (allocation, finalized) = h.allocate_and_finalize(&[(ECONOMY, 2)]).await;

    h.clock.set(finalized.expires_at + Duration::seconds(1));
    let outcome = h
        .service
        .handle_payment_callback(callback(&finalized.order_id, "EXPIRED"))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::ExpiredWithoutRestore);
    assert_eq!(h.quota(ECONOMY).await, 2);
    let session = h.db.session_by_token(allocation.session_token).await.unwrap();
    assert_eq!(session.status, ClaimStatus::Expired);
    assert_eq!(h.notifier.sent().len(), 1);

    let view = h.service.availability(SCHEDULE, ECONOMY).await.unwrap();
    assert_eq!(view.available, 2);

    let again = h
        .service
        .handle_payment_callback(callback(&finalized.order_id, "EXPIRED"))
        .await
        .unwrap();
    assert_eq!(again, ReconcileOutcome::AlreadyResolved);
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn failure_after_sweep_still_notifies_once() {
    let h = harness(&[(ECONOMY, 2)]).await;
    let (_, finalized) = h.allocate_and_finalize(&[(ECONOMY, 1)]).await;

    h.clock.set(finalized.expires_at + Duration::minutes(1));
    assert_eq!(h.service.expire_overdue().await.unwrap().expired, 1);

    let outcome = h
        .service
        .handle_payment_callback(callback(&finalized.order_id, "EXPIRED"))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::ExpiredWithoutRestore);
    assert_eq!(h.quota(ECONOMY).await, 2);

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].html.contains("payment window closed"));
    let booking = h.db.booking_by_order_id(&finalized.order_id).await.unwrap();
    assert!(booking.failure_notified_at.is_some());

    let again = h
        .service
        .handle_payment_callback(callback(&finalized.order_id, "FAILED"))
        .await
        .unwrap();
    assert_eq!(again, ReconcileOutcome::AlreadyResolved);
    assert_eq!(h.notifier.sent().len(), 1);
    assert_eq!(h.quota(ECONOMY).await, 2);
}

#[tokio::test]
async fn paid_after_sweep_changes_nothing() {
    let h = harness(&[(ECONOMY, 2)]).await;
    let (allocation, finalized) = h.allocate_and_finalize(&[(ECONOMY, 1)]).await;

    h.clock.set(finalized.expires_at + Duration::minutes(1));
    h.service.expire_overdue().await.unwrap();

    let outcome = h
        .service
        .handle_payment_callback(callback(&finalized.order_id, "PAID"))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::AlreadyResolved);
    let session = h.db.session_by_token(allocation.session_token).await.unwrap();
    assert_eq!(session.status, ClaimStatus::Expired);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn unknown_or_non_final_status_has_no_side_effects() {
    let h = harness(&[(ECONOMY, 2)]).await;
    let (allocation, finalized) = h.allocate_and_finalize(&[(ECONOMY, 1)]).await;

    for status in ["SETTLED", "UNPAID", ""] {
        let err = h
            .service
            .handle_payment_callback(callback(&finalized.order_id, status))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)), "{status}: {err:?}");
    }

    let session = h.db.session_by_token(allocation.session_token).await.unwrap();
    assert_eq!(session.status, ClaimStatus::PendingPayment);
    assert_eq!(h.quota(ECONOMY).await, 2);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let h = harness(&[(ECONOMY, 2)]).await;
    assert!(matches!(
        h.service.handle_payment_callback(callback("NOPE", "PAID")).await,
        Err(CoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn notification_failure_does_not_undo_confirmation() {
    let h = harness(&[(ECONOMY, 2)]).await;
    let (allocation, finalized) = h.allocate_and_finalize(&[(ECONOMY, 1)]).await;
    h.notifier.set_failing(true);

    let outcome = h
        .service
        .handle_payment_callback(callback(&finalized.order_id, "PAID"))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Confirmed);
    let session = h.db.session_by_token(allocation.session_token).await.unwrap();
    assert_eq!(session.status, ClaimStatus::Confirmed);
}

#[tokio::test]
async fn payment_initiation_is_idempotent() {
    let h = harness(&[(ECONOMY, 2)]).await;
    let (_, finalized) = h.allocate_and_finalize(&[(ECONOMY, 2)]).await;

    let first = h.service.initiate_payment(&finalized.order_id).await.unwrap();
    assert_eq!(first.amount, 2 * PRICE);
    assert!(first.checkout_url.is_some());

    let second = h.service.initiate_payment(&finalized.order_id).await.unwrap();
    assert_eq!(second.reference_number, first.reference_number);
    assert_eq!(h.gateway.created(), 1);

    let booking = h.db.booking_by_order_id(&finalized.order_id).await.unwrap();
    assert_eq!(booking.reference_number, Some(first.reference_number.clone()));

    h.gateway.set_status(&first.reference_number, PaymentStatus::Paid);
    let status = h.service.payment_status(&finalized.order_id).await.unwrap();
    assert_eq!(status.status, PaymentStatus::Paid);
}

#[tokio::test]
async fn payment_cannot_open_before_data_or_after_window() {
    let h = harness(&[(ECONOMY, 2)]).await;
    let (_, finalized) = h.allocate_and_finalize(&[(ECONOMY, 1)]).await;

    assert!(matches!(
        h.service.payment_status(&finalized.order_id).await,
        Err(CoreError::InvalidState(_))
    ));

    h.clock.set(finalized.expires_at + Duration::seconds(1));
    assert!(matches!(
        h.service.initiate_payment(&finalized.order_id).await,
        Err(CoreError::Expired(_))
    ));
    assert_eq!(h.gateway.created(), 0);
}
