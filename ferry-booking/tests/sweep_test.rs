mod common;

use chrono::Duration;
use common::*;
use ferry_booking::SweepReport;
use ferry_core::{ClaimStatus, CoreError};

#[tokio::test]
async fn sweep_expires_only_overdue_pending_sessions() {
    let h = harness(&[(ECONOMY, 10)]).await;

    let stale = h.allocate(&[(ECONOMY, 1)]).await;
    let (_, confirmed) = h.allocate_and_finalize(&[(ECONOMY, 1)]).await;
    h.service
        .handle_payment_callback(ferry_booking::PaymentCallback {
            merchant_ref: confirmed.order_id.clone(),
            status: "PAID".into(),
        })
        .await
        .unwrap();

    h.clock.advance(h.service.settings().hold_window + Duration::seconds(1));
    let fresh = h.allocate(&[(ECONOMY, 1)]).await;

    let report = h.service.expire_overdue().await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            scanned: 1,
            expired: 1,
            failed: 0
        }
    );

    let status = |token| {
        let db = h.db.clone();
        async move { db.session_by_token(token).await.unwrap().status }
    };
    assert_eq!(status(stale.session_token).await, ClaimStatus::Expired);
    assert_eq!(status(fresh.session_token).await, ClaimStatus::PendingData);

    let snapshot = h.service.session_snapshot(stale.session_token).await.unwrap();
    assert_eq!(snapshot.status, ClaimStatus::Expired);
    assert_eq!(snapshot.ticket_ids, stale.ticket_ids);

    assert_eq!(h.service.expire_overdue().await.unwrap(), SweepReport::default());
}

#[tokio::test]
async fn overdue_claims_free_capacity_for_new_allocations() {
    let h = harness(&[(ECONOMY, 1)]).await;
    h.allocate(&[(ECONOMY, 1)]).await;

    assert!(matches!(
        h.service.allocate_tickets(request(&[(ECONOMY, 1)])).await,
        Err(CoreError::Conflict { .. })
    ));

    h.clock.advance(h.service.settings().hold_window + Duration::seconds(1));
    let report = h.service.expire_overdue().await.unwrap();
    assert_eq!(report.expired, 1);

    let second = h.allocate(&[(ECONOMY, 1)]).await;
    assert_eq!(second.ticket_ids.len(), 1);
}

#[tokio::test]
async fn sweep_honours_batch_size() {
    let h = harness(&[(ECONOMY, 200)]).await;
    let batch = h.service.settings().sweep_batch_size as usize;
    for _ in 0..batch + 5 {
        h.allocate(&[(ECONOMY, 1)]).await;
    }

    h.clock.advance(Duration::hours(1));
    assert_eq!(h.service.expire_overdue().await.unwrap().expired, batch);
    assert_eq!(h.service.expire_overdue().await.unwrap().expired, 5);
}

#[tokio::test]
async fn snapshot_of_unknown_session_is_not_found() {
    let h = harness(&[(ECONOMY, 1)]).await;
    assert!(matches!(
        h.service.session_snapshot(uuid::Uuid::new_v4()).await,
        Err(CoreError::NotFound(_))
    ));
}
