mod common;

use barangay_ledger::entities::reservation::ReservationStatus;
use barangay_ledger::errors::ServiceError;
use barangay_ledger::services::reservation_ledger::NewReservation;
use common::{window, TestApp};
use std::sync::Arc;

#[tokio::test]
async fn concurrent_requests_never_overbook() {
    let app = Arc::new(TestApp::new().await);
    let item = app.seed_item("Monobloc chairs", 5).await;
    let item_id = item.id;
    let span = window(14, 8, 17);

    let mut tasks = vec![];
    for n in 0..20 {
        let ledger = app.services().ledger.clone();
        tasks.push(tokio::spawn(async move {
            ledger
                .create(NewReservation {
                    item_id,
                    requester_id: format!("resident-{}", n),
                    quantity: 1,
                    window_start: span.0,
                    window_end: span.1,
                })
                .await
        }));
    }

    let mut success = 0;
    let mut conflicts = 0;
    for t in tasks {
        match t.await.expect("task panicked") {
            Ok(_) => success += 1,
            Err(ServiceError::CapacityConflict(ids)) => {
                assert_eq!(ids.len(), 5);
                conflicts += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(success, 5, "exactly 5 reservations should succeed; got {success}");
    assert_eq!(conflicts, 15);
    let active = app.services().ledger.list_active_by_item(item.id).await.unwrap();
    assert_eq!(active.iter().map(|r| r.quantity).sum::<i32>(), 5);
}

#[tokio::test]
async fn racing_decisions_apply_exactly_once() {
    let app = Arc::new(TestApp::new().await);
    let item = app.seed_item("Projector", 1).await;
    let r = app
        .reserve(item.id, "resident-1", 1, window(15, 9, 11))
        .await
        .unwrap();
    let id = r.id;

    let approve = {
        let lifecycle = app.services().lifecycle.clone();
        tokio::spawn(async move { lifecycle.approve(id, "staff-1").await })
    };
    let reject = {
        let lifecycle = app.services().lifecycle.clone();
        tokio::spawn(async move { lifecycle.reject(id, "staff-2", "double booking").await })
    };
    let cancel = {
        let lifecycle = app.services().lifecycle.clone();
        tokio::spawn(async move { lifecycle.cancel(id, "resident-1", "changed plans").await })
    };

    let results = vec![
        approve.await.unwrap(),
        reject.await.unwrap(),
        cancel.await.unwrap(),
    ];
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert!(!winners.is_empty());

    // Approve may be followed by a cancel; rejection and approval exclude each other.
    let final_status = app.services().ledger.get(id).await.unwrap().status;
    for result in &results {
        if let Err(e) = result {
            assert!(
                matches!(e, ServiceError::NotFoundOrInvalidState(_)),
                "unexpected error: {e}"
            );
        }
    }
    let approved = results[0].is_ok();
    let rejected = results[1].is_ok();
    assert!(!(approved && rejected));
    assert!(final_status.is_terminal() || final_status == ReservationStatus::Approved);
}

#[tokio::test]
async fn independent_items_proceed_in_parallel() {
    let app = Arc::new(TestApp::new().await);
    let tent = app.seed_item("Tent", 3).await;
    let chairs = app.seed_item("Chairs", 3).await;

    let (start, end) = window(16, 8, 12);
    let results = futures::future::join_all((0..6).map(|n| {
        let ledger = app.services().ledger.clone();
        let item_id = if n % 2 == 0 { tent.id } else { chairs.id };
        async move {
            ledger
                .create(NewReservation {
                    item_id,
                    requester_id: format!("resident-{}", n),
                    quantity: 1,
                    window_start: start,
                    window_end: end,
                })
                .await
        }
    }))
    .await;
    assert!(results.iter().all(|r| r.is_ok()));

    assert_eq!(app.services().ledger.list_active_by_item(tent.id).await.unwrap().len(), 3);
    assert_eq!(app.services().ledger.list_active_by_item(chairs.id).await.unwrap().len(), 3);
}
