mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{holder, Fixture};
use seat_booking::error::{BookingError, ErrorKind};
use seat_booking::locks::{seat_lock_key, LockService};
use seat_booking::models::{OrderStatus, SeatStatus};
use seat_booking::services::{FailureReason, FinalizeOrder};

fn finalize_request(f: &Fixture, seat_ids: Vec<i64>, who: &str, buyer: &str) -> FinalizeOrder {
    FinalizeOrder {
        event_id: f.event_id,
        seat_ids,
        holder: holder(who),
        buyer_name: buyer.to_string(),
        user_id: None,
    }
}

#[tokio::test]
async fn competing_holders_scenario() {
    let f = Fixture::new().await;
    let (a1, a2) = (f.seat("1"), f.seat("2"));
    let x = holder("x");
    let y = holder("y");

    let outcome = f.booking.hold_seats(f.event_id, &[a1, a2], &x).await.unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.held.len(), 2);

    let outcome = f.booking.hold_seats(f.event_id, &[a2], &y).await.unwrap();
    assert!(outcome.held.is_empty());
    assert_eq!(outcome.failed[0].seat_id, a2);
    assert_eq!(outcome.failed[0].reason, FailureReason::Locked);

    let a1_row = f.store.seat(a1).await.unwrap();
    assert_eq!(a1_row.status, SeatStatus::Held);
    assert!(a1_row.held_by(&x));

    let details = f
        .booking
        .finalize_order(finalize_request(&f, vec![a1, a2], "x", "Alice"))
        .await
        .unwrap();
    assert_eq!(details.order.total_amount, 200);
    assert_eq!(details.order.status, OrderStatus::Registered);
    assert_eq!(details.order.buyer_name, "Alice");
    assert_eq!(details.items.len(), 2);
    for id in [a1, a2] {
        assert_eq!(f.store.seat(id).await.unwrap().status, SeatStatus::Sold);
    }

    let err = f
        .booking
        .reservations()
        .hold(f.event_id, &[a2], &y, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SeatUnavailable(id) if id == a2));
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn expired_hold_can_be_taken_by_another_holder() {
    let f = Fixture::with_hold_ttl(Duration::from_millis(150)).await;
    let a3 = f.seat("3");

    f.booking.hold_seats(f.event_id, &[a3], &holder("x")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let outcome = f.booking.hold_seats(f.event_id, &[a3], &holder("y")).await.unwrap();
    assert!(outcome.is_complete());
    assert!(f.store.seat(a3).await.unwrap().held_by(&holder("y")));
}

#[tokio::test]
async fn expired_hold_reads_available_in_listing() {
    let f = Fixture::with_hold_ttl(Duration::from_millis(100)).await;
    let a1 = f.seat("1");

    f.booking.hold_seats(f.event_id, &[a1], &holder("x")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    let seats = f.booking.event_seats(f.event_id).await.unwrap();
    let seat = seats.iter().find(|s| s.id == a1).unwrap();
    assert_eq!(seat.status, SeatStatus::Available);
    // Строка исправлена попутно
    assert_eq!(f.store.seat(a1).await.unwrap().status, SeatStatus::Available);
}

#[tokio::test]
async fn concurrent_holds_have_exactly_one_winner() {
    let f = Arc::new(Fixture::new().await);
    let a1 = f.seat("1");

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let f = f.clone();
            tokio::spawn(async move {
                f.booking
                    .hold_seats(f.event_id, &[a1], &holder(&format!("h{i}")))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut winners = 0;
    for outcome in futures::future::join_all(tasks).await {
        let outcome = outcome.unwrap();
        if outcome.is_complete() {
            winners += 1;
        } else {
            assert_eq!(outcome.failed[0].reason, FailureReason::Locked);
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(f.locks.active_count().await, 1);
}

#[tokio::test]
async fn concurrent_finalizations_sell_a_seat_once() {
    let f = Arc::new(Fixture::new().await);
    let a1 = f.seat("1");

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let f = f.clone();
            tokio::spawn(async move {
                let request = finalize_request(&f, vec![a1], &format!("h{i}"), "Buyer");
                f.booking.finalize_order(request).await
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(f.store.orders().await.len(), 1);
    assert_eq!(f.store.all_items().await.len(), 1);
}

#[tokio::test]
async fn reentrant_hold_extends_expiry() {
    let f = Fixture::new().await;
    let a1 = f.seat("1");
    let x = holder("x");

    let first = f.booking.hold_seats(f.event_id, &[a1], &x).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = f.booking.hold_seats(f.event_id, &[a1], &x).await.unwrap();

    assert!(second.is_complete());
    assert!(second.held[0].hold_expires_at > first.held[0].hold_expires_at);
}

#[tokio::test]
async fn failed_batch_leaves_no_new_claims() {
    let f = Fixture::new().await;
    let (a1, a2, a3) = (f.seat("1"), f.seat("2"), f.seat("3"));

    f.booking.hold_seats(f.event_id, &[a3], &holder("y")).await.unwrap();

    let outcome = f
        .booking
        .hold_seats(f.event_id, &[a1, a2, a3], &holder("x"))
        .await
        .unwrap();
    assert!(outcome.held.is_empty());
    assert_eq!(outcome.failed[0].seat_id, a3);

    assert_eq!(f.locks.active_count().await, 1);
    for id in [a1, a2] {
        let seat = f.booking.reservations().reconcile(id).await.unwrap().unwrap();
        assert_eq!(seat.status, SeatStatus::Available);
    }
}

#[tokio::test]
async fn hold_rejects_seat_of_another_event() {
    let f = Fixture::new().await;
    let other = f.store.add_event(1, "Matinee", 50).await;
    let foreign = f.store.add_seats(other.id, "B", &["1"], Some(50)).await;

    let err = f
        .booking
        .reservations()
        .hold(f.event_id, &[f.seat("1"), foreign[0].id], &holder("x"), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SeatNotFound { seat_id, .. } if seat_id == foreign[0].id));
    assert_eq!(f.locks.active_count().await, 0);
}

#[tokio::test]
async fn inactive_event_and_missing_price_are_rejected() {
    let f = Fixture::new().await;
    let unpriced = f.store.add_seats(f.event_id, "B", &["1"], None).await;

    let err = f
        .booking
        .finalize_order(finalize_request(&f, vec![unpriced[0].id], "x", "Bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SeatPriceMissing(_)));

    f.store.set_event_active(f.event_id, false).await;
    let err = f
        .booking
        .hold_seats(f.event_id, &[f.seat("1")], &holder("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::EventInactive(_)));
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

#[tokio::test]
async fn release_reports_partial_failures() {
    let f = Fixture::new().await;
    let (a1, a2, a3) = (f.seat("1"), f.seat("2"), f.seat("3"));
    let x = holder("x");

    f.booking.hold_seats(f.event_id, &[a1], &x).await.unwrap();
    f.booking.hold_seats(f.event_id, &[a2], &holder("y")).await.unwrap();

    let outcome = f.booking.release_seats(&[a1, a2, a3, 99_999], &x).await.unwrap();
    assert_eq!(outcome.released, vec![a1]);

    let reasons: Vec<_> = outcome.failed.iter().map(|f| (f.seat_id, f.reason)).collect();
    assert!(reasons.contains(&(a2, FailureReason::HeldByOther)));
    assert!(reasons.contains(&(a3, FailureReason::NotHeld)));
    assert!(reasons.contains(&(99_999, FailureReason::NotFound)));

    assert_eq!(f.store.seat(a1).await.unwrap().status, SeatStatus::Available);
    assert_eq!(f.store.seat(a2).await.unwrap().status, SeatStatus::Held);
}

#[tokio::test]
async fn finalize_rejects_seat_held_by_another() {
    let f = Fixture::new().await;
    let a1 = f.seat("1");
    f.booking.hold_seats(f.event_id, &[a1], &holder("x")).await.unwrap();

    let err = f
        .booking
        .finalize_order(finalize_request(&f, vec![a1], "y", "Mallory"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SeatLockedByOther(id) if id == a1));
    assert!(f.store.orders().await.is_empty());
    assert!(f.store.seat(a1).await.unwrap().held_by(&holder("x")));
}

#[tokio::test]
async fn sold_seat_cannot_be_finalized_again() {
    let f = Fixture::new().await;
    let (a1, a2) = (f.seat("1"), f.seat("2"));

    f.booking
        .finalize_order(finalize_request(&f, vec![a1], "x", "Alice"))
        .await
        .unwrap();

    let err = f
        .booking
        .finalize_order(finalize_request(&f, vec![a1, a2], "y", "Bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SeatAlreadySold(id) if id == a1));
    assert_eq!(f.store.seat(a2).await.unwrap().status, SeatStatus::Available);
    assert_eq!(f.store.orders().await.len(), 1);
}

#[tokio::test]
async fn commit_failure_releases_claims() {
    let f = Fixture::new().await;
    let a1 = f.seat("1");

    f.store.fail_next_commit();
    let err = f
        .booking
        .finalize_order(finalize_request(&f, vec![a1], "x", "Alice"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    assert_eq!(f.locks.active_count().await, 0);
    assert_eq!(f.store.seat(a1).await.unwrap().status, SeatStatus::Available);
    assert!(f.store.orders().await.is_empty());

    // Повтор после сбоя проходит
    f.booking
        .finalize_order(finalize_request(&f, vec![a1], "x", "Alice"))
        .await
        .unwrap();
}

#[tokio::test]
async fn order_number_collisions_are_retried() {
    let f = Fixture::new().await;
    f.store.simulate_order_number_collisions(3);

    let details = f
        .booking
        .finalize_order(finalize_request(&f, vec![f.seat("1")], "x", "Alice"))
        .await
        .unwrap();
    assert!(details.order.order_number.starts_with("ORD-"));
}

#[tokio::test]
async fn order_number_exhaustion_rolls_back() {
    let f = Fixture::new().await;
    let a1 = f.seat("1");
    f.store.simulate_order_number_collisions(10);

    let err = f
        .booking
        .finalize_order(finalize_request(&f, vec![a1], "x", "Alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::OrderNumberExhausted(5)));
    assert_eq!(f.store.seat(a1).await.unwrap().status, SeatStatus::Available);
    assert_eq!(f.locks.active_count().await, 0);
}

#[tokio::test]
async fn cancellation_returns_seats_to_sale() {
    let f = Fixture::new().await;
    let (a1, a2) = (f.seat("1"), f.seat("2"));

    let details = f
        .booking
        .finalize_order(finalize_request(&f, vec![a1, a2], "x", "Alice"))
        .await
        .unwrap();
    let order_id = details.order.id;

    let cancelled = f.booking.cancel_order(order_id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert!(f.store.all_items().await.is_empty());
    for id in [a1, a2] {
        assert_eq!(f.store.seat(id).await.unwrap().status, SeatStatus::Available);
    }

    let err = f.booking.cancel_order(order_id).await.unwrap_err();
    assert!(matches!(err, BookingError::OrderNotCancellable { .. }));

    let again = f
        .booking
        .finalize_order(finalize_request(&f, vec![a1, a2], "y", "Bob"))
        .await
        .unwrap();
    assert_ne!(again.order.id, order_id);
    let numbers: HashSet<_> = f
        .store
        .orders()
        .await
        .into_iter()
        .map(|o| o.order_number)
        .collect();
    assert_eq!(numbers.len(), 2);
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let f = Fixture::new().await;
    assert!(matches!(
        f.booking.cancel_order(12_345).await,
        Err(BookingError::OrderNotFound(12_345))
    ));
    assert!(matches!(
        f.booking.order_details(12_345).await,
        Err(BookingError::OrderNotFound(12_345))
    ));
}

#[tokio::test]
async fn lock_service_outage_is_transient() {
    let f = Fixture::new().await;
    f.locks.set_unavailable(true);

    let err = f
        .booking
        .hold_seats(f.event_id, &[f.seat("1")], &holder("x"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    f.locks.set_unavailable(false);
    assert_eq!(f.store.seat(f.seat("1")).await.unwrap().status, SeatStatus::Available);
}

#[tokio::test]
async fn sweeper_resets_expired_holds() {
    let f = Fixture::with_hold_ttl(Duration::from_millis(50)).await;
    let a1 = f.seat("1");

    f.booking.hold_seats(f.event_id, &[a1], &holder("x")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(f.booking.sweeper().run_once().await.unwrap(), 1);
    assert_eq!(f.store.seat(a1).await.unwrap().status, SeatStatus::Available);
}

#[tokio::test]
async fn aborted_finalize_releases_only_new_claims() {
    let f = Fixture::new().await;
    let (a1, a2) = (f.seat("1"), f.seat("2"));
    let a1_key = seat_lock_key(a1);

    f.booking.hold_seats(f.event_id, &[a2], &holder("y")).await.unwrap();

    let err = f
        .booking
        .finalize_order(finalize_request(&f, vec![a1, a2], "x", "Alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SeatLockedByOther(id) if id == a2));

    assert_eq!(f.locks.holder(&a1_key).await.unwrap(), None);
    assert_eq!(f.store.seat(a1).await.unwrap().status, SeatStatus::Available);
    assert_eq!(f.locks.holder(&seat_lock_key(a2)).await.unwrap(), Some(holder("y")));
}

#[tokio::test]
async fn aborted_finalize_keeps_existing_hold_expiry() {
    let f = Fixture::new().await;
    let (a1, a2) = (f.seat("1"), f.seat("2"));
    let a1_key = seat_lock_key(a1);
    let x = holder("x");

    f.booking.hold_seats(f.event_id, &[a1], &x).await.unwrap();
    f.booking.hold_seats(f.event_id, &[a2], &holder("y")).await.unwrap();
    let before = f.locks.expires_in(&a1_key).await.unwrap();

    f.booking
        .finalize_order(finalize_request(&f, vec![a1, a2], "x", "Alice"))
        .await
        .unwrap_err();

    assert_eq!(f.locks.holder(&a1_key).await.unwrap(), Some(x.clone()));
    let after = f.locks.expires_in(&a1_key).await.unwrap();
    // Остаток прежней брони, а не TTL финализации
    assert!(after <= before + Duration::from_millis(50));
    assert!(after > before - Duration::from_secs(1));
    assert!(f.store.seat(a1).await.unwrap().held_by(&x));
}

#[tokio::test]
async fn hold_expires_on_time_after_aborted_finalize() {
    let f = Fixture::with_hold_ttl(Duration::from_millis(100)).await;
    let (a1, a2) = (f.seat("1"), f.seat("2"));

    f.booking.hold_seats(f.event_id, &[a1], &holder("x")).await.unwrap();
    f.booking.hold_seats(f.event_id, &[a2], &holder("y")).await.unwrap();
    f.booking
        .finalize_order(finalize_request(&f, vec![a1, a2], "x", "Alice"))
        .await
        .unwrap_err();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let outcome = f.booking.hold_seats(f.event_id, &[a1], &holder("z")).await.unwrap();
    assert!(outcome.is_complete(), "{:?}", outcome.failed);
}
