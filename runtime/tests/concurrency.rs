//! Contention, retry and timeout behaviour.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use chrono::Duration as ChronoDuration;
use common::{setup, setup_with, test_config};
use drop_inventory_core::ledger::LedgerEventKind;
use drop_inventory_core::reservation::ReservationStatus;
use drop_inventory_core::types::IdempotencyKey;
use drop_inventory_runtime::{InventoryConfig, InventoryError};
use futures::future::join_all;
use std::time::Duration;

fn count_kind(entries: &[drop_inventory_core::ledger::LedgerEntry], kind: LedgerEventKind) -> usize {
    entries.iter().filter(|e| e.kind == kind).count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_unit_goes_to_exactly_one_buyer() {
    let h = setup(1, 1).await;

    let attempts = (0..20).map(|i| {
        let service = h.service.clone();
        let request = h.request(1, &format!("buyer-{i}"));
        tokio::spawn(async move { service.reserve(request).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(Result::unwrap).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let sold_out = results
        .iter()
        .filter(|r| matches!(r, Err(InventoryError::InsufficientStock { .. })))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(sold_out, 19);
    assert_eq!(h.counts().await, (0, 1, 0));
    h.assert_consistent().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oversubscription_admits_exactly_available_units() {
    let h = setup(5, 1).await;

    let attempts = (0..30).map(|i| {
        let service = h.service.clone();
        let request = h.request(1, &format!("buyer-{i}"));
        tokio::spawn(async move { service.reserve(request).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(Result::unwrap).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 5);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, InventoryError::InsufficientStock { .. })));
    assert_eq!(h.counts().await, (0, 5, 0));

    let entries = h.service.ledger().entries_for(h.variant.id).await.unwrap();
    assert_eq!(count_kind(&entries, LedgerEventKind::Reserve), 5);
    h.assert_consistent().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_racing_sweep_releases_once() {
    let h = setup(5, 10).await;
    let hold = h
        .service
        .reserve(h.request(2, "alice").with_ttl(Duration::from_secs(1)))
        .await
        .unwrap();
    h.clock.advance(ChronoDuration::seconds(2));

    let (cancelled, swept) = tokio::join!(
        h.service.release(hold.id, None),
        h.service.sweep_expired()
    );

    let swept = swept.unwrap();
    match cancelled {
        Ok(reservation) => {
            assert_eq!(reservation.status, ReservationStatus::Cancelled);
            assert_eq!(swept, 0);
        }
        Err(InventoryError::InvalidReservationState { status, .. }) => {
            assert_eq!(status, ReservationStatus::Expired);
            assert_eq!(swept, 1);
        }
        Err(other) => panic!("unexpected error: {other}"),
    }

    assert_eq!(h.counts().await, (5, 0, 0));
    let entries = h.service.ledger().entries_for(h.variant.id).await.unwrap();
    assert_eq!(count_kind(&entries, LedgerEventKind::Release), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn convert_racing_cancel_has_one_winner() {
    let h = setup(5, 10).await;
    let hold = h.service.reserve(h.request(2, "alice")).await.unwrap();

    let (converted, cancelled) = tokio::join!(
        h.service.confirm_purchase(hold.id, "order-1", None),
        h.service.release(hold.id, None)
    );

    assert!(converted.is_ok() ^ cancelled.is_ok());
    let counts = h.counts().await;
    if converted.is_ok() {
        assert_eq!(counts, (3, 0, 2));
    } else {
        assert_eq!(counts, (5, 0, 0));
    }
    h.assert_consistent().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sweepers_expire_each_hold_once() {
    let h = setup(20, 1).await;
    for i in 0..10 {
        h.service
            .reserve(h.request(1, &format!("buyer-{i}")).with_ttl(Duration::from_secs(1)))
            .await
            .unwrap();
    }
    h.clock.advance(ChronoDuration::seconds(2));

    let sweeps = (0..4).map(|_| {
        let service = h.service.clone();
        tokio::spawn(async move { service.sweep_expired().await })
    });
    let total: usize = join_all(sweeps)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .sum();

    assert_eq!(total, 10);
    assert_eq!(h.counts().await, (20, 0, 0));
    let entries = h.service.ledger().entries_for(h.variant.id).await.unwrap();
    assert_eq!(count_kind(&entries, LedgerEventKind::Release), 10);
}

#[tokio::test]
async fn conflicts_are_retried_with_a_fresh_read() {
    let h = setup(5, 10).await;
    let before = h.faults.commit_attempts();
    h.faults.inject_conflicts(3);

    h.service.reserve(h.request(1, "alice")).await.unwrap();

    assert_eq!(h.faults.commit_attempts() - before, 4);
    assert_eq!(h.counts().await, (4, 1, 0));
}

#[tokio::test]
async fn exhausted_retry_budget_fails_the_reservation() {
    let config = InventoryConfig {
        max_retries: 3,
        ..test_config()
    };
    let h = setup_with(5, 10, config).await;
    h.faults.inject_conflicts(100);

    let err = h.service.reserve(h.request(1, "alice")).await.unwrap_err();
    assert!(matches!(err, InventoryError::ReservationFailed { attempts: 4, .. }));
    assert!(!err.is_transient());

    h.faults.inject_conflicts(0);
    assert_eq!(h.counts().await, (5, 0, 0));
    assert!(h.store.reservations().is_empty());
}

#[tokio::test]
async fn stalled_storage_times_out() {
    let h = setup(5, 10).await;
    h.faults.stall_for(Duration::from_secs(1));

    let err = h.service.reserve(h.request(1, "alice")).await.unwrap_err();
    assert!(matches!(err, InventoryError::StorageTimeout(_)));
    assert!(err.is_transient());

    h.faults.stall_for(Duration::ZERO);
    h.service.reserve(h.request(1, "alice")).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_key_retry_during_the_original_gets_the_original_hold() {
    let h = setup(1, 1).await;
    let key = IdempotencyKey::derive("cs_alice", "reserve");
    h.faults.stall_next_units_held(Duration::from_millis(100));

    let retry = {
        let service = h.service.clone();
        let request = h.request(1, "alice").with_idempotency_key(key.clone());
        tokio::spawn(async move { service.reserve(request).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let original = h
        .service
        .reserve(h.request(1, "alice").with_idempotency_key(key))
        .await
        .unwrap();
    let retried = retry.await.unwrap().unwrap();

    assert_eq!(retried.id, original.id);
    assert_eq!(h.store.reservations().len(), 1);
    assert_eq!(h.counts().await, (0, 1, 0));
    h.assert_consistent().await;
}

#[tokio::test]
async fn timed_out_commit_that_landed_is_not_applied_again() {
    let h = setup(5, 10).await;

    h.faults.delay_acknowledgements(1, Duration::from_secs(1));
    let hold = h.service.reserve(h.request(1, "alice")).await.unwrap();
    assert_eq!(h.store.reservations().len(), 1);
    assert_eq!(h.store.reservations()[0].id, hold.id);
    assert_eq!(h.counts().await, (4, 1, 0));

    h.faults.delay_acknowledgements(1, Duration::from_secs(1));
    let entry = h.service.replenish(h.variant.id, 3, "restock", None).await.unwrap();
    assert_eq!(h.counts().await, (7, 1, 0));

    let entries = h.service.ledger().entries_for(h.variant.id).await.unwrap();
    assert_eq!(count_kind(&entries, LedgerEventKind::Add), 2);
    assert_eq!(count_kind(&entries, LedgerEventKind::Reserve), 1);
    assert!(entries.iter().any(|e| e.id == entry.id));
    h.assert_consistent().await;
}
