//! End-to-end checkout scenarios on the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use chrono::Duration as ChronoDuration;
use common::setup;
use drop_inventory_core::ledger::LedgerEventKind;
use drop_inventory_core::reservation::ReservationStatus;
use drop_inventory_core::stock::{StockLevel, StockProjection};
use drop_inventory_core::store::InventoryStore;
use drop_inventory_core::types::{DropPolicy, DropStatus, IdempotencyKey, VariantId};
use drop_inventory_runtime::InventoryError;
use drop_inventory_runtime::error::UNAVAILABLE_MESSAGE;
use drop_inventory_testing::fixtures;
use std::time::Duration;

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn reserve_confirm_until_sold_out() {
    let h = setup(5, 10).await;

    let first = h.service.reserve(h.request(3, "alice")).await.unwrap();
    assert_eq!(h.counts().await, (2, 3, 0));

    let receipt = h.service.confirm_purchase(first.id, "order-1", None).await.unwrap();
    assert_eq!(receipt.order_reference, "order-1");
    assert_eq!(receipt.total.amount_minor, 3 * fixtures::FIXTURE_PRICE_MINOR);
    assert_eq!(h.counts().await, (2, 0, 3));

    h.service.reserve(h.request(2, "bob")).await.unwrap();
    assert_eq!(h.counts().await, (0, 2, 3));

    let err = h.service.reserve(h.request(1, "carol")).await.unwrap_err();
    assert!(matches!(err, InventoryError::InsufficientStock { requested: 1, available: 0, .. }));
    assert_eq!(err.customer_message(), UNAVAILABLE_MESSAGE);

    let kinds: Vec<_> = h
        .service
        .ledger()
        .entries_for(h.variant.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            LedgerEventKind::Add,
            LedgerEventKind::Reserve,
            LedgerEventKind::Purchase,
            LedgerEventKind::Reserve,
        ]
    );
    h.assert_consistent().await;
}

#[tokio::test]
async fn converted_reservation_records_order_and_price() {
    let h = setup(5, 10).await;
    let hold = h.service.reserve(h.request(2, "alice")).await.unwrap();

    h.service.confirm_purchase(hold.id, "order-9", None).await.unwrap();

    let converted = h.service.reservation(hold.id).await.unwrap();
    assert_eq!(converted.status, ReservationStatus::Converted);
    assert_eq!(converted.order_reference.as_deref(), Some("order-9"));
    assert_eq!(converted.unit_price.amount_minor, fixtures::FIXTURE_PRICE_MINOR);
    assert_eq!(converted.version, hold.version + 1);
}

#[tokio::test]
async fn release_returns_stock_once() {
    let h = setup(5, 10).await;
    let hold = h.service.reserve(h.request(2, "alice")).await.unwrap();

    let released = h.service.release(hold.id, None).await.unwrap();
    assert_eq!(released.status, ReservationStatus::Cancelled);
    assert_eq!(h.counts().await, (5, 0, 0));

    let err = h.service.release(hold.id, None).await.unwrap_err();
    assert!(matches!(
        err,
        InventoryError::InvalidReservationState { status: ReservationStatus::Cancelled, .. }
    ));
    let err = h.service.confirm_purchase(hold.id, "order-1", None).await.unwrap_err();
    assert!(matches!(err, InventoryError::InvalidReservationState { .. }));
    assert_eq!(h.counts().await, (5, 0, 0));
    h.assert_consistent().await;
}

// ============================================================================
// Expiry
// ============================================================================

#[tokio::test]
async fn expired_reservation_cannot_be_confirmed_before_sweep() {
    let h = setup(5, 10).await;
    let hold = h
        .service
        .reserve(h.request(2, "alice").with_ttl(Duration::from_secs(1)))
        .await
        .unwrap();

    h.clock.advance(ChronoDuration::seconds(2));

    let err = h.service.confirm_purchase(hold.id, "order-1", None).await.unwrap_err();
    assert!(matches!(err, InventoryError::ReservationExpired { .. }));
    // Nothing moved: the sweep has not run yet.
    assert_eq!(h.counts().await, (3, 2, 0));
}

#[tokio::test]
async fn sweep_expires_once_even_when_run_twice() {
    let h = setup(5, 10).await;
    let hold = h
        .service
        .reserve(h.request(2, "alice").with_ttl(Duration::from_secs(1)))
        .await
        .unwrap();

    h.clock.advance(ChronoDuration::seconds(2));

    assert_eq!(h.service.sweep_expired().await.unwrap(), 1);
    assert_eq!(h.service.sweep_expired().await.unwrap(), 0);

    assert_eq!(h.service.reservation(hold.id).await.unwrap().status, ReservationStatus::Expired);
    assert_eq!(h.counts().await, (5, 0, 0));

    let releases = h
        .service
        .ledger()
        .entries_for(h.variant.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == LedgerEventKind::Release)
        .count();
    assert_eq!(releases, 1);

    let err = h.service.confirm_purchase(hold.id, "order-1", None).await.unwrap_err();
    assert!(matches!(err, InventoryError::ReservationExpired { .. }));
    h.assert_consistent().await;
}

#[tokio::test]
async fn sweep_leaves_live_holds_alone() {
    let h = setup(10, 10).await;
    let short = h
        .service
        .reserve(h.request(1, "alice").with_ttl(Duration::from_secs(1)))
        .await
        .unwrap();
    let long = h.service.reserve(h.request(1, "bob")).await.unwrap();

    h.clock.advance(ChronoDuration::seconds(5));
    assert_eq!(h.service.sweep_expired().await.unwrap(), 1);

    assert_eq!(h.service.reservation(short.id).await.unwrap().status, ReservationStatus::Expired);
    assert_eq!(h.service.reservation(long.id).await.unwrap().status, ReservationStatus::Active);
    assert_eq!(h.counts().await, (9, 1, 0));
}

#[tokio::test]
async fn sweep_processes_more_than_one_batch() {
    // Batch size is 2 in the test config.
    let h = setup(10, 10).await;
    for who in ["a", "b", "c", "d", "e"] {
        h.service
            .reserve(h.request(1, who).with_ttl(Duration::from_secs(1)))
            .await
            .unwrap();
    }

    h.clock.advance(ChronoDuration::seconds(2));
    assert_eq!(h.service.sweep_expired().await.unwrap(), 5);
    assert_eq!(h.store.count_reservations(ReservationStatus::Expired), 5);
    assert_eq!(h.counts().await, (10, 0, 0));
}

// ============================================================================
// Idempotency
// ============================================================================

#[tokio::test]
async fn reserve_with_same_key_creates_one_hold() {
    let h = setup(5, 10).await;
    let key = IdempotencyKey::derive("cs_alice", "reserve");

    let first = h
        .service
        .reserve(h.request(2, "alice").with_idempotency_key(key.clone()))
        .await
        .unwrap();
    let entries = h.store.ledger_len();
    let second = h
        .service
        .reserve(h.request(2, "alice").with_idempotency_key(key))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(h.store.ledger_len(), entries);
    assert_eq!(h.store.reservations().len(), 1);
    assert_eq!(h.counts().await, (3, 2, 0));
}

#[tokio::test]
async fn confirm_is_idempotent() {
    let h = setup(5, 10).await;
    let hold = h.service.reserve(h.request(2, "alice")).await.unwrap();
    let key = IdempotencyKey::derive("cs_alice", "confirm");

    let first = h
        .service
        .confirm_purchase(hold.id, "order-1", Some(key.clone()))
        .await
        .unwrap();
    let keyed_retry = h
        .service
        .confirm_purchase(hold.id, "order-1", Some(key))
        .await
        .unwrap();
    let webhook_retry = h.service.confirm_purchase(hold.id, "order-1", None).await.unwrap();

    assert_eq!(first, keyed_retry);
    assert_eq!(first, webhook_retry);
    assert_eq!(h.counts().await, (3, 0, 2));

    let err = h.service.confirm_purchase(hold.id, "order-2", None).await.unwrap_err();
    assert!(matches!(
        err,
        InventoryError::InvalidReservationState { status: ReservationStatus::Converted, .. }
    ));
}

#[tokio::test]
async fn release_is_idempotent_under_key() {
    let h = setup(5, 10).await;
    let hold = h.service.reserve(h.request(2, "alice")).await.unwrap();
    let key = IdempotencyKey::derive("cs_alice", "release");

    let first = h.service.release(hold.id, Some(key.clone())).await.unwrap();
    let again = h.service.release(hold.id, Some(key)).await.unwrap();

    assert_eq!(first, again);
    assert_eq!(h.counts().await, (5, 0, 0));
}

#[tokio::test]
async fn replenish_is_idempotent_under_key() {
    let h = setup(0, 10).await;
    let key = IdempotencyKey::new("restock-2025-01-01");

    let first = h.service.replenish(h.variant.id, 7, "restock", Some(key.clone())).await.unwrap();
    let again = h.service.replenish(h.variant.id, 7, "restock", Some(key)).await.unwrap();

    assert_eq!(first.id, again.id);
    assert_eq!(h.counts().await, (7, 0, 0));
}

// ============================================================================
// Admission rules
// ============================================================================

#[tokio::test]
async fn purchase_limit_counts_active_and_converted_holds() {
    let h = setup(10, 2).await;

    let hold = h.service.reserve(h.request(2, "alice")).await.unwrap();
    let err = h.service.reserve(h.request(1, "alice")).await.unwrap_err();
    assert!(matches!(
        err,
        InventoryError::PurchaseLimitExceeded { held: 2, requested: 1, limit: 2, .. }
    ));
    assert_eq!(err.customer_message(), UNAVAILABLE_MESSAGE);

    // Another requester is unaffected.
    h.service.reserve(h.request(2, "bob")).await.unwrap();

    // Cancelled holds stop counting.
    h.service.release(hold.id, None).await.unwrap();
    let hold = h.service.reserve(h.request(2, "alice")).await.unwrap();

    // Converted holds keep counting.
    h.service.confirm_purchase(hold.id, "order-1", None).await.unwrap();
    let err = h.service.reserve(h.request(1, "alice")).await.unwrap_err();
    assert!(matches!(err, InventoryError::PurchaseLimitExceeded { held: 2, .. }));
}

#[tokio::test]
async fn expired_holds_stop_counting_toward_the_limit() {
    let h = setup(10, 1).await;
    h.service
        .reserve(h.request(1, "alice").with_ttl(Duration::from_secs(1)))
        .await
        .unwrap();

    h.clock.advance(ChronoDuration::seconds(2));

    // Past its deadline the hold no longer counts, even before the sweep.
    h.service.reserve(h.request(1, "alice")).await.unwrap();
}

#[tokio::test]
async fn inactive_variant_is_refused() {
    let h = setup(5, 10).await;
    h.service.set_variant_active(h.variant.id, false).await.unwrap();

    let err = h.service.reserve(h.request(1, "alice")).await.unwrap_err();
    assert!(matches!(err, InventoryError::VariantInactive(_)));

    h.service.set_variant_active(h.variant.id, true).await.unwrap();
    h.service.reserve(h.request(1, "alice")).await.unwrap();
}

#[tokio::test]
async fn drop_outside_its_window_is_refused() {
    let h = setup(5, 10).await;
    let now = drop_inventory_testing::mocks::test_epoch();

    let coming_soon = DropPolicy {
        status: DropStatus::ComingSoon,
        ..DropPolicy::active(h.variant.drop_id).with_max_per_customer(10)
    };
    h.service.register_drop(coming_soon).await.unwrap();
    let err = h.service.reserve(h.request(1, "alice")).await.unwrap_err();
    assert!(matches!(err, InventoryError::DropNotLive(id) if id == h.variant.drop_id));

    let scheduled = DropPolicy::active(h.variant.drop_id)
        .with_max_per_customer(10)
        .with_window(Some(now + ChronoDuration::hours(1)), Some(now + ChronoDuration::hours(2)));
    h.service.register_drop(scheduled).await.unwrap();
    assert!(matches!(
        h.service.reserve(h.request(1, "alice")).await,
        Err(InventoryError::DropNotLive(_))
    ));

    h.clock.advance(ChronoDuration::minutes(90));
    h.service.reserve(h.request(1, "alice")).await.unwrap();

    h.clock.advance(ChronoDuration::hours(1));
    assert!(matches!(
        h.service.reserve(h.request(1, "bob")).await,
        Err(InventoryError::DropNotLive(_))
    ));
}

#[tokio::test]
async fn unknown_variant_and_zero_quantity_are_refused() {
    let h = setup(5, 10).await;

    let mut request = h.request(1, "alice");
    request.variant_id = VariantId::new();
    assert!(matches!(
        h.service.reserve(request).await,
        Err(InventoryError::UnknownVariant(_))
    ));

    assert!(matches!(
        h.service.reserve(h.request(0, "alice")).await,
        Err(InventoryError::InvalidQuantity(0))
    ));
}

#[tokio::test]
async fn partial_fill_takes_what_is_left() {
    let h = setup(3, 10).await;

    let err = h.service.reserve(h.request(5, "alice")).await.unwrap_err();
    assert!(matches!(err, InventoryError::InsufficientStock { .. }));

    let hold = h.service.reserve(h.request(5, "alice").allow_partial()).await.unwrap();
    assert_eq!(hold.quantity, 3);
    assert_eq!(h.counts().await, (0, 3, 0));

    let err = h.service.reserve(h.request(1, "bob").allow_partial()).await.unwrap_err();
    assert!(matches!(err, InventoryError::InsufficientStock { .. }));
}

// ============================================================================
// Stock movements, reads and maintenance
// ============================================================================

#[tokio::test]
async fn returns_and_write_offs() {
    let h = setup(5, 10).await;
    let hold = h.service.reserve(h.request(2, "alice")).await.unwrap();
    h.service.confirm_purchase(hold.id, "order-1", None).await.unwrap();

    h.service.record_return(h.variant.id, 1, "damaged", None).await.unwrap();
    assert_eq!(h.counts().await, (4, 0, 1));

    let err = h.service.record_return(h.variant.id, 5, "bogus", None).await.unwrap_err();
    assert!(matches!(err, InventoryError::InvalidQuantity(5)));

    let err = h.service.adjust(h.variant.id, -100, "shrinkage", None).await.unwrap_err();
    assert!(matches!(err, InventoryError::InsufficientStock { requested: 100, available: 4, .. }));

    let entry = h.service.adjust(h.variant.id, -1, "shrinkage", None).await.unwrap();
    assert_eq!((entry.kind, entry.quantity), (LedgerEventKind::Add, -1));
    assert_eq!(h.counts().await, (3, 0, 1));

    let summary = h.service.sales_summary(h.variant.id).await.unwrap();
    assert_eq!(summary.order_count, 1);
    assert_eq!(summary.units_sold, 1);
    assert_eq!(summary.units_returned, 1);
    assert_eq!(summary.gross_revenue_minor, 2 * fixtures::FIXTURE_PRICE_MINOR);
    h.assert_consistent().await;
}

#[tokio::test]
async fn oversized_changes_are_refused_and_the_store_keeps_working() {
    let h = setup(5, 1).await;
    let entries = h.store.ledger_len();

    for delta in [i64::MAX, i64::MIN, i64::from(u32::MAX) + 1] {
        let err = h.service.adjust(h.variant.id, delta, "bulk", None).await.unwrap_err();
        assert!(matches!(err, InventoryError::InvalidQuantity(d) if d == delta));
    }
    assert_eq!(h.store.ledger_len(), entries);
    assert_eq!(h.counts().await, (5, 0, 0));

    let stock = h.service.stock(h.variant.id).await.unwrap();
    h.store
        .restore_stock(StockProjection {
            available: i64::MAX - 1,
            ..stock
        })
        .await
        .unwrap();
    let err = h.service.replenish(h.variant.id, 5, "restock", None).await.unwrap_err();
    assert!(matches!(err, InventoryError::InvalidQuantity(5)));
    assert_eq!(h.counts().await, (i64::MAX - 1, 0, 0));

    h.service.reserve(h.request(1, "alice")).await.unwrap();
    assert_eq!(h.counts().await, (i64::MAX - 2, 1, 0));
}

#[tokio::test]
async fn availability_tracks_stock_level() {
    let h = setup(6, 10).await;
    assert_eq!(h.service.availability(h.variant.id).await.unwrap().level, StockLevel::InStock);

    h.service.reserve(h.request(1, "alice")).await.unwrap();
    assert_eq!(h.service.availability(h.variant.id).await.unwrap().level, StockLevel::LowStock);

    h.service.reserve(h.request(5, "bob")).await.unwrap();
    assert_eq!(h.service.availability(h.variant.id).await.unwrap().level, StockLevel::OutOfStock);
}

#[tokio::test]
async fn lost_projection_is_restored_from_the_ledger() {
    let h = setup(5, 10).await;
    let hold = h.service.reserve(h.request(2, "alice")).await.unwrap();
    h.service.confirm_purchase(hold.id, "order-1", None).await.unwrap();
    let before = h.service.stock(h.variant.id).await.unwrap();

    h.store.forget_stock(h.variant.id);
    assert!(matches!(
        h.service.stock(h.variant.id).await,
        Err(InventoryError::UnknownVariant(_))
    ));

    let restored = h.service.restore(h.variant.id).await.unwrap();
    assert_eq!(restored, before);

    // Writes continue from the restored version.
    h.service.reserve(h.request(1, "bob")).await.unwrap();
    h.assert_consistent().await;
}
