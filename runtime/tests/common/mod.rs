//! Shared harness for runtime integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use drop_inventory_core::types::{Fingerprint, Variant};
use drop_inventory_runtime::{InventoryConfig, InventoryService, ReserveRequest};
use drop_inventory_testing::mocks::{ManualClock, manual_test_clock};
use drop_inventory_testing::{FaultInjectingStore, InMemoryInventoryStore, fixtures};
use std::sync::Arc;
use std::time::Duration;

/// A service over an in-memory store with a manual clock and one variant.
pub struct Harness {
    pub service: InventoryService,
    pub store: InMemoryInventoryStore,
    pub faults: FaultInjectingStore,
    pub clock: ManualClock,
    pub variant: Variant,
}

/// Config with tiny backoff so contention tests finish quickly.
pub fn test_config() -> InventoryConfig {
    InventoryConfig {
        storage_timeout: Duration::from_millis(250),
        max_retries: 20,
        retry_initial_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(5),
        sweep_batch_size: 2,
        ..InventoryConfig::default()
    }
}

/// Registers one variant with `stock` units in a drop limited to
/// `max_per_customer` units per requester.
pub async fn setup(stock: u32, max_per_customer: u32) -> Harness {
    setup_with(stock, max_per_customer, test_config()).await
}

/// Like [`setup`] with an explicit config.
pub async fn setup_with(stock: u32, max_per_customer: u32, config: InventoryConfig) -> Harness {
    drop_inventory_testing::init_test_tracing();
    let store = InMemoryInventoryStore::new();
    let faults = FaultInjectingStore::new(Arc::new(store.clone()));
    let clock = manual_test_clock();
    let service = InventoryService::new(
        Arc::new(faults.clone()),
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
        config,
    );

    let (policy, variant) = fixtures::live_drop_with_variant(max_per_customer);
    service.register_drop(policy).await.unwrap();
    let variant = service.register_variant(variant).await.unwrap();
    if stock > 0 {
        service.replenish(variant.id, stock, "initial stock", None).await.unwrap();
    }

    Harness {
        service,
        store,
        faults,
        clock,
        variant,
    }
}

impl Harness {
    /// A request for `quantity` units by `who`.
    pub fn request(&self, quantity: u32, who: &str) -> ReserveRequest {
        ReserveRequest::new(
            self.variant.id,
            quantity,
            Fingerprint::new(who),
            format!("cs_{who}"),
        )
    }

    /// `(available, reserved, sold)` of the harness variant.
    pub async fn counts(&self) -> (i64, i64, i64) {
        let stock = self.service.stock(self.variant.id).await.unwrap();
        (stock.available, stock.reserved, stock.sold)
    }

    /// Asserts the live projection equals the ledger fold.
    pub async fn assert_consistent(&self) {
        let live = self.service.verify(self.variant.id).await.unwrap();
        assert!(live.available >= 0 && live.reserved >= 0 && live.sold >= 0);
    }
}
