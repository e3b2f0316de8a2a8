//! # Drop Inventory Testing
//!
//! Testing utilities for the drop inventory workspace.
//!
//! This crate provides:
//! - [`InMemoryInventoryStore`]: in-memory [`InventoryStore`] and [`Catalog`]
//! - [`FaultInjectingStore`]: injected version conflicts and stalls
//! - Deterministic clocks ([`mocks::FixedClock`], [`mocks::ManualClock`])
//! - Fixtures for variants and drops ([`fixtures`])
//!
//! ## Example
//!
//! ```
//! use drop_inventory_testing::{fixtures, InMemoryInventoryStore};
//! use drop_inventory_core::store::Catalog;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryInventoryStore::new();
//! let (policy, variant) = fixtures::live_drop_with_variant(2);
//! store.upsert_drop_policy(policy).await?;
//! store.insert_variant(variant.clone()).await?;
//! assert!(store.variant(variant.id).await?.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! [`InventoryStore`]: drop_inventory_core::store::InventoryStore
//! [`Catalog`]: drop_inventory_core::store::Catalog

use chrono::{DateTime, Utc};
use drop_inventory_core::environment::Clock;

mod fault;
mod store;

pub use fault::FaultInjectingStore;
pub use store::InMemoryInventoryStore;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use drop_inventory_testing::mocks::FixedClock;
    /// use drop_inventory_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test advances it.
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the service under test.
    ///
    /// ```
    /// use drop_inventory_testing::mocks::ManualClock;
    /// use drop_inventory_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = ManualClock::new(Utc::now());
    /// let start = clock.now();
    /// clock.advance(Duration::seconds(2));
    /// assert_eq!(clock.now() - start, Duration::seconds(2));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a manual clock starting at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward.
        ///
        /// # Panics
        ///
        /// Panics if the lock was poisoned by a panicking test thread.
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap();
            *time += by;
        }

        /// Jump to an absolute time.
        ///
        /// # Panics
        ///
        /// Panics if the lock was poisoned by a panicking test thread.
        #[allow(clippy::unwrap_used)]
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.write().unwrap() = to;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// Create a manual clock starting at 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn manual_test_clock() -> ManualClock {
        ManualClock::new(test_epoch())
    }

    /// 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }
}

/// Fixtures for catalog data.
pub mod fixtures {
    use drop_inventory_core::types::{DropId, DropPolicy, Money, ProductId, Variant};

    /// Price used by fixture variants: 49.00 EUR.
    pub const FIXTURE_PRICE_MINOR: i64 = 4_900;

    /// An active drop with no time window and the given per-customer limit.
    #[must_use]
    pub fn live_drop(max_per_customer: u32) -> DropPolicy {
        DropPolicy::active(DropId::new()).with_max_per_customer(max_per_customer)
    }

    /// An active variant belonging to `drop_id`.
    #[must_use]
    pub fn variant_in(drop_id: DropId) -> Variant {
        Variant::new(ProductId::new(), drop_id, Money::eur(FIXTURE_PRICE_MINOR))
            .with_label("Black / M")
            .with_attribute("color", "black")
            .with_attribute("size", "M")
    }

    /// A live drop and one of its variants.
    #[must_use]
    pub fn live_drop_with_variant(max_per_customer: u32) -> (DropPolicy, Variant) {
        let policy = live_drop(max_per_customer);
        let variant = variant_in(policy.drop_id);
        (policy, variant)
    }
}

/// Installs a `tracing` subscriber that writes to the test harness output.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drop_inventory=debug".into()),
        )
        .with_test_writer()
        .try_init();
}
