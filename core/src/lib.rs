//! # Drop Inventory Core
//!
//! Domain types and pure logic for inventory control under concurrent,
//! time-limited demand.
//!
//! This crate performs no I/O. It defines:
//!
//! - **Types**: variants, drops, identifiers, money ([`types`])
//! - **Stock**: the projection and its compare-and-swap step ([`stock`])
//! - **Ledger**: append-only entries and the fold that rebuilds a projection ([`ledger`])
//! - **Reservations**: checkout holds and their state machine ([`reservation`])
//! - **Storage**: the [`store::InventoryStore`] and [`store::Catalog`] traits
//! - **Sales**: counters derived from the ledger ([`sales`])
//! - **Environment**: the injectable [`environment::Clock`]
//!
//! ## Architecture Principles
//!
//! - The ledger is the source of truth; projections are rebuildable caches
//! - Every mutation is one atomic unit (projection + ledger + reservation)
//! - Optimistic concurrency: versions totally order mutations of a variant
//! - Dependencies are injected as trait objects, never globals
//!
//! ## Example
//!
//! ```
//! use drop_inventory_core::ledger::{fold, LedgerEventKind, NewLedgerEntry};
//! use drop_inventory_core::types::VariantId;
//! use chrono::Utc;
//!
//! let variant = VariantId::new();
//! let entries = vec![
//!     NewLedgerEntry::new(variant, LedgerEventKind::Add, 5, Utc::now()).committed(1, 1),
//!     NewLedgerEntry::new(variant, LedgerEventKind::Reserve, 3, Utc::now()).committed(2, 2),
//! ];
//!
//! let stock = fold(variant, &entries);
//! assert_eq!((stock.available, stock.reserved, stock.sold), (2, 3, 0));
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod ledger;
pub mod reservation;
pub mod sales;
pub mod stock;
pub mod store;
pub mod types;

/// Environment module - injectable dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use drop_inventory_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
