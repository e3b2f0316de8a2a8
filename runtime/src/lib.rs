//! # Drop Inventory Runtime
//!
//! Inventory control under concurrent, time-limited demand.
//!
//! This crate provides the services that sit between request handlers and
//! an [`InventoryStore`](drop_inventory_core::store::InventoryStore).
//!
//! ## Core Components
//!
//! - **Ledger**: append-only record of every stock mutation ([`Ledger`])
//! - **Stock Projection**: reads, rebuilds and repairs ([`StockProjections`])
//! - **Reservation Manager**: time-boxed holds during checkout ([`ReservationManager`])
//! - **Inventory Service**: the public API ([`InventoryService`])
//! - **Sweeper**: periodic expiry of overdue holds ([`Sweeper`])
//!
//! ## Example
//!
//! ```ignore
//! use drop_inventory_runtime::{InventoryConfig, InventoryService, ReserveRequest};
//!
//! let service = InventoryService::new(store, catalog, clock, InventoryConfig::from_env());
//!
//! let hold = service
//!     .reserve(ReserveRequest::new(variant_id, 1, fingerprint, session_id))
//!     .await?;
//! let receipt = service.confirm_purchase(hold.id, &order_id, None).await?;
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

/// Environment-driven configuration
pub mod config;

/// Error taxonomy
pub mod error;

pub mod ledger;
pub mod projection;
pub mod reservations;
pub mod service;
pub mod sweeper;

mod timeout;

pub use config::InventoryConfig;
pub use error::{InventoryError, Result};
pub use ledger::Ledger;
pub use projection::StockProjections;
pub use reservations::{ReservationManager, ReservationSettings, ReserveRequest, Transitioned};
pub use service::{InventoryService, PurchaseReceipt};
pub use sweeper::Sweeper;
