//! Public error taxonomy of the inventory runtime.
//!
//! Storage backends report [`StoreError`]; every runtime operation surfaces
//! [`InventoryError`] instead, so callers never see raw driver failures.

use drop_inventory_core::ledger::LedgerEntry;
use drop_inventory_core::reservation::ReservationStatus;
use drop_inventory_core::stock::{StockField, StockProjection};
use drop_inventory_core::store::StoreError;
use drop_inventory_core::types::{DropId, Fingerprint, ReservationId, VariantId};
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Message shown to customers when the item cannot be sold to them.
pub const UNAVAILABLE_MESSAGE: &str = "This item is no longer available.";
/// Message shown to customers for every other failure.
pub const TRY_AGAIN_MESSAGE: &str = "Something went wrong. Please try again later.";

/// Errors returned by inventory operations.
#[derive(Error, Debug, Clone)]
pub enum InventoryError {
    /// The idempotency key was already used; nothing was written.
    ///
    /// Service operations resolve this into the prior result; it only
    /// surfaces from the lower-level [`Ledger`](crate::Ledger).
    #[error("Idempotency key already used by ledger entry {}", .0.id)]
    DuplicateIdempotencyKey(Box<LedgerEntry>),

    /// Concurrent modification of a variant's projection.
    #[error("Concurrency conflict on variant {variant_id}: expected version {expected}, found {actual}")]
    VersionConflict {
        /// Variant whose projection conflicted.
        variant_id: VariantId,
        /// Version that was read.
        expected: i64,
        /// Version that was stored.
        actual: i64,
    },

    /// A projection counter would have gone below zero.
    #[error("Negative stock on variant {variant_id}: {field} would become {value}")]
    NegativeStock {
        /// Variant affected.
        variant_id: VariantId,
        /// Counter that would go negative.
        field: StockField,
        /// Value it would have taken.
        value: i64,
    },

    /// Fewer units available than requested.
    #[error("Insufficient stock on variant {variant_id}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Variant requested.
        variant_id: VariantId,
        /// Units requested.
        requested: u32,
        /// Units available at the last read.
        available: i64,
    },

    /// The requester reached the drop's per-customer limit.
    #[error("Purchase limit exceeded for {fingerprint} in drop {drop_id}: holds {held}, requested {requested}, limit {limit}")]
    PurchaseLimitExceeded {
        /// Requester.
        fingerprint: Fingerprint,
        /// Drop the limit applies to.
        drop_id: DropId,
        /// Units already held or bought.
        held: u32,
        /// Units requested.
        requested: u32,
        /// Configured limit.
        limit: u32,
    },

    /// The variant exists but is not for sale.
    #[error("Variant {0} is inactive")]
    VariantInactive(VariantId),

    /// The reservation's hold deadline passed.
    #[error("Reservation {reservation_id} expired at {expires_at}")]
    ReservationExpired {
        /// Reservation affected.
        reservation_id: ReservationId,
        /// Its deadline.
        expires_at: DateTime<Utc>,
    },

    /// The reservation is not in a status that allows the operation.
    #[error("Reservation {reservation_id} is {status}")]
    InvalidReservationState {
        /// Reservation affected.
        reservation_id: ReservationId,
        /// Its current status.
        status: ReservationStatus,
    },

    /// The retry budget was exhausted under contention.
    #[error("Reservation failed for variant {variant_id} after {attempts} attempts")]
    ReservationFailed {
        /// Variant requested.
        variant_id: VariantId,
        /// Attempts made.
        attempts: usize,
    },

    /// A storage call did not finish in time.
    #[error("Storage timeout after {0:?}")]
    StorageTimeout(Duration),

    /// No such variant.
    #[error("Unknown variant: {0}")]
    UnknownVariant(VariantId),

    /// No such reservation.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// The variant's drop is not accepting orders.
    #[error("Drop {0} is not live")]
    DropNotLive(DropId),

    /// A quantity was zero or out of range.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i64),

    /// The live projection disagrees with the ledger.
    #[error("Projection drift on variant {}: live {live:?}, rebuilt {rebuilt:?}", .live.variant_id)]
    ProjectionDrift {
        /// Projection currently stored.
        live: StockProjection,
        /// Projection folded from the ledger.
        rebuilt: StockProjection,
    },

    /// Non-transient backend failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl InventoryError {
    /// Whether this refusal may stem from a concurrent request that already
    /// did the work under the same idempotency key.
    #[must_use]
    pub const fn is_refusal(&self) -> bool {
        matches!(
            self,
            Self::InsufficientStock { .. }
                | Self::PurchaseLimitExceeded { .. }
                | Self::ReservationFailed { .. }
                | Self::InvalidQuantity(_)
        )
    }

    /// Whether the operation may succeed if retried unchanged.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::StorageTimeout(_))
    }

    /// Customer-facing message. Internal detail never leaks.
    #[must_use]
    pub const fn customer_message(&self) -> &'static str {
        match self {
            Self::InsufficientStock { .. }
            | Self::VariantInactive(_)
            | Self::PurchaseLimitExceeded { .. }
            | Self::DropNotLive(_)
            | Self::UnknownVariant(_) => UNAVAILABLE_MESSAGE,
            _ => TRY_AGAIN_MESSAGE,
        }
    }
}

impl From<StoreError> for InventoryError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::VersionConflict {
                variant_id,
                expected,
                actual,
            } => Self::VersionConflict {
                variant_id,
                expected,
                actual,
            },
            StoreError::NegativeStock {
                variant_id,
                field,
                value,
            } => Self::NegativeStock {
                variant_id,
                field,
                value,
            },
            StoreError::StockOverflow { delta, .. } => Self::InvalidQuantity(delta),
            StoreError::DuplicateIdempotencyKey(entry) => Self::DuplicateIdempotencyKey(entry),
            StoreError::ReservationConflict {
                reservation_id,
                status,
                ..
            } => Self::InvalidReservationState {
                reservation_id,
                status,
            },
            StoreError::ReservationNotFound(id) => Self::ReservationNotFound(id),
            StoreError::UnknownVariant(id) => Self::UnknownVariant(id),
            StoreError::PurchaseLimitExceeded {
                fingerprint,
                drop_id,
                held,
                requested,
                limit,
            } => Self::PurchaseLimitExceeded {
                fingerprint,
                drop_id,
                held,
                requested,
                limit,
            },
            StoreError::Database(message) | StoreError::Serialization(message) => {
                Self::Storage(message)
            }
        }
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_and_timeouts_are_transient() {
        let variant_id = VariantId::new();
        assert!(InventoryError::VersionConflict { variant_id, expected: 1, actual: 2 }.is_transient());
        assert!(InventoryError::StorageTimeout(Duration::from_secs(2)).is_transient());
        assert!(!InventoryError::VariantInactive(variant_id).is_transient());
        assert!(!InventoryError::Storage("connection reset".into()).is_transient());
    }

    #[test]
    fn customer_messages_hide_internals() {
        let variant_id = VariantId::new();
        let sold_out = InventoryError::InsufficientStock { variant_id, requested: 1, available: 0 };
        assert_eq!(sold_out.customer_message(), UNAVAILABLE_MESSAGE);

        let internal = InventoryError::Storage("relation \"stock\" does not exist".into());
        assert_eq!(internal.customer_message(), TRY_AGAIN_MESSAGE);
    }

    #[test]
    fn stock_overflow_maps_to_invalid_quantity() {
        let err: InventoryError = StoreError::StockOverflow {
            variant_id: VariantId::new(),
            field: StockField::Available,
            delta: i64::MAX,
        }
        .into();
        assert!(matches!(err, InventoryError::InvalidQuantity(i64::MAX)));
        assert!(err.is_refusal());
        assert!(!err.is_transient());
    }

    #[test]
    fn reservation_conflicts_map_to_invalid_state() {
        let reservation_id = ReservationId::new();
        let err: InventoryError = StoreError::ReservationConflict {
            reservation_id,
            status: ReservationStatus::Expired,
            version: 1,
        }
        .into();
        assert!(matches!(
            err,
            InventoryError::InvalidReservationState { status: ReservationStatus::Expired, .. }
        ));
    }
}
