//! Storage boundary for the inventory core.
//!
//! The [`InventoryStore`] trait persists three things: the insert-only ledger,
//! one projection row per variant (with a version column), and one row per
//! reservation (with a version and status column).
//!
//! # Transactional boundary
//!
//! [`InventoryStore::commit`] is the only write path for stock. It applies a
//! [`StockChange`] as one atomic unit:
//!
//! 1. reject a reused idempotency key, or an entry id that is already in the
//!    ledger, with [`StoreError::DuplicateIdempotencyKey`] carrying the
//!    original entry;
//! 2. read the projection and run
//!    [`StockProjection::apply_delta`](crate::stock::StockProjection::apply_delta)
//!    with the entry's effect and the caller's expected version;
//! 3. re-check the purchase limit, if a guard is attached;
//! 4. insert or transition the reservation (compare-and-swap on its version);
//! 5. write the projection, append the entry.
//!
//! Either every write lands or none do. No observer ever sees a ledger entry
//! without its projection effect or the reverse.
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures so the store can be shared as
//! `Arc<dyn InventoryStore>`.

use crate::ledger::{LedgerEntry, NewLedgerEntry};
use crate::reservation::{Reservation, ReservationStatus, ReservationWrite};
use crate::stock::{StockError, StockField, StockProjection};
use crate::types::{DropId, DropPolicy, Fingerprint, IdempotencyKey, ReservationId, Variant, VariantId};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by storage methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors reported by storage backends.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The projection version moved on since the caller read it.
    #[error("Version conflict on variant {variant_id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Variant whose projection conflicted.
        variant_id: VariantId,
        /// Version the caller read.
        expected: i64,
        /// Version currently stored.
        actual: i64,
    },

    /// The change would drive a projection counter below zero.
    #[error("Negative stock on variant {variant_id}: {field} would become {value}")]
    NegativeStock {
        /// Variant whose projection would go negative.
        variant_id: VariantId,
        /// Which counter.
        field: StockField,
        /// The value it would have taken.
        value: i64,
    },

    /// The change would overflow a projection counter.
    #[error("Stock overflow on variant {variant_id}: {field} cannot change by {delta}")]
    StockOverflow {
        /// Variant whose projection would overflow.
        variant_id: VariantId,
        /// Which counter.
        field: StockField,
        /// The change that did not fit.
        delta: i64,
    },

    /// The idempotency key, or the entry id, was already committed; nothing
    /// was written. Carries the committed entry.
    #[error("Idempotency key already used by ledger entry {}", .0.id)]
    DuplicateIdempotencyKey(Box<LedgerEntry>),

    /// The reservation changed since the caller read it, or the requested
    /// transition is not allowed from its current status.
    #[error("Reservation {reservation_id} is {status} at version {version}")]
    ReservationConflict {
        /// Reservation that conflicted.
        reservation_id: ReservationId,
        /// Its current status.
        status: ReservationStatus,
        /// Its current version.
        version: i64,
    },

    /// No reservation with this id.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// No projection (and therefore no registered variant) with this id.
    #[error("Unknown variant: {0}")]
    UnknownVariant(VariantId),

    /// The purchase-limit guard attached to a change failed.
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

    /// Database connection or query failure.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored value could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<StockError> for StoreError {
    fn from(error: StockError) -> Self {
        match error {
            StockError::VersionConflict {
                variant_id,
                expected,
                actual,
            } => Self::VersionConflict {
                variant_id,
                expected,
                actual,
            },
            StockError::NegativeStock {
                variant_id,
                field,
                value,
            } => Self::NegativeStock {
                variant_id,
                field,
                value,
            },
            StockError::Overflow {
                variant_id,
                field,
                delta,
            } => Self::StockOverflow {
                variant_id,
                field,
                delta,
            },
        }
    }
}

/// Purchase-limit re-check performed inside the commit transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurchaseLimitGuard {
    /// Requester.
    pub fingerprint: Fingerprint,
    /// Drop the limit applies to.
    pub drop_id: DropId,
    /// Units being reserved.
    pub requested: u32,
    /// Maximum units per requester.
    pub limit: u32,
    /// Reference time for expiry of active holds.
    pub now: DateTime<Utc>,
}

impl PurchaseLimitGuard {
    /// Checks `held + requested <= limit`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PurchaseLimitExceeded`] when the limit would be exceeded.
    pub fn check(&self, held: u32) -> Result<(), StoreError> {
        if held.saturating_add(self.requested) > self.limit {
            return Err(StoreError::PurchaseLimitExceeded {
                fingerprint: self.fingerprint.clone(),
                drop_id: self.drop_id,
                held,
                requested: self.requested,
                limit: self.limit,
            });
        }
        Ok(())
    }
}

/// One atomic unit of inventory work.
#[derive(Clone, Debug, PartialEq)]
pub struct StockChange {
    /// Ledger entry to append; its effect is applied to the projection.
    pub entry: NewLedgerEntry,
    /// Projection version the caller read.
    pub expected_version: i64,
    /// Reservation insert or transition committed alongside.
    pub reservation: Option<ReservationWrite>,
    /// Purchase-limit re-check.
    pub limit_guard: Option<PurchaseLimitGuard>,
}

impl StockChange {
    /// A change that only appends `entry` against `expected_version`.
    #[must_use]
    pub const fn new(entry: NewLedgerEntry, expected_version: i64) -> Self {
        Self {
            entry,
            expected_version,
            reservation: None,
            limit_guard: None,
        }
    }

    /// Attaches a reservation write.
    #[must_use]
    pub fn with_reservation(mut self, write: ReservationWrite) -> Self {
        self.reservation = Some(write);
        self
    }

    /// Attaches a purchase-limit guard.
    #[must_use]
    pub fn with_limit_guard(mut self, guard: PurchaseLimitGuard) -> Self {
        self.limit_guard = Some(guard);
        self
    }
}

/// Result of a successful [`InventoryStore::commit`].
#[derive(Clone, Debug, PartialEq)]
pub struct Committed {
    /// The appended entry.
    pub entry: LedgerEntry,
    /// The projection after the change.
    pub stock: StockProjection,
    /// The reservation after the change, if one was written.
    pub reservation: Option<Reservation>,
}

/// Durable storage for ledger, projections and reservations.
pub trait InventoryStore: Send + Sync {
    /// Creates the empty projection row for a variant; returns the existing
    /// row unchanged if there is one.
    fn create_stock(&self, variant_id: VariantId) -> StoreFuture<'_, StockProjection>;

    /// Point read of a projection.
    fn read_stock(&self, variant_id: VariantId) -> StoreFuture<'_, Option<StockProjection>>;

    /// Overwrites a projection row with a value rebuilt from the ledger.
    fn restore_stock(&self, stock: StockProjection) -> StoreFuture<'_, ()>;

    /// Applies a [`StockChange`] atomically (see the module docs).
    fn commit(&self, change: StockChange) -> StoreFuture<'_, Committed>;

    /// All entries of a variant in ledger order (creation time, then
    /// insertion sequence).
    fn entries_for(&self, variant_id: VariantId) -> StoreFuture<'_, Vec<LedgerEntry>>;

    /// The entry recorded under an idempotency key, if any.
    fn find_entry_by_key(&self, key: &IdempotencyKey) -> StoreFuture<'_, Option<LedgerEntry>>;

    /// Point read of a reservation.
    fn reservation(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>>;

    /// Active reservations with `expires_at <= now`, oldest deadline first.
    fn expired_reservations(&self, now: DateTime<Utc>, limit: usize) -> StoreFuture<'_, Vec<Reservation>>;

    /// Units a requester holds or bought in a drop
    /// (see [`Reservation::counts_toward_limit`]).
    fn units_held(
        &self,
        fingerprint: &Fingerprint,
        drop_id: DropId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, u32>;
}

/// Catalog collaborator: variant identity, price, active flag, drop policy.
pub trait Catalog: Send + Sync {
    /// Looks up a variant.
    fn variant(&self, id: VariantId) -> StoreFuture<'_, Option<Variant>>;

    /// Inserts a variant if absent and returns the stored one.
    fn insert_variant(&self, variant: Variant) -> StoreFuture<'_, Variant>;

    /// Toggles the active flag; returns the updated variant if it exists.
    fn set_variant_active(&self, id: VariantId, active: bool) -> StoreFuture<'_, Option<Variant>>;

    /// Looks up a drop's policy.
    fn drop_policy(&self, id: DropId) -> StoreFuture<'_, Option<DropPolicy>>;

    /// Inserts or replaces a drop's policy.
    fn upsert_drop_policy(&self, policy: DropPolicy) -> StoreFuture<'_, ()>;
}
