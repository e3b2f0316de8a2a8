//! The public inventory API.
//!
//! [`InventoryService`] coordinates the [`Ledger`], the [`StockProjections`]
//! and the [`ReservationManager`] under one consistency contract: every
//! mutation is a single store commit, every mutating operation is
//! idempotent under its idempotency key, and failures surface only as
//! [`InventoryError`].

use crate::config::InventoryConfig;
use crate::error::{InventoryError, Result};
use crate::ledger::Ledger;
use crate::projection::StockProjections;
use crate::reservations::{ReservationManager, ReservationSettings, ReserveRequest, Transitioned};
use crate::retry::RetryPolicy;
use crate::timeout::with_timeout;
use chrono::{DateTime, Utc};
use drop_inventory_core::environment::Clock;
use drop_inventory_core::ledger::{LedgerEntry, LedgerEventKind, NewLedgerEntry};
use drop_inventory_core::reservation::{Reservation, ReservationStatus};
use drop_inventory_core::sales::{SalesSummary, reason_metadata, summarize};
use drop_inventory_core::stock::{Availability, StockProjection};
use drop_inventory_core::store::{Catalog, InventoryStore, StockChange};
use drop_inventory_core::types::{
    DropPolicy, IdempotencyKey, LedgerEntryId, Money, ReservationId, Variant, VariantId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Proof of a converted reservation, linking it to the order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    /// Converted reservation.
    pub reservation_id: ReservationId,
    /// Order the sale belongs to.
    pub order_reference: String,
    /// Variant sold.
    pub variant_id: VariantId,
    /// Units sold.
    pub quantity: u32,
    /// Unit price frozen at reservation time.
    pub unit_price: Money,
    /// `unit_price * quantity`.
    pub total: Money,
    /// The `purchase` ledger entry.
    pub ledger_entry_id: LedgerEntryId,
    /// When the purchase was recorded.
    pub purchased_at: DateTime<Utc>,
}

impl PurchaseReceipt {
    fn new(reservation: &Reservation, entry: &LedgerEntry) -> Self {
        Self {
            reservation_id: reservation.id,
            order_reference: reservation
                .order_reference
                .clone()
                .or_else(|| entry.reference.clone())
                .unwrap_or_default(),
            variant_id: reservation.variant_id,
            quantity: reservation.quantity,
            unit_price: reservation.unit_price.clone(),
            total: reservation.total_price(),
            ledger_entry_id: entry.id,
            purchased_at: entry.created_at,
        }
    }
}

/// Inventory control for product drops.
///
/// # Example
///
/// ```
/// use drop_inventory_runtime::{InventoryConfig, InventoryService, ReserveRequest};
/// use drop_inventory_testing::{fixtures, mocks::test_clock, InMemoryInventoryStore};
/// use drop_inventory_core::types::Fingerprint;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryInventoryStore::new();
/// let service = InventoryService::new(
///     Arc::new(store.clone()),
///     Arc::new(store),
///     Arc::new(test_clock()),
///     InventoryConfig::default(),
/// );
///
/// let (policy, variant) = fixtures::live_drop_with_variant(2);
/// service.register_drop(policy).await?;
/// let variant = service.register_variant(variant).await?;
/// service.replenish(variant.id, 5, "launch", None).await?;
///
/// let hold = service
///     .reserve(ReserveRequest::new(variant.id, 2, Fingerprint::new("fp"), "cs_1"))
///     .await?;
/// let receipt = service.confirm_purchase(hold.id, "order-1", None).await?;
/// assert_eq!(receipt.quantity, 2);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InventoryService {
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    ledger: Ledger,
    projections: StockProjections,
    reservations: ReservationManager,
    retry: RetryPolicy,
    timeout: Duration,
}

impl InventoryService {
    /// Create the service over its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn InventoryStore>,
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
        config: InventoryConfig,
    ) -> Self {
        let retry = config.retry_policy();
        let timeout = config.storage_timeout;
        Self {
            ledger: Ledger::new(Arc::clone(&store), timeout),
            projections: StockProjections::new(
                Arc::clone(&store),
                timeout,
                config.low_stock_threshold,
            ),
            reservations: ReservationManager::new(
                Arc::clone(&store),
                Arc::clone(&catalog),
                Arc::clone(&clock),
                ReservationSettings {
                    retry: retry.clone(),
                    timeout,
                    default_ttl: config.reservation_ttl,
                    sweep_batch_size: config.sweep_batch_size,
                },
            ),
            catalog,
            clock,
            retry,
            timeout,
        }
    }

    /// The ledger this service writes to.
    #[must_use]
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// The projection view.
    #[must_use]
    pub const fn projections(&self) -> &StockProjections {
        &self.projections
    }

    /// The reservation manager.
    #[must_use]
    pub const fn reservations(&self) -> &ReservationManager {
        &self.reservations
    }

    // =====================================================================
    // Catalog
    // =====================================================================

    /// Registers a variant and creates its empty projection.
    ///
    /// Registering the same variant id twice returns the stored variant.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::StorageTimeout`] / [`InventoryError::Storage`].
    pub async fn register_variant(&self, variant: Variant) -> Result<Variant> {
        let stored = with_timeout(self.timeout, self.catalog.insert_variant(variant)).await?;
        self.projections.create(stored.id).await?;
        tracing::info!(variant_id = %stored.id, drop_id = %stored.drop_id, "Variant registered");
        Ok(stored)
    }

    /// Toggles whether a variant can be reserved.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::UnknownVariant`].
    pub async fn set_variant_active(&self, variant_id: VariantId, active: bool) -> Result<Variant> {
        let variant = with_timeout(self.timeout, self.catalog.set_variant_active(variant_id, active))
            .await?
            .ok_or(InventoryError::UnknownVariant(variant_id))?;
        tracing::info!(variant_id = %variant_id, active, "Variant activation changed");
        Ok(variant)
    }

    /// Inserts or replaces a drop's policy.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::StorageTimeout`] / [`InventoryError::Storage`].
    pub async fn register_drop(&self, policy: DropPolicy) -> Result<()> {
        let drop_id = policy.drop_id;
        with_timeout(self.timeout, self.catalog.upsert_drop_policy(policy)).await?;
        tracing::info!(drop_id = %drop_id, "Drop policy stored");
        Ok(())
    }

    // =====================================================================
    // Checkout
    // =====================================================================

    /// Holds stock for a checkout (see [`ReservationManager::reserve`]).
    ///
    /// # Errors
    ///
    /// See [`ReservationManager::reserve`].
    pub async fn reserve(&self, request: ReserveRequest) -> Result<Reservation> {
        self.reservations.reserve(request).await
    }

    /// Converts a reservation into a sale and returns the receipt.
    ///
    /// A repeat with the same idempotency key, or for a reservation already
    /// converted under the same order reference, returns the original receipt.
    ///
    /// # Errors
    ///
    /// See [`ReservationManager::convert`].
    pub async fn confirm_purchase(
        &self,
        reservation_id: ReservationId,
        order_reference: &str,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<PurchaseReceipt> {
        if let Some(entry) = self.prior_entry(idempotency_key.as_ref()).await? {
            return self.receipt_for(entry).await;
        }

        match self
            .reservations
            .convert(reservation_id, order_reference, idempotency_key)
            .await
        {
            Ok(Transitioned { reservation, entry }) => Ok(PurchaseReceipt::new(&reservation, &entry)),
            Err(InventoryError::DuplicateIdempotencyKey(entry)) => self.receipt_for(*entry).await,
            Err(err @ InventoryError::InvalidReservationState {
                status: ReservationStatus::Converted,
                ..
            }) => {
                let reservation = self.reservations.get(reservation_id).await?;
                if reservation.order_reference.as_deref() != Some(order_reference) {
                    return Err(err);
                }
                let entry = self
                    .ledger
                    .entries_for(reservation.variant_id)
                    .await?
                    .into_iter()
                    .find(|e| e.kind == LedgerEventKind::Purchase && e.reservation_id == Some(reservation_id))
                    .ok_or(err)?;
                Ok(PurchaseReceipt::new(&reservation, &entry))
            }
            Err(err) => Err(err),
        }
    }

    /// Cancels a reservation and releases its stock.
    ///
    /// # Errors
    ///
    /// See [`ReservationManager::cancel`].
    pub async fn release(
        &self,
        reservation_id: ReservationId,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<Reservation> {
        if let Some(entry) = self.prior_entry(idempotency_key.as_ref()).await? {
            return self.reservation_for(entry).await;
        }

        match self.reservations.cancel(reservation_id, idempotency_key).await {
            Ok(transitioned) => Ok(transitioned.reservation),
            Err(InventoryError::DuplicateIdempotencyKey(entry)) => self.reservation_for(*entry).await,
            Err(err) => Err(err),
        }
    }

    /// Point read of a reservation.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::ReservationNotFound`].
    pub async fn reservation(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.reservations.get(reservation_id).await
    }

    /// Expires overdue reservations as of the service clock.
    ///
    /// # Errors
    ///
    /// See [`ReservationManager::sweep_expired`].
    pub async fn sweep_expired(&self) -> Result<usize> {
        self.reservations.sweep_expired(self.clock.now()).await
    }

    // =====================================================================
    // Stock movements
    // =====================================================================

    /// Adds stock (`add` entry).
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidQuantity`] for zero, or
    /// [`InventoryError::UnknownVariant`].
    pub async fn replenish(
        &self,
        variant_id: VariantId,
        quantity: u32,
        reason: &str,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<LedgerEntry> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity(0));
        }
        self.movement(variant_id, LedgerEventKind::Add, i64::from(quantity), reason, idempotency_key)
            .await
    }

    /// Puts returned units back on sale (`return` entry, `sold -> available`).
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidQuantity`] for zero or for more units
    /// than were sold.
    pub async fn record_return(
        &self,
        variant_id: VariantId,
        quantity: u32,
        reason: &str,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<LedgerEntry> {
        let quantity = i64::from(quantity);
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity(0));
        }
        if let Some(entry) = self.prior_entry(idempotency_key.as_ref()).await? {
            return Ok(entry);
        }
        let key = idempotency_key.clone();
        let result = if self.projections.read(variant_id).await?.sold < quantity {
            Err(InventoryError::InvalidQuantity(quantity))
        } else {
            self.movement(variant_id, LedgerEventKind::Return, quantity, reason, idempotency_key)
                .await
        };
        self.settle_refusal(key.as_ref(), result).await
    }

    /// Signed correction of available stock (`add` entry; negative values
    /// are write-offs).
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidQuantity`] for zero or for a change of
    /// more than `u32::MAX` units, or [`InventoryError::InsufficientStock`]
    /// when writing off more than is available.
    pub async fn adjust(
        &self,
        variant_id: VariantId,
        delta: i64,
        reason: &str,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<LedgerEntry> {
        let Ok(units) = u32::try_from(delta.unsigned_abs()) else {
            return Err(InventoryError::InvalidQuantity(delta));
        };
        if units == 0 {
            return Err(InventoryError::InvalidQuantity(0));
        }
        if let Some(entry) = self.prior_entry(idempotency_key.as_ref()).await? {
            return Ok(entry);
        }
        let key = idempotency_key.clone();
        let result = self.correct(variant_id, delta, units, reason, idempotency_key).await;
        self.settle_refusal(key.as_ref(), result).await
    }

    async fn correct(
        &self,
        variant_id: VariantId,
        delta: i64,
        units: u32,
        reason: &str,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<LedgerEntry> {
        if delta < 0 {
            let available = self.projections.read(variant_id).await?.available;
            if available < i64::from(units) {
                return Err(InventoryError::InsufficientStock {
                    variant_id,
                    requested: units,
                    available,
                });
            }
        }
        self.movement(variant_id, LedgerEventKind::Add, delta, reason, idempotency_key)
            .await
    }

    async fn movement(
        &self,
        variant_id: VariantId,
        kind: LedgerEventKind,
        quantity: i64,
        reason: &str,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<LedgerEntry> {
        if let Some(entry) = self.prior_entry(idempotency_key.as_ref()).await? {
            return Ok(entry);
        }

        let now = self.clock.now();
        let metadata = reason_metadata(reason);
        let build = |stock: &StockProjection| -> Result<StockChange> {
            let entry = NewLedgerEntry::new(variant_id, kind, quantity, now)
                .with_metadata(metadata.clone())
                .with_idempotency_key(idempotency_key.clone());
            Ok(StockChange::new(entry, stock.version))
        };

        match self.ledger.append_with_retry(&self.retry, variant_id, build).await {
            Ok(committed) => Ok(committed.entry),
            Err(InventoryError::DuplicateIdempotencyKey(entry)) => Ok(*entry),
            Err(err) => Err(err),
        }
    }

    // =====================================================================
    // Reads and maintenance
    // =====================================================================

    /// Live projection of a variant.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::UnknownVariant`].
    pub async fn stock(&self, variant_id: VariantId) -> Result<StockProjection> {
        self.projections.read(variant_id).await
    }

    /// Projection with its stock level.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::UnknownVariant`].
    pub async fn availability(&self, variant_id: VariantId) -> Result<Availability> {
        self.projections.availability(variant_id).await
    }

    /// Projection folded from the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::StorageTimeout`] / [`InventoryError::Storage`].
    pub async fn rebuild(&self, variant_id: VariantId) -> Result<StockProjection> {
        self.projections.rebuild(variant_id).await
    }

    /// Checks the live projection against the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::ProjectionDrift`] on mismatch.
    pub async fn verify(&self, variant_id: VariantId) -> Result<StockProjection> {
        self.projections.verify(variant_id).await
    }

    /// Overwrites the projection with the ledger fold.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::StorageTimeout`] / [`InventoryError::Storage`].
    pub async fn restore(&self, variant_id: VariantId) -> Result<StockProjection> {
        self.projections.restore(variant_id).await
    }

    /// Sales figures folded from the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::StorageTimeout`] / [`InventoryError::Storage`].
    pub async fn sales_summary(&self, variant_id: VariantId) -> Result<SalesSummary> {
        let entries = self.ledger.entries_for(variant_id).await?;
        Ok(summarize(variant_id, &entries))
    }

    async fn prior_entry(&self, key: Option<&IdempotencyKey>) -> Result<Option<LedgerEntry>> {
        match key {
            Some(key) => self.ledger.find_by_idempotency_key(key).await,
            None => Ok(None),
        }
    }

    /// Turns a refusal into the prior result when a same-key request
    /// committed while this one was checking stock.
    async fn settle_refusal(
        &self,
        key: Option<&IdempotencyKey>,
        result: Result<LedgerEntry>,
    ) -> Result<LedgerEntry> {
        match result {
            Err(err) if err.is_refusal() => match self.prior_entry(key).await? {
                Some(entry) => Ok(entry),
                None => Err(err),
            },
            other => other,
        }
    }

    async fn reservation_for(&self, entry: LedgerEntry) -> Result<Reservation> {
        match entry.reservation_id {
            Some(reservation_id) => self.reservations.get(reservation_id).await,
            None => Err(InventoryError::DuplicateIdempotencyKey(Box::new(entry))),
        }
    }

    async fn receipt_for(&self, entry: LedgerEntry) -> Result<PurchaseReceipt> {
        if entry.kind != LedgerEventKind::Purchase {
            return Err(InventoryError::DuplicateIdempotencyKey(Box::new(entry)));
        }
        let reservation = self.reservation_for(entry.clone()).await?;
        Ok(PurchaseReceipt::new(&reservation, &entry))
    }
}
