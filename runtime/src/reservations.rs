//! Reservation manager: time-boxed holds on stock during checkout.
//!
//! Every operation commits the projection update, the ledger entry and the
//! reservation write as one unit through [`Ledger::append_with_retry`].
//! Transitions compare-and-swap the reservation's version, so among
//! concurrent convert / cancel / sweep calls on one reservation exactly one
//! wins and the others see [`InventoryError::InvalidReservationState`].

use crate::error::{InventoryError, Result};
use crate::ledger::Ledger;
use crate::metrics::InventoryMetrics;
use crate::retry::RetryPolicy;
use crate::timeout::with_timeout;
use chrono::{DateTime, Utc};
use drop_inventory_core::environment::Clock;
use drop_inventory_core::ledger::{LedgerEntry, LedgerEventKind, NewLedgerEntry};
use drop_inventory_core::reservation::{
    Reservation, ReservationStatus, ReservationTransition, ReservationWrite,
};
use drop_inventory_core::sales::{purchase_metadata, reason_metadata};
use drop_inventory_core::stock::StockProjection;
use drop_inventory_core::store::{Catalog, InventoryStore, PurchaseLimitGuard, StockChange};
use drop_inventory_core::types::{
    DropPolicy, Fingerprint, IdempotencyKey, ReservationId, Variant, VariantId,
};
use std::sync::Arc;
use std::time::Duration;

/// Reason recorded on release entries written by the sweeper.
pub const EXPIRED_REASON: &str = "reservation_expired";
/// Reason recorded on release entries written by a cancel.
pub const CANCELLED_REASON: &str = "reservation_cancelled";

/// A request to hold stock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReserveRequest {
    /// Variant to hold.
    pub variant_id: VariantId,
    /// Units requested.
    pub quantity: u32,
    /// Requester fingerprint.
    pub fingerprint: Fingerprint,
    /// Checkout session creating the hold.
    pub checkout_session_id: String,
    /// Hold duration; the configured default when `None`.
    pub ttl: Option<Duration>,
    /// Key making retries of this request safe.
    pub idempotency_key: Option<IdempotencyKey>,
    /// Reserve what is left instead of failing when stock is short.
    pub allow_partial: bool,
}

impl ReserveRequest {
    /// A request with the default TTL, no key, and all-or-nothing fill.
    #[must_use]
    pub fn new(
        variant_id: VariantId,
        quantity: u32,
        fingerprint: Fingerprint,
        checkout_session_id: impl Into<String>,
    ) -> Self {
        Self {
            variant_id,
            quantity,
            fingerprint,
            checkout_session_id: checkout_session_id.into(),
            ttl: None,
            idempotency_key: None,
            allow_partial: false,
        }
    }

    /// Sets the hold duration.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    /// Accept a partial fill.
    #[must_use]
    pub const fn allow_partial(mut self) -> Self {
        self.allow_partial = true;
        self
    }
}

/// Result of a reservation transition.
#[derive(Clone, Debug, PartialEq)]
pub struct Transitioned {
    /// The reservation after the transition.
    pub reservation: Reservation,
    /// The ledger entry recording it.
    pub entry: LedgerEntry,
}

/// Creates, converts, cancels and expires reservations.
#[derive(Clone)]
pub struct ReservationManager {
    store: Arc<dyn InventoryStore>,
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    ledger: Ledger,
    retry: RetryPolicy,
    timeout: Duration,
    default_ttl: Duration,
    sweep_batch_size: usize,
}

/// Settings for a [`ReservationManager`].
#[derive(Clone, Debug)]
pub struct ReservationSettings {
    /// Retry policy for contended commits.
    pub retry: RetryPolicy,
    /// Deadline for every storage call.
    pub timeout: Duration,
    /// Hold duration when the request has none.
    pub default_ttl: Duration,
    /// Reservations expired per sweep batch.
    pub sweep_batch_size: usize,
}

impl ReservationManager {
    /// Create a manager.
    #[must_use]
    pub fn new(
        store: Arc<dyn InventoryStore>,
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
        settings: ReservationSettings,
    ) -> Self {
        Self {
            ledger: Ledger::new(Arc::clone(&store), settings.timeout),
            store,
            catalog,
            clock,
            retry: settings.retry,
            timeout: settings.timeout,
            default_ttl: settings.default_ttl,
            sweep_batch_size: settings.sweep_batch_size.max(1),
        }
    }

    /// Holds stock for a checkout.
    ///
    /// A repeat of a request carrying the same idempotency key returns the
    /// reservation created the first time.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::InvalidQuantity`] for a zero quantity
    /// - [`InventoryError::UnknownVariant`], [`InventoryError::VariantInactive`],
    ///   [`InventoryError::DropNotLive`]
    /// - [`InventoryError::PurchaseLimitExceeded`]
    /// - [`InventoryError::InsufficientStock`]
    /// - [`InventoryError::ReservationFailed`] after the retry budget
    pub async fn reserve(&self, request: ReserveRequest) -> Result<Reservation> {
        let result = self.reserve_inner(&request).await;
        InventoryMetrics::record_reservation(reservation_outcome(&result));
        match &result {
            Ok(reservation) => tracing::info!(
                reservation_id = %reservation.id,
                variant_id = %reservation.variant_id,
                quantity = reservation.quantity,
                expires_at = %reservation.expires_at,
                "Reservation created"
            ),
            Err(err) => tracing::warn!(
                variant_id = %request.variant_id,
                quantity = request.quantity,
                error = %err,
                "Reservation refused"
            ),
        }
        result
    }

    async fn reserve_inner(&self, request: &ReserveRequest) -> Result<Reservation> {
        if request.quantity == 0 {
            return Err(InventoryError::InvalidQuantity(0));
        }
        let Some(key) = &request.idempotency_key else {
            return self.hold(request).await;
        };
        if let Some(entry) = self.ledger.find_by_idempotency_key(key).await? {
            return self.prior_reservation(entry).await;
        }

        // A same-key request running concurrently may have taken the stock
        // this one was refused for.
        match self.hold(request).await {
            Err(err) if err.is_refusal() => match self.ledger.find_by_idempotency_key(key).await? {
                Some(entry) => self.prior_reservation(entry).await,
                None => Err(err),
            },
            other => other,
        }
    }

    async fn hold(&self, request: &ReserveRequest) -> Result<Reservation> {
        let now = self.clock.now();
        let (variant, policy) = self.sellable(request.variant_id, now).await?;

        let held = with_timeout(
            self.timeout,
            self.store.units_held(&request.fingerprint, policy.drop_id, now),
        )
        .await?;
        let guard = PurchaseLimitGuard {
            fingerprint: request.fingerprint.clone(),
            drop_id: policy.drop_id,
            requested: request.quantity,
            limit: policy.max_per_customer,
            now,
        };
        guard.check(held)?;

        let ttl = request.ttl.unwrap_or(self.default_ttl);
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let reservation_id = ReservationId::new();

        let build = |stock: &StockProjection| -> Result<StockChange> {
            let quantity = grant(request, stock.available)?;
            let reservation = Reservation {
                id: reservation_id,
                checkout_session_id: request.checkout_session_id.clone(),
                variant_id: variant.id,
                drop_id: policy.drop_id,
                quantity,
                unit_price: variant.price.clone(),
                fingerprint: request.fingerprint.clone(),
                order_reference: None,
                status: ReservationStatus::Active,
                expires_at,
                created_at: now,
                updated_at: now,
                version: 0,
            };
            let entry = NewLedgerEntry::new(
                variant.id,
                LedgerEventKind::Reserve,
                i64::from(quantity),
                now,
            )
            .with_reservation(reservation_id)
            .with_reference(request.checkout_session_id.clone())
            .with_idempotency_key(request.idempotency_key.clone());

            Ok(StockChange::new(entry, stock.version)
                .with_reservation(ReservationWrite::Insert(reservation))
                .with_limit_guard(PurchaseLimitGuard {
                    requested: quantity,
                    ..guard.clone()
                }))
        };

        match self.ledger.append_with_retry(&self.retry, variant.id, build).await {
            Ok(committed) => committed.reservation.ok_or_else(|| {
                InventoryError::Storage("commit returned no reservation".to_string())
            }),
            Err(InventoryError::DuplicateIdempotencyKey(entry)) => {
                self.prior_reservation(*entry).await
            }
            Err(err) => Err(err),
        }
    }

    /// Converts an active, unexpired reservation into a sale.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::ReservationNotFound`]
    /// - [`InventoryError::ReservationExpired`] when expired or past its deadline
    /// - [`InventoryError::InvalidReservationState`] when converted or cancelled
    pub async fn convert(
        &self,
        reservation_id: ReservationId,
        order_reference: &str,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<Transitioned> {
        let reservation = self.get(reservation_id).await?;
        let now = self.clock.now();
        match reservation.status {
            ReservationStatus::Active if !reservation.is_past_expiry(now) => {}
            ReservationStatus::Active | ReservationStatus::Expired => {
                return Err(expired(&reservation));
            }
            status @ (ReservationStatus::Converted | ReservationStatus::Cancelled) => {
                return Err(InventoryError::InvalidReservationState {
                    reservation_id,
                    status,
                });
            }
        }

        let result = self
            .transition(
                &reservation,
                ReservationStatus::Converted,
                Some(order_reference.to_string()),
                purchase_metadata(&reservation.unit_price),
                idempotency_key,
                now,
            )
            .await;

        match result {
            Err(InventoryError::InvalidReservationState {
                status: ReservationStatus::Expired,
                ..
            }) => Err(expired(&reservation)),
            other => other,
        }
    }

    /// Cancels an active reservation and releases its stock.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::ReservationNotFound`]
    /// - [`InventoryError::InvalidReservationState`] from a terminal status
    pub async fn cancel(
        &self,
        reservation_id: ReservationId,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<Transitioned> {
        let reservation = self.get(reservation_id).await?;
        if reservation.status.is_terminal() {
            return Err(InventoryError::InvalidReservationState {
                reservation_id,
                status: reservation.status,
            });
        }
        self.transition(
            &reservation,
            ReservationStatus::Cancelled,
            None,
            reason_metadata(CANCELLED_REASON),
            idempotency_key,
            self.clock.now(),
        )
        .await
    }

    /// Expires every active reservation whose deadline is at or before
    /// `now`, in batches. Returns the number this call expired.
    ///
    /// Reservations converted, cancelled or swept concurrently are skipped.
    ///
    /// # Errors
    ///
    /// Returns the storage error when listing expired reservations fails.
    /// Failures on individual reservations are logged and skipped.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut swept = 0;

        loop {
            let batch = with_timeout(
                self.timeout,
                self.store.expired_reservations(now, self.sweep_batch_size),
            )
            .await?;
            let batch_len = batch.len();
            let mut progressed = 0;

            for reservation in batch {
                let key = IdempotencyKey::derive(reservation.id, "expire");
                match self
                    .transition(
                        &reservation,
                        ReservationStatus::Expired,
                        None,
                        reason_metadata(EXPIRED_REASON),
                        Some(key),
                        now,
                    )
                    .await
                {
                    Ok(_) => {
                        swept += 1;
                        progressed += 1;
                    }
                    Err(
                        InventoryError::InvalidReservationState { .. }
                        | InventoryError::DuplicateIdempotencyKey(_),
                    ) => {
                        progressed += 1;
                        tracing::debug!(reservation_id = %reservation.id, "Reservation already settled");
                    }
                    Err(err) => {
                        tracing::warn!(reservation_id = %reservation.id, error = %err, "Failed to expire reservation");
                    }
                }
            }

            if batch_len < self.sweep_batch_size || progressed == 0 {
                break;
            }
        }

        if swept > 0 {
            InventoryMetrics::record_swept(swept);
            tracing::info!(swept, "Expired reservations swept");
        }
        Ok(swept)
    }

    /// Point read of a reservation.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::ReservationNotFound`].
    pub async fn get(&self, reservation_id: ReservationId) -> Result<Reservation> {
        with_timeout(self.timeout, self.store.reservation(reservation_id))
            .await?
            .ok_or(InventoryError::ReservationNotFound(reservation_id))
    }

    async fn transition(
        &self,
        reservation: &Reservation,
        to: ReservationStatus,
        order_reference: Option<String>,
        metadata: serde_json::Value,
        idempotency_key: Option<IdempotencyKey>,
        now: DateTime<Utc>,
    ) -> Result<Transitioned> {
        let kind = match to {
            ReservationStatus::Converted => LedgerEventKind::Purchase,
            _ => LedgerEventKind::Release,
        };

        let build = |stock: &StockProjection| -> Result<StockChange> {
            let mut entry = NewLedgerEntry::new(
                reservation.variant_id,
                kind,
                i64::from(reservation.quantity),
                now,
            )
            .with_reservation(reservation.id)
            .with_metadata(metadata.clone())
            .with_idempotency_key(idempotency_key.clone());
            if let Some(order) = &order_reference {
                entry = entry.with_reference(order.clone());
            }

            Ok(StockChange::new(entry, stock.version).with_reservation(
                ReservationWrite::Transition(ReservationTransition {
                    reservation_id: reservation.id,
                    expected_version: reservation.version,
                    to,
                    order_reference: order_reference.clone(),
                    at: now,
                }),
            ))
        };

        let committed = self
            .ledger
            .append_with_retry(&self.retry, reservation.variant_id, build)
            .await?;
        let reservation = committed.reservation.ok_or_else(|| {
            InventoryError::Storage("commit returned no reservation".to_string())
        })?;
        tracing::info!(
            reservation_id = %reservation.id,
            status = %reservation.status,
            "Reservation transitioned"
        );
        Ok(Transitioned {
            reservation,
            entry: committed.entry,
        })
    }

    async fn sellable(&self, variant_id: VariantId, now: DateTime<Utc>) -> Result<(Variant, DropPolicy)> {
        let variant = with_timeout(self.timeout, self.catalog.variant(variant_id))
            .await?
            .ok_or(InventoryError::UnknownVariant(variant_id))?;
        if !variant.active {
            return Err(InventoryError::VariantInactive(variant_id));
        }
        let policy = with_timeout(self.timeout, self.catalog.drop_policy(variant.drop_id))
            .await?
            .filter(|policy| policy.accepts_orders(now))
            .ok_or(InventoryError::DropNotLive(variant.drop_id))?;
        Ok((variant, policy))
    }

    /// Resolves a reused reservation key to the reservation it created.
    async fn prior_reservation(&self, entry: LedgerEntry) -> Result<Reservation> {
        match (entry.kind, entry.reservation_id) {
            (LedgerEventKind::Reserve, Some(reservation_id)) => {
                tracing::debug!(reservation_id = %reservation_id, "Returning reservation for reused key");
                self.get(reservation_id).await
            }
            _ => Err(InventoryError::DuplicateIdempotencyKey(Box::new(entry))),
        }
    }
}

/// Units to hold given what is available.
fn grant(request: &ReserveRequest, available: i64) -> Result<u32> {
    if available >= i64::from(request.quantity) {
        return Ok(request.quantity);
    }
    if request.allow_partial && available > 0 {
        return u32::try_from(available).map_err(|_| InventoryError::InvalidQuantity(available));
    }
    Err(InventoryError::InsufficientStock {
        variant_id: request.variant_id,
        requested: request.quantity,
        available,
    })
}

fn expired(reservation: &Reservation) -> InventoryError {
    InventoryError::ReservationExpired {
        reservation_id: reservation.id,
        expires_at: reservation.expires_at,
    }
}

const fn reservation_outcome(result: &Result<Reservation>) -> &'static str {
    match result {
        Ok(_) => "reserved",
        Err(InventoryError::InsufficientStock { .. }) => "insufficient_stock",
        Err(InventoryError::PurchaseLimitExceeded { .. }) => "limit_exceeded",
        Err(InventoryError::VariantInactive(_) | InventoryError::DropNotLive(_)) => "not_for_sale",
        Err(InventoryError::ReservationFailed { .. }) => "failed",
        Err(_) => "error",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request(available_quantity: u32, allow_partial: bool) -> ReserveRequest {
        let request = ReserveRequest::new(VariantId::new(), available_quantity, Fingerprint::new("fp"), "cs_1");
        if allow_partial { request.allow_partial() } else { request }
    }

    #[test]
    fn grant_full_partial_and_short() {
        assert_eq!(grant(&request(3, false), 5).unwrap(), 3);
        assert_eq!(grant(&request(3, true), 2).unwrap(), 2);
        assert!(matches!(
            grant(&request(3, false), 2),
            Err(InventoryError::InsufficientStock { requested: 3, available: 2, .. })
        ));
        assert!(matches!(
            grant(&request(1, true), 0),
            Err(InventoryError::InsufficientStock { .. })
        ));
    }
}
