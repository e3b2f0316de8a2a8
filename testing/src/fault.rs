//! Store wrapper that injects conflicts and stalls.
//!
//! Used to drive the retry and timeout paths of the runtime without a real
//! database.

use chrono::{DateTime, Utc};
use drop_inventory_core::ledger::LedgerEntry;
use drop_inventory_core::reservation::Reservation;
use drop_inventory_core::stock::StockProjection;
use drop_inventory_core::store::{Committed, InventoryStore, StockChange, StoreError, StoreFuture};
use drop_inventory_core::types::{DropId, Fingerprint, IdempotencyKey, ReservationId, VariantId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Wraps an [`InventoryStore`] and misbehaves on request.
///
/// - [`inject_conflicts`](Self::inject_conflicts): the next `n` commits fail
///   with [`StoreError::VersionConflict`] without touching the inner store.
/// - [`stall_for`](Self::stall_for): every call sleeps before delegating.
/// - [`delay_acknowledgements`](Self::delay_acknowledgements): the next `n`
///   commits land in the inner store, then sleep before reporting success.
/// - [`stall_next_units_held`](Self::stall_next_units_held): only the next
///   purchase-limit read sleeps.
#[derive(Clone)]
pub struct FaultInjectingStore {
    inner: Arc<dyn InventoryStore>,
    conflicts_remaining: Arc<AtomicUsize>,
    stall_ms: Arc<AtomicU64>,
    commit_attempts: Arc<AtomicUsize>,
    late_acks_remaining: Arc<AtomicUsize>,
    ack_delay_ms: Arc<AtomicU64>,
    units_held_stall_ms: Arc<AtomicU64>,
}

impl FaultInjectingStore {
    /// Wraps `inner` with no faults enabled.
    #[must_use]
    pub fn new(inner: Arc<dyn InventoryStore>) -> Self {
        Self {
            inner,
            conflicts_remaining: Arc::new(AtomicUsize::new(0)),
            stall_ms: Arc::new(AtomicU64::new(0)),
            commit_attempts: Arc::new(AtomicUsize::new(0)),
            late_acks_remaining: Arc::new(AtomicUsize::new(0)),
            ack_delay_ms: Arc::new(AtomicU64::new(0)),
            units_held_stall_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Makes the next `count` commits fail with a version conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.conflicts_remaining.store(count, Ordering::SeqCst);
    }

    /// Delays every call by `delay`. `Duration::ZERO` disables the stall.
    pub fn stall_for(&self, delay: Duration) {
        self.stall_ms.store(millis(delay), Ordering::SeqCst);
    }

    /// Makes the next `count` commits apply, then wait `delay` before
    /// returning, as if the acknowledgement got lost on the way back.
    pub fn delay_acknowledgements(&self, count: usize, delay: Duration) {
        self.ack_delay_ms.store(millis(delay), Ordering::SeqCst);
        self.late_acks_remaining.store(count, Ordering::SeqCst);
    }

    /// Delays only the next `units_held` call by `delay`.
    pub fn stall_next_units_held(&self, delay: Duration) {
        self.units_held_stall_ms.store(millis(delay), Ordering::SeqCst);
    }

    /// Number of commit calls seen, including injected failures.
    #[must_use]
    pub fn commit_attempts(&self) -> usize {
        self.commit_attempts.load(Ordering::SeqCst)
    }

    async fn stall(&self) {
        let millis = self.stall_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    fn take_conflict(&self) -> bool {
        take_one(&self.conflicts_remaining)
    }
}

fn take_one(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

impl InventoryStore for FaultInjectingStore {
    fn create_stock(&self, variant_id: VariantId) -> StoreFuture<'_, StockProjection> {
        Box::pin(async move {
            self.stall().await;
            self.inner.create_stock(variant_id).await
        })
    }

    fn read_stock(&self, variant_id: VariantId) -> StoreFuture<'_, Option<StockProjection>> {
        Box::pin(async move {
            self.stall().await;
            self.inner.read_stock(variant_id).await
        })
    }

    fn restore_stock(&self, stock: StockProjection) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.stall().await;
            self.inner.restore_stock(stock).await
        })
    }

    fn commit(&self, change: StockChange) -> StoreFuture<'_, Committed> {
        Box::pin(async move {
            self.commit_attempts.fetch_add(1, Ordering::SeqCst);
            self.stall().await;
            if self.take_conflict() {
                return Err(StoreError::VersionConflict {
                    variant_id: change.entry.variant_id,
                    expected: change.expected_version,
                    actual: change.expected_version + 1,
                });
            }
            let committed = self.inner.commit(change).await?;
            if take_one(&self.late_acks_remaining) {
                let delay = self.ack_delay_ms.load(Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Ok(committed)
        })
    }

    fn entries_for(&self, variant_id: VariantId) -> StoreFuture<'_, Vec<LedgerEntry>> {
        Box::pin(async move {
            self.stall().await;
            self.inner.entries_for(variant_id).await
        })
    }

    fn find_entry_by_key(&self, key: &IdempotencyKey) -> StoreFuture<'_, Option<LedgerEntry>> {
        let key = key.clone();
        Box::pin(async move {
            self.stall().await;
            self.inner.find_entry_by_key(&key).await
        })
    }

    fn reservation(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(async move {
            self.stall().await;
            self.inner.reservation(id).await
        })
    }

    fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<Reservation>> {
        Box::pin(async move {
            self.stall().await;
            self.inner.expired_reservations(now, limit).await
        })
    }

    fn units_held(
        &self,
        fingerprint: &Fingerprint,
        drop_id: DropId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, u32> {
        let fingerprint = fingerprint.clone();
        Box::pin(async move {
            self.stall().await;
            let once = self.units_held_stall_ms.swap(0, Ordering::SeqCst);
            if once > 0 {
                tokio::time::sleep(Duration::from_millis(once)).await;
            }
            self.inner.units_held(&fingerprint, drop_id, now).await
        })
    }
}
