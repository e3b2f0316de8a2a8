//! In-memory inventory storage for fast, deterministic tests.
//!
//! [`InMemoryInventoryStore`] implements both [`InventoryStore`] and
//! [`Catalog`]. Each commit runs under a single mutex, which gives it the same
//! all-or-nothing semantics as the Postgres transaction: every check happens
//! before the first write.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use chrono::{DateTime, Utc};
use drop_inventory_core::ledger::{LedgerEntry, sort_entries};
use drop_inventory_core::reservation::{Reservation, ReservationStatus, ReservationWrite};
use drop_inventory_core::stock::StockProjection;
use drop_inventory_core::store::{
    Catalog, Committed, InventoryStore, StockChange, StoreError, StoreFuture,
};
use drop_inventory_core::types::{
    DropId, DropPolicy, Fingerprint, IdempotencyKey, ReservationId, Variant, VariantId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Default)]
struct InventoryState {
    stock: HashMap<VariantId, StockProjection>,
    ledger: Vec<LedgerEntry>,
    keys: HashMap<IdempotencyKey, usize>,
    reservations: HashMap<ReservationId, Reservation>,
    next_sequence: i64,
}

impl InventoryState {
    fn units_held(&self, fingerprint: &Fingerprint, drop_id: DropId, now: DateTime<Utc>) -> u32 {
        self.reservations
            .values()
            .filter(|r| &r.fingerprint == fingerprint && r.drop_id == drop_id)
            .filter(|r| r.counts_toward_limit(now))
            .map(|r| r.quantity)
            .sum()
    }

    fn commit(&mut self, change: StockChange) -> Result<Committed, StoreError> {
        let replayed = change
            .entry
            .idempotency_key
            .as_ref()
            .and_then(|key| self.keys.get(key).copied())
            .or_else(|| self.ledger.iter().position(|e| e.id == change.entry.id));
        if let Some(index) = replayed {
            return Err(StoreError::DuplicateIdempotencyKey(Box::new(
                self.ledger[index].clone(),
            )));
        }

        let variant_id = change.entry.variant_id;
        let current = self
            .stock
            .get(&variant_id)
            .copied()
            .ok_or(StoreError::UnknownVariant(variant_id))?;
        let next = current.apply_delta(change.entry.effect(), change.expected_version)?;

        if let Some(guard) = &change.limit_guard {
            guard.check(self.units_held(&guard.fingerprint, guard.drop_id, guard.now))?;
        }

        let reservation = match change.reservation {
            None => None,
            Some(ReservationWrite::Insert(reservation)) => {
                if let Some(existing) = self.reservations.get(&reservation.id) {
                    return Err(StoreError::ReservationConflict {
                        reservation_id: existing.id,
                        status: existing.status,
                        version: existing.version,
                    });
                }
                Some(reservation)
            }
            Some(ReservationWrite::Transition(transition)) => {
                let current = self
                    .reservations
                    .get(&transition.reservation_id)
                    .ok_or(StoreError::ReservationNotFound(transition.reservation_id))?;
                if current.version != transition.expected_version
                    || !current.status.can_transition_to(transition.to)
                {
                    return Err(StoreError::ReservationConflict {
                        reservation_id: current.id,
                        status: current.status,
                        version: current.version,
                    });
                }
                Some(current.transitioned(&transition))
            }
        };

        self.next_sequence += 1;
        let entry = change.entry.committed(self.next_sequence, next.version);
        self.stock.insert(variant_id, next);
        if let Some(key) = &entry.idempotency_key {
            self.keys.insert(key.clone(), self.ledger.len());
        }
        self.ledger.push(entry.clone());
        if let Some(reservation) = &reservation {
            self.reservations.insert(reservation.id, reservation.clone());
        }

        Ok(Committed {
            entry,
            stock: next,
            reservation,
        })
    }
}

#[derive(Debug, Default)]
struct CatalogState {
    variants: HashMap<VariantId, Variant>,
    drops: HashMap<DropId, DropPolicy>,
}

/// In-memory [`InventoryStore`] and [`Catalog`].
///
/// Clones share the same underlying state.
///
/// # Example
///
/// ```
/// use drop_inventory_testing::InMemoryInventoryStore;
/// use drop_inventory_core::store::InventoryStore;
/// use drop_inventory_core::types::VariantId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryInventoryStore::new();
/// let variant = VariantId::new();
/// store.create_stock(variant).await?;
/// assert_eq!(store.read_stock(variant).await?.map(|s| s.version), Some(0));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryInventoryStore {
    inventory: Arc<Mutex<InventoryState>>,
    catalog: Arc<RwLock<CatalogState>>,
}

impl InMemoryInventoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every committed ledger entry across all variants, in commit order.
    #[must_use]
    pub fn all_entries(&self) -> Vec<LedgerEntry> {
        self.inventory.lock().unwrap().ledger.clone()
    }

    /// Number of committed ledger entries.
    #[must_use]
    pub fn ledger_len(&self) -> usize {
        self.inventory.lock().unwrap().ledger.len()
    }

    /// Every stored reservation.
    #[must_use]
    pub fn reservations(&self) -> Vec<Reservation> {
        self.inventory
            .lock()
            .unwrap()
            .reservations
            .values()
            .cloned()
            .collect()
    }

    /// Number of reservations in a given status.
    #[must_use]
    pub fn count_reservations(&self, status: ReservationStatus) -> usize {
        self.inventory
            .lock()
            .unwrap()
            .reservations
            .values()
            .filter(|r| r.status == status)
            .count()
    }

    /// Drops a projection row, simulating a lost read model.
    pub fn forget_stock(&self, variant_id: VariantId) {
        self.inventory.lock().unwrap().stock.remove(&variant_id);
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn create_stock(&self, variant_id: VariantId) -> StoreFuture<'_, StockProjection> {
        let stock = *self
            .inventory
            .lock()
            .unwrap()
            .stock
            .entry(variant_id)
            .or_insert_with(|| StockProjection::empty(variant_id));
        Box::pin(async move { Ok(stock) })
    }

    fn read_stock(&self, variant_id: VariantId) -> StoreFuture<'_, Option<StockProjection>> {
        let stock = self.inventory.lock().unwrap().stock.get(&variant_id).copied();
        Box::pin(async move { Ok(stock) })
    }

    fn restore_stock(&self, stock: StockProjection) -> StoreFuture<'_, ()> {
        self.inventory
            .lock()
            .unwrap()
            .stock
            .insert(stock.variant_id, stock);
        Box::pin(async move { Ok(()) })
    }

    fn commit(&self, change: StockChange) -> StoreFuture<'_, Committed> {
        let result = self.inventory.lock().unwrap().commit(change);
        Box::pin(async move { result })
    }

    fn entries_for(&self, variant_id: VariantId) -> StoreFuture<'_, Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = self
            .inventory
            .lock()
            .unwrap()
            .ledger
            .iter()
            .filter(|entry| entry.variant_id == variant_id)
            .cloned()
            .collect();
        sort_entries(&mut entries);
        Box::pin(async move { Ok(entries) })
    }

    fn find_entry_by_key(&self, key: &IdempotencyKey) -> StoreFuture<'_, Option<LedgerEntry>> {
        let entry = {
            let state = self.inventory.lock().unwrap();
            state.keys.get(key).map(|&index| state.ledger[index].clone())
        };
        Box::pin(async move { Ok(entry) })
    }

    fn reservation(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>> {
        let reservation = self.inventory.lock().unwrap().reservations.get(&id).cloned();
        Box::pin(async move { Ok(reservation) })
    }

    fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<Reservation>> {
        let mut expired: Vec<Reservation> = self
            .inventory
            .lock()
            .unwrap()
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Active && r.expires_at <= now)
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.expires_at);
        expired.truncate(limit);
        Box::pin(async move { Ok(expired) })
    }

    fn units_held(
        &self,
        fingerprint: &Fingerprint,
        drop_id: DropId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, u32> {
        let held = self
            .inventory
            .lock()
            .unwrap()
            .units_held(fingerprint, drop_id, now);
        Box::pin(async move { Ok(held) })
    }
}

impl Catalog for InMemoryInventoryStore {
    fn variant(&self, id: VariantId) -> StoreFuture<'_, Option<Variant>> {
        let variant = self.catalog.read().unwrap().variants.get(&id).cloned();
        Box::pin(async move { Ok(variant) })
    }

    fn insert_variant(&self, variant: Variant) -> StoreFuture<'_, Variant> {
        let stored = self
            .catalog
            .write()
            .unwrap()
            .variants
            .entry(variant.id)
            .or_insert(variant)
            .clone();
        Box::pin(async move { Ok(stored) })
    }

    fn set_variant_active(&self, id: VariantId, active: bool) -> StoreFuture<'_, Option<Variant>> {
        let updated = self
            .catalog
            .write()
            .unwrap()
            .variants
            .get_mut(&id)
            .map(|variant| {
                variant.active = active;
                variant.clone()
            });
        Box::pin(async move { Ok(updated) })
    }

    fn drop_policy(&self, id: DropId) -> StoreFuture<'_, Option<DropPolicy>> {
        let policy = self.catalog.read().unwrap().drops.get(&id).cloned();
        Box::pin(async move { Ok(policy) })
    }

    fn upsert_drop_policy(&self, policy: DropPolicy) -> StoreFuture<'_, ()> {
        self.catalog
            .write()
            .unwrap()
            .drops
            .insert(policy.drop_id, policy);
        Box::pin(async move { Ok(()) })
    }
}
