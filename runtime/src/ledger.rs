//! The append-only inventory ledger.
//!
//! Appending an entry applies its projection effect in the same store
//! transaction (see [`InventoryStore::commit`]). Entries are never updated
//! or removed; corrections are new entries with opposite-signed quantities.

use crate::error::{InventoryError, Result};
use crate::metrics::InventoryMetrics;
use crate::retry::{RetryFailure, RetryPolicy, retry_counting};
use crate::timeout::with_timeout;
use drop_inventory_core::ledger::LedgerEntry;
use drop_inventory_core::stock::StockProjection;
use drop_inventory_core::store::{Committed, InventoryStore, StockChange};
use drop_inventory_core::types::{IdempotencyKey, LedgerEntryId, VariantId};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Ledger over an [`InventoryStore`].
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn InventoryStore>,
    timeout: Duration,
}

impl Ledger {
    /// Create a ledger whose storage calls time out after `timeout`.
    #[must_use]
    pub fn new(store: Arc<dyn InventoryStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Appends one entry together with its projection effect and optional
    /// reservation write.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::DuplicateIdempotencyKey`] with the original entry
    ///   when the key was already used. Nothing is written.
    /// - [`InventoryError::VersionConflict`] when the projection moved on.
    /// - [`InventoryError::NegativeStock`] when a counter would go below zero.
    /// - [`InventoryError::StorageTimeout`] / [`InventoryError::Storage`].
    pub async fn append(&self, change: StockChange) -> Result<Committed> {
        let variant_id = change.entry.variant_id;
        let kind = change.entry.kind;
        let started = Instant::now();

        match with_timeout(self.timeout, self.store.commit(change)).await {
            Ok(committed) => {
                InventoryMetrics::record_entry(kind, started.elapsed());
                tracing::info!(
                    variant_id = %variant_id,
                    kind = %kind,
                    quantity = committed.entry.quantity,
                    version = committed.stock.version,
                    available = committed.stock.available,
                    reserved = committed.stock.reserved,
                    sold = committed.stock.sold,
                    "Ledger entry committed"
                );
                Ok(committed)
            }
            Err(err @ InventoryError::NegativeStock { .. }) => {
                tracing::error!(variant_id = %variant_id, kind = %kind, error = %err, "Rejected change that would drive stock negative");
                Err(err)
            }
            Err(err @ InventoryError::DuplicateIdempotencyKey(_)) => {
                tracing::warn!(variant_id = %variant_id, kind = %kind, error = %err, "Duplicate idempotency key");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Reads the projection, builds a change against it and appends it,
    /// retrying with a fresh read on transient failures.
    ///
    /// `build` may refuse with any error; only transient errors are retried.
    /// Every attempt commits under the same entry id, so an attempt that timed
    /// out after its commit landed is reported by the next one as
    /// [`InventoryError::DuplicateIdempotencyKey`] instead of being applied
    /// again.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::ReservationFailed`] when the retry budget is
    /// exhausted, or the first non-transient error.
    pub async fn append_with_retry<F>(
        &self,
        policy: &RetryPolicy,
        variant_id: VariantId,
        build: F,
    ) -> Result<Committed>
    where
        F: Fn(&StockProjection) -> Result<StockChange>,
    {
        let build = &build;
        let entry_id = LedgerEntryId::new();
        let attempt = move || async move {
            let stock = self.read_stock(variant_id).await?;
            let mut change = build(&stock)?;
            change.entry.id = entry_id;
            self.append(change).await
        };

        match retry_counting(policy, attempt, InventoryError::is_transient).await {
            Ok(committed) => Ok(committed),
            Err(RetryFailure::Permanent(err)) => Err(err),
            Err(RetryFailure::Exhausted(exhausted)) => {
                tracing::error!(
                    variant_id = %variant_id,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "Retry budget exhausted"
                );
                Err(InventoryError::ReservationFailed {
                    variant_id,
                    attempts: exhausted.attempts,
                })
            }
        }
    }

    /// All entries of a variant in ledger order.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::StorageTimeout`] / [`InventoryError::Storage`].
    pub async fn entries_for(&self, variant_id: VariantId) -> Result<Vec<LedgerEntry>> {
        with_timeout(self.timeout, self.store.entries_for(variant_id)).await
    }

    /// The entry recorded under an idempotency key, if any.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::StorageTimeout`] / [`InventoryError::Storage`].
    pub async fn find_by_idempotency_key(&self, key: &IdempotencyKey) -> Result<Option<LedgerEntry>> {
        with_timeout(self.timeout, self.store.find_entry_by_key(key)).await
    }

    async fn read_stock(&self, variant_id: VariantId) -> Result<StockProjection> {
        with_timeout(self.timeout, self.store.read_stock(variant_id))
            .await?
            .ok_or(InventoryError::UnknownVariant(variant_id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use drop_inventory_core::ledger::{LedgerEventKind, NewLedgerEntry};
    use drop_inventory_testing::{FaultInjectingStore, InMemoryInventoryStore};

    fn add(variant_id: VariantId, quantity: i64) -> NewLedgerEntry {
        NewLedgerEntry::new(variant_id, LedgerEventKind::Add, quantity, Utc::now())
    }

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(2))
            .build()
    }

    #[tokio::test]
    async fn append_orders_entries() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let ledger = Ledger::new(store.clone(), Duration::from_secs(2));
        let variant = VariantId::new();
        store.create_stock(variant).await.unwrap();

        ledger.append(StockChange::new(add(variant, 5), 0)).await.unwrap();
        ledger.append(StockChange::new(add(variant, -1), 1)).await.unwrap();

        let entries = ledger.entries_for(variant).await.unwrap();
        assert_eq!(entries.iter().map(|e| e.quantity).collect::<Vec<_>>(), vec![5, -1]);
        assert_eq!(entries[1].stock_version, 2);
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let ledger = Ledger::new(store.clone(), Duration::from_secs(2));
        let variant = VariantId::new();
        store.create_stock(variant).await.unwrap();
        ledger.append(StockChange::new(add(variant, 5), 0)).await.unwrap();

        let err = ledger.append(StockChange::new(add(variant, 5), 0)).await.unwrap_err();
        assert!(matches!(err, InventoryError::VersionConflict { expected: 0, actual: 1, .. }));
    }

    #[tokio::test]
    async fn retry_rereads_after_conflict() {
        let inner = InMemoryInventoryStore::new();
        let faulty = FaultInjectingStore::new(Arc::new(inner.clone()));
        let ledger = Ledger::new(Arc::new(faulty.clone()), Duration::from_secs(2));
        let variant = VariantId::new();
        inner.create_stock(variant).await.unwrap();
        faulty.inject_conflicts(2);

        let committed = ledger
            .append_with_retry(&fast_policy(3), variant, |stock| {
                Ok(StockChange::new(add(variant, 4), stock.version))
            })
            .await
            .unwrap();

        assert_eq!(committed.stock.available, 4);
        assert_eq!(faulty.commit_attempts(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_with_reservation_failed() {
        let inner = InMemoryInventoryStore::new();
        let faulty = FaultInjectingStore::new(Arc::new(inner.clone()));
        let ledger = Ledger::new(Arc::new(faulty.clone()), Duration::from_secs(2));
        let variant = VariantId::new();
        inner.create_stock(variant).await.unwrap();
        faulty.inject_conflicts(10);

        let err = ledger
            .append_with_retry(&fast_policy(2), variant, |stock| {
                Ok(StockChange::new(add(variant, 1), stock.version))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, InventoryError::ReservationFailed { attempts: 3, .. }));
        assert_eq!(inner.ledger_len(), 0);
    }
}
