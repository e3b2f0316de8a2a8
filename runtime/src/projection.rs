//! Reads, rebuilds and repairs of the per-variant stock projection.
//!
//! The projection is a cache of the ledger fold. [`StockProjections::rebuild`]
//! recomputes it from scratch; [`StockProjections::verify`] compares the two;
//! [`StockProjections::restore`] overwrites a lost or drifted row.

use crate::error::{InventoryError, Result};
use crate::timeout::with_timeout;
use drop_inventory_core::ledger::fold;
use drop_inventory_core::stock::{Availability, StockLevel, StockProjection};
use drop_inventory_core::store::InventoryStore;
use drop_inventory_core::types::VariantId;
use std::sync::Arc;
use std::time::Duration;

/// Projection reads and maintenance over an [`InventoryStore`].
#[derive(Clone)]
pub struct StockProjections {
    store: Arc<dyn InventoryStore>,
    timeout: Duration,
    low_stock_threshold: i64,
}

impl StockProjections {
    /// Create the projection view.
    #[must_use]
    pub fn new(store: Arc<dyn InventoryStore>, timeout: Duration, low_stock_threshold: i64) -> Self {
        Self {
            store,
            timeout,
            low_stock_threshold,
        }
    }

    /// Ensures a projection row exists for `variant_id`, starting at `0/0/0`.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::StorageTimeout`] / [`InventoryError::Storage`].
    pub async fn create(&self, variant_id: VariantId) -> Result<StockProjection> {
        with_timeout(self.timeout, self.store.create_stock(variant_id)).await
    }

    /// Point read.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::UnknownVariant`] when there is no row.
    pub async fn read(&self, variant_id: VariantId) -> Result<StockProjection> {
        with_timeout(self.timeout, self.store.read_stock(variant_id))
            .await?
            .ok_or(InventoryError::UnknownVariant(variant_id))
    }

    /// Folds the variant's full ledger.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::StorageTimeout`] / [`InventoryError::Storage`].
    pub async fn rebuild(&self, variant_id: VariantId) -> Result<StockProjection> {
        let entries = with_timeout(self.timeout, self.store.entries_for(variant_id)).await?;
        Ok(fold(variant_id, &entries))
    }

    /// Compares the live projection with a rebuild.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::ProjectionDrift`] on mismatch.
    pub async fn verify(&self, variant_id: VariantId) -> Result<StockProjection> {
        let live = self.read(variant_id).await?;
        let rebuilt = self.rebuild(variant_id).await?;
        if live != rebuilt {
            tracing::error!(
                variant_id = %variant_id,
                live = ?live,
                rebuilt = ?rebuilt,
                "Projection drifted from ledger"
            );
            return Err(InventoryError::ProjectionDrift { live, rebuilt });
        }
        Ok(live)
    }

    /// Overwrites the projection row with the rebuilt value.
    ///
    /// Concurrent writers racing a restore can be lost; run it while the
    /// variant is quiesced.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::StorageTimeout`] / [`InventoryError::Storage`].
    pub async fn restore(&self, variant_id: VariantId) -> Result<StockProjection> {
        let rebuilt = self.rebuild(variant_id).await?;
        with_timeout(self.timeout, self.store.restore_stock(rebuilt)).await?;
        tracing::warn!(
            variant_id = %variant_id,
            available = rebuilt.available,
            reserved = rebuilt.reserved,
            sold = rebuilt.sold,
            version = rebuilt.version,
            "Projection restored from ledger"
        );
        Ok(rebuilt)
    }

    /// Projection plus its coarse stock level.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::UnknownVariant`] when there is no row.
    pub async fn availability(&self, variant_id: VariantId) -> Result<Availability> {
        let stock = self.read(variant_id).await?;
        Ok(Availability {
            stock,
            level: StockLevel::classify(stock.available, self.low_stock_threshold),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use drop_inventory_core::ledger::{LedgerEventKind, NewLedgerEntry};
    use drop_inventory_core::store::StockChange;
    use drop_inventory_testing::InMemoryInventoryStore;

    async fn stocked(quantity: i64) -> (InMemoryInventoryStore, StockProjections, VariantId) {
        let store = InMemoryInventoryStore::new();
        let projections = StockProjections::new(Arc::new(store.clone()), Duration::from_secs(2), 5);
        let variant = VariantId::new();
        projections.create(variant).await.unwrap();
        let entry = NewLedgerEntry::new(variant, LedgerEventKind::Add, quantity, Utc::now());
        store.commit(StockChange::new(entry, 0)).await.unwrap();
        (store, projections, variant)
    }

    #[tokio::test]
    async fn verify_detects_and_restore_repairs_drift() {
        let (store, projections, variant) = stocked(10).await;
        assert_eq!(projections.verify(variant).await.unwrap().available, 10);

        let mut corrupted = projections.read(variant).await.unwrap();
        corrupted.available = 7;
        store.restore_stock(corrupted).await.unwrap();

        let err = projections.verify(variant).await.unwrap_err();
        assert!(matches!(err, InventoryError::ProjectionDrift { .. }));

        let restored = projections.restore(variant).await.unwrap();
        assert_eq!(restored.available, 10);
        projections.verify(variant).await.unwrap();
    }

    #[tokio::test]
    async fn restore_recreates_a_lost_row() {
        let (store, projections, variant) = stocked(3).await;
        store.forget_stock(variant);
        assert!(matches!(
            projections.read(variant).await,
            Err(InventoryError::UnknownVariant(_))
        ));

        let restored = projections.restore(variant).await.unwrap();
        assert_eq!((restored.available, restored.version), (3, 1));
    }

    #[tokio::test]
    async fn availability_levels() {
        let (_, projections, variant) = stocked(4).await;
        assert_eq!(projections.availability(variant).await.unwrap().level, StockLevel::LowStock);
    }
}
