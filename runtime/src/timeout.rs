//! Deadline applied to every storage call.

use crate::error::{InventoryError, Result};
use drop_inventory_core::store::StoreFuture;
use std::time::Duration;

/// Awaits a storage future, failing with [`InventoryError::StorageTimeout`]
/// when it does not finish within `limit`.
///
/// Storage errors are mapped into the public taxonomy.
pub(crate) async fn with_timeout<T>(limit: Duration, call: StoreFuture<'_, T>) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(InventoryError::from),
        Err(_) => {
            tracing::warn!(timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX), "Storage call timed out");
            Err(InventoryError::StorageTimeout(limit))
        }
    }
}
