//! `PostgreSQL` storage for the drop inventory.
//!
//! [`PostgresInventoryStore`] implements both
//! [`InventoryStore`](drop_inventory_core::store::InventoryStore) and
//! [`Catalog`](drop_inventory_core::store::Catalog) over one `sqlx` pool.
//!
//! Every [`commit`](drop_inventory_core::store::InventoryStore::commit) runs
//! in a single transaction:
//!
//! - the stock row is locked with `SELECT ... FOR UPDATE` and the new value
//!   is computed with the pure projection arithmetic from the core crate;
//! - purchase-limit checks take a transaction-scoped advisory lock on the
//!   `(fingerprint, drop)` pair so two holds by the same requester cannot
//!   both pass the check;
//! - reservation transitions lock the reservation row and compare its version;
//! - the ledger insert relies on the unique `idempotency_key` column as the
//!   final guard against a reused key.
//!
//! # Example
//!
//! ```ignore
//! use drop_inventory_postgres::PostgresInventoryStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresInventoryStore::new("postgres://localhost/drops").await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod inventory;
mod rows;

use drop_inventory_core::store::StoreError;
use sqlx::PgPool;

/// `PostgreSQL`-backed inventory store and catalog.
#[derive(Clone, Debug)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Connect to the database at `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection cannot be established.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await.map_err(db_error)?;
        Ok(Self { pool })
    }

    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }
}

pub(crate) fn db_error(error: sqlx::Error) -> StoreError {
    StoreError::Database(error.to_string())
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
