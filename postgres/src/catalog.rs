//! [`Catalog`] over `PostgreSQL`.

use crate::rows::{self, DROP_COLUMNS, VARIANT_COLUMNS};
use crate::{PostgresInventoryStore, db_error};
use drop_inventory_core::store::{Catalog, StoreError, StoreFuture};
use drop_inventory_core::types::{DropId, DropPolicy, Variant, VariantId};

impl PostgresInventoryStore {
    async fn load_variant(&self, id: VariantId) -> Result<Option<Variant>, StoreError> {
        let sql = format!("SELECT {VARIANT_COLUMNS} FROM variants WHERE id = $1");
        sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .as_ref()
            .map(rows::variant)
            .transpose()
    }
}

impl Catalog for PostgresInventoryStore {
    fn variant(&self, id: VariantId) -> StoreFuture<'_, Option<Variant>> {
        Box::pin(self.load_variant(id))
    }

    fn insert_variant(&self, variant: Variant) -> StoreFuture<'_, Variant> {
        Box::pin(async move {
            let attributes = serde_json::to_value(&variant.attributes)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            sqlx::query(
                r"
                INSERT INTO variants
                    (id, product_id, drop_id, label, price_minor, currency, attributes, active)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO NOTHING
                ",
            )
            .bind(*variant.id.as_uuid())
            .bind(*variant.product_id.as_uuid())
            .bind(*variant.drop_id.as_uuid())
            .bind(&variant.label)
            .bind(variant.price.amount_minor)
            .bind(&variant.price.currency)
            .bind(attributes)
            .bind(variant.active)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            self.load_variant(variant.id)
                .await?
                .ok_or(StoreError::UnknownVariant(variant.id))
        })
    }

    fn set_variant_active(&self, id: VariantId, active: bool) -> StoreFuture<'_, Option<Variant>> {
        Box::pin(async move {
            let sql = format!("UPDATE variants SET active = $2 WHERE id = $1 RETURNING {VARIANT_COLUMNS}");
            sqlx::query(&sql)
                .bind(*id.as_uuid())
                .bind(active)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?
                .as_ref()
                .map(rows::variant)
                .transpose()
        })
    }

    fn drop_policy(&self, id: DropId) -> StoreFuture<'_, Option<DropPolicy>> {
        Box::pin(async move {
            let sql = format!("SELECT {DROP_COLUMNS} FROM drops WHERE drop_id = $1");
            sqlx::query(&sql)
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?
                .as_ref()
                .map(rows::drop_policy)
                .transpose()
        })
    }

    fn upsert_drop_policy(&self, policy: DropPolicy) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO drops (drop_id, status, launch_at, end_at, max_per_customer)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (drop_id) DO UPDATE
                SET status = EXCLUDED.status,
                    launch_at = EXCLUDED.launch_at,
                    end_at = EXCLUDED.end_at,
                    max_per_customer = EXCLUDED.max_per_customer
                ",
            )
            .bind(*policy.drop_id.as_uuid())
            .bind(policy.status.as_str())
            .bind(policy.launch_at)
            .bind(policy.end_at)
            .bind(i64::from(policy.max_per_customer))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(())
        })
    }
}
