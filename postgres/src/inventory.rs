//! [`InventoryStore`] over `PostgreSQL`.

use crate::rows::{self, LEDGER_COLUMNS, RESERVATION_COLUMNS, STOCK_COLUMNS};
use crate::{PostgresInventoryStore, db_error, is_unique_violation};
use chrono::{DateTime, Utc};
use drop_inventory_core::ledger::{LedgerEntry, NewLedgerEntry};
use drop_inventory_core::reservation::{Reservation, ReservationTransition, ReservationWrite};
use drop_inventory_core::stock::StockProjection;
use drop_inventory_core::store::{
    Committed, InventoryStore, PurchaseLimitGuard, StockChange, StoreError, StoreFuture,
};
use drop_inventory_core::types::{DropId, Fingerprint, IdempotencyKey, ReservationId, VariantId};
use sqlx::{PgConnection, PgExecutor, Row};

async fn find_entry<'e, E>(executor: E, key: &IdempotencyKey) -> Result<Option<LedgerEntry>, StoreError>
where
    E: PgExecutor<'e>,
{
    let sql = format!("SELECT {LEDGER_COLUMNS} FROM ledger WHERE idempotency_key = $1");
    sqlx::query(&sql)
        .bind(key.as_str())
        .fetch_optional(executor)
        .await
        .map_err(db_error)?
        .as_ref()
        .map(rows::ledger_entry)
        .transpose()
}

/// The entry a replayed change already committed, matched by entry id or
/// idempotency key.
async fn find_committed<'e, E>(executor: E, entry: &NewLedgerEntry) -> Result<Option<LedgerEntry>, StoreError>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        "SELECT {LEDGER_COLUMNS} FROM ledger WHERE id = $1 OR idempotency_key = $2 ORDER BY seq LIMIT 1"
    );
    sqlx::query(&sql)
        .bind(*entry.id.as_uuid())
        .bind(entry.idempotency_key.as_ref().map(IdempotencyKey::as_str))
        .fetch_optional(executor)
        .await
        .map_err(db_error)?
        .as_ref()
        .map(rows::ledger_entry)
        .transpose()
}

async fn find_reservation<'e, E>(
    executor: E,
    id: ReservationId,
    for_update: bool,
) -> Result<Option<Reservation>, StoreError>
where
    E: PgExecutor<'e>,
{
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1{lock}");
    sqlx::query(&sql)
        .bind(*id.as_uuid())
        .fetch_optional(executor)
        .await
        .map_err(db_error)?
        .as_ref()
        .map(rows::reservation)
        .transpose()
}

async fn units_held<'e, E>(
    executor: E,
    fingerprint: &Fingerprint,
    drop_id: DropId,
    now: DateTime<Utc>,
) -> Result<u32, StoreError>
where
    E: PgExecutor<'e>,
{
    let held: i64 = sqlx::query(
        r"
        SELECT COALESCE(SUM(quantity), 0)::BIGINT AS held
        FROM reservations
        WHERE fingerprint = $1
          AND drop_id = $2
          AND (status = 'converted' OR (status = 'active' AND expires_at > $3))
        ",
    )
    .bind(fingerprint.as_str())
    .bind(*drop_id.as_uuid())
    .bind(now)
    .fetch_one(executor)
    .await
    .map_err(db_error)?
    .try_get("held")
    .map_err(db_error)?;

    Ok(u32::try_from(held).unwrap_or(u32::MAX))
}

/// Re-checks the purchase limit while holding the requester's advisory lock.
async fn check_limit(conn: &mut PgConnection, guard: &PurchaseLimitGuard) -> Result<(), StoreError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("{}:{}", guard.fingerprint, guard.drop_id))
        .execute(&mut *conn)
        .await
        .map_err(db_error)?;

    let held = units_held(&mut *conn, &guard.fingerprint, guard.drop_id, guard.now).await?;
    guard.check(held)
}

async fn insert_reservation(
    conn: &mut PgConnection,
    reservation: Reservation,
) -> Result<Reservation, StoreError> {
    let inserted = sqlx::query(
        r"
        INSERT INTO reservations
            (id, checkout_session_id, variant_id, drop_id, quantity, unit_price_minor,
             currency, fingerprint, order_reference, status, expires_at, created_at,
             updated_at, version)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (id) DO NOTHING
        ",
    )
    .bind(*reservation.id.as_uuid())
    .bind(&reservation.checkout_session_id)
    .bind(*reservation.variant_id.as_uuid())
    .bind(*reservation.drop_id.as_uuid())
    .bind(i64::from(reservation.quantity))
    .bind(reservation.unit_price.amount_minor)
    .bind(&reservation.unit_price.currency)
    .bind(reservation.fingerprint.as_str())
    .bind(&reservation.order_reference)
    .bind(reservation.status.as_str())
    .bind(reservation.expires_at)
    .bind(reservation.created_at)
    .bind(reservation.updated_at)
    .bind(reservation.version)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    if inserted.rows_affected() == 0 {
        let existing = find_reservation(&mut *conn, reservation.id, false)
            .await?
            .ok_or(StoreError::ReservationNotFound(reservation.id))?;
        return Err(StoreError::ReservationConflict {
            reservation_id: existing.id,
            status: existing.status,
            version: existing.version,
        });
    }

    Ok(reservation)
}

async fn transition_reservation(
    conn: &mut PgConnection,
    transition: &ReservationTransition,
) -> Result<Reservation, StoreError> {
    let current = find_reservation(&mut *conn, transition.reservation_id, true)
        .await?
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

    let next = current.transitioned(transition);
    sqlx::query(
        r"
        UPDATE reservations
        SET status = $2, order_reference = $3, updated_at = $4, version = $5
        WHERE id = $1
        ",
    )
    .bind(*next.id.as_uuid())
    .bind(next.status.as_str())
    .bind(&next.order_reference)
    .bind(next.updated_at)
    .bind(next.version)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(next)
}

async fn insert_entry(
    conn: &mut PgConnection,
    entry: &NewLedgerEntry,
    stock_version: i64,
) -> Result<i64, sqlx::Error> {
    sqlx::query(
        r"
        INSERT INTO ledger
            (id, variant_id, kind, quantity, reservation_id, reference, idempotency_key,
             metadata, stock_version, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING seq
        ",
    )
    .bind(*entry.id.as_uuid())
    .bind(*entry.variant_id.as_uuid())
    .bind(entry.kind.as_str())
    .bind(entry.quantity)
    .bind(entry.reservation_id.map(|id| *id.as_uuid()))
    .bind(&entry.reference)
    .bind(entry.idempotency_key.as_ref().map(IdempotencyKey::as_str))
    .bind(&entry.metadata)
    .bind(stock_version)
    .bind(entry.created_at)
    .fetch_one(&mut *conn)
    .await?
    .try_get("seq")
}

impl PostgresInventoryStore {
    async fn commit_change(&self, change: StockChange) -> Result<Committed, StoreError> {
        let variant_id = change.entry.variant_id;
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        if let Some(existing) = find_committed(&mut *tx, &change.entry).await? {
            return Err(StoreError::DuplicateIdempotencyKey(Box::new(existing)));
        }

        let sql = format!("SELECT {STOCK_COLUMNS} FROM stock WHERE variant_id = $1 FOR UPDATE");
        let current = sqlx::query(&sql)
            .bind(*variant_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .as_ref()
            .map(rows::stock)
            .transpose()?
            .ok_or(StoreError::UnknownVariant(variant_id))?;
        let next = current.apply_delta(change.entry.effect(), change.expected_version)?;

        if let Some(guard) = &change.limit_guard {
            check_limit(&mut *tx, guard).await?;
        }

        let reservation = match change.reservation {
            None => None,
            Some(ReservationWrite::Insert(reservation)) => {
                Some(insert_reservation(&mut *tx, reservation).await?)
            }
            Some(ReservationWrite::Transition(transition)) => {
                Some(transition_reservation(&mut *tx, &transition).await?)
            }
        };

        sqlx::query(
            r"
            UPDATE stock
            SET available = $2, reserved = $3, sold = $4, version = $5, updated_at = now()
            WHERE variant_id = $1
            ",
        )
        .bind(*variant_id.as_uuid())
        .bind(next.available)
        .bind(next.reserved)
        .bind(next.sold)
        .bind(next.version)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        let sequence = match insert_entry(&mut *tx, &change.entry, next.version).await {
            Ok(sequence) => sequence,
            Err(e) if is_unique_violation(&e) => {
                // Another transaction committed the same key or entry id after
                // our check.
                drop(tx);
                tracing::debug!(variant_id = %variant_id, error = %e, "Ledger entry raced, loading winner");
                return match find_committed(&self.pool, &change.entry).await? {
                    Some(existing) => Err(StoreError::DuplicateIdempotencyKey(Box::new(existing))),
                    None => Err(db_error(e)),
                };
            }
            Err(e) => return Err(db_error(e)),
        };

        tx.commit().await.map_err(db_error)?;

        Ok(Committed {
            entry: change.entry.committed(sequence, next.version),
            stock: next,
            reservation,
        })
    }
}

impl InventoryStore for PostgresInventoryStore {
    fn create_stock(&self, variant_id: VariantId) -> StoreFuture<'_, StockProjection> {
        Box::pin(async move {
            sqlx::query("INSERT INTO stock (variant_id) VALUES ($1) ON CONFLICT (variant_id) DO NOTHING")
                .bind(*variant_id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

            self.read_stock(variant_id)
                .await?
                .ok_or(StoreError::UnknownVariant(variant_id))
        })
    }

    fn read_stock(&self, variant_id: VariantId) -> StoreFuture<'_, Option<StockProjection>> {
        Box::pin(async move {
            let sql = format!("SELECT {STOCK_COLUMNS} FROM stock WHERE variant_id = $1");
            sqlx::query(&sql)
                .bind(*variant_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?
                .as_ref()
                .map(rows::stock)
                .transpose()
        })
    }

    fn restore_stock(&self, stock: StockProjection) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO stock (variant_id, available, reserved, sold, version, updated_at)
                VALUES ($1, $2, $3, $4, $5, now())
                ON CONFLICT (variant_id) DO UPDATE
                SET available = EXCLUDED.available,
                    reserved = EXCLUDED.reserved,
                    sold = EXCLUDED.sold,
                    version = EXCLUDED.version,
                    updated_at = EXCLUDED.updated_at
                ",
            )
            .bind(*stock.variant_id.as_uuid())
            .bind(stock.available)
            .bind(stock.reserved)
            .bind(stock.sold)
            .bind(stock.version)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(())
        })
    }

    fn commit(&self, change: StockChange) -> StoreFuture<'_, Committed> {
        Box::pin(self.commit_change(change))
    }

    fn entries_for(&self, variant_id: VariantId) -> StoreFuture<'_, Vec<LedgerEntry>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {LEDGER_COLUMNS} FROM ledger WHERE variant_id = $1 ORDER BY created_at, seq"
            );
            sqlx::query(&sql)
                .bind(*variant_id.as_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?
                .iter()
                .map(rows::ledger_entry)
                .collect()
        })
    }

    fn find_entry_by_key(&self, key: &IdempotencyKey) -> StoreFuture<'_, Option<LedgerEntry>> {
        let key = key.clone();
        Box::pin(async move { find_entry(&self.pool, &key).await })
    }

    fn reservation(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(find_reservation(&self.pool, id, false))
    }

    fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<Reservation>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations \
                 WHERE status = 'active' AND expires_at <= $1 \
                 ORDER BY expires_at LIMIT $2"
            );
            sqlx::query(&sql)
                .bind(now)
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?
                .iter()
                .map(rows::reservation)
                .collect()
        })
    }

    fn units_held(
        &self,
        fingerprint: &Fingerprint,
        drop_id: DropId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, u32> {
        let fingerprint = fingerprint.clone();
        Box::pin(async move { units_held(&self.pool, &fingerprint, drop_id, now).await })
    }
}
