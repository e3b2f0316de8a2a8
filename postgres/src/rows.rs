//! Row decoding.

use drop_inventory_core::ledger::{LedgerEntry, LedgerEventKind};
use drop_inventory_core::reservation::{Reservation, ReservationStatus};
use drop_inventory_core::stock::StockProjection;
use drop_inventory_core::store::StoreError;
use drop_inventory_core::types::{
    DropId, DropPolicy, DropStatus, Fingerprint, IdempotencyKey, LedgerEntryId, Money, ProductId,
    ReservationId, Variant, VariantId,
};
use sqlx::Row;
use sqlx::postgres::PgRow;
use std::collections::BTreeMap;
use uuid::Uuid;

pub(crate) const STOCK_COLUMNS: &str = "variant_id, available, reserved, sold, version";

pub(crate) const LEDGER_COLUMNS: &str = "id, seq, variant_id, kind, quantity, reservation_id, \
     reference, idempotency_key, metadata, stock_version, created_at";

pub(crate) const RESERVATION_COLUMNS: &str = "id, checkout_session_id, variant_id, drop_id, \
     quantity, unit_price_minor, currency, fingerprint, order_reference, status, expires_at, \
     created_at, updated_at, version";

pub(crate) const VARIANT_COLUMNS: &str =
    "id, product_id, drop_id, label, price_minor, currency, attributes, active";

pub(crate) const DROP_COLUMNS: &str = "drop_id, status, launch_at, end_at, max_per_customer";

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Serialization(format!("column {column}: {e}")))
}

fn quantity(row: &PgRow, column: &str) -> Result<u32, StoreError> {
    let value: i64 = get(row, column)?;
    u32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("column {column} out of range: {value}")))
}

pub(crate) fn stock(row: &PgRow) -> Result<StockProjection, StoreError> {
    Ok(StockProjection {
        variant_id: VariantId::from_uuid(get(row, "variant_id")?),
        available: get(row, "available")?,
        reserved: get(row, "reserved")?,
        sold: get(row, "sold")?,
        version: get(row, "version")?,
    })
}

pub(crate) fn ledger_entry(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    let kind: String = get(row, "kind")?;
    let kind = LedgerEventKind::parse(&kind)
        .ok_or_else(|| StoreError::Serialization(format!("Invalid ledger kind: {kind}")))?;
    let reservation_id: Option<Uuid> = get(row, "reservation_id")?;
    let idempotency_key: Option<String> = get(row, "idempotency_key")?;

    Ok(LedgerEntry {
        id: LedgerEntryId::from_uuid(get(row, "id")?),
        variant_id: VariantId::from_uuid(get(row, "variant_id")?),
        kind,
        quantity: get(row, "quantity")?,
        reservation_id: reservation_id.map(ReservationId::from_uuid),
        reference: get(row, "reference")?,
        idempotency_key: idempotency_key.map(IdempotencyKey::new),
        metadata: get(row, "metadata")?,
        stock_version: get(row, "stock_version")?,
        sequence: get(row, "seq")?,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn reservation(row: &PgRow) -> Result<Reservation, StoreError> {
    let status: String = get(row, "status")?;
    let status = ReservationStatus::parse(&status)
        .ok_or_else(|| StoreError::Serialization(format!("Invalid reservation status: {status}")))?;
    let fingerprint: String = get(row, "fingerprint")?;

    Ok(Reservation {
        id: ReservationId::from_uuid(get(row, "id")?),
        checkout_session_id: get(row, "checkout_session_id")?,
        variant_id: VariantId::from_uuid(get(row, "variant_id")?),
        drop_id: DropId::from_uuid(get(row, "drop_id")?),
        quantity: quantity(row, "quantity")?,
        unit_price: Money::new(
            get::<i64>(row, "unit_price_minor")?,
            get::<String>(row, "currency")?,
        ),
        fingerprint: Fingerprint::new(fingerprint),
        order_reference: get(row, "order_reference")?,
        status,
        expires_at: get(row, "expires_at")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
        version: get(row, "version")?,
    })
}

pub(crate) fn variant(row: &PgRow) -> Result<Variant, StoreError> {
    let attributes: serde_json::Value = get(row, "attributes")?;
    let attributes: BTreeMap<String, String> = serde_json::from_value(attributes)
        .map_err(|e| StoreError::Serialization(format!("variant attributes: {e}")))?;

    Ok(Variant {
        id: VariantId::from_uuid(get(row, "id")?),
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        drop_id: DropId::from_uuid(get(row, "drop_id")?),
        label: get(row, "label")?,
        price: Money::new(get::<i64>(row, "price_minor")?, get::<String>(row, "currency")?),
        attributes,
        active: get(row, "active")?,
    })
}

pub(crate) fn drop_policy(row: &PgRow) -> Result<DropPolicy, StoreError> {
    let status: String = get(row, "status")?;
    let status = DropStatus::parse(&status)
        .ok_or_else(|| StoreError::Serialization(format!("Invalid drop status: {status}")))?;

    Ok(DropPolicy {
        drop_id: DropId::from_uuid(get(row, "drop_id")?),
        status,
        launch_at: get(row, "launch_at")?,
        end_at: get(row, "end_at")?,
        max_per_customer: quantity(row, "max_per_customer")?,
    })
}
