//! Append-only inventory ledger entries.
//!
//! Every inventory mutation is recorded as one [`LedgerEntry`]. The entry's
//! kind and quantity fully determine its effect on the stock projection
//! (see [`LedgerEventKind::effect`]), so folding a variant's entries in order
//! reproduces the live projection. Entries are never updated or deleted;
//! corrections are new `add` entries with an opposite-signed quantity.

use crate::stock::{StockDelta, StockProjection};
use crate::types::{IdempotencyKey, LedgerEntryId, ReservationId, VariantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of inventory event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventKind {
    /// Stock entered (restock); negative quantities write stock off.
    Add,
    /// Units moved from available to reserved.
    Reserve,
    /// Units moved from reserved back to available.
    Release,
    /// Units moved from reserved to sold.
    Purchase,
    /// Sold units returned to available.
    Return,
}

impl LedgerEventKind {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Reserve => "reserve",
            Self::Release => "release",
            Self::Purchase => "purchase",
            Self::Return => "return",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(Self::Add),
            "reserve" => Some(Self::Reserve),
            "release" => Some(Self::Release),
            "purchase" => Some(Self::Purchase),
            "return" => Some(Self::Return),
            _ => None,
        }
    }

    /// Projection effect of an entry of this kind carrying `quantity`.
    #[must_use]
    pub const fn effect(&self, quantity: i64) -> StockDelta {
        let negated = quantity.saturating_neg();
        match self {
            Self::Add => StockDelta::new(quantity, 0, 0),
            Self::Reserve => StockDelta::new(negated, quantity, 0),
            Self::Release => StockDelta::new(quantity, negated, 0),
            Self::Purchase => StockDelta::new(0, negated, quantity),
            Self::Return => StockDelta::new(quantity, 0, negated),
        }
    }
}

impl std::fmt::Display for LedgerEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entry about to be appended.
///
/// The store assigns the insertion sequence and the resulting projection
/// version when it commits the entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    /// Entry identifier, chosen by the caller.
    pub id: LedgerEntryId,
    /// Variant whose stock changes.
    pub variant_id: VariantId,
    /// Event kind.
    pub kind: LedgerEventKind,
    /// Signed quantity, interpreted per [`LedgerEventKind::effect`].
    pub quantity: i64,
    /// Reservation this entry belongs to, if any.
    pub reservation_id: Option<ReservationId>,
    /// External reference: order number or checkout session id.
    pub reference: Option<String>,
    /// Unique key making the operation safe to retry.
    pub idempotency_key: Option<IdempotencyKey>,
    /// Free-form metadata (reason, price snapshot, ...).
    pub metadata: serde_json::Value,
    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

impl NewLedgerEntry {
    /// Creates an entry with no reservation, reference, key or metadata.
    #[must_use]
    pub fn new(
        variant_id: VariantId,
        kind: LedgerEventKind,
        quantity: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LedgerEntryId::new(),
            variant_id,
            kind,
            quantity,
            reservation_id: None,
            reference: None,
            idempotency_key: None,
            metadata: serde_json::Value::Null,
            created_at,
        }
    }

    /// Links the entry to a reservation.
    #[must_use]
    pub const fn with_reservation(mut self, reservation_id: ReservationId) -> Self {
        self.reservation_id = Some(reservation_id);
        self
    }

    /// Sets the external reference.
    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Sets the idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: Option<IdempotencyKey>) -> Self {
        self.idempotency_key = key;
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Projection effect of this entry.
    #[must_use]
    pub const fn effect(&self) -> StockDelta {
        self.kind.effect(self.quantity)
    }

    /// Turns the pending entry into a committed one.
    #[must_use]
    pub fn committed(self, sequence: i64, stock_version: i64) -> LedgerEntry {
        LedgerEntry {
            id: self.id,
            variant_id: self.variant_id,
            kind: self.kind,
            quantity: self.quantity,
            reservation_id: self.reservation_id,
            reference: self.reference,
            idempotency_key: self.idempotency_key,
            metadata: self.metadata,
            stock_version,
            sequence,
            created_at: self.created_at,
        }
    }
}

/// A committed, immutable ledger entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry identifier.
    pub id: LedgerEntryId,
    /// Variant whose stock changed.
    pub variant_id: VariantId,
    /// Event kind.
    pub kind: LedgerEventKind,
    /// Signed quantity.
    pub quantity: i64,
    /// Reservation this entry belongs to, if any.
    pub reservation_id: Option<ReservationId>,
    /// External reference: order number or checkout session id.
    pub reference: Option<String>,
    /// Unique retry key.
    pub idempotency_key: Option<IdempotencyKey>,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
    /// Projection version produced by this entry.
    pub stock_version: i64,
    /// Store-wide insertion sequence; breaks `created_at` ties.
    pub sequence: i64,
    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Projection effect of this entry.
    #[must_use]
    pub const fn effect(&self) -> StockDelta {
        self.kind.effect(self.quantity)
    }
}

/// Sorts entries into ledger order: creation time, then insertion sequence.
pub fn sort_entries(entries: &mut [LedgerEntry]) {
    entries.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then(a.sequence.cmp(&b.sequence))
    });
}

/// Rebuilds a projection by folding a variant's ledger.
///
/// Counters are the sum of every entry's effect; the version is the highest
/// `stock_version` recorded, which equals the number of mutations applied.
/// Entries for other variants are ignored.
#[must_use]
pub fn fold<'a, I>(variant_id: VariantId, entries: I) -> StockProjection
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    entries
        .into_iter()
        .filter(|entry| entry.variant_id == variant_id)
        .fold(StockProjection::empty(variant_id), |mut stock, entry| {
            let delta = entry.effect();
            stock.available = stock.available.saturating_add(delta.available);
            stock.reserved = stock.reserved.saturating_add(delta.reserved);
            stock.sold = stock.sold.saturating_add(delta.sold);
            stock.version = stock.version.max(entry.stock_version);
            stock
        })
}
