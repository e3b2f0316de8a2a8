//! Sales counters derived from the ledger.
//!
//! Order count and revenue are never stored as independent state. They are
//! recomputed by folding `purchase` and `return` entries, using the unit
//! price snapshot recorded in each purchase entry's metadata.

use crate::ledger::{LedgerEntry, LedgerEventKind};
use crate::types::{Money, VariantId};
use serde::{Deserialize, Serialize};

/// Metadata key holding the unit price (minor units) on purchase entries.
pub const UNIT_PRICE_KEY: &str = "unit_price_minor";
/// Metadata key holding the currency on purchase entries.
pub const CURRENCY_KEY: &str = "currency";
/// Metadata key holding a free-text reason (restocks, corrections, returns).
pub const REASON_KEY: &str = "reason";

/// Metadata recorded on a purchase entry.
#[must_use]
pub fn purchase_metadata(unit_price: &Money) -> serde_json::Value {
    serde_json::json!({
        UNIT_PRICE_KEY: unit_price.amount_minor,
        CURRENCY_KEY: unit_price.currency,
    })
}

/// Metadata carrying only a reason.
#[must_use]
pub fn reason_metadata(reason: &str) -> serde_json::Value {
    serde_json::json!({ REASON_KEY: reason })
}

/// Per-variant sales figures.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesSummary {
    /// Units sold net of returns.
    pub units_sold: i64,
    /// Units returned.
    pub units_returned: i64,
    /// Number of purchase entries (one per converted reservation).
    pub order_count: u64,
    /// Gross revenue in minor units at the snapshotted prices.
    pub gross_revenue_minor: i64,
    /// Currency of the first purchase, if any.
    pub currency: Option<String>,
}

/// Folds a variant's ledger into its sales summary.
#[must_use]
pub fn summarize<'a, I>(variant_id: VariantId, entries: I) -> SalesSummary
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    let mut summary = SalesSummary::default();
    for entry in entries.into_iter().filter(|e| e.variant_id == variant_id) {
        match entry.kind {
            LedgerEventKind::Purchase => {
                summary.units_sold += entry.quantity;
                summary.order_count += 1;
                let unit_price = entry
                    .metadata
                    .get(UNIT_PRICE_KEY)
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(0);
                summary.gross_revenue_minor = summary
                    .gross_revenue_minor
                    .saturating_add(unit_price.saturating_mul(entry.quantity));
                if summary.currency.is_none() {
                    summary.currency = entry
                        .metadata
                        .get(CURRENCY_KEY)
                        .and_then(serde_json::Value::as_str)
                        .map(str::to_string);
                }
            }
            LedgerEventKind::Return => {
                summary.units_sold -= entry.quantity;
                summary.units_returned += entry.quantity;
            }
            LedgerEventKind::Add | LedgerEventKind::Reserve | LedgerEventKind::Release => {}
        }
    }
    summary
}
