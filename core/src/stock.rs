//! Stock projection arithmetic.
//!
//! A [`StockProjection`] is the derived summary of a variant's stock. It is
//! only ever changed through [`StockProjection::apply_delta`], a pure
//! compare-and-swap step that storage backends run inside their transaction:
//!
//! - the caller's expected version must equal the stored version, otherwise
//!   [`StockError::VersionConflict`] (re-read and retry);
//! - no field may go below zero, otherwise [`StockError::NegativeStock`]
//!   (an ordering or logic bug upstream, never clamped);
//! - no field may exceed `i64::MAX`, otherwise [`StockError::Overflow`];
//! - on success the version increments by exactly one.

use crate::types::VariantId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by [`StockProjection::apply_delta`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StockError {
    /// The stored version moved on since the caller read it.
    #[error("Version conflict on variant {variant_id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Variant whose projection conflicted.
        variant_id: VariantId,
        /// Version the caller read.
        expected: i64,
        /// Version currently stored.
        actual: i64,
    },

    /// Applying the delta would drive a counter below zero.
    #[error("Negative stock on variant {variant_id}: {field} would become {value}")]
    NegativeStock {
        /// Variant whose projection would go negative.
        variant_id: VariantId,
        /// Which counter.
        field: StockField,
        /// The value it would have taken.
        value: i64,
    },

    /// Applying the delta would overflow a counter.
    #[error("Stock overflow on variant {variant_id}: {field} cannot change by {delta}")]
    Overflow {
        /// Variant whose projection would overflow.
        variant_id: VariantId,
        /// Which counter.
        field: StockField,
        /// The change that did not fit.
        delta: i64,
    },
}

/// Names a projection counter in error reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockField {
    /// Units free to reserve.
    Available,
    /// Units held by active reservations.
    Reserved,
    /// Units sold.
    Sold,
    /// The compare-and-swap version.
    Version,
}

impl std::fmt::Display for StockField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Sold => "sold",
            Self::Version => "version",
        })
    }
}

/// A signed change to each projection counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    /// Change to `available`.
    pub available: i64,
    /// Change to `reserved`.
    pub reserved: i64,
    /// Change to `sold`.
    pub sold: i64,
}

impl StockDelta {
    /// Creates a delta from its three components.
    #[must_use]
    pub const fn new(available: i64, reserved: i64, sold: i64) -> Self {
        Self {
            available,
            reserved,
            sold,
        }
    }

    /// Net change of `available + reserved + sold`.
    #[must_use]
    pub const fn net(&self) -> i64 {
        self.available + self.reserved + self.sold
    }
}

/// Current stock summary for one variant.
///
/// Invariant: all counters are `>= 0` and
/// `available + reserved + sold == total ever added`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockProjection {
    /// Variant this projection summarises.
    pub variant_id: VariantId,
    /// Units free to reserve.
    pub available: i64,
    /// Units held by active reservations.
    pub reserved: i64,
    /// Units sold.
    pub sold: i64,
    /// Compare-and-swap version; number of mutations applied.
    pub version: i64,
}

impl StockProjection {
    /// The projection of a freshly registered variant.
    #[must_use]
    pub const fn empty(variant_id: VariantId) -> Self {
        Self {
            variant_id,
            available: 0,
            reserved: 0,
            sold: 0,
            version: 0,
        }
    }

    /// Total units on hand in any state.
    #[must_use]
    pub const fn total(&self) -> i64 {
        self.available
            .saturating_add(self.reserved)
            .saturating_add(self.sold)
    }

    /// Applies `delta` if `expected_version` matches and every counter stays
    /// non-negative. Returns the new projection with `version + 1`.
    ///
    /// # Errors
    ///
    /// - [`StockError::VersionConflict`] if `expected_version != self.version`
    /// - [`StockError::NegativeStock`] if a counter would go below zero
    /// - [`StockError::Overflow`] if a counter would not fit in an `i64`
    ///
    /// # Examples
    ///
    /// ```
    /// use drop_inventory_core::stock::{StockDelta, StockError, StockProjection};
    /// use drop_inventory_core::types::VariantId;
    ///
    /// let stock = StockProjection::empty(VariantId::new());
    /// let stock = stock.apply_delta(StockDelta::new(5, 0, 0), 0).unwrap();
    /// assert_eq!((stock.available, stock.version), (5, 1));
    ///
    /// let stale = stock.apply_delta(StockDelta::new(-1, 1, 0), 0);
    /// assert!(matches!(stale, Err(StockError::VersionConflict { .. })));
    /// ```
    pub fn apply_delta(&self, delta: StockDelta, expected_version: i64) -> Result<Self, StockError> {
        if expected_version != self.version {
            return Err(StockError::VersionConflict {
                variant_id: self.variant_id,
                expected: expected_version,
                actual: self.version,
            });
        }

        let add = |field: StockField, current: i64, change: i64| {
            current.checked_add(change).ok_or(StockError::Overflow {
                variant_id: self.variant_id,
                field,
                delta: change,
            })
        };
        let next = Self {
            variant_id: self.variant_id,
            available: add(StockField::Available, self.available, delta.available)?,
            reserved: add(StockField::Reserved, self.reserved, delta.reserved)?,
            sold: add(StockField::Sold, self.sold, delta.sold)?,
            version: add(StockField::Version, self.version, 1)?,
        };

        for (field, value) in [
            (StockField::Available, next.available),
            (StockField::Reserved, next.reserved),
            (StockField::Sold, next.sold),
        ] {
            if value < 0 {
                return Err(StockError::NegativeStock {
                    variant_id: self.variant_id,
                    field,
                    value,
                });
            }
        }

        Ok(next)
    }
}

/// Coarse availability bucket shown to shoppers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockLevel {
    /// Nothing left to reserve.
    OutOfStock,
    /// At or below the low-stock threshold.
    LowStock,
    /// Plenty left.
    InStock,
}

impl StockLevel {
    /// Classifies an `available` count.
    #[must_use]
    pub const fn classify(available: i64, low_stock_threshold: i64) -> Self {
        if available <= 0 {
            Self::OutOfStock
        } else if available <= low_stock_threshold {
            Self::LowStock
        } else {
            Self::InStock
        }
    }
}

/// Read model combining a projection with its stock level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// The live projection.
    pub stock: StockProjection,
    /// Stock level derived from `stock.available`.
    pub level: StockLevel,
}
