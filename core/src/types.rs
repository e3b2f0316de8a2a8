//! Identifiers, value objects and catalog entities.
//!
//! Identifiers are UUID newtypes so a `VariantId` can never be passed where a
//! `ReservationId` is expected. `Fingerprint` and `IdempotencyKey` wrap
//! caller-supplied strings and validate them when parsed from external input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a purchasable variant (one price row of a product).
    VariantId
);
uuid_id!(
    /// Identifier of the product a variant belongs to.
    ProductId
);
uuid_id!(
    /// Identifier of a drop (time-boxed sales event).
    DropId
);
uuid_id!(
    /// Identifier of a checkout reservation.
    ReservationId
);
uuid_id!(
    /// Identifier of a ledger entry.
    LedgerEntryId
);

/// Error returned when a caller-supplied key or fingerprint is malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {kind}: {reason}")]
pub struct ParseKeyError {
    kind: &'static str,
    reason: &'static str,
}

const MAX_KEY_LEN: usize = 128;

fn validate_key(kind: &'static str, s: &str) -> Result<(), ParseKeyError> {
    if s.trim().is_empty() {
        return Err(ParseKeyError { kind, reason: "must not be empty" });
    }
    if s.len() > MAX_KEY_LEN {
        return Err(ParseKeyError {
            kind,
            reason: "must be at most 128 bytes",
        });
    }
    Ok(())
}

/// Per-requester identifier used to enforce purchase limits.
///
/// Usually a device fingerprint or customer id supplied by the checkout
/// collaborator. The inventory core treats it as opaque.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps a trusted fingerprint without validation.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the fingerprint as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_key("fingerprint", s)?;
        Ok(Self(s.to_string()))
    }
}

/// Idempotency key for a logical inventory operation.
///
/// Keys are globally unique across the ledger, so callers scope them by
/// operation. [`IdempotencyKey::derive`] builds `"{scope}:{operation}"`.
///
/// # Examples
///
/// ```
/// use drop_inventory_core::types::IdempotencyKey;
///
/// let key = IdempotencyKey::derive("cs_test_123", "reserve");
/// assert_eq!(key.as_str(), "cs_test_123:reserve");
///
/// let parsed: Result<IdempotencyKey, _> = "".parse();
/// assert!(parsed.is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Wraps a trusted key without validation.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derives a key from a caller scope (checkout session id, webhook id)
    /// and the operation name.
    #[must_use]
    pub fn derive(scope: impl fmt::Display, operation: &str) -> Self {
        Self(format!("{scope}:{operation}"))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for IdempotencyKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_key("idempotency key", s)?;
        Ok(Self(s.to_string()))
    }
}

// ============================================================================
// Value objects
// ============================================================================

/// Default currency for prices when the catalog does not set one.
pub const DEFAULT_CURRENCY: &str = "EUR";

/// A price in minor units (cents) with its ISO currency code.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount in minor units.
    pub amount_minor: i64,
    /// ISO 4217 currency code.
    pub currency: String,
}

impl Money {
    /// Creates a new amount.
    #[must_use]
    pub fn new(amount_minor: i64, currency: impl Into<String>) -> Self {
        Self {
            amount_minor,
            currency: currency.into(),
        }
    }

    /// Creates an amount in the default currency.
    #[must_use]
    pub fn eur(amount_minor: i64) -> Self {
        Self::new(amount_minor, DEFAULT_CURRENCY)
    }

    /// Multiplies the amount by a quantity, saturating on overflow.
    #[must_use]
    pub fn times(&self, quantity: u32) -> Self {
        Self {
            amount_minor: self.amount_minor.saturating_mul(i64::from(quantity)),
            currency: self.currency.clone(),
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount_minor, self.currency)
    }
}

// ============================================================================
// Catalog entities
// ============================================================================

/// A purchasable SKU.
///
/// Immutable once created except for the `active` flag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// Variant identifier.
    pub id: VariantId,
    /// Parent product.
    pub product_id: ProductId,
    /// Drop the product is sold in.
    pub drop_id: DropId,
    /// Human readable label, e.g. `"M / Black"`.
    pub label: Option<String>,
    /// Current catalog price.
    pub price: Money,
    /// Descriptive attributes such as size or color.
    pub attributes: BTreeMap<String, String>,
    /// Whether the variant can be reserved.
    pub active: bool,
}

impl Variant {
    /// Creates an active variant with no attributes.
    #[must_use]
    pub fn new(product_id: ProductId, drop_id: DropId, price: Money) -> Self {
        Self {
            id: VariantId::new(),
            product_id,
            drop_id,
            label: None,
            price,
            attributes: BTreeMap::new(),
            active: true,
        }
    }

    /// Adds a descriptive attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Lifecycle status of a drop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropStatus {
    /// Being prepared by the creator.
    Draft,
    /// Announced, not yet on sale.
    ComingSoon,
    /// On sale.
    Active,
    /// Finished.
    Archived,
}

impl DropStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::ComingSoon => "coming_soon",
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "coming_soon" => Some(Self::ComingSoon),
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Default purchase limit per customer and drop.
pub const DEFAULT_MAX_PER_CUSTOMER: u32 = 1;

/// The parts of a drop the inventory core needs: sale window and purchase limit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropPolicy {
    /// Drop identifier.
    pub drop_id: DropId,
    /// Lifecycle status.
    pub status: DropStatus,
    /// Sale start; `None` means open.
    pub launch_at: Option<DateTime<Utc>>,
    /// Sale end; `None` means open.
    pub end_at: Option<DateTime<Utc>>,
    /// Maximum units one fingerprint may hold or buy in this drop.
    pub max_per_customer: u32,
}

impl DropPolicy {
    /// An active drop with no window and the default purchase limit.
    #[must_use]
    pub const fn active(drop_id: DropId) -> Self {
        Self {
            drop_id,
            status: DropStatus::Active,
            launch_at: None,
            end_at: None,
            max_per_customer: DEFAULT_MAX_PER_CUSTOMER,
        }
    }

    /// Sets the purchase limit.
    #[must_use]
    pub const fn with_max_per_customer(mut self, max: u32) -> Self {
        self.max_per_customer = max;
        self
    }

    /// Sets the sale window.
    #[must_use]
    pub const fn with_window(
        mut self,
        launch_at: Option<DateTime<Utc>>,
        end_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.launch_at = launch_at;
        self.end_at = end_at;
        self
    }

    /// Whether the drop accepts reservations at `now`.
    #[must_use]
    pub fn accepts_orders(&self, now: DateTime<Utc>) -> bool {
        self.status == DropStatus::Active
            && self.launch_at.is_none_or(|launch| launch <= now)
            && self.end_at.is_none_or(|end| now < end)
    }
}
