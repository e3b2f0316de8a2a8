//! Checkout reservations and their state machine.
//!
//! ```text
//!          convert            cancel              sweep (now >= expires_at)
//! active ──────────► converted   active ───► cancelled   active ───► expired
//! ```
//!
//! Terminal states are final. Every transition is a compare-and-swap on the
//! reservation's `version`, so concurrent sweep / convert / cancel calls on
//! the same reservation produce exactly one winner.

use crate::types::{DropId, Fingerprint, Money, ReservationId, VariantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Holding stock, awaiting payment.
    Active,
    /// Payment confirmed; stock sold.
    Converted,
    /// Expired before conversion; stock released.
    Expired,
    /// Released by the checkout collaborator; stock released.
    Cancelled,
}

impl ReservationStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Converted => "converted",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "converted" => Some(Self::Converted),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Whether `self -> to` is an edge of the state machine.
    #[must_use]
    pub const fn can_transition_to(&self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Active, Self::Converted | Self::Expired | Self::Cancelled)
        )
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A temporary hold on stock during checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identifier.
    pub id: ReservationId,
    /// Checkout session that created the hold.
    pub checkout_session_id: String,
    /// Variant held.
    pub variant_id: VariantId,
    /// Drop the variant belongs to (purchase limits are per drop).
    pub drop_id: DropId,
    /// Units held.
    pub quantity: u32,
    /// Unit price frozen at reservation time.
    pub unit_price: Money,
    /// Requester fingerprint for purchase-limit enforcement.
    pub fingerprint: Fingerprint,
    /// Order linked on conversion.
    pub order_reference: Option<String>,
    /// Current status.
    pub status: ReservationStatus,
    /// Hold deadline.
    pub expires_at: DateTime<Utc>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
    /// Compare-and-swap version, bumped on every transition.
    pub version: i64,
}

impl Reservation {
    /// Whether the hold deadline has passed at `now`.
    #[must_use]
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether this reservation counts against the purchase limit at `now`:
    /// active and unexpired, or converted.
    #[must_use]
    pub fn counts_toward_limit(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ReservationStatus::Active => !self.is_past_expiry(now),
            ReservationStatus::Converted => true,
            ReservationStatus::Expired | ReservationStatus::Cancelled => false,
        }
    }

    /// Total price of the hold at the snapshotted unit price.
    #[must_use]
    pub fn total_price(&self) -> Money {
        self.unit_price.times(self.quantity)
    }

    /// Returns the reservation after a successful transition.
    #[must_use]
    pub fn transitioned(&self, transition: &ReservationTransition) -> Self {
        Self {
            status: transition.to,
            order_reference: transition
                .order_reference
                .clone()
                .or_else(|| self.order_reference.clone()),
            updated_at: transition.at,
            version: self.version + 1,
            ..self.clone()
        }
    }
}

/// A compare-and-swap status change for a stored reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationTransition {
    /// Reservation to change.
    pub reservation_id: ReservationId,
    /// Version the caller read; the write fails if it moved on.
    pub expected_version: i64,
    /// Target status.
    pub to: ReservationStatus,
    /// Order to link (conversions only).
    pub order_reference: Option<String>,
    /// Transition time.
    pub at: DateTime<Utc>,
}

/// Reservation write committed together with a ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationWrite {
    /// Insert a new active reservation.
    Insert(Reservation),
    /// Transition an existing reservation.
    Transition(ReservationTransition),
}
