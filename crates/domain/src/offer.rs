//! Live offers and their row-level change notifications.

use common::{LiveEventId, Money, OfferId, WorkId};
use serde::{Deserialize, Deserializer, Serialize};

/// Perk attached to a live offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PerksType {
    /// No perk, the plain work.
    #[default]
    None,
    /// Signed by the creator during the event.
    Signed,
    /// A design variant only sold during the event.
    LimitedDesign,
    /// Extra goodies bundled with the work.
    Exclusive,
}

impl PerksType {
    /// Returns the wire name of the perk.
    pub fn as_str(&self) -> &'static str {
        match self {
            PerksType::None => "none",
            PerksType::Signed => "signed",
            PerksType::LimitedDesign => "limited_design",
            PerksType::Exclusive => "exclusive",
        }
    }
}

impl std::fmt::Display for PerksType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PerksType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(PerksType::None),
            "signed" => Ok(PerksType::Signed),
            "limited_design" | "limited-design" => Ok(PerksType::LimitedDesign),
            "exclusive" => Ok(PerksType::Exclusive),
            other => Err(format!("unknown perks type: {other}")),
        }
    }
}

/// A time-boxed, limited-stock purchasable item tied to a live event.
///
/// The stock counters are owned by the remote store. The remote lock
/// procedure keeps `stock_reserved + stock_sold <= stock_total`; a local copy
/// may lag behind, so [`LiveOffer::available`] saturates at zero instead of
/// trusting the counters to be consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveOffer {
    pub id: OfferId,
    pub event_id: LiveEventId,
    pub work_id: WorkId,
    pub stock_total: u32,
    pub stock_reserved: u32,
    pub stock_sold: u32,
    pub price_override: Option<Money>,
    pub perks_type: PerksType,
    pub is_active: bool,
}

impl LiveOffer {
    /// Creates an active offer with the given total stock and nothing reserved or sold.
    pub fn new(event_id: LiveEventId, work_id: WorkId, stock_total: u32) -> Self {
        Self {
            id: OfferId::new(),
            event_id,
            work_id,
            stock_total,
            stock_reserved: 0,
            stock_sold: 0,
            price_override: None,
            perks_type: PerksType::None,
            is_active: true,
        }
    }

    /// Sets the price override.
    pub fn with_price_override(mut self, price: Money) -> Self {
        self.price_override = Some(price);
        self
    }

    /// Sets the perk.
    pub fn with_perks(mut self, perks_type: PerksType) -> Self {
        self.perks_type = perks_type;
        self
    }

    /// Sets the reserved and sold counters.
    pub fn with_counters(mut self, reserved: u32, sold: u32) -> Self {
        self.stock_reserved = reserved;
        self.stock_sold = sold;
        self
    }

    /// Units neither reserved nor sold, never negative.
    pub fn available(&self) -> u32 {
        self.stock_total
            .saturating_sub(self.stock_reserved)
            .saturating_sub(self.stock_sold)
    }

    /// Returns true if the last known view allows a purchase attempt.
    ///
    /// Advisory only: the remote lock decides.
    pub fn is_purchasable(&self) -> bool {
        self.is_active && self.available() > 0
    }

    /// Price charged for one unit, given the linked work's list price.
    pub fn unit_price(&self, work_price: Money) -> Money {
        self.price_override.unwrap_or(work_price)
    }

    /// Merges the fields present in `patch`. Returns true if anything changed.
    pub fn apply(&mut self, patch: &OfferPatch) -> bool {
        let before = self.clone();

        if let Some(total) = patch.stock_total {
            self.stock_total = total;
        }
        if let Some(reserved) = patch.stock_reserved {
            self.stock_reserved = reserved;
        }
        if let Some(sold) = patch.stock_sold {
            self.stock_sold = sold;
        }
        if let Some(price) = patch.price_override {
            self.price_override = price;
        }
        if let Some(perks) = patch.perks_type {
            self.perks_type = perks;
        }
        if let Some(active) = patch.is_active {
            self.is_active = active;
        }

        *self != before
    }
}

/// The changed fields of one offer row. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_total: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_reserved: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_sold: Option<u32>,
    /// `Some(None)` clears the override; `None` leaves it as is.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub price_override: Option<Option<Money>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perks_type: Option<PerksType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl OfferPatch {
    /// A patch that replaces every mutable field with the values of `offer`.
    pub fn from_offer(offer: &LiveOffer) -> Self {
        Self {
            stock_total: Some(offer.stock_total),
            stock_reserved: Some(offer.stock_reserved),
            stock_sold: Some(offer.stock_sold),
            price_override: Some(offer.price_override),
            perks_type: Some(offer.perks_type),
            is_active: Some(offer.is_active),
        }
    }

    /// A patch touching only the reserved counter.
    pub fn reserved(reserved: u32) -> Self {
        Self {
            stock_reserved: Some(reserved),
            ..Self::default()
        }
    }

    /// A patch touching only the sold counter.
    pub fn sold(sold: u32) -> Self {
        Self {
            stock_sold: Some(sold),
            ..Self::default()
        }
    }

    /// Returns true if the patch carries no fields.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// An explicit `null` must deserialize to `Some(None)`, not to `None`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A row-level change notification for one offer of one live event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferChange {
    pub offer_id: OfferId,
    pub event_id: LiveEventId,
    pub patch: OfferPatch,
}

impl OfferChange {
    /// Creates a change notification.
    pub fn new(offer_id: OfferId, event_id: LiveEventId, patch: OfferPatch) -> Self {
        Self {
            offer_id,
            event_id,
            patch,
        }
    }

    /// A notification carrying the full current row of `offer`.
    pub fn full_row(offer: &LiveOffer) -> Self {
        Self::new(offer.id, offer.event_id, OfferPatch::from_offer(offer))
    }
}
