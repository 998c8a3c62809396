//! Domain types for live-offer checkout.
//!
//! - [`LiveOffer`] with its derived availability and patch merging
//! - [`OfferChange`] row-level change notifications
//! - [`ReservationAttempt`] client-local lock attempts
//! - [`CheckoutIntent`] single-use payment tokens

pub mod intent;
pub mod offer;
pub mod reservation;

pub use common::{BuyerId, LiveEventId, Money, OfferId, WorkId};
pub use intent::CheckoutIntent;
pub use offer::{LiveOffer, OfferChange, OfferPatch, PerksType};
pub use reservation::{ReservationAttempt, ReservationOutcome};
