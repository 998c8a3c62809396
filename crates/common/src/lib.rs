//! Shared types for the live-offer checkout workspace.

pub mod ids;
pub mod money;

pub use ids::{BuyerId, LiveEventId, OfferId, WorkId};
pub use money::Money;
