use async_trait::async_trait;
use common::{BuyerId, LiveEventId, OfferId};
use domain::LiveOffer;

use crate::Result;

/// The remote offer store and its stock-lock procedures.
///
/// The remote side is the sole arbiter of admission: it keeps
/// `stock_reserved + stock_sold <= stock_total` and holds at most one active
/// reservation per buyer and offer. Callers hold no authoritative state.
#[async_trait]
pub trait StockBackend: Send + Sync {
    /// Lists the offers of a live event, for the initial load or a resync.
    async fn list_live_offers_for_event(&self, event_id: LiveEventId) -> Result<Vec<LiveOffer>>;

    /// Tries to reserve one unit of `offer_id` for `buyer`.
    ///
    /// Returns `Ok(false)` when the lock is refused: sold out, contention,
    /// an existing reservation by the same buyer, or a closed offer.
    async fn acquire_live_offer_lock(&self, buyer: BuyerId, offer_id: OfferId) -> Result<bool>;

    /// Releases the buyer's reservation on `offer_id`.
    ///
    /// Returns `Ok(false)` when there was nothing to release (expired,
    /// consumed by a sale, or never granted).
    async fn release_live_offer_lock(&self, buyer: BuyerId, offer_id: OfferId) -> Result<bool>;
}
