//! Reservation client for the remote stock lock.

use std::sync::Arc;

use backend::StockBackend;
use common::{BuyerId, OfferId};

/// Requests one-unit stock locks on behalf of a buyer.
///
/// The answer is a plain yes or no. Any transport or remote error counts as a
/// denial, there are no retries, and the local stock view is left alone.
pub struct ReservationClient<S: StockBackend + ?Sized> {
    stock: Arc<S>,
    buyer: BuyerId,
}

impl<S: StockBackend + ?Sized> ReservationClient<S> {
    pub fn new(stock: Arc<S>, buyer: BuyerId) -> Self {
        Self { stock, buyer }
    }

    pub fn buyer(&self) -> BuyerId {
        self.buyer
    }

    /// Tries to reserve one unit of `offer_id`. Returns true if granted.
    #[tracing::instrument(skip(self), fields(buyer = %self.buyer))]
    pub async fn acquire_lock(&self, offer_id: OfferId) -> bool {
        metrics::counter!("checkout_lock_attempts_total").increment(1);

        match self
            .stock
            .acquire_live_offer_lock(self.buyer, offer_id)
            .await
        {
            Ok(true) => {
                tracing::info!("stock lock granted");
                true
            }
            Ok(false) => {
                metrics::counter!("checkout_lock_denied_total").increment(1);
                tracing::info!("stock lock denied");
                false
            }
            Err(e) => {
                metrics::counter!("checkout_lock_errors_total").increment(1);
                tracing::warn!(error = %e, "stock lock request failed, treating as denied");
                false
            }
        }
    }

    /// Releases the buyer's lock on `offer_id`. Best effort.
    ///
    /// Returns false if nothing was released or the request failed; the
    /// server-side lock expiry covers the rest.
    #[tracing::instrument(skip(self), fields(buyer = %self.buyer))]
    pub async fn release_lock(&self, offer_id: OfferId) -> bool {
        match self
            .stock
            .release_live_offer_lock(self.buyer, offer_id)
            .await
        {
            Ok(released) => {
                if released {
                    metrics::counter!("checkout_lock_released_total").increment(1);
                }
                tracing::info!(released, "stock lock release requested");
                released
            }
            Err(e) => {
                tracing::warn!(error = %e, "stock lock release failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::InMemoryOfferBackend;
    use common::{LiveEventId, WorkId};
    use domain::LiveOffer;

    async fn setup(total: u32) -> (Arc<InMemoryOfferBackend>, LiveOffer) {
        let backend = Arc::new(InMemoryOfferBackend::new());
        let offer = LiveOffer::new(LiveEventId::new(), WorkId::new(), total);
        backend.upsert_offer(offer.clone()).await;
        (backend, offer)
    }

    #[tokio::test]
    async fn test_grant_and_release() {
        let (backend, offer) = setup(1).await;
        let client = ReservationClient::new(backend.clone(), BuyerId::new());

        assert!(client.acquire_lock(offer.id).await);
        assert!(backend.has_lock(client.buyer(), offer.id).await);
        assert!(client.release_lock(offer.id).await);
        assert!(!client.release_lock(offer.id).await);
        assert_eq!(backend.active_lock_count().await, 0);
    }

    #[tokio::test]
    async fn test_sold_out_is_denied() {
        let (backend, offer) = setup(1).await;
        let first = ReservationClient::new(backend.clone(), BuyerId::new());
        let second = ReservationClient::new(backend.clone(), BuyerId::new());

        assert!(first.acquire_lock(offer.id).await);
        assert!(!second.acquire_lock(offer.id).await);
    }

    #[tokio::test]
    async fn test_transport_error_is_denial() {
        let (backend, offer) = setup(3).await;
        backend.set_fail_on_lock(true).await;
        let client = ReservationClient::new(backend.clone(), BuyerId::new());

        assert!(!client.acquire_lock(offer.id).await);
        assert_eq!(backend.offer(offer.id).await.unwrap().stock_reserved, 0);
    }

    #[tokio::test]
    async fn test_unknown_offer_is_denial() {
        let (backend, _) = setup(1).await;
        let client = ReservationClient::new(backend, BuyerId::new());
        assert!(!client.acquire_lock(OfferId::new()).await);
    }
}
