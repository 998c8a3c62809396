//! Locally held stock view for one live event.

use std::sync::Arc;

use common::{LiveEventId, OfferId};
use domain::{LiveOffer, OfferChange};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct ViewState {
    event_id: Option<LiveEventId>,
    /// Offers in the order the backend listed them.
    offers: Vec<LiveOffer>,
}

/// Read model of the offers of one live event, as last reported by the backend.
///
/// Cloning the view yields another handle onto the same data. The view is
/// display state only: it is corrected by change notifications and never
/// decremented optimistically.
#[derive(Debug, Clone, Default)]
pub struct StockView {
    state: Arc<RwLock<ViewState>>,
}

impl StockView {
    /// Creates a new empty stock view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the held list with `offers` of `event_id`.
    ///
    /// Offers of other events are dropped.
    pub async fn load(&self, event_id: LiveEventId, offers: Vec<LiveOffer>) {
        let mut state = self.state.write().await;
        state.event_id = Some(event_id);
        state.offers = offers
            .into_iter()
            .filter(|o| o.event_id == event_id)
            .collect();
    }

    /// Merges a change notification into the matching offer.
    ///
    /// Only the offer whose id matches is touched. Notifications for another
    /// event or an unknown offer are ignored. Returns true if the view changed.
    pub async fn apply(&self, change: &OfferChange) -> bool {
        let mut state = self.state.write().await;
        if state.event_id != Some(change.event_id) {
            return false;
        }
        match state.offers.iter_mut().find(|o| o.id == change.offer_id) {
            Some(offer) => offer.apply(&change.patch),
            None => false,
        }
    }

    /// Gets a specific offer.
    pub async fn get(&self, offer_id: OfferId) -> Option<LiveOffer> {
        let state = self.state.read().await;
        state.offers.iter().find(|o| o.id == offer_id).cloned()
    }

    /// Gets all offers in listing order.
    pub async fn all(&self) -> Vec<LiveOffer> {
        self.state.read().await.offers.clone()
    }

    /// Units of `offer_id` currently shown as available.
    pub async fn available(&self, offer_id: OfferId) -> Option<u32> {
        self.get(offer_id).await.map(|o| o.available())
    }

    /// The live event the view currently shows.
    pub async fn event_id(&self) -> Option<LiveEventId> {
        self.state.read().await.event_id
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.offers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.offers.is_empty()
    }

    /// Forgets the event and all offers.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.event_id = None;
        state.offers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::WorkId;
    use domain::OfferPatch;

    async fn loaded_view(offers: &[LiveOffer]) -> StockView {
        let view = StockView::new();
        view.load(offers[0].event_id, offers.to_vec()).await;
        view
    }

    #[tokio::test]
    async fn test_merge_recomputes_available() {
        let event_id = LiveEventId::new();
        let offer = LiveOffer::new(event_id, WorkId::new(), 10).with_counters(3, 2);
        let view = loaded_view(&[offer.clone()]).await;
        assert_eq!(view.available(offer.id).await, Some(5));

        let changed = view
            .apply(&OfferChange::new(offer.id, event_id, OfferPatch::reserved(4)))
            .await;

        assert!(changed);
        assert_eq!(view.available(offer.id).await, Some(4));
        assert_eq!(view.get(offer.id).await.unwrap().stock_sold, 2);
    }

    #[tokio::test]
    async fn test_change_for_one_offer_leaves_others_alone() {
        let event_id = LiveEventId::new();
        let x = LiveOffer::new(event_id, WorkId::new(), 10).with_counters(1, 1);
        let y = LiveOffer::new(event_id, WorkId::new(), 7).with_counters(2, 3);
        let view = loaded_view(&[x.clone(), y.clone()]).await;

        let patch = OfferPatch::from_offer(&LiveOffer::new(event_id, WorkId::new(), 99));
        view.apply(&OfferChange::new(x.id, event_id, patch)).await;

        assert_eq!(view.get(y.id).await.unwrap(), y);
        assert_eq!(view.get(x.id).await.unwrap().stock_total, 99);
    }

    #[tokio::test]
    async fn test_repeated_notification_is_idempotent() {
        let event_id = LiveEventId::new();
        let offer = LiveOffer::new(event_id, WorkId::new(), 10);
        let view = loaded_view(&[offer.clone()]).await;
        let change = OfferChange::new(offer.id, event_id, OfferPatch::sold(3));

        assert!(view.apply(&change).await);
        let snapshot = view.all().await;
        assert!(!view.apply(&change).await);
        assert!(!view.apply(&change).await);
        assert_eq!(view.all().await, snapshot);
    }

    #[tokio::test]
    async fn test_ignores_other_event_and_unknown_offer() {
        let event_id = LiveEventId::new();
        let offer = LiveOffer::new(event_id, WorkId::new(), 10);
        let view = loaded_view(&[offer.clone()]).await;

        assert!(
            !view
                .apply(&OfferChange::new(
                    offer.id,
                    LiveEventId::new(),
                    OfferPatch::sold(1)
                ))
                .await
        );
        assert!(
            !view
                .apply(&OfferChange::new(OfferId::new(), event_id, OfferPatch::sold(1)))
                .await
        );
        assert_eq!(view.get(offer.id).await.unwrap(), offer);
    }

    #[tokio::test]
    async fn test_load_keeps_only_event_offers_in_order() {
        let event_id = LiveEventId::new();
        let a = LiveOffer::new(event_id, WorkId::new(), 1);
        let stray = LiveOffer::new(LiveEventId::new(), WorkId::new(), 1);
        let b = LiveOffer::new(event_id, WorkId::new(), 2);

        let view = StockView::new();
        view.load(event_id, vec![a.clone(), stray, b.clone()]).await;

        let ids: Vec<_> = view.all().await.into_iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
        assert_eq!(view.event_id().await, Some(event_id));
    }

    #[tokio::test]
    async fn test_clear() {
        let offer = LiveOffer::new(LiveEventId::new(), WorkId::new(), 1);
        let view = loaded_view(&[offer]).await;
        view.clear().await;
        assert!(view.is_empty().await);
        assert_eq!(view.event_id().await, None);
    }
}
