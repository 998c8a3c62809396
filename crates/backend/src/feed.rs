use std::pin::Pin;

use async_trait::async_trait;
use common::LiveEventId;
use domain::OfferChange;
use futures_core::Stream;

use crate::Result;

/// A stream of offer change notifications.
pub type OfferChangeStream = Pin<Box<dyn Stream<Item = Result<OfferChange>> + Send>>;

/// Push-based realtime changes of the offer collection.
///
/// No ordering is guaranteed across notifications. Dropping the stream ends
/// the subscription.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Subscribes to changes of the offers belonging to `event_id`.
    async fn subscribe(&self, event_id: LiveEventId) -> Result<OfferChangeStream>;
}
