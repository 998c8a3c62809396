//! Long-lived subscription keeping a [`StockView`] in line with the backend.

use std::sync::Arc;

use backend::{BackendError, ChangeFeed, OfferChangeStream, StockBackend};
use common::LiveEventId;
use futures_util::StreamExt;
use tokio::task::JoinHandle;

use crate::view::StockView;

/// A running subscription. Dropping it tears the channel down.
struct Subscription {
    event_id: LiveEventId,
    task: JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Read-path reconciliation of a [`StockView`] with realtime changes.
///
/// One subscription per event context: [`StockSync::start`] for another event
/// tears the previous one down first, and so does dropping the sync. It never
/// writes to the backend.
pub struct StockSync<S, F>
where
    S: StockBackend + ?Sized + 'static,
    F: ChangeFeed + ?Sized + 'static,
{
    stock: Arc<S>,
    feed: Arc<F>,
    view: StockView,
    subscription: Option<Subscription>,
}

impl<S, F> StockSync<S, F>
where
    S: StockBackend + ?Sized + 'static,
    F: ChangeFeed + ?Sized + 'static,
{
    /// Creates an idle sync feeding a fresh view.
    pub fn new(stock: Arc<S>, feed: Arc<F>) -> Self {
        Self::with_view(stock, feed, StockView::new())
    }

    /// Creates an idle sync feeding `view`.
    pub fn with_view(stock: Arc<S>, feed: Arc<F>, view: StockView) -> Self {
        Self {
            stock,
            feed,
            view,
            subscription: None,
        }
    }

    /// Returns a handle onto the synchronized view.
    pub fn view(&self) -> StockView {
        self.view.clone()
    }

    /// The event currently subscribed to.
    pub fn event_id(&self) -> Option<LiveEventId> {
        self.subscription.as_ref().map(|s| s.event_id)
    }

    /// Returns true while the subscription task is alive.
    pub fn is_running(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }

    /// Subscribes to `event_id`, loads its offers and starts merging changes.
    ///
    /// Any previous subscription is torn down first. The feed is subscribed
    /// before the initial load so no change between the two is lost.
    #[tracing::instrument(skip(self))]
    pub async fn start(&mut self, event_id: LiveEventId) -> Result<(), BackendError> {
        self.stop();

        let changes = self.feed.subscribe(event_id).await?;
        let offers = self.stock.list_live_offers_for_event(event_id).await?;
        let offer_count = offers.len();
        self.view.load(event_id, offers).await;

        let task = tokio::spawn(run_subscription(
            changes,
            self.view.clone(),
            Arc::clone(&self.stock),
            event_id,
        ));
        self.subscription = Some(Subscription { event_id, task });

        tracing::info!(%event_id, offer_count, "stock sync started");
        Ok(())
    }

    /// Moves the sync to another event context.
    pub async fn retarget(&mut self, event_id: LiveEventId) -> Result<(), BackendError> {
        if self.event_id() == Some(event_id) && self.is_running() {
            return Ok(());
        }
        self.start(event_id).await
    }

    /// Tears the subscription down. The view keeps its last contents.
    pub fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            tracing::info!(event_id = %subscription.event_id, "stock sync stopped");
        }
    }
}

async fn run_subscription<S>(
    mut changes: OfferChangeStream,
    view: StockView,
    stock: Arc<S>,
    event_id: LiveEventId,
) where
    S: StockBackend + ?Sized,
{
    while let Some(item) = changes.next().await {
        match item {
            Ok(change) => {
                if view.apply(&change).await {
                    metrics::counter!("stock_sync_changes_applied_total").increment(1);
                    tracing::debug!(offer_id = %change.offer_id, "stock change applied");
                }
            }
            Err(BackendError::FeedLagged(skipped)) => {
                tracing::warn!(%event_id, skipped, "change feed lagged, reloading offers");
                resync(stock.as_ref(), &view, event_id).await;
            }
            Err(BackendError::FeedClosed) => break,
            Err(e) => {
                tracing::warn!(%event_id, error = %e, "change feed error");
            }
        }
    }
    tracing::info!(%event_id, "change feed ended");
}

async fn resync<S>(stock: &S, view: &StockView, event_id: LiveEventId)
where
    S: StockBackend + ?Sized,
{
    metrics::counter!("stock_sync_resyncs_total").increment(1);
    match stock.list_live_offers_for_event(event_id).await {
        Ok(offers) => view.load(event_id, offers).await,
        Err(e) => tracing::warn!(%event_id, error = %e, "offer reload failed"),
    }
}
