use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{BuyerId, LiveEventId, Money, OfferId, WorkId};
use domain::{CheckoutIntent, LiveOffer, OfferChange, OfferPatch};
use futures_util::stream;
use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    BackendError, ChangeFeed, OfferChangeStream, PaymentBackend, Result, StockBackend,
};

const CHANGE_CHANNEL_CAPACITY: usize = 256;
const INTENT_CURRENCY: &str = "usd";

#[derive(Debug)]
struct Lock {
    acquired_at: Instant,
    client_secret: Option<String>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    /// Offers in insertion order.
    offers: Vec<LiveOffer>,
    work_prices: HashMap<WorkId, Money>,
    locks: HashMap<(BuyerId, OfferId), Lock>,
    intents: HashMap<String, (BuyerId, OfferId)>,
    next_intent: u32,
    fail_on_list: bool,
    fail_on_lock: bool,
    fail_on_intent: bool,
}

impl InMemoryState {
    fn offer_mut(&mut self, offer_id: OfferId) -> Option<&mut LiveOffer> {
        self.offers.iter_mut().find(|o| o.id == offer_id)
    }

    /// Drops locks older than `ttl` and returns their units to availability.
    fn sweep_expired(&mut self, ttl: Option<Duration>, now: Instant) -> Vec<OfferChange> {
        let Some(ttl) = ttl else {
            return Vec::new();
        };

        let expired: Vec<(BuyerId, OfferId)> = self
            .locks
            .iter()
            .filter(|(_, lock)| now.duration_since(lock.acquired_at) >= ttl)
            .map(|(key, _)| *key)
            .collect();

        let mut changes = Vec::new();
        for key in expired {
            let Some(lock) = self.locks.remove(&key) else {
                continue;
            };
            if let Some(secret) = lock.client_secret {
                self.intents.remove(&secret);
            }
            if let Some(offer) = self.offer_mut(key.1) {
                offer.stock_reserved = offer.stock_reserved.saturating_sub(1);
                changes.push(OfferChange::new(
                    offer.id,
                    offer.event_id,
                    OfferPatch::reserved(offer.stock_reserved),
                ));
            }
            tracing::debug!(buyer = %key.0, offer_id = %key.1, "reservation expired");
        }
        changes
    }
}

/// In-memory stand-in for the hosted offer store and payment backend.
///
/// Lock admission happens under a single mutex, so concurrent attempts are
/// serialized the way the remote stored procedure serializes them. Every
/// counter change is broadcast to [`ChangeFeed`] subscribers.
#[derive(Debug, Clone)]
pub struct InMemoryOfferBackend {
    state: Arc<Mutex<InMemoryState>>,
    changes: broadcast::Sender<OfferChange>,
    lock_ttl: Option<Duration>,
}

impl Default for InMemoryOfferBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOfferBackend {
    /// Creates an empty backend whose locks never expire.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(InMemoryState::default())),
            changes,
            lock_ttl: None,
        }
    }

    /// Expires locks that were neither released nor consumed within `ttl`.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = Some(ttl);
        self
    }

    /// Adds or replaces an offer and broadcasts its full row.
    pub async fn upsert_offer(&self, offer: LiveOffer) {
        let change = OfferChange::full_row(&offer);
        {
            let mut state = self.state.lock().await;
            match state.offer_mut(offer.id) {
                Some(existing) => *existing = offer,
                None => state.offers.push(offer),
            }
        }
        self.publish([change]);
    }

    /// Sets the list price of a work.
    pub async fn set_work_price(&self, work_id: WorkId, price: Money) {
        self.state.lock().await.work_prices.insert(work_id, price);
    }

    /// Closes or reopens an offer.
    pub async fn set_offer_active(&self, offer_id: OfferId, active: bool) -> Result<()> {
        let change = {
            let mut state = self.state.lock().await;
            let offer = state
                .offer_mut(offer_id)
                .ok_or(BackendError::OfferNotFound(offer_id))?;
            offer.is_active = active;
            OfferChange::new(
                offer.id,
                offer.event_id,
                OfferPatch {
                    is_active: Some(active),
                    ..OfferPatch::default()
                },
            )
        };
        self.publish([change]);
        Ok(())
    }

    /// Simulates the payment provider confirming `client_secret`: the
    /// reserved unit becomes sold and the lock is consumed.
    #[tracing::instrument(skip(self, client_secret))]
    pub async fn settle_payment(&self, client_secret: &str) -> Result<()> {
        let change = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let expired = state.sweep_expired(self.lock_ttl, now);
            self.publish(expired);

            let (buyer, offer_id) = state.intents.remove(client_secret).ok_or_else(|| {
                BackendError::Remote {
                    status: 404,
                    message: "unknown payment intent".to_string(),
                }
            })?;
            state
                .locks
                .remove(&(buyer, offer_id))
                .ok_or(BackendError::NoActiveLock(offer_id))?;
            let offer = state
                .offer_mut(offer_id)
                .ok_or(BackendError::OfferNotFound(offer_id))?;
            offer.stock_reserved = offer.stock_reserved.saturating_sub(1);
            offer.stock_sold += 1;
            OfferChange::new(
                offer.id,
                offer.event_id,
                OfferPatch {
                    stock_reserved: Some(offer.stock_reserved),
                    stock_sold: Some(offer.stock_sold),
                    ..OfferPatch::default()
                },
            )
        };
        metrics::counter!("backend_sales_settled_total").increment(1);
        self.publish([change]);
        Ok(())
    }

    /// Returns the current authoritative copy of an offer.
    pub async fn offer(&self, offer_id: OfferId) -> Option<LiveOffer> {
        let state = self.state.lock().await;
        state.offers.iter().find(|o| o.id == offer_id).cloned()
    }

    /// Returns the number of active locks.
    pub async fn active_lock_count(&self) -> usize {
        self.state.lock().await.locks.len()
    }

    /// Returns true if `buyer` holds a lock on `offer_id`.
    pub async fn has_lock(&self, buyer: BuyerId, offer_id: OfferId) -> bool {
        self.state.lock().await.locks.contains_key(&(buyer, offer_id))
    }

    /// Returns the number of intents issued and not yet settled or expired.
    pub async fn intent_count(&self) -> usize {
        self.state.lock().await.intents.len()
    }

    /// Makes listing fail with a transport error.
    pub async fn set_fail_on_list(&self, fail: bool) {
        self.state.lock().await.fail_on_list = fail;
    }

    /// Makes lock acquisition fail with a transport error.
    pub async fn set_fail_on_lock(&self, fail: bool) {
        self.state.lock().await.fail_on_lock = fail;
    }

    /// Makes intent creation fail with a remote error.
    pub async fn set_fail_on_intent(&self, fail: bool) {
        self.state.lock().await.fail_on_intent = fail;
    }

    fn publish(&self, changes: impl IntoIterator<Item = OfferChange>) {
        for change in changes {
            // No subscribers is not an error.
            let _ = self.changes.send(change);
        }
    }
}

#[async_trait]
impl StockBackend for InMemoryOfferBackend {
    #[tracing::instrument(skip(self))]
    async fn list_live_offers_for_event(&self, event_id: LiveEventId) -> Result<Vec<LiveOffer>> {
        let mut state = self.state.lock().await;
        if state.fail_on_list {
            return Err(BackendError::Transport("connection reset".to_string()));
        }
        let expired = state.sweep_expired(self.lock_ttl, Instant::now());
        self.publish(expired);

        Ok(state
            .offers
            .iter()
            .filter(|o| o.event_id == event_id)
            .cloned()
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn acquire_live_offer_lock(&self, buyer: BuyerId, offer_id: OfferId) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.fail_on_lock {
            return Err(BackendError::Transport("connection reset".to_string()));
        }
        let now = Instant::now();
        let expired = state.sweep_expired(self.lock_ttl, now);
        self.publish(expired);

        if state.locks.contains_key(&(buyer, offer_id)) {
            return Ok(false);
        }

        let offer = state
            .offer_mut(offer_id)
            .ok_or(BackendError::OfferNotFound(offer_id))?;
        if !offer.is_purchasable() {
            return Ok(false);
        }
        offer.stock_reserved += 1;
        let change = OfferChange::new(
            offer.id,
            offer.event_id,
            OfferPatch::reserved(offer.stock_reserved),
        );

        state.locks.insert(
            (buyer, offer_id),
            Lock {
                acquired_at: now,
                client_secret: None,
            },
        );
        self.publish([change]);
        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    async fn release_live_offer_lock(&self, buyer: BuyerId, offer_id: OfferId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let expired = state.sweep_expired(self.lock_ttl, Instant::now());
        self.publish(expired);

        let Some(lock) = state.locks.remove(&(buyer, offer_id)) else {
            return Ok(false);
        };
        if let Some(secret) = lock.client_secret {
            state.intents.remove(&secret);
        }
        if let Some(offer) = state.offer_mut(offer_id) {
            offer.stock_reserved = offer.stock_reserved.saturating_sub(1);
            let change = OfferChange::new(
                offer.id,
                offer.event_id,
                OfferPatch::reserved(offer.stock_reserved),
            );
            self.publish([change]);
        }
        Ok(true)
    }
}

#[async_trait]
impl PaymentBackend for InMemoryOfferBackend {
    #[tracing::instrument(skip(self))]
    async fn create_live_offer_intent(
        &self,
        buyer: BuyerId,
        offer_id: OfferId,
    ) -> Result<CheckoutIntent> {
        let mut state = self.state.lock().await;
        if state.fail_on_intent {
            return Err(BackendError::Remote {
                status: 502,
                message: "payment provider unavailable".to_string(),
            });
        }
        let expired = state.sweep_expired(self.lock_ttl, Instant::now());
        self.publish(expired);

        let already_issued = match state.locks.get(&(buyer, offer_id)) {
            Some(lock) => lock.client_secret.is_some(),
            None => return Err(BackendError::NoActiveLock(offer_id)),
        };
        if already_issued {
            return Err(BackendError::Remote {
                status: 409,
                message: "an intent was already issued for this reservation".to_string(),
            });
        }

        let offer = state
            .offers
            .iter()
            .find(|o| o.id == offer_id)
            .cloned()
            .ok_or(BackendError::OfferNotFound(offer_id))?;
        let work_price = state.work_prices.get(&offer.work_id).copied();
        if offer.price_override.is_none() && work_price.is_none() {
            return Err(BackendError::Remote {
                status: 422,
                message: "offer has no price".to_string(),
            });
        }
        let amount = offer.unit_price(work_price.unwrap_or_default());

        state.next_intent += 1;
        let client_secret = format!(
            "pi_{:04}_secret_{}",
            state.next_intent,
            Uuid::new_v4().simple()
        );
        if let Some(lock) = state.locks.get_mut(&(buyer, offer_id)) {
            lock.client_secret = Some(client_secret.clone());
        }
        state
            .intents
            .insert(client_secret.clone(), (buyer, offer_id));

        Ok(CheckoutIntent::new(
            client_secret,
            offer_id,
            offer.work_id,
            amount,
            INTENT_CURRENCY.to_string(),
        ))
    }
}

#[async_trait]
impl ChangeFeed for InMemoryOfferBackend {
    async fn subscribe(&self, event_id: LiveEventId) -> Result<OfferChangeStream> {
        let receiver = self.changes.subscribe();

        // Reports the backend going away once, then ends.
        let changes = stream::unfold(Some(receiver), move |receiver| async move {
            let mut receiver = receiver?;
            loop {
                match receiver.recv().await {
                    Ok(change) if change.event_id == event_id => {
                        return Some((Ok(change), Some(receiver)));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        return Some((Err(BackendError::FeedLagged(skipped)), Some(receiver)));
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Some((Err(BackendError::FeedClosed), None));
                    }
                }
            }
        });

        Ok(Box::pin(changes))
    }
}
