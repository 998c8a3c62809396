//! Checkout flow driving the presenter through lock, intent and payment.

use std::sync::Arc;

use backend::{PaymentBackend, StockBackend};
use common::{BuyerId, OfferId};
use domain::{CheckoutIntent, LiveOffer};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::CheckoutError;
use crate::intent::IntentIssuer;
use crate::presenter::CheckoutPresenter;
use crate::reservation::ReservationClient;

/// Orchestrates one buyer's purchase attempts.
///
/// A purchase runs two steps in order (stock lock, then checkout intent). The
/// intent is never requested unless the lock was granted. When an attempt is
/// abandoned after the lock was granted the lock is released, unless
/// `release_on_abort` is turned off, in which case the server-side expiry
/// reclaims it.
///
/// The presenter is locked only to apply a transition, never across a
/// remote call, so [`CheckoutFlow::cancel`] takes effect while a purchase is
/// still waiting on the backend.
pub struct CheckoutFlow<S, P>
where
    S: StockBackend + ?Sized,
    P: PaymentBackend + ?Sized,
{
    reservations: ReservationClient<S>,
    intents: IntentIssuer<P>,
    presenter: Mutex<CheckoutPresenter>,
    release_on_abort: bool,
}

impl<S, P> CheckoutFlow<S, P>
where
    S: StockBackend + ?Sized,
    P: PaymentBackend + ?Sized,
{
    /// Creates a flow for `buyer`.
    pub fn new(stock: Arc<S>, payment: Arc<P>, buyer: BuyerId) -> Self {
        Self {
            reservations: ReservationClient::new(stock, buyer),
            intents: IntentIssuer::new(payment, buyer),
            presenter: Mutex::new(CheckoutPresenter::new()),
            release_on_abort: true,
        }
    }

    /// Sets whether abandoned attempts release their lock.
    pub fn with_release_on_abort(mut self, release: bool) -> Self {
        self.release_on_abort = release;
        self
    }

    pub fn buyer(&self) -> BuyerId {
        self.reservations.buyer()
    }

    /// Locks the presenter for reading. Do not hold the guard across a call
    /// into the flow.
    pub async fn presenter(&self) -> MutexGuard<'_, CheckoutPresenter> {
        self.presenter.lock().await
    }

    /// Runs a purchase of `offer` up to the payment step.
    ///
    /// `offer` is the buyer's last known view of the offer. On success the
    /// returned intent is what the payment form collects against. Returns
    /// [`CheckoutError::Cancelled`] when the buyer cancelled while a remote
    /// call was in flight; a lock granted after that point is released.
    #[tracing::instrument(skip(self, offer), fields(buyer = %self.buyer(), offer_id = %offer.id))]
    pub async fn purchase(&self, offer: &LiveOffer) -> Result<CheckoutIntent, CheckoutError> {
        let started = std::time::Instant::now();
        let attempt = self.presenter.lock().await.begin(offer)?;

        // 1. Stock lock
        if !self.reservations.acquire_lock(offer.id).await {
            let settled = self.presenter.lock().await.lock_denied(attempt);
            settled?;
            metrics::counter!("checkout_failed_total", "reason" => "denied").increment(1);
            tracing::info!("checkout ended, stock not secured");
            return Err(CheckoutError::StockNotSecured(offer.id));
        }
        let settled = self.presenter.lock().await.lock_granted(attempt);
        if let Err(e) = settled {
            tracing::info!(error = %e, "lock granted to an abandoned attempt");
            self.release(Some(offer.id)).await;
            return Err(e);
        }

        // 2. Checkout intent, bound to the lock just granted
        let issued = match self.intents.create_intent(offer.id).await {
            Ok(intent) => {
                let settled = self
                    .presenter
                    .lock()
                    .await
                    .intent_issued(attempt, intent.clone());
                settled.map(|()| intent)
            }
            Err(e) => Err(e),
        };
        let intent = match issued {
            Ok(intent) => intent,
            Err(e) => {
                let settled = self.presenter.lock().await.intent_failed(attempt, &e);
                // A cancelled attempt released its lock when it was cancelled.
                let held = settled?;
                self.release(held).await;
                metrics::counter!("checkout_failed_total", "reason" => "intent").increment(1);
                tracing::warn!(error = %e, "checkout ended, intent not issued");
                return Err(e);
            }
        };

        metrics::histogram!("checkout_purchase_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!("collecting payment");
        Ok(intent)
    }

    /// The payment step confirmed the payment.
    #[tracing::instrument(skip(self), fields(buyer = %self.buyer()))]
    pub async fn payment_succeeded(&self) -> Result<(), CheckoutError> {
        self.presenter.lock().await.payment_succeeded()?;
        metrics::counter!("checkout_completed_total").increment(1);
        tracing::info!("checkout completed");
        Ok(())
    }

    /// The payment step reported `message`. Returns the error shown to the buyer.
    #[tracing::instrument(skip(self, message), fields(buyer = %self.buyer()))]
    pub async fn payment_failed(&self, message: impl Into<String>) -> CheckoutError {
        let message = message.into();
        let held = self.presenter.lock().await.payment_failed(message.clone());
        if let Some(offer_id) = held {
            metrics::counter!("checkout_failed_total", "reason" => "payment").increment(1);
            tracing::info!(%offer_id, "payment failed");
            self.release(Some(offer_id)).await;
        }
        CheckoutError::PaymentFailed(message)
    }

    /// The buyer dismissed the checkout.
    ///
    /// Takes effect immediately, also while a purchase is waiting on the lock
    /// or intent call.
    #[tracing::instrument(skip(self), fields(buyer = %self.buyer()))]
    pub async fn cancel(&self) {
        let (had_attempt, held) = {
            let mut presenter = self.presenter.lock().await;
            (presenter.state().is_busy(), presenter.cancel())
        };
        if had_attempt {
            metrics::counter!("checkout_cancelled_total").increment(1);
            tracing::info!("checkout cancelled");
        }
        self.release(held).await;
    }

    async fn release(&self, held: Option<OfferId>) {
        match held {
            Some(offer_id) if self.release_on_abort => {
                self.reservations.release_lock(offer_id).await;
            }
            Some(offer_id) => {
                tracing::debug!(%offer_id, "leaving lock to server-side expiry");
            }
            None => {}
        }
    }
}
