//! Payment intent issuing against an active stock lock.

use std::sync::Arc;

use backend::{BackendError, PaymentBackend};
use common::{BuyerId, OfferId};
use domain::CheckoutIntent;

use crate::error::CheckoutError;

/// Asks the payment backend for a checkout intent bound to the buyer's lock.
pub struct IntentIssuer<P: PaymentBackend + ?Sized> {
    payment: Arc<P>,
    buyer: BuyerId,
}

impl<P: PaymentBackend + ?Sized> IntentIssuer<P> {
    pub fn new(payment: Arc<P>, buyer: BuyerId) -> Self {
        Self { payment, buyer }
    }

    /// Creates the intent for `offer_id`.
    ///
    /// Must only be called once the lock for `offer_id` has been granted.
    /// A missing lock on the backend side is reported as
    /// [`CheckoutError::ReservationExpired`].
    #[tracing::instrument(skip(self), fields(buyer = %self.buyer))]
    pub async fn create_intent(&self, offer_id: OfferId) -> Result<CheckoutIntent, CheckoutError> {
        let result = self
            .payment
            .create_live_offer_intent(self.buyer, offer_id)
            .await;

        let intent = match result {
            Ok(intent) => intent,
            Err(e) => {
                metrics::counter!("checkout_intent_failures_total").increment(1);
                tracing::warn!(error = %e, "checkout intent creation failed");
                return Err(map_backend_error(offer_id, e));
            }
        };

        if intent.offer_id != offer_id {
            metrics::counter!("checkout_intent_failures_total").increment(1);
            tracing::error!(issued_for = %intent.offer_id, "intent issued for another offer");
            return Err(CheckoutError::IntentFailed(
                "intent was issued for a different offer".to_string(),
            ));
        }

        metrics::counter!("checkout_intents_created_total").increment(1);
        tracing::info!(amount = %intent.amount, currency = %intent.currency, "checkout intent created");
        Ok(intent)
    }
}

fn map_backend_error(offer_id: OfferId, error: BackendError) -> CheckoutError {
    if error.is_lock_missing() {
        return CheckoutError::ReservationExpired(offer_id);
    }
    match error {
        BackendError::Remote { message, .. } => CheckoutError::IntentFailed(message),
        BackendError::Transport(_) => {
            CheckoutError::IntentFailed("payment service is unreachable".to_string())
        }
        other => CheckoutError::IntentFailed(other.to_string()),
    }
}
