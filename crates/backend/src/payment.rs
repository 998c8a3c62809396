use async_trait::async_trait;
use common::{BuyerId, OfferId};
use domain::CheckoutIntent;

use crate::Result;

/// The payment backend that turns a reservation into a checkout intent.
#[async_trait]
pub trait PaymentBackend: Send + Sync {
    /// Creates a payment intent for the unit `buyer` holds on `offer_id`.
    ///
    /// The backend rejects the request with [`BackendError::NoActiveLock`]
    /// when no reservation is held.
    ///
    /// [`BackendError::NoActiveLock`]: crate::BackendError::NoActiveLock
    async fn create_live_offer_intent(
        &self,
        buyer: BuyerId,
        offer_id: OfferId,
    ) -> Result<CheckoutIntent>;
}
