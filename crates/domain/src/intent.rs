//! Checkout intents issued by the payment backend.

use common::{Money, OfferId, WorkId};
use serde::{Deserialize, Serialize};

/// A single-use token authorizing payment collection for one offer unit.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutIntent {
    pub client_secret: String,
    pub offer_id: OfferId,
    pub work_id: WorkId,
    pub amount: Money,
    /// ISO 4217 code as reported by the payment provider, e.g. `"usd"`.
    pub currency: String,
}

impl CheckoutIntent {
    pub fn new(
        client_secret: impl Into<String>,
        offer_id: OfferId,
        work_id: WorkId,
        amount: Money,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            client_secret: client_secret.into(),
            offer_id,
            work_id,
            amount,
            currency: currency.into(),
        }
    }
}

impl std::fmt::Debug for CheckoutIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutIntent")
            .field("client_secret", &"<redacted>")
            .field("offer_id", &self.offer_id)
            .field("work_id", &self.work_id)
            .field("amount", &self.amount)
            .field("currency", &self.currency)
            .finish()
    }
}
