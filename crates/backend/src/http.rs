use async_trait::async_trait;
use common::{BuyerId, Money, OfferId, WorkId};
use domain::CheckoutIntent;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::{BackendError, PaymentBackend, Result};

/// Edge function that creates a payment intent for a reserved unit.
pub const CREATE_INTENT_FUNCTION: &str = "create-live-offer-intent";

/// Error code the edge function returns when no reservation is held.
const NO_ACTIVE_LOCK_CODE: &str = "no_active_lock";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateIntentRequest {
    offer_id: OfferId,
    buyer_id: BuyerId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateIntentResponse {
    client_secret: String,
    amount: i64,
    currency: String,
    work_id: WorkId,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Payment backend reached through the platform's edge functions over HTTPS.
#[derive(Clone)]
pub struct HttpPaymentBackend {
    client: Client,
    functions_url: String,
    api_key: String,
}

impl HttpPaymentBackend {
    /// Creates a client for the functions deployed under `functions_url`,
    /// e.g. `https://project.example.co/functions/v1`.
    pub fn new(functions_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            functions_url: functions_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn function_url(&self, name: &str) -> String {
        format!("{}/{}", self.functions_url, name)
    }
}

#[async_trait]
impl PaymentBackend for HttpPaymentBackend {
    #[tracing::instrument(skip(self))]
    async fn create_live_offer_intent(
        &self,
        buyer: BuyerId,
        offer_id: OfferId,
    ) -> Result<CheckoutIntent> {
        let response = self
            .client
            .post(self.function_url(CREATE_INTENT_FUNCTION))
            .bearer_auth(&self.api_key)
            .json(&CreateIntentRequest {
                offer_id,
                buyer_id: buyer,
            })
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body = response
                .json::<CreateIntentResponse>()
                .await
                .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
            return Ok(CheckoutIntent::new(
                body.client_secret,
                offer_id,
                body.work_id,
                Money::from_cents(body.amount),
                body.currency,
            ));
        }

        let text = response.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        if body.code.as_deref() == Some(NO_ACTIVE_LOCK_CODE) {
            return Err(BackendError::NoActiveLock(offer_id));
        }

        let message = match (body.error, status) {
            (Some(message), _) => message,
            (None, StatusCode::UNAUTHORIZED) => "unauthorized".to_string(),
            (None, _) if !text.is_empty() => text,
            (None, _) => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
        };
        Err(BackendError::Remote {
            status: status.as_u16(),
            message,
        })
    }
}
