//! Checkout session endpoints.
//!
//! A session is one buyer's checkout flow. The payment form reports back
//! through the succeed, fail and cancel callbacks. No handler holds the
//! presenter while the backends are called, so a cancel or snapshot is
//! answered while a purchase is still waiting on them.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{BuyerId, LiveEventId, OfferId};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::parse_id;
use crate::state::{AppState, SessionFlow};

// -- Request types --

#[derive(Deserialize, Default)]
pub struct CreateSessionRequest {
    pub buyer_id: Option<String>,
}

#[derive(Deserialize)]
pub struct PurchaseRequest {
    pub event_id: String,
    pub offer_id: String,
}

#[derive(Deserialize)]
pub struct PaymentFailedRequest {
    pub message: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct SessionCreatedResponse {
    pub session_id: String,
    pub buyer_id: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub buyer_id: String,
    pub state: String,
    pub offer_id: Option<String>,
    pub outcome: Option<String>,
    pub message: Option<String>,
    pub client_secret: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
}

impl SessionResponse {
    async fn snapshot(session_id: Uuid, flow: &SessionFlow) -> Self {
        let presenter = flow.presenter().await;
        let intent = presenter.intent();
        Self {
            session_id: session_id.to_string(),
            buyer_id: flow.buyer().to_string(),
            state: presenter.state().to_string(),
            offer_id: presenter.offer_id().map(|id| id.to_string()),
            outcome: presenter.last_outcome().map(|o| o.to_string()),
            message: presenter.error_message().map(str::to_string),
            client_secret: intent.map(|i| i.client_secret.clone()),
            amount_cents: intent.map(|i| i.amount.cents()),
            currency: intent.map(|i| i.currency.clone()),
        }
    }
}

// -- Handlers --

/// POST /sessions — open a checkout session for a buyer.
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    req: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<SessionCreatedResponse>), ApiError> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let buyer = match req.buyer_id {
        Some(ref id) => parse_id::<BuyerId>(id, "buyer_id")?,
        None => BuyerId::new(),
    };

    let session_id = state.open_session(buyer).await;
    tracing::info!(%session_id, %buyer, "checkout session opened");

    Ok((
        StatusCode::CREATED,
        Json(SessionCreatedResponse {
            session_id: session_id.to_string(),
            buyer_id: buyer.to_string(),
        }),
    ))
}

/// GET /sessions/:id — presenter snapshot.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let (session_id, flow) = load(&state, &id).await?;
    Ok(Json(SessionResponse::snapshot(session_id, &flow).await))
}

/// DELETE /sessions/:id — cancel anything outstanding and close the session.
#[tracing::instrument(skip(state))]
pub async fn close(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session_id: Uuid = parse_id(&id, "session id")?;
    if !state.close_session(session_id).await {
        return Err(ApiError::NotFound(format!("Session not found: {session_id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /sessions/:id/purchase — lock one unit and issue the checkout intent.
#[tracing::instrument(skip(state, req))]
pub async fn purchase(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let event_id: LiveEventId = parse_id(&req.event_id, "event_id")?;
    let offer_id: OfferId = parse_id(&req.offer_id, "offer_id")?;
    let (session_id, flow) = load(&state, &id).await?;
    state.bind_session(session_id, event_id).await;

    let view = state.stock_view(event_id).await?;
    let offer = view
        .get(offer_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Offer not found: {offer_id}")))?;

    // The attempt runs on its own task so it settles even if the client goes away.
    let attempt = tokio::spawn(
        {
            let flow = Arc::clone(&flow);
            async move { flow.purchase(&offer).await }
        }
        .in_current_span(),
    );
    attempt
        .await
        .map_err(|e| ApiError::Internal(format!("purchase task failed: {e}")))??;
    Ok(Json(SessionResponse::snapshot(session_id, &flow).await))
}

/// POST /sessions/:id/succeed — the payment form confirmed the payment.
#[tracing::instrument(skip(state))]
pub async fn succeed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let (session_id, flow) = load(&state, &id).await?;
    flow.payment_succeeded().await?;
    Ok(Json(SessionResponse::snapshot(session_id, &flow).await))
}

/// POST /sessions/:id/fail — the payment form reported an error.
#[tracing::instrument(skip(state, req))]
pub async fn fail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<PaymentFailedRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let (session_id, flow) = load(&state, &id).await?;
    flow.payment_failed(req.message).await;
    Ok(Json(SessionResponse::snapshot(session_id, &flow).await))
}

/// POST /sessions/:id/cancel — the buyer dismissed the checkout.
#[tracing::instrument(skip(state))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let (session_id, flow) = load(&state, &id).await?;
    flow.cancel().await;
    Ok(Json(SessionResponse::snapshot(session_id, &flow).await))
}

async fn load(state: &AppState, id: &str) -> Result<(Uuid, Arc<SessionFlow>), ApiError> {
    let session_id: Uuid = parse_id(id, "session id")?;
    let session = state
        .session(session_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session not found: {session_id}")))?;
    Ok((session_id, session))
}
