//! Live stock view endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::LiveEventId;
use domain::LiveOffer;
use serde::Serialize;

use crate::error::ApiError;
use crate::routes::parse_id;
use crate::state::AppState;

#[derive(Serialize)]
pub struct OfferResponse {
    pub id: String,
    pub work_id: String,
    pub stock_total: u32,
    pub stock_reserved: u32,
    pub stock_sold: u32,
    pub available: u32,
    pub price_override_cents: Option<i64>,
    pub perks_type: String,
    pub is_active: bool,
    pub purchasable: bool,
}

impl From<&LiveOffer> for OfferResponse {
    fn from(offer: &LiveOffer) -> Self {
        Self {
            id: offer.id.to_string(),
            work_id: offer.work_id.to_string(),
            stock_total: offer.stock_total,
            stock_reserved: offer.stock_reserved,
            stock_sold: offer.stock_sold,
            available: offer.available(),
            price_override_cents: offer.price_override.map(|p| p.cents()),
            perks_type: offer.perks_type.to_string(),
            is_active: offer.is_active,
            purchasable: offer.is_purchasable(),
        }
    }
}

#[derive(Serialize)]
pub struct EventOffersResponse {
    pub event_id: String,
    pub offers: Vec<OfferResponse>,
}

/// GET /events/:event_id/offers — current stock view of a live event.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Json<EventOffersResponse>, ApiError> {
    let event_id: LiveEventId = parse_id(&event_id, "event_id")?;
    let view = state.stock_view(event_id).await?;
    let offers = view.all().await;

    Ok(Json(EventOffersResponse {
        event_id: event_id.to_string(),
        offers: offers.iter().map(OfferResponse::from).collect(),
    }))
}
