use std::time::Duration;

use async_trait::async_trait;
use common::{BuyerId, LiveEventId, Money, OfferId, WorkId};
use domain::{LiveOffer, OfferChange, PerksType};
use futures_util::stream;
use serde::Deserialize;
use sqlx::postgres::{PgListener, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{BackendError, ChangeFeed, OfferChangeStream, Result, StockBackend};

/// Channel the `live_offers` trigger notifies with the changed row as JSON.
pub const CHANGES_CHANNEL: &str = "live_offers_changes";

/// Pause before re-issuing `LISTEN` after the listener failed.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// PostgreSQL-backed offer store.
///
/// Reads the `live_offers` table and delegates locking to the
/// `acquire_live_offer_lock` / `release_live_offer_lock` stored procedures,
/// which own all concurrency control.
#[derive(Clone)]
pub struct PostgresOfferBackend {
    pool: PgPool,
}

impl PostgresOfferBackend {
    /// Creates a new PostgreSQL offer backend.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_offer(row: PgRow) -> Result<LiveOffer> {
        let perks: String = row.try_get("perks_type")?;
        let price: Option<i64> = row.try_get("price_override_cents")?;

        Ok(LiveOffer {
            id: OfferId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_id: LiveEventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            work_id: WorkId::from_uuid(row.try_get::<Uuid, _>("work_id")?),
            stock_total: counter(row.try_get::<i32, _>("stock_total")?.into()),
            stock_reserved: counter(row.try_get::<i32, _>("stock_reserved")?.into()),
            stock_sold: counter(row.try_get::<i32, _>("stock_sold")?.into()),
            price_override: price.map(Money::from_cents),
            perks_type: parse_perks(&perks),
            is_active: row.try_get("is_active")?,
        })
    }
}

fn parse_perks(value: &str) -> PerksType {
    value.parse().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "treating offer perks as none");
        PerksType::default()
    })
}

// Negative counters are a remote inconsistency; show them as zero.
fn counter(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

#[async_trait]
impl StockBackend for PostgresOfferBackend {
    #[tracing::instrument(skip(self))]
    async fn list_live_offers_for_event(&self, event_id: LiveEventId) -> Result<Vec<LiveOffer>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_id, work_id, stock_total, stock_reserved, stock_sold,
                   price_override_cents, perks_type, is_active
            FROM live_offers
            WHERE event_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(event_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_offer).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn acquire_live_offer_lock(&self, buyer: BuyerId, offer_id: OfferId) -> Result<bool> {
        let granted: Option<bool> = sqlx::query_scalar("SELECT acquire_live_offer_lock($1, $2)")
            .bind(buyer.as_uuid())
            .bind(offer_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        Ok(granted.unwrap_or(false))
    }

    #[tracing::instrument(skip(self))]
    async fn release_live_offer_lock(&self, buyer: BuyerId, offer_id: OfferId) -> Result<bool> {
        let released: Option<bool> = sqlx::query_scalar("SELECT release_live_offer_lock($1, $2)")
            .bind(buyer.as_uuid())
            .bind(offer_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        Ok(released.unwrap_or(false))
    }
}

/// Row payload sent by the `live_offers` notify trigger.
#[derive(Debug, Deserialize)]
struct OfferRow {
    id: Uuid,
    event_id: Uuid,
    work_id: Uuid,
    stock_total: i64,
    stock_reserved: i64,
    stock_sold: i64,
    price_override_cents: Option<i64>,
    perks_type: String,
    is_active: bool,
}

impl OfferRow {
    fn into_offer(self) -> LiveOffer {
        LiveOffer {
            id: OfferId::from_uuid(self.id),
            event_id: LiveEventId::from_uuid(self.event_id),
            work_id: WorkId::from_uuid(self.work_id),
            stock_total: counter(self.stock_total),
            stock_reserved: counter(self.stock_reserved),
            stock_sold: counter(self.stock_sold),
            price_override: self.price_override_cents.map(Money::from_cents),
            perks_type: parse_perks(&self.perks_type),
            is_active: self.is_active,
        }
    }
}

/// Decodes a notification payload into a full-row change.
pub fn decode_change(payload: &str) -> Result<OfferChange> {
    let row: OfferRow = serde_json::from_str(payload)?;
    Ok(OfferChange::full_row(&row.into_offer()))
}

/// Realtime offer changes over PostgreSQL `LISTEN`/`NOTIFY`.
///
/// The listener is polled with `try_recv`, which reports a dropped
/// connection instead of silently reconnecting. Notifications sent while the
/// connection was down are lost, so every reconnect surfaces as
/// [`BackendError::FeedLagged`] and subscribers reload their offers.
#[derive(Clone)]
pub struct PgChangeFeed {
    pool: PgPool,
}

impl PgChangeFeed {
    /// Creates a change feed sharing `pool`'s connection settings.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// One `try_recv` result, as seen by a subscriber of `event_id`.
#[derive(Debug)]
enum Received {
    Change(OfferChange),
    Ignored,
    ConnectionLost,
    Closed,
    Failed(sqlx::Error),
}

impl Received {
    fn classify(
        result: std::result::Result<Option<String>, sqlx::Error>,
        event_id: LiveEventId,
    ) -> Self {
        match result {
            Ok(Some(payload)) => match decode_change(&payload) {
                Ok(change) if change.event_id == event_id => Received::Change(change),
                Ok(_) => Received::Ignored,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping undecodable offer notification");
                    Received::Ignored
                }
            },
            Ok(None) => Received::ConnectionLost,
            Err(sqlx::Error::PoolClosed) => Received::Closed,
            Err(e) => Received::Failed(e),
        }
    }
}

/// Listener plus whether it must re-`LISTEN` before the next receive.
struct ListenState {
    listener: PgListener,
    reconnect: bool,
}

async fn next_change(
    mut state: ListenState,
    event_id: LiveEventId,
) -> Option<(Result<OfferChange>, Option<ListenState>)> {
    if state.reconnect {
        tokio::time::sleep(RECONNECT_BACKOFF).await;
        match state.listener.listen(CHANGES_CHANNEL).await {
            Ok(()) => {
                tracing::info!(%event_id, "offer change listener reconnected");
                state.reconnect = false;
                return Some((Err(BackendError::FeedLagged(0)), Some(state)));
            }
            Err(e) => return Some((Err(BackendError::Database(e)), Some(state))),
        }
    }

    loop {
        let result = state
            .listener
            .try_recv()
            .await
            .map(|n| n.map(|n| n.payload().to_owned()));
        match Received::classify(result, event_id) {
            Received::Change(change) => return Some((Ok(change), Some(state))),
            Received::Ignored => continue,
            Received::ConnectionLost => {
                tracing::warn!(%event_id, "offer change listener lost its connection");
                return Some((Err(BackendError::FeedLagged(0)), Some(state)));
            }
            Received::Closed => return Some((Err(BackendError::FeedClosed), None)),
            Received::Failed(e) => {
                state.reconnect = true;
                return Some((Err(BackendError::Database(e)), Some(state)));
            }
        }
    }
}

#[async_trait]
impl ChangeFeed for PgChangeFeed {
    #[tracing::instrument(skip(self))]
    async fn subscribe(&self, event_id: LiveEventId) -> Result<OfferChangeStream> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGES_CHANNEL).await?;

        let initial = ListenState {
            listener,
            reconnect: false,
        };
        let changes = stream::unfold(Some(initial), move |state| async move {
            next_change(state?, event_id).await
        });

        Ok(Box::pin(changes))
    }
}
