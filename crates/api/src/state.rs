//! Shared application state accessible from all handlers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use backend::{BackendError, ChangeFeed, InMemoryOfferBackend, PaymentBackend, StockBackend};
use checkout::CheckoutFlow;
use common::{BuyerId, LiveEventId};
use stock_sync::{StockSync, StockView};
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// The checkout flow behind one session.
pub type SessionFlow = CheckoutFlow<dyn StockBackend, dyn PaymentBackend>;

type EventSync = StockSync<dyn StockBackend, dyn ChangeFeed>;

struct Session {
    flow: Arc<SessionFlow>,
    /// Event the session last purchased from. Keeps that event's sync alive.
    event_id: Option<LiveEventId>,
    last_seen: Instant,
}

/// Registry entry for one event's subscription.
///
/// The cell is filled outside the registry lock, so a slow listing only holds
/// up requests for the same event.
struct SyncSlot {
    sync: Arc<OnceCell<EventSync>>,
    last_used: Instant,
}

impl SyncSlot {
    fn new() -> Self {
        Self {
            sync: Arc::new(OnceCell::new()),
            last_used: Instant::now(),
        }
    }

    fn is_running(&self) -> bool {
        self.sync.get().is_some_and(|s| s.is_running())
    }
}

/// What one [`AppState::reap_idle`] pass removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Reaped {
    pub sessions: usize,
    pub syncs: usize,
}

pub struct AppState {
    stock: Arc<dyn StockBackend>,
    payment: Arc<dyn PaymentBackend>,
    feed: Arc<dyn ChangeFeed>,
    release_on_abort: bool,
    session_idle: Duration,
    sync_idle: Duration,
    sessions: Mutex<HashMap<Uuid, Session>>,
    syncs: Mutex<HashMap<LiveEventId, SyncSlot>>,
}

impl AppState {
    pub fn new(
        stock: Arc<dyn StockBackend>,
        payment: Arc<dyn PaymentBackend>,
        feed: Arc<dyn ChangeFeed>,
    ) -> Self {
        Self {
            stock,
            payment,
            feed,
            release_on_abort: true,
            session_idle: Duration::from_secs(1800),
            sync_idle: Duration::from_secs(300),
            sessions: Mutex::new(HashMap::new()),
            syncs: Mutex::new(HashMap::new()),
        }
    }

    /// State backed entirely by one in-memory backend.
    pub fn in_memory(backend: InMemoryOfferBackend) -> Self {
        let backend = Arc::new(backend);
        Self::new(backend.clone(), backend.clone(), backend)
    }

    pub fn with_release_on_abort(mut self, release: bool) -> Self {
        self.release_on_abort = release;
        self
    }

    /// Sets how long an untouched session, and an event sync no session is
    /// bound to, survive [`AppState::reap_idle`].
    pub fn with_idle_limits(mut self, session_idle: Duration, sync_idle: Duration) -> Self {
        self.session_idle = session_idle;
        self.sync_idle = sync_idle;
        self
    }

    /// Returns the synchronized stock view of `event_id`.
    ///
    /// The first request for an event starts its subscription; a subscription
    /// whose feed has ended is started again.
    pub async fn stock_view(&self, event_id: LiveEventId) -> Result<StockView, BackendError> {
        let cell = {
            let mut syncs = self.syncs.lock().await;
            let slot = syncs.entry(event_id).or_insert_with(SyncSlot::new);
            if slot.sync.initialized() && !slot.is_running() {
                *slot = SyncSlot::new();
            }
            slot.last_used = Instant::now();
            Arc::clone(&slot.sync)
        };

        let sync = cell
            .get_or_try_init(|| async {
                let mut sync = StockSync::new(Arc::clone(&self.stock), Arc::clone(&self.feed));
                sync.start(event_id).await?;
                Ok::<_, BackendError>(sync)
            })
            .await?;
        Ok(sync.view())
    }

    /// Opens a checkout session for `buyer` and returns its id.
    pub async fn open_session(&self, buyer: BuyerId) -> Uuid {
        let flow = CheckoutFlow::new(Arc::clone(&self.stock), Arc::clone(&self.payment), buyer)
            .with_release_on_abort(self.release_on_abort);
        let session_id = Uuid::new_v4();
        let session = Session {
            flow: Arc::new(flow),
            event_id: None,
            last_seen: Instant::now(),
        };
        self.sessions.lock().await.insert(session_id, session);
        metrics::counter!("checkout_sessions_opened_total").increment(1);
        session_id
    }

    /// Looks a session up and marks it as seen.
    pub async fn session(&self, session_id: Uuid) -> Option<Arc<SessionFlow>> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(&session_id)?;
        session.last_seen = Instant::now();
        Some(Arc::clone(&session.flow))
    }

    /// Records that `session_id` is buying from `event_id`.
    pub async fn bind_session(&self, session_id: Uuid, event_id: LiveEventId) {
        if let Some(session) = self.sessions.lock().await.get_mut(&session_id) {
            session.event_id = Some(event_id);
        }
    }

    /// Cancels whatever the session has outstanding and forgets it.
    ///
    /// The event's sync is dropped too once no other session is bound to it.
    /// Returns false for an unknown session.
    pub async fn close_session(&self, session_id: Uuid) -> bool {
        let Some(session) = self.sessions.lock().await.remove(&session_id) else {
            return false;
        };
        session.flow.cancel().await;
        metrics::counter!("checkout_sessions_closed_total", "reason" => "closed").increment(1);
        tracing::info!(%session_id, "checkout session closed");

        if let Some(event_id) = session.event_id {
            let bound = self.bound_events().await;
            if !bound.contains(&event_id) && self.syncs.lock().await.remove(&event_id).is_some() {
                tracing::info!(%event_id, "stock sync released");
            }
        }
        true
    }

    /// Drops sessions untouched for longer than the session limit, then
    /// syncs that no session is bound to and nobody read within the sync
    /// limit.
    pub async fn reap_idle(&self) -> Reaped {
        let now = Instant::now();
        let expired: Vec<(Uuid, Session)> = {
            let mut sessions = self.sessions.lock().await;
            let ids: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, s)| now.duration_since(s.last_seen) >= self.session_idle)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|s| (id, s)))
                .collect()
        };
        for (session_id, session) in &expired {
            session.flow.cancel().await;
            tracing::info!(%session_id, "idle checkout session closed");
        }
        metrics::counter!("checkout_sessions_closed_total", "reason" => "idle")
            .increment(expired.len() as u64);

        let bound = self.bound_events().await;
        let mut syncs = self.syncs.lock().await;
        let before = syncs.len();
        syncs.retain(|event_id, slot| {
            let keep =
                bound.contains(event_id) || now.duration_since(slot.last_used) < self.sync_idle;
            if !keep {
                tracing::info!(%event_id, "idle stock sync released");
            }
            keep
        });

        Reaped {
            sessions: expired.len(),
            syncs: before - syncs.len(),
        }
    }

    /// Runs [`AppState::reap_idle`] every `period` until aborted.
    pub fn spawn_reaper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let reaped = state.reap_idle().await;
                if reaped != Reaped::default() {
                    tracing::debug!(
                        sessions = reaped.sessions,
                        syncs = reaped.syncs,
                        "reaped idle state"
                    );
                }
            }
        })
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Number of events with a live stock subscription.
    pub async fn synced_event_count(&self) -> usize {
        self.syncs
            .lock()
            .await
            .values()
            .filter(|s| s.is_running())
            .count()
    }

    /// Tears down every stock subscription.
    pub async fn shutdown(&self) {
        let mut syncs = self.syncs.lock().await;
        tracing::info!(count = syncs.len(), "stopping stock syncs");
        syncs.clear();
    }

    async fn bound_events(&self) -> HashSet<LiveEventId> {
        self.sessions
            .lock()
            .await
            .values()
            .filter_map(|s| s.event_id)
            .collect()
    }
}
