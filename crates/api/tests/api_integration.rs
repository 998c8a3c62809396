//! Integration tests for the API server.

use std::sync::Arc;
use std::time::Duration;

use api::state::{AppState, Reaped};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use backend::{InMemoryOfferBackend, PaymentBackend, StockBackend};
use common::{BuyerId, LiveEventId, Money, OfferId, WorkId};
use domain::{CheckoutIntent, LiveOffer};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tokio::sync::Notify;
use tower::ServiceExt;

use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

/// Payment backend whose intent call never answers.
struct StalledPayment;

#[async_trait]
impl PaymentBackend for StalledPayment {
    async fn create_live_offer_intent(
        &self,
        _buyer: BuyerId,
        _offer_id: OfferId,
    ) -> backend::Result<CheckoutIntent> {
        std::future::pending().await
    }
}

/// Payment backend that answers once `open` is notified.
struct GatedPayment {
    inner: InMemoryOfferBackend,
    open: Arc<Notify>,
}

#[async_trait]
impl PaymentBackend for GatedPayment {
    async fn create_live_offer_intent(
        &self,
        buyer: BuyerId,
        offer_id: OfferId,
    ) -> backend::Result<CheckoutIntent> {
        self.open.notified().await;
        self.inner.create_live_offer_intent(buyer, offer_id).await
    }
}

/// Stock backend whose listing never answers for one event.
struct StalledListing {
    inner: InMemoryOfferBackend,
    stalled: LiveEventId,
}

#[async_trait]
impl StockBackend for StalledListing {
    async fn list_live_offers_for_event(
        &self,
        event_id: LiveEventId,
    ) -> backend::Result<Vec<LiveOffer>> {
        if event_id == self.stalled {
            std::future::pending::<()>().await;
        }
        self.inner.list_live_offers_for_event(event_id).await
    }

    async fn acquire_live_offer_lock(
        &self,
        buyer: BuyerId,
        offer_id: OfferId,
    ) -> backend::Result<bool> {
        self.inner.acquire_live_offer_lock(buyer, offer_id).await
    }

    async fn release_live_offer_lock(
        &self,
        buyer: BuyerId,
        offer_id: OfferId,
    ) -> backend::Result<bool> {
        self.inner.release_live_offer_lock(buyer, offer_id).await
    }
}

struct TestApp {
    app: axum::Router,
    state: Arc<AppState>,
    backend: InMemoryOfferBackend,
    event_id: LiveEventId,
    offers: Vec<LiveOffer>,
}

async fn setup(totals: &[u32]) -> TestApp {
    setup_with(totals, AppState::in_memory).await
}

async fn setup_with(
    totals: &[u32],
    build: impl FnOnce(InMemoryOfferBackend) -> AppState,
) -> TestApp {
    let backend = InMemoryOfferBackend::new();
    let event_id = LiveEventId::new();
    let mut offers = Vec::new();
    for total in totals {
        let offer = LiveOffer::new(event_id, WorkId::new(), *total);
        backend
            .set_work_price(offer.work_id, Money::from_cents(3000))
            .await;
        backend.upsert_offer(offer.clone()).await;
        offers.push(offer);
    }

    let state = Arc::new(build(backend.clone()));
    let app = api::create_app(state.clone(), get_metrics_handle());
    TestApp {
        app,
        state,
        backend,
        event_id,
        offers,
    }
}

/// In-memory stock and feed with a custom payment side.
fn with_payment(payment: Arc<dyn PaymentBackend>) -> impl FnOnce(InMemoryOfferBackend) -> AppState {
    move |backend| {
        let backend = Arc::new(backend);
        AppState::new(backend.clone(), payment, backend)
    }
}

async fn wait_for_locks(backend: &InMemoryOfferBackend, count: usize) {
    for _ in 0..400 {
        if backend.active_lock_count().await == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {count} active locks");
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn open_session(app: &axum::Router) -> String {
    let (status, json) = send(app, "POST", "/sessions", Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    json["session_id"].as_str().unwrap().to_string()
}

async fn purchase(test: &TestApp, session_id: &str, offer: &LiveOffer) -> (StatusCode, Value) {
    send(
        &test.app,
        "POST",
        &format!("/sessions/{session_id}/purchase"),
        Some(json!({
            "event_id": test.event_id.to_string(),
            "offer_id": offer.id.to_string(),
        })),
    )
    .await
}

#[tokio::test]
async fn test_health_check() {
    let test = setup(&[]).await;
    let (status, json) = send(&test.app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["synced_events"], 0);
    assert_eq!(json["open_sessions"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let test = setup(&[]).await;
    let response = test
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_list_event_offers() {
    let test = setup(&[10, 0]).await;
    let uri = format!("/events/{}/offers", test.event_id);
    let (status, json) = send(&test.app, "GET", &uri, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["event_id"], test.event_id.to_string());
    let offers = json["offers"].as_array().unwrap();
    assert_eq!(offers.len(), 2);
    assert_eq!(offers[0]["available"], 10);
    assert_eq!(offers[0]["purchasable"], true);
    assert_eq!(offers[1]["available"], 0);
    assert_eq!(offers[1]["purchasable"], false);

    let (_, health) = send(&test.app, "GET", "/health", None).await;
    assert_eq!(health["synced_events"], 1);
}

#[tokio::test]
async fn test_invalid_event_id_is_bad_request() {
    let test = setup(&[]).await;
    let (status, json) = send(&test.app, "GET", "/events/not-a-uuid/offers", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("event_id"));
}

#[tokio::test]
async fn test_purchase_then_succeed() {
    let test = setup(&[3]).await;
    let session_id = open_session(&test.app).await;

    let (status, json) = purchase(&test, &session_id, &test.offers[0]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "Collecting");
    assert_eq!(json["offer_id"], test.offers[0].id.to_string());
    assert_eq!(json["amount_cents"], 3000);
    assert!(json["client_secret"].as_str().unwrap().contains("_secret_"));
    assert_eq!(test.backend.active_lock_count().await, 1);

    let (status, json) = send(
        &test.app,
        "POST",
        &format!("/sessions/{session_id}/succeed"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "Succeeded");
    assert_eq!(json["outcome"], "Succeeded");
    assert!(json["client_secret"].is_null());
}

#[tokio::test]
async fn test_denied_lock_is_conflict() {
    let test = setup(&[1]).await;
    let session_id = open_session(&test.app).await;

    // Warm the stock view, then make the lock call fail.
    let uri = format!("/events/{}/offers", test.event_id);
    send(&test.app, "GET", &uri, None).await;
    test.backend.set_fail_on_lock(true).await;

    let (status, json) = purchase(&test, &session_id, &test.offers[0]).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "Stock could not be secured");
    assert_eq!(test.backend.intent_count().await, 0);

    let (_, json) = send(&test.app, "GET", &format!("/sessions/{session_id}"), None).await;
    assert_eq!(json["state"], "Idle");
    assert_eq!(json["outcome"], "Denied");
}

#[tokio::test]
async fn test_intent_failure_is_bad_gateway_and_releases_lock() {
    let test = setup(&[2]).await;
    test.backend.set_fail_on_intent(true).await;
    let session_id = open_session(&test.app).await;

    let (status, json) = purchase(&test, &session_id, &test.offers[0]).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(json["error"].as_str().unwrap().starts_with("Checkout could not be started"));
    assert_eq!(test.backend.active_lock_count().await, 0);

    let (_, json) = send(&test.app, "GET", &format!("/sessions/{session_id}"), None).await;
    assert_eq!(json["state"], "Idle");
    assert_eq!(json["outcome"], "Failed");
}

#[tokio::test]
async fn test_second_purchase_while_collecting_is_conflict() {
    let test = setup(&[5]).await;
    let session_id = open_session(&test.app).await;

    let (status, _) = purchase(&test, &session_id, &test.offers[0]).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = purchase(&test, &session_id, &test.offers[0]).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(test.backend.intent_count().await, 1);
}

#[tokio::test]
async fn test_cancel_releases_lock() {
    let test = setup(&[1]).await;
    let session_id = open_session(&test.app).await;
    purchase(&test, &session_id, &test.offers[0]).await;

    let (status, json) = send(
        &test.app,
        "POST",
        &format!("/sessions/{session_id}/cancel"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "Idle");
    assert_eq!(json["outcome"], "Cancelled");
    assert!(json["client_secret"].is_null());
    assert_eq!(test.backend.active_lock_count().await, 0);
    assert_eq!(
        test.backend.offer(test.offers[0].id).await.unwrap().available(),
        1
    );
}

#[tokio::test]
async fn test_payment_failure_message_is_verbatim() {
    let test = setup(&[1]).await;
    let session_id = open_session(&test.app).await;
    purchase(&test, &session_id, &test.offers[0]).await;

    let (status, json) = send(
        &test.app,
        "POST",
        &format!("/sessions/{session_id}/fail"),
        Some(json!({ "message": "Your card was declined." })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "Idle");
    assert_eq!(json["message"], "Your card was declined.");
    assert_eq!(test.backend.active_lock_count().await, 0);
}

#[tokio::test]
async fn test_unknown_session_and_offer() {
    let test = setup(&[1]).await;
    let fake_id = uuid::Uuid::new_v4();
    let (status, _) = send(&test.app, "GET", &format!("/sessions/{fake_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let session_id = open_session(&test.app).await;
    let stranger = LiveOffer::new(test.event_id, WorkId::new(), 1);
    let (status, json) = purchase(&test, &session_id, &stranger).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("Offer not found"));
}

#[tokio::test]
async fn test_create_session_with_buyer_id() {
    let test = setup(&[]).await;
    let buyer = uuid::Uuid::new_v4().to_string();
    let (status, json) = send(
        &test.app,
        "POST",
        "/sessions",
        Some(json!({ "buyer_id": buyer })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["buyer_id"], buyer);

    let (status, _) = send(
        &test.app,
        "POST",
        "/sessions",
        Some(json!({ "buyer_id": "nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_database_without_payment_function_is_rejected() {
    let config = api::config::Config {
        database_url: Some("postgres://localhost/offers".to_string()),
        ..api::config::Config::default()
    };

    let result = api::create_state(&config).await;
    assert!(matches!(result, Err(api::StartupError::MissingPaymentBackend)));
}

#[tokio::test]
async fn test_default_config_runs_in_memory() {
    let state = api::create_state(&api::config::Config::default())
        .await
        .unwrap();
    let app = api::create_app(state, get_metrics_handle());

    let (status, json) = send(&app, "GET", &format!("/events/{}/offers", LiveEventId::new()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["offers"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_answers_while_intent_call_is_stalled() {
    let test = setup_with(&[1], with_payment(Arc::new(StalledPayment))).await;
    let session_id = open_session(&test.app).await;
    let session_uri = format!("/sessions/{session_id}");

    let in_flight = tokio::spawn({
        let app = test.app.clone();
        let uri = format!("{session_uri}/purchase");
        let body = json!({
            "event_id": test.event_id.to_string(),
            "offer_id": test.offers[0].id.to_string(),
        });
        async move { send(&app, "POST", &uri, Some(body)).await }
    });
    wait_for_locks(&test.backend, 1).await;

    let (status, json) = tokio::time::timeout(
        Duration::from_secs(2),
        send(&test.app, "GET", &session_uri, None),
    )
    .await
    .expect("snapshot must not wait on the purchase");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "Reserving");

    let (status, json) = tokio::time::timeout(
        Duration::from_secs(2),
        send(&test.app, "POST", &format!("{session_uri}/cancel"), None),
    )
    .await
    .expect("cancel must not wait on the purchase");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "Idle");
    assert_eq!(json["outcome"], "Cancelled");
    // Released by the cancel, or by the attempt if the grant landed after it.
    wait_for_locks(&test.backend, 0).await;
    assert_eq!(
        test.backend.offer(test.offers[0].id).await.unwrap().available(),
        1
    );

    in_flight.abort();
}

#[tokio::test]
async fn test_purchase_settles_after_client_disconnects() {
    let open = Arc::new(Notify::new());
    let test = setup_with(&[2], {
        let open = open.clone();
        move |backend| {
            let payment = Arc::new(GatedPayment {
                inner: backend.clone(),
                open,
            });
            let backend = Arc::new(backend);
            AppState::new(backend.clone(), payment, backend)
        }
    })
    .await;
    let session_id = open_session(&test.app).await;

    let in_flight = tokio::spawn({
        let app = test.app.clone();
        let uri = format!("/sessions/{session_id}/purchase");
        let body = json!({
            "event_id": test.event_id.to_string(),
            "offer_id": test.offers[0].id.to_string(),
        });
        async move { send(&app, "POST", &uri, Some(body)).await }
    });
    wait_for_locks(&test.backend, 1).await;

    // The client gives up; the attempt still runs to the payment step.
    in_flight.abort();
    open.notify_one();

    let mut state = Value::Null;
    for _ in 0..400 {
        let (_, json) = send(&test.app, "GET", &format!("/sessions/{session_id}"), None).await;
        state = json["state"].clone();
        if state == "Collecting" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(state, "Collecting");
}

#[tokio::test]
async fn test_close_session_releases_lock_and_sync() {
    let test = setup(&[1]).await;
    let session_id = open_session(&test.app).await;
    let (status, _) = purchase(&test, &session_id, &test.offers[0]).await;
    assert_eq!(status, StatusCode::OK);

    let uri = format!("/sessions/{session_id}");
    let (status, _) = send(&test.app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(test.backend.active_lock_count().await, 0);

    let (status, _) = send(&test.app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&test.app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, health) = send(&test.app, "GET", "/health", None).await;
    assert_eq!(health["open_sessions"], 0);
    assert_eq!(health["synced_events"], 0);
}

#[tokio::test]
async fn test_sync_outlives_all_but_the_last_session() {
    let test = setup(&[5]).await;
    let first = open_session(&test.app).await;
    let second = open_session(&test.app).await;
    purchase(&test, &first, &test.offers[0]).await;
    purchase(&test, &second, &test.offers[0]).await;

    send(&test.app, "DELETE", &format!("/sessions/{first}"), None).await;
    let (_, health) = send(&test.app, "GET", "/health", None).await;
    assert_eq!(health["open_sessions"], 1);
    assert_eq!(health["synced_events"], 1);

    send(&test.app, "DELETE", &format!("/sessions/{second}"), None).await;
    let (_, health) = send(&test.app, "GET", "/health", None).await;
    assert_eq!(health["synced_events"], 0);
    assert_eq!(test.backend.active_lock_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_idle_sessions_and_syncs_are_reaped() {
    let test = setup_with(&[3], |backend| {
        AppState::in_memory(backend)
            .with_idle_limits(Duration::from_secs(60), Duration::from_secs(30))
    })
    .await;

    // A viewer with no session keeps the sync only while it keeps reading.
    send(&test.app, "GET", &format!("/events/{}/offers", test.event_id), None).await;
    let idle = open_session(&test.app).await;
    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(
        test.state.reap_idle().await,
        Reaped {
            sessions: 0,
            syncs: 1
        }
    );

    // A session bound by a purchase keeps its event synced until it expires.
    let buyer = open_session(&test.app).await;
    let (status, _) = purchase(&test, &buyer, &test.offers[0]).await;
    assert_eq!(status, StatusCode::OK);
    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(
        test.state.reap_idle().await,
        Reaped {
            sessions: 1,
            syncs: 0
        }
    );
    assert!(test.state.session(idle.parse().unwrap()).await.is_none());
    assert_eq!(test.state.synced_event_count().await, 1);

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(
        test.state.reap_idle().await,
        Reaped {
            sessions: 1,
            syncs: 1
        }
    );
    assert_eq!(test.state.session_count().await, 0);
    assert_eq!(test.backend.active_lock_count().await, 0);
}

#[tokio::test]
async fn test_slow_listing_does_not_block_other_events() {
    let stalled = LiveEventId::new();
    let test = setup_with(&[4], move |backend| {
        let seeded = Arc::new(backend.clone());
        let stock = Arc::new(StalledListing {
            inner: backend,
            stalled,
        });
        AppState::new(stock, seeded.clone(), seeded)
    })
    .await;

    let in_flight = tokio::spawn({
        let app = test.app.clone();
        async move { send(&app, "GET", &format!("/events/{stalled}/offers"), None).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let uri = format!("/events/{}/offers", test.event_id);
    let (status, json) = tokio::time::timeout(
        Duration::from_secs(2),
        send(&test.app, "GET", &uri, None),
    )
    .await
    .expect("listing for another event must not wait on the stalled one");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["offers"].as_array().unwrap().len(), 1);

    let (_, health) = tokio::time::timeout(
        Duration::from_secs(2),
        send(&test.app, "GET", "/health", None),
    )
    .await
    .expect("health must not wait on the stalled listing");
    assert_eq!(health["synced_events"], 1);

    in_flight.abort();
}

#[test]
fn test_cancelled_attempt_maps_to_conflict() {
    let response = api::error::ApiError::from(checkout::CheckoutError::Cancelled);
    let response = axum::response::IntoResponse::into_response(response);
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
