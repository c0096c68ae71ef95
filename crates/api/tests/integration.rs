//! Integration tests for API routes.
//!
//! Uses `tower::ServiceExt` to test Axum routes without a real HTTP server,
//! against the in-memory store and a recording confirmation sender.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tower::ServiceExt;
use uuid::Uuid;

use herald_api::middleware::auth::Claims;
use herald_api::routes::create_router;
use herald_api::state::AppState;
use herald_common::config::{AppConfig, StoreBackend};
use herald_common::types::{NotificationRecord, record_id_for};
use herald_engine::store::{MarkOpened, MemoryNotificationStore, NotificationStore, StoreError};
use herald_notifier::{CallbackError, ConfirmationSender, OpenConfirmation};

// ============================================================
// Helpers
// ============================================================

const DISPATCH_KEY: &str = "test-dispatch-key";

fn test_config() -> AppConfig {
    AppConfig {
        store_backend: StoreBackend::Memory,
        database_url: None,
        db_max_connections: 5,
        jwt_secret: "test-jwt-secret-for-integration-tests".to_string(),
        api_port: 0,
        dispatch_api_key: Some(DISPATCH_KEY.to_string()),
        callback_timeout_ms: 1000,
        sse_keepalive_secs: 15,
        push_queue_capacity: 16,
        log_json: false,
    }
}

#[derive(Default)]
struct RecordingSender {
    calls: Mutex<Vec<(String, OpenConfirmation)>>,
}

#[async_trait]
impl ConfirmationSender for RecordingSender {
    async fn send(&self, url: &str, confirmation: &OpenConfirmation) -> Result<(), CallbackError> {
        self.calls
            .lock()
            .push((url.to_string(), confirmation.clone()));
        Ok(())
    }
}

/// Memory store whose `list_pending` parks until released, so a dispatch can
/// land while a stream is connecting.
#[derive(Default)]
struct GatedStore {
    inner: MemoryNotificationStore,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl NotificationStore for GatedStore {
    async fn create(&self, record: NotificationRecord) -> Result<NotificationRecord, StoreError> {
        self.inner.create(record).await
    }

    async fn find_by_recipient_and_id(
        &self,
        recipient_identity: &str,
        record_id: Uuid,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        self.inner
            .find_by_recipient_and_id(recipient_identity, record_id)
            .await
    }

    async fn list_pending(
        &self,
        recipient_identity: &str,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.list_pending(recipient_identity).await
    }

    async fn list_all(
        &self,
        recipient_identity: &str,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        self.inner.list_all(recipient_identity).await
    }

    async fn mark_opened(
        &self,
        recipient_identity: &str,
        record_id: Uuid,
    ) -> Result<MarkOpened, StoreError> {
        self.inner.mark_opened(recipient_identity, record_id).await
    }
}

fn build_app_with_store(
    store: Arc<dyn NotificationStore>,
) -> (Router, AppState, Arc<RecordingSender>) {
    let sender = Arc::new(RecordingSender::default());
    let state = AppState::new(store, sender.clone(), test_config());
    (create_router(state.clone()), state, sender)
}

fn build_test_app() -> (Router, AppState, Arc<RecordingSender>) {
    build_app_with_store(Arc::new(MemoryNotificationStore::new()))
}

fn token_for(identity: &str) -> String {
    let now = chrono::Utc::now();
    let claims = Claims {
        sub: identity.to_string(),
        exp: (now + chrono::Duration::hours(1)).timestamp(),
        iat: now.timestamp(),
        name: None,
        external_id: None,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(test_config().jwt_secret.as_bytes()),
    )
    .unwrap()
}

fn batch_for(source: &str, identity: &str) -> serde_json::Value {
    serde_json::json!({
        "source_notification_id": source,
        "title": "T",
        "content": "C",
        "targets": [{ "identity": identity }]
    })
}

async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn dispatch(app: &Router, batch: serde_json::Value) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/notifications/dispatch")
                .header("x-api-key", DISPATCH_KEY)
                .header("content-type", "application/json")
                .body(Body::from(batch.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get_as(app: &Router, uri: &str, identity: &str) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header("authorization", format!("Bearer {}", token_for(identity)))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn mark_opened(app: &Router, identity: &str, record_id: &str) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/notifications/opened")
                .header("authorization", format!("Bearer {}", token_for(identity)))
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({ "record_id": record_id }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap()
}

fn release_batch() -> serde_json::Value {
    serde_json::json!({
        "source_notification_id": "rel-1",
        "title": "T",
        "content": "C",
        "targets": [{ "identity": "a@x" }, { "identity": "b@x" }]
    })
}

/// Next SSE frame as text, with a timeout so a broken stream fails the test.
async fn next_frame(stream: &mut axum::body::BodyDataStream) -> Option<String> {
    tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("timed out waiting for SSE frame")
        .map(|chunk| String::from_utf8(chunk.unwrap().to_vec()).unwrap())
}

// ============================================================
// Routes
// ============================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _, _) = build_test_app();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "herald-api");
    assert_eq!(json["connections"], 0);
}

#[tokio::test]
async fn test_dispatch_offline_then_list() {
    let (app, _, _) = build_test_app();

    let response = dispatch(&app, release_batch()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["total"], 2);
    assert_eq!(report["delivered"].as_array().unwrap().len(), 0);
    let stored = report["stored_or_failed"].as_array().unwrap();
    assert_eq!(stored[0]["identity"], "a@x");
    assert_eq!(stored[0]["reason"], "stored");
    assert_eq!(stored[1]["identity"], "b@x");
    assert_eq!(stored[1]["reason"], "stored");

    for identity in ["a@x", "b@x"] {
        let response = get_as(&app, "/api/notifications", identity).await;
        assert_eq!(response.status(), StatusCode::OK);
        let list = body_json(response).await;
        assert_eq!(list["total"], 1);
        assert_eq!(list["unread"], 1);
        let notification = &list["notifications"][0];
        assert_eq!(notification["opened"], false);
        assert_eq!(notification["severity"], "warning");
        assert_eq!(notification["metadata"]["recipient_identity"], identity);
    }
}

#[tokio::test]
async fn test_dispatch_validation_errors() {
    let (app, state, _) = build_test_app();

    let response = dispatch(
        &app,
        serde_json::json!({ "source_notification_id": "rel-1", "title": "T", "content": "C", "targets": [] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = dispatch(
        &app,
        serde_json::json!({ "source_notification_id": "rel-1", "content": "C", "targets": [{ "identity": "a@x" }] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("title"));

    let pending = state.store.list_all("a@x").await.unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn test_dispatch_requires_api_key() {
    let (app, _, _) = build_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/notifications/dispatch")
                .header("content-type", "application/json")
                .body(Body::from(release_batch().to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_scoped_routes_require_auth() {
    let (app, _, _) = build_test_app();

    for uri in ["/api/notifications", "/api/notifications/stream"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/notifications")
                .header("authorization", "Bearer invalid.jwt.token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_get_single_notification_is_scoped() {
    let (app, _, _) = build_test_app();
    dispatch(&app, release_batch()).await;
    let record_id = record_id_for("rel-1", "a@x").to_string();

    let response = get_as(&app, &format!("/api/notifications/{}", record_id), "a@x").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["id"], record_id);
    assert_eq!(json["title"], "T");

    let response = get_as(&app, &format!("/api/notifications/{}", record_id), "b@x").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get_as(&app, "/api/notifications/not-a-record", "a@x").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mark_opened_twice_fires_one_callback() {
    let (app, _, sender) = build_test_app();
    let mut batch = release_batch();
    batch["tracking"] = serde_json::json!({ "enabled": true, "callback_url": "http://origin/opened" });
    batch["targets"] = serde_json::json!([{ "identity": "a@x", "display_name": "Ada" }]);
    dispatch(&app, batch).await;
    let record_id = record_id_for("rel-1", "a@x").to_string();

    let response = mark_opened(&app, "a@x", &record_id).await;
    assert_eq!(response.status(), StatusCode::OK);
    let first = body_json(response).await;
    assert_eq!(first["was_already_opened"], false);
    assert_eq!(first["notification"]["opened"], true);
    assert_eq!(first["notification"]["read"], true);

    let response = mark_opened(&app, "a@x", &record_id).await;
    let second = body_json(response).await;
    assert_eq!(second["was_already_opened"], true);
    assert_eq!(
        second["notification"]["opened_at"],
        first["notification"]["opened_at"]
    );

    // The confirmation runs detached; give it a moment to land.
    for _ in 0..50 {
        if !sender.calls.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    {
        let calls = sender.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "http://origin/opened");
        assert_eq!(calls[0].1.recipient_display_name.as_deref(), Some("Ada"));
    }

    let list = body_json(get_as(&app, "/api/notifications", "a@x").await).await;
    assert_eq!(list["unread"], 0);
}

#[tokio::test]
async fn test_mark_opened_unknown_record() {
    let (app, _, _) = build_test_app();

    let response = mark_opened(&app, "a@x", &uuid::Uuid::new_v4().to_string()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = mark_opened(&app, "a@x", "garbage").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================
// Push stream
// ============================================================

#[tokio::test]
async fn test_stream_replays_pending_newest_first_then_goes_live() {
    let (app, state, _) = build_test_app();

    for source in ["older", "newer"] {
        let mut batch = release_batch();
        batch["source_notification_id"] = serde_json::json!(source);
        dispatch(&app, batch).await;
    }
    // Opened records are not replayed.
    let mut opened = release_batch();
    opened["source_notification_id"] = serde_json::json!("seen");
    dispatch(&app, opened).await;
    mark_opened(&app, "a@x", &record_id_for("seen", "a@x").to_string()).await;

    let response = get_as(&app, "/api/notifications/stream", "a@x").await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut stream = response.into_body().into_data_stream();

    let handshake = next_frame(&mut stream).await.unwrap();
    assert!(handshake.contains("event: connected"));
    assert!(handshake.contains("a@x"));

    let first = next_frame(&mut stream).await.unwrap();
    assert!(first.contains("event: notification"));
    assert!(first.contains("\"source_notification_id\":\"newer\""));
    let second = next_frame(&mut stream).await.unwrap();
    assert!(second.contains("\"source_notification_id\":\"older\""));

    assert_eq!(state.registry.len(), 1);

    let mut live = release_batch();
    live["source_notification_id"] = serde_json::json!("live");
    let report = body_json(dispatch(&app, live).await).await;
    assert_eq!(report["delivered"][0]["identity"], "a@x");
    assert_eq!(report["stored_or_failed"][0]["identity"], "b@x");

    let pushed = next_frame(&mut stream).await.unwrap();
    assert!(pushed.contains("\"source_notification_id\":\"live\""));

    drop(stream);
    assert_eq!(state.registry.len(), 0);
}

#[tokio::test]
async fn test_dispatch_during_replay_is_sent_once_after_backlog() {
    let store = Arc::new(GatedStore::default());
    let (app, _, _) = build_app_with_store(store.clone());

    dispatch(&app, batch_for("older", "a@x")).await;

    let connecting = tokio::spawn({
        let app = app.clone();
        async move { get_as(&app, "/api/notifications/stream", "a@x").await }
    });
    store.entered.notified().await;

    // The channel is registered but the replay query has not run yet.
    let report = body_json(dispatch(&app, batch_for("racing", "a@x")).await).await;
    assert_eq!(report["delivered"][0]["identity"], "a@x");

    store.release.notify_one();
    let response = connecting.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut stream = response.into_body().into_data_stream();

    assert!(next_frame(&mut stream).await.unwrap().contains("event: connected"));
    let first = next_frame(&mut stream).await.unwrap();
    assert!(first.contains("\"source_notification_id\":\"racing\""));
    let second = next_frame(&mut stream).await.unwrap();
    assert!(second.contains("\"source_notification_id\":\"older\""));

    // The queued copy of "racing" is skipped; the next frame is new.
    dispatch(&app, batch_for("after", "a@x")).await;
    let third = next_frame(&mut stream).await.unwrap();
    assert!(third.contains("\"source_notification_id\":\"after\""));
}

#[tokio::test]
async fn test_second_connection_supersedes_first() {
    let (app, state, _) = build_test_app();

    let first = get_as(&app, "/api/notifications/stream", "a@x").await;
    let mut first = first.into_body().into_data_stream();
    assert!(
        next_frame(&mut first)
            .await
            .unwrap()
            .contains("event: connected")
    );

    let second = get_as(&app, "/api/notifications/stream", "a@x").await;
    let mut second = second.into_body().into_data_stream();
    assert!(
        next_frame(&mut second)
            .await
            .unwrap()
            .contains("event: connected")
    );

    let superseded = next_frame(&mut first).await.unwrap();
    assert!(superseded.contains("event: superseded"));
    assert!(superseded.contains("retry: 3600000"));
    assert!(next_frame(&mut first).await.is_none());
    drop(first);

    // The newer connection still receives live notifications.
    assert_eq!(state.registry.len(), 1);
    let report = body_json(dispatch(&app, release_batch()).await).await;
    assert_eq!(report["delivered"][0]["identity"], "a@x");
    let pushed = next_frame(&mut second).await.unwrap();
    assert!(pushed.contains("event: notification"));
}

#[tokio::test]
async fn test_stream_ends_on_shutdown() {
    let (app, state, _) = build_test_app();

    let response = get_as(&app, "/api/notifications/stream", "a@x").await;
    let mut stream = response.into_body().into_data_stream();
    next_frame(&mut stream).await.unwrap();

    state.shutdown.cancel();
    assert!(next_frame(&mut stream).await.is_none());
}
