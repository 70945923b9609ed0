//! Shared fixtures for the HTTP integration tests
//!
//! Full router over the in-memory store and a manual clock.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use crab_subscription::api::create_router;
use crab_subscription::api::identity::{ACTOR_ID_HEADER, ADMIN_ID_HEADER, RESTAURANT_ID_HEADER};
use crab_subscription::clock::ManualClock;
use crab_subscription::db::MemorySubscriptionStore;
use crab_subscription::reconciler::ReconcilerSettings;
use crab_subscription::service::ServiceSettings;
use crab_subscription::sinks::{EventSink, MemorySink};
use crab_subscription::state::AppState;
use http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const T0: i64 = 1_760_000_000_000;
pub const ADMIN: &str = "admin-1";
pub const DAY: i64 = shared::DAY_MS;

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub store: MemorySubscriptionStore,
    pub clock: ManualClock,
    pub sink: MemorySink,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_settings(ServiceSettings::default())
    }

    pub fn with_settings(service_settings: ServiceSettings) -> Self {
        let store = MemorySubscriptionStore::new();
        let clock = ManualClock::new(T0);
        let sink = MemorySink::new();
        let reconciler_settings = ReconcilerSettings {
            concurrency: 4,
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(4),
            ..Default::default()
        };
        let sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(sink.clone())];
        let state = AppState::build(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            service_settings,
            reconciler_settings,
            sinks,
            CancellationToken::new(),
        );
        let router = create_router(state.clone());
        Self {
            state,
            router,
            store,
            clock,
            sink,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response is JSON")
        };
        (status, body)
    }

    /// Onboard a restaurant through the internal endpoint
    pub async fn onboard(&self, restaurant_id: i64) -> Value {
        let (status, body) = self
            .send(post_json(
                &format!("/api/internal/restaurants/{restaurant_id}/subscription"),
                Value::Null,
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "onboard failed: {body}");
        body["data"].clone()
    }

    pub async fn owner_get(&self, restaurant_id: i64, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::get(uri)
                .header(RESTAURANT_ID_HEADER, restaurant_id.to_string())
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
    }

    pub async fn owner_post(&self, restaurant_id: i64, uri: &str, body: Value) -> (StatusCode, Value) {
        let mut request = post_json(uri, body);
        request.headers_mut().insert(
            RESTAURANT_ID_HEADER,
            restaurant_id.to_string().parse().expect("valid header"),
        );
        request
            .headers_mut()
            .insert(ACTOR_ID_HEADER, "owner-7".parse().expect("valid header"));
        self.send(request).await
    }

    pub async fn admin_get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::get(uri)
                .header(ADMIN_ID_HEADER, ADMIN)
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
    }

    pub async fn admin_post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let mut request = post_json(uri, body);
        request
            .headers_mut()
            .insert(ADMIN_ID_HEADER, ADMIN.parse().expect("valid header"));
        self.send(request).await
    }
}

/// JSON POST; `Value::Null` sends no body and no content type
pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    if body.is_null() {
        return Request::post(uri).body(Body::empty()).expect("request builds");
    }
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

pub fn admin_path(restaurant_id: i64, action: &str) -> String {
    if action.is_empty() {
        format!("/api/admin/restaurants/{restaurant_id}/subscription")
    } else {
        format!("/api/admin/restaurants/{restaurant_id}/subscription/{action}")
    }
}
