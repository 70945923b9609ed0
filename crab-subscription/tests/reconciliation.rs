//! Reconciliation endpoint: deadline sweeps, run history, failure retry

mod common;

use common::{DAY, TestApp, admin_path};
use crab_subscription::clock::Clock;
use crab_subscription::db::{RunLease, RunTrigger, SubscriptionStore};
use http::StatusCode;
use serde_json::json;

async fn trial(app: &TestApp, restaurant_id: i64) -> i64 {
    let data = app.onboard(restaurant_id).await;
    app.owner_post(restaurant_id, "/api/subscription/start-trial", json!(null))
        .await;
    data["id"].as_i64().unwrap()
}

#[tokio::test]
async fn test_manual_run_expires_trials() {
    let app = TestApp::new();
    trial(&app, 1).await;
    trial(&app, 2).await;
    app.onboard(3).await;

    app.clock.advance(14 * DAY);
    let (status, body) = app
        .admin_post("/api/admin/reconciliation/run", json!(null))
        .await;
    assert_eq!(status, StatusCode::OK);
    let run = &body["data"];
    assert_eq!(run["outcome"], "completed");
    assert_eq!(run["trigger"], "manual");
    assert_eq!(run["status"], "completed");
    assert_eq!(run["transitioned"], 2);
    assert_eq!(run["failed"], 0);

    for restaurant_id in [1, 2] {
        let (_, body) = app.owner_get(restaurant_id, "/api/subscription").await;
        assert_eq!(body["data"]["status"], "EXPIRED");
    }
    let (_, body) = app.owner_get(3, "/api/subscription").await;
    assert_eq!(body["data"]["status"], "NEW");
}

#[tokio::test]
async fn test_second_run_changes_nothing() {
    let app = TestApp::new();
    trial(&app, 1).await;
    app.clock.advance(15 * DAY);

    app.admin_post("/api/admin/reconciliation/run", json!(null))
        .await;
    let events_after_first = app.store.event_count();

    let (_, body) = app
        .admin_post("/api/admin/reconciliation/run", json!(null))
        .await;
    assert_eq!(body["data"]["transitioned"], 0);
    assert_eq!(app.store.event_count(), events_after_first);
}

#[tokio::test]
async fn test_active_lapses_through_grace() {
    let app = TestApp::new();
    app.onboard(1).await;
    app.admin_post(&admin_path(1, "grant"), json!({ "days": 30 }))
        .await;

    app.clock.advance(30 * DAY + 1000);
    app.admin_post("/api/admin/reconciliation/run", json!(null))
        .await;
    let (_, body) = app.owner_get(1, "/api/subscription").await;
    assert_eq!(body["data"]["status"], "GRACE");
    assert_eq!(body["data"]["grace_days_remaining"], 7);

    app.clock.advance(7 * DAY);
    app.admin_post("/api/admin/reconciliation/run", json!(null))
        .await;
    let (_, body) = app.owner_get(1, "/api/subscription").await;
    assert_eq!(body["data"]["status"], "EXPIRED");
}

#[tokio::test]
async fn test_overlapping_run_is_skipped() {
    let app = TestApp::new();
    let held = app
        .store
        .begin_run(42, RunTrigger::Scheduled, app.clock.now_millis(), 60 * 60 * 1000)
        .await
        .unwrap();
    assert!(matches!(held, RunLease::Acquired(_)));

    let (status, body) = app
        .admin_post("/api/admin/reconciliation/run", json!(null))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "skipped");
    assert_eq!(body["data"]["active_run_id"], 42);
}

#[tokio::test]
async fn test_failed_tick_is_recorded_and_retried() {
    let app = TestApp::new();
    let broken = trial(&app, 1).await;
    trial(&app, 2).await;
    app.clock.advance(14 * DAY);

    // Outlasts every attempt of the first run
    app.store.fail_commits(broken, 10);
    let (_, body) = app
        .admin_post("/api/admin/reconciliation/run", json!(null))
        .await;
    assert_eq!(body["data"]["failed"], 1);
    assert_eq!(body["data"]["transitioned"], 1);

    let failed = app.store.list_failed().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].subscription_id, broken);

    app.store.fail_commits(broken, 0);
    let (_, body) = app
        .admin_post("/api/admin/reconciliation/run", json!(null))
        .await;
    assert_eq!(body["data"]["failed"], 0);
    assert_eq!(body["data"]["transitioned"], 1);
    assert!(app.store.list_failed().await.unwrap().is_empty());

    let (_, body) = app.owner_get(1, "/api/subscription").await;
    assert_eq!(body["data"]["status"], "EXPIRED");
}

#[tokio::test]
async fn test_run_history_is_listed() {
    let app = TestApp::new();
    trial(&app, 1).await;
    app.admin_post("/api/admin/reconciliation/run", json!(null))
        .await;
    app.clock.advance(DAY);
    app.admin_post("/api/admin/reconciliation/run", json!(null))
        .await;

    let (status, body) = app
        .admin_get("/api/admin/reconciliation/runs?limit=10")
        .await;
    assert_eq!(status, StatusCode::OK);
    let runs = body["data"].as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r["status"] == "completed"));
}

#[tokio::test]
async fn test_reconciliation_requires_admin() {
    let app = TestApp::new();
    let (status, _) = app
        .send(common::post_json("/api/admin/reconciliation/run", json!(null)))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
