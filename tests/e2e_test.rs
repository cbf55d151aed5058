//! End-to-end test of the notification lifecycle.
//!
//! Drives scheduling, hub upload, the hub's delivery response and an
//! enrollment cancellation through the same components the binary wires up.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cadence_api::{create_router, AdminCredentials, AppState};
use cadence_core::{EnrollmentStatus, NotificationStatus};
use cadence_hub::{ClientConfig, EngineConfig, SyncEngine};
use cadence_testing::TestEnv;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

async fn uploaded_actions(server: &MockServer) -> Vec<Vec<String>> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| {
            let body: Value = request.body_json().unwrap();
            body["updates"]
                .as_array()
                .unwrap()
                .iter()
                .map(|u| u["action"].as_str().unwrap().to_string())
                .collect()
        })
        .collect()
}

#[tokio::test]
async fn notification_lifecycle_round_trips_through_the_hub() -> Result<()> {
    let env = TestEnv::new().await?;
    let hub = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/notification_updates"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&hub)
        .await;

    let engine = SyncEngine::over_http(
        env.storage(),
        env.scheduler().clone(),
        Arc::new(env.clock.clone()),
        ClientConfig { base_url: hub.uri(), ..ClientConfig::default() },
        EngineConfig::default(),
    )?;
    let app = create_router(AppState {
        storage: env.storage(),
        clock: Arc::new(env.clock.clone()),
        credentials: Arc::new(AdminCredentials::new("hub", "hub-secret")),
    });

    let stream = env.stream().name("prenatal").create().await?;
    env.messages_at(&stream, [0, 1, 40]).await?;
    let enrollment = env.enrollment(&stream).create().await?;

    // Two messages fall inside the window today; the third is weeks out.
    let scheduled = engine.run_schedule_cycle().await?;
    assert_eq!(scheduled.created, 2);
    let notifications = env.storage().notifications.list_for_enrollment(enrollment.id).await?;
    assert_eq!(notifications.len(), 2);

    assert_eq!(engine.run_upload_cycle().await?.uploaded, 2);
    assert_eq!(uploaded_actions(&hub).await, vec![vec!["CREATE", "CREATE"]]);

    // The hub reports the first delivery.
    let delivered = &notifications[0];
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/hub/responses")
                .header(header::AUTHORIZATION, format!("Basic {}", STANDARD.encode("hub:hub-secret")))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "notification_id": delivered.id, "status": "DELIVERED" }).to_string(),
                ))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    // Cancelling withdraws only the delivery that is still scheduled.
    let transition =
        env.scheduler().transition(enrollment.id, EnrollmentStatus::Cancelled).await?;
    assert_eq!(transition.cancelled, vec![notifications[1].id]);

    assert_eq!(engine.run_upload_cycle().await?.uploaded, 1);
    assert_eq!(uploaded_actions(&hub).await[1], vec!["CANCEL"]);

    let first = env.reload_notification(delivered).await?;
    let second = env.reload_notification(&notifications[1]).await?;
    assert_eq!(first.status.as_str(), NotificationStatus::DELIVERED);
    assert!(second.is_cancelled());

    // Nothing more is scheduled for a cancelled enrollment, even once the
    // remaining message comes due.
    env.clock.set_today(env.days_from_today(40));
    assert_eq!(engine.run_schedule_cycle().await?.created, 0);
    assert_eq!(env.storage().notification_updates.count_pending().await?, 0);
    Ok(())
}
