//! Concurrent writers against a file-backed, multi-connection database.

use cadence_core::{storage::enrollments::ACTIVE_CONFLICT, EnrollmentStatus, NewNotificationResponse};
use cadence_testing::TestEnv;
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_enqueues_create_each_notification_once() {
    let env = TestEnv::on_file().await.unwrap();
    let stream = env.stream().create().await.unwrap();
    env.messages_at(&stream, [0, 1, 2, 3]).await.unwrap();
    let enrollment = env.enrollment(&stream).create().await.unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let scheduler = env.scheduler().clone();
        let enrollment = enrollment.clone();
        tasks.spawn(async move { scheduler.enqueue_ready_messages(&enrollment).await });
    }

    let mut created = 0;
    while let Some(result) = tasks.join_next().await {
        created += result.unwrap().unwrap().len();
    }

    assert_eq!(created, 4);
    let stored = env.storage().notifications.list_for_enrollment(enrollment.id).await.unwrap();
    assert_eq!(stored.len(), 4);
    assert_eq!(env.storage().notification_updates.count_pending().await.unwrap(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_active_enrollments_admit_exactly_one() {
    let env = TestEnv::on_file().await.unwrap();
    let stream = env.stream().create().await.unwrap();
    let draft = env.enrollment(&stream).phone_number("555-0100").build();

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let storage = env.storage();
        let draft = draft.clone();
        tasks.spawn(async move { storage.enrollments.create(&draft).await });
    }

    let mut accepted = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => accepted += 1,
            Err(err) => {
                let errors = err.validation_errors().unwrap_or_else(|| panic!("unexpected: {err}"));
                assert_eq!(errors.on_base(), [ACTIVE_CONFLICT]);
            },
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(env.storage().enrollments.active().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hub_responses_and_cancellation_interleave() {
    let env = TestEnv::on_file().await.unwrap();
    let stream = env.stream().create().await.unwrap();
    env.messages_at(&stream, [0, 1, 2]).await.unwrap();
    let enrollment = env.enrollment(&stream).create().await.unwrap();
    let notifications = env.scheduler().enqueue_ready_messages(&enrollment).await.unwrap();
    assert_eq!(notifications.len(), 3);

    let mut tasks = JoinSet::new();
    for notification in &notifications {
        let storage = env.storage();
        let response = NewNotificationResponse {
            notification_id: Some(notification.id),
            status: Some("DELIVERED".to_string()),
            ..NewNotificationResponse::default()
        };
        tasks.spawn(async move { storage.notification_responses.create(&response).await.map(drop) });
    }
    let scheduler = env.scheduler().clone();
    let enrollment_id = enrollment.id;
    tasks.spawn(async move {
        scheduler.transition(enrollment_id, EnrollmentStatus::Cancelled).await.map(drop)
    });

    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    // Responses write through whether or not the cascade got there first.
    for notification in &notifications {
        let reloaded = env.reload_notification(notification).await.unwrap();
        assert_eq!(reloaded.status.as_str(), "DELIVERED");
    }
}
