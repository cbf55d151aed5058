//! Integration tests for the outbound update queue and inbound responses.

use cadence_core::{
    NewNotificationResponse, NewNotificationUpdate, NotificationId, NotificationStatus,
    NotificationUpdateId, UpdateAction,
};
use cadence_testing::TestEnv;
use chrono::{TimeZone, Utc};

#[tokio::test]
async fn delivered_response_writes_through() {
    let env = TestEnv::new().await.unwrap();
    let stream = env.stream().create().await.unwrap();
    let message = env.message(&stream).create().await.unwrap();
    let enrollment = env.enrollment(&stream).create().await.unwrap();
    let notification =
        env.notification(&enrollment, &message, NotificationStatus::ACTIVE).await.unwrap();
    let delivered_at = Utc.with_ymd_and_hms(2024, 6, 15, 14, 30, 0).unwrap();

    let response = env
        .storage()
        .notification_responses
        .create(&NewNotificationResponse {
            notification_id: Some(notification.id),
            status: Some("DELIVERED".to_string()),
            delivered_at: Some(delivered_at),
            ..NewNotificationResponse::default()
        })
        .await
        .unwrap();

    assert_eq!(response.status.as_str(), "DELIVERED");
    let reloaded = env.reload_notification(&notification).await.unwrap();
    assert_eq!(reloaded.status.as_str(), NotificationStatus::DELIVERED);
    assert_eq!(reloaded.delivered_at, Some(delivered_at));
}

#[tokio::test]
async fn unfamiliar_status_is_accepted_and_written_through() {
    let env = TestEnv::new().await.unwrap();
    let stream = env.stream().create().await.unwrap();
    let message = env.message(&stream).create().await.unwrap();
    let enrollment = env.enrollment(&stream).create().await.unwrap();
    let notification =
        env.notification(&enrollment, &message, NotificationStatus::ACTIVE).await.unwrap();

    env.storage()
        .notification_responses
        .create(&NewNotificationResponse {
            notification_id: Some(notification.id),
            status: Some("EARTH_NOT_FOUND".to_string()),
            error_type: Some("routing".to_string()),
            error_msg: Some("no such planet".to_string()),
            ..NewNotificationResponse::default()
        })
        .await
        .unwrap();

    let reloaded = env.reload_notification(&notification).await.unwrap();
    assert_eq!(reloaded.status.as_str(), "EARTH_NOT_FOUND");
    assert_eq!(reloaded.delivered_at, None);

    // Hub-originated changes are not echoed back to the hub.
    let updates =
        env.storage().notification_updates.for_notification(notification.id).await.unwrap();
    assert_eq!(updates.len(), 1);

    let responses =
        env.storage().notification_responses.for_notification(notification.id).await.unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].error_msg.as_deref(), Some("no such planet"));
}

#[tokio::test]
async fn response_validation_reports_missing_and_unknown_notification() {
    let env = TestEnv::new().await.unwrap();
    let storage = env.storage();
    let responses = &storage.notification_responses;

    let err = responses.create(&NewNotificationResponse::default()).await.unwrap_err();
    let errors = err.validation_errors().unwrap();
    assert!(errors.has("status"));
    assert!(errors.has("notification"));

    let err = responses
        .create(&NewNotificationResponse {
            notification_id: Some(NotificationId(404)),
            status: Some("DELIVERED".to_string()),
            ..NewNotificationResponse::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.validation_errors().unwrap().on("notification"), ["does not exist"]);
}

#[tokio::test]
async fn pending_returns_exactly_the_unuploaded_updates() {
    let env = TestEnv::new().await.unwrap();
    let stream = env.stream().create().await.unwrap();
    env.messages_at(&stream, [0, 1, 2, 3]).await.unwrap();
    let enrollment = env.enrollment(&stream).create().await.unwrap();
    env.scheduler().enqueue_ready_messages(&enrollment).await.unwrap();

    let storage = env.storage();
    let updates = &storage.notification_updates;
    let all = updates.pending(None).await.unwrap();
    assert_eq!(all.len(), 4);

    let accepted: Vec<_> = all.iter().take(2).map(|u| u.id).collect();
    let changed = updates.mark_uploaded(&accepted, env.now(), 201).await.unwrap();
    assert_eq!(changed, 2);

    let pending = updates.pending(None).await.unwrap();
    let pending_ids: Vec<_> = pending.iter().map(|u| u.id).collect();
    assert_eq!(pending_ids, vec![all[2].id, all[3].id]);
    assert_eq!(updates.pending(Some(1)).await.unwrap().len(), 1);

    let uploaded = updates.find_by_id(accepted[0]).await.unwrap().unwrap();
    assert_eq!(uploaded.response_code, Some(201));
    assert!(!uploaded.is_pending());

    // Re-marking keeps the first stamp.
    assert_eq!(updates.mark_uploaded(&accepted, env.now(), 500).await.unwrap(), 0);
}

#[tokio::test]
async fn updates_list_in_id_order_regardless_of_insertion_order() {
    let env = TestEnv::new().await.unwrap();
    let stream = env.stream().create().await.unwrap();
    let message = env.message(&stream).create().await.unwrap();
    let enrollment = env.enrollment(&stream).create().await.unwrap();
    let notification =
        env.notification(&enrollment, &message, NotificationStatus::ACTIVE).await.unwrap();

    let storage = env.storage();
    let context = storage.notifications.context(notification.id).await.unwrap().unwrap();
    let config = env.scheduler().config();
    for id in [40, 20, 30] {
        let draft = NewNotificationUpdate {
            id: Some(NotificationUpdateId(id)),
            action: Some("UPDATE".to_string()),
            ..NewNotificationUpdate::for_notification(&context, config)
        };
        storage.notification_updates.create(&draft).await.unwrap();
    }

    let updates = storage.notification_updates.for_notification(notification.id).await.unwrap();
    let ids: Vec<i64> = updates.iter().map(|u| u.id.0).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
    assert_eq!(&ids[1..], &[20, 30, 40]);
    assert_eq!(updates[0].action, UpdateAction::Create);
}

#[tokio::test]
async fn update_lookup_is_scoped_to_its_notification() {
    let env = TestEnv::new().await.unwrap();
    let stream = env.stream().create().await.unwrap();
    let messages = env.messages_at(&stream, [0, 1]).await.unwrap();
    let enrollment = env.enrollment(&stream).create().await.unwrap();
    let created = env.scheduler().enqueue_ready_messages(&enrollment).await.unwrap();
    assert_eq!(created.len(), messages.len());

    let storage = env.storage();
    let updates = &storage.notification_updates;
    let own = updates.for_notification(created[0].id).await.unwrap();

    assert!(updates.find_for_notification(created[0].id, own[0].id).await.unwrap().is_some());
    assert!(updates.find_for_notification(created[1].id, own[0].id).await.unwrap().is_none());
}

#[tokio::test]
async fn cancelled_notification_queues_cancel_on_creation() {
    let env = TestEnv::new().await.unwrap();
    let stream = env.stream().create().await.unwrap();
    let message = env.message(&stream).expire_days(3).create().await.unwrap();
    let enrollment = env.enrollment(&stream).create().await.unwrap();

    let notification =
        env.notification(&enrollment, &message, NotificationStatus::CANCELLED).await.unwrap();

    let updates =
        env.storage().notification_updates.for_notification(notification.id).await.unwrap();
    assert_eq!(updates[0].action, UpdateAction::Cancel);
    assert_eq!(updates[0].delivery_expires, Some(env.days_from_today(3)));
}

#[tokio::test]
async fn queue_update_snapshots_current_state() {
    let env = TestEnv::new().await.unwrap();
    let stream = env.stream().create().await.unwrap();
    let message = env.message(&stream).create().await.unwrap();
    let enrollment = env.enrollment(&stream).create().await.unwrap();
    let notification =
        env.notification(&enrollment, &message, NotificationStatus::PERM_FAIL).await.unwrap();

    let update =
        env.scheduler().queue_update(notification.id, UpdateAction::Update).await.unwrap();

    assert_eq!(update.action, UpdateAction::Update);
    assert_eq!(update.phone_number, enrollment.phone_number);

    let err = env
        .scheduler()
        .queue_update(NotificationId(9_999), UpdateAction::Update)
        .await
        .unwrap_err();
    assert!(matches!(err, cadence_core::CoreError::NotFound(_)));
}

#[tokio::test]
async fn invalid_update_is_rejected_with_field_errors() {
    let env = TestEnv::new().await.unwrap();

    let draft = NewNotificationUpdate {
        action: Some("DELETE".to_string()),
        ..NewNotificationUpdate::default()
    };
    let err = env.storage().notification_updates.create(&draft).await.unwrap_err();

    let errors = err.validation_errors().unwrap();
    for field in ["notification_id", "first_name", "phone_number", "message_path", "action"] {
        assert!(errors.has(field), "expected error on {field}");
    }
}
