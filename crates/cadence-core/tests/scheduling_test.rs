//! Integration tests for the notifiable window and enqueueing.

use cadence_core::{EnrollmentStatus, NotificationStatus, UpdateAction};
use cadence_testing::TestEnv;

#[tokio::test]
async fn ready_messages_cover_window_in_offset_order() {
    let env = TestEnv::new().await.unwrap();
    let stream = env.stream().create().await.unwrap();
    // Created out of order to prove the ordering comes from offset_days.
    env.messages_at(&stream, (3..=15).rev()).await.unwrap();
    let enrollment = env.enrollment(&stream).started_days_ago(6).create().await.unwrap();

    let ready = env.scheduler().ready_messages(&enrollment).await.unwrap();

    let offsets: Vec<i32> = ready.iter().map(|m| m.offset_days).collect();
    assert_eq!(offsets, (5..=11).collect::<Vec<_>>());
}

#[tokio::test]
async fn ready_messages_exclude_already_scheduled() {
    let env = TestEnv::new().await.unwrap();
    let stream = env.stream().create().await.unwrap();
    let messages = env.messages_at(&stream, [0, 1, 2]).await.unwrap();
    let enrollment = env.enrollment(&stream).create().await.unwrap();

    env.notification(&enrollment, &messages[1], NotificationStatus::ACTIVE).await.unwrap();

    let ready = env.scheduler().ready_messages(&enrollment).await.unwrap();
    let ids: Vec<_> = ready.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![messages[0].id, messages[2].id]);
}

#[tokio::test]
async fn inactive_enrollments_have_nothing_ready() {
    let env = TestEnv::new().await.unwrap();
    let stream = env.stream().create().await.unwrap();
    env.messages_at(&stream, [0, 1]).await.unwrap();

    let cancelled = env
        .enrollment(&stream)
        .status(EnrollmentStatus::Cancelled)
        .create()
        .await
        .unwrap();
    let completed = env
        .enrollment(&stream)
        .status(EnrollmentStatus::Completed)
        .create()
        .await
        .unwrap();

    for enrollment in [&cancelled, &completed] {
        assert!(env.scheduler().ready_messages(enrollment).await.unwrap().is_empty());
        assert!(env.scheduler().enqueue_ready_messages(enrollment).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn window_edges_are_inclusive() {
    let env = TestEnv::new().await.unwrap();
    let stream = env.stream().create().await.unwrap();
    // Due yesterday, today + 5, and just outside on both sides.
    env.messages_at(&stream, [-2, -1, 5, 6]).await.unwrap();
    let enrollment = env.enrollment(&stream).create().await.unwrap();

    let ready = env.scheduler().ready_messages(&enrollment).await.unwrap();

    let offsets: Vec<i32> = ready.iter().map(|m| m.offset_days).collect();
    assert_eq!(offsets, vec![-1, 5]);
}

#[tokio::test]
async fn enqueue_twice_creates_each_notification_once() {
    let env = TestEnv::new().await.unwrap();
    let stream = env.stream().create().await.unwrap();
    env.messages_at(&stream, [0, 2, 4, 30]).await.unwrap();
    let enrollment = env.enrollment(&stream).create().await.unwrap();

    let first = env.scheduler().enqueue_ready_messages(&enrollment).await.unwrap();
    let second = env.scheduler().enqueue_ready_messages(&enrollment).await.unwrap();

    assert_eq!(first.len(), 3);
    assert!(second.is_empty());

    let stored = env.storage().notifications.list_for_enrollment(enrollment.id).await.unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|n| n.status.is_active()));
}

#[tokio::test]
async fn enqueued_notifications_carry_due_date_and_create_update() {
    let env = TestEnv::new().await.unwrap();
    let stream = env.stream().name("prenatal").create().await.unwrap();
    let message = env.message(&stream).name("week1").offset_days(2).create().await.unwrap();
    let enrollment = env
        .enrollment(&stream)
        .started_days_ago(1)
        .preferred_time("10-19")
        .variable("clinic", "Northside")
        .create()
        .await
        .unwrap();

    let created = env.scheduler().enqueue_ready_messages(&enrollment).await.unwrap();
    assert_eq!(created.len(), 1);
    let notification = &created[0];
    assert_eq!(notification.message_id, message.id);
    assert_eq!(notification.delivery_start, env.days_from_today(1));

    let updates =
        env.storage().notification_updates.for_notification(notification.id).await.unwrap();
    assert_eq!(updates.len(), 1);
    let update = &updates[0];
    assert_eq!(update.action, UpdateAction::Create);
    assert_eq!(update.message_path, "prenatal/week1");
    assert_eq!(update.delivery_date, env.days_from_today(1));
    assert_eq!(update.delivery_expires, Some(env.days_from_today(3)));
    assert_eq!(update.preferred_time.as_deref(), Some("10-19"));
    assert_eq!(update.variables.0.get("clinic").map(String::as_str), Some("Northside"));
    assert!(update.is_pending());
}

#[tokio::test]
async fn advancing_the_clock_makes_later_messages_ready() {
    let env = TestEnv::new().await.unwrap();
    let stream = env.stream().create().await.unwrap();
    env.messages_at(&stream, [0, 8]).await.unwrap();
    let enrollment = env.enrollment(&stream).create().await.unwrap();

    let first = env.scheduler().enqueue_ready_messages(&enrollment).await.unwrap();
    assert_eq!(first.len(), 1);

    env.clock.set_today(env.days_from_today(3));
    let later = env.scheduler().enqueue_ready_messages(&enrollment).await.unwrap();
    assert_eq!(later.len(), 1);
}

#[tokio::test]
async fn enqueue_all_active_skips_inactive_enrollments() {
    let env = TestEnv::new().await.unwrap();
    let stream = env.stream().create().await.unwrap();
    env.messages_at(&stream, [0, 1]).await.unwrap();
    env.enrollment(&stream).create().await.unwrap();
    env.enrollment(&stream).create().await.unwrap();
    env.enrollment(&stream).status(EnrollmentStatus::Completed).create().await.unwrap();

    let summary = env.scheduler().enqueue_all_active().await.unwrap();

    assert_eq!(summary.enrollments, 2);
    assert_eq!(summary.created, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(env.storage().notification_updates.count_pending().await.unwrap(), 4);
}
