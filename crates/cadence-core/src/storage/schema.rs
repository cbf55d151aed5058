//! Idempotent schema statements, applied in order.
//!
//! Uniqueness rules that protect scheduling from concurrent writers are
//! declared here as indexes; the repositories translate their violations
//! into validation errors.

pub(super) const STATEMENTS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS message_streams (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_stream_id INTEGER NOT NULL REFERENCES message_streams(id),
        name TEXT NOT NULL,
        title TEXT NOT NULL,
        sms_text TEXT,
        offset_days INTEGER NOT NULL DEFAULT 0,
        language TEXT NOT NULL DEFAULT 'en',
        expire_days INTEGER CHECK (expire_days IS NULL OR expire_days >= 0),
        created_at TEXT NOT NULL,
        UNIQUE (message_stream_id, name)
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_messages_stream_offset
        ON messages (message_stream_id, offset_days)
    ",
    r"
    CREATE TABLE IF NOT EXISTS enrollments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_stream_id INTEGER NOT NULL REFERENCES message_streams(id),
        first_name TEXT NOT NULL,
        last_name TEXT,
        phone_number TEXT NOT NULL,
        ext_user_id TEXT,
        delivery_method TEXT NOT NULL,
        stream_start TEXT NOT NULL,
        preferred_time TEXT,
        language TEXT,
        status TEXT NOT NULL DEFAULT 'ACTIVE'
            CHECK (status IN ('ACTIVE', 'COMPLETED', 'CANCELLED')),
        variables TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    ",
    r"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollments_active_phone
        ON enrollments (phone_number, message_stream_id)
        WHERE status = 'ACTIVE'
    ",
    r"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollments_ext_user
        ON enrollments (ext_user_id, message_stream_id)
        WHERE ext_user_id IS NOT NULL
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_enrollments_status ON enrollments (status)
    ",
    r"
    CREATE TABLE IF NOT EXISTS notifications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        enrollment_id INTEGER NOT NULL REFERENCES enrollments(id),
        message_id INTEGER NOT NULL REFERENCES messages(id),
        status TEXT NOT NULL DEFAULT 'ACTIVE',
        delivery_start TEXT NOT NULL,
        delivered_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (enrollment_id, message_id)
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_notifications_enrollment_status
        ON notifications (enrollment_id, status)
    ",
    r"
    CREATE TABLE IF NOT EXISTS notification_updates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        notification_id INTEGER NOT NULL REFERENCES notifications(id),
        first_name TEXT NOT NULL,
        phone_number TEXT NOT NULL,
        delivery_method TEXT NOT NULL,
        message_path TEXT NOT NULL,
        delivery_date TEXT NOT NULL,
        delivery_expires TEXT,
        preferred_time TEXT,
        ext_user_id TEXT,
        action TEXT NOT NULL CHECK (action IN ('CREATE', 'UPDATE', 'CANCEL')),
        response_code INTEGER,
        uploaded_at TEXT,
        variables TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_notification_updates_notification
        ON notification_updates (notification_id, id)
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_notification_updates_pending
        ON notification_updates (id)
        WHERE uploaded_at IS NULL
    ",
    r"
    CREATE TABLE IF NOT EXISTS notification_responses (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        notification_id INTEGER NOT NULL REFERENCES notifications(id),
        status TEXT NOT NULL,
        error_type TEXT,
        error_msg TEXT,
        delivered_at TEXT,
        created_at TEXT NOT NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_notification_responses_notification
        ON notification_responses (notification_id)
    ",
];
