//! v001 -- Initial schema creation.
//!
//! Creates the six core tables: `rooms`, `room_participants`, `messages`,
//! `message_reads`, `reactions`, and `calls`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Rooms
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS rooms (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name         TEXT NOT NULL DEFAULT '',    -- empty for direct rooms
    is_group     INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    is_secret    INTEGER NOT NULL DEFAULT 0,
    last_message TEXT NOT NULL DEFAULT '',    -- denormalized preview
    created_at   TEXT NOT NULL,               -- ISO-8601 / RFC-3339
    updated_at   TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Room participants (membership set)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS room_participants (
    room_id TEXT NOT NULL,                    -- FK -> rooms(id)
    user_id TEXT NOT NULL,                    -- opaque user UUID

    PRIMARY KEY (room_id, user_id),
    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_room_participants_user
    ON room_participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                  TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    room_id             TEXT NOT NULL,              -- FK -> rooms(id)
    sender_id           TEXT NOT NULL,
    receiver_id         TEXT,                       -- set for direct messages
    kind                TEXT NOT NULL,              -- text | emoji | file | audio
    text                TEXT,
    emoji               TEXT,
    file_url            TEXT,
    file_kind           TEXT,                       -- image | video | audio | document
    caption             TEXT,
    audio_url           TEXT,
    audio_duration_secs INTEGER,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,

    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_room_created
    ON messages(room_id, created_at, id);

-- ----------------------------------------------------------------
-- Read receipts (per-message reader set)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message_reads (
    message_id TEXT NOT NULL,                 -- FK -> messages(id)
    user_id    TEXT NOT NULL,
    read_at    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Reactions (one kind per user per subject)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reactions (
    subject_id TEXT NOT NULL,                 -- message, news item, photo, ...
    user_id    TEXT NOT NULL,
    kind       TEXT NOT NULL,                 -- like | dislike
    created_at TEXT NOT NULL,

    PRIMARY KEY (subject_id, user_id)
);

-- ----------------------------------------------------------------
-- Call log (terminal call sessions only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS calls (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    caller_id     TEXT NOT NULL,
    receiver_id   TEXT NOT NULL,
    call_type     TEXT NOT NULL,              -- audio | video
    outcome       TEXT NOT NULL,              -- completed | declined | missed
    ended_by      TEXT,                       -- caller | receiver
    duration_secs INTEGER NOT NULL DEFAULT 0,
    started_at    TEXT NOT NULL,
    ended_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_calls_caller ON calls(caller_id, started_at DESC);
CREATE INDEX IF NOT EXISTS idx_calls_receiver ON calls(receiver_id, started_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
