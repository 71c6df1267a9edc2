use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use confab_shared::{FileKind, MessageBody, MessageId, RoomId, UserId};

use crate::error::{Result, StoreError};
use crate::models::{Message, MessageCursor, MessagePage};
use crate::tx::StoreCtx;

const MESSAGE_COLUMNS: &str = "id, room_id, sender_id, receiver_id, kind, text, emoji, \
     file_url, file_kind, caption, audio_url, audio_duration_secs, created_at, updated_at";

impl<'a> StoreCtx<'a> {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let cols = BodyColumns::from_body(&message.body);
        self.conn().execute(
            "INSERT INTO messages (id, room_id, sender_id, receiver_id, kind, text, emoji,
                 file_url, file_kind, caption, audio_url, audio_duration_secs, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                message.id.to_string(),
                message.room_id.to_string(),
                message.sender_id.to_string(),
                message.receiver_id.map(|r| r.to_string()),
                cols.kind,
                cols.text,
                cols.emoji,
                cols.file_url,
                cols.file_kind,
                cols.caption,
                cols.audio_url,
                cols.audio_duration_secs,
                message.created_at.to_rfc3339(),
                message.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        let mut message = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;
        message.read_by = self.read_by(id)?;
        Ok(message)
    }

    /// One ascending page of room history, keyed by `(created_at, id)`.
    ///
    /// The keyset cursor stays stable under concurrent inserts: new messages
    /// land after the cursor and never shift earlier pages.
    pub fn list_messages(
        &self,
        room_id: RoomId,
        cursor: Option<MessageCursor>,
        limit: u32,
    ) -> Result<MessagePage> {
        let mut messages = match cursor {
            Some(cur) => {
                let mut stmt = self.conn().prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE room_id = ?1
                       AND (created_at > ?2 OR (created_at = ?2 AND id > ?3))
                     ORDER BY created_at ASC, id ASC
                     LIMIT ?4"
                ))?;
                let rows = stmt.query_map(
                    params![
                        room_id.to_string(),
                        cur.created_at.to_rfc3339(),
                        cur.id.to_string(),
                        limit,
                    ],
                    row_to_message,
                )?;
                collect_rows(rows)?
            }
            None => {
                let mut stmt = self.conn().prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE room_id = ?1
                     ORDER BY created_at ASC, id ASC
                     LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![room_id.to_string(), limit], row_to_message)?;
                collect_rows(rows)?
            }
        };

        for message in &mut messages {
            message.read_by = self.read_by(message.id)?;
        }

        let next_cursor = if messages.len() as u32 == limit && limit > 0 {
            messages.last().map(|m| MessageCursor {
                created_at: m.created_at,
                id: m.id,
            })
        } else {
            None
        };

        Ok(MessagePage {
            messages,
            next_cursor,
        })
    }

    /// Add `user` to the message's reader set.  Idempotent: re-marking is a
    /// no-op that returns `false`.  The set only ever grows.
    pub fn mark_read(&self, id: MessageId, user: UserId, at: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
             VALUES (?1, ?2, ?3)",
            params![id.to_string(), user.to_string(), at.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    pub fn read_by(&self, id: MessageId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM message_reads WHERE message_id = ?1 ORDER BY read_at ASC",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            let id_str: String = row.get(0)?;
            let uuid = Uuid::parse_str(&id_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })?;
            Ok(UserId(uuid))
        })?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Moderation edit: replace the body.  Sender, room, and receiver are
    /// immutable and deliberately absent from the UPDATE.
    pub fn update_message_body(
        &self,
        id: MessageId,
        body: &MessageBody,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let cols = BodyColumns::from_body(body);
        let affected = self.conn().execute(
            "UPDATE messages
             SET kind = ?2, text = ?3, emoji = ?4, file_url = ?5, file_kind = ?6,
                 caption = ?7, audio_url = ?8, audio_duration_secs = ?9, updated_at = ?10
             WHERE id = ?1",
            params![
                id.to_string(),
                cols.kind,
                cols.text,
                cols.emoji,
                cols.file_url,
                cols.file_kind,
                cols.caption,
                cols.audio_url,
                cols.audio_duration_secs,
                at.to_rfc3339(),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Moderation delete.  Read receipts cascade with the row.
    /// Returns `true` if a row was deleted.
    pub fn delete_message(&self, id: MessageId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Flattened body fields for the tagged-union storage columns.
struct BodyColumns {
    kind: &'static str,
    text: Option<String>,
    emoji: Option<String>,
    file_url: Option<String>,
    file_kind: Option<&'static str>,
    caption: Option<String>,
    audio_url: Option<String>,
    audio_duration_secs: Option<u32>,
}

impl BodyColumns {
    fn from_body(body: &MessageBody) -> Self {
        let mut cols = Self {
            kind: "text",
            text: None,
            emoji: None,
            file_url: None,
            file_kind: None,
            caption: None,
            audio_url: None,
            audio_duration_secs: None,
        };
        match body {
            MessageBody::Text { text } => {
                cols.kind = "text";
                cols.text = Some(text.clone());
            }
            MessageBody::Emoji { emoji } => {
                cols.kind = "emoji";
                cols.emoji = Some(emoji.clone());
            }
            MessageBody::File {
                file_url,
                file_kind,
                caption,
            } => {
                cols.kind = "file";
                cols.file_url = Some(file_url.clone());
                cols.file_kind = Some(file_kind.as_str());
                cols.caption = caption.clone();
            }
            MessageBody::Audio {
                audio_url,
                duration_secs,
            } => {
                cols.kind = "audio";
                cols.audio_url = Some(audio_url.clone());
                cols.audio_duration_secs = Some(*duration_secs);
            }
        }
        cols
    }
}

fn corrupt(idx: usize, what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("invalid {what}").into(),
    )
}

/// Map a `rusqlite::Row` to a [`Message`] with an empty reader set.
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let room_id_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let receiver_str: Option<String> = row.get(3)?;
    let kind: String = row.get(4)?;
    let text: Option<String> = row.get(5)?;
    let emoji: Option<String> = row.get(6)?;
    let file_url: Option<String> = row.get(7)?;
    let file_kind_str: Option<String> = row.get(8)?;
    let caption: Option<String> = row.get(9)?;
    let audio_url: Option<String> = row.get(10)?;
    let audio_duration_secs: Option<u32> = row.get(11)?;
    let created_str: String = row.get(12)?;
    let updated_str: String = row.get(13)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let room_id = Uuid::parse_str(&room_id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender_id = Uuid::parse_str(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let receiver_id = receiver_str
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let body = match kind.as_str() {
        "text" => MessageBody::Text {
            text: text.ok_or_else(|| corrupt(5, "text body"))?,
        },
        "emoji" => MessageBody::Emoji {
            emoji: emoji.ok_or_else(|| corrupt(6, "emoji body"))?,
        },
        "file" => MessageBody::File {
            file_url: file_url.ok_or_else(|| corrupt(7, "file body"))?,
            file_kind: file_kind_str
                .as_deref()
                .and_then(FileKind::parse)
                .ok_or_else(|| corrupt(8, "file kind"))?,
            caption,
        },
        "audio" => MessageBody::Audio {
            audio_url: audio_url.ok_or_else(|| corrupt(10, "audio body"))?,
            duration_secs: audio_duration_secs.ok_or_else(|| corrupt(11, "audio duration"))?,
        },
        _ => return Err(corrupt(4, "message kind")),
    };

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let updated_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&updated_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(13, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id: MessageId(id),
        room_id: RoomId(room_id),
        sender_id: UserId(sender_id),
        receiver_id: receiver_id.map(UserId),
        body,
        read_by: Vec::new(),
        created_at,
        updated_at,
    })
}

fn collect_rows(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<Message>>,
) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}
