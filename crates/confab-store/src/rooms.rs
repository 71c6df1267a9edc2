//! CRUD operations for [`ChatRoom`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use confab_shared::{RoomId, UserId};

use crate::error::{Result, StoreError};
use crate::models::ChatRoom;
use crate::tx::StoreCtx;

impl<'a> StoreCtx<'a> {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new room and its participant set.
    ///
    /// Membership invariants are validated by the chat service before this
    /// is called; the store only persists.
    pub fn insert_room(&self, room: &ChatRoom) -> Result<()> {
        self.conn().execute(
            "INSERT INTO rooms (id, name, is_group, is_secret, last_message, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                room.id.to_string(),
                room.name,
                room.is_group,
                room.is_secret,
                room.last_message,
                room.created_at.to_rfc3339(),
                room.updated_at.to_rfc3339(),
            ],
        )?;

        let mut stmt = self
            .conn()
            .prepare("INSERT INTO room_participants (room_id, user_id) VALUES (?1, ?2)")?;
        for user in &room.participants {
            stmt.execute(params![room.id.to_string(), user.to_string()])?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single room by id, including its participant set.
    pub fn get_room(&self, id: RoomId) -> Result<ChatRoom> {
        let mut room = self
            .conn()
            .query_row(
                "SELECT id, name, is_group, is_secret, last_message, created_at, updated_at
                 FROM rooms
                 WHERE id = ?1",
                params![id.to_string()],
                row_to_room,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;
        room.participants = self.participants_of(id)?;
        Ok(room)
    }

    /// Find the direct (non-group, two-member) room between a pair of users,
    /// if one exists.
    pub fn find_direct_room(&self, a: UserId, b: UserId) -> Result<Option<ChatRoom>> {
        let mut stmt = self.conn().prepare(
            "SELECT r.id
             FROM rooms r
             JOIN room_participants p ON p.room_id = r.id
             WHERE r.is_group = 0
             GROUP BY r.id
             HAVING COUNT(*) = 2
                AND SUM(CASE WHEN p.user_id IN (?1, ?2) THEN 1 ELSE 0 END) = 2
             ORDER BY r.created_at ASC
             LIMIT 1",
        )?;

        let id: Option<String> = stmt
            .query_row(params![a.to_string(), b.to_string()], |row| row.get(0))
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match id {
            Some(id_str) => {
                let uuid = Uuid::parse_str(&id_str)
                    .map_err(|e| StoreError::CorruptRecord(e.to_string()))?;
                Ok(Some(self.get_room(RoomId(uuid))?))
            }
            None => Ok(None),
        }
    }

    /// List rooms the user participates in, most recently updated first.
    pub fn rooms_for_user(&self, user: UserId) -> Result<Vec<ChatRoom>> {
        let mut stmt = self.conn().prepare(
            "SELECT r.id, r.name, r.is_group, r.is_secret, r.last_message, r.created_at, r.updated_at
             FROM rooms r
             JOIN room_participants p ON p.room_id = r.id
             WHERE p.user_id = ?1
             ORDER BY r.updated_at DESC",
        )?;

        let rows = stmt.query_map(params![user.to_string()], row_to_room)?;

        let mut rooms = Vec::new();
        for row in rows {
            let mut room = row?;
            room.participants = self.participants_of(room.id)?;
            rooms.push(room);
        }
        Ok(rooms)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Refresh the room's denormalized preview after a message append.
    /// Last write wins on `updated_at` ordering.
    pub fn set_last_message(&self, id: RoomId, preview: &str, at: DateTime<Utc>) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE rooms SET last_message = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), preview, at.to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn participants_of(&self, room_id: RoomId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM room_participants WHERE room_id = ?1 ORDER BY user_id ASC",
        )?;
        let rows = stmt.query_map(params![room_id.to_string()], |row| {
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
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`ChatRoom`] with an empty participant set.
fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRoom> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let is_group: bool = row.get(2)?;
    let is_secret: bool = row.get(3)?;
    let last_message: String = row.get(4)?;
    let created_str: String = row.get(5)?;
    let updated_str: String = row.get(6)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let updated_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&updated_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(ChatRoom {
        id: RoomId(id),
        name,
        is_group,
        is_secret,
        participants: Vec::new(),
        last_message,
        created_at,
        updated_at,
    })
}
