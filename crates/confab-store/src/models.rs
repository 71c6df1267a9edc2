//! Domain model structs persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so mutating operations
//! can return the updated aggregate straight to the gateway for fan-out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use confab_shared::{
    CallActor, CallId, CallState, CallType, MessageBody, MessageId, ReactionKind, RoomId, UserId,
};

// ---------------------------------------------------------------------------
// ChatRoom
// ---------------------------------------------------------------------------

/// A conversation container (direct or group).
///
/// Invariant: a non-group room has exactly 2 participants; a group room has
/// at least 2.  Enforced by the chat service wherever membership is written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRoom {
    /// Unique room identifier.
    pub id: RoomId,
    /// Display name; empty for direct rooms.
    pub name: String,
    pub is_group: bool,
    pub is_secret: bool,
    /// Participant user ids (unique, order irrelevant).
    pub participants: Vec<UserId>,
    /// Denormalized preview of the most recent message.
    pub last_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message with its reader set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// The room this message belongs to.  Immutable after creation.
    pub room_id: RoomId,
    /// Sender user id.  Immutable after creation.
    pub sender_id: UserId,
    /// Receiver user id, set for direct messages.  Immutable after creation.
    pub receiver_id: Option<UserId>,
    /// Tagged content.
    pub body: MessageBody,
    /// Users who have read this message.  Grows monotonically; only a
    /// moderation delete removes entries (by removing the message).
    pub read_by: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Keyset cursor into a room's history: the last-seen message's
/// `(created_at, id)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageCursor {
    pub created_at: DateTime<Utc>,
    pub id: MessageId,
}

/// One page of ascending room history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Cursor for the next page, or `None` when the page was not full.
    pub next_cursor: Option<MessageCursor>,
}

// ---------------------------------------------------------------------------
// Reactions
// ---------------------------------------------------------------------------

/// Aggregate reaction state for one subject, computed from set membership
/// (never from a stored counter).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionSummary {
    pub subject_id: Uuid,
    pub like_count: u64,
    pub dislike_count: u64,
    /// The querying user's own reaction, if any.
    pub user_reaction: Option<ReactionKind>,
}

// ---------------------------------------------------------------------------
// Call log
// ---------------------------------------------------------------------------

/// A terminal call session persisted for call history.  Live sessions are
/// owned by the call coordinator and never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallRecord {
    pub id: CallId,
    pub caller_id: UserId,
    pub receiver_id: UserId,
    pub call_type: CallType,
    /// Terminal outcome: `Completed`, `Declined`, or `Missed`.
    pub outcome: CallState,
    /// Which side ended or declined the call, when known.
    pub ended_by: Option<CallActor>,
    /// Seconds between answer and hang-up; 0 for unanswered calls.
    pub duration_secs: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}
