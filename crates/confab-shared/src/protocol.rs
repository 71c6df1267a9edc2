//! Request models delivered by the gateway.
//!
//! The gateway (sockets/HTTP) assembles each client intent into one of these
//! fully-formed values before calling into the core; nothing here is ever
//! partially constructed or streamed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{CallActor, CallType, MessageBody, MessageId, ReactionKind, RoomId, UserId};

/// Create a chat room with an explicit participant list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub participants: Vec<UserId>,
    pub is_group: bool,
    pub name: Option<String>,
    #[serde(default)]
    pub is_secret: bool,
}

/// Append a message to an existing room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub body: MessageBody,
}

/// Send a direct message; the room is found or created from the pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateMessageRequest {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: MessageBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditMessageRequest {
    pub body: MessageBody,
}

/// Toggle a reaction on any subject (message, news item, photo, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleReactionRequest {
    pub subject_id: Uuid,
    pub user_id: UserId,
    pub kind: ReactionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceCallRequest {
    pub caller_id: UserId,
    pub receiver_id: UserId,
    pub call_type: CallType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclineCallRequest {
    pub actor: CallActor,
}

/// Keyset pagination over a room's history.  The cursor is the last-seen
/// message's `(created_at, id)`, so the page boundary stays stable while new
/// messages are appended.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub after_ts: Option<DateTime<Utc>>,
    pub after_id: Option<MessageId>,
    pub limit: Option<u32>,
}
