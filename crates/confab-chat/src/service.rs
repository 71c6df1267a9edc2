//! Room and message operations.
//!
//! Every mutating operation runs inside a [`TransactionManager`] unit of
//! work, so a message append and the room's preview update either both
//! persist or neither does.  The service is synchronous; one instance per
//! database handle, with the gateway serializing access per request.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use confab_shared::{MessageBody, MessageId, ReactionKind, RoomId, UserId};
use confab_store::{
    CallRecord, ChatRoom, Database, Message, MessageCursor, MessagePage, ReactionSummary,
    TransactionManager,
};

use crate::error::{ChatError, Result};

/// Default page size for history queries.
const DEFAULT_PAGE_SIZE: u32 = 50;
/// Upper bound a client may request per page.
const MAX_PAGE_SIZE: u32 = 200;

pub struct ChatService {
    db: Database,
}

impl ChatService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ------------------------------------------------------------------
    // Rooms
    // ------------------------------------------------------------------

    /// Create a room, enforcing the membership invariant: a direct room has
    /// exactly 2 participants, a group room at least 2.
    ///
    /// Creating a direct room for a pair that already shares one returns the
    /// existing room instead of a duplicate.
    pub fn create_room(
        &mut self,
        participants: Vec<UserId>,
        is_group: bool,
        name: Option<String>,
        is_secret: bool,
    ) -> Result<ChatRoom> {
        let participants = dedupe(participants);
        validate_membership(&participants, is_group)?;

        if !is_group {
            if let Some(existing) = self
                .db
                .ctx()
                .find_direct_room(participants[0], participants[1])?
            {
                debug!(room = %existing.id, "reusing existing direct room");
                return Ok(existing);
            }
        }

        let now = Utc::now();
        let room = ChatRoom {
            id: RoomId::new(),
            name: name.unwrap_or_default(),
            is_group,
            is_secret,
            participants,
            last_message: String::new(),
            created_at: now,
            updated_at: now,
        };

        TransactionManager::new(&mut self.db).run(|ctx| {
            ctx.insert_room(&room)?;
            Ok::<_, ChatError>(())
        })?;

        info!(room = %room.id, is_group, "created chat room");
        Ok(room)
    }

    pub fn get_room(&self, id: RoomId) -> Result<ChatRoom> {
        Ok(self.db.ctx().get_room(id)?)
    }

    pub fn rooms_for_user(&self, user: UserId) -> Result<Vec<ChatRoom>> {
        Ok(self.db.ctx().rooms_for_user(user)?)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Append a message to an existing room.  The insert and the room's
    /// `last_message`/`updated_at` refresh share one unit of work.
    pub fn send_message(
        &mut self,
        room_id: RoomId,
        sender_id: UserId,
        body: MessageBody,
    ) -> Result<Message> {
        let now = Utc::now();
        let message = Message {
            id: MessageId::new(),
            room_id,
            sender_id,
            receiver_id: None,
            body,
            read_by: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let preview = preview_of(&message.body);

        TransactionManager::new(&mut self.db).run(|ctx| {
            ctx.get_room(room_id)?;
            ctx.insert_message(&message)?;
            ctx.set_last_message(room_id, &preview, now)?;
            Ok::<_, ChatError>(())
        })?;

        debug!(room = %room_id, message = %message.id, "appended message");
        Ok(message)
    }

    /// Send a direct message, finding or creating the pair's direct room in
    /// the same unit of work as the append.
    pub fn send_private_message(
        &mut self,
        sender_id: UserId,
        receiver_id: UserId,
        body: MessageBody,
    ) -> Result<Message> {
        if sender_id == receiver_id {
            return Err(ChatError::InvalidMembership(
                "a direct room needs two distinct users".to_string(),
            ));
        }

        let now = Utc::now();
        let message_id = MessageId::new();
        let preview = preview_of(&body);

        let message = TransactionManager::new(&mut self.db).run(|ctx| {
            let room = match ctx.find_direct_room(sender_id, receiver_id)? {
                Some(room) => room,
                None => {
                    let room = ChatRoom {
                        id: RoomId::new(),
                        name: String::new(),
                        is_group: false,
                        is_secret: false,
                        participants: vec![sender_id, receiver_id],
                        last_message: String::new(),
                        created_at: now,
                        updated_at: now,
                    };
                    ctx.insert_room(&room)?;
                    debug!(room = %room.id, "created direct room on first message");
                    room
                }
            };

            let message = Message {
                id: message_id,
                room_id: room.id,
                sender_id,
                receiver_id: Some(receiver_id),
                body: body.clone(),
                read_by: Vec::new(),
                created_at: now,
                updated_at: now,
            };
            ctx.insert_message(&message)?;
            ctx.set_last_message(room.id, &preview, now)?;
            Ok::<_, ChatError>(message)
        })?;

        debug!(message = %message.id, "sent private message");
        Ok(message)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        Ok(self.db.ctx().get_message(id)?)
    }

    /// Ascending room history with a keyset cursor.
    pub fn chat_history(
        &self,
        room_id: RoomId,
        cursor: Option<MessageCursor>,
        limit: Option<u32>,
    ) -> Result<MessagePage> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let ctx = self.db.ctx();
        ctx.get_room(room_id)?;
        Ok(ctx.list_messages(room_id, cursor, limit)?)
    }

    /// Add the user to the message's reader set.  Idempotent; the set never
    /// shrinks.  Returns the updated message either way.
    pub fn mark_read(&mut self, message_id: MessageId, user: UserId) -> Result<Message> {
        let now = Utc::now();
        TransactionManager::new(&mut self.db).run(|ctx| {
            // Surfaces NotFound before touching the read set.
            ctx.get_message(message_id)?;
            let inserted = ctx.mark_read(message_id, user, now)?;
            if inserted {
                debug!(message = %message_id, user = %user.short(), "read receipt added");
            }
            Ok::<_, ChatError>(ctx.get_message(message_id)?)
        })
    }

    /// Moderation edit: replace a message body.  Sender and room are
    /// immutable.
    pub fn edit_message(&mut self, message_id: MessageId, body: MessageBody) -> Result<Message> {
        let now = Utc::now();
        TransactionManager::new(&mut self.db).run(|ctx| {
            ctx.update_message_body(message_id, &body, now)?;
            Ok::<_, ChatError>(ctx.get_message(message_id)?)
        })
    }

    /// Moderation delete: remove a message, its read receipts, and its
    /// reactions in one unit of work.  Returns `true` if it existed.
    pub fn delete_message(&mut self, message_id: MessageId) -> Result<bool> {
        TransactionManager::new(&mut self.db).run(|ctx| {
            let deleted = ctx.delete_message(message_id)?;
            if deleted {
                ctx.clear_reactions(message_id.0)?;
                info!(message = %message_id, "deleted message");
            }
            Ok::<_, ChatError>(deleted)
        })
    }

    // ------------------------------------------------------------------
    // Reactions
    // ------------------------------------------------------------------

    /// Toggle a like/dislike on any subject and return the authoritative
    /// aggregate.
    pub fn toggle_reaction(
        &mut self,
        subject_id: Uuid,
        user: UserId,
        kind: ReactionKind,
    ) -> Result<ReactionSummary> {
        let now = Utc::now();
        TransactionManager::new(&mut self.db).run(|ctx| {
            Ok::<_, ChatError>(ctx.toggle_reaction(subject_id, user, kind, now)?)
        })
    }

    // ------------------------------------------------------------------
    // Call log
    // ------------------------------------------------------------------

    /// Persist a terminal call session into the call log.
    pub fn record_call(&mut self, record: &CallRecord) -> Result<()> {
        self.db.ctx().insert_call_record(record)?;
        debug!(call = %record.id, outcome = %record.outcome, "recorded call");
        Ok(())
    }

    pub fn calls_for_user(&self, user: UserId) -> Result<Vec<CallRecord>> {
        Ok(self.db.ctx().calls_for_user(user)?)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn dedupe(participants: Vec<UserId>) -> Vec<UserId> {
    let mut seen = std::collections::HashSet::new();
    participants
        .into_iter()
        .filter(|user| seen.insert(*user))
        .collect()
}

fn validate_membership(participants: &[UserId], is_group: bool) -> Result<()> {
    if !is_group && participants.len() != 2 {
        return Err(ChatError::InvalidMembership(format!(
            "a direct room has exactly 2 participants, got {}",
            participants.len()
        )));
    }
    if is_group && participants.len() < 2 {
        return Err(ChatError::InvalidMembership(format!(
            "a group room has at least 2 participants, got {}",
            participants.len()
        )));
    }
    Ok(())
}

/// Preview text shown in the room list for the most recent message.
fn preview_of(body: &MessageBody) -> String {
    match body {
        MessageBody::Text { text } => text.clone(),
        MessageBody::Emoji { emoji } => emoji.clone(),
        MessageBody::File {
            caption: Some(caption),
            ..
        } => caption.clone(),
        MessageBody::File { file_kind, .. } => format!("[{}]", file_kind.as_str()),
        MessageBody::Audio { .. } => "[voice message]".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_shared::FileKind;
    use confab_store::StoreError;

    fn service() -> (tempfile::TempDir, ChatService) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("chat.db")).unwrap();
        (dir, ChatService::new(db))
    }

    fn text(s: &str) -> MessageBody {
        MessageBody::Text {
            text: s.to_string(),
        }
    }

    #[test]
    fn direct_room_membership_invariant() {
        let (_dir, mut svc) = service();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());

        assert!(matches!(
            svc.create_room(vec![a], false, None, false),
            Err(ChatError::InvalidMembership(_))
        ));
        assert!(matches!(
            svc.create_room(vec![a, b, c], false, None, false),
            Err(ChatError::InvalidMembership(_))
        ));
        // Duplicates collapse before validation.
        assert!(matches!(
            svc.create_room(vec![a, a], false, None, false),
            Err(ChatError::InvalidMembership(_))
        ));
        assert!(matches!(
            svc.create_room(vec![a], true, None, false),
            Err(ChatError::InvalidMembership(_))
        ));

        let room = svc.create_room(vec![a, b], false, None, false).unwrap();
        assert!(!room.is_group);
        assert_eq!(room.participants.len(), 2);
    }

    #[test]
    fn direct_room_recreation_returns_existing() {
        let (_dir, mut svc) = service();
        let (a, b) = (UserId::new(), UserId::new());

        let first = svc.create_room(vec![a, b], false, None, false).unwrap();
        // Same pair in either order maps to the same room.
        let second = svc.create_room(vec![b, a], false, None, false).unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn send_message_updates_room_preview() {
        let (_dir, mut svc) = service();
        let (a, b) = (UserId::new(), UserId::new());
        let room = svc.create_room(vec![a, b], false, None, false).unwrap();

        svc.send_message(room.id, a, text("hello there")).unwrap();
        let room = svc.get_room(room.id).unwrap();
        assert_eq!(room.last_message, "hello there");

        svc.send_message(
            room.id,
            b,
            MessageBody::File {
                file_url: "blob://x".to_string(),
                file_kind: FileKind::Image,
                caption: None,
            },
        )
        .unwrap();
        assert_eq!(svc.get_room(room.id).unwrap().last_message, "[image]");
    }

    #[test]
    fn send_message_to_unknown_room_fails() {
        let (_dir, mut svc) = service();
        let result = svc.send_message(RoomId::new(), UserId::new(), text("hi"));
        assert!(matches!(
            result,
            Err(ChatError::Store(StoreError::NotFound))
        ));
    }

    #[test]
    fn append_is_atomic_under_fault_injection() {
        let (_dir, mut svc) = service();
        let (a, b) = (UserId::new(), UserId::new());
        let room = svc.create_room(vec![a, b], false, None, false).unwrap();
        svc.send_message(room.id, a, text("first")).unwrap();

        // Force a failure after the insert but before the room update, the
        // way a mid-transaction storage error would land.
        let now = Utc::now();
        let message = Message {
            id: MessageId::new(),
            room_id: room.id,
            sender_id: a,
            receiver_id: None,
            body: text("second"),
            read_by: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let result: Result<()> = TransactionManager::new(&mut svc.db).run(|ctx| {
            ctx.insert_message(&message)?;
            Err(ChatError::Store(StoreError::NotFound))
        });
        assert!(result.is_err());

        // Neither the message nor the preview update is visible.
        assert!(matches!(
            svc.get_message(message.id),
            Err(ChatError::Store(StoreError::NotFound))
        ));
        assert_eq!(svc.get_room(room.id).unwrap().last_message, "first");
    }

    #[test]
    fn private_message_creates_then_reuses_direct_room() {
        let (_dir, mut svc) = service();
        let (a, b) = (UserId::new(), UserId::new());

        let first = svc.send_private_message(a, b, text("hey")).unwrap();
        assert_eq!(first.receiver_id, Some(b));

        let second = svc.send_private_message(b, a, text("hey back")).unwrap();
        assert_eq!(first.room_id, second.room_id);

        let room = svc.get_room(first.room_id).unwrap();
        assert!(!room.is_group);
        assert_eq!(room.last_message, "hey back");

        assert!(matches!(
            svc.send_private_message(a, a, text("self")),
            Err(ChatError::InvalidMembership(_))
        ));
    }

    #[test]
    fn mark_read_is_idempotent_and_monotonic() {
        let (_dir, mut svc) = service();
        let (a, b) = (UserId::new(), UserId::new());
        let room = svc.create_room(vec![a, b], false, None, false).unwrap();
        let message = svc.send_message(room.id, a, text("read me")).unwrap();

        let after_first = svc.mark_read(message.id, b).unwrap();
        assert_eq!(after_first.read_by, vec![b]);

        // Re-marking is a no-op that still succeeds.
        let after_second = svc.mark_read(message.id, b).unwrap();
        assert_eq!(after_second.read_by, vec![b]);

        let after_sender = svc.mark_read(message.id, a).unwrap();
        assert_eq!(after_sender.read_by.len(), 2);

        assert!(matches!(
            svc.mark_read(MessageId::new(), a),
            Err(ChatError::Store(StoreError::NotFound))
        ));
    }

    #[test]
    fn history_pages_are_restartable_and_complete() {
        let (_dir, mut svc) = service();
        let (a, b) = (UserId::new(), UserId::new());
        let room = svc.create_room(vec![a, b], false, None, false).unwrap();

        let mut sent = Vec::new();
        for i in 0..5 {
            sent.push(svc.send_message(room.id, a, text(&format!("m{i}"))).unwrap().id);
        }

        let mut collected = Vec::new();
        let mut cursor = None;
        loop {
            let page = svc.chat_history(room.id, cursor, Some(2)).unwrap();
            // Re-running the same cursor yields the same page (restartable).
            let again = svc.chat_history(room.id, cursor, Some(2)).unwrap();
            assert_eq!(
                page.messages.iter().map(|m| m.id).collect::<Vec<_>>(),
                again.messages.iter().map(|m| m.id).collect::<Vec<_>>()
            );

            collected.extend(page.messages.iter().map(|m| m.id));
            match page.next_cursor {
                Some(next) if !page.messages.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        assert_eq!(collected.len(), 5);
        let mut unique = collected.clone();
        unique.sort_by_key(|id| id.0);
        unique.dedup();
        assert_eq!(unique.len(), 5, "no duplicates across pages");
    }

    #[test]
    fn edit_and_delete_message() {
        let (_dir, mut svc) = service();
        let (a, b) = (UserId::new(), UserId::new());
        let room = svc.create_room(vec![a, b], false, None, false).unwrap();
        let message = svc.send_message(room.id, a, text("tpyo")).unwrap();

        let edited = svc.edit_message(message.id, text("typo")).unwrap();
        assert_eq!(
            edited.body,
            MessageBody::Text {
                text: "typo".to_string()
            }
        );
        assert_eq!(edited.sender_id, a, "sender is immutable");

        svc.toggle_reaction(message.id.0, b, ReactionKind::Like)
            .unwrap();
        assert!(svc.delete_message(message.id).unwrap());
        assert!(!svc.delete_message(message.id).unwrap());
        assert!(matches!(
            svc.get_message(message.id),
            Err(ChatError::Store(StoreError::NotFound))
        ));
    }

    #[test]
    fn preview_covers_every_body_variant() {
        assert_eq!(preview_of(&text("hi")), "hi");
        assert_eq!(
            preview_of(&MessageBody::Emoji {
                emoji: ":wave:".to_string()
            }),
            ":wave:"
        );
        assert_eq!(
            preview_of(&MessageBody::File {
                file_url: "blob://a".to_string(),
                file_kind: FileKind::Document,
                caption: Some("Q3 report".to_string()),
            }),
            "Q3 report"
        );
        assert_eq!(
            preview_of(&MessageBody::Audio {
                audio_url: "blob://v".to_string(),
                duration_secs: 12,
            }),
            "[voice message]"
        );
    }
}
