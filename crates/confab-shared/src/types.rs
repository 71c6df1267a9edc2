use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque user identity.  User records themselves live in an external
/// user-management system; the core only ever compares and stores ids.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 hex chars, for compact log fields.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RoomId(pub Uuid);

impl RoomId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CallId(pub Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Audio,
    Video,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// Lifecycle state of a call session.
///
/// `Ringing` and `Active` are live; the other three are terminal and
/// immutable once reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Ringing,
    Active,
    Completed,
    Declined,
    Missed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Declined | Self::Missed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ringing => "ringing",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Declined => "declined",
            Self::Missed => "missed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ringing" => Some(Self::Ringing),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "declined" => Some(Self::Declined),
            "missed" => Some(Self::Missed),
            _ => None,
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a call performed an action.  A caller-side decline is a
/// cancellation; a receiver-side decline is a rejection.  Both land in the
/// same `Declined` state, distinguished only by this tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallActor {
    Caller,
    Receiver,
}

impl CallActor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Caller => "caller",
            Self::Receiver => "receiver",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "caller" => Some(Self::Caller),
            "receiver" => Some(Self::Receiver),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Reactions
// ---------------------------------------------------------------------------

/// Closed set of mutually-exclusive reaction kinds.  A user holds at most one
/// kind per subject at any time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Dislike,
}

impl ReactionKind {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Like => Self::Dislike,
            Self::Dislike => Self::Like,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "dislike" => Some(Self::Dislike),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Message bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Video,
    Audio,
    Document,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "document" => Some(Self::Document),
        _ => None,
        }
    }
}

/// Tagged message content.  Each variant carries only the fields that are
/// valid for it, so a voice note cannot accidentally ship with a file kind
/// and a text message cannot carry a duration.  File and audio URLs are
/// opaque strings owned by the external upload pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MessageBody {
    Text {
        text: String,
    },
    Emoji {
        emoji: String,
    },
    File {
        file_url: String,
        file_kind: FileKind,
        /// Optional text caption rendered alongside the file.
        caption: Option<String>,
    },
    Audio {
        audio_url: String,
        duration_secs: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_state_round_trip() {
        for state in [
            CallState::Ringing,
            CallState::Active,
            CallState::Completed,
            CallState::Declined,
            CallState::Missed,
        ] {
            assert_eq!(CallState::parse(state.as_str()), Some(state));
        }
        assert_eq!(CallState::parse("ongoing"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!CallState::Ringing.is_terminal());
        assert!(!CallState::Active.is_terminal());
        assert!(CallState::Completed.is_terminal());
        assert!(CallState::Declined.is_terminal());
        assert!(CallState::Missed.is_terminal());
    }

    #[test]
    fn reaction_opposite_is_involutive() {
        assert_eq!(ReactionKind::Like.opposite(), ReactionKind::Dislike);
        assert_eq!(ReactionKind::Like.opposite().opposite(), ReactionKind::Like);
    }

    #[test]
    fn message_body_serde_tagging() {
        let body = MessageBody::File {
            file_url: "blob://abc".to_string(),
            file_kind: FileKind::Image,
            caption: Some("holiday".to_string()),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"kind\":\"file\""));
        let back: MessageBody = serde_json::from_str(&json).unwrap();
        assert_eq!(back, body);
    }
}
