//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` so it can be handed directly to the HTTP
//! layer; the `New*` / `*Update` inputs derive `Deserialize` so request bodies
//! map onto them without an intermediate DTO.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of characters kept in a conversation's `last_message` preview.
pub const PREVIEW_CHARS: usize = 60;

// ---------------------------------------------------------------------------
// Enum tags
// ---------------------------------------------------------------------------

/// A TEXT column held a value no enum variant matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTag(pub String);

impl fmt::Display for UnknownTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown tag: {}", self.0)
    }
}

impl std::error::Error for UnknownTag {}

/// Declares a fieldless enum stored as a lowercase TEXT tag.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $tag:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $tag),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownTag;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($tag => Ok($name::$variant),)+
                    other => Err(UnknownTag(other.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum! {
    /// Global role of a user account.
    UserRole { Admin => "admin", User => "user" }
}

text_enum! {
    /// Direct (two-party by convention) or group conversation.
    ConversationKind { Direct => "direct", Group => "group" }
}

text_enum! {
    /// Role of a user inside one conversation.
    ParticipantRole { Admin => "admin", Member => "member" }
}

text_enum! {
    MessageKind {
        Text => "text",
        Image => "image",
        Audio => "audio",
        File => "file",
        Payment => "payment",
    }
}

text_enum! {
    /// Delivery status: `sending -> sent -> delivered`, any state `-> failed`.
    MessageStatus {
        Sending => "sending",
        Sent => "sent",
        Delivered => "delivered",
        Failed => "failed",
    }
}

text_enum! {
    ReportStatus { Pending => "pending", Reviewed => "reviewed", Resolved => "resolved" }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A user account. Identity proofs (wallet signatures) are checked upstream;
/// the store only keeps the resulting profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub wallet_address: Option<String>,
    pub display_name: Option<String>,
    pub ens_name: Option<String>,
    pub xmtp_address: Option<String>,
    pub public_key: Option<String>,
    /// Avatar reference (media CID or URL).
    pub image: Option<String>,
    pub role: UserRole,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Input for [`crate::Database::upsert_user`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    pub wallet_address: String,
    pub display_name: Option<String>,
    pub ens_name: Option<String>,
}

/// Partial profile patch; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub wallet_address: Option<String>,
    pub ens_name: Option<String>,
    pub xmtp_address: Option<String>,
    pub public_key: Option<String>,
    pub image: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub created_by: Uuid,
    pub is_encrypted: bool,
    /// Handle of the external encrypted-transport topic, unique when set.
    pub external_topic: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewConversation {
    pub kind: ConversationKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub participant_ids: Vec<Uuid>,
    #[serde(default)]
    pub external_topic: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
}

/// A participant joined with its user record.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ParticipantView {
    #[serde(flatten)]
    pub user: User,
    #[serde(rename = "participant_role")]
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
}

/// A conversation as returned to readers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub participants: Vec<ParticipantView>,
    /// Messages from others, created after the caller's watermark and not
    /// deleted.
    pub unread_count: u32,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Reference to externally stored, externally encrypted media.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRef {
    pub cid: String,
    /// Encrypted symmetric key for the media object.
    #[serde(default)]
    pub key: Option<String>,
}

/// Payment metadata recorded as an attached fact; settlement is not verified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentFields {
    pub token_address: String,
    pub amount: String,
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

/// Kind-specific message payload. Each variant carries only the fields that
/// kind uses; `content` is the opaque ciphertext reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MessageBody {
    Text {
        content: String,
    },
    Image {
        media: MediaRef,
        #[serde(default)]
        content: Option<String>,
    },
    Audio {
        media: MediaRef,
        #[serde(default)]
        content: Option<String>,
    },
    File {
        media: MediaRef,
        #[serde(default)]
        content: Option<String>,
    },
    Payment {
        payment: PaymentFields,
        #[serde(default)]
        content: Option<String>,
    },
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Text { .. } => MessageKind::Text,
            MessageBody::Image { .. } => MessageKind::Image,
            MessageBody::Audio { .. } => MessageKind::Audio,
            MessageBody::File { .. } => MessageKind::File,
            MessageBody::Payment { .. } => MessageKind::Payment,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            MessageBody::Text { content } => Some(content),
            MessageBody::Image { content, .. }
            | MessageBody::Audio { content, .. }
            | MessageBody::File { content, .. }
            | MessageBody::Payment { content, .. } => content.as_deref(),
        }
    }

    pub fn media(&self) -> Option<&MediaRef> {
        match self {
            MessageBody::Image { media, .. }
            | MessageBody::Audio { media, .. }
            | MessageBody::File { media, .. } => Some(media),
            MessageBody::Text { .. } | MessageBody::Payment { .. } => None,
        }
    }

    pub fn payment(&self) -> Option<&PaymentFields> {
        match self {
            MessageBody::Payment { payment, .. } => Some(payment),
            _ => None,
        }
    }

    /// Replace the content reference, keeping kind-specific fields.
    pub fn set_content(&mut self, new_content: String) {
        match self {
            MessageBody::Text { content } => *content = new_content,
            MessageBody::Image { content, .. }
            | MessageBody::Audio { content, .. }
            | MessageBody::File { content, .. }
            | MessageBody::Payment { content, .. } => *content = Some(new_content),
        }
    }

    /// Summary line shown in conversation listings.
    pub fn preview(&self) -> String {
        match self {
            MessageBody::Text { content } => content.chars().take(PREVIEW_CHARS).collect(),
            other => format!("Sent {}", other.kind()),
        }
    }
}

/// A single chat message. Identity, sender and kind never change after insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    #[serde(flatten)]
    pub body: MessageBody,
    /// Message id assigned by the external encrypted transport, if any.
    pub transport_id: Option<String>,
    pub reply_to_id: Option<Uuid>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Input for [`crate::Database::send_message`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(default)]
    pub transport_id: Option<String>,
    #[serde(default)]
    pub reply_to_id: Option<Uuid>,
}

impl NewMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            body: MessageBody::Text {
                content: content.into(),
            },
            transport_id: None,
            reply_to_id: None,
        }
    }
}

/// A message enriched with its sender and grouped reactions.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender: Option<User>,
    /// emoji -> ids of the users who reacted with it, in reaction order.
    pub reactions: BTreeMap<String, Vec<Uuid>>,
}

/// One page of a conversation, oldest first.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MessagePage {
    pub messages: Vec<MessageView>,
    /// Opaque token for the page of older messages; `None` at the beginning
    /// of the conversation.
    pub next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Reaction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a toggle: `applied` is true when the reaction now exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionToggle {
    pub applied: bool,
}

// ---------------------------------------------------------------------------
// Pin
// ---------------------------------------------------------------------------

/// Registry entry for externally pinned media, one per CID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PinRecord {
    pub id: Uuid,
    pub cid: String,
    pub filename: Option<String>,
    pub size: Option<i64>,
    pub content_type: Option<String>,
    pub pinned_by: Uuid,
    pub is_pinned: bool,
    /// Pinning provider tag ("pinata", "infura", ...).
    pub pin_service: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PinMetadata {
    pub filename: Option<String>,
    pub size: Option<i64>,
    pub content_type: Option<String>,
    pub pin_service: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PinView {
    #[serde(flatten)]
    pub pin: PinRecord,
    pub pinned_by_user: Option<User>,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// A moderation flag raised by a participant against a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Report {
    pub id: Uuid,
    pub message_id: Uuid,
    pub reported_by: Uuid,
    pub reason: String,
    pub description: Option<String>,
    pub status: ReportStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_preview_truncates_on_characters() {
        let body = MessageBody::Text {
            content: "é".repeat(100),
        };
        assert_eq!(body.preview().chars().count(), PREVIEW_CHARS);
    }

    #[test]
    fn non_text_preview_names_the_kind() {
        let body = MessageBody::Audio {
            media: MediaRef {
                cid: "bafy".into(),
                key: None,
            },
            content: None,
        };
        assert_eq!(body.preview(), "Sent audio");
    }

    #[test]
    fn new_message_body_is_tagged_by_kind() {
        let json = serde_json::json!({
            "kind": "payment",
            "payment": { "token_address": "0xabc", "amount": "1.5" },
            "reply_to_id": null
        });
        let msg: NewMessage = serde_json::from_value(json).unwrap();
        assert_eq!(msg.body.kind(), MessageKind::Payment);
        assert_eq!(msg.body.payment().unwrap().amount, "1.5");
        assert!(msg.body.content().is_none());
    }

    #[test]
    fn tags_parse_back() {
        for status in [
            MessageStatus::Sending,
            MessageStatus::Sent,
            MessageStatus::Delivered,
            MessageStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<MessageStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<ParticipantRole>().is_err());
    }
}
