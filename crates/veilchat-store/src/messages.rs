//! Append-only message log.
//!
//! Messages are never removed: edits replace the content reference, deletes
//! stamp `deleted_at`, and status moves along `sending -> sent -> delivered`
//! (or to `failed`). Every write that can change which message is latest also
//! rewrites the conversation summary inside the same transaction.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::conversations::{patch_summary, refresh_summary};
use crate::convert::{fmt_ts, now, opt_ts_at, opt_uuid_at, tag_at, ts_at, uuid_at};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    MediaRef, Message, MessageBody, MessageKind, MessagePage, MessageStatus, MessageView,
    NewMessage, PaymentFields, User,
};
use crate::participants::require_participant;
use crate::reactions::reactions_for_messages;
use crate::users::users_by_ids;

/// Page size when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: i64 = 50;
/// Largest page a caller can get, whatever it asks for.
pub const MAX_PAGE_SIZE: i64 = 200;

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, kind, content, transport_id, \
     media_cid, media_key, token_address, token_amount, transaction_hash, reply_to_id, status, \
     created_at, edited_at, deleted_at, seq";

/// Clamp a requested page size into `[1, MAX_PAGE_SIZE]`.
pub fn page_size(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE)
}

impl Database {
    /// Append a message from `caller`. The message starts out `sent`.
    pub fn send_message(
        &self,
        caller: &User,
        conversation_id: Uuid,
        new: &NewMessage,
    ) -> Result<Uuid> {
        let tx = self.write_txn()?;
        require_participant(&tx, conversation_id, caller.id)?;
        validate_body(&new.body)?;

        if let Some(reply_to) = new.reply_to_id {
            let parent = get_message(&tx, reply_to)?;
            if parent.conversation_id != conversation_id {
                return Err(StoreError::NotFound("Message"));
            }
        }

        let id = Uuid::new_v4();
        let created_at = now();
        let media = new.body.media();
        let payment = new.body.payment();
        tx.execute(
            "INSERT INTO messages
                 (id, conversation_id, sender_id, kind, content, transport_id, media_cid,
                  media_key, token_address, token_amount, transaction_hash, reply_to_id,
                  status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                id.to_string(),
                conversation_id.to_string(),
                caller.id.to_string(),
                new.body.kind().as_str(),
                new.body.content(),
                new.transport_id,
                media.map(|m| m.cid.as_str()),
                media.and_then(|m| m.key.as_deref()),
                payment.map(|p| p.token_address.as_str()),
                payment.map(|p| p.amount.as_str()),
                payment.and_then(|p| p.transaction_hash.as_deref()),
                new.reply_to_id.map(|r| r.to_string()),
                MessageStatus::Sent.as_str(),
                fmt_ts(created_at),
            ],
        )?;
        patch_summary(&tx, conversation_id, created_at, &new.body.preview())?;
        tx.commit()?;

        tracing::info!(
            msg_id = %id,
            conversation = %conversation_id,
            sender = %caller.id,
            kind = %new.body.kind(),
            "message sent"
        );
        Ok(id)
    }

    /// One page of active (non-deleted) messages, oldest first.
    ///
    /// Without a cursor this is the newest page; pass the returned
    /// `next_cursor` to walk back through older messages.
    pub fn list_messages(
        &self,
        conversation_id: Uuid,
        caller: &User,
        limit: Option<i64>,
        cursor: Option<&str>,
    ) -> Result<MessagePage> {
        let conn = self.conn();
        require_participant(conn, conversation_id, caller.id)?;

        let limit = page_size(limit);
        let before = cursor.map(Cursor::decode).transpose()?;

        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?1
               AND deleted_at IS NULL
               AND (?2 IS NULL OR created_at < ?2 OR (created_at = ?2 AND seq < ?3))
             ORDER BY created_at DESC, seq DESC
             LIMIT ?4"
        ))?;
        let rows = stmt.query_map(
            params![
                conversation_id.to_string(),
                before.as_ref().map(|c| fmt_ts(c.created_at)),
                before.as_ref().map(|c| c.seq),
                limit + 1,
            ],
            |row| Ok((row_to_message(row)?, row.get::<_, i64>(16)?)),
        )?;

        let mut newest_first = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        let has_more = newest_first.len() as i64 > limit;
        newest_first.truncate(limit as usize);

        let next_cursor = if has_more {
            newest_first.last().map(|(message, seq)| {
                Cursor {
                    created_at: message.created_at,
                    seq: *seq,
                }
                .encode()
            })
        } else {
            None
        };

        let messages: Vec<Message> = newest_first.into_iter().rev().map(|(m, _)| m).collect();
        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
        let sender_ids: Vec<Uuid> = messages.iter().map(|m| m.sender_id).collect();

        let senders = users_by_ids(conn, &sender_ids)?;
        let mut reactions = reactions_for_messages(conn, &ids)?;

        let messages = messages
            .into_iter()
            .map(|message| MessageView {
                sender: senders.get(&message.sender_id).cloned(),
                reactions: reactions.remove(&message.id).unwrap_or_default(),
                message,
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            conversation = %conversation_id,
            count = messages.len(),
            has_more,
            "listed messages"
        );
        Ok(MessagePage {
            messages,
            next_cursor,
        })
    }

    /// Fetch one message, deleted or not, for a participant of its conversation.
    pub fn get_message(&self, id: Uuid, caller: &User) -> Result<Message> {
        let message = get_message(self.conn(), id)?;
        require_participant(self.conn(), message.conversation_id, caller.id)?;
        Ok(message)
    }

    /// Replace the content of the caller's own message.
    pub fn edit_message(&self, id: Uuid, caller: &User, content: &str) -> Result<()> {
        let tx = self.write_txn()?;
        let mut message = own_message(&tx, id, caller)?;
        if message.body.kind() == MessageKind::Text && content.trim().is_empty() {
            return Err(StoreError::Validation(
                "message content is required for text messages".into(),
            ));
        }
        message.body.set_content(content.to_string());

        tx.execute(
            "UPDATE messages SET content = ?2, edited_at = ?3 WHERE id = ?1",
            params![id.to_string(), message.body.content(), fmt_ts(now())],
        )?;
        refresh_summary(&tx, message.conversation_id)?;
        tx.commit()?;

        tracing::info!(msg_id = %id, "message edited");
        Ok(())
    }

    /// Soft-delete the caller's own message. The row and its content stay;
    /// only `deleted_at` marks it inactive. Repeated deletes keep the first
    /// timestamp.
    pub fn delete_message(&self, id: Uuid, caller: &User) -> Result<()> {
        let tx = self.write_txn()?;
        let message = own_message(&tx, id, caller)?;

        tx.execute(
            "UPDATE messages SET deleted_at = COALESCE(deleted_at, ?2) WHERE id = ?1",
            params![id.to_string(), fmt_ts(now())],
        )?;
        refresh_summary(&tx, message.conversation_id)?;
        tx.commit()?;

        tracing::info!(msg_id = %id, "message deleted");
        Ok(())
    }

    /// Set the delivery status of the caller's own message.
    ///
    /// Transitions are not checked against the state machine; the sender's
    /// client is trusted to move forward.
    pub fn set_message_status(&self, id: Uuid, caller: &User, status: MessageStatus) -> Result<()> {
        let tx = self.write_txn()?;
        own_message(&tx, id, caller)?;
        tx.execute(
            "UPDATE messages SET status = ?2 WHERE id = ?1",
            params![id.to_string(), status.as_str()],
        )?;
        tx.commit()?;

        tracing::debug!(msg_id = %id, status = %status, "message status updated");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn get_message(conn: &Connection, id: Uuid) -> Result<Message> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
        params![id.to_string()],
        row_to_message,
    )
    .map_err(StoreError::not_found("Message"))
}

/// Newest message of the conversation that is not deleted.
pub(crate) fn latest_active_message(
    conn: &Connection,
    conversation_id: Uuid,
) -> Result<Option<Message>> {
    conn.query_row(
        &format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?1 AND deleted_at IS NULL
             ORDER BY created_at DESC, seq DESC
             LIMIT 1"
        ),
        params![conversation_id.to_string()],
        row_to_message,
    )
    .optional()
    .map_err(StoreError::Sqlite)
}

/// Load a message the caller may mutate: it must exist and be theirs.
fn own_message(conn: &Connection, id: Uuid, caller: &User) -> Result<Message> {
    let message = get_message(conn, id)?;
    if message.sender_id != caller.id {
        return Err(StoreError::Forbidden(
            "can only modify your own messages".into(),
        ));
    }
    Ok(message)
}

fn validate_body(body: &MessageBody) -> Result<()> {
    match body {
        MessageBody::Text { content } if content.trim().is_empty() => Err(StoreError::Validation(
            "message content is required for text messages".into(),
        )),
        MessageBody::Image { media, .. }
        | MessageBody::Audio { media, .. }
        | MessageBody::File { media, .. }
            if media.cid.trim().is_empty() =>
        {
            Err(StoreError::Validation("media CID is required".into()))
        }
        MessageBody::Payment { payment, .. }
            if payment.token_address.trim().is_empty() || payment.amount.trim().is_empty() =>
        {
            Err(StoreError::Validation(
                "token address and amount are required for payments".into(),
            ))
        }
        _ => Ok(()),
    }
}

/// Position in a conversation's log: strictly before `(created_at, seq)`.
struct Cursor {
    created_at: DateTime<Utc>,
    seq: i64,
}

impl Cursor {
    fn encode(&self) -> String {
        let raw = format!("{}:{}", self.created_at.timestamp_micros(), self.seq);
        URL_SAFE_NO_PAD.encode(raw)
    }

    fn decode(token: &str) -> Result<Self> {
        let invalid = || StoreError::Validation("invalid cursor".into());

        let bytes = URL_SAFE_NO_PAD.decode(token.trim()).map_err(|_| invalid())?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (micros, seq) = raw.split_once(':').ok_or_else(invalid)?;
        let micros: i64 = micros.parse().map_err(|_| invalid())?;
        let seq: i64 = seq.parse().map_err(|_| invalid())?;

        Ok(Self {
            created_at: DateTime::from_timestamp_micros(micros).ok_or_else(invalid)?,
            seq,
        })
    }
}

fn required<T>(value: Option<T>, idx: usize, column: &str) -> rusqlite::Result<T> {
    value.ok_or_else(|| rusqlite::Error::InvalidColumnType(idx, column.to_string(), Type::Null))
}

/// Map a row selected with [`MESSAGE_COLUMNS`] to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let kind: MessageKind = tag_at(row, 3)?;
    let content: Option<String> = row.get(4)?;

    let media = |row: &rusqlite::Row<'_>| -> rusqlite::Result<MediaRef> {
        Ok(MediaRef {
            cid: required(row.get(6)?, 6, "media_cid")?,
            key: row.get(7)?,
        })
    };

    let body = match kind {
        MessageKind::Text => MessageBody::Text {
            content: content.unwrap_or_default(),
        },
        MessageKind::Image => MessageBody::Image {
            media: media(row)?,
            content,
        },
        MessageKind::Audio => MessageBody::Audio {
            media: media(row)?,
            content,
        },
        MessageKind::File => MessageBody::File {
            media: media(row)?,
            content,
        },
        MessageKind::Payment => MessageBody::Payment {
            payment: PaymentFields {
                token_address: required(row.get(8)?, 8, "token_address")?,
                amount: required(row.get(9)?, 9, "token_amount")?,
                transaction_hash: row.get(10)?,
            },
            content,
        },
    };

    Ok(Message {
        id: uuid_at(row, 0)?,
        conversation_id: uuid_at(row, 1)?,
        sender_id: uuid_at(row, 2)?,
        body,
        transport_id: row.get(5)?,
        reply_to_id: opt_uuid_at(row, 11)?,
        status: tag_at(row, 12)?,
        created_at: ts_at(row, 13)?,
        edited_at: opt_ts_at(row, 14)?,
        deleted_at: opt_ts_at(row, 15)?,
    })
}
