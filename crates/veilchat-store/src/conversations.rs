//! Conversation lifecycle, listing, summary fields and singleton provisioning.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::convert::{fmt_ts, now, opt_ts_at, tag_at, ts_at, uuid_at};
use crate::database::Database;
use crate::error::{is_unique_violation, Result, StoreError};
use crate::messages::latest_active_message;
use crate::models::{
    Conversation, ConversationKind, ConversationUpdate, ConversationView, NewConversation,
    ParticipantRole, User,
};
use crate::participants::{
    ensure_participant, insert_participant, participants_of, require_admin, require_participant,
};

/// Reserved topic handle of the global public conversation.
pub const PUBLIC_TOPIC: &str = "public_global";

const CONVERSATION_COLUMNS: &str = "id, kind, name, description, avatar, created_by, is_encrypted, \
     external_topic, last_message_at, last_message, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a conversation with the caller as admin and each listed user as
    /// member. Duplicate ids and the caller's own id are skipped.
    ///
    /// Runs as one transaction: an unknown participant id leaves nothing behind.
    /// The public topic is reserved for [`Database::get_or_create_public_conversation`].
    pub fn create_conversation(&self, caller: &User, new: &NewConversation) -> Result<Uuid> {
        if new.external_topic.as_deref() == Some(PUBLIC_TOPIC) {
            return Err(StoreError::Validation(format!(
                "external topic `{PUBLIC_TOPIC}` is reserved"
            )));
        }

        let members: BTreeSet<Uuid> = new
            .participant_ids
            .iter()
            .copied()
            .filter(|id| *id != caller.id)
            .collect();

        let tx = self.write_txn()?;
        for member in &members {
            crate::users::get_user(&tx, *member)?;
        }

        let id = Uuid::new_v4();
        let created_at = now();
        tx.execute(
            "INSERT INTO conversations
                 (id, kind, name, description, created_by, is_encrypted, external_topic,
                  last_message_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?7)",
            params![
                id.to_string(),
                new.kind.as_str(),
                new.name,
                new.description,
                caller.id.to_string(),
                new.external_topic,
                fmt_ts(created_at),
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict("external topic already in use".into())
            } else {
                StoreError::Sqlite(e)
            }
        })?;

        insert_participant(&tx, id, caller.id, ParticipantRole::Admin, created_at)?;
        for member in &members {
            insert_participant(&tx, id, *member, ParticipantRole::Member, created_at)?;
        }
        tx.commit()?;

        tracing::info!(
            conversation = %id,
            kind = %new.kind,
            creator = %caller.id,
            members = members.len(),
            "conversation created"
        );
        Ok(id)
    }

    /// Return the conversation holding `topic`, creating it on first use, and
    /// make sure the caller is a participant.
    ///
    /// Safe under concurrent first callers, including callers on other
    /// connections: the insert is conditional on the unique topic index and the
    /// row is always re-read afterwards, so every caller converges on the
    /// single winner. Only the caller whose insert won becomes admin.
    pub fn get_or_create_singleton(
        &self,
        topic: &str,
        name: &str,
        description: Option<&str>,
        caller: &User,
    ) -> Result<Uuid> {
        let tx = self.write_txn()?;

        let candidate = Uuid::new_v4();
        let created_at = fmt_ts(now());
        let inserted = tx.execute(
            "INSERT INTO conversations
                 (id, kind, name, description, created_by, is_encrypted, external_topic,
                  last_message_at, created_at)
             VALUES (?1, 'group', ?2, ?3, ?4, 1, ?5, ?6, ?6)
             ON CONFLICT(external_topic) DO NOTHING",
            params![
                candidate.to_string(),
                name,
                description,
                caller.id.to_string(),
                topic,
                created_at,
            ],
        )?;

        let id = conversation_id_by_topic(&tx, topic)?
            .ok_or(StoreError::NotFound("Conversation"))?;
        if inserted > 0 {
            ensure_participant(&tx, id, caller.id, ParticipantRole::Admin)?;
        }
        let joined = ensure_participant(&tx, id, caller.id, ParticipantRole::Member)?;
        tx.commit()?;

        if inserted > 0 {
            tracing::info!(
                conversation = %id,
                topic = %topic,
                creator = %caller.id,
                "singleton conversation created"
            );
        } else if joined {
            tracing::info!(
                conversation = %id,
                topic = %topic,
                user = %caller.id,
                "joined singleton conversation"
            );
        }
        Ok(id)
    }

    /// The global public chat everybody can join.
    pub fn get_or_create_public_conversation(&self, caller: &User) -> Result<Uuid> {
        self.get_or_create_singleton(PUBLIC_TOPIC, "Public", Some("Global public chat"), caller)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Conversations the caller participates in, most recent activity first.
    /// Conversations without activity sort last.
    pub fn list_conversations(&self, caller: &User) -> Result<Vec<ConversationView>> {
        let conn = self.conn();
        let columns = CONVERSATION_COLUMNS
            .split(',')
            .map(|c| format!("c.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {columns}, p.last_read_at
             FROM conversations c
             JOIN participants p ON p.conversation_id = c.id
             WHERE p.user_id = ?1
             ORDER BY c.last_message_at IS NULL, c.last_message_at DESC, c.rowid DESC"
        ))?;
        let rows = stmt.query_map(params![caller.id.to_string()], |row| {
            Ok((row_to_conversation(row)?, opt_ts_at(row, 11)?))
        })?;

        let mut views = Vec::new();
        for row in rows {
            let (conversation, last_read_at) = row?;
            views.push(ConversationView {
                participants: participants_of(conn, conversation.id)?,
                unread_count: unread_count(conn, conversation.id, caller.id, last_read_at)?,
                conversation,
            });
        }

        tracing::debug!(user = %caller.id, count = views.len(), "listed conversations");
        Ok(views)
    }

    pub fn get_conversation(&self, id: Uuid, caller: &User) -> Result<ConversationView> {
        let conn = self.conn();
        require_participant(conn, id, caller.id)?;

        let conversation = get_conversation(conn, id)?;
        let last_read_at = conn.query_row(
            "SELECT last_read_at FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
            params![id.to_string(), caller.id.to_string()],
            |row| opt_ts_at(row, 0),
        )?;

        Ok(ConversationView {
            participants: participants_of(conn, id)?,
            unread_count: unread_count(conn, id, caller.id, last_read_at)?,
            conversation,
        })
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Change name, description or avatar. Conversation admins only.
    pub fn update_conversation(
        &self,
        id: Uuid,
        caller: &User,
        update: &ConversationUpdate,
    ) -> Result<Conversation> {
        let tx = self.write_txn()?;
        require_admin(&tx, id, caller.id)?;
        tx.execute(
            "UPDATE conversations SET
                 name        = COALESCE(?2, name),
                 description = COALESCE(?3, description),
                 avatar      = COALESCE(?4, avatar)
             WHERE id = ?1",
            params![
                id.to_string(),
                update.name,
                update.description,
                update.avatar,
            ],
        )?;
        let conversation = get_conversation(&tx, id)?;
        tx.commit()?;

        tracing::info!(conversation = %id, by = %caller.id, "conversation updated");
        Ok(conversation)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn get_conversation(conn: &Connection, id: Uuid) -> Result<Conversation> {
    conn.query_row(
        &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
        params![id.to_string()],
        row_to_conversation,
    )
    .map_err(StoreError::not_found("Conversation"))
}

fn conversation_id_by_topic(conn: &Connection, topic: &str) -> Result<Option<Uuid>> {
    conn.query_row(
        "SELECT id FROM conversations WHERE external_topic = ?1",
        params![topic],
        |row| uuid_at(row, 0),
    )
    .optional()
    .map_err(StoreError::Sqlite)
}

/// Point the summary fields at a freshly sent message.
pub(crate) fn patch_summary(
    conn: &Connection,
    conversation_id: Uuid,
    at: DateTime<Utc>,
    preview: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET last_message_at = ?2, last_message = ?3 WHERE id = ?1",
        params![conversation_id.to_string(), fmt_ts(at), preview],
    )?;
    Ok(())
}

/// Recompute the summary from the log after the latest message changed.
/// With no active message left, the preview clears and the timestamp falls
/// back to the conversation's creation time.
pub(crate) fn refresh_summary(conn: &Connection, conversation_id: Uuid) -> Result<()> {
    match latest_active_message(conn, conversation_id)? {
        Some(message) => patch_summary(
            conn,
            conversation_id,
            message.created_at,
            &message.body.preview(),
        ),
        None => {
            conn.execute(
                "UPDATE conversations SET last_message_at = created_at, last_message = NULL
                 WHERE id = ?1",
                params![conversation_id.to_string()],
            )?;
            Ok(())
        }
    }
}

fn unread_count(
    conn: &Connection,
    conversation_id: Uuid,
    user_id: Uuid,
    last_read_at: Option<DateTime<Utc>>,
) -> Result<u32> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages
         WHERE conversation_id = ?1
           AND sender_id != ?2
           AND deleted_at IS NULL
           AND (?3 IS NULL OR created_at > ?3)",
        params![
            conversation_id.to_string(),
            user_id.to_string(),
            last_read_at.map(fmt_ts),
        ],
        |row| row.get(0),
    )?;
    Ok(u32::try_from(count).unwrap_or(u32::MAX))
}

/// Map a row selected with [`CONVERSATION_COLUMNS`] to a [`Conversation`].
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let is_encrypted: i32 = row.get(6)?;
    Ok(Conversation {
        id: uuid_at(row, 0)?,
        kind: tag_at::<ConversationKind>(row, 1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        avatar: row.get(4)?,
        created_by: uuid_at(row, 5)?,
        is_encrypted: is_encrypted != 0,
        external_topic: row.get(7)?,
        last_message_at: opt_ts_at(row, 8)?,
        last_message: row.get(9)?,
        created_at: ts_at(row, 10)?,
    })
}
