//! Participant registry and the authorization gate every conversation-scoped
//! operation goes through.
//!
//! Membership rows are keyed by `(conversation_id, user_id)`; the primary key
//! is what turns a concurrent duplicate add into a `Conflict`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::convert::{fmt_ts, now, opt_ts_at, tag_at, ts_at};
use crate::database::Database;
use crate::error::{is_unique_violation, Result, StoreError};
use crate::models::{ParticipantRole, ParticipantView, User};
use crate::users::{row_to_user, user_columns};

impl Database {
    /// Role of `user_id` in the conversation, or `None` when not a member.
    pub fn participant_role(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ParticipantRole>> {
        participant_role(self.conn(), conversation_id, user_id)
    }

    /// Add `user_id` to the conversation. The caller must be an admin
    /// participant; adding an existing member is a `Conflict`.
    pub fn add_participant(
        &self,
        conversation_id: Uuid,
        caller: &User,
        user_id: Uuid,
        role: ParticipantRole,
    ) -> Result<()> {
        let tx = self.write_txn()?;
        require_admin(&tx, conversation_id, caller.id)?;
        crate::users::get_user(&tx, user_id)?;

        insert_participant(&tx, conversation_id, user_id, role, now()).map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict("user is already a participant".into())
            } else {
                StoreError::Sqlite(e)
            }
        })?;
        tx.commit()?;

        tracing::info!(
            conversation = %conversation_id,
            user = %user_id,
            role = %role,
            added_by = %caller.id,
            "participant added"
        );
        Ok(())
    }

    /// Move the caller's read watermark to `at`.
    pub fn mark_read(&self, conversation_id: Uuid, caller: &User, at: DateTime<Utc>) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE participants SET last_read_at = ?3
             WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation_id.to_string(), caller.id.to_string(), fmt_ts(at)],
        )?;
        if affected == 0 {
            return Err(StoreError::NotAParticipant);
        }
        tracing::debug!(conversation = %conversation_id, user = %caller.id, "marked read");
        Ok(())
    }

    /// Members of a conversation with their user records, in join order.
    pub fn list_participants(
        &self,
        conversation_id: Uuid,
        caller: &User,
    ) -> Result<Vec<ParticipantView>> {
        require_participant(self.conn(), conversation_id, caller.id)?;
        participants_of(self.conn(), conversation_id)
    }
}

pub(crate) fn participant_role(
    conn: &Connection,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<Option<ParticipantRole>> {
    conn.query_row(
        "SELECT role FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
        params![conversation_id.to_string(), user_id.to_string()],
        |row| tag_at(row, 0),
    )
    .optional()
    .map_err(StoreError::Sqlite)
}

/// The gate: absence of membership is `Forbidden`, never an empty result.
pub(crate) fn require_participant(
    conn: &Connection,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<ParticipantRole> {
    participant_role(conn, conversation_id, user_id)?.ok_or_else(|| {
        StoreError::Forbidden("not a participant in this conversation".into())
    })
}

pub(crate) fn require_admin(conn: &Connection, conversation_id: Uuid, user_id: Uuid) -> Result<()> {
    match participant_role(conn, conversation_id, user_id)? {
        Some(ParticipantRole::Admin) => Ok(()),
        _ => Err(StoreError::Forbidden("admin access required".into())),
    }
}

/// Plain insert; a duplicate surfaces as a unique violation for the caller to
/// interpret.
pub(crate) fn insert_participant(
    conn: &Connection,
    conversation_id: Uuid,
    user_id: Uuid,
    role: ParticipantRole,
    joined_at: DateTime<Utc>,
) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO participants (conversation_id, user_id, role, joined_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            conversation_id.to_string(),
            user_id.to_string(),
            role.as_str(),
            fmt_ts(joined_at),
        ],
    )
}

/// Insert unless already present. Returns `true` if a row was added.
pub(crate) fn ensure_participant(
    conn: &Connection,
    conversation_id: Uuid,
    user_id: Uuid,
    role: ParticipantRole,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO participants (conversation_id, user_id, role, joined_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(conversation_id, user_id) DO NOTHING",
        params![
            conversation_id.to_string(),
            user_id.to_string(),
            role.as_str(),
            fmt_ts(now()),
        ],
    )?;
    Ok(affected > 0)
}

pub(crate) fn participants_of(
    conn: &Connection,
    conversation_id: Uuid,
) -> Result<Vec<ParticipantView>> {
    // User columns first so `row_to_user` can read them at their usual indices.
    let columns = user_columns("u");
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {columns}, p.role, p.joined_at, p.last_read_at
         FROM participants p
         JOIN users u ON u.id = p.user_id
         WHERE p.conversation_id = ?1
         ORDER BY p.joined_at ASC, u.id ASC"
    ))?;
    let rows = stmt.query_map(params![conversation_id.to_string()], |row| {
        Ok(ParticipantView {
            user: row_to_user(row)?,
            role: tag_at(row, 11)?,
            joined_at: ts_at(row, 12)?,
            last_read_at: opt_ts_at(row, 13)?,
        })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(StoreError::Sqlite)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;
    use crate::models::{ConversationKind, NewConversation};
    use crate::testing::user;

    fn group(db: &Database, creator: &User, members: &[Uuid]) -> Uuid {
        db.create_conversation(
            creator,
            &NewConversation {
                kind: ConversationKind::Group,
                name: Some("team".into()),
                description: None,
                participant_ids: members.to_vec(),
                external_topic: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn creator_is_admin_and_listed_ids_are_members() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let conv = group(&db, &alice, &[bob.id]);

        assert_eq!(
            db.participant_role(conv, alice.id).unwrap(),
            Some(ParticipantRole::Admin)
        );
        assert_eq!(
            db.participant_role(conv, bob.id).unwrap(),
            Some(ParticipantRole::Member)
        );
    }

    #[test]
    fn admin_can_add_member_once() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let carol = user(&db, "carol");
        let conv = group(&db, &alice, &[]);

        db.add_participant(conv, &alice, carol.id, ParticipantRole::Member)
            .unwrap();
        assert_eq!(
            db.participant_role(conv, carol.id).unwrap(),
            Some(ParticipantRole::Member)
        );

        let err = db
            .add_participant(conv, &alice, carol.id, ParticipantRole::Member)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn members_and_outsiders_cannot_add() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let carol = user(&db, "carol");
        let mallory = user(&db, "mallory");
        let conv = group(&db, &alice, &[bob.id]);

        for caller in [&bob, &mallory] {
            let err = db
                .add_participant(conv, caller, carol.id, ParticipantRole::Member)
                .unwrap_err();
            assert!(matches!(err, StoreError::Forbidden(_)));
        }
        assert_eq!(db.participant_role(conv, carol.id).unwrap(), None);
    }

    #[test]
    fn adding_unknown_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let conv = group(&db, &alice, &[]);

        let err = db
            .add_participant(conv, &alice, Uuid::new_v4(), ParticipantRole::Member)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound("User")));
    }

    #[test]
    fn mark_read_requires_membership() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let mallory = user(&db, "mallory");
        let conv = group(&db, &alice, &[]);

        let at = now();
        db.mark_read(conv, &alice, at).unwrap();
        let me = db
            .list_participants(conv, &alice)
            .unwrap()
            .into_iter()
            .find(|p| p.user.id == alice.id)
            .unwrap();
        assert_eq!(me.last_read_at, Some(at));

        assert!(matches!(
            db.mark_read(conv, &mallory, at),
            Err(StoreError::NotAParticipant)
        ));
    }

    #[test]
    fn outsiders_cannot_list_members() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let mallory = user(&db, "mallory");
        let conv = group(&db, &alice, &[]);

        assert!(matches!(
            db.list_participants(conv, &mallory),
            Err(StoreError::Forbidden(_))
        ));
    }

    #[test]
    fn concurrent_adds_of_one_user_yield_one_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adds.db");
        let setup = Database::open_at(&path).unwrap();
        let alice = user(&setup, "alice");
        let carol = user(&setup, "carol");
        let conv = group(&setup, &alice, &[]);

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                let alice = alice.clone();
                thread::spawn(move || {
                    let db = Database::open_at(&path).unwrap();
                    barrier.wait();
                    db.add_participant(conv, &alice, carol.id, ParticipantRole::Member)
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|r| matches!(r, Err(StoreError::Conflict(_))))
                .count(),
            1
        );
        let rows: i64 = setup
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
                params![conv.to_string(), carol.id.to_string()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(rows, 1);
    }
}
