//! Emoji reactions. One row per `(message, user, emoji)`; toggling removes
//! the row if present and inserts it otherwise.

use std::collections::{BTreeMap, HashMap};

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::convert::{fmt_ts, now, ts_at, uuid_at};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::messages::get_message;
use crate::models::{Reaction, ReactionToggle, User};
use crate::participants::require_participant;

impl Database {
    /// Flip the caller's `emoji` reaction on a message.
    ///
    /// The delete-or-insert runs under a write lock, so an odd number of
    /// toggles by the same user always leaves exactly one row.
    pub fn toggle_reaction(
        &self,
        message_id: Uuid,
        caller: &User,
        emoji: &str,
    ) -> Result<ReactionToggle> {
        let emoji = emoji.trim();
        if emoji.is_empty() {
            return Err(StoreError::Validation("emoji is required".into()));
        }

        let tx = self.write_txn()?;
        let message = get_message(&tx, message_id)?;
        require_participant(&tx, message.conversation_id, caller.id)?;

        let removed = tx.execute(
            "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
            params![message_id.to_string(), caller.id.to_string(), emoji],
        )?;
        if removed == 0 {
            tx.execute(
                "INSERT INTO reactions (message_id, user_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    message_id.to_string(),
                    caller.id.to_string(),
                    emoji,
                    fmt_ts(now())
                ],
            )?;
        }
        tx.commit()?;

        let applied = removed == 0;
        tracing::debug!(
            msg_id = %message_id,
            user = %caller.id,
            emoji,
            applied,
            "reaction toggled"
        );
        Ok(ReactionToggle { applied })
    }

    /// All reactions on one message, oldest first.
    pub fn list_reactions(&self, message_id: Uuid, caller: &User) -> Result<Vec<Reaction>> {
        let conn = self.conn();
        let message = get_message(conn, message_id)?;
        require_participant(conn, message.conversation_id, caller.id)?;

        let mut stmt = conn.prepare_cached(
            "SELECT message_id, user_id, emoji, created_at FROM reactions
             WHERE message_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            Ok(Reaction {
                message_id: uuid_at(row, 0)?,
                user_id: uuid_at(row, 1)?,
                emoji: row.get(2)?,
                created_at: ts_at(row, 3)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

/// Reactions for a batch of messages, grouped as `emoji -> [user_id]`.
pub(crate) fn reactions_for_messages(
    conn: &Connection,
    message_ids: &[Uuid],
) -> Result<HashMap<Uuid, BTreeMap<String, Vec<Uuid>>>> {
    let mut stmt = conn.prepare_cached(
        "SELECT user_id, emoji FROM reactions
         WHERE message_id = ?1
         ORDER BY created_at ASC, rowid ASC",
    )?;

    let mut grouped = HashMap::new();
    for id in message_ids {
        let mut by_emoji: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();
        let mut rows = stmt.query(params![id.to_string()])?;
        while let Some(row) = rows.next()? {
            by_emoji
                .entry(row.get::<_, String>(1)?)
                .or_default()
                .push(uuid_at(row, 0)?);
        }
        if !by_emoji.is_empty() {
            grouped.insert(*id, by_emoji);
        }
    }
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;
    use crate::models::{ConversationKind, NewConversation, NewMessage};
    use crate::testing::user;

    fn setup() -> (Database, User, User, Uuid) {
        seed(Database::open_in_memory().unwrap())
    }

    fn seed(db: Database) -> (Database, User, User, Uuid) {
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let conv = db
            .create_conversation(
                &alice,
                &NewConversation {
                    kind: ConversationKind::Direct,
                    name: None,
                    description: None,
                    participant_ids: vec![bob.id],
                    external_topic: None,
                },
            )
            .unwrap();
        let msg = db
            .send_message(&alice, conv, &NewMessage::text("react to me"))
            .unwrap();
        (db, alice, bob, msg)
    }

    fn rows_for(db: &Database, msg: Uuid, who: Uuid, emoji: &str) -> i64 {
        db.conn()
            .query_row(
                "SELECT COUNT(*) FROM reactions
                 WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                params![msg.to_string(), who.to_string(), emoji],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn toggle_parity_decides_presence() {
        let (db, _alice, bob, msg) = setup();

        for n in 1..=5 {
            let outcome = db.toggle_reaction(msg, &bob, "👍").unwrap();
            let expected = n % 2 == 1;
            assert_eq!(outcome.applied, expected);
            assert_eq!(rows_for(&db, msg, bob.id, "👍"), i64::from(expected));
        }
    }

    #[test]
    fn reactions_are_grouped_per_emoji_in_listing() {
        let (db, alice, bob, msg) = setup();
        db.toggle_reaction(msg, &bob, "🔥").unwrap();
        db.toggle_reaction(msg, &alice, "🔥").unwrap();
        db.toggle_reaction(msg, &alice, "👀").unwrap();

        let conv = db.get_message(msg, &alice).unwrap().conversation_id;
        let page = db.list_messages(conv, &alice, None, None).unwrap();
        let reactions = &page.messages[0].reactions;
        assert_eq!(reactions["🔥"], vec![bob.id, alice.id]);
        assert_eq!(reactions["👀"], vec![alice.id]);
        assert_eq!(db.list_reactions(msg, &bob).unwrap().len(), 3);
    }

    #[test]
    fn outsiders_and_blank_emoji_are_rejected() {
        let (db, _alice, bob, msg) = setup();
        let mallory = user(&db, "mallory");

        assert!(matches!(
            db.toggle_reaction(msg, &mallory, "👍"),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            db.toggle_reaction(msg, &bob, "  "),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            db.toggle_reaction(Uuid::new_v4(), &bob, "👍"),
            Err(StoreError::NotFound("Message"))
        ));
    }

    #[test]
    fn concurrent_toggles_never_duplicate_a_reaction() {
        const TOGGLERS: usize = 5;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reactions.db");
        let (setup, _alice, bob, msg) = seed(Database::open_at(&path).unwrap());

        let barrier = Arc::new(Barrier::new(TOGGLERS));
        let handles: Vec<_> = (0..TOGGLERS)
            .map(|_| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                let bob = bob.clone();
                thread::spawn(move || {
                    let db = Database::open_at(&path).unwrap();
                    barrier.wait();
                    db.toggle_reaction(msg, &bob, "👍").unwrap().applied
                })
            })
            .collect();
        let applied = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|applied| *applied)
            .count();

        // Five serialized toggles: three inserts, two deletes.
        assert_eq!(applied, 3);
        assert_eq!(rows_for(&setup, msg, bob.id, "👍"), 1);
    }
}
