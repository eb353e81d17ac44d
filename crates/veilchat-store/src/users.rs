//! User directory: account upsert, profile edits and the lookup helpers the
//! UI consumes read-only.

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::convert::{fmt_ts, now, opt_ts_at, tag_at, ts_at, uuid_at};
use crate::database::Database;
use crate::error::{is_unique_violation, Result, StoreError};
use crate::models::{NewUser, ProfileUpdate, User, UserRole};

/// Upper bound on prefix-search results.
pub const SEARCH_LIMIT: usize = 10;

pub(crate) const USER_COLUMNS: &str = "id, wallet_address, display_name, ens_name, xmtp_address, \
     public_key, image, role, is_online, last_seen, created_at";

/// [`USER_COLUMNS`] qualified with a table alias, for joins.
pub(crate) fn user_columns(alias: &str) -> String {
    USER_COLUMNS
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Database {
    /// Create the user owning `wallet_address`, or refresh the optional
    /// profile fields of the existing one.
    pub fn upsert_user(&self, new: &NewUser) -> Result<User> {
        let wallet = new.wallet_address.trim();
        if wallet.is_empty() {
            return Err(StoreError::Validation("wallet address is required".into()));
        }

        let tx = self.write_txn()?;
        tx.execute(
            "INSERT INTO users (id, wallet_address, display_name, ens_name, role, created_at)
             VALUES (?1, ?2, ?3, ?4, 'user', ?5)
             ON CONFLICT(wallet_address) DO UPDATE SET
                 display_name = COALESCE(excluded.display_name, users.display_name),
                 ens_name     = COALESCE(excluded.ens_name, users.ens_name)",
            params![
                Uuid::new_v4().to_string(),
                wallet,
                new.display_name,
                new.ens_name,
                fmt_ts(now()),
            ],
        )?;
        let user = user_by_wallet(&tx, wallet)?.ok_or(StoreError::NotFound("User"))?;
        tx.commit()?;

        tracing::info!(user_id = %user.id, wallet = %wallet, "user upserted");
        Ok(user)
    }

    pub fn get_user(&self, id: Uuid) -> Result<User> {
        get_user(self.conn(), id)
    }

    /// Resolve a user by exact wallet address.
    pub fn find_user_by_wallet(&self, wallet_address: &str) -> Result<Option<User>> {
        user_by_wallet(self.conn(), wallet_address.trim())
    }

    /// Patch the caller's profile. Every call also refreshes `last_seen`.
    pub fn update_profile(&self, caller: &User, update: &ProfileUpdate) -> Result<User> {
        let tx = self.write_txn()?;
        tx.execute(
            "UPDATE users SET
                 display_name   = COALESCE(?2, display_name),
                 wallet_address = COALESCE(?3, wallet_address),
                 ens_name       = COALESCE(?4, ens_name),
                 xmtp_address   = COALESCE(?5, xmtp_address),
                 public_key     = COALESCE(?6, public_key),
                 image          = COALESCE(?7, image),
                 last_seen      = ?8
             WHERE id = ?1",
            params![
                caller.id.to_string(),
                update.display_name,
                update.wallet_address.as_deref().map(str::trim),
                update.ens_name,
                update.xmtp_address,
                update.public_key,
                update.image,
                fmt_ts(now()),
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict("wallet address already registered".into())
            } else {
                StoreError::Sqlite(e)
            }
        })?;
        let user = get_user(&tx, caller.id)?;
        tx.commit()?;

        tracing::info!(user_id = %caller.id, "profile updated");
        Ok(user)
    }

    pub fn set_online_status(&self, caller: &User, is_online: bool) -> Result<()> {
        self.conn().execute(
            "UPDATE users SET is_online = ?2, last_seen = ?3 WHERE id = ?1",
            params![caller.id.to_string(), is_online as i32, fmt_ts(now())],
        )?;
        tracing::debug!(user_id = %caller.id, is_online, "online status changed");
        Ok(())
    }

    /// Assign a global role. Only reachable through the admin-token API.
    pub fn set_user_role(&self, user_id: Uuid, role: UserRole) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET role = ?2 WHERE id = ?1",
            params![user_id.to_string(), role.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound("User"));
        }
        tracing::info!(user_id = %user_id, role = %role, "user role changed");
        Ok(())
    }

    /// Case-insensitive prefix search over wallet address, ENS name and
    /// display name. Blank queries return nothing.
    pub fn search_users(&self, query: &str) -> Result<Vec<User>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!("{}%", escape_like(query));

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE wallet_address LIKE ?1 ESCAPE '\\'
                OR ens_name LIKE ?1 ESCAPE '\\'
                OR display_name LIKE ?1 ESCAPE '\\'
             ORDER BY display_name IS NULL, display_name, wallet_address
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![pattern, SEARCH_LIMIT as i64], row_to_user)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Every account, oldest first. Admin only.
    pub fn list_all_users(&self, caller: &User) -> Result<Vec<User>> {
        if !caller.is_admin() {
            return Err(StoreError::Forbidden("admin access required".into()));
        }
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"))?;
        let rows = stmt.query_map([], row_to_user)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

pub(crate) fn get_user(conn: &Connection, id: Uuid) -> Result<User> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![id.to_string()],
        row_to_user,
    )
    .map_err(StoreError::not_found("User"))
}

/// Load several users at once; ids with no row are simply absent.
pub(crate) fn users_by_ids(conn: &Connection, ids: &[Uuid]) -> Result<HashMap<Uuid, User>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))?;
    let mut map = HashMap::new();
    for id in ids {
        if map.contains_key(id) {
            continue;
        }
        if let Some(user) = stmt
            .query_row(params![id.to_string()], row_to_user)
            .optional()?
        {
            map.insert(*id, user);
        }
    }
    Ok(map)
}

fn user_by_wallet(conn: &Connection, wallet: &str) -> Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE wallet_address = ?1"),
        params![wallet],
        row_to_user,
    )
    .optional()
    .map_err(StoreError::Sqlite)
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Map a row selected with [`USER_COLUMNS`] to a [`User`].
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let is_online: i32 = row.get(8)?;
    Ok(User {
        id: uuid_at(row, 0)?,
        wallet_address: row.get(1)?,
        display_name: row.get(2)?,
        ens_name: row.get(3)?,
        xmtp_address: row.get(4)?,
        public_key: row.get(5)?,
        image: row.get(6)?,
        role: tag_at(row, 7)?,
        is_online: is_online != 0,
        last_seen: opt_ts_at(row, 9)?,
        created_at: ts_at(row, 10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{admin, user};

    #[test]
    fn upsert_is_keyed_by_wallet() {
        let db = Database::open_in_memory().unwrap();
        let first = db
            .upsert_user(&NewUser {
                wallet_address: "0xabc".into(),
                display_name: Some("alice".into()),
                ens_name: None,
            })
            .unwrap();
        let second = db
            .upsert_user(&NewUser {
                wallet_address: "0xabc".into(),
                display_name: None,
                ens_name: Some("alice.eth".into()),
            })
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.display_name.as_deref(), Some("alice"));
        assert_eq!(second.ens_name.as_deref(), Some("alice.eth"));
        assert_eq!(second.role, UserRole::User);
    }

    #[test]
    fn blank_wallet_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .upsert_user(&NewUser {
                wallet_address: "   ".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn find_by_wallet() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");

        let found = db.find_user_by_wallet("0xalice").unwrap().unwrap();
        assert_eq!(found.id, alice.id);
        assert!(db.find_user_by_wallet("0xnobody").unwrap().is_none());
    }

    #[test]
    fn search_matches_prefixes_and_caps_results() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..15 {
            user(&db, &format!("bob{i:02}"));
        }
        let carol = user(&db, "carol");
        db.update_profile(
            &carol,
            &ProfileUpdate {
                ens_name: Some("CAROL.eth".into()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(db.search_users("bob").unwrap().len(), SEARCH_LIMIT);
        let by_ens = db.search_users("carol.e").unwrap();
        assert_eq!(by_ens.len(), 1);
        assert_eq!(by_ens[0].id, carol.id);
        assert_eq!(db.search_users("0xcar").unwrap().len(), 1);
        assert!(db.search_users("  ").unwrap().is_empty());
        assert!(db.search_users("%").unwrap().is_empty());
    }

    #[test]
    fn profile_update_patches_only_given_fields() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");

        let updated = db
            .update_profile(
                &alice,
                &ProfileUpdate {
                    image: Some("bafyavatar".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.display_name.as_deref(), Some("alice"));
        assert_eq!(updated.image.as_deref(), Some("bafyavatar"));
        assert!(updated.last_seen.is_some());
    }

    #[test]
    fn profile_update_rejects_taken_wallet() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        user(&db, "bob");

        let err = db
            .update_profile(
                &alice,
                &ProfileUpdate {
                    wallet_address: Some("0xbob".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn online_status_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");

        db.set_online_status(&alice, true).unwrap();
        assert!(db.get_user(alice.id).unwrap().is_online);
        db.set_online_status(&alice, false).unwrap();
        assert!(!db.get_user(alice.id).unwrap().is_online);
    }

    #[test]
    fn listing_all_users_needs_admin() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let root = admin(&db, "root");

        assert!(matches!(
            db.list_all_users(&alice),
            Err(StoreError::Forbidden(_))
        ));
        assert_eq!(db.list_all_users(&root).unwrap().len(), 2);
    }

    #[test]
    fn role_change_on_missing_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.set_user_role(Uuid::new_v4(), UserRole::Admin),
            Err(StoreError::NotFound("User"))
        ));
    }
}
