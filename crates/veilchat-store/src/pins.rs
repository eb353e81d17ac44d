//! Registry of media pinned on external content-addressed storage.
//!
//! One record per CID. Pinning is idempotent and never overwrites metadata;
//! unpinning only flips `is_pinned`, so the history of who pinned what stays.

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::convert::{fmt_ts, now, ts_at, uuid_at};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{PinMetadata, PinRecord, PinView, User};
use crate::users::users_by_ids;

const PIN_COLUMNS: &str =
    "id, cid, filename, size, content_type, pinned_by, is_pinned, pin_service, created_at";

impl Database {
    /// Register `cid` as pinned by `caller` and return the record id.
    ///
    /// If the CID is already known its existing id comes back unchanged,
    /// whoever pinned it first and whether or not it is still pinned.
    pub fn pin_content(&self, caller: &User, cid: &str, meta: &PinMetadata) -> Result<Uuid> {
        let cid = cid.trim();
        if cid.is_empty() {
            return Err(StoreError::Validation("CID is required".into()));
        }

        let tx = self.write_txn()?;
        let inserted = tx.execute(
            "INSERT INTO pins
                 (id, cid, filename, size, content_type, pinned_by, is_pinned, pin_service,
                  created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8)
             ON CONFLICT(cid) DO NOTHING",
            params![
                Uuid::new_v4().to_string(),
                cid,
                meta.filename,
                meta.size,
                meta.content_type,
                caller.id.to_string(),
                meta.pin_service,
                fmt_ts(now()),
            ],
        )?;
        let pin = pin_by_cid(&tx, cid)?;
        tx.commit()?;

        if inserted > 0 {
            tracing::info!(cid, pin_id = %pin.id, pinned_by = %caller.id, "content pinned");
        } else {
            tracing::debug!(cid, pin_id = %pin.id, "content already registered");
        }
        Ok(pin.id)
    }

    /// Mark a CID as no longer pinned. Global admins only.
    pub fn unpin_content(&self, cid: &str, caller: &User) -> Result<()> {
        require_global_admin(caller)?;

        let affected = self.conn().execute(
            "UPDATE pins SET is_pinned = 0 WHERE cid = ?1",
            params![cid.trim()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound("Pin"));
        }
        tracing::info!(cid, by = %caller.id, "content unpinned");
        Ok(())
    }

    /// Every pin record, pinned or not, with the user who pinned it.
    pub fn list_all_pins(&self, caller: &User) -> Result<Vec<PinView>> {
        require_global_admin(caller)?;

        let conn = self.conn();
        let pins = query_pins(
            conn,
            &format!("SELECT {PIN_COLUMNS} FROM pins ORDER BY created_at DESC, rowid DESC"),
            params![],
        )?;
        let pinners: Vec<Uuid> = pins.iter().map(|p| p.pinned_by).collect();
        let users = users_by_ids(conn, &pinners)?;

        Ok(pins
            .into_iter()
            .map(|pin| PinView {
                pinned_by_user: users.get(&pin.pinned_by).cloned(),
                pin,
            })
            .collect())
    }

    /// The caller's own pins that are still active.
    pub fn list_my_pins(&self, caller: &User) -> Result<Vec<PinRecord>> {
        query_pins(
            self.conn(),
            &format!(
                "SELECT {PIN_COLUMNS} FROM pins
                 WHERE pinned_by = ?1 AND is_pinned = 1
                 ORDER BY created_at DESC, rowid DESC"
            ),
            params![caller.id.to_string()],
        )
    }
}

fn require_global_admin(caller: &User) -> Result<()> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(StoreError::Forbidden("admin access required".into()))
    }
}

fn pin_by_cid(conn: &Connection, cid: &str) -> Result<PinRecord> {
    conn.query_row(
        &format!("SELECT {PIN_COLUMNS} FROM pins WHERE cid = ?1"),
        params![cid],
        row_to_pin,
    )
    .map_err(StoreError::not_found("Pin"))
}

fn query_pins(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<PinRecord>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(args, row_to_pin)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(StoreError::Sqlite)
}

fn row_to_pin(row: &rusqlite::Row<'_>) -> rusqlite::Result<PinRecord> {
    Ok(PinRecord {
        id: uuid_at(row, 0)?,
        cid: row.get(1)?,
        filename: row.get(2)?,
        size: row.get(3)?,
        content_type: row.get(4)?,
        pinned_by: uuid_at(row, 5)?,
        is_pinned: row.get(6)?,
        pin_service: row.get(7)?,
        created_at: ts_at(row, 8)?,
    })
}
