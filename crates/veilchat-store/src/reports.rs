//! Moderation reports. Participants flag messages; global admins move the
//! report through `pending -> reviewed -> resolved`. No policy is evaluated
//! here, only the status and who set it.

use rusqlite::params;
use uuid::Uuid;

use crate::convert::{fmt_ts, now, opt_ts_at, opt_uuid_at, tag_at, ts_at, uuid_at};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::messages::get_message;
use crate::models::{Report, ReportStatus, User};
use crate::participants::require_participant;

const REPORT_COLUMNS: &str = "id, message_id, reported_by, reason, description, status, \
     reviewed_by, reviewed_at, created_at";

impl Database {
    /// File a report against a message the caller can see.
    pub fn report_message(
        &self,
        message_id: Uuid,
        caller: &User,
        reason: &str,
        description: Option<&str>,
    ) -> Result<Uuid> {
        let tx = self.write_txn()?;
        let message = get_message(&tx, message_id)?;
        require_participant(&tx, message.conversation_id, caller.id)?;

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(StoreError::Validation("a reason is required".into()));
        }

        let id = Uuid::new_v4();
        tx.execute(
            "INSERT INTO reports
                 (id, message_id, reported_by, reason, description, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                message_id.to_string(),
                caller.id.to_string(),
                reason,
                description,
                ReportStatus::Pending.as_str(),
                fmt_ts(now()),
            ],
        )?;
        tx.commit()?;

        tracing::info!(report_id = %id, msg_id = %message_id, by = %caller.id, "message reported");
        Ok(id)
    }

    /// Reports, newest first, optionally filtered by status. Admins only.
    pub fn list_reports(&self, caller: &User, status: Option<ReportStatus>) -> Result<Vec<Report>> {
        if !caller.is_admin() {
            return Err(StoreError::Forbidden("admin access required".into()));
        }

        let mut stmt = self.conn().prepare_cached(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![status.map(|s| s.as_str())], row_to_report)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Set a report's status and stamp the reviewing admin.
    pub fn review_report(&self, id: Uuid, caller: &User, status: ReportStatus) -> Result<Report> {
        if !caller.is_admin() {
            return Err(StoreError::Forbidden("admin access required".into()));
        }

        let tx = self.write_txn()?;
        let affected = tx.execute(
            "UPDATE reports SET status = ?2, reviewed_by = ?3, reviewed_at = ?4 WHERE id = ?1",
            params![
                id.to_string(),
                status.as_str(),
                caller.id.to_string(),
                fmt_ts(now())
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound("Report"));
        }
        let report = tx
            .query_row(
                &format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?1"),
                params![id.to_string()],
                row_to_report,
            )
            .map_err(StoreError::not_found("Report"))?;
        tx.commit()?;

        tracing::info!(report_id = %id, status = %status, by = %caller.id, "report reviewed");
        Ok(report)
    }
}

fn row_to_report(row: &rusqlite::Row<'_>) -> rusqlite::Result<Report> {
    Ok(Report {
        id: uuid_at(row, 0)?,
        message_id: uuid_at(row, 1)?,
        reported_by: uuid_at(row, 2)?,
        reason: row.get(3)?,
        description: row.get(4)?,
        status: tag_at(row, 5)?,
        reviewed_by: opt_uuid_at(row, 6)?,
        reviewed_at: opt_ts_at(row, 7)?,
        created_at: ts_at(row, 8)?,
    })
}
