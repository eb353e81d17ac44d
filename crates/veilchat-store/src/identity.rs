//! Identity resolution: bearer session tokens to principals.
//!
//! Tokens are minted for a user after the upstream wallet-auth service has
//! verified a signature. Only the BLAKE3 hash of a token is persisted, so a
//! leaked database file does not leak live sessions.

use rand::RngCore;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::convert::{fmt_ts, now};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;
use crate::users::{get_user, row_to_user, USER_COLUMNS};

impl Database {
    /// Mint a new session token for `user_id`. The raw token is returned once
    /// and never stored.
    pub fn issue_session(&self, user_id: Uuid) -> Result<String> {
        let tx = self.write_txn()?;
        get_user(&tx, user_id)?;

        let mut raw = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut raw);
        let token = hex::encode(raw);

        tx.execute(
            "INSERT INTO sessions (token_hash, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![hash_token(&token), user_id.to_string(), fmt_ts(now())],
        )?;
        tx.commit()?;

        tracing::info!(user_id = %user_id, "session issued");
        Ok(token)
    }

    /// Resolve the principal behind a request's token.
    ///
    /// A missing, unknown or revoked token is always `NotAuthenticated`; this
    /// never falls back to an anonymous user.
    pub fn resolve_principal(&self, token: Option<&str>) -> Result<User> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(StoreError::NotAuthenticated)?;

        self.conn()
            .query_row(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users
                     WHERE id = (SELECT user_id FROM sessions WHERE token_hash = ?1)"
                ),
                params![hash_token(token)],
                row_to_user,
            )
            .optional()?
            .ok_or(StoreError::NotAuthenticated)
    }

    /// Revoke a token. Returns `true` if it was live.
    pub fn revoke_session(&self, token: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM sessions WHERE token_hash = ?1",
            params![hash_token(token.trim())],
        )?;
        Ok(affected > 0)
    }
}

fn hash_token(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}
