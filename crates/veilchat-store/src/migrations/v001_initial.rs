//! v001 -- Initial schema creation.
//!
//! Creates the conversation core: `users`, `sessions`, `conversations`,
//! `participants`, `messages` and `reactions`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id             TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    wallet_address TEXT UNIQUE,
    display_name   TEXT,
    ens_name       TEXT,
    xmtp_address   TEXT,
    public_key     TEXT,
    image          TEXT,
    role           TEXT NOT NULL DEFAULT 'user', -- 'admin' | 'user'
    is_online      INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    last_seen      TEXT,
    created_at     TEXT NOT NULL                 -- RFC-3339, microseconds
);

CREATE INDEX IF NOT EXISTS idx_users_ens ON users(ens_name);
CREATE INDEX IF NOT EXISTS idx_users_name ON users(display_name);

-- ----------------------------------------------------------------
-- Sessions (blake3 hash of the bearer token, never the token)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS sessions (
    token_hash TEXT PRIMARY KEY NOT NULL,
    user_id    TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    kind            TEXT NOT NULL,              -- 'direct' | 'group'
    name            TEXT,
    description     TEXT,
    avatar          TEXT,                       -- media CID
    created_by      TEXT NOT NULL,
    is_encrypted    INTEGER NOT NULL DEFAULT 1,
    external_topic  TEXT,
    last_message_at TEXT,
    last_message    TEXT,
    created_at      TEXT NOT NULL,

    FOREIGN KEY (created_by) REFERENCES users(id)
);

-- At most one conversation per topic handle (NULLs stay distinct); this is
-- what makes singleton provisioning converge.
CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_topic
    ON conversations(external_topic);
CREATE INDEX IF NOT EXISTS idx_conversations_last_message
    ON conversations(last_message_at DESC);

-- ----------------------------------------------------------------
-- Participants
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS participants (
    conversation_id TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    role            TEXT NOT NULL,              -- 'admin' | 'member'
    joined_at       TEXT NOT NULL,
    last_read_at    TEXT,

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_participants_user ON participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq              INTEGER PRIMARY KEY AUTOINCREMENT,
    id               TEXT NOT NULL UNIQUE,      -- UUID v4
    conversation_id  TEXT NOT NULL,
    sender_id        TEXT NOT NULL,
    kind             TEXT NOT NULL,             -- text|image|audio|file|payment
    content          TEXT,                      -- opaque ciphertext reference
    transport_id     TEXT,                      -- external transport message id
    media_cid        TEXT,
    media_key        TEXT,                      -- encrypted media key
    token_address    TEXT,
    token_amount     TEXT,
    transaction_hash TEXT,
    reply_to_id      TEXT,
    status           TEXT NOT NULL,             -- sending|sent|delivered|failed
    created_at       TEXT NOT NULL,
    edited_at        TEXT,
    deleted_at       TEXT,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id),
    FOREIGN KEY (reply_to_id) REFERENCES messages(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, created_at DESC, seq DESC);
CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id);

-- ----------------------------------------------------------------
-- Reactions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reactions (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    emoji      TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_reactions_message ON reactions(message_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_reactions_unique
    ON reactions(message_id, user_id, emoji);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
