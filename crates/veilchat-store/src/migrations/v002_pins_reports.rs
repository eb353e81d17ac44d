use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Content-addressed media pins, one row per CID
CREATE TABLE IF NOT EXISTS pins (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    cid          TEXT NOT NULL UNIQUE,
    filename     TEXT,
    size         INTEGER,
    content_type TEXT,
    pinned_by    TEXT NOT NULL,
    is_pinned    INTEGER NOT NULL DEFAULT 1,  -- boolean 0/1
    pin_service  TEXT,                        -- "pinata", "infura", ...
    created_at   TEXT NOT NULL,

    FOREIGN KEY (pinned_by) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_pins_pinned_by ON pins(pinned_by);

-- Moderation reports
CREATE TABLE IF NOT EXISTS reports (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    message_id  TEXT NOT NULL,
    reported_by TEXT NOT NULL,
    reason      TEXT NOT NULL,
    description TEXT,
    status      TEXT NOT NULL DEFAULT 'pending', -- pending|reviewed|resolved
    reviewed_by TEXT,
    reviewed_at TEXT,
    created_at  TEXT NOT NULL,

    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
    FOREIGN KEY (reported_by) REFERENCES users(id),
    FOREIGN KEY (reviewed_by) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_reports_status ON reports(status);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
