use rusqlite::Connection;
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tenants (
    key                 TEXT PRIMARY KEY,
    name                TEXT NOT NULL,
    routing_number      TEXT NOT NULL,
    instructions        TEXT,
    language            TEXT NOT NULL DEFAULT 'en',
    active              INTEGER NOT NULL DEFAULT 1,
    open_hour           INTEGER,
    close_hour          INTEGER,
    daily_summary_time  TEXT,
    timezone            TEXT,
    broadcast_message   TEXT,
    broadcast_time      TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tenants_routing_number ON tenants (routing_number);

CREATE TABLE IF NOT EXISTS messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_key  TEXT NOT NULL,
    sender_id   TEXT NOT NULL,
    direction   TEXT NOT NULL CHECK (direction IN ('inbound', 'outbound')),
    body        TEXT NOT NULL,
    language    TEXT,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages (tenant_key, sender_id, created_at, id);

CREATE INDEX IF NOT EXISTS idx_messages_tenant_time
    ON messages (tenant_key, created_at);
";

/// Per-connection pragmas. Run on every connection the pool opens.
pub(crate) fn configure(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

pub(crate) fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}
