//! v001 -- Initial schema creation.
//!
//! Creates `cafe_clients`, `cafe_client_threads` and `cafe_client_messages`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Registered clients
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS cafe_clients (
    id      TEXT PRIMARY KEY NOT NULL,   -- peer id
    address TEXT NOT NULL,
    created TEXT NOT NULL                -- RFC-3339
);

-- ----------------------------------------------------------------
-- Thread snapshots, one per (thread, client)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS cafe_client_threads (
    id         TEXT NOT NULL,
    client     TEXT NOT NULL,
    ciphertext BLOB NOT NULL,
    updated    TEXT NOT NULL,

    PRIMARY KEY (id, client)
);

CREATE INDEX IF NOT EXISTS idx_cafe_client_threads_client
    ON cafe_client_threads(client);

-- ----------------------------------------------------------------
-- Inbox entries, one per relayed envelope
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS cafe_client_messages (
    id     TEXT NOT NULL,               -- envelope content id
    peer   TEXT NOT NULL,
    client TEXT NOT NULL,
    date   TEXT NOT NULL,

    PRIMARY KEY (id, client)
);

CREATE INDEX IF NOT EXISTS idx_cafe_client_messages_client_date
    ON cafe_client_messages(client, date);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
