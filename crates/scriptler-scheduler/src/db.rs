use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `schedule_entries` table (idempotent) plus indexes for the two
/// hot queries: lookup by script identity and the due-entry poll.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schedule_entries (
            id          TEXT    NOT NULL PRIMARY KEY,
            identity    TEXT    NOT NULL,   -- script storage location
            period_secs INTEGER,            -- NULL means one-time
            status      TEXT    NOT NULL DEFAULT 'enqueued',
            next_run    TEXT,               -- RFC 3339 (UTC, millis) or NULL
            last_run    TEXT,
            run_count   INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_entries_identity ON schedule_entries (identity);
        CREATE INDEX IF NOT EXISTS idx_entries_next_run ON schedule_entries (next_run);
        ",
    )?;
    Ok(())
}
