use rusqlite::Connection;

use crate::error::Result;

/// Initialise the runtime schema in `conn`.
///
/// Creates the `schedules`, `schedule_signals` and `workload_instances`
/// tables (idempotent) plus an index on the due time so the dispatcher's
/// polling query stays cheap with a deep signal queue.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schedules (
            schedule_id TEXT    NOT NULL PRIMARY KEY,
            status      TEXT    NOT NULL,   -- mirrors state.status for listing
            state       TEXT    NOT NULL,   -- JSON-encoded ScheduleState
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS schedule_signals (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            schedule_id      TEXT    NOT NULL,
            operation        TEXT    NOT NULL,   -- JSON-encoded ScheduleOperation
            not_before_secs  INTEGER NOT NULL,   -- Unix seconds
            not_before_nanos INTEGER NOT NULL,   -- sub-second part
            enqueued_at      TEXT    NOT NULL
        ) STRICT;

        -- Polling: WHERE (not_before_secs, not_before_nanos) <= (?, ?) ORDER BY ..., id
        CREATE INDEX IF NOT EXISTS idx_signals_not_before
            ON schedule_signals (not_before_secs, not_before_nanos, id);

        CREATE TABLE IF NOT EXISTS workload_instances (
            instance_id TEXT    NOT NULL PRIMARY KEY,
            schedule_id TEXT    NOT NULL,
            workload    TEXT    NOT NULL,
            input       TEXT,
            status      TEXT    NOT NULL,   -- running | completed | failed | interrupted
            started_at  TEXT    NOT NULL,
            finished_at TEXT
        ) STRICT;
        ",
    )?;
    Ok(())
}
