//! Request log store (C2).
//!
//! A single append-only `request_log` table, shared `app.db` with the
//! [`crate::logger`] module. Rows are never mutated or deleted by the core;
//! the only reader the core itself needs is [`success_rate`], which the
//! health governor polls after every forwarded request.

use once_cell::sync::Lazy;
use rusqlite::{params, Connection};
use std::path::PathBuf;
use tokio::sync::Semaphore;

/// Bounds how many log-insert tasks may be in flight at once. Under a burst
/// that would otherwise queue unboundedly, new inserts are dropped (with a
/// warning) instead of piling up behind a single SQLite writer.
static INSERT_PERMITS: Lazy<Semaphore> = Lazy::new(|| Semaphore::new(64));

/// One forwarded-request outcome, ready to persist.
#[derive(Debug, Clone, Default)]
pub struct RequestLog {
    pub platform: String,
    pub model: String,
    pub provider: String,
    pub http_code: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub reasoning_tokens: i64,
    pub is_stream: bool,
    pub duration_sec: f64,
}

fn db_path() -> PathBuf {
    crate::config::data_dir().join("app.db")
}

fn open_conn() -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path())?;
    conn.busy_timeout(std::time::Duration::from_millis(5000))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(conn)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let found = stmt.query_map([], |row| row.get::<_, String>(1));
    match found {
        Ok(rows) => rows.filter_map(|r| r.ok()).any(|name| name == column),
        Err(_) => false,
    }
}

fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS request_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform TEXT NOT NULL,
            model TEXT NOT NULL,
            provider TEXT NOT NULL,
            http_code INTEGER NOT NULL,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            cache_create_tokens INTEGER NOT NULL DEFAULT 0,
            cache_read_tokens INTEGER NOT NULL DEFAULT 0,
            reasoning_tokens INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    // Schema-evolution: columns added after the table's first release.
    for (column, ddl) in [
        ("created_at", "ALTER TABLE request_log ADD COLUMN created_at TEXT"),
        ("is_stream", "ALTER TABLE request_log ADD COLUMN is_stream INTEGER NOT NULL DEFAULT 0"),
        ("duration_sec", "ALTER TABLE request_log ADD COLUMN duration_sec REAL NOT NULL DEFAULT 0"),
    ] {
        if !column_exists(conn, "request_log", column) {
            conn.execute(ddl, [])?;
        }
    }

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_request_log_platform_provider_created
         ON request_log(platform, provider, created_at)",
        [],
    )?;
    Ok(())
}

/// Initializes the request log store. Failures are logged and swallowed:
/// the relay must keep serving traffic even with persistence unavailable.
pub fn init() {
    match open_conn().and_then(|conn| ensure_schema(&conn)) {
        Ok(()) => {}
        Err(e) => crate::logger::error("db", &format!("failed to initialize request_log: {}", e)),
    }
}

/// Appends one row. Never propagates failure to the caller; callers invoke
/// this from a fire-and-forget task per the concurrency model.
pub fn insert(record: &RequestLog) {
    let conn = match open_conn() {
        Ok(c) => c,
        Err(e) => {
            crate::logger::error("db", &format!("request_log insert: connection failed: {}", e));
            return;
        }
    };
    let created_at = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let result = conn.execute(
        "INSERT INTO request_log
            (platform, model, provider, http_code, input_tokens, output_tokens,
             cache_create_tokens, cache_read_tokens, reasoning_tokens, is_stream,
             duration_sec, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            record.platform,
            record.model,
            record.provider,
            record.http_code,
            record.input_tokens,
            record.output_tokens,
            record.cache_create_tokens,
            record.cache_read_tokens,
            record.reasoning_tokens,
            record.is_stream as i64,
            record.duration_sec,
            created_at,
        ],
    );
    if let Err(e) = result {
        crate::logger::error("db", &format!("request_log insert failed: {}", e));
    }
}

/// Spawns a fire-and-forget insert of `record`, gated by a small in-flight
/// permit pool. Called from the request path; never blocks the caller.
pub fn spawn_insert(record: RequestLog) {
    let permit = match INSERT_PERMITS.try_acquire() {
        Ok(p) => p,
        Err(_) => {
            crate::logger::warn("db", "request_log insert backlog full, dropping row");
            return;
        }
    };
    tokio::spawn(async move {
        let _permit = permit;
        insert(&record);
    });
}

/// Rolling success rate for `provider` on `platform` since local midnight.
/// A row counts as success iff `200 <= http_code < 300`; a transport
/// failure (`http_code = 0`) always counts as failure.
pub fn success_rate(platform: &str, provider: &str) -> (f64, i64) {
    let conn = match open_conn() {
        Ok(c) => c,
        Err(e) => {
            crate::logger::error("db", &format!("success_rate: connection failed: {}", e));
            return (1.0, 0);
        }
    };
    let start_of_today = chrono::Local::now().format("%Y-%m-%d 00:00:00").to_string();

    let result: rusqlite::Result<(i64, i64)> = conn.query_row(
        "SELECT
            COUNT(*),
            SUM(CASE WHEN http_code >= 200 AND http_code < 300 THEN 1 ELSE 0 END)
         FROM request_log
         WHERE platform = ?1 AND provider = ?2 AND created_at >= ?3",
        params![platform, provider, start_of_today],
        |row| Ok((row.get(0)?, row.get::<_, Option<i64>>(1)?.unwrap_or(0))),
    );

    match result {
        Ok((total, successes)) if total > 0 => (successes as f64 / total as f64, total),
        Ok(_) => (1.0, 0),
        Err(e) => {
            crate::logger::error("db", &format!("success_rate query failed: {}", e));
            (1.0, 0)
        }
    }
}

/// Test-only accessor: the most recent row's `(http_code, input_tokens,
/// output_tokens, is_stream)` for an exact platform/provider/model match, if
/// any. Lets scenario tests assert on a specific request's logged outcome
/// without reaching into the schema from outside this module.
#[cfg(test)]
pub(crate) fn latest_row_for_test(platform: &str, provider: &str, model: &str) -> Option<(i64, i64, i64, bool)> {
    let conn = open_conn().ok()?;
    conn.query_row(
        "SELECT http_code, input_tokens, output_tokens, is_stream
         FROM request_log
         WHERE platform = ?1 AND provider = ?2 AND model = ?3
         ORDER BY id DESC LIMIT 1",
        params![platform, provider, model],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get::<_, i64>(3)? != 0)),
    )
    .ok()
}
