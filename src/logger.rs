//! Global logger module.
//!
//! Unified logging interface; persists log entries to SQLite asynchronously
//! via a bounded channel drained by a background batch-writer thread.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::{mpsc, Once, RwLock};
use std::time::{Duration, Instant};

static INIT: Once = Once::new();

#[derive(Debug, Clone)]
struct LogMessage {
    timestamp: i64,
    level: String,
    source: String,
    message: String,
    metadata: Option<String>,
}

static LOG_SENDER: RwLock<Option<mpsc::Sender<LogMessage>>> = RwLock::new(None);

// ============================================
// Log level & entry types
// ============================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

// ============================================
// Database functions
// ============================================

fn open_conn() -> Connection {
    Connection::open(crate::config::data_dir().join("app.db")).expect("open log db connection")
}

/// Initializes the logger: creates the table and spawns the batch writer.
/// Idempotent; safe to call multiple times.
pub fn init() {
    INIT.call_once(|| {
        let conn = open_conn();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS global_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                level TEXT NOT NULL,
                source TEXT NOT NULL,
                message TEXT NOT NULL,
                metadata TEXT
            )",
            [],
        )
        .expect("create global_logs table");

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_global_logs_timestamp ON global_logs(timestamp DESC)",
            [],
        )
        .ok();
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_global_logs_level ON global_logs(level)",
            [],
        )
        .ok();
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_global_logs_source ON global_logs(source)",
            [],
        )
        .ok();

        spawn_batch_writer();
    });
}

fn spawn_batch_writer() {
    let (tx, rx) = mpsc::channel::<LogMessage>();

    {
        let mut sender = LOG_SENDER.write().unwrap();
        *sender = Some(tx);
    }

    std::thread::spawn(move || {
        let mut buffer = Vec::with_capacity(100);
        let mut last_flush = Instant::now();
        let flush_interval = Duration::from_secs(1);

        loop {
            let timeout = flush_interval
                .checked_sub(last_flush.elapsed())
                .unwrap_or_else(|| Duration::from_secs(0));

            match rx.recv_timeout(timeout) {
                Ok(msg) => {
                    buffer.push(msg);
                    if buffer.len() >= 100 || last_flush.elapsed() >= flush_interval {
                        flush_logs(&mut buffer);
                        last_flush = Instant::now();
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if !buffer.is_empty() {
                        flush_logs(&mut buffer);
                    }
                    last_flush = Instant::now();
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        if !buffer.is_empty() {
            flush_logs(&mut buffer);
        }
    });
}

fn flush_logs(buffer: &mut Vec<LogMessage>) {
    if buffer.is_empty() {
        return;
    }

    let mut conn = open_conn();
    let tx = match conn.transaction() {
        Ok(tx) => tx,
        Err(_) => return,
    };

    for msg in buffer.drain(..) {
        let _ = tx.execute(
            "INSERT INTO global_logs (timestamp, level, source, message, metadata) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![msg.timestamp, msg.level, msg.source, msg.message, msg.metadata],
        );
    }

    let _ = tx.commit();
}

// ============================================
// Public logging functions
// ============================================

fn log_internal(level: LogLevel, source: &str, message: &str, metadata: Option<&str>) {
    let timestamp = chrono::Utc::now().timestamp();
    let msg = LogMessage {
        timestamp,
        level: level.as_str().to_string(),
        source: source.to_string(),
        message: message.to_string(),
        metadata: metadata.map(|s| s.to_string()),
    };

    if let Some(sender) = LOG_SENDER.read().unwrap().as_ref() {
        let _ = sender.send(msg);
    } else {
        // Logger not initialized yet (e.g. in unit tests): write directly.
        let conn = open_conn();
        let _ = conn.execute(
            "INSERT INTO global_logs (timestamp, level, source, message, metadata) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![timestamp, level.as_str(), source, message, metadata],
        );
    }
}

pub fn debug(source: &str, message: &str) {
    log_internal(LogLevel::Debug, source, message, None);
}

pub fn info(source: &str, message: &str) {
    log_internal(LogLevel::Info, source, message, None);
}

pub fn warn(source: &str, message: &str) {
    log_internal(LogLevel::Warn, source, message, None);
}

pub fn error(source: &str, message: &str) {
    log_internal(LogLevel::Error, source, message, None);
}
