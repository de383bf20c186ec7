pub mod config;
pub mod db;
pub mod dispatch;
pub mod governor;
pub mod logger;
pub mod pricing;
pub mod registry;
pub mod server;
pub mod stream;
pub mod usage;

/// Installs a panic hook that routes panic details through the SQLite-backed
/// logger before the default handler runs, and initializes the logger/db.
pub fn bootstrap() {
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());
        crate::logger::error(
            "panic",
            &format!("panic occurred: message='{}', location='{}'", message, location),
        );
        eprintln!("FATAL PANIC: {} at {}", message, location);
    }));

    crate::logger::init();
    crate::db::init();
    crate::registry::validate_startup();
    crate::logger::info("app", "code-relay starting up");
}
