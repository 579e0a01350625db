//! Logging and crash reporting for the album tools
//!
//! Structured `tracing` output (console + rolling JSON file), a panic hook that
//! writes crash dumps, and a debug-build deadlock watchdog for `parking_lot` locks.

mod panic_hook;
mod logging;

pub use panic_hook::init_panic_hook;
pub use logging::{init_logging, cleanup_old_logs, LogGuard};

use std::path::PathBuf;
use directories::ProjectDirs;

/// Default log directory for the album tools
pub fn log_dir() -> PathBuf {
    ProjectDirs::from("com", "PhotoAlbum", "album_warm")
        .map(|dirs| dirs.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("./logs"))
}

/// Initialize logging, the panic hook and (debug builds) the deadlock watchdog.
///
/// The returned guard flushes the file writer when dropped; keep it alive
/// for the lifetime of `main`.
pub fn init() -> anyhow::Result<LogGuard> {
    let dir = log_dir();
    let guard = init_logging(&dir)?;
    init_panic_hook(dir);

    #[cfg(debug_assertions)]
    init_deadlock_detector();

    Ok(guard)
}

#[cfg(debug_assertions)]
fn init_deadlock_detector() {
    use std::thread;
    use std::time::Duration;

    thread::Builder::new()
        .name("deadlock-watchdog".into())
        .spawn(|| loop {
            thread::sleep(Duration::from_secs(10));
            let deadlocks = parking_lot::deadlock::check_deadlock();
            if deadlocks.is_empty() {
                continue;
            }
            tracing::error!(count = deadlocks.len(), "Deadlock detected");
            for (i, threads) in deadlocks.iter().enumerate() {
                for t in threads {
                    tracing::error!(cycle = i, thread_id = ?t.thread_id(), "{:#?}", t.backtrace());
                }
            }
        })
        .ok();
}
