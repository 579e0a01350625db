//! Crash dumps on panic

use backtrace::Backtrace;
use chrono::Local;
use std::any::Any;
use std::io;
use std::panic::PanicHookInfo;
use std::path::{Path, PathBuf};

/// Install a hook that reports panics to stderr and the log, and writes a
/// crash dump into `dump_dir` (falling back to the temp dir).
pub fn init_panic_hook(dump_dir: PathBuf) {
    std::panic::set_hook(Box::new(move |info| {
        let report = crash_report(info, &Backtrace::new());
        eprintln!("{}", report);

        // lost if the subscriber's worker is already gone
        tracing::error!("{}", report);

        let written = write_crash_dump(&dump_dir, &report)
            .or_else(|_| write_crash_dump(&std::env::temp_dir(), &report));
        match written {
            Ok(path) => eprintln!("Crash dump written to {}", path.display()),
            Err(e) => eprintln!("Failed to write crash dump: {}", e),
        }
    }));
    tracing::debug!("Panic hook initialized");
}

fn crash_report(info: &PanicHookInfo, backtrace: &Backtrace) -> String {
    let thread = std::thread::current();
    format!(
        "=== album_warm {} panic ===\n\
         Timestamp: {}\n\
         Thread: {}\n\
         Location: {}\n\
         Payload: {}\n\n\
         Stack Trace:\n{:?}",
        env!("CARGO_PKG_VERSION"),
        Local::now().to_rfc3339(),
        thread.name().unwrap_or("<unnamed>"),
        info.location().map_or_else(|| "<unknown>".to_string(), |l| l.to_string()),
        payload_text(info.payload()),
        backtrace
    )
}

fn payload_text(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string payload>"
    }
}

fn write_crash_dump(dir: &Path, report: &str) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("album_warm_crash_{}.txt", Local::now().format("%Y%m%d_%H%M%S")));
    std::fs::write(&path, report)?;
    Ok(path)
}
