//! album_warm - headless driver for the progressive photo cache
//!
//! Fetches an album listing, lays it out as a masonry grid, lets the lazy
//! images and the preload scheduler warm what is on screen, and optionally
//! opens the viewer on one photo.

mod app;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    // Initialize logging and panic hook first
    let _log_guard = album_log::init()?;

    let args = app::Args::parse();
    let config = app::load_config(&args)?;

    if let Err(e) = album_log::cleanup_old_logs(&album_log::log_dir(), config.general.log_retention_days) {
        tracing::warn!("Failed to cleanup old logs: {}", e);
    }

    tracing::info!("album_warm starting...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(app::run(args, config))
}
