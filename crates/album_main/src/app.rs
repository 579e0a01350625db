//! Grid warm-up and viewer flow

use album_core::{
    AlbumServices, AppConfig, Bounds, LazyImage, LazyState, MasonryGrid, Photo, PhotoViewer,
    ViewerLoadState,
};
use album_core::fetch::is_supported_mime;
use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cells that have not loaded yet keep at least this height
const PLACEHOLDER_MIN_HEIGHT: f32 = 200.0;

#[derive(Parser, Debug)]
#[command(name = "album_warm")]
#[command(about = "Warm the progressive photo cache for an album", long_about = None)]
pub struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Album server base URL, overrides the config file
    #[arg(long)]
    pub server: Option<String>,

    /// Only photos of this album
    #[arg(long)]
    pub album: Option<String>,

    /// Grid container width in pixels
    #[arg(long, default_value_t = 1200.0)]
    pub width: f32,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 900.0)]
    pub viewport: f32,

    /// Open the viewer at this photo index once the grid is warm
    #[arg(long)]
    pub open: Option<usize>,

    /// Also stream the original of the opened photo
    #[arg(long, requires = "open")]
    pub original: bool,
}

pub fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load().unwrap_or_default(),
    };
    if let Some(server) = &args.server {
        config.server.base_url = server.clone();
    }
    Ok(config)
}

pub async fn run(args: Args, config: AppConfig) -> Result<()> {
    let services = AlbumServices::new(config)?;
    let mut listing = services.api.all_photos(args.album.as_deref()).await?;
    let total = listing.len();
    listing.retain(|p| p.mime.is_empty() || is_supported_mime(&p.mime));
    if listing.len() < total {
        info!(skipped = total - listing.len(), "Skipping photos the decoder cannot handle");
    }
    let photos = Arc::new(listing);
    if photos.is_empty() {
        info!("Album is empty, nothing to warm");
        return Ok(());
    }

    let grid = MasonryGrid::new(services.clone(), photos.clone(), args.width);
    let images = activate_visible(&services, &grid, &photos, &args);
    info!(photos = photos.len(), columns = grid.columns(), active = images.len(), "Grid laid out");

    for (_, image) in &images {
        let mut rx = image.subscribe();
        let _ = rx
            .wait_for(|s| !matches!(s.state, LazyState::Idle | LazyState::LoadingBase))
            .await;
    }
    services.scheduler.wait_idle().await;

    // one render cycle: cells pick up whatever the ledger learned
    for (photo, image) in &images {
        image.set_high_quality_url(grid.cell_source(photo).high_quality_url);
    }
    let mut upgraded = 0;
    for (_, image) in &images {
        let mut rx = image.subscribe();
        if let Ok(snapshot) = rx.wait_for(|s| s.state != LazyState::Upgrading).await {
            if snapshot.state == LazyState::Upgraded {
                upgraded += 1;
            }
        };
    }
    info!(upgraded, "Grid cells upgraded");

    if let Some(index) = args.open {
        open_viewer(&services, &photos, index, args.original).await?;
    }

    for (tier, count) in services.ledger.tier_counts() {
        println!("{:>8}  {}", tier, count);
    }
    Ok(())
}

/// Place cells like the renderer would and observe each against the viewport
fn activate_visible(
    services: &AlbumServices,
    grid: &MasonryGrid,
    photos: &[Photo],
    args: &Args,
) -> Vec<(Photo, LazyImage)> {
    let gap = services.config.masonry.gap;
    let columns = grid.columns();
    let column_width = (args.width - gap * (columns as f32 - 1.0)) / columns as f32;
    let viewport = Bounds::new(0.0, 0.0, args.width, args.viewport);

    let mut images = Vec::new();
    for (column, cells) in grid.layout().iter().enumerate() {
        let x = column as f32 * (column_width + gap);
        let mut y = 0.0;
        for cell in cells {
            let mut height = column_width / cell.aspect as f32;
            if !cell.loaded {
                height = height.max(PLACEHOLDER_MIN_HEIGHT);
            }

            let photo = &photos[cell.index];
            let image = grid.lazy_image(photo);
            if image.observe(Bounds::new(x, y, column_width, height), viewport) {
                images.push((photo.clone(), image));
            }
            y += height + gap;
        }
    }
    images
}

async fn open_viewer(services: &Arc<AlbumServices>, photos: &Arc<Vec<Photo>>, index: usize, original: bool) -> Result<()> {
    let viewer = PhotoViewer::new(services.clone(), photos.clone());
    if !viewer.open(index) {
        bail!("photo index {} out of range ({} photos)", index, photos.len());
    }

    let mut rx = viewer.subscribe();
    let state = rx
        .wait_for(|s| {
            !matches!(
                s.load_state(),
                ViewerLoadState::ThumbnailPending | ViewerLoadState::ThumbnailShown
            )
        })
        .await?
        .load_state();
    info!(index, ?state, "Viewer preview settled");

    match viewer.exif().await {
        Ok(summary) => {
            for (label, value) in summary.rows() {
                info!("{}: {}", label, value);
            }
        }
        Err(e) => debug!(error = %e, "No EXIF data"),
    }

    if original {
        viewer.view_original();
        let mut last_progress = None;
        loop {
            rx.changed().await?;
            let snapshot = rx.borrow_and_update().clone();
            if snapshot.progress != last_progress {
                if let Some(progress) = snapshot.progress {
                    info!(%progress, "Downloading original");
                }
                last_progress = snapshot.progress;
            }
            match snapshot.load_state() {
                ViewerLoadState::OriginalShown => {
                    info!(dimensions = ?snapshot.dimensions, "Original shown");
                    break;
                }
                ViewerLoadState::OriginalFailed => {
                    warn!(error = ?snapshot.error, "Original failed");
                    break;
                }
                _ => {}
            }
        }
    }

    viewer.close();
    Ok(())
}
