//! Progressive photo cache core
//!
//! This crate contains:
//! - Photo model, quality tiers and URL resolution
//! - Quality ledger (highest tier loaded per photo)
//! - Background preload scheduler
//! - Lazy grid images and the progressive viewer
//! - Masonry and justified layouts
//! - REST client, configuration and error types

pub mod photo;
pub mod ledger;
pub mod preload;
pub mod fetch;
pub mod lazy_image;
pub mod viewer;
pub mod layout;
pub mod exif;
pub mod api;
pub mod config;
pub mod error;
pub mod state;

#[cfg(test)]
mod testing;

pub use photo::{FileUrlResolver, ImageDimensions, ImageUrlResolver, Photo, PhotoId, Tier};
pub use ledger::{QualityLedger, Subscription};
pub use preload::{PreloadEntry, PreloadScheduler};
pub use fetch::{ByteStream, HttpFetcher, ImageFetcher};
pub use lazy_image::{Bounds, LazyImage, LazyImageOptions, LazySnapshot, LazyState};
pub use viewer::{OriginalPhase, PhotoViewer, PreviewPhase, Progress, ViewerLoadState, ViewerSnapshot};
pub use layout::{AspectCache, CardImage, CellSource, JustifiedGrid, MasonryCell, MasonryGrid};
pub use exif::{ExifData, ExifSummary};
pub use api::{Album, AlbumApi, PhotoQuery, PhotosPage};
pub use config::{
    AppConfig, GeneralConfig, JustifiedConfig, LazyConfig, MasonryConfig,
    PreloadConfig, ServerConfig, ViewerConfig,
};
pub use error::{AlbumError, Result};
pub use state::AlbumServices;
