//! Shared services for grids and viewers

use crate::api::AlbumApi;
use crate::config::AppConfig;
use crate::error::Result;
use crate::fetch::{HttpFetcher, ImageFetcher};
use crate::layout::AspectCache;
use crate::ledger::QualityLedger;
use crate::photo::{FileUrlResolver, ImageUrlResolver, Photo, Tier};
use crate::preload::PreloadScheduler;
use std::fmt;
use std::sync::Arc;

/// Built once at startup and handed to every grid and viewer by `Arc`
pub struct AlbumServices {
    /// Application configuration
    pub config: AppConfig,

    /// Highest tier loaded per photo
    pub ledger: QualityLedger,

    /// Background display-tier preloads
    pub scheduler: PreloadScheduler,

    /// Aspect ratios learned during the session
    pub aspects: AspectCache,

    pub fetcher: Arc<dyn ImageFetcher>,
    pub resolver: Arc<dyn ImageUrlResolver>,

    /// REST client
    pub api: AlbumApi,
}

impl AlbumServices {
    /// Wire HTTP-backed services from the configuration.
    /// Spawns the preload worker, so a Tokio runtime must be running.
    pub fn new(config: AppConfig) -> Result<Arc<Self>> {
        let fetcher = Arc::new(HttpFetcher::new(
            config.server.connect_timeout(),
            config.server.load_timeout(),
        )?);
        let resolver = Arc::new(FileUrlResolver::new(&config.server.base_url)?);
        Self::with_parts(config, fetcher, resolver)
    }

    /// Same as [`AlbumServices::new`] with a custom fetcher and resolver
    pub fn with_parts(
        config: AppConfig,
        fetcher: Arc<dyn ImageFetcher>,
        resolver: Arc<dyn ImageUrlResolver>,
    ) -> Result<Arc<Self>> {
        let api = AlbumApi::new(
            &config.server.base_url,
            config.server.connect_timeout(),
            config.server.load_timeout(),
        )?;
        let ledger = QualityLedger::new();
        let scheduler = PreloadScheduler::new(ledger.clone(), fetcher.clone(), config.preload.clone());

        tracing::info!(server = %config.server.base_url, "Album services ready");

        Ok(Arc::new(Self {
            config,
            ledger,
            scheduler,
            aspects: AspectCache::new(),
            fetcher,
            resolver,
            api,
        }))
    }

    pub fn url_for(&self, photo: &Photo, tier: Tier) -> String {
        self.resolver.url_for(photo, tier)
    }
}

impl fmt::Debug for AlbumServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlbumServices")
            .field("server", &self.config.server.base_url)
            .field("ledger", &self.ledger)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_services(fetcher: Arc<crate::testing::MockFetcher>, config: AppConfig) -> Arc<AlbumServices> {
    let resolver = Arc::new(FileUrlResolver::new("http://cdn.test/").unwrap());
    AlbumServices::with_parts(config, fetcher, resolver).unwrap()
}
