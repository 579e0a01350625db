//! Viewport-gated image loader with flicker-free quality upgrade
//!
//! ```text
//! Idle -> LoadingBase -> BaseLoaded -> Upgrading -> Upgraded
//!              |                           |
//!              v                           v
//!          BaseFailed                UpgradeFailed
//! ```
//!
//! Activation happens once, when the item first comes within the root
//! margin of the viewport, and is never undone by scrolling away.

use crate::fetch::ImageFetcher;
use crate::photo::ImageDimensions;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Axis-aligned rectangle in layout pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl Bounds {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self { left, top, width, height }
    }

    /// Grow every edge by `margin`
    pub fn expanded(self, margin: f32) -> Self {
        Self {
            left: self.left - margin,
            top: self.top - margin,
            width: self.width + 2.0 * margin,
            height: self.height + 2.0 * margin,
        }
    }

    /// Touching edges count as intersecting
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.left <= other.left + other.width
            && other.left <= self.left + self.width
            && self.top <= other.top + other.height
            && other.top <= self.top + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyState {
    Idle,
    LoadingBase,
    BaseLoaded,
    BaseFailed,
    Upgrading,
    Upgraded,
    UpgradeFailed,
}

/// What a renderer needs to draw the image
#[derive(Debug, Clone, PartialEq)]
pub struct LazySnapshot {
    pub state: LazyState,
    /// Source to render; `None` until activated
    pub displayed_src: Option<String>,
    /// Fixed-aspect placeholder shown until the base has loaded
    pub show_placeholder: bool,
    pub dimensions: Option<ImageDimensions>,
}

pub type LoadCallback = Arc<dyn Fn(ImageDimensions) + Send + Sync>;
pub type UpgradeFailedCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct LazyImageOptions {
    pub root_margin: f32,
    /// Called with the base image's natural size
    pub on_load: Option<LoadCallback>,
    pub on_upgrade_failed: Option<UpgradeFailedCallback>,
}

impl Default for LazyImageOptions {
    fn default() -> Self {
        Self {
            root_margin: 1000.0,
            on_load: None,
            on_upgrade_failed: None,
        }
    }
}

struct LazyFields {
    state: LazyState,
    high_url: Option<String>,
    /// Last upgrade URL a fetch was started for
    attempted_high: Option<String>,
    upgraded_src: Option<String>,
    dimensions: Option<ImageDimensions>,
}

struct LazyInner {
    base_url: String,
    fetcher: Arc<dyn ImageFetcher>,
    options: LazyImageOptions,
    fields: Mutex<LazyFields>,
    snapshot: watch::Sender<LazySnapshot>,
}

/// One lazily loaded image; clones share state
#[derive(Clone)]
pub struct LazyImage {
    inner: Arc<LazyInner>,
}

impl LazyImage {
    pub fn new(base_url: impl Into<String>, fetcher: Arc<dyn ImageFetcher>, options: LazyImageOptions) -> Self {
        let (snapshot, _) = watch::channel(LazySnapshot {
            state: LazyState::Idle,
            displayed_src: None,
            show_placeholder: true,
            dimensions: None,
        });

        Self {
            inner: Arc::new(LazyInner {
                base_url: base_url.into(),
                fetcher,
                options,
                fields: Mutex::new(LazyFields {
                    state: LazyState::Idle,
                    high_url: None,
                    attempted_high: None,
                    upgraded_src: None,
                    dimensions: None,
                }),
                snapshot,
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Report the item's position relative to the viewport.
    ///
    /// Starts the base fetch the first time the item is within the root
    /// margin. Returns whether the image is active. Must be called from
    /// within a Tokio runtime.
    pub fn observe(&self, item: Bounds, viewport: Bounds) -> bool {
        {
            let mut fields = self.inner.fields.lock();
            if fields.state != LazyState::Idle {
                return true;
            }
            if !viewport.expanded(self.inner.options.root_margin).intersects(&item) {
                return false;
            }
            fields.state = LazyState::LoadingBase;
            self.inner.publish(&fields);
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let result = inner.fetcher.load(&inner.base_url).await;
            inner.finish_base(result);
        });
        true
    }

    /// Offer a higher-quality source (or withdraw it with `None`).
    ///
    /// Each distinct URL is fetched at most once, and only after the base
    /// image has loaded.
    pub fn set_high_quality_url(&self, url: Option<String>) {
        self.inner.fields.lock().high_url = url;
        self.inner.maybe_upgrade();
    }

    pub fn snapshot(&self) -> LazySnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Receiver that changes whenever the rendered output would
    pub fn subscribe(&self) -> watch::Receiver<LazySnapshot> {
        self.inner.snapshot.subscribe()
    }
}

impl fmt::Debug for LazyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyImage")
            .field("base_url", &self.inner.base_url)
            .field("state", &self.inner.fields.lock().state)
            .finish()
    }
}

impl LazyInner {
    fn publish(&self, fields: &LazyFields) {
        let activated = fields.state != LazyState::Idle;
        let base_loaded = !matches!(
            fields.state,
            LazyState::Idle | LazyState::LoadingBase | LazyState::BaseFailed
        );
        let displayed_src = if activated {
            Some(fields.upgraded_src.clone().unwrap_or_else(|| self.base_url.clone()))
        } else {
            None
        };

        self.snapshot.send_replace(LazySnapshot {
            state: fields.state,
            displayed_src,
            show_placeholder: !base_loaded,
            dimensions: fields.dimensions,
        });
    }

    fn finish_base(self: &Arc<Self>, result: crate::error::Result<ImageDimensions>) {
        let dims = {
            let mut fields = self.fields.lock();
            match result {
                Ok(dims) => {
                    fields.state = LazyState::BaseLoaded;
                    fields.dimensions = Some(dims);
                    self.publish(&fields);
                    dims
                }
                Err(e) => {
                    tracing::debug!(url = %self.base_url, error = %e, "Base image failed");
                    fields.state = LazyState::BaseFailed;
                    self.publish(&fields);
                    return;
                }
            }
        };

        if let Some(on_load) = &self.options.on_load {
            on_load(dims);
        }
        self.maybe_upgrade();
    }

    fn maybe_upgrade(self: &Arc<Self>) {
        let url = {
            let mut fields = self.fields.lock();
            let ready = matches!(
                fields.state,
                LazyState::BaseLoaded | LazyState::Upgrading | LazyState::UpgradeFailed
            );
            let Some(url) = fields.high_url.clone() else { return };
            if !ready || fields.attempted_high.as_ref() == Some(&url) {
                return;
            }
            fields.attempted_high = Some(url.clone());
            fields.state = LazyState::Upgrading;
            self.publish(&fields);
            url
        };

        let inner = self.clone();
        tokio::spawn(async move {
            let result = inner.fetcher.load(&url).await;
            inner.finish_upgrade(&url, result);
        });
    }

    fn finish_upgrade(&self, url: &str, result: crate::error::Result<ImageDimensions>) {
        let failed = {
            let mut fields = self.fields.lock();
            // superseded by a newer upgrade URL
            if fields.attempted_high.as_deref() != Some(url) || fields.state != LazyState::Upgrading {
                return;
            }
            match result {
                Ok(_) => {
                    fields.upgraded_src = Some(url.to_string());
                    fields.state = LazyState::Upgraded;
                    self.publish(&fields);
                    false
                }
                Err(e) => {
                    tracing::debug!(url, error = %e, "Upgrade failed, keeping base image");
                    fields.state = LazyState::UpgradeFailed;
                    self.publish(&fields);
                    true
                }
            }
        };

        if failed {
            if let Some(on_failed) = &self.options.on_upgrade_failed {
                on_failed();
            }
        }
    }
}
