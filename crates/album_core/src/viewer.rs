//! Progressive full-screen viewer
//!
//! Opening a photo consults the ledger first. Photos the grid already
//! upgraded are shown at their cached tier straight away; otherwise the
//! thumb is fetched as a placeholder while the preview walks
//! `display -> medium -> original` until one loads. "View original"
//! streams the full upload with progress and only swaps it in once the
//! whole buffer decoded.
//!
//! Each open photo is a session with its own cancellation token. Leaving the
//! photo cancels the token; results arriving afterwards are dropped without
//! touching the ledger or the snapshot.

use crate::error::{AlbumError, Result};
use crate::exif::ExifSummary;
use crate::photo::{ImageDimensions, Photo, Tier};
use crate::state::AlbumServices;
use bytes::BytesMut;
use futures::StreamExt;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Preview fallback order; position is the preview tier index
pub const PREVIEW_TIERS: [Tier; 3] = [Tier::Display, Tier::Medium, Tier::Original];

/// Single-value load state of the open photo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerLoadState {
    ThumbnailPending,
    ThumbnailShown,
    PreviewTier0,
    PreviewTier1,
    PreviewTier2,
    PreviewFailed,
    OriginalPending,
    OriginalShown,
    OriginalFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewPhase {
    /// Fetching this tier
    Loading(Tier),
    Shown(Tier),
    /// Every preview tier failed
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginalPhase {
    Idle,
    Pending,
    Shown,
    Failed,
}

/// Download progress of the original
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Content length known
    Percent(u8),
    /// Content length unknown
    Bytes(u64),
}

impl Progress {
    fn from_counts(received: u64, total: Option<u64>) -> Self {
        match total {
            Some(total) if total > 0 => {
                let percent = (received as f64 / total as f64 * 100.0).round().min(100.0);
                Progress::Percent(percent as u8)
            }
            _ => Progress::Bytes(received),
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Percent(p) => write!(f, "{}%", p),
            Progress::Bytes(b) if *b >= 1024 * 1024 => write!(f, "{:.1} MB", *b as f64 / (1024.0 * 1024.0)),
            Progress::Bytes(b) => write!(f, "{} KB", b / 1024),
        }
    }
}

/// Everything a renderer needs for the viewer
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerSnapshot {
    pub open: bool,
    pub index: usize,
    pub preview: PreviewPhase,
    pub original: OriginalPhase,
    pub progress: Option<Progress>,
    /// Final asset on screen, `None` until a preview tier loaded
    pub shown_src: Option<String>,
    pub shown_tier: Option<Tier>,
    /// Thumb placeholder, dropped once a preview is shown
    pub thumbnail_src: Option<String>,
    pub dimensions: Option<ImageDimensions>,
    /// Retry message after the original failed
    pub error: Option<String>,
}

impl ViewerSnapshot {
    fn closed(index: usize) -> Self {
        Self {
            open: false,
            index,
            preview: PreviewPhase::Loading(Tier::Display),
            original: OriginalPhase::Idle,
            progress: None,
            shown_src: None,
            shown_tier: None,
            thumbnail_src: None,
            dimensions: None,
            error: None,
        }
    }

    /// Fold the phases into one state, the original action taking precedence
    pub fn load_state(&self) -> ViewerLoadState {
        match self.original {
            OriginalPhase::Pending => return ViewerLoadState::OriginalPending,
            OriginalPhase::Shown => return ViewerLoadState::OriginalShown,
            OriginalPhase::Failed => return ViewerLoadState::OriginalFailed,
            OriginalPhase::Idle => {}
        }
        match self.preview {
            PreviewPhase::Shown(Tier::Display) => ViewerLoadState::PreviewTier0,
            PreviewPhase::Shown(Tier::Medium) => ViewerLoadState::PreviewTier1,
            PreviewPhase::Shown(_) => ViewerLoadState::PreviewTier2,
            PreviewPhase::Failed => ViewerLoadState::PreviewFailed,
            PreviewPhase::Loading(_) if self.thumbnail_src.is_some() => ViewerLoadState::ThumbnailShown,
            PreviewPhase::Loading(_) => ViewerLoadState::ThumbnailPending,
        }
    }
}

struct Session {
    index: usize,
    token: CancellationToken,
    /// Child of `token`, cancelled when the original is requested
    preview: CancellationToken,
    /// Child of `token`, replaced on every retry
    original: Option<CancellationToken>,
}

struct ViewerInner {
    services: Arc<AlbumServices>,
    photos: Arc<Vec<Photo>>,
    session: Mutex<Option<Session>>,
    snapshot: watch::Sender<ViewerSnapshot>,
}

/// Viewer over a photo list; clones drive the same viewer
#[derive(Clone)]
pub struct PhotoViewer {
    inner: Arc<ViewerInner>,
}

impl PhotoViewer {
    pub fn new(services: Arc<AlbumServices>, photos: Arc<Vec<Photo>>) -> Self {
        let (snapshot, _) = watch::channel(ViewerSnapshot::closed(0));
        Self {
            inner: Arc::new(ViewerInner {
                services,
                photos,
                session: Mutex::new(None),
                snapshot,
            }),
        }
    }

    /// Open at `index`. False for an out-of-range index.
    /// Must be called from within a Tokio runtime.
    pub fn open(&self, index: usize) -> bool {
        if index >= self.inner.photos.len() {
            return false;
        }
        self.inner.start(index);
        true
    }

    /// Jump to `index` (wrapping), opening the viewer if it is closed
    pub fn go_to(&self, index: usize) -> bool {
        let len = self.inner.photos.len();
        if len == 0 {
            return false;
        }
        self.inner.start(index % len);
        true
    }

    pub fn next(&self) -> bool {
        let Some(index) = self.current_index() else { return false };
        self.go_to(index + 1)
    }

    pub fn prev(&self) -> bool {
        let Some(index) = self.current_index() else { return false };
        let len = self.inner.photos.len();
        self.go_to((index + len - 1) % len)
    }

    /// Close and abort everything in flight for the open photo
    pub fn close(&self) {
        let mut session = self.inner.session.lock();
        if let Some(current) = session.take() {
            current.token.cancel();
            debug!(index = current.index, "Viewer closed");
            self.inner.snapshot.send_replace(ViewerSnapshot::closed(current.index));
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.inner.session.lock().as_ref().map(|s| s.index)
    }

    pub fn current_photo(&self) -> Option<&Photo> {
        self.current_index().and_then(|i| self.inner.photos.get(i))
    }

    /// Stream the original of the open photo, replacing any preview fetch.
    /// Calling it again after a failure retries; once shown it is a no-op.
    pub fn view_original(&self) -> bool {
        let (index, token) = {
            let mut session = self.inner.session.lock();
            let Some(current) = session.as_mut() else { return false };
            if self.inner.snapshot.borrow().original == OriginalPhase::Shown {
                return true;
            }

            current.preview.cancel();
            if let Some(previous) = current.original.take() {
                previous.cancel();
            }
            let token = current.token.child_token();
            current.original = Some(token.clone());

            self.inner.snapshot.send_modify(|snap| {
                snap.original = OriginalPhase::Pending;
                snap.progress = None;
                snap.error = None;
            });
            (current.index, token)
        };

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.load_original(index, token).await;
        });
        true
    }

    /// EXIF summary of the open photo
    pub async fn exif(&self) -> Result<ExifSummary> {
        let photo = self
            .current_photo()
            .ok_or_else(|| AlbumError::Config("viewer is closed".into()))?
            .clone();
        let data = self.inner.services.api.exif(&photo.id).await?;
        Ok(ExifSummary::from(&data))
    }

    pub fn snapshot(&self) -> ViewerSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn load_state(&self) -> ViewerLoadState {
        self.inner.snapshot.borrow().load_state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewerSnapshot> {
        self.inner.snapshot.subscribe()
    }
}

impl fmt::Debug for PhotoViewer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhotoViewer")
            .field("photos", &self.inner.photos.len())
            .field("index", &self.current_index())
            .field("state", &self.load_state())
            .finish()
    }
}

impl ViewerInner {
    fn url(&self, index: usize, tier: Tier) -> String {
        self.services.url_for(&self.photos[index], tier)
    }

    /// Replace the session with a fresh one for `index`
    fn start(self: &Arc<Self>, index: usize) {
        let photo = &self.photos[index];
        let cached = self.services.ledger.loaded_quality(&photo.id);

        let (token, preview) = {
            let mut session = self.session.lock();
            if let Some(previous) = session.take() {
                previous.token.cancel();
            }
            let token = CancellationToken::new();
            let preview = token.child_token();
            *session = Some(Session {
                index,
                token: token.clone(),
                preview: preview.clone(),
                original: None,
            });

            let mut snap = ViewerSnapshot::closed(index);
            snap.open = true;
            match cached {
                Some(Tier::Original) => {
                    let src = self.url(index, Tier::Original);
                    snap.preview = PreviewPhase::Shown(Tier::Original);
                    snap.original = OriginalPhase::Shown;
                    snap.shown_src = Some(src);
                    snap.shown_tier = Some(Tier::Original);
                }
                Some(Tier::Display) => {
                    snap.preview = PreviewPhase::Shown(Tier::Display);
                    snap.shown_src = Some(self.url(index, Tier::Display));
                    snap.shown_tier = Some(Tier::Display);
                }
                _ => {}
            }
            self.snapshot.send_replace(snap);
            (token, preview)
        };

        debug!(photo = %photo.id, index, cached = ?cached, "Viewer opened photo");

        self.preload_adjacent(index, &token);

        if !cached.is_some_and(Tier::is_high) {
            let inner = self.clone();
            tokio::spawn(async move { inner.load_thumb(index, token).await });

            let inner = self.clone();
            tokio::spawn(async move { inner.load_preview(index, preview).await });
        }
    }

    /// Apply `f` to the snapshot if `token` is still live
    fn update(&self, token: &CancellationToken, f: impl FnOnce(&mut ViewerSnapshot)) -> bool {
        // sessions are cancelled under this lock, so a live token here is current
        let _session = self.session.lock();
        if token.is_cancelled() {
            return false;
        }
        self.snapshot.send_modify(f);
        true
    }

    async fn load_thumb(&self, index: usize, token: CancellationToken) {
        let url = self.url(index, Tier::Thumb);
        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = self.services.fetcher.load(&url) => result,
        };

        match result {
            Ok(dims) => {
                let applied = self.update(&token, |snap| {
                    // a preview that already landed makes the placeholder moot
                    if !matches!(snap.preview, PreviewPhase::Shown(_)) {
                        snap.thumbnail_src = Some(url.clone());
                    }
                    snap.dimensions.get_or_insert(dims);
                });
                if applied {
                    self.services.ledger.mark_loaded(&self.photos[index].id, Tier::Thumb);
                }
            }
            Err(e) => debug!(url, error = %e, "Viewer thumb failed"),
        }
    }

    async fn load_preview(&self, index: usize, token: CancellationToken) {
        let photo = &self.photos[index];

        for tier in PREVIEW_TIERS {
            if !self.update(&token, |snap| snap.preview = PreviewPhase::Loading(tier)) {
                return;
            }

            let url = self.url(index, tier);
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = self.services.fetcher.load(&url) => result,
            };

            match result {
                Ok(dims) => {
                    let applied = self.update(&token, |snap| {
                        snap.preview = PreviewPhase::Shown(tier);
                        snap.shown_src = Some(url.clone());
                        snap.shown_tier = Some(tier);
                        snap.thumbnail_src = None;
                        snap.dimensions = Some(dims);
                    });
                    if applied {
                        self.services.ledger.mark_loaded(&photo.id, tier);
                        debug!(photo = %photo.id, %tier, "Preview shown");
                    }
                    return;
                }
                Err(e) => debug!(photo = %photo.id, %tier, error = %e, "Preview tier failed, falling back"),
            }
        }

        if self.update(&token, |snap| snap.preview = PreviewPhase::Failed) {
            warn!(photo = %photo.id, "Every preview tier failed");
        }
    }

    async fn load_original(&self, index: usize, token: CancellationToken) {
        let photo = &self.photos[index];
        let url = self.url(index, Tier::Original);

        let result = tokio::select! {
            _ = token.cancelled() => Err(AlbumError::Aborted),
            result = self.download(&url, &token) => result,
        };

        match result {
            Ok(dims) => {
                let applied = self.update(&token, |snap| {
                    snap.original = OriginalPhase::Shown;
                    snap.shown_src = Some(url.clone());
                    snap.shown_tier = Some(Tier::Original);
                    snap.thumbnail_src = None;
                    snap.dimensions = Some(dims);
                    snap.progress = None;
                });
                if applied {
                    self.services.ledger.mark_loaded(&photo.id, Tier::Original);
                    info!(photo = %photo.id, "Original shown");
                }
            }
            Err(e) if e.is_abort() => debug!(photo = %photo.id, "Original download aborted"),
            Err(e) => {
                let message = e.user_message();
                if self.update(&token, |snap| {
                    snap.original = OriginalPhase::Failed;
                    snap.error = Some(message);
                }) {
                    warn!(photo = %photo.id, error = %e, "Original failed");
                }
            }
        }
    }

    /// Receive the whole original, reporting progress, then decode it
    async fn download(&self, url: &str, token: &CancellationToken) -> Result<ImageDimensions> {
        let mut stream = self.services.fetcher.open_stream(url).await?;
        let total = stream.content_length;
        let mut buffer = BytesMut::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);

        while let Some(chunk) = stream.chunks.next().await {
            buffer.extend_from_slice(&chunk?);
            let progress = Progress::from_counts(buffer.len() as u64, total);
            if !self.update(token, |snap| snap.progress = Some(progress)) {
                return Err(AlbumError::Aborted);
            }
        }

        self.services.fetcher.decode(buffer.freeze()).await
    }

    /// Warm the neighbours: thumb fetch plus a head-of-queue display preload.
    /// The thumb fetches end with the session that started them.
    fn preload_adjacent(self: &Arc<Self>, index: usize, token: &CancellationToken) {
        let len = self.photos.len();
        if len < 2 || !self.services.config.viewer.preload_adjacent {
            return;
        }

        let next = (index + 1) % len;
        let prev = (index + len - 1) % len;
        for neighbour in [next, prev] {
            let photo = &self.photos[neighbour];

            let inner = self.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let photo = &inner.photos[neighbour];
                let url = inner.url(neighbour, Tier::Thumb);
                let result = tokio::select! {
                    _ = token.cancelled() => return,
                    result = inner.services.fetcher.load(&url) => result,
                };
                match result {
                    Ok(_) => {
                        inner.services.ledger.mark_loaded(&photo.id, Tier::Thumb);
                    }
                    Err(e) => debug!(url, error = %e, "Adjacent thumb warm failed"),
                }
            });

            self.services
                .scheduler
                .priority_preload(&photo.id, self.url(neighbour, Tier::Display));
        }
    }
}
