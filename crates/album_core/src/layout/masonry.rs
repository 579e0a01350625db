//! Column-balanced masonry grid
//!
//! Photos are placed greedily into the shortest column. Once a photo has a
//! column it keeps it until the epoch ends: a different photo set (by
//! identity, not contents) or a different column count. Learning real
//! aspect ratios only changes heights, never assignments, so cells do not
//! jump around while images stream in.

use crate::config::MasonryConfig;
use crate::lazy_image::{LazyImage, LazyImageOptions, LoadCallback, UpgradeFailedCallback};
use crate::ledger::Subscription;
use crate::photo::{ImageDimensions, Photo, PhotoId, Tier};
use crate::state::AlbumServices;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::watch;

/// Upper bound on columns whatever the configured column width
pub const MAX_COLUMNS: usize = 64;

/// Column count for a container width
pub fn columns_for_width(width: f32, column_width: f32, gap: f32) -> usize {
    if width < 400.0 {
        return 1;
    }
    if width < 600.0 {
        return 2;
    }

    let pitch = column_width + gap;
    if !pitch.is_finite() || pitch <= 0.0 {
        return 2;
    }
    let fit = ((width + gap) / pitch).floor();
    if fit.is_finite() {
        (fit as usize).clamp(2, MAX_COLUMNS)
    } else {
        2
    }
}

/// One placed cell
#[derive(Debug, Clone, PartialEq)]
pub struct MasonryCell {
    /// Position in the photo list, for opening the viewer
    pub index: usize,
    pub photo_id: PhotoId,
    /// Box ratio; square until this grid has seen the image load
    pub aspect: f64,
    /// False while the cell still needs its minimum placeholder height
    pub loaded: bool,
}

/// Sources a cell renders through its [`LazyImage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellSource {
    pub base_url: String,
    pub high_quality_url: Option<String>,
}

struct GridState {
    photos: Arc<Vec<Photo>>,
    columns: usize,
    /// Column per photo for the current epoch
    assignment: HashMap<PhotoId, usize>,
    /// Ratios this grid has seen load
    aspects: HashMap<PhotoId, f64>,
    /// Upgrade failed here; stay on the thumb for the rest of the grid's life
    failed: HashSet<PhotoId>,
}

struct GridInner {
    services: Arc<AlbumServices>,
    config: MasonryConfig,
    state: Mutex<GridState>,
    /// Fed by the ledger subscription
    high_quality: Arc<Mutex<HashSet<PhotoId>>>,
    revision: Arc<watch::Sender<u64>>,
}

pub struct MasonryGrid {
    inner: Arc<GridInner>,
    _subscription: Subscription,
}

impl MasonryGrid {
    pub fn new(services: Arc<AlbumServices>, photos: Arc<Vec<Photo>>, container_width: f32) -> Self {
        let config = services.config.masonry.clone();
        let columns = columns_for_width(container_width, config.column_width, config.gap);

        let high_quality = Arc::new(Mutex::new(HashSet::new()));
        let (revision, _) = watch::channel(0u64);
        let revision = Arc::new(revision);

        // subscribe before the snapshot so no upgrade slips between them
        let subscription = {
            let high_quality = high_quality.clone();
            let revision = revision.clone();
            services.ledger.subscribe(move |id, tier| {
                if tier.is_high() && high_quality.lock().insert(id.clone()) {
                    revision.send_modify(|r| *r += 1);
                }
            })
        };
        high_quality.lock().extend(services.ledger.high_quality_ids());

        let aspects = seed_aspects(&services, &photos);
        tracing::debug!(photos = photos.len(), columns, "Masonry grid created");

        Self {
            inner: Arc::new(GridInner {
                services,
                config,
                state: Mutex::new(GridState {
                    photos,
                    columns,
                    assignment: HashMap::new(),
                    aspects,
                    failed: HashSet::new(),
                }),
                high_quality,
                revision,
            }),
            _subscription: subscription,
        }
    }

    pub fn columns(&self) -> usize {
        self.inner.state.lock().columns
    }

    pub fn photos(&self) -> Arc<Vec<Photo>> {
        self.inner.state.lock().photos.clone()
    }

    /// Replace the photo set. A different list (by identity) starts a new epoch.
    pub fn set_photos(&self, photos: Arc<Vec<Photo>>) {
        {
            let mut state = self.inner.state.lock();
            if Arc::ptr_eq(&state.photos, &photos) {
                return;
            }
            for (id, ratio) in seed_aspects(&self.inner.services, &photos) {
                state.aspects.entry(id).or_insert(ratio);
            }
            state.photos = photos;
            state.assignment.clear();
        }
        self.inner.bump();
    }

    /// Recompute the column count; a change starts a new epoch
    pub fn resize(&self, container_width: f32) -> bool {
        let columns = columns_for_width(container_width, self.inner.config.column_width, self.inner.config.gap);
        {
            let mut state = self.inner.state.lock();
            if state.columns == columns {
                return false;
            }
            tracing::debug!(from = state.columns, to = columns, "Masonry column count changed");
            state.columns = columns;
            state.assignment.clear();
        }
        self.inner.bump();
        true
    }

    /// Place every photo, reusing this epoch's assignments
    pub fn layout(&self) -> Vec<Vec<MasonryCell>> {
        let mut state = self.inner.state.lock();
        let GridState { photos, columns, assignment, aspects, .. } = &mut *state;
        let columns = (*columns).max(1);
        let spacing = f64::from(self.inner.config.gap) / f64::from(self.inner.config.column_width);

        let mut cells: Vec<Vec<MasonryCell>> = vec![Vec::new(); columns];
        let mut heights = vec![0.0f64; columns];

        for (index, photo) in photos.iter().enumerate() {
            let column = match assignment.get(&photo.id) {
                // assignments are cleared with the column count, this is only a guard
                Some(&column) => column % columns,
                None => {
                    let column = shortest(&heights);
                    assignment.insert(photo.id.clone(), column);
                    column
                }
            };

            let local = aspects.get(&photo.id).copied();
            let aspect = self
                .inner
                .services
                .aspects
                .get(&photo.id)
                .or(local)
                .unwrap_or(self.inner.config.default_aspect);
            heights[column] += 1.0 / aspect + spacing;

            cells[column].push(MasonryCell {
                index,
                photo_id: photo.id.clone(),
                aspect: local.unwrap_or(1.0),
                loaded: local.is_some(),
            });
        }

        cells
    }

    /// Thumb base plus the display upgrade when the ledger has it and it has
    /// not failed in this grid
    pub fn cell_source(&self, photo: &Photo) -> CellSource {
        self.inner.cell_source(photo)
    }

    /// Record the loaded ratio and queue a background display preload
    pub fn on_image_loaded(&self, photo: &Photo, dimensions: ImageDimensions) {
        self.inner.on_image_loaded(photo, dimensions);
    }

    pub fn on_upgrade_failed(&self, id: &PhotoId) {
        self.inner.on_upgrade_failed(id);
    }

    /// Lazy image for a cell, wired to this grid's load and failure handlers
    pub fn lazy_image(&self, photo: &Photo) -> LazyImage {
        let services = &self.inner.services;
        let weak = Arc::downgrade(&self.inner);

        let on_load: LoadCallback = {
            let weak: Weak<GridInner> = weak.clone();
            let photo = photo.clone();
            Arc::new(move |dims: ImageDimensions| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_image_loaded(&photo, dims);
                }
            })
        };
        let on_upgrade_failed: UpgradeFailedCallback = {
            let id = photo.id.clone();
            Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_upgrade_failed(&id);
                }
            })
        };

        let source = self.inner.cell_source(photo);
        let image = LazyImage::new(
            source.base_url,
            services.fetcher.clone(),
            LazyImageOptions {
                root_margin: services.config.lazy.root_margin_px,
                on_load: Some(on_load),
                on_upgrade_failed: Some(on_upgrade_failed),
            },
        );
        image.set_high_quality_url(source.high_quality_url);
        image
    }

    /// Receiver bumped whenever cell sources or sizes may have changed
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }
}

impl fmt::Debug for MasonryGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MasonryGrid")
            .field("photos", &state.photos.len())
            .field("columns", &state.columns)
            .field("assigned", &state.assignment.len())
            .finish()
    }
}

impl GridInner {
    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    fn cell_source(&self, photo: &Photo) -> CellSource {
        let upgrade = self.high_quality.lock().contains(&photo.id)
            && !self.state.lock().failed.contains(&photo.id);

        CellSource {
            base_url: self.services.url_for(photo, Tier::Thumb),
            high_quality_url: upgrade.then(|| self.services.url_for(photo, Tier::Display)),
        }
    }

    fn on_image_loaded(&self, photo: &Photo, dimensions: ImageDimensions) {
        let Some(ratio) = dimensions.aspect_ratio() else { return };

        self.state.lock().aspects.insert(photo.id.clone(), ratio);
        self.services.aspects.record(&photo.id, ratio);
        self.bump();

        self.services
            .scheduler
            .queue_preload(&photo.id, self.services.url_for(photo, Tier::Display));
    }

    fn on_upgrade_failed(&self, id: &PhotoId) {
        if self.state.lock().failed.insert(id.clone()) {
            tracing::debug!(photo = %id, "Cell upgrade failed, staying on thumb");
            self.bump();
        }
    }
}

fn seed_aspects(services: &AlbumServices, photos: &[Photo]) -> HashMap<PhotoId, f64> {
    photos
        .iter()
        .filter_map(|p| services.aspects.get(&p.id).map(|r| (p.id.clone(), r)))
        .collect()
}

/// First column with the minimum height
fn shortest(heights: &[f64]) -> usize {
    let mut best = 0;
    for (i, &h) in heights.iter().enumerate() {
        if h < heights[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::lazy_image::{Bounds, LazyState};
    use crate::photo::test_photo;
    use crate::state::test_services;
    use crate::testing::MockFetcher;

    fn photos(n: usize) -> Arc<Vec<Photo>> {
        Arc::new((1..=n).map(|i| test_photo(&format!("p{}", i))).collect())
    }

    fn ids(layout: &[Vec<MasonryCell>]) -> Vec<Vec<String>> {
        layout
            .iter()
            .map(|col| col.iter().map(|c| c.photo_id.to_string()).collect())
            .collect()
    }

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.preload.cooldown_ms = 0;
        config
    }

    #[test]
    fn test_columns_for_width() {
        assert_eq!(columns_for_width(320.0, 160.0, 8.0), 1);
        assert_eq!(columns_for_width(400.0, 160.0, 8.0), 2);
        assert_eq!(columns_for_width(599.0, 160.0, 8.0), 2);
        assert_eq!(columns_for_width(600.0, 160.0, 8.0), 3);
        assert_eq!(columns_for_width(1000.0, 160.0, 8.0), 6);
        assert_eq!(columns_for_width(700.0, 600.0, 8.0), 2);
    }

    #[test]
    fn test_columns_for_degenerate_widths() {
        assert_eq!(columns_for_width(1000.0, 0.0, 0.0), 2);
        assert_eq!(columns_for_width(1000.0, -8.0, 0.0), 2);
        assert_eq!(columns_for_width(1000.0, f32::NAN, 8.0), 2);
        assert_eq!(columns_for_width(100_000.0, 1.0, 0.0), MAX_COLUMNS);
    }

    #[test]
    fn test_shortest_prefers_lowest_index() {
        assert_eq!(shortest(&[1.0, 1.0, 1.0]), 0);
        assert_eq!(shortest(&[2.0, 1.0, 1.0]), 1);
    }

    #[tokio::test]
    async fn test_greedy_placement() {
        let services = test_services(MockFetcher::new(), fast_config());
        let grid = MasonryGrid::new(services, photos(4), 500.0);

        assert_eq!(grid.columns(), 2);
        assert_eq!(ids(&grid.layout()), vec![vec!["p1", "p3"], vec!["p2", "p4"]]);
    }

    #[tokio::test]
    async fn test_zero_column_width_still_lays_out() {
        let mut config = fast_config();
        config.masonry.column_width = 0.0;
        config.masonry.gap = 0.0;
        let services = test_services(MockFetcher::new(), config);
        let grid = MasonryGrid::new(services, photos(4), 1000.0);

        assert_eq!(grid.columns(), 2);
        let layout = grid.layout();
        assert_eq!(layout.len(), 2);
        assert_eq!(layout.iter().map(Vec::len).sum::<usize>(), 4);
    }

    #[tokio::test]
    async fn test_assignments_stable_within_epoch() {
        let services = test_services(MockFetcher::new(), fast_config());
        let set = photos(4);
        let grid = MasonryGrid::new(services, set.clone(), 500.0);
        let first = ids(&grid.layout());

        // p1 turns out very tall
        grid.on_image_loaded(&set[0], ImageDimensions::new(100, 1000));
        assert_eq!(ids(&grid.layout()), first);

        // same list: still the same epoch
        grid.set_photos(set.clone());
        assert_eq!(ids(&grid.layout()), first);

        // equal contents, new identity: placement re-runs with the real ratio
        grid.set_photos(Arc::new(set.as_ref().clone()));
        assert_eq!(ids(&grid.layout()), vec![vec!["p1"], vec!["p2", "p3", "p4"]]);
    }

    #[tokio::test]
    async fn test_resize_starts_new_epoch() {
        let services = test_services(MockFetcher::new(), fast_config());
        let grid = MasonryGrid::new(services, photos(3), 500.0);
        grid.layout();

        assert!(!grid.resize(550.0));
        assert!(grid.resize(1000.0));
        assert_eq!(grid.columns(), 6);
        assert_eq!(ids(&grid.layout()), vec![
            vec!["p1"], vec!["p2"], vec!["p3"], vec![], vec![], vec![]
        ]);
    }

    #[tokio::test]
    async fn test_cells_use_learned_aspects() {
        let services = test_services(MockFetcher::new(), fast_config());
        let set = photos(2);
        services.aspects.record(&set[1].id, 2.0);
        let grid = MasonryGrid::new(services.clone(), set.clone(), 300.0);

        let layout = grid.layout();
        assert_eq!(layout[0][0].aspect, 1.0);
        assert!(!layout[0][0].loaded);
        assert_eq!(layout[0][1].aspect, 2.0);
        assert!(layout[0][1].loaded);

        grid.on_image_loaded(&set[0], ImageDimensions::new(300, 200));
        assert_eq!(services.aspects.get(&set[0].id), Some(1.5));
        assert!(grid.layout()[0][0].loaded);
    }

    #[tokio::test]
    async fn test_cell_source_follows_ledger() {
        let services = test_services(MockFetcher::new(), fast_config());
        let set = photos(2);
        services.ledger.mark_loaded(&set[0].id, Tier::Display);
        let grid = MasonryGrid::new(services.clone(), set.clone(), 500.0);
        let mut revision = grid.subscribe();

        let cached = grid.cell_source(&set[0]);
        assert_eq!(cached.base_url, services.url_for(&set[0], Tier::Thumb));
        assert_eq!(cached.high_quality_url, Some(services.url_for(&set[0], Tier::Display)));
        assert_eq!(grid.cell_source(&set[1]).high_quality_url, None);

        services.ledger.mark_loaded(&set[1].id, Tier::Medium);
        assert!(!revision.has_changed().unwrap());
        assert_eq!(grid.cell_source(&set[1]).high_quality_url, None);

        services.ledger.mark_loaded(&set[1].id, Tier::Original);
        assert!(revision.has_changed().unwrap());
        assert!(grid.cell_source(&set[1]).high_quality_url.is_some());

        grid.on_upgrade_failed(&set[1].id);
        assert_eq!(grid.cell_source(&set[1]).high_quality_url, None);
    }

    #[tokio::test]
    async fn test_thumb_load_upgrades_cell_through_preload() {
        let fetcher = MockFetcher::new();
        let services = test_services(fetcher.clone(), fast_config());
        let set = photos(1);
        let photo = &set[0];
        let grid = MasonryGrid::new(services.clone(), set.clone(), 500.0);
        let mut revision = grid.subscribe();

        let image = grid.lazy_image(photo);
        let viewport = Bounds::new(0.0, 0.0, 500.0, 800.0);
        assert!(image.observe(Bounds::new(0.0, 0.0, 246.0, 328.0), viewport));

        let mut snapshots = image.subscribe();
        snapshots.wait_for(|s| s.state == LazyState::BaseLoaded).await.unwrap();
        services.scheduler.wait_idle().await;
        assert_eq!(services.ledger.loaded_quality(&photo.id), Some(Tier::Display));

        // next render cycle picks the upgrade up without a new cell
        revision.changed().await.unwrap();
        image.set_high_quality_url(grid.cell_source(photo).high_quality_url);
        let upgraded = snapshots.wait_for(|s| s.state == LazyState::Upgraded).await.unwrap().clone();

        let display = services.url_for(photo, Tier::Display);
        assert_eq!(upgraded.displayed_src.as_deref(), Some(display.as_str()));
        assert!(!upgraded.show_placeholder);
        assert_eq!(fetcher.call_count(&services.url_for(photo, Tier::Thumb)), 1);
    }

    #[tokio::test]
    async fn test_failed_upgrade_degrades_cell() {
        let fetcher = MockFetcher::new();
        let services = test_services(fetcher.clone(), fast_config());
        let set = photos(1);
        let photo = &set[0];
        fetcher.fail(&services.url_for(photo, Tier::Display));
        services.ledger.mark_loaded(&photo.id, Tier::Display);
        let grid = MasonryGrid::new(services.clone(), set.clone(), 500.0);

        let image = grid.lazy_image(photo);
        image.observe(Bounds::new(0.0, 0.0, 10.0, 10.0), Bounds::new(0.0, 0.0, 500.0, 800.0));
        let mut snapshots = image.subscribe();
        snapshots.wait_for(|s| s.state == LazyState::UpgradeFailed).await.unwrap();

        assert_eq!(grid.cell_source(photo).high_quality_url, None);
        assert_eq!(image.snapshot().displayed_src, Some(services.url_for(photo, Tier::Thumb)));
    }
}
