//! Justified rows: flex-wrap at a target row height
//!
//! Each photo becomes a flex item sized from its aspect ratio. Landscape
//! items grow and shrink to fill a row; portrait items keep their natural
//! width. A zero-height spacer with an enormous grow factor closes the list
//! so a short last row keeps its natural widths instead of stretching.

use crate::config::JustifiedConfig;
use crate::error::{AlbumError, Result};
use crate::photo::{ImageDimensions, Photo, PhotoId, Tier};
use crate::state::AlbumServices;
use std::sync::Arc;
use tracing::debug;

const SPACER_GROW: f32 = 9999.0;
/// Spacer minimum as a share of the container width
const SPACER_MIN_SHARE: f32 = 0.2;
/// Item minimum as a share of the row height
const MIN_WIDTH_SHARE: f32 = 0.3;

/// Card source order: display first, then thumb, medium, original
const CARD_TIERS: [Tier; 4] = [Tier::Display, Tier::Thumb, Tier::Medium, Tier::Original];

/// Source a card ended up showing
#[derive(Debug, Clone, PartialEq)]
pub struct CardImage {
    pub tier: Tier,
    pub src: String,
    pub dimensions: ImageDimensions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlexItem {
    pub index: usize,
    pub photo_id: PhotoId,
    pub aspect: f64,
    pub basis: f32,
    pub grow: f32,
    pub shrink: f32,
    pub min_width: f32,
    pub max_width: Option<f32>,
    pub height: f32,
}

impl FlexItem {
    /// Basis clamped to the item's bounds; the minimum wins a conflict
    fn hypothetical(&self) -> f32 {
        let capped = self.max_width.map_or(self.basis, |max| self.basis.min(max));
        capped.max(self.min_width)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackedItem {
    pub index: usize,
    pub photo_id: PhotoId,
    pub x: f32,
    pub width: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackedRow {
    pub y: f32,
    pub height: f32,
    pub items: Vec<PackedItem>,
}

pub struct JustifiedGrid {
    services: Arc<AlbumServices>,
    config: JustifiedConfig,
    photos: Arc<Vec<Photo>>,
}

impl JustifiedGrid {
    pub fn new(services: Arc<AlbumServices>, photos: Arc<Vec<Photo>>) -> Self {
        let config = services.config.justified.clone();
        Self { services, config, photos }
    }

    pub fn with_row_height(mut self, target_row_height: f32) -> Self {
        self.config.target_row_height = target_row_height;
        self
    }

    pub fn photos(&self) -> &Arc<Vec<Photo>> {
        &self.photos
    }

    fn aspect_for(&self, photo: &Photo) -> f64 {
        self.services
            .aspects
            .get(&photo.id)
            .unwrap_or(self.config.default_aspect)
    }

    pub fn items(&self) -> Vec<FlexItem> {
        let height = self.config.target_row_height;
        let min_width = self.config.min_item_width.max((height * MIN_WIDTH_SHARE).floor());

        self.photos
            .iter()
            .enumerate()
            .map(|(index, photo)| {
                let aspect = self.aspect_for(photo);
                let basis = (f64::from(height) * aspect).floor() as f32;
                let portrait = aspect < 1.0;

                FlexItem {
                    index,
                    photo_id: photo.id.clone(),
                    aspect,
                    basis,
                    grow: if portrait { 0.0 } else { 1.0 },
                    shrink: if portrait { 0.0 } else { 1.0 },
                    min_width,
                    max_width: portrait.then_some(basis),
                    height,
                }
            })
            .collect()
    }

    /// URLs a card tries in order, moving on after each load error
    pub fn card_sources(&self, photo: &Photo) -> Vec<String> {
        CARD_TIERS
            .iter()
            .map(|&tier| self.services.url_for(photo, tier))
            .collect()
    }

    /// Load the card for `index`, moving down [`Self::card_sources`] after each
    /// failure. The decoded ratio goes into the shared aspect cache so the
    /// next [`Self::items`] sizes the card from the real image.
    pub async fn load_card(&self, index: usize) -> Result<CardImage> {
        let photo = self
            .photos
            .get(index)
            .ok_or_else(|| AlbumError::Config(format!("no photo at index {}", index)))?;

        let mut last_error = None;
        for (tier, src) in CARD_TIERS.into_iter().zip(self.card_sources(photo)) {
            match self.services.fetcher.load(&src).await {
                Ok(dimensions) => {
                    if let Some(ratio) = dimensions.aspect_ratio() {
                        self.services.aspects.record(&photo.id, ratio);
                    }
                    return Ok(CardImage { tier, src, dimensions });
                }
                Err(e) => {
                    debug!(photo = %photo.id, %tier, error = %e, "Card source failed, falling back");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(AlbumError::Aborted))
    }

    /// Break items into rows and distribute each row's free space
    pub fn pack_rows(&self, container_width: f32, gap: f32) -> Vec<PackedRow> {
        let mut items = self.items();
        let spacer_index = items.len();
        items.push(FlexItem {
            index: spacer_index,
            photo_id: PhotoId::new(""),
            aspect: 0.0,
            basis: 0.0,
            grow: SPACER_GROW,
            shrink: 1.0,
            min_width: container_width * SPACER_MIN_SHARE,
            max_width: None,
            height: 0.0,
        });

        let mut rows = Vec::new();
        let mut y = 0.0;
        for line in break_lines(&items, container_width, gap) {
            let widths = resolve_widths(&line, container_width - gap * (line.len() - 1) as f32);

            let mut x = 0.0;
            let mut placed = Vec::new();
            for (item, width) in line.iter().zip(widths) {
                if item.index != spacer_index {
                    placed.push(PackedItem {
                        index: item.index,
                        photo_id: item.photo_id.clone(),
                        x,
                        width,
                    });
                }
                x += width + gap;
            }

            // a line holding only the spacer has no height
            if !placed.is_empty() {
                let height = line[0].height;
                rows.push(PackedRow { y, height, items: placed });
                y += height + gap;
            }
        }

        rows
    }
}

/// Greedy line breaking on hypothetical widths; every line holds at least one item
fn break_lines(items: &[FlexItem], container_width: f32, gap: f32) -> Vec<&[FlexItem]> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut used = 0.0f32;

    for (i, item) in items.iter().enumerate() {
        let width = item.hypothetical();
        let needed = if i == start { width } else { used + gap + width };
        if i > start && needed > container_width {
            lines.push(&items[start..i]);
            start = i;
            used = width;
        } else {
            used = needed;
        }
    }
    if start < items.len() {
        lines.push(&items[start..]);
    }
    lines
}

/// Resolve flexible widths for one line given the space left after gaps.
///
/// Grows or shrinks unfrozen items proportionally, freezes items that hit
/// their bounds and repeats until nothing violates a bound.
fn resolve_widths(line: &[FlexItem], available: f32) -> Vec<f32> {
    let hypothetical: f32 = line.iter().map(FlexItem::hypothetical).sum();
    let growing = hypothetical < available;

    let mut target: Vec<f32> = line.iter().map(FlexItem::hypothetical).collect();
    let mut frozen: Vec<bool> = line
        .iter()
        .map(|item| {
            let factor = if growing { item.grow } else { item.shrink };
            factor == 0.0
                || (growing && item.basis > item.hypothetical())
                || (!growing && item.basis < item.hypothetical())
        })
        .collect();

    loop {
        if frozen.iter().all(|&f| f) {
            break;
        }

        let used: f32 = line
            .iter()
            .zip(&target)
            .zip(&frozen)
            .map(|((item, &t), &f)| if f { t } else { item.basis })
            .sum();
        let free = available - used;

        let weight = |item: &FlexItem| if growing { item.grow } else { item.shrink * item.basis };
        let total_weight: f32 = line
            .iter()
            .zip(&frozen)
            .filter(|&(_, &f)| !f)
            .map(|(item, _)| weight(item))
            .sum();

        let mut violation = 0.0f32;
        let mut clamped = vec![0i8; line.len()];
        for (i, item) in line.iter().enumerate() {
            if frozen[i] {
                continue;
            }
            let share = if total_weight > 0.0 { free * weight(item) / total_weight } else { 0.0 };
            let unclamped = item.basis + share;
            let mut value = unclamped;
            if let Some(max) = item.max_width {
                value = value.min(max);
            }
            value = value.max(item.min_width);
            if value > unclamped {
                clamped[i] = 1;
            } else if value < unclamped {
                clamped[i] = -1;
            }
            violation += value - unclamped;
            target[i] = value;
        }

        for i in 0..line.len() {
            if frozen[i] {
                continue;
            }
            let freeze = if violation == 0.0 {
                true
            } else if violation > 0.0 {
                clamped[i] == 1
            } else {
                clamped[i] == -1
            };
            if freeze {
                frozen[i] = true;
            }
        }
    }

    target
}
