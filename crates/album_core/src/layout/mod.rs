//! Grid layout engines
//!
//! - `masonry`: column-balanced grid with stable assignments
//! - `justified`: flex-wrap rows at a target height
//! - `aspect`: session-wide aspect ratio mirror shared by both

mod aspect;
mod justified;
mod masonry;

pub use aspect::AspectCache;
pub use justified::{CardImage, FlexItem, JustifiedGrid, PackedItem, PackedRow};
pub use masonry::{columns_for_width, CellSource, MasonryCell, MasonryGrid};
