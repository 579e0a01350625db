use crate::photo::PhotoId;
use dashmap::DashMap;
use std::sync::Arc;

/// Width/height ratios learned from decoded images.
///
/// Lives for the whole session with no eviction; grids created later reuse
/// ratios learned by earlier ones so their first layout is already right.
#[derive(Debug, Clone, Default)]
pub struct AspectCache {
    ratios: Arc<DashMap<PhotoId, f64>>,
}

impl AspectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &PhotoId) -> Option<f64> {
        self.ratios.get(id).map(|ratio| *ratio)
    }

    /// Store a ratio; non-finite or non-positive values are ignored
    pub fn record(&self, id: &PhotoId, ratio: f64) -> bool {
        if !ratio.is_finite() || ratio <= 0.0 {
            return false;
        }
        self.ratios.insert(id.clone(), ratio);
        true
    }

    pub fn len(&self) -> usize {
        self.ratios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratios.is_empty()
    }
}
