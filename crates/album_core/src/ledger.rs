//! Quality ledger
//!
//! Session-lifetime record of the highest tier successfully loaded per photo.
//! Grids use it to swap in upgraded sources; the viewer uses it to skip the
//! thumbnail placeholder for photos that were already upgraded elsewhere.
//!
//! The stored tier only ever increases. Listeners are called synchronously
//! from `mark_loaded`, after the update and outside every internal lock.

use crate::photo::{PhotoId, Tier};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Callback invoked with `(photo, new tier)` on every actual upgrade
pub type Listener = Arc<dyn Fn(&PhotoId, Tier) + Send + Sync>;

/// Shared handle to the quality ledger; clones see the same state
#[derive(Clone, Default)]
pub struct QualityLedger {
    inner: Arc<LedgerInner>,
}

#[derive(Default)]
struct LedgerInner {
    tiers: DashMap<PhotoId, Tier>,
    listeners: RwLock<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
}

impl QualityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `tier` finished loading for `id`.
    ///
    /// Applied only when `tier` is strictly higher than the stored tier (or
    /// nothing is stored). Returns true and notifies listeners on an actual
    /// update; lower or equal tiers are ignored silently.
    pub fn mark_loaded(&self, id: &PhotoId, tier: Tier) -> bool {
        let upgraded = match self.inner.tiers.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                if tier > *entry.get() {
                    entry.insert(tier);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(tier);
                true
            }
        };

        if !upgraded {
            return false;
        }

        tracing::trace!(photo = %id, %tier, "Quality upgraded");

        // snapshot so listeners may subscribe/unsubscribe re-entrantly
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(id, tier);
        }
        true
    }

    /// Highest loaded tier, `None` if nothing has loaded yet
    pub fn loaded_quality(&self, id: &PhotoId) -> Option<Tier> {
        self.inner.tiers.get(id).map(|tier| *tier)
    }

    /// True iff the stored tier is `display` or `original`
    pub fn has_high_quality(&self, id: &PhotoId) -> bool {
        self.loaded_quality(id).is_some_and(Tier::is_high)
    }

    /// Photos currently at `display` or `original`
    pub fn high_quality_ids(&self) -> HashSet<PhotoId> {
        self.inner
            .tiers
            .iter()
            .filter(|entry| entry.value().is_high())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is dropped or explicitly unsubscribed.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PhotoId, Tier) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().push((id, Arc::new(listener)));

        Subscription {
            ledger: Arc::downgrade(&self.inner),
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Number of photos with any recorded tier
    pub fn len(&self) -> usize {
        self.inner.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tiers.is_empty()
    }

    /// Photo count per tier, lowest tier first
    pub fn tier_counts(&self) -> [(Tier, usize); 4] {
        let mut counts = Tier::ALL.map(|tier| (tier, 0usize));
        for entry in self.inner.tiers.iter() {
            counts[*entry.value() as usize].1 += 1;
        }
        counts
    }
}

impl fmt::Debug for QualityLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QualityLedger")
            .field("entries", &self.inner.tiers.len())
            .field("listeners", &self.inner.listeners.read().len())
            .finish()
    }
}

/// Listener registration handle
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    ledger: Weak<LedgerInner>,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the listener. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.ledger.upgrade() {
            inner.listeners.write().retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}
